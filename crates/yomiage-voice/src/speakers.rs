use crate::error::VoiceError;
use crate::state::write_json_atomic;
use crate::synthesis::SynthesisClient;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn};
use yomiage_types::voice::{SpeakerStyle, DEFAULT_SPEAKER_ID};

/// One speaker as listed by the engine's `/speakers` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSpeaker {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_uuid: Option<String>,
    #[serde(default)]
    pub styles: Vec<EngineStyle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStyle {
    pub name: String,
    pub id: u32,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Where the current catalog came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Engine,
    CacheFile,
    BuiltIn,
}

/// Speakers compiled into the service, used when neither the engine nor the
/// cache file can provide a list.
pub fn builtin_speakers() -> Vec<EngineSpeaker> {
    let styles = [
        ("ノーマル", DEFAULT_SPEAKER_ID),
        ("通常", DEFAULT_SPEAKER_ID + 1),
        ("テンション高め", DEFAULT_SPEAKER_ID + 2),
        ("落ち着き", DEFAULT_SPEAKER_ID + 3),
        ("上機嫌", DEFAULT_SPEAKER_ID + 4),
        ("怒り・悲しみ", DEFAULT_SPEAKER_ID + 5),
    ];
    vec![EngineSpeaker {
        name: "Anneli".to_string(),
        speaker_uuid: Some("e756b8e4-b606-4e15-99b1-3f9c6a1b2317".to_string()),
        styles: styles
            .into_iter()
            .map(|(name, id)| EngineStyle {
                name: name.to_string(),
                id,
                kind: Some("talk".to_string()),
            })
            .collect(),
    }]
}

/// Flattens speakers into one entry per style.
pub fn flatten(speakers: &[EngineSpeaker]) -> Vec<SpeakerStyle> {
    speakers
        .iter()
        .flat_map(|speaker| {
            speaker.styles.iter().map(|style| SpeakerStyle {
                speaker_name: speaker.name.clone(),
                style_name: style.name.clone(),
                style_id: style.id,
            })
        })
        .collect()
}

/// Selectable voices, refreshed from the engine and cached on disk.
#[derive(Debug)]
pub struct SpeakerCatalog {
    speakers: RwLock<(Vec<EngineSpeaker>, CatalogSource)>,
    cache_path: PathBuf,
}

impl SpeakerCatalog {
    /// Starts with the built-in list. Call [`Self::refresh`] to load the real one.
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            speakers: RwLock::new((builtin_speakers(), CatalogSource::BuiltIn)),
            cache_path: cache_path.into(),
        }
    }

    fn read_cache(&self) -> Option<Vec<EngineSpeaker>> {
        let contents = std::fs::read_to_string(&self.cache_path).ok()?;
        match serde_json::from_str::<Vec<EngineSpeaker>>(&contents) {
            Ok(speakers) if !speakers.is_empty() => Some(speakers),
            Ok(_) => {
                warn!(path = %self.cache_path.display(), "speaker cache is empty");
                None
            }
            Err(e) => {
                warn!(path = %self.cache_path.display(), error = %e, "speaker cache is malformed");
                None
            }
        }
    }

    async fn fetch(&self, client: &SynthesisClient) -> Result<Vec<EngineSpeaker>, VoiceError> {
        let raw = client.speakers().await?;
        let speakers: Vec<EngineSpeaker> = serde_json::from_value(raw)?;
        if speakers.is_empty() {
            return Err(VoiceError::EngineStatus {
                status: 200,
                message: "engine returned no speakers".into(),
            });
        }
        Ok(speakers)
    }

    /// Reloads the catalog: engine first, then the cache file, then the
    /// built-in list. A successful engine fetch rewrites the cache.
    pub async fn refresh(&self, client: &SynthesisClient) -> CatalogSource {
        let (speakers, source) = match self.fetch(client).await {
            Ok(speakers) => {
                if let Err(e) = write_json_atomic(&self.cache_path, &speakers) {
                    warn!(path = %self.cache_path.display(), error = %e, "failed to write speaker cache");
                }
                (speakers, CatalogSource::Engine)
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch speakers from engine; using fallback");
                match self.read_cache() {
                    Some(speakers) => (speakers, CatalogSource::CacheFile),
                    None => (builtin_speakers(), CatalogSource::BuiltIn),
                }
            }
        };
        info!(
            source = ?source,
            speakers = speakers.len(),
            "speaker catalog loaded"
        );
        *self.speakers.write().await = (speakers, source);
        source
    }

    pub async fn source(&self) -> CatalogSource {
        self.speakers.read().await.1
    }

    pub async fn speakers(&self) -> Vec<EngineSpeaker> {
        self.speakers.read().await.0.clone()
    }

    pub async fn styles(&self) -> Vec<SpeakerStyle> {
        flatten(&self.speakers.read().await.0)
    }

    pub async fn find(&self, style_id: u32) -> Option<SpeakerStyle> {
        self.styles()
            .await
            .into_iter()
            .find(|style| style.style_id == style_id)
    }
}
