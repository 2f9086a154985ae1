use crate::chunker::{ChunkSynthesizer, SynthesisContext};
use crate::config::EngineConfig;
use crate::error::VoiceError;
use crate::health::EngineHealth;
use crate::profiles::VoiceProfileStore;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use yomiage_types::voice::VoiceProfile;

/// Sample rate requested from the engine. Must match the codec input rate.
pub const OUTPUT_SAMPLING_RATE: u32 = 44_100;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Writes `profile` and the fixed output format into an engine audio query.
pub fn adjust_audio_query(query: &mut Value, profile: &VoiceProfile) -> Result<(), VoiceError> {
    let doc = query
        .as_object_mut()
        .ok_or_else(|| VoiceError::InvalidRequest("audio query is not a JSON object".into()))?;
    doc.insert("outputSamplingRate".into(), OUTPUT_SAMPLING_RATE.into());
    doc.insert("outputStereo".into(), false.into());
    doc.insert("volumeScale".into(), profile.volume.into());
    doc.insert("pitchScale".into(), profile.pitch.into());
    doc.insert("speedScale".into(), profile.speed.into());
    doc.insert("intonationScale".into(), profile.intonation.into());
    doc.insert("tempoDynamicsScale".into(), profile.tempo_dynamics.into());
    doc.insert("prePhonemeLength".into(), 0.into());
    doc.insert("postPhonemeLength".into(), 0.into());
    Ok(())
}

/// Returns the sample data of a RIFF/WAVE buffer, or `audio` unchanged when
/// it carries no WAVE header.
pub fn strip_wav_header(audio: &[u8]) -> &[u8] {
    if audio.len() < 12 || &audio[0..4] != b"RIFF" || &audio[8..12] != b"WAVE" {
        return audio;
    }
    let mut pos = 12;
    while pos + 8 <= audio.len() {
        let id = &audio[pos..pos + 4];
        let size = u32::from_le_bytes([
            audio[pos + 4],
            audio[pos + 5],
            audio[pos + 6],
            audio[pos + 7],
        ]) as usize;
        let body = pos + 8;
        if id == b"data" {
            let end = body.saturating_add(size).min(audio.len());
            return &audio[body..end];
        }
        // Chunks are word aligned.
        pos = body.saturating_add(size).saturating_add(size & 1);
    }
    &[]
}

/// HTTP client for the two-phase synthesis engine protocol.
///
/// Phase one posts the text to `/audio_query` and receives a JSON parameter
/// document. Phase two posts the adjusted document to `/synthesis` and
/// receives 16-bit mono PCM. Transport failures and timeouts are retried a
/// fixed number of times; once retries are exhausted the engine is marked
/// unavailable until the background probe sees it recover.
#[derive(Debug, Clone)]
pub struct SynthesisClient {
    http: reqwest::Client,
    config: EngineConfig,
    health: Arc<EngineHealth>,
    profiles: Arc<VoiceProfileStore>,
}

impl SynthesisClient {
    pub fn new(
        config: EngineConfig,
        health: Arc<EngineHealth>,
        profiles: Arc<VoiceProfileStore>,
    ) -> Result<Self, VoiceError> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            config,
            health,
            profiles,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<EngineHealth> {
        &self.health
    }

    /// False while the engine is marked down after exhausted retries.
    pub fn is_healthy(&self) -> bool {
        self.health.is_available()
    }

    /// Sends a request built by `build`, retrying transport failures and
    /// timeouts. Status codes are left to the caller.
    async fn send_with_retry<F>(
        &self,
        operation: &'static str,
        timeout: Duration,
        build: F,
    ) -> Result<Response, VoiceError>
    where
        F: Fn() -> RequestBuilder,
    {
        if !self.health.is_available() {
            return Err(VoiceError::EngineUnavailable);
        }

        let attempts = self.config.max_retries + 1;
        let mut last_error = VoiceError::EngineUnavailable;
        for attempt in 1..=attempts {
            match build().timeout(timeout).send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => {
                    warn!(operation, attempt, attempts, "synthesis timed out");
                    last_error = VoiceError::Timeout {
                        operation,
                        timeout_ms: timeout.as_millis() as u64,
                    };
                }
                Err(e) => {
                    warn!(operation, attempt, attempts, error = %e, "engine request failed");
                    last_error = VoiceError::Http(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        if self.health.mark_down() {
            error!(
                operation,
                base_url = %self.config.base_url,
                "synthesis engine marked unavailable after exhausting retries"
            );
        }
        Err(last_error)
    }

    /// Phase one: returns the engine's audio query document for `text`.
    pub async fn query(&self, text: &str, speaker_id: u32) -> Result<Value, VoiceError> {
        let url = self.config.endpoint("audio_query");
        let speaker = speaker_id.to_string();
        let timeout = self.config.query_timeout();
        let response = self
            .send_with_retry("audio_query", timeout, || {
                self.http
                    .post(&url)
                    .query(&[("text", text), ("speaker", speaker.as_str())])
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VoiceError::EngineStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Phase two: renders an audio query document to PCM.
    ///
    /// A 422 response means the engine found nothing to voice; it yields an
    /// empty buffer rather than an error.
    pub async fn synthesize(&self, query: &Value, speaker_id: u32) -> Result<Vec<u8>, VoiceError> {
        let url = self.config.endpoint("synthesis");
        let speaker = speaker_id.to_string();
        let timeout = self.config.synthesis_timeout();
        let response = self
            .send_with_retry("synthesis", timeout, || {
                self.http
                    .post(&url)
                    .query(&[("speaker", speaker.as_str())])
                    .json(query)
            })
            .await?;

        let status = response.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            debug!(speaker_id, "engine rejected text as unprocessable");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(VoiceError::EngineStatus {
                status: status.as_u16(),
                message,
            });
        }
        let body = response.bytes().await?;
        Ok(strip_wav_header(&body).to_vec())
    }

    /// Runs both phases for one chunk, applying the profile of the item's
    /// origin user or group.
    pub async fn speak_chunk(
        &self,
        text: &str,
        context: &SynthesisContext,
    ) -> Result<Vec<u8>, VoiceError> {
        let mut query = self.query(text, context.speaker_id).await?;
        let profile = self
            .profiles
            .resolve(&context.group_id, context.origin_ref.as_deref())
            .await;
        adjust_audio_query(&mut query, &profile)?;
        self.synthesize(&query, context.speaker_id).await
    }

    /// Fetches the raw speaker list from `/speakers`.
    pub async fn speakers(&self) -> Result<Value, VoiceError> {
        let url = self.config.endpoint("speakers");
        let timeout = self.config.query_timeout();
        let response = self
            .send_with_retry("speakers", timeout, || self.http.get(&url))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::EngineStatus {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Single health probe against `/speakers`, bypassing the availability
    /// gate and the retry loop. Marks the engine available on success.
    ///
    /// Returns `true` if the engine transitioned from unavailable to available.
    pub async fn probe(&self) -> bool {
        let url = self.config.endpoint("speakers");
        match self.http.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => {
                let recovered = self.health.mark_up();
                if recovered {
                    info!(base_url = %self.config.base_url, "synthesis engine recovered");
                }
                recovered
            }
            Ok(response) => {
                debug!(status = %response.status(), "engine probe returned non-success");
                false
            }
            Err(e) => {
                debug!(error = %e, "engine probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl ChunkSynthesizer for SynthesisClient {
    async fn synthesize_chunk(
        &self,
        text: &str,
        context: &SynthesisContext,
    ) -> Result<Vec<u8>, VoiceError> {
        self.speak_chunk(text, context).await
    }
}
