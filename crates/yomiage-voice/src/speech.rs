use crate::chunker::{render_utterance, ChunkSynthesizer};
use crate::error::VoiceError;
use crate::playback::PlaybackManager;
use crate::queue::UtteranceSink;
use crate::registry::SessionRegistry;
use crate::trim::DEFAULT_SILENCE_RUN;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use yomiage_types::{GroupLimits, QueueItem, Tier};

/// Turns a dequeued item into audio in the group's live session.
///
/// Text is truncated and chunked according to the group's tier, rendered by
/// the synthesizer, concatenated and trimmed, then handed to the playback
/// manager. Tiers are pushed in by the billing layer; groups without one get
/// free-tier limits.
pub struct SpeechPipeline {
    synthesizer: Arc<dyn ChunkSynthesizer>,
    playback: Arc<PlaybackManager>,
    sessions: Arc<SessionRegistry>,
    tiers: RwLock<HashMap<String, Tier>>,
    silence_run: usize,
}

impl std::fmt::Debug for SpeechPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechPipeline")
            .field("silence_run", &self.silence_run)
            .finish_non_exhaustive()
    }
}

impl SpeechPipeline {
    pub fn new(
        synthesizer: Arc<dyn ChunkSynthesizer>,
        playback: Arc<PlaybackManager>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            synthesizer,
            playback,
            sessions,
            tiers: RwLock::new(HashMap::new()),
            silence_run: DEFAULT_SILENCE_RUN,
        }
    }

    pub fn set_tier(&self, group_id: &str, tier: Tier) {
        self.tiers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group_id.to_string(), tier);
    }

    pub fn tier(&self, group_id: &str) -> Tier {
        self.tiers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_id)
            .copied()
            .unwrap_or_default()
    }

    pub fn limits(&self, group_id: &str) -> GroupLimits {
        self.tier(group_id).limits()
    }
}

#[async_trait]
impl UtteranceSink for SpeechPipeline {
    fn can_play(&self, group_id: &str) -> bool {
        self.sessions.is_ready(group_id)
    }

    async fn speak(&self, item: &QueueItem) -> Result<(), VoiceError> {
        let limits = self.limits(&item.group_id);
        let pcm = render_utterance(
            Arc::clone(&self.synthesizer),
            item,
            limits,
            self.silence_run,
        )
        .await;
        if pcm.is_empty() {
            debug!(group_id = %item.group_id, "nothing audible to play");
            return Ok(());
        }
        self.playback.play(&item.group_id, pcm).await?;
        Ok(())
    }
}
