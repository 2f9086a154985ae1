use crate::codec::CodecPool;
use crate::config::{EngineConfig, PlaybackConfig, ReconnectConfig};
use crate::connection::ConnectionManager;
use crate::error::VoiceError;
use crate::health::EngineHealth;
use crate::playback::PlaybackManager;
use crate::profiles::VoiceProfileStore;
use crate::queue::SpeechQueue;
use crate::registry::SessionRegistry;
use crate::speakers::SpeakerCatalog;
use crate::speech::SpeechPipeline;
use crate::state::ChannelStateStore;
use crate::synthesis::SynthesisClient;
use crate::transport::VoiceTransport;
use std::path::PathBuf;
use std::sync::Arc;

pub const PROFILES_FILE: &str = "voice_settings.json";
pub const SPEAKERS_FILE: &str = "speakers.json";
pub const CHANNEL_STATE_FILE: &str = "voice_state.json";

/// Settings needed to assemble a [`VoiceRuntime`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub engine: EngineConfig,
    pub playback: PlaybackConfig,
    pub reconnect: ReconnectConfig,
    /// Directory holding the profile, speaker and channel state files.
    pub data_dir: PathBuf,
}

/// Every component of the speech pipeline, wired together.
#[derive(Debug, Clone)]
pub struct VoiceRuntime {
    pub health: Arc<EngineHealth>,
    pub profiles: Arc<VoiceProfileStore>,
    pub client: SynthesisClient,
    pub catalog: Arc<SpeakerCatalog>,
    pub codec: CodecPool,
    pub sessions: Arc<SessionRegistry>,
    pub playback: Arc<PlaybackManager>,
    pub pipeline: Arc<SpeechPipeline>,
    pub queue: SpeechQueue,
    pub connections: Arc<ConnectionManager>,
}

impl VoiceRuntime {
    pub fn new(
        options: RuntimeOptions,
        transport: Arc<dyn VoiceTransport>,
        codec: CodecPool,
    ) -> Result<Self, VoiceError> {
        let health = Arc::new(EngineHealth::new());
        let profiles = Arc::new(VoiceProfileStore::open(
            options.data_dir.join(PROFILES_FILE),
        ));
        let client = SynthesisClient::new(
            options.engine,
            Arc::clone(&health),
            Arc::clone(&profiles),
        )?;
        let catalog = Arc::new(SpeakerCatalog::new(options.data_dir.join(SPEAKERS_FILE)));

        let sessions = Arc::new(SessionRegistry::new());
        let playback = Arc::new(PlaybackManager::new(
            codec.clone(),
            Arc::clone(&sessions),
            options.playback,
        ));
        let pipeline = Arc::new(SpeechPipeline::new(
            Arc::new(client.clone()),
            Arc::clone(&playback),
            Arc::clone(&sessions),
        ));
        let queue = SpeechQueue::new(pipeline.clone());
        let connections = Arc::new(ConnectionManager::new(
            transport,
            Arc::clone(&sessions),
            Arc::clone(&playback),
            queue.clone(),
            ChannelStateStore::new(options.data_dir.join(CHANNEL_STATE_FILE)),
            options.reconnect,
        ));

        Ok(Self {
            health,
            profiles,
            client,
            catalog,
            codec,
            sessions,
            playback,
            pipeline,
            queue,
            connections,
        })
    }

    /// Disconnects every session and stops the codec pool.
    pub async fn shutdown(&self) {
        self.connections.shutdown().await;
        self.codec.shutdown().await;
    }
}
