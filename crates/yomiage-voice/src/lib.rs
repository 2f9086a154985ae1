//! Speech delivery pipeline for the yomiage service.
//!
//! Text arrives per group with a priority and leaves as encoded audio in the
//! group's live voice session. The stages, in order:
//!
//! - [`SpeechQueue`] orders utterances per group and runs one drain loop per
//!   group.
//! - [`chunker`] truncates and splits the text, then renders chunks through
//!   the [`SynthesisClient`] with bounded concurrency.
//! - [`trim`] strips silence from the ends of the concatenated utterance.
//! - [`PlaybackManager`] encodes the PCM with a worker from the
//!   [`CodecPool`] and plays it through the group's [`AudioPlayer`].
//! - [`ConnectionManager`] owns the live sessions in the
//!   [`SessionRegistry`] and restores them after a restart.
//!
//! The synthesis engine and the voice network are external. The engine is
//! reached over HTTP; the voice network sits behind the
//! [`transport::VoiceTransport`] trait.

pub mod chunker;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod playback;
pub mod player;
pub mod profiles;
pub mod queue;
pub mod registry;
pub mod runtime;
pub mod speakers;
pub mod speech;
pub mod state;
pub mod synthesis;
pub mod transport;
pub mod trim;

pub use chunker::{ChunkSynthesizer, SynthesisContext};
pub use codec::{CodecPool, PoolStats, PooledWorker};
pub use config::{CodecConfig, EngineConfig, PlaybackConfig, ReconnectConfig};
pub use connection::{ConnectionManager, ReconnectSummary};
pub use error::VoiceError;
pub use health::EngineHealth;
pub use playback::{PlaybackManager, PlaybackReport, PlaybackState};
pub use player::{AudioPlayer, AudioResource};
pub use profiles::VoiceProfileStore;
pub use queue::{QueueStatus, SpeechQueue, UtteranceSink};
pub use registry::SessionRegistry;
pub use runtime::{RuntimeOptions, VoiceRuntime};
pub use speakers::{CatalogSource, SpeakerCatalog};
pub use speech::SpeechPipeline;
pub use state::{ChannelState, ChannelStateStore};
pub use synthesis::SynthesisClient;
pub use transport::{LiveSession, LoopbackTransport, VoiceTransport};
