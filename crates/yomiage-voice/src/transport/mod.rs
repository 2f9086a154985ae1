//! Live session transport seam.
//!
//! A [`VoiceTransport`] opens one [`LiveSession`] per group. Sessions expose
//! their lifecycle as a `watch` channel so callers can wait for a state with
//! [`wait_for`] instead of polling. The wire protocol of a real voice network
//! lives behind these traits; [`loopback`] provides an in-process
//! implementation.

use crate::error::VoiceError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;
use yomiage_types::{ChannelTarget, SessionState};

pub mod loopback;

pub use loopback::{LoopbackSession, LoopbackTransport};

/// One group's connection to a voice channel.
#[async_trait]
pub trait LiveSession: Send + Sync + fmt::Debug {
    fn group_id(&self) -> &str;

    fn target(&self) -> &ChannelTarget;

    fn state(&self) -> SessionState;

    /// Receiver that observes every state change.
    fn state_changes(&self) -> watch::Receiver<SessionState>;

    /// Routes audio from `player_id` into this session. Audio from any other
    /// player is dropped from then on.
    fn subscribe(&self, player_id: Uuid);

    /// Sends one packet of encoded audio produced by `player_id`.
    async fn send_audio(&self, player_id: Uuid, packet: &[u8]) -> Result<(), VoiceError>;

    /// Leaves the channel. The session moves to `Disconnected`.
    async fn disconnect(&self);

    /// Releases every resource held by the session. The session moves to
    /// `Destroyed` and never becomes ready again.
    async fn destroy(&self);
}

/// Opens live sessions.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Starts joining `target` for `group_id`. The returned session may still
    /// be `Connecting`.
    async fn connect(
        &self,
        group_id: &str,
        target: &ChannelTarget,
    ) -> Result<Arc<dyn LiveSession>, VoiceError>;
}

/// Result of [`wait_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate held, possibly already on entry.
    Reached,
    /// The timeout elapsed first.
    TimedOut,
    /// The sender was dropped before the predicate held.
    Closed,
}

/// Waits until the value observed by `rx` satisfies `predicate`, for at most
/// `timeout`.
pub async fn wait_for<T, F>(
    rx: &mut watch::Receiver<T>,
    timeout: Duration,
    mut predicate: F,
) -> WaitOutcome
where
    F: FnMut(&T) -> bool,
{
    match tokio::time::timeout(timeout, rx.wait_for(|value| predicate(value))).await {
        Ok(Ok(_)) => WaitOutcome::Reached,
        Ok(Err(_)) => WaitOutcome::Closed,
        Err(_) => WaitOutcome::TimedOut,
    }
}
