//! In-process transport.
//!
//! Sessions become ready right after connect and record the audio routed
//! into them instead of sending it anywhere. Connect failures, stalled
//! handshakes and dropped connections can be injected, which makes the
//! loopback transport suitable for running the service without a voice
//! network and for exercising the reconnection paths.

use super::{LiveSession, VoiceTransport};
use crate::error::VoiceError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;
use yomiage_types::{ChannelTarget, SessionState};

/// Bytes of delivered audio retained per session for inspection.
const RETAINED_AUDIO_LIMIT: usize = 1024 * 1024;

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Debug)]
pub struct LoopbackSession {
    group_id: String,
    target: ChannelTarget,
    state: watch::Sender<SessionState>,
    subscriber: Mutex<Option<Uuid>>,
    retained: Mutex<Vec<u8>>,
    delivered_bytes: AtomicU64,
    dropped_packets: AtomicUsize,
}

impl LoopbackSession {
    fn new(group_id: &str, target: &ChannelTarget) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            group_id: group_id.to_string(),
            target: target.clone(),
            state,
            subscriber: Mutex::new(None),
            retained: Mutex::new(Vec::new()),
            delivered_bytes: AtomicU64::new(0),
            dropped_packets: AtomicUsize::new(0),
        }
    }

    /// Forces a state change, e.g. to simulate a dropped connection.
    ///
    /// A destroyed session stays destroyed.
    pub fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == SessionState::Destroyed || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Audio received from the subscribed player, up to the first MiB.
    pub fn delivered(&self) -> Vec<u8> {
        self.retained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn delivered_bytes(&self) -> u64 {
        self.delivered_bytes.load(Ordering::SeqCst)
    }

    /// Packets discarded because they came from a player other than the
    /// subscribed one.
    pub fn dropped_packets(&self) -> usize {
        self.dropped_packets.load(Ordering::SeqCst)
    }

    pub fn subscriber(&self) -> Option<Uuid> {
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LiveSession for LoopbackSession {
    fn group_id(&self) -> &str {
        &self.group_id
    }

    fn target(&self) -> &ChannelTarget {
        &self.target
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn subscribe(&self, player_id: Uuid) {
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) = Some(player_id);
    }

    async fn send_audio(&self, player_id: Uuid, packet: &[u8]) -> Result<(), VoiceError> {
        if self.state() != SessionState::Ready {
            return Err(VoiceError::Transport(format!(
                "session for group {} is not ready",
                self.group_id
            )));
        }
        if self.subscriber() != Some(player_id) {
            self.dropped_packets.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.delivered_bytes
            .fetch_add(packet.len() as u64, Ordering::SeqCst);
        let mut retained = self.retained.lock().unwrap_or_else(|e| e.into_inner());
        let room = RETAINED_AUDIO_LIMIT.saturating_sub(retained.len());
        retained.extend_from_slice(&packet[..packet.len().min(room)]);
        Ok(())
    }

    async fn disconnect(&self) {
        debug!(group_id = %self.group_id, "loopback session disconnecting");
        self.set_state(SessionState::Disconnected);
    }

    async fn destroy(&self) {
        self.set_state(SessionState::Destroyed);
        *self.subscriber.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Transport whose sessions live in-process.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    sessions: Mutex<HashMap<String, Arc<LoopbackSession>>>,
    failures: AtomicUsize,
    stalls: AtomicUsize,
    connects: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` connect calls fail outright.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Makes the sessions of the next `n` connect calls stay `Connecting`.
    pub fn stall_next(&self, n: usize) {
        self.stalls.store(n, Ordering::SeqCst);
    }

    /// Total connect calls, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Most recent session opened for `group_id`.
    pub fn session(&self, group_id: &str) -> Option<Arc<LoopbackSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_id)
            .cloned()
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn connect(
        &self,
        group_id: &str,
        target: &ChannelTarget,
    ) -> Result<Arc<dyn LiveSession>, VoiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.failures) {
            return Err(VoiceError::Transport(format!(
                "loopback connect refused for group {group_id}"
            )));
        }

        let session = Arc::new(LoopbackSession::new(group_id, target));
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group_id.to_string(), Arc::clone(&session));

        if take_one(&self.stalls) {
            debug!(group_id, "loopback session stalled in connecting");
        } else {
            let handshake = Arc::clone(&session);
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                if handshake.state() == SessionState::Connecting {
                    handshake.set_state(SessionState::Ready);
                }
            });
        }

        info!(group_id, channel_id = %target.channel_id, "loopback session opened");
        Ok(session)
    }
}
