//! Live session establishment, restoration and teardown.
//!
//! The connection manager is the only writer of the session registry. It
//! joins groups on request, restores the groups saved in the channel state
//! file after a restart, and watches each session so a dropped connection
//! removes the group's entry and player. Every successful join or leave
//! re-persists the channel state.

use crate::config::ReconnectConfig;
use crate::error::VoiceError;
use crate::playback::PlaybackManager;
use crate::queue::SpeechQueue;
use crate::registry::SessionRegistry;
use crate::state::{ChannelState, ChannelStateStore};
use crate::transport::{wait_for, LiveSession, VoiceTransport, WaitOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use yomiage_types::voice::DEFAULT_SPEAKER_ID;
use yomiage_types::{ChannelTarget, Priority, QueueItem, SessionState};

/// Outcome of a reconnection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectSummary {
    pub total: usize,
    pub reconnected: usize,
    pub failed: usize,
}

pub struct ConnectionManager {
    transport: Arc<dyn VoiceTransport>,
    sessions: Arc<SessionRegistry>,
    playback: Arc<PlaybackManager>,
    queue: SpeechQueue,
    store: ChannelStateStore,
    /// Last requested target of every group that should be connected,
    /// including groups whose session is currently lost.
    targets: Mutex<HashMap<String, ChannelTarget>>,
    /// Held while a group's session is being replaced or torn down, so at
    /// most one connect per group is in flight.
    turns: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    config: ReconnectConfig,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("sessions", &self.sessions.len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn VoiceTransport>,
        sessions: Arc<SessionRegistry>,
        playback: Arc<PlaybackManager>,
        queue: SpeechQueue,
        store: ChannelStateStore,
        config: ReconnectConfig,
    ) -> Self {
        Self {
            transport,
            sessions,
            playback,
            queue,
            store,
            targets: Mutex::new(HashMap::new()),
            turns: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn targets(&self) -> std::sync::MutexGuard<'_, HashMap<String, ChannelTarget>> {
        self.targets.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn turn(&self, group_id: &str) -> Arc<AsyncMutex<()>> {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(turns.entry(group_id.to_string()).or_default())
    }

    /// Joins `target` for `group_id`, replacing any existing session.
    pub async fn join(&self, group_id: &str, target: ChannelTarget) -> Result<(), VoiceError> {
        if group_id.trim().is_empty() || target.channel_id.trim().is_empty() {
            return Err(VoiceError::InvalidRequest(
                "group id and channel id are required".into(),
            ));
        }
        let turn = self.turn(group_id);
        let _turn = turn.lock().await;
        self.targets().insert(group_id.to_string(), target.clone());
        self.establish(group_id, &target).await?;
        self.persist();
        Ok(())
    }

    /// Leaves the group's channel. Returns `false` if it had no session.
    pub async fn leave(&self, group_id: &str) -> bool {
        let turn = self.turn(group_id);
        let _turn = turn.lock().await;
        self.targets().remove(group_id);
        let cleared = self.queue.clear(group_id);
        let session = self.sessions.remove(group_id);
        self.playback.remove(group_id);
        let had_session = match session {
            Some(session) => {
                session.disconnect().await;
                session.destroy().await;
                true
            }
            None => false,
        };
        info!(group_id, had_session, cleared, "left voice channel");
        self.persist();
        had_session
    }

    /// Restores every group saved in the channel state file.
    ///
    /// Groups are processed one at a time with a short pause between them.
    /// A group that fails both attempts is left disconnected. The state file
    /// is rewritten afterwards if any group came back.
    pub async fn restore_from_saved_state(&self) -> ReconnectSummary {
        let saved = self.store.load();
        if saved.is_empty() {
            debug!("no saved channel state to restore");
            return ReconnectSummary::default();
        }
        info!(groups = saved.len(), "restoring live sessions from saved state");
        {
            let mut targets = self.targets();
            for (group_id, target) in &saved {
                targets.insert(group_id.clone(), target.clone());
            }
        }
        self.reconnect_batch(saved.into_keys().collect()).await
    }

    /// Re-establishes groups that have a target but no live session, e.g.
    /// after their connection dropped or a restore attempt failed.
    pub async fn reconnect_lost(&self) -> ReconnectSummary {
        let lost: Vec<String> = self
            .targets()
            .keys()
            .filter(|group_id| self.sessions.get(group_id).is_none())
            .cloned()
            .collect();
        if lost.is_empty() {
            return ReconnectSummary::default();
        }
        info!(groups = lost.len(), "reconnecting lost live sessions");
        self.reconnect_batch(lost).await
    }

    async fn reconnect_batch(&self, groups: Vec<String>) -> ReconnectSummary {
        let mut summary = ReconnectSummary::default();
        for (index, group_id) in groups.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.inter_group_delay()).await;
            }
            let turn = self.turn(&group_id);
            let _turn = turn.lock().await;
            // A join or leave may have run while this pass was waiting.
            let target = self.targets().get(&group_id).cloned();
            let Some(target) = target else {
                debug!(%group_id, "group was left; skipping reconnection");
                continue;
            };
            if self.sessions.ready(&group_id).is_some() {
                debug!(%group_id, "group already has a ready session; skipping reconnection");
                continue;
            }
            summary.total += 1;
            match self.establish(&group_id, &target).await {
                Ok(()) => {
                    summary.reconnected += 1;
                    self.announce(&group_id).await;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(%group_id, channel_id = %target.channel_id, error = %e, "failed to restore live session");
                }
            }
        }
        if summary.reconnected > 0 {
            self.persist();
        }
        info!(
            total = summary.total,
            reconnected = summary.reconnected,
            failed = summary.failed,
            "reconnection pass finished"
        );
        summary
    }

    async fn announce(&self, group_id: &str) {
        if self.config.announcement.trim().is_empty() {
            return;
        }
        let item = QueueItem::new(
            group_id,
            self.config.announcement.clone(),
            DEFAULT_SPEAKER_ID,
            Priority::High,
        );
        if let Err(e) = self.queue.enqueue(item) {
            warn!(group_id, error = %e, "failed to queue reconnection announcement");
        }
    }

    /// Tears down any stale session, then connects with one retry.
    ///
    /// Callers hold the group's turn.
    async fn establish(&self, group_id: &str, target: &ChannelTarget) -> Result<(), VoiceError> {
        if let Some(stale) = self.sessions.remove(group_id) {
            debug!(group_id, "destroying stale live session");
            stale.destroy().await;
            self.playback.remove(group_id);
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        let session = match self
            .connect_ready(group_id, target, self.config.ready_timeout())
            .await
        {
            Ok(session) => session,
            Err(first) => {
                warn!(group_id, error = %first, "live session did not become ready; retrying once");
                tokio::time::sleep(self.config.retry_delay()).await;
                self.connect_ready(group_id, target, self.config.retry_ready_timeout())
                    .await?
            }
        };

        if let Some(displaced) = self.sessions.insert(group_id, Arc::clone(&session)) {
            if !Arc::ptr_eq(&displaced, &session) {
                warn!(group_id, "destroying displaced live session");
                displaced.disconnect().await;
                displaced.destroy().await;
            }
        }
        let player = self.playback.get_or_create_pipeline(group_id);
        player.subscribe_to(Arc::clone(&session));
        self.watch_disconnect(group_id, session);
        info!(group_id, channel_id = %target.channel_id, "live session ready");
        Ok(())
    }

    async fn connect_ready(
        &self,
        group_id: &str,
        target: &ChannelTarget,
        ready_timeout: Duration,
    ) -> Result<Arc<dyn LiveSession>, VoiceError> {
        let session = self.transport.connect(group_id, target).await?;
        let mut states = session.state_changes();
        let outcome = wait_for(&mut states, ready_timeout, |state| {
            *state == SessionState::Ready || state.is_terminal()
        })
        .await;
        match outcome {
            WaitOutcome::Reached if session.state() == SessionState::Ready => Ok(session),
            WaitOutcome::Reached | WaitOutcome::Closed => {
                session.destroy().await;
                Err(VoiceError::Transport(format!(
                    "live session for group {group_id} closed before becoming ready"
                )))
            }
            WaitOutcome::TimedOut => {
                session.destroy().await;
                Err(VoiceError::Timeout {
                    operation: "live session ready",
                    timeout_ms: ready_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Removes the group's entry and player once `session` drops. The target
    /// is kept so [`Self::reconnect_lost`] can bring the group back.
    fn watch_disconnect(&self, group_id: &str, session: Arc<dyn LiveSession>) {
        let sessions = Arc::clone(&self.sessions);
        let playback = Arc::clone(&self.playback);
        let group_id = group_id.to_string();
        let mut states = session.state_changes();
        tokio::spawn(async move {
            // Err means the sender is gone, which also ends the session.
            let _ = states.wait_for(|state| state.is_terminal()).await;
            if sessions.remove_if_current(&group_id, &session) {
                playback.remove(&group_id);
                warn!(%group_id, state = ?session.state(), "live session lost");
            }
        });
    }

    /// Writes the target of every live session to the channel state file.
    pub fn persist(&self) {
        let live = self.sessions.group_ids();
        let state: ChannelState = {
            let targets = self.targets();
            live.into_iter()
                .filter_map(|group_id| {
                    let target = targets.get(&group_id)?.clone();
                    Some((group_id, target))
                })
                .collect()
        };
        if let Err(e) = self.store.save(&state) {
            error!(path = %self.store.path().display(), error = %e, "failed to save channel state");
        }
    }

    /// Persists current state, then disconnects every session without
    /// forgetting the targets on disk.
    pub async fn shutdown(&self) {
        self.persist();
        let sessions = self.sessions.drain();
        let count = sessions.len();
        self.playback.stop_all();
        for (group_id, session) in sessions {
            debug!(%group_id, "disconnecting live session");
            session.disconnect().await;
            session.destroy().await;
        }
        info!(sessions = count, "live sessions closed");
    }
}
