use crate::codec::{CodecPool, PooledWorker};
use crate::config::PlaybackConfig;
use crate::error::VoiceError;
use crate::player::AudioPlayer;
use crate::registry::SessionRegistry;
use crate::transport::{wait_for, WaitOutcome};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use yomiage_types::PlayerStatus;

/// Playback lifecycle of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// No player exists for the group.
    NoPipeline,
    /// A player exists but has never played.
    PipelineCreated,
    /// A resource is buffering or playing.
    Playing,
    /// The last resource finished.
    Idle,
}

/// How one call to [`PlaybackManager::play`] went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    /// The player left buffering within the start timeout.
    pub started: bool,
    /// The player returned to idle within the finish timeout.
    pub finished: bool,
}

/// Owns each group's audio player and plays PCM through the codec pool.
#[derive(Debug)]
pub struct PlaybackManager {
    codec: CodecPool,
    sessions: Arc<SessionRegistry>,
    players: Mutex<HashMap<String, Arc<AudioPlayer>>>,
    config: PlaybackConfig,
}

impl PlaybackManager {
    pub fn new(codec: CodecPool, sessions: Arc<SessionRegistry>, config: PlaybackConfig) -> Self {
        Self {
            codec,
            sessions,
            players: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn codec(&self) -> &CodecPool {
        &self.codec
    }

    /// Creates a fresh player for the group. Any previous player is stopped
    /// and discarded first, so a group never has two players.
    pub fn get_or_create_pipeline(&self, group_id: &str) -> Arc<AudioPlayer> {
        let player = AudioPlayer::new(group_id);
        let previous = self
            .players
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group_id.to_string(), Arc::clone(&player));
        if let Some(previous) = previous {
            previous.stop();
            debug!(group_id, old = %previous.id(), new = %player.id(), "audio player replaced");
        }
        player
    }

    pub fn pipeline(&self, group_id: &str) -> Option<Arc<AudioPlayer>> {
        self.players
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_id)
            .cloned()
    }

    /// Stops and forgets the group's player.
    pub fn remove(&self, group_id: &str) -> bool {
        let removed = self
            .players
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(group_id);
        match removed {
            Some(player) => {
                player.stop();
                true
            }
            None => false,
        }
    }

    pub fn state(&self, group_id: &str) -> PlaybackState {
        match self.pipeline(group_id) {
            None => PlaybackState::NoPipeline,
            Some(player) => match player.status() {
                PlayerStatus::Buffering | PlayerStatus::Playing => PlaybackState::Playing,
                PlayerStatus::Idle if player.has_played() => PlaybackState::Idle,
                PlayerStatus::Idle => PlaybackState::PipelineCreated,
            },
        }
    }

    /// Encodes `pcm` and plays it into the group's live session on a fresh
    /// player, waiting for playback to start and then to finish.
    ///
    /// Timeouts while waiting are logged and reported, not returned as
    /// errors. The codec worker is released on every path.
    pub async fn play(&self, group_id: &str, pcm: Vec<u8>) -> Result<PlaybackReport, VoiceError> {
        let mut worker = self.codec.acquire().await?;
        let outcome = self.play_with(group_id, &mut worker, pcm).await;
        self.codec.release(worker).await;
        let report = outcome?;
        info!(
            group_id,
            started = report.started,
            finished = report.finished,
            "utterance played"
        );
        Ok(report)
    }

    async fn play_with(
        &self,
        group_id: &str,
        worker: &mut PooledWorker,
        pcm: Vec<u8>,
    ) -> Result<PlaybackReport, VoiceError> {
        let session = self.sessions.ready(group_id).ok_or_else(|| {
            VoiceError::Transport(format!("no ready live session for group {group_id}"))
        })?;
        let resource = worker.transcode(pcm)?;

        let player = self.get_or_create_pipeline(group_id);
        player.subscribe_to(session);
        let mut status = player.status_changes();
        player.play(resource)?;

        let started = wait_for(&mut status, self.config.start_timeout(), |s| {
            *s != PlayerStatus::Buffering
        })
        .await
            == WaitOutcome::Reached;
        if !started {
            warn!(group_id, "playback did not start in time");
        }

        let finished = started
            && wait_for(&mut status, self.config.finish_timeout(), |s| {
                *s == PlayerStatus::Idle
            })
            .await
                == WaitOutcome::Reached;
        if started && !finished {
            warn!(group_id, "playback did not finish in time; stopping player");
        }
        if !finished {
            player.stop();
        }
        Ok(PlaybackReport { started, finished })
    }

    /// Stops every player.
    pub fn stop_all(&self) {
        let players: Vec<Arc<AudioPlayer>> = self
            .players
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, player)| player)
            .collect();
        for player in players {
            player.stop();
        }
    }
}
