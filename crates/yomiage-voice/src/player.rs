//! Audio player: pumps one encoded stream at a time into a live session.

use crate::error::VoiceError;
use crate::transport::LiveSession;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use yomiage_types::PlayerStatus;

/// Read size for one packet handed to the session.
const PACKET_SIZE: usize = 4096;

/// A stream of encoded audio ready to be played.
///
/// When produced by a codec worker, it also carries the task feeding the
/// worker's input so its outcome can be checked once playback ends.
pub struct AudioResource {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    feeder: Option<JoinHandle<io::Result<()>>>,
}

impl std::fmt::Debug for AudioResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioResource")
            .field("has_feeder", &self.feeder.is_some())
            .finish()
    }
}

impl AudioResource {
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            feeder: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::from_reader(std::io::Cursor::new(bytes))
    }

    pub(crate) fn with_feeder(mut self, feeder: JoinHandle<io::Result<()>>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    /// Reads the whole stream into memory.
    pub async fn read_to_end(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.reader.read_to_end(&mut out).await?;
        if let Some(feeder) = self.feeder.take() {
            feeder.await.map_err(io::Error::other)??;
        }
        Ok(out)
    }
}

/// Plays audio resources for one group.
///
/// A player is created per session; packets it sends are only heard while
/// the session is subscribed to its id. Starting a new resource stops the
/// current one, so a player never interleaves two streams.
#[derive(Debug)]
pub struct AudioPlayer {
    id: Uuid,
    group_id: String,
    status: Arc<watch::Sender<PlayerStatus>>,
    /// Bumped on every play and stop. A pump only reports status while its
    /// generation is current.
    generation: Arc<AtomicU64>,
    has_played: AtomicBool,
    session: Mutex<Option<Arc<dyn LiveSession>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl AudioPlayer {
    pub fn new(group_id: impl Into<String>) -> Arc<Self> {
        let (status, _) = watch::channel(PlayerStatus::Idle);
        Arc::new(Self {
            id: Uuid::new_v4(),
            group_id: group_id.into(),
            status: Arc::new(status),
            generation: Arc::new(AtomicU64::new(0)),
            has_played: AtomicBool::new(false),
            session: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn status(&self) -> PlayerStatus {
        *self.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<PlayerStatus> {
        self.status.subscribe()
    }

    /// Whether any resource was ever started on this player.
    pub fn has_played(&self) -> bool {
        self.has_played.load(Ordering::SeqCst)
    }

    /// Binds this player to `session` and makes the session route its audio.
    pub fn subscribe_to(&self, session: Arc<dyn LiveSession>) {
        session.subscribe(self.id);
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    /// Starts playing `resource`, replacing whatever was playing.
    ///
    /// Returns as soon as the pump is running; observe [`Self::status_changes`]
    /// to follow playback. The status is `Buffering` on return.
    pub fn play(&self, resource: AudioResource) -> Result<(), VoiceError> {
        let session = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                VoiceError::Transport(format!(
                    "player for group {} is not subscribed to a session",
                    self.group_id
                ))
            })?;

        self.abort_pump();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.status.send_replace(PlayerStatus::Buffering);
        self.has_played.store(true, Ordering::SeqCst);

        let reporter = StatusReporter {
            status: Arc::clone(&self.status),
            current: Arc::clone(&self.generation),
            generation,
        };
        let handle = tokio::spawn(pump(
            self.id,
            self.group_id.clone(),
            resource,
            session,
            reporter,
        ));
        *self.pump.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    /// Stops playback and returns to idle.
    pub fn stop(&self) {
        self.abort_pump();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.status.send_replace(PlayerStatus::Idle);
    }

    fn abort_pump(&self) {
        if let Some(handle) = self.pump.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.abort_pump();
    }
}

struct StatusReporter {
    status: Arc<watch::Sender<PlayerStatus>>,
    current: Arc<AtomicU64>,
    generation: u64,
}

impl StatusReporter {
    fn report(&self, next: PlayerStatus) {
        if self.current.load(Ordering::SeqCst) == self.generation {
            self.status.send_replace(next);
        }
    }
}

async fn pump(
    player_id: Uuid,
    group_id: String,
    resource: AudioResource,
    session: Arc<dyn LiveSession>,
    status: StatusReporter,
) {
    let AudioResource { mut reader, feeder } = resource;
    let mut packet = vec![0u8; PACKET_SIZE];
    let mut sent = 0usize;
    let mut clean_end = false;

    loop {
        match reader.read(&mut packet).await {
            Ok(0) => {
                clean_end = true;
                break;
            }
            Ok(n) => {
                if sent == 0 {
                    status.report(PlayerStatus::Playing);
                }
                if let Err(e) = session.send_audio(player_id, &packet[..n]).await {
                    warn!(%group_id, error = %e, "failed to send audio packet; stopping playback");
                    break;
                }
                sent += n;
            }
            Err(e) => {
                warn!(%group_id, error = %e, "failed to read encoded audio; stopping playback");
                break;
            }
        }
    }
    drop(reader);

    if let Some(feeder) = feeder {
        if clean_end {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(%group_id, error = %e, "codec input write failed"),
                Err(e) => warn!(%group_id, error = %e, "codec input task failed"),
            }
        } else {
            feeder.abort();
        }
    }

    debug!(%group_id, bytes = sent, "playback finished");
    status.report(PlayerStatus::Idle);
}
