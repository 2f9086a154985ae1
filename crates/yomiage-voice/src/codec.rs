//! Pool of `ffmpeg` processes that turn PCM into an Ogg/Opus stream.
//!
//! A worker is a child process reading PCM on stdin and writing the encoded
//! stream on stdout. Each checkout feeds the worker exactly one input, then
//! closes stdin so the process flushes and exits. Spent workers are destroyed
//! on release and the pool respawns warm ones up to its minimum.
//!
//! Concurrency is bounded by a semaphore with one permit per worker slot.
//! A [`PooledWorker`] holds its permit; dropping it without calling
//! [`CodecPool::release`] destroys the worker and frees the slot, so a
//! checkout can never leak on any exit path.

use crate::config::CodecConfig;
use crate::error::VoiceError;
use crate::player::AudioResource;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, trace, warn};

/// Candidates tried by one `acquire` before giving up.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Longest stderr excerpt logged per line.
const STDERR_EXCERPT_CHARS: usize = 200;

const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Arguments for an `ffmpeg` worker: s16le mono PCM in, Ogg/Opus out.
pub fn ffmpeg_args(config: &CodecConfig) -> Vec<String> {
    let input_rate = config.input_sample_rate.to_string();
    let output_rate = config.output_sample_rate.to_string();
    let bitrate = format!("{}k", config.bitrate_kbps);
    let filters = format!(
        "aresample={},silenceremove=start_periods=1:start_duration=0.02:start_threshold=-60dB,afade=t=in:st=0:d=0.03",
        config.output_sample_rate
    );
    [
        "-loglevel",
        "error",
        "-nostats",
        "-f",
        "s16le",
        "-ar",
        input_rate.as_str(),
        "-ac",
        "1",
        "-i",
        "pipe:0",
        "-af",
        filters.as_str(),
        "-c:a",
        "libopus",
        "-ar",
        output_rate.as_str(),
        "-b:a",
        bitrate.as_str(),
        "-vbr",
        "on",
        "-application",
        "audio",
        "-f",
        "ogg",
        "pipe:1",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

fn log_stderr(worker_id: u64, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let lower = line.to_lowercase();
            if lower.contains("error") || lower.contains("fatal") {
                let excerpt: String = line.chars().take(STDERR_EXCERPT_CHARS).collect();
                warn!(worker_id, %excerpt, "codec worker reported an error");
            } else {
                trace!(worker_id, %line, "codec worker output");
            }
        }
    });
}

/// One transcoding process.
#[derive(Debug)]
pub struct CodecWorker {
    id: u64,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl CodecWorker {
    fn spawn(id: u64, program: &str, args: &[String]) -> Result<Self, VoiceError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VoiceError::Codec(format!("failed to spawn {program}: {e}")))?;

        if let Some(stderr) = child.stderr.take() {
            log_stderr(id, stderr);
        }
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        debug!(worker_id = id, pid = ?child.id(), "codec worker spawned");
        Ok(Self {
            id,
            child,
            stdin,
            stdout,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the process is alive and neither pipe has been consumed.
    fn is_usable(&mut self) -> bool {
        self.stdin.is_some()
            && self.stdout.is_some()
            && matches!(self.child.try_wait(), Ok(None))
    }

    async fn shutdown(mut self) {
        drop(self.stdin.take());
        drop(self.stdout.take());
        if let Err(e) = self.child.start_kill() {
            trace!(worker_id = self.id, error = %e, "codec worker already exited");
        }
        if tokio::time::timeout(REAP_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            warn!(worker_id = self.id, "codec worker did not exit after kill");
        }
        debug!(worker_id = self.id, "codec worker destroyed");
    }
}

struct IdleWorker {
    worker: CodecWorker,
    since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleWorker>,
    /// Idle plus checked-out workers.
    live: usize,
    closed: bool,
}

struct PoolInner {
    program: String,
    args: Vec<String>,
    min: usize,
    max: usize,
    idle_timeout: Duration,
    acquire_timeout: Duration,
    state: Mutex<PoolState>,
    slots: Arc<Semaphore>,
    next_id: AtomicU64,
    checked_out: AtomicUsize,
    peak_checked_out: AtomicUsize,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_worker(&self) -> Result<CodecWorker, VoiceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        CodecWorker::spawn(id, &self.program, &self.args)
    }

    /// Pops the most recently idled worker, or spawns a new one.
    fn take_or_spawn(&self) -> Result<CodecWorker, VoiceError> {
        let mut state = self.state();
        if let Some(idle) = state.idle.pop_back() {
            return Ok(idle.worker);
        }
        let worker = self.spawn_worker()?;
        state.live += 1;
        Ok(worker)
    }

    /// Accounts for a worker leaving the pool. The caller disposes of it.
    fn forget(&self) {
        let mut state = self.state();
        state.live = state.live.saturating_sub(1);
    }

    /// Spawns idle workers until the minimum is met or the pool is full.
    fn ensure_min(&self) {
        let mut state = self.state();
        while !state.closed && state.idle.len() < self.min && state.live < self.max {
            match self.spawn_worker() {
                Ok(worker) => {
                    state.live += 1;
                    state.idle.push_back(IdleWorker {
                        worker,
                        since: Instant::now(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "failed to spawn warm codec worker");
                    break;
                }
            }
        }
    }
}

/// Counters describing the pool at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub live: usize,
    pub checked_out: usize,
    /// Highest `checked_out` ever observed.
    pub peak_checked_out: usize,
}

/// A worker checked out of the pool.
pub struct PooledWorker {
    worker: Option<CodecWorker>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorker")
            .field("worker", &self.worker.as_ref().map(CodecWorker::id))
            .finish()
    }
}

impl PooledWorker {
    pub fn id(&self) -> Option<u64> {
        self.worker.as_ref().map(CodecWorker::id)
    }

    /// Writes `pcm` to the worker and returns its output stream.
    ///
    /// The input is written once, by a background task, and stdin is closed
    /// right after. A worker can transcode only once.
    pub fn transcode(&mut self, pcm: Vec<u8>) -> Result<AudioResource, VoiceError> {
        let worker = self
            .worker
            .as_mut()
            .ok_or_else(|| VoiceError::Codec("worker was already released".into()))?;
        let mut stdin = worker
            .stdin
            .take()
            .ok_or_else(|| VoiceError::Codec(format!("worker {} input already used", worker.id)))?;
        let stdout = worker
            .stdout
            .take()
            .ok_or_else(|| VoiceError::Codec(format!("worker {} output already used", worker.id)))?;

        let feeder = tokio::spawn(async move {
            stdin.write_all(&pcm).await?;
            stdin.shutdown().await
        });
        Ok(AudioResource::from_reader(stdout).with_feeder(feeder))
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            debug!(worker_id = worker.id, "codec worker dropped without release; destroying");
            self.pool.forget();
            // kill_on_drop terminates the process.
            drop(worker);
        }
        self.pool.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded pool of codec workers.
#[derive(Clone)]
pub struct CodecPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for CodecPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecPool")
            .field("program", &self.inner.program)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CodecPool {
    /// Pool of `ffmpeg` workers configured by `config`.
    pub fn new(config: &CodecConfig) -> Self {
        Self::with_command(config, &config.ffmpeg_path, ffmpeg_args(config))
    }

    /// Pool running `program` with `args` as its worker process.
    pub fn with_command(config: &CodecConfig, program: &str, args: Vec<String>) -> Self {
        let (min, max) = config.bounds();
        Self {
            inner: Arc::new(PoolInner {
                program: program.to_string(),
                args,
                min,
                max,
                idle_timeout: config.idle_timeout(),
                acquire_timeout: config.acquire_timeout(),
                state: Mutex::new(PoolState::default()),
                slots: Arc::new(Semaphore::new(max)),
                next_id: AtomicU64::new(1),
                checked_out: AtomicUsize::new(0),
                peak_checked_out: AtomicUsize::new(0),
            }),
        }
    }

    /// Spawns the minimum number of idle workers.
    pub fn warm_up(&self) {
        self.inner.ensure_min();
        info!(
            program = %self.inner.program,
            min = self.inner.min,
            max = self.inner.max,
            "codec pool ready"
        );
    }

    /// Checks out a usable worker, waiting up to the acquire timeout for a
    /// free slot.
    ///
    /// Candidates that fail validation are destroyed and replaced, at most
    /// three times.
    pub async fn acquire(&self) -> Result<PooledWorker, VoiceError> {
        let timeout = self.inner.acquire_timeout;
        let permit = tokio::time::timeout(timeout, Arc::clone(&self.inner.slots).acquire_owned())
            .await
            .map_err(|_| VoiceError::Timeout {
                operation: "codec worker acquire",
                timeout_ms: timeout.as_millis() as u64,
            })?
            .map_err(|_| VoiceError::Codec("codec pool is shut down".into()))?;

        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let mut candidate = self.inner.take_or_spawn()?;
            if candidate.is_usable() {
                let now = self.inner.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
                self.inner.peak_checked_out.fetch_max(now, Ordering::SeqCst);
                trace!(worker_id = candidate.id, checked_out = now, "codec worker checked out");
                return Ok(PooledWorker {
                    worker: Some(candidate),
                    pool: Arc::clone(&self.inner),
                    _permit: permit,
                });
            }
            warn!(
                worker_id = candidate.id,
                attempt, "codec worker failed validation; destroying"
            );
            self.inner.forget();
            candidate.shutdown().await;
        }

        Err(VoiceError::Codec(format!(
            "no usable codec worker after {MAX_ACQUIRE_ATTEMPTS} attempts"
        )))
    }

    /// Returns a worker to the pool.
    ///
    /// A worker whose pipes were consumed or whose process exited is
    /// destroyed instead, and a warm replacement is spawned if the pool is
    /// below its minimum.
    pub async fn release(&self, mut lease: PooledWorker) {
        if let Some(mut worker) = lease.worker.take() {
            let reusable = worker.is_usable() && !self.inner.state().closed;
            if reusable {
                trace!(worker_id = worker.id, "codec worker returned to pool");
                self.inner.state().idle.push_back(IdleWorker {
                    worker,
                    since: Instant::now(),
                });
            } else {
                self.inner.forget();
                worker.shutdown().await;
            }
        }
        drop(lease);
        self.inner.ensure_min();
    }

    /// Destroys idle workers that exceeded the idle timeout or died, keeping
    /// the minimum warm. Returns the number destroyed.
    pub async fn evict_idle(&self) -> usize {
        let evicted: Vec<CodecWorker> = {
            let mut state = self.inner.state();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            let mut evicted = Vec::new();
            let total = state.idle.len();
            // Oldest first, so the freshest workers are the ones kept.
            for mut idle in state.idle.drain(..) {
                let remaining = total - evicted.len();
                let expired = idle.since.elapsed() >= self.inner.idle_timeout;
                if !idle.worker.is_usable() || (expired && remaining > self.inner.min) {
                    evicted.push(idle.worker);
                } else {
                    kept.push_back(idle);
                }
            }
            state.idle = kept;
            state.live = state.live.saturating_sub(evicted.len());
            evicted
        };

        let count = evicted.len();
        for worker in evicted {
            worker.shutdown().await;
        }
        if count > 0 {
            debug!(count, "evicted idle codec workers");
        }
        self.inner.ensure_min();
        count
    }

    /// Refuses new checkouts and destroys every idle worker.
    ///
    /// Workers still checked out are destroyed when released or dropped.
    pub async fn shutdown(&self) {
        self.inner.slots.close();
        let idle: Vec<IdleWorker> = {
            let mut state = self.inner.state();
            state.closed = true;
            let idle: Vec<IdleWorker> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(idle.len());
            idle
        };
        let count = idle.len();
        for entry in idle {
            entry.worker.shutdown().await;
        }
        info!(destroyed = count, "codec pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state();
        PoolStats {
            idle: state.idle.len(),
            live: state.live,
            checked_out: self.inner.checked_out.load(Ordering::SeqCst),
            peak_checked_out: self.inner.peak_checked_out.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ffmpeg_arguments() {
        let args = ffmpeg_args(&CodecConfig::default());
        let joined = args.join(" ");
        assert!(joined.starts_with("-loglevel error -nostats -f s16le -ar 44100 -ac 1 -i pipe:0"));
        assert!(joined.contains("aresample=48000,silenceremove=start_periods=1"));
        assert!(joined.contains("-c:a libopus -ar 48000 -b:a 96k -vbr on -application audio"));
        assert!(joined.ends_with("-f ogg pipe:1"));
    }

    #[tokio::test]
    async fn missing_binary_fails_without_leaking_slot() {
        let config = CodecConfig {
            max_workers: 1,
            acquire_timeout_ms: 200,
            ..CodecConfig::default()
        };
        let pool = CodecPool::with_command(&config, "/nonexistent/yomiage-codec", Vec::new());
        for _ in 0..3 {
            let err = pool.acquire().await.unwrap_err();
            assert!(matches!(err, VoiceError::Codec(_)), "unexpected error: {err}");
        }
        assert_eq!(pool.stats().checked_out, 0);
        assert_eq!(pool.stats().live, 0);
    }
}
