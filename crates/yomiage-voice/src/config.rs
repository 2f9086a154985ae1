use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_engine_url() -> String {
    "http://127.0.0.1:10101".to_string()
}

fn default_query_timeout_ms() -> u64 {
    15_000
}

fn default_synthesis_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_health_check_interval_ms() -> u64 {
    5_000
}

/// Connection settings for the external synthesis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the engine, without a trailing slash.
    #[serde(default = "default_engine_url")]
    pub base_url: String,
    /// Timeout for one `/audio_query` request.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Timeout for one `/synthesis` request, body included.
    #[serde(default = "default_synthesis_timeout_ms")]
    pub synthesis_timeout_ms: u64,
    /// Extra attempts after a transport failure or timeout.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// How often an unavailable engine is probed for recovery.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_engine_url(),
            query_timeout_ms: default_query_timeout_ms(),
            synthesis_timeout_ms: default_synthesis_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

impl EngineConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Joins `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_worker_idle_timeout_ms() -> u64 {
    15_000
}

fn default_acquire_timeout_ms() -> u64 {
    10_000
}

fn default_input_sample_rate() -> u32 {
    44_100
}

fn default_output_sample_rate() -> u32 {
    48_000
}

fn default_bitrate_kbps() -> u32 {
    96
}

/// Transcoding worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    /// Path to the `ffmpeg` binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Workers kept warm while idle.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    /// Upper bound on live workers. Capped at 4.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Idle workers older than this are evicted.
    #[serde(default = "default_worker_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// How long `acquire` waits for a free slot.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Sample rate of the PCM written to a worker.
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,
    /// Sample rate of the encoded stream.
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
    /// Opus bitrate in kbit/s.
    #[serde(default = "default_bitrate_kbps")]
    pub bitrate_kbps: u32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            idle_timeout_ms: default_worker_idle_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            input_sample_rate: default_input_sample_rate(),
            output_sample_rate: default_output_sample_rate(),
            bitrate_kbps: default_bitrate_kbps(),
        }
    }
}

impl CodecConfig {
    /// Hard cap on concurrently live workers.
    pub const MAX_WORKERS: usize = 4;

    /// Returns `(min, max)` normalized to `1 <= max <= 4` and `min <= max`.
    pub fn bounds(&self) -> (usize, usize) {
        let max = self.max_workers.clamp(1, Self::MAX_WORKERS);
        (self.min_workers.min(max), max)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn default_start_timeout_ms() -> u64 {
    5_000
}

fn default_finish_timeout_ms() -> u64 {
    60_000
}

/// Timeouts for one playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Wait for the player to start.
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    /// Wait for the player to return to idle once started.
    #[serde(default = "default_finish_timeout_ms")]
    pub finish_timeout_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: default_start_timeout_ms(),
            finish_timeout_ms: default_finish_timeout_ms(),
        }
    }
}

impl PlaybackConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn finish_timeout(&self) -> Duration {
        Duration::from_millis(self.finish_timeout_ms)
    }
}

fn default_ready_timeout_ms() -> u64 {
    10_000
}

fn default_retry_ready_timeout_ms() -> u64 {
    20_000
}

fn default_settle_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_retry_delay_ms() -> u64 {
    3_000
}

fn default_inter_group_delay_ms() -> u64 {
    250
}

fn default_reconnect_pass_interval_ms() -> u64 {
    60_000
}

fn default_announcement() -> String {
    "再起動後の再接続が完了しました".to_string()
}

/// Live session establishment and restoration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Ready wait on the first connection attempt.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Ready wait on the single retry.
    #[serde(default = "default_retry_ready_timeout_ms")]
    pub retry_ready_timeout_ms: u64,
    /// Pause after destroying a stale session.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Pause before the retry.
    #[serde(default = "default_reconnect_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pause between groups in a reconnection batch.
    #[serde(default = "default_inter_group_delay_ms")]
    pub inter_group_delay_ms: u64,
    /// Interval of the background pass that restores lost sessions. 0 disables it.
    #[serde(default = "default_reconnect_pass_interval_ms")]
    pub pass_interval_ms: u64,
    /// Spoken after a session is restored.
    #[serde(default = "default_announcement")]
    pub announcement: String,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            retry_ready_timeout_ms: default_retry_ready_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            retry_delay_ms: default_reconnect_retry_delay_ms(),
            inter_group_delay_ms: default_inter_group_delay_ms(),
            pass_interval_ms: default_reconnect_pass_interval_ms(),
            announcement: default_announcement(),
        }
    }
}

impl ReconnectConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn retry_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_ready_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn inter_group_delay(&self) -> Duration {
        Duration::from_millis(self.inter_group_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.base_url, "http://127.0.0.1:10101");
        assert_eq!(c.query_timeout(), Duration::from_secs(15));
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let c = EngineConfig::new("http://engine:10101/");
        assert_eq!(c.endpoint("audio_query"), "http://engine:10101/audio_query");
    }

    #[test]
    fn codec_bounds_are_capped() {
        let c = CodecConfig {
            min_workers: 9,
            max_workers: 12,
            ..CodecConfig::default()
        };
        assert_eq!(c.bounds(), (4, 4));

        let c = CodecConfig {
            min_workers: 0,
            max_workers: 0,
            ..CodecConfig::default()
        };
        assert_eq!(c.bounds(), (0, 1));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let c: ReconnectConfig = toml::from_str("ready_timeout_ms = 500").unwrap();
        assert_eq!(c.ready_timeout(), Duration::from_millis(500));
        assert_eq!(c.retry_ready_timeout(), Duration::from_secs(20));
        assert_eq!(c.announcement, "再起動後の再接続が完了しました");
    }
}
