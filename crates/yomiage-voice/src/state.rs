use crate::error::VoiceError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use yomiage_types::ChannelTarget;

/// Group id to channel target, as saved across restarts.
pub type ChannelState = BTreeMap<String, ChannelTarget>;

/// Writes `value` as pretty JSON to `path` via a temp file and rename.
///
/// Readers never observe a partially written file.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), VoiceError> {
    let json = serde_json::to_vec_pretty(value)?;
    write_bytes_atomic(path, &json)
}

/// Replaces the contents of `path` with `bytes` via a temp file and rename.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), VoiceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Persisted map of which channel each group's live session was joined to.
#[derive(Debug, Clone)]
pub struct ChannelStateStore {
    path: PathBuf,
}

impl ChannelStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the saved state. A missing or malformed file yields an empty map.
    pub fn load(&self) -> ChannelState {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved channel state");
                return ChannelState::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read channel state");
                return ChannelState::new();
            }
        };
        match serde_json::from_str(&contents) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "channel state file is malformed; ignoring it");
                ChannelState::new()
            }
        }
    }

    pub fn save(&self, state: &ChannelState) -> Result<(), VoiceError> {
        write_json_atomic(&self.path, state)?;
        debug!(path = %self.path.display(), groups = state.len(), "channel state saved");
        Ok(())
    }
}
