use crate::error::VoiceError;
use crate::state::write_bytes_atomic;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{debug, warn};
use yomiage_types::voice::{VoiceProfile, VoiceProfilePatch, DEFAULT_SPEAKER_ID};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProfileFile {
    #[serde(default)]
    profiles: HashMap<String, VoiceProfile>,
    #[serde(default)]
    speakers: HashMap<String, u32>,
}

/// Per-user and per-group voice profiles and default speakers.
///
/// Ids are opaque: a user id and a group id share one namespace, matching
/// how the inbound surface addresses them. Writes are persisted to a JSON
/// file when the store was opened with a path.
#[derive(Debug, Default)]
pub struct VoiceProfileStore {
    inner: RwLock<ProfileFile>,
    path: Option<PathBuf>,
    /// Orders file writes so the last snapshot taken is the last written.
    writes: Mutex<()>,
}

impl VoiceProfileStore {
    /// Creates an empty, unpersisted store.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store backed by `path`.
    ///
    /// A missing file yields an empty store. A malformed file is logged and
    /// also yields an empty store; it is overwritten on the next update.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<ProfileFile>(&contents) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "voice profile file is malformed; starting empty");
                    ProfileFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProfileFile::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read voice profile file; starting empty");
                ProfileFile::default()
            }
        };
        debug!(
            profiles = file.profiles.len(),
            speakers = file.speakers.len(),
            "voice profiles loaded"
        );
        Self {
            inner: RwLock::new(file),
            path: Some(path),
            writes: Mutex::new(()),
        }
    }

    pub async fn get(&self, target_id: &str) -> Option<VoiceProfile> {
        self.inner.read().await.profiles.get(target_id).copied()
    }

    /// Profile used to synthesize speech for `user_id` in `group_id`.
    ///
    /// A user profile wins over the group profile; with neither, the neutral
    /// default is used.
    pub async fn resolve(&self, group_id: &str, user_id: Option<&str>) -> VoiceProfile {
        let inner = self.inner.read().await;
        user_id
            .and_then(|id| inner.profiles.get(id))
            .or_else(|| inner.profiles.get(group_id))
            .copied()
            .unwrap_or_default()
    }

    /// Default speaker for `user_id` in `group_id`, falling back to the
    /// group's and then to [`DEFAULT_SPEAKER_ID`].
    pub async fn speaker_for(&self, group_id: &str, user_id: Option<&str>) -> u32 {
        let inner = self.inner.read().await;
        user_id
            .and_then(|id| inner.speakers.get(id))
            .or_else(|| inner.speakers.get(group_id))
            .copied()
            .unwrap_or(DEFAULT_SPEAKER_ID)
    }

    /// Applies `patch` to the profile of `target_id` and persists the store.
    ///
    /// Values are clamped into range. Returns the resulting profile.
    pub async fn update(
        &self,
        target_id: &str,
        patch: &VoiceProfilePatch,
    ) -> Result<VoiceProfile, VoiceError> {
        if target_id.trim().is_empty() {
            return Err(VoiceError::InvalidRequest("target id is empty".into()));
        }
        let mut inner = self.inner.write().await;
        let current = inner.profiles.get(target_id).copied().unwrap_or_default();
        let updated = current.apply(patch);
        // A speaker-only patch must not create an override that hides the
        // group profile.
        if patch.has_voice_fields() {
            inner.profiles.insert(target_id.to_string(), updated);
        }
        if let Some(speaker_id) = patch.speaker_id {
            inner.speakers.insert(target_id.to_string(), speaker_id);
        }
        self.persist(inner).await?;
        Ok(updated)
    }

    /// Removes the profile and speaker of `target_id`. Returns `true` if
    /// anything was removed.
    pub async fn remove(&self, target_id: &str) -> Result<bool, VoiceError> {
        let mut inner = self.inner.write().await;
        let removed = inner.profiles.remove(target_id).is_some()
            | inner.speakers.remove(target_id).is_some();
        if removed {
            self.persist(inner).await?;
        }
        Ok(removed)
    }

    /// Snapshots the store, releases the lock, then writes the file on the
    /// blocking pool.
    async fn persist(&self, inner: RwLockWriteGuard<'_, ProfileFile>) -> Result<(), VoiceError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&*inner)?;
        let _turn = self.writes.lock().await;
        drop(inner);
        tokio::task::spawn_blocking(move || write_bytes_atomic(&path, &json))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}
