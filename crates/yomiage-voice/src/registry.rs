use crate::transport::LiveSession;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use yomiage_types::SessionState;

/// Live session of each group.
///
/// Readers are the speech queue and the playback manager. Only the
/// connection manager inserts or removes entries. The lock is never held
/// across an await point.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<dyn LiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<dyn LiveSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(group_id)
            .cloned()
    }

    /// The group's session, only if it is ready for audio.
    pub fn ready(&self, group_id: &str) -> Option<Arc<dyn LiveSession>> {
        self.get(group_id)
            .filter(|session| session.state() == SessionState::Ready)
    }

    pub fn is_ready(&self, group_id: &str) -> bool {
        self.ready(group_id).is_some()
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers `session`, returning the one it replaced.
    pub(crate) fn insert(
        &self,
        group_id: &str,
        session: Arc<dyn LiveSession>,
    ) -> Option<Arc<dyn LiveSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group_id.to_string(), session)
    }

    pub(crate) fn remove(&self, group_id: &str) -> Option<Arc<dyn LiveSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(group_id)
    }

    /// Removes the entry for `group_id` only if it is still `session`.
    ///
    /// A watcher for a replaced session must not evict its successor.
    pub(crate) fn remove_if_current(&self, group_id: &str, session: &Arc<dyn LiveSession>) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        match sessions.get(group_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(group_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn drain(&self) -> Vec<(String, Arc<dyn LiveSession>)> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect()
    }
}
