//! Per-group priority queue of utterances with a single drain loop per group.
//!
//! Items are ordered by priority, ties by arrival. Each group has at most one
//! drain loop: the check that no loop is running and the flag marking one as
//! started happen under the same lock, and the loop clears the flag under
//! that lock when it finds the queue empty. Failures of one item are logged
//! and never stop the loop.

use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use yomiage_types::QueueItem;

/// Where the drain loop sends each item.
#[async_trait]
pub trait UtteranceSink: Send + Sync {
    /// Whether the group currently has a ready live session. Items dequeued
    /// while this is `false` are dropped.
    fn can_play(&self, group_id: &str) -> bool;

    /// Synthesizes and plays one item to completion.
    async fn speak(&self, item: &QueueItem) -> Result<(), VoiceError>;
}

/// Snapshot of one group's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    pub processing: bool,
}

#[derive(Debug, Default)]
struct GroupQueue {
    items: VecDeque<QueueItem>,
    processing: bool,
}

struct QueueInner {
    groups: Mutex<HashMap<String, GroupQueue>>,
    sink: Arc<dyn UtteranceSink>,
}

impl QueueInner {
    fn groups(&self) -> MutexGuard<'_, HashMap<String, GroupQueue>> {
        self.groups.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pops the next item, or marks the loop finished if there is none.
    fn next_item(&self, group_id: &str) -> Option<QueueItem> {
        let mut groups = self.groups();
        let queue = groups.get_mut(group_id)?;
        match queue.items.pop_front() {
            Some(item) => Some(item),
            None => {
                queue.processing = false;
                groups.remove(group_id);
                None
            }
        }
    }
}

/// Clears the processing flag if the drain task ends abnormally, so the next
/// enqueue can start a new loop.
struct DrainGuard {
    inner: Arc<QueueInner>,
    group_id: String,
    finished: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!(group_id = %self.group_id, "drain loop ended abnormally");
            if let Some(queue) = self.inner.groups().get_mut(&self.group_id) {
                queue.processing = false;
            }
        }
    }
}

async fn drain(inner: Arc<QueueInner>, group_id: String) {
    let mut guard = DrainGuard {
        inner: Arc::clone(&inner),
        group_id: group_id.clone(),
        finished: false,
    };
    debug!(%group_id, "drain loop started");

    while let Some(item) = inner.next_item(&group_id) {
        if !inner.sink.can_play(&group_id) {
            debug!(%group_id, "no ready live session; dropping queued item");
            continue;
        }
        if let Err(e) = inner.sink.speak(&item).await {
            warn!(%group_id, error = %e, "failed to speak queued item");
        }
    }

    guard.finished = true;
    debug!(%group_id, "drain loop finished");
}

fn insert_by_priority(items: &mut VecDeque<QueueItem>, item: QueueItem) {
    let position = items
        .iter()
        .position(|queued| queued.priority > item.priority)
        .unwrap_or(items.len());
    items.insert(position, item);
}

/// Priority queue of utterances, one per group.
#[derive(Clone)]
pub struct SpeechQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for SpeechQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechQueue")
            .field("groups", &self.inner.groups().len())
            .finish()
    }
}

impl SpeechQueue {
    pub fn new(sink: Arc<dyn UtteranceSink>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                groups: Mutex::new(HashMap::new()),
                sink,
            }),
        }
    }

    /// Queues `item` and starts the group's drain loop if none is running.
    ///
    /// Returns the queue length after insertion.
    pub fn enqueue(&self, item: QueueItem) -> Result<usize, VoiceError> {
        if item.group_id.trim().is_empty() {
            return Err(VoiceError::InvalidRequest("group id is empty".into()));
        }
        if item.text.trim().is_empty() {
            return Err(VoiceError::InvalidRequest("text is empty".into()));
        }

        let group_id = item.group_id.clone();
        let priority = item.priority;
        let (length, start) = {
            let mut groups = self.inner.groups();
            let queue = groups.entry(group_id.clone()).or_default();
            insert_by_priority(&mut queue.items, item);
            let start = !queue.processing;
            queue.processing = true;
            (queue.items.len(), start)
        };

        debug!(%group_id, priority = priority.label(), length, "utterance queued");
        if start {
            self.spawn_drain(group_id);
        }
        Ok(length)
    }

    /// Starts the drain loop for `group_id` unless one is already running.
    ///
    /// Returns `true` if a new loop was started.
    pub fn start_drain(&self, group_id: &str) -> bool {
        let start = {
            let mut groups = self.inner.groups();
            match groups.get_mut(group_id) {
                Some(queue) if !queue.processing && !queue.items.is_empty() => {
                    queue.processing = true;
                    true
                }
                _ => false,
            }
        };
        if start {
            self.spawn_drain(group_id.to_string());
        }
        start
    }

    fn spawn_drain(&self, group_id: String) {
        tokio::spawn(drain(Arc::clone(&self.inner), group_id));
    }

    /// Drops every pending item of `group_id`. Returns how many were removed.
    ///
    /// An item already being spoken is not interrupted.
    pub fn clear(&self, group_id: &str) -> usize {
        let removed = self
            .inner
            .groups()
            .get_mut(group_id)
            .map(|queue| std::mem::take(&mut queue.items).len())
            .unwrap_or(0);
        if removed > 0 {
            info!(group_id, removed, "speech queue cleared");
        }
        removed
    }

    pub fn status(&self, group_id: &str) -> QueueStatus {
        self.inner
            .groups()
            .get(group_id)
            .map(|queue| QueueStatus {
                length: queue.items.len(),
                processing: queue.processing,
            })
            .unwrap_or(QueueStatus {
                length: 0,
                processing: false,
            })
    }
}
