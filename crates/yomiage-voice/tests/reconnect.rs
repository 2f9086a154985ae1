//! Session restoration, loss detection and channel state persistence.
#![cfg(unix)]

mod common;

use async_trait::async_trait;
use common::{eventually, runtime, spawn_engine, MockEngine};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use yomiage_types::{ChannelTarget, SessionState};
use yomiage_voice::runtime::CHANNEL_STATE_FILE;
use yomiage_voice::transport::LiveSession;
use yomiage_voice::{
    ChannelStateStore, LoopbackTransport, PlaybackState, ReconnectConfig, ReconnectSummary,
    VoiceError, VoiceTransport,
};

/// Refuses every connection to the listed groups.
#[derive(Debug)]
struct FlakyTransport {
    inner: Arc<LoopbackTransport>,
    refused: HashSet<String>,
}

#[async_trait]
impl VoiceTransport for FlakyTransport {
    async fn connect(
        &self,
        group_id: &str,
        target: &ChannelTarget,
    ) -> Result<Arc<dyn LiveSession>, VoiceError> {
        if self.refused.contains(group_id) {
            return Err(VoiceError::Transport(format!("{group_id} unreachable")));
        }
        self.inner.connect(group_id, target).await
    }
}

/// Adds latency to every connect and keeps every session it opened.
#[derive(Debug, Default)]
struct SlowTransport {
    inner: LoopbackTransport,
    opened: Mutex<Vec<Arc<dyn LiveSession>>>,
}

impl SlowTransport {
    fn ready_count(&self) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|session| session.state() == SessionState::Ready)
            .count()
    }
}

#[async_trait]
impl VoiceTransport for SlowTransport {
    async fn connect(
        &self,
        group_id: &str,
        target: &ChannelTarget,
    ) -> Result<Arc<dyn LiveSession>, VoiceError> {
        tokio::time::sleep(Duration::from_millis(30)).await;
        let session = self.inner.connect(group_id, target).await?;
        self.opened.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

#[tokio::test]
async fn restore_reconnects_saved_groups_and_rewrites_state() {
    let engine = MockEngine::default();
    let url = spawn_engine(engine.clone()).await;
    let dir = tempfile::tempdir().unwrap();
    let store = ChannelStateStore::new(dir.path().join(CHANNEL_STATE_FILE));
    let saved: BTreeMap<String, ChannelTarget> = [
        ("good".to_string(), ChannelTarget::new("vc-1")),
        ("gone".to_string(), ChannelTarget::new("vc-2")),
    ]
    .into_iter()
    .collect();
    store.save(&saved).unwrap();

    let loopback = Arc::new(LoopbackTransport::new());
    let transport = Arc::new(FlakyTransport {
        inner: Arc::clone(&loopback),
        refused: HashSet::from(["gone".to_string()]),
    });
    let rt = runtime(&url, dir.path(), transport);

    let summary = rt.connections.restore_from_saved_state().await;
    assert_eq!(
        summary,
        ReconnectSummary {
            total: 2,
            reconnected: 1,
            failed: 1
        }
    );
    assert!(rt.sessions.is_ready("good"));
    assert!(rt.sessions.get("gone").is_none());

    let rewritten = store.load();
    assert_eq!(rewritten.len(), 1);
    assert_eq!(rewritten["good"].channel_id, "vc-1");

    // The restored group hears the announcement.
    let announcement = ReconnectConfig::default().announcement;
    assert!(
        eventually(Duration::from_secs(5), || engine.texts().contains(&announcement)).await
    );
    let session = loopback.session("good").unwrap();
    assert!(eventually(Duration::from_secs(5), || session.delivered_bytes() > 0).await);
}

#[tokio::test]
async fn nothing_saved_means_nothing_to_restore() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&url, dir.path(), Arc::new(LoopbackTransport::new()));
    assert_eq!(
        rt.connections.restore_from_saved_state().await,
        ReconnectSummary::default()
    );
}

#[tokio::test]
async fn stalled_handshake_is_retried_once() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(LoopbackTransport::new());
    let rt = runtime(&url, dir.path(), transport.clone());

    transport.stall_next(1);
    rt.connections
        .join("g", ChannelTarget::new("vc"))
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 2);
    assert!(rt.sessions.is_ready("g"));

    // Two stalls exhaust the retry.
    transport.stall_next(2);
    let err = rt
        .connections
        .join("h", ChannelTarget::new("vc"))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::Timeout { .. }), "unexpected: {err}");
    assert!(rt.sessions.get("h").is_none());
    assert_eq!(
        transport.session("h").unwrap().state(),
        SessionState::Destroyed
    );
}

#[tokio::test]
async fn rejoin_destroys_the_previous_session() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(LoopbackTransport::new());
    let rt = runtime(&url, dir.path(), transport.clone());

    rt.connections
        .join("g", ChannelTarget::new("vc-1"))
        .await
        .unwrap();
    let first = transport.session("g").unwrap();
    rt.connections
        .join("g", ChannelTarget::new("vc-2"))
        .await
        .unwrap();

    assert_eq!(first.state(), SessionState::Destroyed);
    assert_eq!(rt.sessions.len(), 1);
    assert_eq!(rt.sessions.get("g").unwrap().target().channel_id, "vc-2");
    let store = ChannelStateStore::new(dir.path().join(CHANNEL_STATE_FILE));
    assert_eq!(store.load()["g"].channel_id, "vc-2");
}

#[tokio::test]
async fn concurrent_joins_leave_one_live_session() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(SlowTransport::default());
    let rt = runtime(&url, dir.path(), transport.clone());

    let (first, second) = tokio::join!(
        rt.connections.join("g", ChannelTarget::new("vc-1")),
        rt.connections.join("g", ChannelTarget::new("vc-2")),
    );
    first.unwrap();
    second.unwrap();

    assert_eq!(transport.opened.lock().unwrap().len(), 2);
    assert_eq!(transport.ready_count(), 1);
    assert_eq!(rt.sessions.len(), 1);
    assert!(rt.sessions.is_ready("g"));
}

#[tokio::test]
async fn join_during_reconnect_pass_leaves_one_live_session() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(SlowTransport::default());
    let rt = runtime(&url, dir.path(), transport.clone());

    rt.connections
        .join("g", ChannelTarget::new("vc"))
        .await
        .unwrap();
    rt.sessions
        .get("g")
        .unwrap()
        .destroy()
        .await;
    assert!(eventually(Duration::from_secs(2), || rt.sessions.get("g").is_none()).await);

    let (summary, joined) = tokio::join!(
        rt.connections.reconnect_lost(),
        rt.connections.join("g", ChannelTarget::new("vc")),
    );
    joined.unwrap();
    assert_eq!(summary.failed, 0);
    assert_eq!(transport.ready_count(), 1);
    assert_eq!(rt.sessions.len(), 1);
}

#[tokio::test]
async fn lost_session_is_cleaned_up_and_reconnected() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(LoopbackTransport::new());
    let rt = runtime(&url, dir.path(), transport.clone());

    rt.connections
        .join("g", ChannelTarget::new("vc"))
        .await
        .unwrap();
    assert_eq!(rt.playback.state("g"), PlaybackState::PipelineCreated);

    transport
        .session("g")
        .unwrap()
        .set_state(SessionState::Disconnected);
    assert!(eventually(Duration::from_secs(2), || rt.sessions.get("g").is_none()).await);
    assert_eq!(rt.playback.state("g"), PlaybackState::NoPipeline);

    let summary = rt.connections.reconnect_lost().await;
    assert_eq!(summary.reconnected, 1);
    assert!(rt.sessions.is_ready("g"));

    // Nothing left to do on the next pass.
    assert_eq!(rt.connections.reconnect_lost().await.total, 0);
}

#[tokio::test]
async fn leave_forgets_the_group() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(LoopbackTransport::new());
    let rt = runtime(&url, dir.path(), transport.clone());

    rt.connections
        .join("g", ChannelTarget::new("vc"))
        .await
        .unwrap();
    assert!(rt.connections.leave("g").await);
    assert!(!rt.connections.leave("g").await);

    assert_eq!(
        transport.session("g").unwrap().state(),
        SessionState::Destroyed
    );
    let store = ChannelStateStore::new(dir.path().join(CHANNEL_STATE_FILE));
    assert!(store.load().is_empty());
    assert_eq!(rt.connections.reconnect_lost().await.total, 0);
}

#[tokio::test]
async fn join_rejects_blank_ids() {
    let url = spawn_engine(MockEngine::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let rt = runtime(&url, dir.path(), Arc::new(LoopbackTransport::new()));

    let err = rt
        .connections
        .join(" ", ChannelTarget::new("vc"))
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::InvalidRequest(_)));
}
