//! Mock synthesis engine shared by the integration tests.
#![allow(dead_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use yomiage_voice::transport::VoiceTransport;
use yomiage_voice::{
    CodecConfig, CodecPool, EngineConfig, PlaybackConfig, ReconnectConfig, RuntimeOptions,
    VoiceRuntime,
};

/// Behavior and call log of the mock engine.
#[derive(Clone, Default)]
pub struct MockEngine {
    pub query_calls: Arc<AtomicUsize>,
    pub synthesis_calls: Arc<AtomicUsize>,
    pub speaker_calls: Arc<AtomicUsize>,
    /// Texts received by `/audio_query`, in arrival order.
    pub texts: Arc<Mutex<Vec<String>>>,
    /// Bodies received by `/synthesis`.
    pub bodies: Arc<Mutex<Vec<Value>>>,
    /// `/audio_query` calls that stall before answering.
    pub stalled_queries: Arc<AtomicUsize>,
    /// Synthesis of this text answers 500.
    pub failing_text: Arc<Mutex<Option<String>>>,
    /// Synthesis of this text answers 422.
    pub unprocessable_text: Arc<Mutex<Option<String>>>,
    pub speakers_down: Arc<AtomicBool>,
}

/// Deterministic, never-silent PCM for `text`.
pub fn pcm_for(text: &str) -> Vec<u8> {
    text.as_bytes().iter().copied().cycle().take(400).collect()
}

pub const STALL: Duration = Duration::from_millis(500);

impl MockEngine {
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().unwrap().clone()
    }

    pub fn fail_on(&self, text: &str) {
        *self.failing_text.lock().unwrap() = Some(text.to_string());
    }

    pub fn reject_on(&self, text: &str) {
        *self.unprocessable_text.lock().unwrap() = Some(text.to_string());
    }
}

async fn audio_query(
    State(engine): State<MockEngine>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    engine.query_calls.fetch_add(1, Ordering::SeqCst);
    let stalled = engine
        .stalled_queries
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if stalled {
        tokio::time::sleep(STALL).await;
    }
    let text = params.get("text").cloned().unwrap_or_default();
    engine.texts.lock().unwrap().push(text.clone());
    Json(json!({
        "text": text,
        "speaker": params.get("speaker"),
        "accent_phrases": [],
        "speedScale": 1.0,
        "outputStereo": true,
    }))
}

async fn synthesis(State(engine): State<MockEngine>, Json(body): Json<Value>) -> Response {
    engine.synthesis_calls.fetch_add(1, Ordering::SeqCst);
    engine.bodies.lock().unwrap().push(body.clone());
    let text = body["text"].as_str().unwrap_or_default().to_string();

    if engine.failing_text.lock().unwrap().as_deref() == Some(text.as_str()) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "synthesis failed").into_response();
    }
    if engine.unprocessable_text.lock().unwrap().as_deref() == Some(text.as_str()) {
        return (StatusCode::UNPROCESSABLE_ENTITY, "nothing to say").into_response();
    }
    (StatusCode::OK, pcm_for(&text)).into_response()
}

async fn speakers(State(engine): State<MockEngine>) -> Response {
    engine.speaker_calls.fetch_add(1, Ordering::SeqCst);
    if engine.speakers_down.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    Json(json!([
        {
            "name": "Mock",
            "speaker_uuid": "0000",
            "styles": [
                { "name": "plain", "id": 1, "type": "talk" },
                { "name": "bright", "id": 2, "type": "talk" }
            ]
        }
    ]))
    .into_response()
}

/// Serves `engine` on an ephemeral port and returns its base URL.
pub async fn spawn_engine(engine: MockEngine) -> String {
    let app = Router::new()
        .route("/audio_query", post(audio_query))
        .route("/synthesis", post(synthesis))
        .route("/speakers", get(speakers))
        .with_state(engine);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Engine settings with short timeouts for tests.
pub fn fast_engine_config(base_url: &str) -> EngineConfig {
    EngineConfig {
        base_url: base_url.to_string(),
        query_timeout_ms: 200,
        synthesis_timeout_ms: 200,
        max_retries: 2,
        retry_delay_ms: 10,
        health_check_interval_ms: 50,
    }
}

/// Reconnection timings short enough for tests.
pub fn fast_reconnect_config() -> ReconnectConfig {
    ReconnectConfig {
        ready_timeout_ms: 200,
        retry_ready_timeout_ms: 200,
        settle_delay_ms: 10,
        retry_delay_ms: 10,
        inter_group_delay_ms: 10,
        pass_interval_ms: 0,
        ..ReconnectConfig::default()
    }
}

/// Full runtime against the mock engine, with `cat` standing in for the
/// encoder.
pub fn runtime(base_url: &str, data_dir: &Path, transport: Arc<dyn VoiceTransport>) -> VoiceRuntime {
    let options = RuntimeOptions {
        engine: fast_engine_config(base_url),
        playback: PlaybackConfig {
            start_timeout_ms: 2_000,
            finish_timeout_ms: 5_000,
        },
        reconnect: fast_reconnect_config(),
        data_dir: data_dir.to_path_buf(),
    };
    let codec = CodecPool::with_command(&CodecConfig::default(), "cat", Vec::new());
    VoiceRuntime::new(options, transport, codec).unwrap()
}

/// Polls `check` every 10ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
