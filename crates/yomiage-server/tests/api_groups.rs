use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt; // for oneshot
use yomiage_server::{app, AppState};
use yomiage_voice::{
    CodecConfig, CodecPool, EngineConfig, LoopbackTransport, RuntimeOptions, VoiceRuntime,
};

fn setup(data_dir: &std::path::Path) -> (Router, VoiceRuntime) {
    let options = RuntimeOptions {
        // Nothing listens here; these tests never reach the engine.
        engine: EngineConfig::new("http://127.0.0.1:9"),
        data_dir: data_dir.to_path_buf(),
        ..RuntimeOptions::default()
    };
    let codec = CodecPool::with_command(&CodecConfig::default(), "cat", Vec::new());
    let runtime =
        VoiceRuntime::new(options, Arc::new(LoopbackTransport::new()), codec).unwrap();
    let router = app(AppState {
        runtime: runtime.clone(),
    });
    (router, runtime)
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_reports_engine_and_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = setup(dir.path());

    let (status, json) = send(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["engine"], "available");
    assert_eq!(json["sessions"], 0);
}

#[tokio::test]
async fn speak_enqueues_with_configured_speaker() {
    let dir = tempfile::tempdir().unwrap();
    let (router, runtime) = setup(dir.path());

    let (status, _) = send(
        &router,
        "PUT",
        "/api/profiles/user-1",
        Some(json!({ "speakerId": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        &router,
        "POST",
        "/api/groups/g/speak",
        Some(json!({ "text": "こんにちは", "userId": "user-1", "tier": "pro" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["queueLength"], 1);
    assert_eq!(json["speakerId"], 3);
    assert_eq!(runtime.pipeline.limits("g").max_text_length, 400);

    let (status, json) = send(
        &router,
        "POST",
        "/api/groups/g/speak",
        Some(json!({ "text": "やあ" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["speakerId"], 888_753_760);
}

#[tokio::test]
async fn blank_text_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = setup(dir.path());

    let (status, json) = send(
        &router,
        "POST",
        "/api/groups/g/speak",
        Some(json!({ "text": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("text"));
}

#[tokio::test]
async fn queue_can_be_inspected_and_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = setup(dir.path());

    let (status, json) = send(&router, "GET", "/api/groups/quiet/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "length": 0, "processing": false }));

    let (status, json) = send(&router, "DELETE", "/api/groups/quiet/queue", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cleared"], 0);
}

#[tokio::test]
async fn join_and_leave_voice() {
    let dir = tempfile::tempdir().unwrap();
    let (router, runtime) = setup(dir.path());

    let (status, json) = send(
        &router,
        "POST",
        "/api/groups/g/voice/join",
        Some(json!({ "channelId": "vc-1", "textChannelId": "tc-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "ready");
    assert!(runtime.sessions.is_ready("g"));

    let saved = std::fs::read_to_string(dir.path().join("voice_state.json")).unwrap();
    let saved: Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["g"], json!({ "channelId": "vc-1", "textChannelId": "tc-1" }));

    let (_, health) = send(&router, "GET", "/health", None).await;
    assert_eq!(health["sessions"], 1);

    let (status, json) = send(&router, "POST", "/api/groups/g/voice/leave", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["left"], true);

    let (_, json) = send(&router, "POST", "/api/groups/g/voice/leave", None).await;
    assert_eq!(json["left"], false);
}

#[tokio::test]
async fn join_without_channel_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = setup(dir.path());

    let (status, _) = send(
        &router,
        "POST",
        "/api/groups/g/voice/join",
        Some(json!({ "channelId": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_updates_are_clamped_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = setup(dir.path());

    let (status, json) = send(
        &router,
        "PUT",
        "/api/profiles/g",
        Some(json!({ "speed": 9.0, "pitch": 0.1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["speed"], 2.0);
    assert_eq!(json["volume"], 1.0);
    assert!(dir.path().join("voice_settings.json").exists());
}

#[tokio::test]
async fn speakers_fall_back_to_builtin_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let (router, _) = setup(dir.path());

    let (status, json) = send(&router, "GET", "/api/speakers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["source"], "built_in");
    assert_eq!(json["speakers"][0]["styleId"], 888_753_760);
    assert_eq!(json["speakers"][0]["speakerName"], "Anneli");
}
