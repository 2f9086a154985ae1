//! yomiage server binary.
//!
//! Loads configuration, assembles the speech pipeline, restores the live
//! sessions saved before the last shutdown and serves the inbound HTTP
//! surface until SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use yomiage_server::{app, background, config, AppState};
use yomiage_voice::{CodecPool, LoopbackTransport, RuntimeOptions, VoiceRuntime};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("YOMIAGE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    std::fs::create_dir_all(&config.storage.data_dir)
        .expect("failed to create data directory; check storage.data_dir in config");

    // Assemble the pipeline
    let codec = CodecPool::new(&config.codec);
    codec.warm_up();
    let options = RuntimeOptions {
        engine: config.engine.clone(),
        playback: config.playback.clone(),
        reconnect: config.reconnect.clone(),
        data_dir: config.storage.data_dir.clone(),
    };
    // No platform transport is wired in; sessions stay in-process.
    let transport = Arc::new(LoopbackTransport::new());
    let runtime = VoiceRuntime::new(options, transport, codec)
        .expect("failed to build the synthesis client");

    let source = runtime.catalog.refresh(&runtime.client).await;
    tracing::info!(?source, "speaker catalog ready");

    let state = AppState {
        runtime: runtime.clone(),
    };
    let shared = Arc::new(state.clone());

    // Restore saved sessions without delaying the listener.
    {
        let connections = Arc::clone(&runtime.connections);
        tokio::spawn(async move {
            let summary = connections.restore_from_saved_state().await;
            if summary.total > 0 {
                tracing::info!(
                    reconnected = summary.reconnected,
                    failed = summary.failed,
                    "startup restoration finished"
                );
            }
        });
    }

    // Background tasks
    tokio::spawn(background::start_codec_eviction_task(
        Arc::clone(&shared),
        config.codec.idle_timeout(),
    ));
    tokio::spawn(background::start_engine_probe_task(
        Arc::clone(&shared),
        config.engine.health_check_interval(),
    ));
    tokio::spawn(background::start_reconnect_task(
        Arc::clone(&shared),
        Duration::from_millis(config.reconnect.pass_interval_ms),
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, engine = %config.engine.base_url, "starting yomiage server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    runtime.shutdown().await;
    tracing::info!("yomiage server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
