//! # Voice Bridge - Main Application Entry Point
//!
//! Real-time translation bridge for two-party voice calls. Each participant
//! connects over a WebSocket, speaks in their own language and hears the other
//! participant translated into it.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, `config.toml`, environment)
//! - **state**: Shared state handed to every handler and socket actor
//! - **websocket**: Per-participant actor on `/ws/call/{room_id}/{user_id}`
//! - **call**: Session protocol (handshake, control messages, audio → utterances)
//! - **room**: Room registry and participant sessions
//! - **audio**: Transcoding, buffering and voice-activity detection
//! - **engines**: Recognition, translation and synthesis adapters
//! - **pipeline**: Recognition → translation → synthesis orchestration
//! - **delivery**: Peer-only routing of finished results
//! - **health** / **metrics** / **middleware**: Observability
//! - **handlers**: REST endpoints (configuration, single-shot translation)
//! - **error**: HTTP and domain error types

mod audio;
mod call;
mod config;
mod delivery;
mod engines;
mod error;
mod handlers;
mod health;
mod metrics;
mod middleware;
mod pipeline;
mod protocol;
mod room;
mod state;
mod transport;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use engines::Engines;
use state::AppState;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Startup sequence:
/// 1. **Load configuration** and reject nonsense values
/// 2. **Create engines** once; they are shared by every session
/// 3. **Warm up** the configured translation pairs
/// 4. **Serve** until the server exits or a shutdown signal arrives
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        languages = ?config.supported_languages(),
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );

    let engines = Engines::from_config(&config.engines);
    let app_state = AppState::new(config.clone(), engines);

    let pairs = config.warmup_pairs();
    let ready = app_state
        .orchestrator
        .warm_up(&pairs, config.engines.install_missing_pairs)
        .await;
    info!(ready, requested = pairs.len(), "Translation pairs warmed up");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers(["X-Source-Text", "X-Translated-Text"])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/translate", web::post().to(handlers::translate_audio)),
            )
            .route(
                "/ws/call/{room_id}/{user_id}",
                web::get().to(websocket::call_websocket),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise `voice_bridge=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}
