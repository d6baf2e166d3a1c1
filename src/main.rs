//! # Voice Bridge Backend - Main Application Entry Point
//!
//! This is the main entry point for the voice-bridge-backend server: a
//! real-time bridge between a telephony platform's bidirectional audio
//! stream and external speech/language services. One WebSocket connection
//! per phone call carries caller audio in and synthesized replies out.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **state**: Shared state: config, metrics, the call registry, adapters
//! - **audio**: μ-law codec bridge and sample-rate conversion
//! - **adapters**: Narrow contracts for the STT / reply / TTS services
//! - **conversation**: Per-call dialogue history
//! - **call**: Call sessions (turn-taking machine) and the registry
//! - **websocket**: The streaming protocol handler (one actor per call)
//! - **handlers**: Call setup, config, and observability endpoints
//! - **health**: System health monitoring endpoints
//! - **middleware**: Request logging and metrics collection

mod adapters;     // External service contracts (adapters/ directory)
mod audio;        // Codec bridge and resampling (audio/ directory)
mod call;         // Sessions and registry (call/ directory)
mod config;       // Configuration management (config.rs)
mod conversation; // Dialogue history (conversation.rs)
mod error;        // Error handling types (error.rs)
mod handlers;     // HTTP request handlers (handlers/ directory)
mod health;       // Health check endpoints (health.rs)
mod middleware;   // Custom middleware (middleware/ directory)
mod state;        // Application state management (state.rs)
mod websocket;    // Streaming protocol handler (websocket.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handlers and polled by main.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Creates shared application state** (registry, adapters, metrics)
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-bridge-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: binding {}:{}, public host {}",
        config.server.host, config.server.port, config.server.public_host
    );

    // Shared state: config, metrics, the call registry, and the three
    // external service adapters, wired once for the process lifetime
    let app_state = AppState::new(config.clone())?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            // Call setup: the platform posts new-call notifications here
            // and receives the stream-connect instruction
            .route("/voice", web::post().to(handlers::call_setup))
            // One stream connection per call, callId in the query string
            .route("/ws/call", web::get().to(websocket::call_websocket))
            // Management and observability API
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/calls", web::get().to(handlers::list_calls))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Race the server against the shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged
///   (e.g. "debug", "voice_bridge_backend=debug")
/// - If not set, defaults to "voice_bridge_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_bridge_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT; whichever arrives first sets the global
/// shutdown flag so in-flight calls can finish before the process exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// Polls the flag every 100ms; cheap, and keeps the select in main simple.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
