mod auth;
mod config;
mod error;
mod handlers;
mod llm;
mod metrics_middleware;
mod middleware;
mod rate_limit;
mod router;
mod telemetry;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::llm::OpenAiClient;
use crate::rate_limit::{RateLimiter, Reaper};
use crate::router::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = match telemetry::init_telemetry() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let chat_limiter = RateLimiter::new("chat", config.chat_rate_limit);
    let api_limiter = RateLimiter::new("api", config.api_rate_limit);
    telemetry::spawn_rate_limit_metrics(&[chat_limiter.clone(), api_limiter.clone()]);

    let reaper = Reaper::spawn(
        vec![chat_limiter.store().clone(), api_limiter.store().clone()],
        config.sweep_interval,
    );

    let state = AppState {
        generator: Arc::new(OpenAiClient::new(
            &config.openai_base_url,
            &config.openai_api_key,
            Some(&config.openai_model),
        )),
        verifier: TokenVerifier::new(config.jwt_secret.as_bytes()),
        chat_limiter,
        api_limiter,
    };

    let app = router::build(state, &config.cors_origins);
    let addr = SocketAddr::from((config.host, config.port));

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind address");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        %addr,
        chat_limit = config.chat_rate_limit.max_requests,
        api_limit = config.api_rate_limit.max_requests,
        window_ms = u64::try_from(config.chat_rate_limit.window.as_millis()).unwrap_or(u64::MAX),
        "Starting colloquy server"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    reaper.shutdown().await;

    match served {
        Ok(()) => {
            tracing::info!("server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
