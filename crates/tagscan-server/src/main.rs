mod api;
mod middleware;
mod scheduler;
mod visits;

use std::sync::Arc;
use std::time::Duration;

use tagscan_notify::{CoordinatorSettings, HttpWebhookDispatcher, RpcScanRecorder};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::RateLimitState,
    visits::VisitRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(tagscan_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let recorder = RpcScanRecorder::new(
        &config.backend_url,
        &config.backend_api_key,
        &config.record_scan_rpc,
        Duration::from_millis(config.recorder_timeout_ms),
        &config.http_user_agent,
    )?;
    let dispatcher = HttpWebhookDispatcher::new(
        &config.webhook_url,
        Duration::from_millis(config.webhook_timeout_ms),
        &config.http_user_agent,
    )?;
    tracing::info!(env = %config.env, rpc = %recorder.rpc_url(), "scan collaborators ready");

    let visits = VisitRegistry::new(
        CoordinatorSettings::from_app_config(&config),
        Arc::new(recorder),
        Arc::new(dispatcher),
        Duration::from_secs(config.visit_ttl_secs),
    );
    let _scheduler = scheduler::build_scheduler(visits.clone()).await?;

    let app = build_app(
        AppState { visits },
        RateLimitState::per_minute(config.rate_limit_per_minute),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
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
                tracing::error!(error = %e, "failed to install SIGTERM handler");
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

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
