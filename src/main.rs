//! src/main.rs
mod auth;
mod config;
mod dashboard;
mod error;
mod gateway;
mod lead;
mod pager;
mod routes;
mod view;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    Server,
};
use tokio::{
    signal::{self, ctrl_c},
    sync::broadcast::{error::RecvError, Receiver},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use auth::SessionAuth;
use config::Config;
use dashboard::{Dashboard, DashboardEvent};
use gateway::{LeadGateway, SheetGateway};
use routes::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. logging ─────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lead_desk=info,tower_http=info"));
    fmt().with_env_filter(filter).init();

    // ── 2. config & state ──────────────────────────────────────────────
    let config = Config::from_env().context("invalid configuration")?;

    let dashboard = config.sheet_url.clone().map(|sheet_url| {
        let gateway: Arc<dyn LeadGateway> =
            Arc::new(SheetGateway::new(sheet_url, config.gateway_timeout));
        Arc::new(Dashboard::new(gateway))
    });
    if let Some(dashboard) = &dashboard {
        tokio::spawn(log_events(dashboard.subscribe()));
    }

    let state = AppState {
        auth: Arc::new(SessionAuth::from_config(&config)),
        dashboard,
    };

    // ── 3. build router ────────────────────────────────────────────────
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors(&config));

    // ── 4. serve until ctrl-c / SIGTERM ────────────────────────────────
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server running on {addr}");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

fn cors(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    match &config.cors_origin {
        Some(origin) => cors.allow_origin(origin.clone()),
        None         => cors.allow_origin(Any),
    }
}

async fn log_events(mut events: Receiver<DashboardEvent>) {
    loop {
        match events.recv().await {
            Ok(event)                      => debug!(?event, "dashboard changed"),
            Err(RecvError::Lagged(missed)) => warn!("dashboard event log skipped {missed} events"),
            Err(RecvError::Closed)         => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install terminate handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
