//! HTTP endpoints for the dashboard.

use std::future::Future;
use std::net::SocketAddr;

use axum::{extract::State, response::Html, routing::get, Json, Router};
use tokio::net::TcpListener;
use tracing::info;

use crate::error::{Error, Result};
use crate::telemetry::{SharedTelemetry, TelemetrySnapshot};

/// Dashboard page. It polls `/data` once per second.
const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

async fn dashboard_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn data_handler(State(telemetry): State<SharedTelemetry>) -> Json<TelemetrySnapshot> {
    Json(telemetry.snapshot())
}

/// Build the router over shared telemetry.
pub fn router(telemetry: SharedTelemetry) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/data", get(data_handler))
        .with_state(telemetry)
}

/// Bind `address` for the dashboard.
///
/// # Errors
///
/// Returns [`Error::ServerBind`] if the address is unavailable.
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|source| Error::ServerBind {
            address: address.to_string(),
            source,
        })
}

/// Serve the dashboard on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the server fails while running.
pub async fn serve(
    listener: TcpListener,
    telemetry: SharedTelemetry,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    if let Some(addr) = local {
        info!("Dashboard listening on http://{}", addr);
    }
    axum::serve(listener, router(telemetry))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Dashboard stopped");
    Ok(())
}
