//! Health and status HTTP endpoints.
//!
//! - `GET /health`: overall health plus component flags
//! - `GET /api/status`: health plus corpus details

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::info;

use crate::manager::CorpusManager;

pub use routes::{create_router, CorpusDetails, HealthComponents, HealthResponse, StatusResponse};

/// Version reported by the health endpoints.
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CorpusManager>,
}

impl AppState {
    pub fn new(manager: Arc<CorpusManager>) -> Self {
        Self { manager }
    }
}

/// Serves the health endpoints until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve<F>(
    manager: Arc<CorpusManager>,
    host: &str,
    port: u16,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let app = create_router(AppState::new(manager)).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Health server stopped");
    Ok(())
}
