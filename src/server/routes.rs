//! Route handlers and response bodies.

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use super::{AppState, SERVICE_VERSION};
use crate::corpus::{CorpusProbe, CorpusStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthComponents {
    pub corpus_manager: bool,
    pub corpus: CorpusStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the corpus is complete, `degraded` otherwise.
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub components: HealthComponents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusDetails {
    pub status: CorpusStatus,
    pub name: Option<String>,
    pub document_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub health: HealthResponse,
    pub corpus_details: CorpusDetails,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/status", get(status_handler))
        .with_state(state)
}

fn health_from(probe: &CorpusProbe) -> HealthResponse {
    let status = if probe.status == CorpusStatus::Complete {
        "healthy"
    } else {
        "degraded"
    };

    HealthResponse {
        status: status.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: SERVICE_VERSION.to_string(),
        components: HealthComponents {
            corpus_manager: true,
            corpus: probe.status,
        },
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let probe = state.manager.corpus_status().await;
    Json(health_from(&probe))
}

/// GET /api/status
async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let probe = state.manager.corpus_status().await;
    let document_count = state.manager.metadata().await.document_count;

    Json(StatusResponse {
        health: health_from(&probe),
        corpus_details: CorpusDetails {
            status: probe.status,
            name: probe.corpus.map(|c| c.name),
            document_count,
        },
    })
}
