//! HTTP surface: status, peer coordination, artifact file service.
//!
//! The end-user listing/watch UI lives elsewhere; this router only carries
//! what the pipeline itself needs.

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::Context as _;
use async_trait::async_trait;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use meeting_store::model::StatusStats;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;

use crate::task::{ShutdownSignal, Task};
use crate::{check, AppState};

/// Peer coordination bodies stay small; anything bigger is abuse.
const MAX_BODY_SIZE: usize = 4 * 1024 * 1024;

pub const PEER_RESULT_OK: &str = "ok";
pub const PEER_RESULT_PENDING: &str = "pending";

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeetingsLoadedRequest {
    pub meetings: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeetingsLoadedResponse {
    pub result: String,
}

pub fn make_router(state: AppState) -> Router {
    let repository = state.conf.storage.repository.clone();

    Router::new()
        .route("/status", get(get_status))
        .route("/meetingsLoaded/{salt}", post(post_meetings_loaded))
        .nest_service("/files", ServeDir::new(repository))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    stats: HashMap<&'static str, StatusStats>,
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let stats = state.store.stats().await.map_err(|e| {
        error!(error = format!("{e:#}"), "Failed to aggregate stats");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let stats = stats.into_iter().map(|(status, entry)| (status.as_str(), entry)).collect();

    Ok(Json(StatusResponse { status: "OK", stats }))
}

async fn post_meetings_loaded(
    State(state): State<AppState>,
    Path(salt): Path<String>,
    Json(request): Json<MeetingsLoadedRequest>,
) -> Result<Json<MeetingsLoadedResponse>, StatusCode> {
    if salt != state.conf.access_key_salt {
        return Err(StatusCode::FORBIDDEN);
    }

    let loaded = check::meetings_loaded(&state.store, &request.meetings)
        .await
        .map_err(|e| {
            error!(error = format!("{e:#}"), "Failed to check the meetings");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let result = if loaded { PEER_RESULT_OK } else { PEER_RESULT_PENDING };

    Ok(Json(MeetingsLoadedResponse {
        result: result.to_owned(),
    }))
}

pub struct HttpListenerTask {
    pub state: AppState,
    pub listen: SocketAddr,
}

#[async_trait]
impl Task for HttpListenerTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "http listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let listener = tokio::net::TcpListener::bind(self.listen)
            .await
            .with_context(|| format!("failed to bind {}", self.listen))?;

        info!(listen = %self.listen, "HTTP listener started");

        let router = make_router(self.state);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown_signal.wait().await })
            .await
            .context("HTTP server failure")?;

        debug!("Task terminated");

        Ok(())
    }
}
