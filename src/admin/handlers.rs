use std::path::PathBuf;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Serialize;
use serde_json::json;

use crate::admin::auth::ClientAuthorization;
use crate::admin::AdminState;
use crate::ingestion::IngestionSnapshot;

pub const PROGRAM_NAME: &str = "UstRouter";

#[derive(Serialize)]
pub struct VersionInfo {
    pub program_name: &'static str,
    pub program_version: &'static str,
}

#[derive(Serialize)]
pub struct ServerInfo {
    pub pid: u32,
    pub instance_dir: Option<PathBuf>,
    pub ingestion: IngestionSnapshot,
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "status": "error", "message": "Operation not permitted" })),
    )
        .into_response()
}

pub async fn ping() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        program_name: PROGRAM_NAME,
        program_version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn server_info(
    State(state): State<AdminState>,
    Extension(auth): Extension<ClientAuthorization>,
) -> Response {
    if !auth.permissions.inspect {
        return forbidden();
    }
    Json(ServerInfo {
        pid: std::process::id(),
        instance_dir: state.instance_dir.clone(),
        ingestion: state.ingestion.snapshot(),
    })
    .into_response()
}

pub async fn status_text(
    State(state): State<AdminState>,
    Extension(auth): Extension<ClientAuthorization>,
) -> Response {
    if !auth.permissions.inspect {
        return forbidden();
    }
    let mut body = Vec::new();
    if let Err(e) = state.ingestion.snapshot().write_text(&mut body) {
        tracing::warn!(error = %e, "Failed to render status");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub async fn shutdown(
    State(state): State<AdminState>,
    Extension(auth): Extension<ClientAuthorization>,
) -> Response {
    if !auth.permissions.control {
        return forbidden();
    }
    let origin = match &auth.username {
        Some(user) => format!("admin API (user {user})"),
        None => "admin API".to_string(),
    };
    if !state.exit.request(origin) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "message": "Already shutting down" })),
        )
            .into_response();
    }
    Json(json!({ "status": "ok" })).into_response()
}
