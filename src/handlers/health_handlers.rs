//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the registry, the local tier and
//!   the remote tier

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

use super::AppState;
use crate::models::ContentHash;

/// `GET /healthz`
///
/// Liveness only. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. `SELECT 1` against the registry.
/// 2. Write, read back and delete a temp file under the local tier root.
/// 3. Probe the remote tier with a `head` for a hash that never exists.
///
/// HTTP 200 when all checks pass, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let registry_check = match state.registry.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let tmp_path = state
        .fs
        .local_root()
        .join(format!(".readyz-{}", Uuid::new_v4()));
    let local_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => {
            let read = fs::read(&tmp_path).await;
            let removed = fs::remove_file(&tmp_path).await;
            match (read, removed) {
                (Ok(bytes), Ok(())) if bytes == b"readyz" => CheckStatus::ok(),
                (Ok(bytes), Err(e)) if bytes == b"readyz" => CheckStatus {
                    ok: true,
                    error: Some(format!("could not remove tmp file: {}", e)),
                },
                (Ok(_), _) => CheckStatus::failed("file content mismatch".to_string()),
                (Err(e), _) => CheckStatus::failed(format!("could not read tmp file: {}", e)),
            }
        }
        Err(e) => CheckStatus::failed(format!("could not write tmp file: {}", e)),
    };

    let remote_check = match ContentHash::parse(&"0".repeat(40)) {
        Ok(probe) => match state.fs.remote().head(&probe).await {
            Ok(_) => CheckStatus::ok(),
            Err(e) => CheckStatus::failed(format!("error: {}", e)),
        },
        Err(e) => CheckStatus::failed(e.to_string()),
    };

    let overall_ok = registry_check.ok && local_check.ok && remote_check.ok;

    let mut checks = HashMap::new();
    checks.insert("registry", registry_check);
    checks.insert("local", local_check);
    checks.insert("remote", remote_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
