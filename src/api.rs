//! Axum router for the disbursement service.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::errors::DisburseError;
use crate::metrics::metrics;
use crate::service::DisbursementService;
use crate::signer::SignerError;
use crate::types::DisbursementRequest;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DisbursementService>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DisburseSuccess {
    success: bool,
    signature: String,
    request_id: String,
    holding_account_created: bool,
}

#[derive(Debug, Serialize)]
struct DisburseFailure {
    success: bool,
    error: String,
    category: &'static str,
}

/// HTTP status for a pipeline error
pub fn status_for(err: &DisburseError) -> StatusCode {
    match err {
        DisburseError::Validation(_) => StatusCode::BAD_REQUEST,
        DisburseError::RateLimitWouldExceed { .. } => StatusCode::TOO_MANY_REQUESTS,
        DisburseError::Device(SignerError::Device(_)) => StatusCode::CONFLICT,
        DisburseError::BroadcastTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DisburseError::RemoteRejected { .. }
        | DisburseError::Rpc(_)
        | DisburseError::AccountQueryFailed { .. }
        | DisburseError::StaleBlockhash(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the router with all service routes.
pub fn build_router(service: Arc<DisbursementService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/disburse", post(disburse))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    service: Arc<DisbursementService>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_router(service);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// POST /disburse
async fn disburse(
    State(state): State<AppState>,
    payload: Result<Json<DisbursementRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!(DisburseFailure {
                    success: false,
                    error: rejection.body_text(),
                    category: "validation",
                })),
            )
        }
    };

    match state.service.disburse(&request).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!(DisburseSuccess {
                success: true,
                signature: receipt.signature.to_string(),
                request_id: receipt.request_id,
                holding_account_created: receipt.holding_account_created,
            })),
        ),
        Err(err) => (
            status_for(&err),
            Json(json!(DisburseFailure {
                success: false,
                error: err.to_string(),
                category: err.category(),
            })),
        ),
    }
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let ctx = state.service.context();
    Json(json!({
        "status": "ok",
        "signerAddress": ctx.signer().to_string(),
        "programId": ctx.addresses.program_id.to_string(),
        "assetId": ctx.addresses.asset.to_string(),
    }))
}

/// GET /metrics
async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics().render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::DeviceError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&DisburseError::validation("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DisburseError::RateLimitWouldExceed {
                requested: 2,
                remaining: 1,
                limit: 1
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&DisburseError::Device(DeviceError::UserCancelled.into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DisburseError::BroadcastTimeout {
                attempts: 3,
                last_signature: None
            }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&DisburseError::internal("x")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
