//! HTTP boundary
//!
//! `POST /api/transactions/{register,login,rekey,invite}` takes the raw
//! transaction envelope and answers with the raw response envelope. Every
//! failure is reported as the same opaque body.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use shardrelay_protocol::message::TransactionKind;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::state::RelayState;

/// Body of every rejected transaction
pub const REJECTED: &str = "rejected";

/// Build the HTTP router
pub fn router(state: RelayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/api/transactions/:kind", post(transaction))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn version() -> &'static str {
    concat!("shardrelay-relay/", env!("CARGO_PKG_VERSION"))
}

async fn transaction(
    State(state): State<RelayState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> Response {
    let kind: TransactionKind = match kind.parse() {
        Ok(kind) => kind,
        Err(_) => return (StatusCode::NOT_FOUND, "unknown transaction kind").into_response(),
    };
    debug!(kind = %kind, bytes = body.len(), "transaction received");

    match state.handle(kind, &body).await {
        Ok(response) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            response,
        )
            .into_response(),
        Err(e) if e.is_rejection() => (StatusCode::BAD_REQUEST, REJECTED).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, REJECTED).into_response(),
    }
}
