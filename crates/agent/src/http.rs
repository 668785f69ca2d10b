#![forbid(unsafe_code)]

//! HTTP binding of [`Protocol`].

use crate::protocol::{Protocol, Reply};
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Debug, Deserialize)]
struct StatusQuery {
    job_id: Option<String>,
}

pub fn router(protocol: Arc<Protocol>) -> Router {
    let body_limit = protocol.controller().schema().max_request_bytes();
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/availability", get(availability))
        .route("/input_schema", get(input_schema))
        .route("/start_job", post(start_job))
        .route("/status", get(status))
        .route("/provide_input", post(provide_input))
        .route("/payment_confirmed", post(payment_confirmed))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(protocol)
}

/// Serves until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    protocol: Arc<Protocol>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(protocol))
        .with_graceful_shutdown(shutdown)
        .await
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self.body)).into_response()
    }
}

async fn root(State(protocol): State<Arc<Protocol>>) -> Reply {
    protocol.root()
}

async fn health(State(protocol): State<Arc<Protocol>>) -> Reply {
    protocol.health()
}

async fn availability(State(protocol): State<Arc<Protocol>>) -> Reply {
    protocol.availability()
}

async fn input_schema(State(protocol): State<Arc<Protocol>>) -> Reply {
    protocol.input_schema()
}

async fn start_job(
    State(protocol): State<Arc<Protocol>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Reply {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let content_type = header_value(&headers, header::CONTENT_TYPE);
    blocking(move || protocol.start_job(content_type.as_deref(), &body)).await
}

async fn status(
    State(protocol): State<Arc<Protocol>>,
    Query(query): Query<StatusQuery>,
) -> Reply {
    blocking(move || protocol.status(query.job_id.as_deref())).await
}

async fn provide_input(
    State(protocol): State<Arc<Protocol>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Reply {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let content_type = header_value(&headers, header::CONTENT_TYPE);
    blocking(move || protocol.provide_input(content_type.as_deref(), &body)).await
}

async fn payment_confirmed(
    State(protocol): State<Arc<Protocol>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Reply {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return rejected_body(rejection),
    };
    let content_type = header_value(&headers, header::CONTENT_TYPE);
    let authorization = header_value(&headers, header::AUTHORIZATION);
    blocking(move || {
        protocol.payment_confirmed(authorization.as_deref(), content_type.as_deref(), &body)
    })
    .await
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn rejected_body(rejection: BytesRejection) -> Reply {
    let status = rejection.status();
    tracing::debug!(status = status.as_u16(), reason = %rejection.body_text(), "request body rejected");
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return Reply::error(status.as_u16(), "Request body too large");
    }
    Reply::error(status.as_u16(), rejection.body_text())
}

/// Store access and signing are synchronous; keep them off the async workers.
async fn blocking(handler: impl FnOnce() -> Reply + Send + 'static) -> Reply {
    match tokio::task::spawn_blocking(handler).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(error = %err, "request handler panicked");
            Reply::error(500, "internal error")
        }
    }
}
