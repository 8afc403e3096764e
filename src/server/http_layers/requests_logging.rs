//! Per-request logging middleware.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use clap::ValueEnum;
use tracing::info;

/// The level of logging to perform on each request.
#[derive(Debug, Clone, Default, PartialEq, Eq, ValueEnum)]
pub enum RequestsLoggingLevel {
    /// No per-request logging.
    None,
    /// Method, path and response status.
    #[default]
    Path,
    /// Path level plus request headers.
    Headers,
}

pub async fn log_requests(
    State(level): State<RequestsLoggingLevel>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if level == RequestsLoggingLevel::None {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    if level == RequestsLoggingLevel::Headers {
        info!("{} {} headers: {:?}", method, path, request.headers());
    }

    let response = next.run(request).await;
    info!("{} {} -> {}", method, path, response.status());
    response
}
