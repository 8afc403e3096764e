//! Prometheus metrics for the HTTP surface and the bot transport.

use axum::http::header;
use axum::response::IntoResponse;
use lazy_static::lazy_static;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

lazy_static! {
    pub static ref AUTHORIZE_REQUESTS: IntCounter = register_int_counter!(
        "ponte_authorize_requests_total",
        "Authorization requests received"
    )
    .unwrap();
    pub static ref TOKEN_REQUESTS: IntCounter = register_int_counter!(
        "ponte_token_requests_total",
        "Token endpoint requests received"
    )
    .unwrap();
    pub static ref USERINFO_REQUESTS: IntCounter = register_int_counter!(
        "ponte_userinfo_requests_total",
        "Userinfo requests received"
    )
    .unwrap();
    pub static ref AUTH_APPROVALS: IntCounter = register_int_counter!(
        "ponte_auth_approvals_total",
        "Authorization requests approved in chat"
    )
    .unwrap();
    pub static ref BOT_RECONNECTS: IntCounter = register_int_counter!(
        "ponte_bot_reconnects_total",
        "Bot client reconnect attempts"
    )
    .unwrap();
    pub static ref RATE_LIMITED: IntCounter = register_int_counter!(
        "ponte_rate_limited_total",
        "Requests rejected by the rate limiter"
    )
    .unwrap();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
}
