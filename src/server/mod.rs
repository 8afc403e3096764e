//! HTTP server assembly.

pub mod http_layers;
pub mod metrics;
pub mod oauth_routes;
pub mod pages;
pub mod state;

pub use http_layers::{RateLimiter, RequestsLoggingLevel};
pub use state::ServerState;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use http_layers::rate_limit::{rate_limit, RateLimitContext};
use http_layers::{log_requests, security_headers};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builds the full router: OAuth surface, bind callback, pages and probes,
/// with per-bucket rate limiting on the sensitive route groups.
pub fn make_app(state: ServerState) -> Router {
    let limiter = state.rate_limiter.clone();

    let authorize_routes: Router = Router::new()
        .route("/authorize", get(oauth_routes::authorize))
        .route("/authorize/pending", get(oauth_routes::authorize_pending))
        .layer(middleware::from_fn_with_state(
            RateLimitContext {
                limiter: limiter.clone(),
                bucket: "authorize",
            },
            rate_limit,
        ))
        .with_state(state.clone());

    let check_routes: Router = Router::new()
        .route("/authorize/check", get(oauth_routes::authorize_check))
        .layer(middleware::from_fn_with_state(
            RateLimitContext {
                limiter: limiter.clone(),
                bucket: "auth_code",
            },
            rate_limit,
        ))
        .with_state(state.clone());

    let token_routes: Router = Router::new()
        .route("/token", post(oauth_routes::token))
        .layer(middleware::from_fn_with_state(
            RateLimitContext {
                limiter: limiter.clone(),
                bucket: "token",
            },
            rate_limit,
        ))
        .with_state(state.clone());

    let callback_routes: Router = Router::new()
        .route("/callback", get(pages::callback))
        .layer(middleware::from_fn_with_state(
            RateLimitContext {
                limiter,
                bucket: "bind",
            },
            rate_limit,
        ))
        .with_state(state.clone());

    let open_routes: Router = Router::new()
        .route("/", get(pages::index))
        .route("/userinfo", get(oauth_routes::userinfo))
        .route("/revoke", post(oauth_routes::revoke))
        .route(
            "/.well-known/openid-configuration",
            get(oauth_routes::openid_configuration),
        )
        .route("/health", get(pages::health))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state.clone());

    authorize_routes
        .merge(check_routes)
        .merge(token_routes)
        .merge(callback_routes)
        .merge(open_routes)
        .layer(middleware::from_fn_with_state(
            state.config.logging_level.clone(),
            log_requests,
        ))
        .layer(middleware::from_fn(security_headers))
}

pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .context("HTTP server failed")?;

    Ok(())
}
