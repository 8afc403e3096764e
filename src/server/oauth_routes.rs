//! OAuth 2.0 / OIDC provider endpoints.
//!
//! `/authorize` renders the verification-code page and creates an unclaimed
//! PendingAuth; the chat `auth` command claims and approves it; the browser
//! polls `/authorize/check` until it can bounce the authorization code back
//! to the relying party; `/token` exchanges or refreshes; `/userinfo`
//! projects claims; `/revoke` is RFC 7009.

use super::metrics;
use super::pages::{base_template, error_page};
use super::state::ServerState;
use crate::provider::{generate_auth_code, verify_pkce, TokenResponse};
use crate::security::{validate_redirect_uri, validate_scope_charset};
use crate::store::{
    BindingStore, NewOAuthToken, NewPendingAuth, OAuthToken, PendingStore, TokenStore,
};
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    InvalidClient(String),
    #[error("{0}")]
    InvalidGrant(String),
    #[error("unsupported grant type '{0}'")]
    UnsupportedGrantType(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OAuthError {
    fn error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
            OAuthError::Internal(_) => "server_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if let OAuthError::Internal(e) = &self {
            error!("Internal error on OAuth endpoint: {:#}", e);
        }
        let body = serde_json::json!({
            "error": self.error_code(),
            "error_description": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Registered redirect URIs may already carry a query component; parameters
/// are appended to it (RFC 6749 §3.1.2).
fn query_separator(redirect_uri: &str) -> char {
    if redirect_uri.contains('?') {
        '&'
    } else {
        '?'
    }
}

/// Error redirect back to the relying party per RFC 6749 §4.1.2.1. Only ever
/// called with a registered redirect URI.
fn error_redirect(
    redirect_uri: &str,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> Response {
    let mut url = format!(
        "{}{}error={}&error_description={}",
        redirect_uri,
        query_separator(redirect_uri),
        urlencoding::encode(error),
        urlencoding::encode(description),
    );
    if let Some(state) = state {
        url.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    Redirect::to(&url).into_response()
}

/// Credentials presented to `/token` or `/revoke`, from HTTP Basic or form
/// fields; Basic wins when both are present.
fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> (Option<String>, Option<String>) {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
    {
        if let Ok(decoded) = BASE64_STANDARD.decode(value) {
            if let Ok(decoded) = String::from_utf8(decoded) {
                if let Some((id, secret)) = decoded.split_once(':') {
                    return (Some(id.to_string()), Some(secret.to_string()));
                }
            }
        }
    }
    (
        form_id.map(String::from),
        form_secret.map(String::from),
    )
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from)
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

/// Known scopes described on the consent page.
fn scope_description(scope: &str) -> &str {
    match scope {
        "uin" => "Your chat account number",
        "openid" => "A unique account identifier",
        "email" => "Your email address",
        "profile" => "Username, nickname and name",
        "preferred_username" => "Your username",
        _ => "Access to this attribute",
    }
}

pub async fn authorize(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    metrics::AUTHORIZE_REQUESTS.inc();

    if !validate_redirect_uri(&params.redirect_uri) {
        return error_page(
            "Authorization error",
            "Invalid authorization request",
            "The redirect address is not acceptable; contact the application developer",
            StatusCode::BAD_REQUEST,
        );
    }

    let redirect_uri = params.redirect_uri.as_str();
    let req_state = params.state.as_deref();

    // Client identity and redirect-URI registration come first: until both
    // hold, no failure may be delivered by redirect (RFC 6749 §4.1.2.1).
    let Some(client) = state.provider.find_client(&params.client_id) else {
        return error_page(
            "Authorization error",
            "Invalid authorization request",
            "Unknown application; contact the application developer",
            StatusCode::BAD_REQUEST,
        );
    };

    if !state.provider.redirect_uri_registered(client, redirect_uri) {
        return error_page(
            "Authorization error",
            "Invalid authorization request",
            "The redirect address is not registered for this application",
            StatusCode::BAD_REQUEST,
        );
    }

    if params.response_type != "code" {
        return error_redirect(
            redirect_uri,
            "unsupported_response_type",
            "Only the 'code' response type is supported",
            req_state,
        );
    }

    if !validate_scope_charset(&params.scope) {
        return error_redirect(
            redirect_uri,
            "invalid_scope",
            "Malformed scope parameter",
            req_state,
        );
    }
    if let Err(detail) = state.provider.validate_scope(&params.scope, client) {
        return error_redirect(redirect_uri, "invalid_scope", &detail, req_state);
    }

    if params.code_challenge.is_some()
        && !matches!(
            params.code_challenge_method.as_deref(),
            Some("plain") | Some("S256")
        )
    {
        return error_redirect(
            redirect_uri,
            "invalid_request",
            "Invalid code_challenge_method",
            req_state,
        );
    }

    let verification_code = state.provider.generate_verification_code();
    let auth_code = generate_auth_code();
    let client_ip = Some(peer.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let created = state.store.create_pending_auth(NewPendingAuth {
        verification_code: verification_code.clone(),
        auth_code,
        client_id: params.client_id.clone(),
        redirect_uri: redirect_uri.to_string(),
        scope: params.scope.clone(),
        state: params.state.clone(),
        code_challenge: params.code_challenge.clone(),
        code_challenge_method: params.code_challenge_method.clone(),
        nonce: params.nonce.clone(),
        client_ip,
        user_agent,
        expires_in_secs: state.provider.settings.verification_code_expire_secs,
    });
    if let Err(e) = created {
        error!("Failed to create pending authorization: {:#}", e);
        return error_page(
            "Server error",
            "Server error",
            "Please try again later",
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    info!(
        "Authorization request from client {} issued code {}",
        params.client_id, verification_code
    );

    let prefix = &state.config.bot.command_prefix;
    let expire_secs = state.provider.settings.verification_code_expire_secs;
    let scope_items: String = params
        .scope
        .split_whitespace()
        .map(|s| {
            format!(
                r#"<li><span>{}</span><span>{}</span></li>"#,
                s,
                scope_description(s)
            )
        })
        .collect();

    let content = format!(
        r#"<div class="icon">&#128272;</div>
        <h1>Authorization request</h1>
        <p class="highlight">{client_name}</p>
        <p>is requesting access to your account information:</p>
        <ul class="detail-list">{scope_items}</ul>
        <div class="code-section">
            <p class="code-hint">Send this command in chat to approve</p>
            <div class="code-value">{verification_code}</div>
            <p class="code-hint">{prefix} auth {verification_code}</p>
        </div>
        <p>The code expires in {expire_minutes} minutes.</p>
        <script>
            const checkInterval = setInterval(async () => {{
                try {{
                    const response = await fetch('/authorize/check?verification_code={verification_code}');
                    const data = await response.json();
                    if (data.approved && data.redirect_uri) {{
                        clearInterval(checkInterval);
                        window.location.href = data.redirect_uri;
                    }}
                }} catch (e) {{
                    console.error('status check failed:', e);
                }}
            }}, 2000);
            setTimeout(() => clearInterval(checkInterval), {expire_millis});
        </script>
        <div class="footer">If you did not start this request, ignore this page</div>"#,
        client_name = client.name,
        scope_items = scope_items,
        verification_code = verification_code,
        prefix = prefix,
        expire_minutes = expire_secs / 60,
        expire_millis = expire_secs * 1000,
    );

    Html(base_template("Authorization request", &content)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuthorizePendingParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
}

/// JSON variant of `/authorize` for API consumers: creates the pending
/// request and returns the verification code instead of a page.
pub async fn authorize_pending(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(params): Query<AuthorizePendingParams>,
) -> Response {
    let Some(client) = state.provider.find_client(&params.client_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_client", "error_description": "Unknown client"})),
        )
            .into_response();
    };
    if !validate_redirect_uri(&params.redirect_uri)
        || !state
            .provider
            .redirect_uri_registered(client, &params.redirect_uri)
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_request", "error_description": "redirect_uri not registered"})),
        )
            .into_response();
    }
    if !validate_scope_charset(&params.scope) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_scope", "error_description": "Malformed scope parameter"})),
        )
            .into_response();
    }
    if let Err(detail) = state.provider.validate_scope(&params.scope, client) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid_scope", "error_description": detail})),
        )
            .into_response();
    }

    let verification_code = state.provider.generate_verification_code();
    let auth_code = generate_auth_code();
    let client_ip = Some(peer.ip().to_string());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let expires_in = state.provider.settings.verification_code_expire_secs;

    if let Err(e) = state.store.create_pending_auth(NewPendingAuth {
        verification_code: verification_code.clone(),
        auth_code,
        client_id: params.client_id.clone(),
        redirect_uri: params.redirect_uri.clone(),
        scope: params.scope.clone(),
        state: params.state.clone(),
        code_challenge: params.code_challenge.clone(),
        code_challenge_method: params.code_challenge_method.clone(),
        nonce: params.nonce.clone(),
        client_ip,
        user_agent,
        expires_in_secs: expires_in,
    }) {
        error!("Failed to create pending authorization: {:#}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "server_error"})),
        )
            .into_response();
    }

    let prefix = &state.config.bot.command_prefix;
    Json(serde_json::json!({
        "verification_code": verification_code,
        "expires_in": expires_in,
        "message": format!("Send in chat: {} auth {}", prefix, verification_code),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeCheckParams {
    pub verification_code: String,
}

/// Polled by the authorization page. 404 for unknown codes, 410 once
/// expired, and the relying-party redirect once approved.
pub async fn authorize_check(
    State(state): State<ServerState>,
    Query(params): Query<AuthorizeCheckParams>,
) -> Response {
    let code = params.verification_code.to_uppercase();
    let pending = match state.store.get_pending_auth_by_verification_code(&code, false) {
        Ok(Some(pending)) => pending,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({"error": "not_found", "approved": false})),
            )
                .into_response();
        }
        Err(e) => {
            error!("Failed to look up pending authorization: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "server_error", "approved": false})),
            )
                .into_response();
        }
    };

    if pending.expires_at <= chrono::Utc::now() {
        return (
            StatusCode::GONE,
            Json(serde_json::json!({"error": "expired", "approved": false})),
        )
            .into_response();
    }

    if pending.is_approved {
        let mut redirect_uri = format!(
            "{}{}code={}",
            pending.redirect_uri,
            query_separator(&pending.redirect_uri),
            urlencoding::encode(&pending.auth_code)
        );
        if let Some(req_state) = &pending.state {
            redirect_uri.push_str(&format!("&state={}", urlencoding::encode(req_state)));
        }
        return Json(serde_json::json!({
            "approved": true,
            "redirect_uri": redirect_uri,
        }))
        .into_response();
    }

    Json(serde_json::json!({"approved": false, "pending": true})).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

pub async fn token(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Result<Json<TokenResponse>, OAuthError> {
    metrics::TOKEN_REQUESTS.inc();

    let (client_id, client_secret) = client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    let client_id = client_id
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;

    let client = state
        .provider
        .find_client(&client_id)
        .ok_or_else(|| OAuthError::InvalidClient("Client authentication failed".to_string()))?;
    let client_secret = client_secret
        .ok_or_else(|| OAuthError::InvalidClient("Client authentication failed".to_string()))?;
    if !state.provider.validate_client_secret(client, &client_secret) {
        return Err(OAuthError::InvalidClient(
            "Client authentication failed".to_string(),
        ));
    }

    let grant_type = form
        .grant_type
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("grant_type is required".to_string()))?;

    match grant_type {
        "authorization_code" => {
            let code = form
                .code
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("code is required".to_string()))?;

            let pending = state
                .store
                .get_pending_auth_by_auth_code(code)?
                .ok_or_else(|| {
                    OAuthError::InvalidGrant(
                        "Invalid or expired authorization code".to_string(),
                    )
                })?;

            if let Some(redirect_uri) = form.redirect_uri.as_deref() {
                if redirect_uri != pending.redirect_uri {
                    return Err(OAuthError::InvalidGrant("redirect_uri mismatch".to_string()));
                }
            }

            if let Some(challenge) = &pending.code_challenge {
                let verifier = form.code_verifier.as_deref().ok_or_else(|| {
                    OAuthError::InvalidRequest("code_verifier is required".to_string())
                })?;
                let method = pending.code_challenge_method.as_deref().unwrap_or("plain");
                if !verify_pkce(verifier, challenge, method) {
                    return Err(OAuthError::InvalidGrant("Invalid code_verifier".to_string()));
                }
            }

            let bind_user = state
                .store
                .get_bind_user_by_uin(pending.uin, true)?
                .ok_or_else(|| OAuthError::InvalidGrant("User not found".to_string()))?;

            // Single-use: the UPDATE carries the is_used = 0 precondition, so
            // a replay or a concurrent exchange loses here.
            if !state.store.mark_pending_auth_used(pending.id)? {
                return Err(OAuthError::InvalidGrant(
                    "Invalid or expired authorization code".to_string(),
                ));
            }

            let response = state.provider.create_token_response(
                &bind_user,
                &client_id,
                &pending.scope,
                pending.nonce.as_deref(),
            )?;
            persist_token(&state, &response, &client_id, bind_user.id, bind_user.uin, &pending.scope)?;

            info!(
                "Issued tokens to client {} for uin {}",
                client_id, bind_user.uin
            );
            Ok(Json(response))
        }
        "refresh_token" => {
            let refresh_token = form.refresh_token.as_deref().ok_or_else(|| {
                OAuthError::InvalidRequest("refresh_token is required".to_string())
            })?;

            let record = state
                .store
                .get_token_by_refresh_token(refresh_token, true)?
                .ok_or_else(|| {
                    OAuthError::InvalidGrant("Invalid or expired refresh token".to_string())
                })?;

            if record.client_id != client_id {
                return Err(OAuthError::InvalidGrant("Client mismatch".to_string()));
            }

            // Rotation: the old pair dies before the new one is minted.
            if !state.store.revoke_token(record.id)? {
                return Err(OAuthError::InvalidGrant(
                    "Invalid or expired refresh token".to_string(),
                ));
            }

            let bind_user = state
                .store
                .get_bind_user_by_uin(record.uin, true)?
                .ok_or_else(|| OAuthError::InvalidGrant("User not found".to_string()))?;

            let response = state.provider.create_token_response(
                &bind_user,
                &client_id,
                &record.scope,
                None,
            )?;
            persist_token(&state, &response, &client_id, bind_user.id, bind_user.uin, &record.scope)?;

            info!(
                "Rotated refresh token for client {} and uin {}",
                client_id, record.uin
            );
            Ok(Json(response))
        }
        other => Err(OAuthError::UnsupportedGrantType(other.to_string())),
    }
}

fn persist_token(
    state: &ServerState,
    response: &TokenResponse,
    client_id: &str,
    bind_user_id: i64,
    uin: i64,
    scope: &str,
) -> Result<OAuthToken, OAuthError> {
    let token = state.store.create_oauth_token(NewOAuthToken {
        access_token: response.access_token.clone(),
        refresh_token: response.refresh_token.clone(),
        client_id: client_id.to_string(),
        bind_user_id,
        uin,
        scope: scope.to_string(),
        access_token_expires_in_secs: state.provider.settings.access_token_expire_secs,
        refresh_token_expires_in_secs: response
            .refresh_token
            .as_ref()
            .map(|_| state.provider.settings.refresh_token_expire_secs),
    })?;
    Ok(token)
}

pub async fn userinfo(State(state): State<ServerState>, headers: HeaderMap) -> Response {
    metrics::USERINFO_REQUESTS.inc();

    let Some(access_token) = bearer_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(serde_json::json!({
                "error": "invalid_request",
                "error_description": "Access token is required",
            })),
        )
            .into_response();
    };

    let record = match state.store.get_token_by_access_token(&access_token, true) {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
                Json(serde_json::json!({
                    "error": "invalid_token",
                    "error_description": "Invalid or expired access token",
                })),
            )
                .into_response();
        }
        Err(e) => {
            error!("Token lookup failed: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "server_error"})),
            )
                .into_response();
        }
    };

    let bind_user = match state.store.get_bind_user_by_uin(record.uin, true) {
        Ok(Some(user)) => user,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "invalid_token",
                    "error_description": "User not found",
                })),
            )
                .into_response();
        }
        Err(e) => {
            error!("Binding lookup failed: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "server_error"})),
            )
                .into_response();
        }
    };

    // Claims follow the token's stored scope, not the client's current
    // allow-list.
    let claims = state.provider.user_claims(&record.scope, &bind_user);
    Json(serde_json::Value::Object(claims)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct RevokeForm {
    pub token: Option<String>,
    #[allow(dead_code)]
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// RFC 7009: always 200 for authenticated clients, whether or not the token
/// existed, to keep the endpoint useless for probing.
pub async fn revoke(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Form(form): Form<RevokeForm>,
) -> Result<Json<serde_json::Value>, OAuthError> {
    let (client_id, client_secret) = client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    let client_id = client_id
        .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;
    let client = state
        .provider
        .find_client(&client_id)
        .ok_or_else(|| OAuthError::InvalidClient("Client authentication failed".to_string()))?;
    let client_secret = client_secret
        .ok_or_else(|| OAuthError::InvalidClient("Client authentication failed".to_string()))?;
    if !state.provider.validate_client_secret(client, &client_secret) {
        return Err(OAuthError::InvalidClient(
            "Client authentication failed".to_string(),
        ));
    }

    let token = form
        .token
        .as_deref()
        .ok_or_else(|| OAuthError::InvalidRequest("token is required".to_string()))?;

    let record = match state.store.get_token_by_access_token(token, false)? {
        Some(record) => Some(record),
        None => state.store.get_token_by_refresh_token(token, false)?,
    };

    if let Some(record) = record {
        if record.client_id == client_id {
            state.store.revoke_token(record.id)?;
            info!("Client {} revoked a token for uin {}", client_id, record.uin);
        } else {
            warn!(
                "Client {} attempted to revoke a token owned by {}",
                client_id, record.client_id
            );
        }
    }

    Ok(Json(serde_json::json!({})))
}

pub async fn openid_configuration(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let issuer = state.provider.issuer();
    Json(serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/authorize", issuer),
        "token_endpoint": format!("{}/token", issuer),
        "userinfo_endpoint": format!("{}/userinfo", issuer),
        "revocation_endpoint": format!("{}/revoke", issuer),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["HS256"],
        "scopes_supported": ["openid", "uin", "email", "profile", "preferred_username"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "code_challenge_methods_supported": ["plain", "S256"],
        "claims_supported": ["sub", "uin", "email", "preferred_username", "nickname"],
    }))
}
