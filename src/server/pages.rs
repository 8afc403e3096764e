//! HTML pages: landing page, SSO bind callback and health probe.

use super::state::ServerState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::store::{BindingStore, PendingStore};

/// Minimal shared page shell.
pub fn base_template(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            justify-content: center;
            align-items: center;
            padding: 20px;
        }}
        .container {{
            background: white;
            border-radius: 16px;
            box-shadow: 0 20px 60px rgba(0, 0, 0, 0.3);
            padding: 40px;
            max-width: 520px;
            width: 100%;
            text-align: center;
        }}
        .icon {{ font-size: 56px; margin-bottom: 16px; }}
        h1 {{ color: #2c3e50; font-size: 22px; margin-bottom: 12px; }}
        p {{ color: #7f8c8d; line-height: 1.6; margin-bottom: 12px; }}
        .highlight {{ color: #2c3e50; font-weight: 600; }}
        .code-value {{
            font-family: 'Monaco', 'Consolas', monospace;
            font-size: 32px;
            letter-spacing: 6px;
            font-weight: 700;
            color: white;
        }}
        .code-section {{
            background: linear-gradient(135deg, #f093fb 0%, #f5576c 100%);
            border-radius: 12px;
            padding: 24px;
            margin: 24px 0;
        }}
        .code-hint {{ font-size: 12px; color: white; opacity: 0.85; margin-top: 8px; }}
        .detail-list {{
            text-align: left;
            background: #f8f9fa;
            border-radius: 8px;
            padding: 16px 24px;
            margin: 20px 0;
            list-style: none;
        }}
        .detail-list li {{
            padding: 8px 0;
            border-bottom: 1px solid #e9ecef;
            color: #495057;
            display: flex;
            justify-content: space-between;
        }}
        .detail-list li:last-child {{ border-bottom: none; }}
        .footer {{ margin-top: 24px; font-size: 13px; color: #95a5a6; }}
    </style>
</head>
<body>
    <div class="container">
        {content}
    </div>
</body>
</html>"#
    )
}

pub fn error_page(title: &str, heading: &str, message: &str, status: StatusCode) -> Response {
    let content = format!(
        r#"<div class="icon">&#10060;</div>
        <h1>{heading}</h1>
        <p>{message}</p>
        <div class="footer">Go back to chat and try again</div>"#
    );
    (status, Html(base_template(title, &content))).into_response()
}

pub async fn index() -> Html<String> {
    let content = r#"<div class="icon">&#128272;</div>
        <h1>Ponte - SSO binding service</h1>
        <p>Chat-side binding and authorization for your SSO account.</p>
        <p>Use the bot commands in a group or private chat to get started.</p>
        <div class="footer">Powered by Ponte</div>"#;
    Html(base_template("Ponte", content))
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// SSO callback for the binding flow: exchanges the upstream code and
/// persists the binding named by the pending request's state token.
pub async fn callback(
    State(state): State<ServerState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = &params.error {
        warn!(
            "Upstream SSO returned an error: {} - {:?}",
            error, params.error_description
        );
        let detail = params.error_description.as_deref().unwrap_or(error);
        return error_page(
            "Authorization failed",
            "Authorization failed",
            &format!("The SSO provider reported: {}", detail),
            StatusCode::OK,
        );
    }

    let (Some(code), Some(bind_state)) = (&params.code, &params.state) else {
        return error_page(
            "Invalid request",
            "Invalid request",
            "Required authorization parameters are missing",
            StatusCode::BAD_REQUEST,
        );
    };

    let pending = match state.store.get_pending_bind_by_state(bind_state, true) {
        Ok(Some(pending)) => pending,
        Ok(None) => {
            return error_page(
                "Link expired",
                "Link expired",
                "This binding link has expired or was already used",
                StatusCode::BAD_REQUEST,
            );
        }
        Err(e) => {
            error!("Failed to look up pending bind: {:#}", e);
            return error_page(
                "Server error",
                "Server error",
                "Please try again later",
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    };

    match state.store.get_bind_user_by_uin(pending.uin, true) {
        Ok(Some(_)) => {
            let _ = state.store.mark_pending_bind_used(pending.id);
            return error_page(
                "Already bound",
                "Already bound",
                "This chat account is already bound to an SSO account; unbind it in chat first",
                StatusCode::OK,
            );
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to look up binding: {:#}", e);
            return error_page(
                "Server error",
                "Server error",
                "Please try again later",
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    }

    if !state.config.sso.enabled {
        return error_page(
            "Configuration error",
            "Configuration error",
            "The SSO client is not configured",
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    // The pending bind stays intact on upstream failure so the user can
    // retry the link until it expires.
    let Some(userinfo) = state.sso.exchange_and_get_userinfo(code).await else {
        return error_page(
            "Fetch failed",
            "Could not fetch your account",
            "The SSO provider did not return your user information; try the link again",
            StatusCode::OK,
        );
    };

    if userinfo.sub.is_empty() {
        return error_page(
            "Fetch failed",
            "Could not fetch your account",
            "The SSO provider returned no subject identifier",
            StatusCode::OK,
        );
    }

    match state.store.get_bind_user_by_sub(&userinfo.sub, true) {
        Ok(Some(_)) => {
            let _ = state.store.mark_pending_bind_used(pending.id);
            return error_page(
                "Account already bound",
                "Account already bound",
                "This SSO account is already bound to another chat account",
                StatusCode::OK,
            );
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to look up binding by sub: {:#}", e);
            return error_page(
                "Server error",
                "Server error",
                "Please try again later",
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    }

    // Project the configured stored_fields beyond the standard three into
    // extra_data.
    let mut extra_data = serde_json::Map::new();
    for field in &state.config.binding.stored_fields {
        if matches!(field.as_str(), "sub" | "email" | "preferred_username") {
            continue;
        }
        if let Some(value) = userinfo.raw_data.get(field) {
            extra_data.insert(field.clone(), value.clone());
        }
    }

    let created = state.store.create_bind_user(crate::store::NewBindUser {
        uin: pending.uin,
        sub: userinfo.sub.clone(),
        email: userinfo.email.clone(),
        preferred_username: userinfo.preferred_username.clone(),
        extra_data: if extra_data.is_empty() {
            None
        } else {
            Some(extra_data)
        },
    });

    let bind_user = match created {
        Ok(user) => user,
        Err(e) => {
            error!("Failed to create binding: {:#}", e);
            return error_page(
                "Server error",
                "Server error",
                "Please try again later",
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
    };

    if let Err(e) = state.store.mark_pending_bind_used(pending.id) {
        error!("Failed to consume pending bind {}: {:#}", pending.id, e);
    }

    info!("Bound uin {} to sub {}", pending.uin, bind_user.sub);

    let content = format!(
        r#"<div class="icon">&#9989;</div>
        <h1>Binding complete</h1>
        <p>Your chat account is now bound to:</p>
        <p class="highlight">{}</p>
        <ul class="detail-list">
            <li><span>UIN</span><span>{}</span></li>
            <li><span>Username</span><span>{}</span></li>
            <li><span>Email</span><span>{}</span></li>
        </ul>
        <div class="footer">You can close this page and use the authorization commands in chat</div>"#,
        bind_user.display_name(),
        pending.uin,
        bind_user.preferred_username.as_deref().unwrap_or("-"),
        bind_user.email.as_deref().unwrap_or("-"),
    );
    Html(base_template("Binding complete", &content)).into_response()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
