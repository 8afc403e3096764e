//! Entities persisted by the IDP store.
//!
//! All timestamps are UTC, stored as unix seconds. Rows reference each other
//! only by primary key or opaque code, never by pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Where a chat command came from. Replies go back to the same place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Group,
    Private,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Group => "group",
            SourceKind::Private => "private",
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(SourceKind::Group),
            "private" => Ok(SourceKind::Private),
            other => anyhow::bail!("Unknown source kind {}", other),
        }
    }
}

/// Durable association of one UIN to one upstream SSO subject.
///
/// At most one active row per UIN and one per sub; deactivation is logical
/// so that the audit trail survives unbinding.
#[derive(Debug, Clone)]
pub struct BindUser {
    pub id: i64,
    pub uin: i64,
    pub sub: String,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    /// Additional userinfo claims kept per the configured stored_fields.
    pub extra_data: Option<serde_json::Map<String, serde_json::Value>>,
    pub bind_time: DateTime<Utc>,
    pub is_active: bool,
}

impl BindUser {
    /// Human-facing name for chat replies and pages.
    pub fn display_name(&self) -> &str {
        self.preferred_username
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.sub)
    }
}

#[derive(Debug, Clone)]
pub struct NewBindUser {
    pub uin: i64,
    pub sub: String,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
    pub extra_data: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Transient: a user asked to bind and we are waiting for the upstream
/// callback. Keyed by the `state` token carried through the SSO round trip.
#[derive(Debug, Clone)]
pub struct PendingBind {
    pub id: i64,
    pub state: String,
    pub uin: i64,
    pub username: String,
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
}

#[derive(Debug, Clone)]
pub struct NewPendingBind {
    pub state: String,
    pub uin: i64,
    pub username: String,
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub expires_in_secs: i64,
}

/// Transient: a relying party started an authorization flow.
///
/// Two independent keys: the short human-typed `verification_code` and the
/// long machine-only `auth_code`. `uin == 0` means nobody has claimed the
/// request yet.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    pub id: i64,
    pub verification_code: String,
    pub auth_code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub bind_user_id: i64,
    pub uin: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_approved: bool,
    pub is_used: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPendingAuth {
    pub verification_code: String,
    pub auth_code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub expires_in_secs: i64,
}

/// Transient: a user asked to unbind and we are waiting for confirmation.
#[derive(Debug, Clone)]
pub struct PendingUnbind {
    pub id: i64,
    pub uin: i64,
    pub username: String,
    pub bind_user_id: i64,
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_processed: bool,
}

#[derive(Debug, Clone)]
pub struct NewPendingUnbind {
    pub uin: i64,
    pub username: String,
    pub bind_user_id: i64,
    pub source_kind: SourceKind,
    pub source_id: i64,
    pub expires_in_secs: i64,
}

/// Issued access/refresh token pair.
#[derive(Debug, Clone)]
pub struct OAuthToken {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub client_id: String,
    pub bind_user_id: i64,
    pub uin: i64,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub is_revoked: bool,
}

#[derive(Debug, Clone)]
pub struct NewOAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub bind_user_id: i64,
    pub uin: i64,
    pub scope: String,
    pub access_token_expires_in_secs: i64,
    pub refresh_token_expires_in_secs: Option<i64>,
}

/// Append-only audit record of an authorization decision.
#[derive(Debug, Clone)]
pub struct NewAuthorizationLog {
    pub uin: i64,
    pub client_id: String,
    pub address: String,
    pub scope: String,
    pub is_success: bool,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Append-only audit record of an unbind request and its outcome.
#[derive(Debug, Clone)]
pub struct NewUnbindLog {
    pub uin: i64,
    pub unbind_user: String,
    pub sub: String,
    pub bind_time: DateTime<Utc>,
    pub is_unbind: bool,
    pub reason: String,
}
