//! Durable state: bindings, pending requests, tokens and audit logs.

pub mod models;
pub mod schema;
mod sqlite_store;

pub use models::*;
pub use sqlite_store::SqliteIdpStore;

use anyhow::Result;

/// Binding lifecycle: lookup, creation and logical deactivation.
pub trait BindingStore: Send + Sync {
    /// Index lookup by UIN, filtered to active rows unless `active_only` is
    /// false.
    fn get_bind_user_by_uin(&self, uin: i64, active_only: bool) -> Result<Option<BindUser>>;

    /// Index lookup by upstream subject.
    fn get_bind_user_by_sub(&self, sub: &str, active_only: bool) -> Result<Option<BindUser>>;

    /// Inserts an active binding. Fails if another active row exists for the
    /// same UIN or sub (enforced by partial unique indexes).
    fn create_bind_user(&self, new: NewBindUser) -> Result<BindUser>;

    /// Logical delete; the row stays for audit. Returns whether a row was
    /// affected.
    fn deactivate_bind_user(&self, id: i64) -> Result<bool>;
}

/// The three pending-request state machines.
pub trait PendingStore: Send + Sync {
    fn create_pending_bind(&self, new: NewPendingBind) -> Result<PendingBind>;

    /// `valid_only` applies the `!is_used && now < expires_at` predicate.
    fn get_pending_bind_by_state(&self, state: &str, valid_only: bool)
        -> Result<Option<PendingBind>>;

    fn mark_pending_bind_used(&self, id: i64) -> Result<bool>;

    /// Inserts unclaimed (`uin = 0`, `bind_user_id = 0`). The row is durable
    /// before the caller observes success.
    fn create_pending_auth(&self, new: NewPendingAuth) -> Result<PendingAuth>;

    /// Lookup by verification code. `valid_only` applies
    /// `!is_used && !is_approved && now < expires_at`.
    fn get_pending_auth_by_verification_code(
        &self,
        code: &str,
        valid_only: bool,
    ) -> Result<Option<PendingAuth>>;

    /// Lookup by auth code with the approved-and-valid predicate
    /// (`is_approved && !is_used && now < expires_at`).
    fn get_pending_auth_by_auth_code(&self, code: &str) -> Result<Option<PendingAuth>>;

    /// Atomically assigns an unclaimed row to a user. Returns false when the
    /// row was already claimed (the WHERE clause requires `uin = 0`).
    fn claim_pending_auth(&self, id: i64, uin: i64, bind_user_id: i64) -> Result<bool>;

    /// Sets `is_approved`. Never touches `is_used`.
    fn approve_pending_auth(&self, id: i64) -> Result<bool>;

    /// Terminal transition; returns false when the row was already used so
    /// callers can reject replays.
    fn mark_pending_auth_used(&self, id: i64) -> Result<bool>;

    fn create_pending_unbind(&self, new: NewPendingUnbind) -> Result<PendingUnbind>;

    /// Returns the live (unprocessed, unexpired) pending unbind for a UIN.
    fn get_pending_unbind_by_uin(&self, uin: i64) -> Result<Option<PendingUnbind>>;

    fn mark_pending_unbind_processed(&self, id: i64) -> Result<bool>;
}

/// Access/refresh token persistence.
pub trait TokenStore: Send + Sync {
    fn create_oauth_token(&self, new: NewOAuthToken) -> Result<OAuthToken>;

    /// `valid_only` applies `!is_revoked && now < access_token_expires_at`.
    fn get_token_by_access_token(&self, token: &str, valid_only: bool)
        -> Result<Option<OAuthToken>>;

    /// `valid_only` applies `!is_revoked && now < refresh_token_expires_at`.
    fn get_token_by_refresh_token(
        &self,
        token: &str,
        valid_only: bool,
    ) -> Result<Option<OAuthToken>>;

    fn revoke_token(&self, id: i64) -> Result<bool>;

    /// Revokes every live token for a UIN, optionally restricted to one
    /// client. Returns the number of rows affected.
    fn revoke_all_user_tokens(&self, uin: i64, client_id: Option<&str>) -> Result<usize>;
}

/// Append-only audit trail.
pub trait AuditLogStore: Send + Sync {
    fn create_authorization_log(&self, new: NewAuthorizationLog) -> Result<()>;
    fn create_unbind_log(&self, new: NewUnbindLog) -> Result<()>;
}

pub trait FullIdpStore: BindingStore + PendingStore + TokenStore + AuditLogStore {}

impl<T> FullIdpStore for T where T: BindingStore + PendingStore + TokenStore + AuditLogStore {}
