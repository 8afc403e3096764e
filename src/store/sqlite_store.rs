//! SQLite-backed IDP store implementation.

use super::models::*;
use super::schema::{BASE_DB_VERSION, IDP_VERSIONED_SCHEMAS};
use super::{AuditLogStore, BindingStore, PendingStore, TokenStore};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Clone)]
pub struct SqliteIdpStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteIdpStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(db_path)?;
            Self::create_schema(&conn)?;
            conn
        };

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on idp database")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;

        let version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, usize>(0))
            .context("Failed to read database version")?;
        if version < BASE_DB_VERSION {
            bail!("Not a ponte database (user_version = {})", version);
        }
        let version = version - BASE_DB_VERSION;
        if version >= IDP_VERSIONED_SCHEMAS.len() {
            bail!("Database version {} is too new", version);
        }

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteIdpStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        let latest = IDP_VERSIONED_SCHEMAS
            .last()
            .context("No schema versions defined")?;
        info!("Creating idp db schema at version {}", latest.version);
        latest.create(conn)
    }

    fn migrate_if_needed(conn: &Connection, version: usize) -> Result<()> {
        let mut latest_from = version;
        for schema in IDP_VERSIONED_SCHEMAS.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!(
                    "Migrating idp db from version {} to {}",
                    latest_from, schema.version
                );
                migration_fn(conn)?;
                latest_from = schema.version;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
            [],
        )?;
        Ok(())
    }
}

fn datetime_from_secs(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(value, 0).unwrap_or_default()
}

fn extra_data_to_json(
    extra: &Option<serde_json::Map<String, serde_json::Value>>,
) -> Option<String> {
    extra
        .as_ref()
        .map(|map| serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string()))
}

fn parse_extra_data(raw: Option<String>) -> Option<serde_json::Map<String, serde_json::Value>> {
    raw.and_then(|json| match serde_json::from_str(&json) {
        Ok(map) => Some(map),
        Err(e) => {
            warn!("Malformed extra_data JSON in idp db: {}: {}", json, e);
            None
        }
    })
}

fn bind_user_from_row(row: &Row) -> rusqlite::Result<BindUser> {
    Ok(BindUser {
        id: row.get(0)?,
        uin: row.get(1)?,
        sub: row.get(2)?,
        email: row.get(3)?,
        preferred_username: row.get(4)?,
        extra_data: parse_extra_data(row.get(5)?),
        bind_time: datetime_from_secs(row.get(6)?),
        is_active: row.get::<usize, i64>(7)? != 0,
    })
}

fn source_kind_from_column(row: &Row, idx: usize) -> rusqlite::Result<SourceKind> {
    let raw: String = row.get(idx)?;
    SourceKind::from_str(&raw).map_err(|_| rusqlite::Error::InvalidQuery)
}

fn pending_bind_from_row(row: &Row) -> rusqlite::Result<PendingBind> {
    Ok(PendingBind {
        id: row.get(0)?,
        state: row.get(1)?,
        uin: row.get(2)?,
        username: row.get(3)?,
        source_kind: source_kind_from_column(row, 4)?,
        source_id: row.get(5)?,
        created_at: datetime_from_secs(row.get(6)?),
        expires_at: datetime_from_secs(row.get(7)?),
        is_used: row.get::<usize, i64>(8)? != 0,
    })
}

fn pending_auth_from_row(row: &Row) -> rusqlite::Result<PendingAuth> {
    Ok(PendingAuth {
        id: row.get(0)?,
        verification_code: row.get(1)?,
        auth_code: row.get(2)?,
        client_id: row.get(3)?,
        redirect_uri: row.get(4)?,
        scope: row.get(5)?,
        state: row.get(6)?,
        code_challenge: row.get(7)?,
        code_challenge_method: row.get(8)?,
        nonce: row.get(9)?,
        bind_user_id: row.get(10)?,
        uin: row.get(11)?,
        created_at: datetime_from_secs(row.get(12)?),
        expires_at: datetime_from_secs(row.get(13)?),
        is_approved: row.get::<usize, i64>(14)? != 0,
        is_used: row.get::<usize, i64>(15)? != 0,
        client_ip: row.get(16)?,
        user_agent: row.get(17)?,
    })
}

fn pending_unbind_from_row(row: &Row) -> rusqlite::Result<PendingUnbind> {
    Ok(PendingUnbind {
        id: row.get(0)?,
        uin: row.get(1)?,
        username: row.get(2)?,
        bind_user_id: row.get(3)?,
        source_kind: source_kind_from_column(row, 4)?,
        source_id: row.get(5)?,
        created_at: datetime_from_secs(row.get(6)?),
        expires_at: datetime_from_secs(row.get(7)?),
        is_processed: row.get::<usize, i64>(8)? != 0,
    })
}

fn oauth_token_from_row(row: &Row) -> rusqlite::Result<OAuthToken> {
    Ok(OAuthToken {
        id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        token_type: row.get(3)?,
        client_id: row.get(4)?,
        bind_user_id: row.get(5)?,
        uin: row.get(6)?,
        scope: row.get(7)?,
        created_at: datetime_from_secs(row.get(8)?),
        access_token_expires_at: datetime_from_secs(row.get(9)?),
        refresh_token_expires_at: row
            .get::<usize, Option<i64>>(10)?
            .map(datetime_from_secs),
        is_revoked: row.get::<usize, i64>(11)? != 0,
    })
}

const PENDING_BIND_COLUMNS: &str =
    "id, state, uin, username, source_type, source_id, created_at, expires_at, is_used";
const PENDING_AUTH_COLUMNS: &str = "id, verification_code, auth_code, client_id, redirect_uri, scope, state, code_challenge, code_challenge_method, nonce, bind_user_id, uin, created_at, expires_at, is_approved, is_used, client_ip, user_agent";
const PENDING_UNBIND_COLUMNS: &str =
    "id, uin, username, bind_user_id, source_type, source_id, created_at, expires_at, is_processed";
const OAUTH_TOKEN_COLUMNS: &str = "id, access_token, refresh_token, token_type, client_id, bind_user_id, uin, scope, created_at, access_token_expires_at, refresh_token_expires_at, is_revoked";
const BIND_USER_COLUMNS: &str =
    "id, uin, sub, email, preferred_username, extra_data, bind_time, is_active";

impl BindingStore for SqliteIdpStore {
    fn get_bind_user_by_uin(&self, uin: i64, active_only: bool) -> Result<Option<BindUser>> {
        let conn = self.conn.lock().unwrap();
        let query = if active_only {
            format!(
                "SELECT {} FROM bind_user WHERE uin = ?1 AND is_active = 1",
                BIND_USER_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM bind_user WHERE uin = ?1 ORDER BY id DESC LIMIT 1",
                BIND_USER_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&query)?;
        Ok(stmt
            .query_row(params![uin], bind_user_from_row)
            .optional()?)
    }

    fn get_bind_user_by_sub(&self, sub: &str, active_only: bool) -> Result<Option<BindUser>> {
        let conn = self.conn.lock().unwrap();
        let query = if active_only {
            format!(
                "SELECT {} FROM bind_user WHERE sub = ?1 AND is_active = 1",
                BIND_USER_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM bind_user WHERE sub = ?1 ORDER BY id DESC LIMIT 1",
                BIND_USER_COLUMNS
            )
        };
        let mut stmt = conn.prepare(&query)?;
        Ok(stmt
            .query_row(params![sub], bind_user_from_row)
            .optional()?)
    }

    fn create_bind_user(&self, new: NewBindUser) -> Result<BindUser> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO bind_user (uin, sub, email, preferred_username, extra_data, bind_time, is_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                new.uin,
                new.sub,
                new.email,
                new.preferred_username,
                extra_data_to_json(&new.extra_data),
                now.timestamp(),
            ],
        )
        .with_context(|| format!("Failed to create binding for uin {}", new.uin))?;
        let id = conn.last_insert_rowid();
        Ok(BindUser {
            id,
            uin: new.uin,
            sub: new.sub,
            email: new.email,
            preferred_username: new.preferred_username,
            extra_data: new.extra_data,
            bind_time: now,
            is_active: true,
        })
    }

    fn deactivate_bind_user(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE bind_user SET is_active = 0 WHERE id = ?1 AND is_active = 1",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

impl PendingStore for SqliteIdpStore {
    fn create_pending_bind(&self, new: NewPendingBind) -> Result<PendingBind> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(new.expires_in_secs);
        conn.execute(
            "INSERT INTO pending_bind (state, uin, username, source_type, source_id, created_at, expires_at, is_used) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                new.state,
                new.uin,
                new.username,
                new.source_kind.as_str(),
                new.source_id,
                now.timestamp(),
                expires_at.timestamp(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(PendingBind {
            id,
            state: new.state,
            uin: new.uin,
            username: new.username,
            source_kind: new.source_kind,
            source_id: new.source_id,
            created_at: now,
            expires_at,
            is_used: false,
        })
    }

    fn get_pending_bind_by_state(
        &self,
        state: &str,
        valid_only: bool,
    ) -> Result<Option<PendingBind>> {
        let conn = self.conn.lock().unwrap();
        if valid_only {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pending_bind WHERE state = ?1 AND is_used = 0 AND expires_at > ?2",
                PENDING_BIND_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![state, Utc::now().timestamp()], pending_bind_from_row)
                .optional()?)
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pending_bind WHERE state = ?1",
                PENDING_BIND_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![state], pending_bind_from_row)
                .optional()?)
        }
    }

    fn mark_pending_bind_used(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE pending_bind SET is_used = 1 WHERE id = ?1 AND is_used = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }

    fn create_pending_auth(&self, new: NewPendingAuth) -> Result<PendingAuth> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(new.expires_in_secs);
        conn.execute(
            "INSERT INTO pending_auth (verification_code, auth_code, client_id, redirect_uri, scope, state, code_challenge, code_challenge_method, nonce, bind_user_id, uin, created_at, expires_at, is_approved, is_used, client_ip, user_agent) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, 0, ?10, ?11, 0, 0, ?12, ?13)",
            params![
                new.verification_code,
                new.auth_code,
                new.client_id,
                new.redirect_uri,
                new.scope,
                new.state,
                new.code_challenge,
                new.code_challenge_method,
                new.nonce,
                now.timestamp(),
                expires_at.timestamp(),
                new.client_ip,
                new.user_agent,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(PendingAuth {
            id,
            verification_code: new.verification_code,
            auth_code: new.auth_code,
            client_id: new.client_id,
            redirect_uri: new.redirect_uri,
            scope: new.scope,
            state: new.state,
            code_challenge: new.code_challenge,
            code_challenge_method: new.code_challenge_method,
            nonce: new.nonce,
            bind_user_id: 0,
            uin: 0,
            created_at: now,
            expires_at,
            is_approved: false,
            is_used: false,
            client_ip: new.client_ip,
            user_agent: new.user_agent,
        })
    }

    fn get_pending_auth_by_verification_code(
        &self,
        code: &str,
        valid_only: bool,
    ) -> Result<Option<PendingAuth>> {
        let conn = self.conn.lock().unwrap();
        if valid_only {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pending_auth WHERE verification_code = ?1 AND is_used = 0 AND is_approved = 0 AND expires_at > ?2",
                PENDING_AUTH_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![code, Utc::now().timestamp()], pending_auth_from_row)
                .optional()?)
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pending_auth WHERE verification_code = ?1",
                PENDING_AUTH_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![code], pending_auth_from_row)
                .optional()?)
        }
    }

    fn get_pending_auth_by_auth_code(&self, code: &str) -> Result<Option<PendingAuth>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pending_auth WHERE auth_code = ?1 AND is_approved = 1 AND is_used = 0 AND expires_at > ?2",
            PENDING_AUTH_COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![code, Utc::now().timestamp()], pending_auth_from_row)
            .optional()?)
    }

    fn claim_pending_auth(&self, id: i64, uin: i64, bind_user_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE pending_auth SET uin = ?1, bind_user_id = ?2 WHERE id = ?3 AND uin = 0",
            params![uin, bind_user_id, id],
        )?;
        Ok(affected > 0)
    }

    fn approve_pending_auth(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE pending_auth SET is_approved = 1 WHERE id = ?1 AND is_used = 0 AND is_approved = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }

    fn mark_pending_auth_used(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE pending_auth SET is_used = 1 WHERE id = ?1 AND is_used = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }

    fn create_pending_unbind(&self, new: NewPendingUnbind) -> Result<PendingUnbind> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let expires_at = now + Duration::seconds(new.expires_in_secs);
        conn.execute(
            "INSERT INTO pending_unbind (uin, username, bind_user_id, source_type, source_id, created_at, expires_at, is_processed) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
            params![
                new.uin,
                new.username,
                new.bind_user_id,
                new.source_kind.as_str(),
                new.source_id,
                now.timestamp(),
                expires_at.timestamp(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(PendingUnbind {
            id,
            uin: new.uin,
            username: new.username,
            bind_user_id: new.bind_user_id,
            source_kind: new.source_kind,
            source_id: new.source_id,
            created_at: now,
            expires_at,
            is_processed: false,
        })
    }

    fn get_pending_unbind_by_uin(&self, uin: i64) -> Result<Option<PendingUnbind>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pending_unbind WHERE uin = ?1 AND is_processed = 0 AND expires_at > ?2 ORDER BY id DESC LIMIT 1",
            PENDING_UNBIND_COLUMNS
        ))?;
        Ok(stmt
            .query_row(params![uin, Utc::now().timestamp()], pending_unbind_from_row)
            .optional()?)
    }

    fn mark_pending_unbind_processed(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE pending_unbind SET is_processed = 1 WHERE id = ?1 AND is_processed = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

impl TokenStore for SqliteIdpStore {
    fn create_oauth_token(&self, new: NewOAuthToken) -> Result<OAuthToken> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let access_expires_at = now + Duration::seconds(new.access_token_expires_in_secs);
        let refresh_expires_at = new
            .refresh_token_expires_in_secs
            .map(|secs| now + Duration::seconds(secs));
        conn.execute(
            "INSERT INTO oauth_token (access_token, refresh_token, token_type, client_id, bind_user_id, uin, scope, created_at, access_token_expires_at, refresh_token_expires_at, is_revoked) VALUES (?1, ?2, 'Bearer', ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            params![
                new.access_token,
                new.refresh_token,
                new.client_id,
                new.bind_user_id,
                new.uin,
                new.scope,
                now.timestamp(),
                access_expires_at.timestamp(),
                refresh_expires_at.map(|dt| dt.timestamp()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(OAuthToken {
            id,
            access_token: new.access_token,
            refresh_token: new.refresh_token,
            token_type: "Bearer".to_string(),
            client_id: new.client_id,
            bind_user_id: new.bind_user_id,
            uin: new.uin,
            scope: new.scope,
            created_at: now,
            access_token_expires_at: access_expires_at,
            refresh_token_expires_at: refresh_expires_at,
            is_revoked: false,
        })
    }

    fn get_token_by_access_token(
        &self,
        token: &str,
        valid_only: bool,
    ) -> Result<Option<OAuthToken>> {
        let conn = self.conn.lock().unwrap();
        if valid_only {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM oauth_token WHERE access_token = ?1 AND is_revoked = 0 AND access_token_expires_at > ?2",
                OAUTH_TOKEN_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![token, Utc::now().timestamp()], oauth_token_from_row)
                .optional()?)
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM oauth_token WHERE access_token = ?1",
                OAUTH_TOKEN_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![token], oauth_token_from_row)
                .optional()?)
        }
    }

    fn get_token_by_refresh_token(
        &self,
        token: &str,
        valid_only: bool,
    ) -> Result<Option<OAuthToken>> {
        let conn = self.conn.lock().unwrap();
        if valid_only {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM oauth_token WHERE refresh_token = ?1 AND is_revoked = 0 AND refresh_token_expires_at > ?2",
                OAUTH_TOKEN_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![token, Utc::now().timestamp()], oauth_token_from_row)
                .optional()?)
        } else {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM oauth_token WHERE refresh_token = ?1",
                OAUTH_TOKEN_COLUMNS
            ))?;
            Ok(stmt
                .query_row(params![token], oauth_token_from_row)
                .optional()?)
        }
    }

    fn revoke_token(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE oauth_token SET is_revoked = 1 WHERE id = ?1 AND is_revoked = 0",
            params![id],
        )?;
        Ok(affected > 0)
    }

    fn revoke_all_user_tokens(&self, uin: i64, client_id: Option<&str>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let affected = match client_id {
            Some(client_id) => conn.execute(
                "UPDATE oauth_token SET is_revoked = 1 WHERE uin = ?1 AND client_id = ?2 AND is_revoked = 0",
                params![uin, client_id],
            )?,
            None => conn.execute(
                "UPDATE oauth_token SET is_revoked = 1 WHERE uin = ?1 AND is_revoked = 0",
                params![uin],
            )?,
        };
        Ok(affected)
    }
}

impl AuditLogStore for SqliteIdpStore {
    fn create_authorization_log(&self, new: NewAuthorizationLog) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO authorization_log (uin, client_id, address, scope, authorization_time, is_success, client_ip, user_agent) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.uin,
                new.client_id,
                new.address,
                new.scope,
                Utc::now().timestamp(),
                new.is_success as i64,
                new.client_ip,
                new.user_agent,
            ],
        )?;
        Ok(())
    }

    fn create_unbind_log(&self, new: NewUnbindLog) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO unbind_log (uin, unbind_user, sub, bind_time, unbind_request_time, unbind_time, is_unbind, reason) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.uin,
                new.unbind_user,
                new.sub,
                new.bind_time.timestamp(),
                now,
                if new.is_unbind { Some(now) } else { None },
                new.is_unbind as i64,
                new.reason,
            ],
        )?;
        Ok(())
    }
}
