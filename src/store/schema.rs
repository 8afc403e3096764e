//! SQLite schema definitions for the IDP database.

use anyhow::Result;
use rusqlite::Connection;

/// Offset added to the schema version stored in `PRAGMA user_version`, so a
/// ponte database is never mistaken for some other application's SQLite file.
pub const BASE_DB_VERSION: usize = 4100;

pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub indices: &'static [&'static str],
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

const BIND_USER_TABLE_V_0: Table = Table {
    name: "bind_user",
    schema: "CREATE TABLE bind_user (id INTEGER PRIMARY KEY, uin INTEGER NOT NULL, sub TEXT NOT NULL, email TEXT, preferred_username TEXT, extra_data TEXT, bind_time INTEGER NOT NULL, is_active INTEGER NOT NULL DEFAULT 1);",
    indices: &[
        // One active binding per UIN and one per upstream subject.
        "CREATE UNIQUE INDEX bind_user_uin_active_index ON bind_user (uin) WHERE is_active = 1;",
        "CREATE UNIQUE INDEX bind_user_sub_active_index ON bind_user (sub) WHERE is_active = 1;",
        "CREATE INDEX bind_user_uin_index ON bind_user (uin);",
    ],
};

const PENDING_BIND_TABLE_V_0: Table = Table {
    name: "pending_bind",
    schema: "CREATE TABLE pending_bind (id INTEGER PRIMARY KEY, state TEXT NOT NULL UNIQUE, uin INTEGER NOT NULL, username TEXT NOT NULL, source_type TEXT NOT NULL, source_id INTEGER NOT NULL, created_at INTEGER NOT NULL, expires_at INTEGER NOT NULL, is_used INTEGER NOT NULL DEFAULT 0);",
    indices: &["CREATE INDEX pending_bind_uin_index ON pending_bind (uin);"],
};

const PENDING_AUTH_TABLE_V_0: Table = Table {
    name: "pending_auth",
    schema: "CREATE TABLE pending_auth (id INTEGER PRIMARY KEY, verification_code TEXT NOT NULL UNIQUE, auth_code TEXT NOT NULL UNIQUE, client_id TEXT NOT NULL, redirect_uri TEXT NOT NULL, scope TEXT NOT NULL, state TEXT, code_challenge TEXT, code_challenge_method TEXT, nonce TEXT, bind_user_id INTEGER NOT NULL DEFAULT 0, uin INTEGER NOT NULL DEFAULT 0, created_at INTEGER NOT NULL, expires_at INTEGER NOT NULL, is_approved INTEGER NOT NULL DEFAULT 0, is_used INTEGER NOT NULL DEFAULT 0, client_ip TEXT, user_agent TEXT);",
    indices: &["CREATE INDEX pending_auth_uin_index ON pending_auth (uin);"],
};

const PENDING_UNBIND_TABLE_V_0: Table = Table {
    name: "pending_unbind",
    schema: "CREATE TABLE pending_unbind (id INTEGER PRIMARY KEY, uin INTEGER NOT NULL, username TEXT NOT NULL, bind_user_id INTEGER NOT NULL, source_type TEXT NOT NULL, source_id INTEGER NOT NULL, created_at INTEGER NOT NULL, expires_at INTEGER NOT NULL, is_processed INTEGER NOT NULL DEFAULT 0);",
    indices: &["CREATE INDEX pending_unbind_uin_index ON pending_unbind (uin);"],
};

const OAUTH_TOKEN_TABLE_V_0: Table = Table {
    name: "oauth_token",
    schema: "CREATE TABLE oauth_token (id INTEGER PRIMARY KEY, access_token TEXT NOT NULL UNIQUE, refresh_token TEXT UNIQUE, token_type TEXT NOT NULL DEFAULT 'Bearer', client_id TEXT NOT NULL, bind_user_id INTEGER NOT NULL, uin INTEGER NOT NULL, scope TEXT NOT NULL, created_at INTEGER NOT NULL, access_token_expires_at INTEGER NOT NULL, refresh_token_expires_at INTEGER, is_revoked INTEGER NOT NULL DEFAULT 0);",
    indices: &[
        "CREATE INDEX oauth_token_uin_index ON oauth_token (uin);",
        "CREATE INDEX oauth_token_client_index ON oauth_token (client_id);",
    ],
};

const AUTHORIZATION_LOG_TABLE_V_0: Table = Table {
    name: "authorization_log",
    schema: "CREATE TABLE authorization_log (id INTEGER PRIMARY KEY, uin INTEGER NOT NULL, client_id TEXT NOT NULL, address TEXT NOT NULL, scope TEXT NOT NULL, authorization_time INTEGER NOT NULL, is_success INTEGER NOT NULL DEFAULT 1, client_ip TEXT, user_agent TEXT);",
    indices: &["CREATE INDEX authorization_log_uin_time_index ON authorization_log (uin, authorization_time);"],
};

const UNBIND_LOG_TABLE_V_0: Table = Table {
    name: "unbind_log",
    schema: "CREATE TABLE unbind_log (id INTEGER PRIMARY KEY, uin INTEGER NOT NULL, unbind_user TEXT NOT NULL, sub TEXT NOT NULL, bind_time INTEGER NOT NULL, unbind_request_time INTEGER NOT NULL, unbind_time INTEGER, is_unbind INTEGER NOT NULL DEFAULT 0, reason TEXT);",
    indices: &["CREATE INDEX unbind_log_uin_time_index ON unbind_log (uin, unbind_request_time);"],
};

pub const IDP_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        BIND_USER_TABLE_V_0,
        PENDING_BIND_TABLE_V_0,
        PENDING_AUTH_TABLE_V_0,
        PENDING_UNBIND_TABLE_V_0,
        OAUTH_TOKEN_TABLE_V_0,
        AUTHORIZATION_LOG_TABLE_V_0,
        UNBIND_LOG_TABLE_V_0,
    ],
    migration: None,
}];

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            conn.execute(table.schema, [])?;
            for index in table.indices {
                conn.execute(index, [])?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }
}
