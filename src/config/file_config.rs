//! TOML file configuration.
//!
//! All fields are optional; missing values fall back to CLI arguments or
//! built-in defaults during `AppConfig::resolve`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerSection>,
    pub database: Option<DatabaseSection>,
    pub bot: Option<BotSection>,
    pub sso: Option<SsoSection>,
    pub provider: Option<ProviderSection>,
    #[serde(default)]
    pub clients: Vec<ClientSection>,
    pub binding: Option<BindingSection>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&raw).context("Failed to parse config file")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Address this server is reachable at from the outside (used in pages
    /// and discovery metadata).
    pub external_url: Option<String>,
    /// HS256 signing key for ID tokens. Required.
    pub secret_key: Option<String>,
    pub logging_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseSection {
    pub db_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotSection {
    pub ws_client_enabled: Option<bool>,
    pub ws_client_url: Option<String>,
    pub ws_client_access_token: Option<String>,

    pub ws_server_enabled: Option<bool>,
    pub ws_server_host: Option<String>,
    pub ws_server_port: Option<u16>,
    pub ws_server_access_token: Option<String>,

    pub command_prefix: Option<String>,
    pub allowed_groups: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SsoSection {
    pub enabled: Option<bool>,
    pub provider_name: Option<String>,
    pub use_discovery: Option<bool>,
    pub discovery_url: Option<String>,
    pub authorization_url: Option<String>,
    pub token_url: Option<String>,
    pub userinfo_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSection {
    pub issuer: Option<String>,
    pub auth_code_expire_secs: Option<i64>,
    pub access_token_expire_secs: Option<i64>,
    pub refresh_token_expire_secs: Option<i64>,
    pub verification_code_length: Option<usize>,
    pub verification_code_expire_secs: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientSection {
    pub client_id: String,
    pub client_secret: String,
    pub name: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingSection {
    pub stored_fields: Option<Vec<String>>,
    pub bind_link_expire_secs: Option<i64>,
}
