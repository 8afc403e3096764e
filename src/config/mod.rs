mod file_config;

pub use file_config::{
    BindingSection, BotSection, ClientSection, DatabaseSection, FileConfig, ProviderSection,
    ServerSection, SsoSection,
};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub external_url: String,
    pub secret_key: String,
    pub logging_level: RequestsLoggingLevel,
    pub db_dir: PathBuf,

    pub bot: BotSettings,
    pub sso: SsoClientSettings,
    pub provider: ProviderSettings,
    pub clients: Vec<OAuthClientEntry>,
    pub binding: BindingSettings,
}

/// Bot transport and dispatcher settings.
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub ws_client_enabled: bool,
    pub ws_client_url: String,
    pub ws_client_access_token: String,

    pub ws_server_enabled: bool,
    pub ws_server_host: String,
    pub ws_server_port: u16,
    pub ws_server_access_token: String,

    pub command_prefix: String,
    /// Empty means all groups are allowed.
    pub allowed_groups: Vec<i64>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            ws_client_enabled: false,
            ws_client_url: "ws://127.0.0.1:6700".to_string(),
            ws_client_access_token: String::new(),
            ws_server_enabled: true,
            ws_server_host: "0.0.0.0".to_string(),
            ws_server_port: 8001,
            ws_server_access_token: String::new(),
            command_prefix: "/sso".to_string(),
            allowed_groups: Vec::new(),
        }
    }
}

/// Settings for the upstream SSO provider this server is a client of
/// (the binding flow).
#[derive(Debug, Clone)]
pub struct SsoClientSettings {
    pub enabled: bool,
    pub provider_name: String,
    pub use_discovery: bool,
    pub discovery_url: String,
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: String,
}

impl Default for SsoClientSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider_name: "SSO".to_string(),
            use_discovery: false,
            discovery_url: String::new(),
            authorization_url: String::new(),
            token_url: String::new(),
            userinfo_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8000/callback".to_string(),
            scope: "openid email profile".to_string(),
        }
    }
}

/// Settings for the OAuth provider role (this server as the IDP).
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub issuer: String,
    pub auth_code_expire_secs: i64,
    pub access_token_expire_secs: i64,
    pub refresh_token_expire_secs: i64,
    pub verification_code_length: usize,
    pub verification_code_expire_secs: i64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8000".to_string(),
            auth_code_expire_secs: 300,
            access_token_expire_secs: 3600,
            refresh_token_expire_secs: 86400 * 30,
            verification_code_length: 6,
            verification_code_expire_secs: 300,
        }
    }
}

/// A registered relying party.
#[derive(Debug, Clone)]
pub struct OAuthClientEntry {
    pub client_id: String,
    pub client_secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
}

/// Settings for the binding flow.
#[derive(Debug, Clone)]
pub struct BindingSettings {
    /// Userinfo claims persisted on the binding. Claims beyond
    /// sub/email/preferred_username land in `extra_data`.
    pub stored_fields: Vec<String>,
    pub bind_link_expire_secs: i64,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            stored_fields: vec![
                "sub".to_string(),
                "email".to_string(),
                "preferred_username".to_string(),
            ],
            bind_link_expire_secs: 300,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let server = file.server.unwrap_or_default();
        let database = file.database.unwrap_or_default();

        let db_dir = database
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let host = server.host.unwrap_or_else(|| cli.host.clone());
        let port = server.port.unwrap_or(cli.port);
        let external_url = server
            .external_url
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();

        let secret_key = match server.secret_key {
            Some(key) if !key.is_empty() => key,
            _ => bail!("server.secret_key must be set in the config file"),
        };

        let logging_level = server
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        // Bot settings - merge file config with defaults
        let bot_file = file.bot.unwrap_or_default();
        let bot_defaults = BotSettings::default();
        let bot = BotSettings {
            ws_client_enabled: bot_file
                .ws_client_enabled
                .unwrap_or(bot_defaults.ws_client_enabled),
            ws_client_url: bot_file.ws_client_url.unwrap_or(bot_defaults.ws_client_url),
            ws_client_access_token: bot_file
                .ws_client_access_token
                .unwrap_or(bot_defaults.ws_client_access_token),
            ws_server_enabled: bot_file
                .ws_server_enabled
                .unwrap_or(bot_defaults.ws_server_enabled),
            ws_server_host: bot_file
                .ws_server_host
                .unwrap_or(bot_defaults.ws_server_host),
            ws_server_port: bot_file
                .ws_server_port
                .unwrap_or(bot_defaults.ws_server_port),
            ws_server_access_token: bot_file
                .ws_server_access_token
                .unwrap_or(bot_defaults.ws_server_access_token),
            command_prefix: bot_file
                .command_prefix
                .unwrap_or(bot_defaults.command_prefix),
            allowed_groups: bot_file
                .allowed_groups
                .unwrap_or(bot_defaults.allowed_groups),
        };

        let sso_file = file.sso.unwrap_or_default();
        let sso_defaults = SsoClientSettings::default();
        let sso = SsoClientSettings {
            enabled: sso_file.enabled.unwrap_or(sso_defaults.enabled),
            provider_name: sso_file.provider_name.unwrap_or(sso_defaults.provider_name),
            use_discovery: sso_file.use_discovery.unwrap_or(sso_defaults.use_discovery),
            discovery_url: sso_file.discovery_url.unwrap_or(sso_defaults.discovery_url),
            authorization_url: sso_file
                .authorization_url
                .unwrap_or(sso_defaults.authorization_url),
            token_url: sso_file.token_url.unwrap_or(sso_defaults.token_url),
            userinfo_url: sso_file.userinfo_url.unwrap_or(sso_defaults.userinfo_url),
            client_id: sso_file.client_id.unwrap_or(sso_defaults.client_id),
            client_secret: sso_file.client_secret.unwrap_or(sso_defaults.client_secret),
            redirect_uri: sso_file.redirect_uri.unwrap_or(sso_defaults.redirect_uri),
            scope: sso_file.scope.unwrap_or(sso_defaults.scope),
        };

        let provider_file = file.provider.unwrap_or_default();
        let provider_defaults = ProviderSettings::default();
        let provider = ProviderSettings {
            issuer: provider_file
                .issuer
                .map(|i| i.trim_end_matches('/').to_string())
                .unwrap_or(provider_defaults.issuer),
            auth_code_expire_secs: provider_file
                .auth_code_expire_secs
                .unwrap_or(provider_defaults.auth_code_expire_secs),
            access_token_expire_secs: provider_file
                .access_token_expire_secs
                .unwrap_or(provider_defaults.access_token_expire_secs),
            refresh_token_expire_secs: provider_file
                .refresh_token_expire_secs
                .unwrap_or(provider_defaults.refresh_token_expire_secs),
            verification_code_length: provider_file
                .verification_code_length
                .unwrap_or(provider_defaults.verification_code_length),
            verification_code_expire_secs: provider_file
                .verification_code_expire_secs
                .unwrap_or(provider_defaults.verification_code_expire_secs),
        };

        let clients = file
            .clients
            .into_iter()
            .map(|c| {
                let mut allowed_scopes = c
                    .allowed_scopes
                    .unwrap_or_else(|| vec!["uin".to_string(), "openid".to_string()]);
                // Every client may always request the UIN scope.
                if !allowed_scopes.iter().any(|s| s == "uin") {
                    allowed_scopes.insert(0, "uin".to_string());
                }
                OAuthClientEntry {
                    client_id: c.client_id,
                    client_secret: c.client_secret,
                    name: c.name.unwrap_or_else(|| "Unnamed application".to_string()),
                    redirect_uris: c.redirect_uris,
                    allowed_scopes,
                }
            })
            .collect::<Vec<_>>();

        for client in &clients {
            if client.client_id.is_empty() || client.client_secret.is_empty() {
                bail!("OAuth clients must have a non-empty client_id and client_secret");
            }
        }

        let binding_file = file.binding.unwrap_or_default();
        let binding_defaults = BindingSettings::default();
        let binding = BindingSettings {
            stored_fields: binding_file
                .stored_fields
                .unwrap_or(binding_defaults.stored_fields),
            bind_link_expire_secs: binding_file
                .bind_link_expire_secs
                .unwrap_or(binding_defaults.bind_link_expire_secs),
        };

        Ok(Self {
            host,
            port,
            external_url,
            secret_key,
            logging_level,
            db_dir,
            bot,
            sso,
            provider,
            clients,
            binding,
        })
    }

    pub fn idp_db_path(&self) -> PathBuf {
        self.db_dir.join("idp.db")
    }

    pub fn find_client(&self, client_id: &str) -> Option<&OAuthClientEntry> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base_file_config(db_dir: &TempDir) -> FileConfig {
        FileConfig {
            server: Some(ServerSection {
                secret_key: Some("test-secret".to_string()),
                ..Default::default()
            }),
            database: Some(DatabaseSection {
                db_dir: Some(db_dir.path().to_string_lossy().to_string()),
            }),
            ..Default::default()
        }
    }

    fn cli() -> CliConfig {
        CliConfig {
            db_dir: None,
            host: "0.0.0.0".to_string(),
            port: 8000,
            logging_level: RequestsLoggingLevel::Path,
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli(), Some(base_file_config(&tmp))).unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.external_url, "http://localhost:8000");
        assert_eq!(config.bot.command_prefix, "/sso");
        assert_eq!(config.provider.verification_code_length, 6);
        assert_eq!(config.provider.access_token_expire_secs, 3600);
        assert_eq!(config.binding.bind_link_expire_secs, 300);
        assert!(config.clients.is_empty());
        assert_eq!(config.idp_db_path(), tmp.path().join("idp.db"));
    }

    #[test]
    fn test_resolve_missing_secret_key_error() {
        let tmp = TempDir::new().unwrap();
        let mut file = base_file_config(&tmp);
        file.server.as_mut().unwrap().secret_key = None;

        let result = AppConfig::resolve(&cli(), Some(file));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("secret_key"));
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let file = FileConfig {
            server: Some(ServerSection {
                secret_key: Some("k".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cli = CliConfig::default();
        let result = AppConfig::resolve(&cli, Some(file));
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_uin_scope_injected_into_clients() {
        let tmp = TempDir::new().unwrap();
        let mut file = base_file_config(&tmp);
        file.clients = vec![ClientSection {
            client_id: "demo".to_string(),
            client_secret: "s3cret".to_string(),
            name: Some("Demo".to_string()),
            redirect_uris: vec!["https://rp/cb".to_string()],
            allowed_scopes: Some(vec!["openid".to_string(), "email".to_string()]),
        }];

        let config = AppConfig::resolve(&cli(), Some(file)).unwrap();
        let client = config.find_client("demo").unwrap();
        assert_eq!(client.allowed_scopes[0], "uin");
        assert!(client.allowed_scopes.iter().any(|s| s == "openid"));
    }

    #[test]
    fn test_external_url_trailing_slash_trimmed() {
        let tmp = TempDir::new().unwrap();
        let mut file = base_file_config(&tmp);
        file.server.as_mut().unwrap().external_url = Some("https://idp.example.com/".to_string());

        let config = AppConfig::resolve(&cli(), Some(file)).unwrap();
        assert_eq!(config.external_url, "https://idp.example.com");
    }

    #[test]
    fn test_toml_overrides_cli_port() {
        let tmp = TempDir::new().unwrap();
        let mut file = base_file_config(&tmp);
        file.server.as_mut().unwrap().port = Some(9000);

        let config = AppConfig::resolve(&cli(), Some(file)).unwrap();
        assert_eq!(config.port, 9000);
    }
}
