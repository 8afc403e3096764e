//! Shared test harness: spawns the real router on a random port against a
//! temporary SQLite store.

#![allow(dead_code)]

use ponte_server::config::{
    AppConfig, BindingSettings, BotSettings, OAuthClientEntry, ProviderSettings, SsoClientSettings,
};
use ponte_server::provider::OAuthProvider;
use ponte_server::server::{make_app, ServerState};
use ponte_server::sso::SsoClient;
use ponte_server::store::{BindUser, BindingStore, FullIdpStore, NewBindUser, SqliteIdpStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_CLIENT_ID: &str = "demo";
pub const TEST_CLIENT_SECRET: &str = "demo-secret";
pub const TEST_REDIRECT_URI: &str = "https://rp.example.com/cb";

pub struct TestServer {
    pub base_url: String,
    pub store: Arc<dyn FullIdpStore>,
    pub config: Arc<AppConfig>,
    _tmp: TempDir,
}

fn test_config(tmp: &TempDir) -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        external_url: "http://localhost:8000".to_string(),
        secret_key: "integration-test-secret".to_string(),
        logging_level: Default::default(),
        db_dir: tmp.path().to_path_buf(),
        bot: BotSettings {
            ws_client_enabled: false,
            ws_server_enabled: false,
            ..Default::default()
        },
        sso: SsoClientSettings::default(),
        provider: ProviderSettings {
            issuer: "http://localhost:8000".to_string(),
            ..Default::default()
        },
        clients: vec![OAuthClientEntry {
            client_id: TEST_CLIENT_ID.to_string(),
            client_secret: TEST_CLIENT_SECRET.to_string(),
            name: "Demo application".to_string(),
            redirect_uris: vec![TEST_REDIRECT_URI.to_string()],
            allowed_scopes: vec![
                "uin".to_string(),
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
                "groups".to_string(),
            ],
        }],
        binding: BindingSettings::default(),
    }
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawns with a config tweak, e.g. pointing the SSO client at a mock
    /// upstream.
    pub async fn spawn_with(mutate: impl FnOnce(&mut AppConfig)) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config(&tmp);
        mutate(&mut config);
        let config = Arc::new(config);
        let store: Arc<dyn FullIdpStore> =
            Arc::new(SqliteIdpStore::new(config.idp_db_path()).unwrap());
        let sso = Arc::new(SsoClient::new(config.sso.clone()).unwrap());
        let provider = Arc::new(OAuthProvider::new(&config));
        let state = ServerState::new(config.clone(), store.clone(), sso, provider);

        let app = make_app(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .unwrap();
        });

        TestServer {
            base_url: format!("http://{}", addr),
            store,
            config,
            _tmp: tmp,
        }
    }

    /// Persists an active binding, as the callback flow would.
    pub fn bind_user(&self, uin: i64, sub: &str) -> BindUser {
        let mut extra = serde_json::Map::new();
        extra.insert("groups".to_string(), serde_json::json!(["admins"]));
        self.store
            .create_bind_user(NewBindUser {
                uin,
                sub: sub.to_string(),
                email: Some("a@x".to_string()),
                preferred_username: Some("alice".to_string()),
                extra_data: Some(extra),
            })
            .unwrap()
    }
}

/// HTTP client that does not follow redirects, so relying-party error
/// redirects can be asserted on.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
