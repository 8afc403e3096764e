//! Relying-party client for the upstream SSO provider.
//!
//! Used by the binding flow: builds the upstream authorization URL, exchanges
//! the callback code for tokens and fetches userinfo. Endpoints come from
//! `.well-known` discovery (cached per URL for the process lifetime) or from
//! manual configuration.

use crate::config::SsoClientSettings;
use anyhow::{Context, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{error, info};

/// Endpoints resolved from discovery or manual configuration.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub authorization_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

/// Claims returned by the upstream userinfo endpoint.
///
/// `raw_data` carries the unparsed claim document so the binding step can
/// project configured stored_fields into `extra_data`.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub nickname: Option<String>,
    pub raw_data: serde_json::Map<String, serde_json::Value>,
}

impl UserInfo {
    fn from_json(data: serde_json::Value) -> Self {
        let raw_data = data.as_object().cloned().unwrap_or_default();
        Self {
            sub: data
                .get("sub")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            email: data
                .get("email")
                .and_then(|v| v.as_str())
                .map(String::from),
            email_verified: data.get("email_verified").and_then(|v| v.as_bool()),
            name: data.get("name").and_then(|v| v.as_str()).map(String::from),
            preferred_username: data
                .get("preferred_username")
                .and_then(|v| v.as_str())
                .map(String::from),
            nickname: data
                .get("nickname")
                .and_then(|v| v.as_str())
                .map(String::from),
            raw_data,
        }
    }
}

pub struct SsoClient {
    settings: SsoClientSettings,
    http: reqwest::Client,
    /// Discovery documents keyed by URL; written once, read many.
    wellknown_cache: RwLock<HashMap<String, serde_json::Value>>,
}

impl SsoClient {
    pub fn new(settings: SsoClientSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create SSO HTTP client")?;
        Ok(Self {
            settings,
            http,
            wellknown_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &SsoClientSettings {
        &self.settings
    }

    async fn fetch_wellknown(&self, url: &str) -> Option<serde_json::Value> {
        {
            let cache = self.wellknown_cache.read().await;
            if let Some(doc) = cache.get(url) {
                return Some(doc.clone());
            }
        }

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                error!("Failed to fetch discovery document from {}: {}", url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            error!(
                "Discovery document fetch from {} returned {}",
                url,
                response.status()
            );
            return None;
        }
        let doc: serde_json::Value = match response.json().await {
            Ok(d) => d,
            Err(e) => {
                error!("Malformed discovery document from {}: {}", url, e);
                return None;
            }
        };

        for required in ["authorization_endpoint", "token_endpoint"] {
            if doc.get(required).and_then(|v| v.as_str()).is_none() {
                error!("Discovery document from {} is missing {}", url, required);
                return None;
            }
        }

        info!("Fetched OIDC discovery document from {}", url);
        let mut cache = self.wellknown_cache.write().await;
        cache.entry(url.to_string()).or_insert_with(|| doc.clone());
        Some(doc)
    }

    /// Resolves endpoints from discovery when enabled, falling back to the
    /// manually configured URLs.
    pub async fn endpoints(&self) -> Endpoints {
        if self.settings.use_discovery && !self.settings.discovery_url.is_empty() {
            if let Some(doc) = self.fetch_wellknown(&self.settings.discovery_url).await {
                let get = |key: &str| {
                    doc.get(key)
                        .and_then(|v| v.as_str())
                        .map(String::from)
                };
                return Endpoints {
                    authorization_url: get("authorization_endpoint")
                        .unwrap_or_else(|| self.settings.authorization_url.clone()),
                    token_url: get("token_endpoint")
                        .unwrap_or_else(|| self.settings.token_url.clone()),
                    userinfo_url: get("userinfo_endpoint")
                        .unwrap_or_else(|| self.settings.userinfo_url.clone()),
                };
            }
        }
        Endpoints {
            authorization_url: self.settings.authorization_url.clone(),
            token_url: self.settings.token_url.clone(),
            userinfo_url: self.settings.userinfo_url.clone(),
        }
    }

    /// Fully-constructed upstream authorization URL for a fresh bind state.
    pub async fn build_authorization_url(&self, state: &str) -> String {
        let endpoints = self.endpoints().await;
        build_authorization_url(
            &endpoints.authorization_url,
            &self.settings.client_id,
            &self.settings.redirect_uri,
            &self.settings.scope,
            state,
        )
    }

    /// Exchanges a callback code for tokens. Returns None on any failure so
    /// the pending bind stays intact for a retry.
    pub async fn exchange_code(&self, code: &str) -> Option<serde_json::Value> {
        let endpoints = self.endpoints().await;
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];

        let response = match self
            .http
            .post(&endpoints.token_url)
            .form(&form)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Upstream token exchange failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            error!("Upstream token exchange returned {}", response.status());
            return None;
        }

        match response.json().await {
            Ok(data) => Some(data),
            Err(e) => {
                error!("Malformed upstream token response: {}", e);
                None
            }
        }
    }

    pub async fn get_userinfo(&self, access_token: &str) -> Option<UserInfo> {
        let endpoints = self.endpoints().await;
        let response = match self
            .http
            .get(&endpoints.userinfo_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!("Upstream userinfo fetch failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            error!("Upstream userinfo fetch returned {}", response.status());
            return None;
        }

        match response.json::<serde_json::Value>().await {
            Ok(data) => Some(UserInfo::from_json(data)),
            Err(e) => {
                error!("Malformed upstream userinfo response: {}", e);
                None
            }
        }
    }

    /// The full binding exchange: code -> tokens -> userinfo.
    pub async fn exchange_and_get_userinfo(&self, code: &str) -> Option<UserInfo> {
        let token_data = self.exchange_code(code).await?;
        let access_token = match token_data.get("access_token").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => {
                error!("Upstream token response carried no access_token");
                return None;
            }
        };
        self.get_userinfo(access_token).await
    }
}

/// Builds the upstream authorization URL with the standard query parameters.
pub fn build_authorization_url(
    endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
        endpoint,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(scope),
        urlencoding::encode(state),
    )
}
