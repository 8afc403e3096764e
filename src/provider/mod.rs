//! OAuth 2.0 provider core: client validation, code and token generation,
//! PKCE verification, ID-token minting and claim projection.
//!
//! HTTP concerns live in `server::oauth_routes`; everything here is pure
//! logic over the resolved configuration.

use crate::config::{AppConfig, OAuthClientEntry, ProviderSettings};
use crate::store::BindUser;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Digits and upper-case letters minus the easily confused 0/O/1/I/L.
const VERIFICATION_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Successful `/token` response body.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Constant-time string equality for secrets and PKCE values.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Short human-typed code shown on the authorization page.
pub fn generate_verification_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| VERIFICATION_ALPHABET[rng.random_range(0..VERIFICATION_ALPHABET.len())] as char)
        .collect()
}

/// URL-safe random token with `n_bytes * 8` bits of entropy.
pub fn generate_url_safe_token(n_bytes: usize) -> String {
    let mut rng = rand::rng();
    let bytes: Vec<u8> = (0..n_bytes).map(|_| rng.random()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn generate_state_token() -> String {
    generate_url_safe_token(32)
}

pub fn generate_auth_code() -> String {
    generate_url_safe_token(32)
}

pub fn generate_access_token() -> String {
    generate_url_safe_token(48)
}

pub fn generate_refresh_token() -> String {
    generate_url_safe_token(48)
}

/// PKCE verification per RFC 7636 §4.6.
pub fn verify_pkce(code_verifier: &str, code_challenge: &str, method: &str) -> bool {
    match method {
        "plain" => constant_time_eq(code_verifier, code_challenge),
        "S256" => {
            let digest = Sha256::digest(code_verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            constant_time_eq(&computed, code_challenge)
        }
        _ => false,
    }
}

pub struct OAuthProvider {
    issuer: String,
    secret_key: String,
    pub settings: ProviderSettings,
    clients: Vec<OAuthClientEntry>,
}

impl OAuthProvider {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            issuer: config.provider.issuer.clone(),
            secret_key: config.secret_key.clone(),
            settings: config.provider.clone(),
            clients: config.clients.clone(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn find_client(&self, client_id: &str) -> Option<&OAuthClientEntry> {
        self.clients.iter().find(|c| c.client_id == client_id)
    }

    /// Compares the presented secret against the registered one in constant
    /// time.
    pub fn validate_client_secret(&self, client: &OAuthClientEntry, secret: &str) -> bool {
        constant_time_eq(secret, &client.client_secret)
    }

    /// A redirect URI matches a registered one when scheme, host (including
    /// port) and path are all equal; query and fragment are ignored.
    pub fn redirect_uri_registered(&self, client: &OAuthClientEntry, uri: &str) -> bool {
        if client.redirect_uris.is_empty() {
            return false;
        }
        if client.redirect_uris.iter().any(|u| u == uri) {
            return true;
        }
        let parsed = match reqwest::Url::parse(uri) {
            Ok(u) => u,
            Err(_) => return false,
        };
        client.redirect_uris.iter().any(|allowed| {
            match reqwest::Url::parse(allowed) {
                Ok(a) => {
                    a.scheme() == parsed.scheme()
                        && a.host_str() == parsed.host_str()
                        && a.port_or_known_default() == parsed.port_or_known_default()
                        && a.path() == parsed.path()
                }
                Err(_) => false,
            }
        })
    }

    /// Every requested scope token must be in the client's allow-list.
    pub fn validate_scope(
        &self,
        requested_scope: &str,
        client: &OAuthClientEntry,
    ) -> Result<(), String> {
        for scope in requested_scope.split_whitespace() {
            if !client.allowed_scopes.iter().any(|s| s == scope) {
                return Err(format!("scope '{}' not allowed", scope));
            }
        }
        Ok(())
    }

    pub fn generate_verification_code(&self) -> String {
        generate_verification_code(self.settings.verification_code_length)
    }

    /// HS256 ID token with the claim set projected from the granted scope.
    pub fn generate_id_token(
        &self,
        user: &BindUser,
        client_id: &str,
        scope: &str,
        nonce: Option<&str>,
    ) -> anyhow::Result<String> {
        let now = Utc::now().timestamp();
        let scopes: Vec<&str> = scope.split_whitespace().collect();

        let mut payload = serde_json::Map::new();
        payload.insert("iss".to_string(), serde_json::json!(self.issuer));
        payload.insert(
            "sub".to_string(),
            serde_json::json!(if user.sub.is_empty() {
                user.uin.to_string()
            } else {
                user.sub.clone()
            }),
        );
        payload.insert("aud".to_string(), serde_json::json!(client_id));
        payload.insert("iat".to_string(), serde_json::json!(now));
        payload.insert(
            "exp".to_string(),
            serde_json::json!(now + self.settings.access_token_expire_secs),
        );
        payload.insert("uin".to_string(), serde_json::json!(user.uin));

        if scopes.contains(&"email") {
            if let Some(email) = &user.email {
                payload.insert("email".to_string(), serde_json::json!(email));
                let verified = user
                    .extra_data
                    .as_ref()
                    .and_then(|e| e.get("email_verified"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                payload.insert("email_verified".to_string(), serde_json::json!(verified));
            }
        }

        if scopes.contains(&"profile") || scopes.contains(&"preferred_username") {
            if let Some(username) = &user.preferred_username {
                payload.insert(
                    "preferred_username".to_string(),
                    serde_json::json!(username),
                );
            }
        }
        if scopes.contains(&"profile") {
            if let Some(extra) = &user.extra_data {
                for claim in ["nickname", "name"] {
                    if let Some(value) = extra.get(claim) {
                        payload.insert(claim.to_string(), value.clone());
                    }
                }
            }
        }

        if let Some(nonce) = nonce {
            payload.insert("nonce".to_string(), serde_json::json!(nonce));
        }

        let token = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(self.secret_key.as_bytes()),
        )?;
        Ok(token)
    }

    /// Mints a fresh access/refresh pair; the ID token is included iff
    /// `openid` is in the granted scope.
    pub fn create_token_response(
        &self,
        user: &BindUser,
        client_id: &str,
        scope: &str,
        nonce: Option<&str>,
    ) -> anyhow::Result<TokenResponse> {
        let access_token = generate_access_token();
        let refresh_token = Some(generate_refresh_token());

        let id_token = if scope.split_whitespace().any(|s| s == "openid") {
            Some(self.generate_id_token(user, client_id, scope, nonce)?)
        } else {
            None
        };

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.settings.access_token_expire_secs,
            refresh_token,
            scope: scope.to_string(),
            id_token,
        })
    }

    /// Scope-filtered userinfo claims: the ID-token table minus JWT framing,
    /// plus any extra_data key whose name matches a granted scope token.
    pub fn user_claims(
        &self,
        scope: &str,
        user: &BindUser,
    ) -> serde_json::Map<String, serde_json::Value> {
        let scopes: Vec<&str> = scope.split_whitespace().collect();
        let mut claims = serde_json::Map::new();

        if scopes.contains(&"uin") {
            claims.insert("uin".to_string(), serde_json::json!(user.uin));
        }
        if scopes.contains(&"openid") {
            let sub = if user.sub.is_empty() {
                user.uin.to_string()
            } else {
                user.sub.clone()
            };
            claims.insert("sub".to_string(), serde_json::json!(sub));
        }
        if scopes.contains(&"email") {
            if let Some(email) = &user.email {
                claims.insert("email".to_string(), serde_json::json!(email));
            }
        }
        if scopes.contains(&"profile") || scopes.contains(&"preferred_username") {
            if let Some(username) = &user.preferred_username {
                claims.insert(
                    "preferred_username".to_string(),
                    serde_json::json!(username),
                );
            }
        }

        if let Some(extra) = &user.extra_data {
            for scope in &scopes {
                if let Some(value) = extra.get(*scope) {
                    claims
                        .entry(scope.to_string())
                        .or_insert_with(|| value.clone());
                }
            }
        }

        claims
    }
}
