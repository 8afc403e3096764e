use axum::extract::FromRef;

use crate::config::AppConfig;
use crate::provider::OAuthProvider;
use crate::sso::SsoClient;
use crate::store::FullIdpStore;
use std::sync::Arc;
use std::time::Instant;

use super::http_layers::RateLimiter;

pub type GuardedConfig = Arc<AppConfig>;
pub type GuardedIdpStore = Arc<dyn FullIdpStore>;
pub type GuardedSsoClient = Arc<SsoClient>;
pub type GuardedProvider = Arc<OAuthProvider>;
pub type GuardedRateLimiter = Arc<RateLimiter>;

#[derive(Clone)]
pub struct ServerState {
    pub config: GuardedConfig,
    pub store: GuardedIdpStore,
    pub sso: GuardedSsoClient,
    pub provider: GuardedProvider,
    pub rate_limiter: GuardedRateLimiter,
    pub start_time: Instant,
}

impl ServerState {
    pub fn new(
        config: GuardedConfig,
        store: GuardedIdpStore,
        sso: GuardedSsoClient,
        provider: GuardedProvider,
    ) -> Self {
        Self {
            config,
            store,
            sso,
            provider,
            rate_limiter: Arc::new(RateLimiter::new()),
            start_time: Instant::now(),
        }
    }
}

impl FromRef<ServerState> for GuardedConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedIdpStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for GuardedSsoClient {
    fn from_ref(input: &ServerState) -> Self {
        input.sso.clone()
    }
}

impl FromRef<ServerState> for GuardedProvider {
    fn from_ref(input: &ServerState) -> Self {
        input.provider.clone()
    }
}

impl FromRef<ServerState> for GuardedRateLimiter {
    fn from_ref(input: &ServerState) -> Self {
        input.rate_limiter.clone()
    }
}
