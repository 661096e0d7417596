use std::sync::Arc;
use std::time::Duration;

use parley_auth::{AuthManager, AuthState};
use parley_broker::Broker;
use parley_config::{Config, UPSTREAM_TIMEOUT_SECS};

use crate::connections::ConnectionTable;

/// Shared dependencies of the gateway: HTTP proxying, the socket layer and
/// the broker consumer all hang off this.
#[derive(Clone)]
pub struct GatewayContext {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub broker: Broker,
    pub connections: Arc<ConnectionTable>,
    pub http: reqwest::Client,
}

impl GatewayContext {
    pub fn new(
        config: Arc<Config>,
        auth: Arc<AuthManager>,
        broker: Broker,
        connections: Arc<ConnectionTable>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .expect("failed to build HTTP client");

        Self {
            config,
            auth,
            broker,
            connections,
            http,
        }
    }
}

impl AuthState for GatewayContext {
    fn auth_manager(&self) -> &AuthManager {
        &self.auth
    }
}
