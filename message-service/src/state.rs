use std::sync::Arc;

use parley_auth::{AuthManager, AuthState};
use parley_broker::Broker;
use parley_config::Config;

use crate::store::MessageStore;

/// Shared dependencies of every message-service handler and task.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub store: Arc<MessageStore>,
    pub broker: Broker,
}

impl AuthState for ServiceContext {
    fn auth_manager(&self) -> &AuthManager {
        &self.auth
    }
}
