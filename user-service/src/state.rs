use std::sync::Arc;

use parley_auth::{AuthManager, AuthState};
use parley_config::Config;

use crate::store::UserStore;

/// Shared dependencies of every user-service handler.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<Config>,
    pub auth: Arc<AuthManager>,
    pub store: Arc<UserStore>,
}

impl AuthState for ServiceContext {
    fn auth_manager(&self) -> &AuthManager {
        &self.auth
    }
}
