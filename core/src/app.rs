//! Composition root wiring one session, one cache and the services.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::auth::AuthService;
use crate::cache::QueryCache;
use crate::categories::CategoryService;
use crate::client::TodoClient;
use crate::config::{ClientConfig, ConfigError};
use crate::csrf::Csrf;
use crate::error::ApiError;
use crate::gateway::ApiGateway;
use crate::http::Transport;
use crate::notify::{Notice, Notifier};
use crate::session::{AuthState, SessionManager, TokenStore};
use crate::todos::TodoService;

/// Cheap to clone; clones share the same session and cache.
#[derive(Clone)]
pub struct TodoApp {
    config: Arc<ClientConfig>,
    session: Arc<SessionManager>,
    cache: Arc<QueryCache>,
    notifier: Notifier,
    gateway: ApiGateway,
    auth: AuthService,
    todos: TodoService,
    categories: CategoryService,
}

impl TodoApp {
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, store: Arc<dyn TokenStore>) -> Self {
        let client = TodoClient::from_config(&config);
        let csrf = Arc::new(Csrf::new(config.csrf, client.clone()));
        let session = Arc::new(SessionManager::new(
            client.clone(),
            transport.clone(),
            csrf.clone(),
            store,
        ));
        let cache = Arc::new(QueryCache::new());
        let notifier = Notifier::default();
        let gateway = ApiGateway::new(client, transport, session.clone(), csrf, cache.clone());

        let auth = AuthService::new(
            session.clone(),
            gateway.clone(),
            cache.clone(),
            notifier.clone(),
            config.user_stale_time,
        );
        let todos = TodoService::new(
            gateway.clone(),
            cache.clone(),
            notifier.clone(),
            config.todos_stale_time,
            config.default_per_page,
        );
        let categories = CategoryService::new(
            gateway.clone(),
            cache.clone(),
            notifier.clone(),
            config.categories_stale_time,
            config.protected_categories.clone(),
        );

        Self {
            config: Arc::new(config),
            session,
            cache,
            notifier,
            gateway,
            auth,
            todos,
            categories,
        }
    }

    /// Configuration from `TODO_*` environment variables.
    pub fn from_env(transport: Arc<dyn Transport>, store: Arc<dyn TokenStore>) -> Result<Self, ConfigError> {
        Ok(Self::new(ClientConfig::from_env()?, transport, store))
    }

    /// Restore persisted tokens. Call once before the first request.
    pub fn restore(&self) -> Result<AuthState, ApiError> {
        self.session.restore()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn todos(&self) -> &TodoService {
        &self.todos
    }

    pub fn categories(&self) -> &CategoryService {
        &self.categories
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.gateway
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }
}
