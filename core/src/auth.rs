//! Sign-in, sign-up, sign-out and the cached current user.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cache::QueryCache;
use crate::client::TodoClient;
use crate::error::ApiError;
use crate::gateway::ApiGateway;
use crate::notify::Notifier;
use crate::session::SessionManager;
use crate::types::{LoginCredentials, RegisterCredentials, User};
use crate::validation;

#[derive(Clone)]
pub struct AuthService {
    session: Arc<SessionManager>,
    gateway: ApiGateway,
    cache: Arc<QueryCache>,
    notifier: Notifier,
    user_stale_time: Duration,
}

impl AuthService {
    pub fn new(
        session: Arc<SessionManager>,
        gateway: ApiGateway,
        cache: Arc<QueryCache>,
        notifier: Notifier,
        user_stale_time: Duration,
    ) -> Self {
        Self {
            session,
            gateway,
            cache,
            notifier,
            user_stale_time,
        }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<User, ApiError> {
        validation::validate_login(credentials)?;
        match self.session.login(credentials).await {
            Ok(auth) => {
                self.start_session(&auth.user);
                self.notifier.success("Logged in successfully");
                Ok(auth.user)
            }
            Err(err) => {
                self.notifier.failure(login_failure(&err));
                Err(err)
            }
        }
    }

    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<User, ApiError> {
        validation::validate_register(credentials)?;
        match self.session.register(credentials).await {
            Ok(auth) => {
                self.start_session(&auth.user);
                self.notifier.success("Account created successfully");
                Ok(auth.user)
            }
            Err(err) => {
                self.notifier.failure(format!("Registration failed: {}", err.message()));
                Err(err)
            }
        }
    }

    /// Revoke the tokens server side if possible, then drop every local
    /// credential and cached query regardless of the outcome.
    pub async fn logout(&self) {
        if self.session.is_authenticated() {
            let request = self.gateway.client().build_logout();
            if let Err(err) = self.gateway.call(Ok(request), TodoClient::parse_logout).await {
                warn!(error = %err, "server logout failed, clearing local session anyway");
            }
        }
        self.session.clear();
        self.cache.clear();
        info!("logged out");
    }

    /// The signed-in user, or `None` without a usable session.
    ///
    /// A 401 that survives the refresh attempt drops only the access token;
    /// the next call goes through the refresh path again.
    pub async fn current_user(&self) -> Result<Option<User>, ApiError> {
        if !self.session.is_authenticated() {
            return Ok(None);
        }
        let ticket = {
            let stores = self.cache.lock();
            if stores.user.is_fresh(&(), self.user_stale_time) {
                if let Some(user) = stores.user.get(&()) {
                    return Ok(Some(user.clone()));
                }
            }
            stores.user.ticket(&())
        };

        let request = self.gateway.client().build_current_user();
        match self.gateway.call(Ok(request), TodoClient::parse_current_user).await {
            Ok(user) => {
                self.cache.lock().user.commit_fetch((), user.clone(), ticket);
                Ok(Some(user))
            }
            Err(ApiError::Unauthenticated { .. }) => {
                self.session.clear_access_token();
                self.cache.lock().user.remove(&());
                Ok(None)
            }
            Err(ApiError::ReauthenticationRequired) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    fn start_session(&self, user: &User) {
        self.cache.clear();
        self.cache.lock().user.put((), user.clone());
    }
}

fn login_failure(err: &ApiError) -> String {
    match err {
        ApiError::InvalidCredentials => "Invalid email or password".to_string(),
        other => format!("Login failed: {}", other.message()),
    }
}
