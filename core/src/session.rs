//! Auth session manager.
//!
//! # Overview
//! Owns the access/refresh token pair, persists it through a [`TokenStore`],
//! and publishes the authentication state on a `watch` channel:
//!
//! ```text
//! Unauthenticated -> Authenticating -> Authenticated -> Refreshing -> Authenticated
//!                                                                  \-> Unauthenticated
//! ```
//!
//! # Design
//! - The session is an explicit object shared via `Arc`, initialised with
//!   [`SessionManager::restore`] and torn down with [`SessionManager::clear`].
//! - Refresh tokens are single use. Every exchange goes through one async
//!   lock, and [`SessionManager::refresh_after`] skips the network entirely
//!   when another caller already replaced the rejected access token, so any
//!   number of concurrent 401s produce exactly one refresh request.
//! - An invalid or expired refresh token clears every local credential.
//!   Transient failures (no response, 5xx) keep the session so a later
//!   request can try again.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::TodoClient;
use crate::csrf::Csrf;
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse, Transport};
use crate::types::{AuthResponse, LoginCredentials, RegisterCredentials};

/// Tokens of one signed-in session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// `None` after the server rejected it; the refresh path recovers.
    pub access_token: Option<String>,
    pub refresh_token: String,
}

impl Session {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

// ---------------------------------------------------------------------------
// Token persistence
// ---------------------------------------------------------------------------

/// Where tokens survive between process runs.
pub trait TokenStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, ApiError>;
    fn save(&self, session: &Session) -> Result<(), ApiError>;
    fn clear(&self) -> Result<(), ApiError>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: Mutex<Option<Session>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<Session>, ApiError> {
        Ok(self.slot().clone())
    }

    fn save(&self, session: &Session) -> Result<(), ApiError> {
        *self.slot() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), ApiError> {
        *self.slot() = None;
        Ok(())
    }
}

/// Tokens stored as a small JSON document on disk.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<Session>, ApiError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ApiError::Storage(e.to_string())),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ApiError::Storage(format!("{}: {e}", self.path.display())))
    }

    fn save(&self, session: &Session) -> Result<(), ApiError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ApiError::Storage(e.to_string()))?;
        }
        let json = serde_json::to_string(session).map_err(|e| ApiError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| ApiError::Storage(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| ApiError::Storage(e.to_string()))
    }

    fn clear(&self) -> Result<(), ApiError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Storage(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Session manager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    client: TodoClient,
    transport: Arc<dyn Transport>,
    csrf: Arc<Csrf>,
    store: Arc<dyn TokenStore>,
    session: Mutex<Option<Session>>,
    refresh_lock: tokio::sync::Mutex<()>,
    state: watch::Sender<AuthState>,
}

impl SessionManager {
    pub fn new(
        client: TodoClient,
        transport: Arc<dyn Transport>,
        csrf: Arc<Csrf>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let (state, _) = watch::channel(AuthState::Unauthenticated);
        Self {
            client,
            transport,
            csrf,
            store,
            session: Mutex::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            state,
        }
    }

    /// Load persisted tokens. Call once at startup.
    pub fn restore(&self) -> Result<AuthState, ApiError> {
        let loaded = self.store.load()?;
        let state = if loaded.is_some() {
            AuthState::Authenticated
        } else {
            AuthState::Unauthenticated
        };
        debug!(?state, "session restored from token store");
        *self.slot() = loaded;
        self.set_state(state);
        Ok(state)
    }

    pub fn state(&self) -> AuthState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change, e.g. to redirect to the
    /// sign-in screen on `Unauthenticated`.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.slot().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.slot().as_ref().and_then(|s| s.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.slot().is_some()
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthResponse, ApiError> {
        info!(email = %credentials.email, "logging in");
        let previous = self.state();
        self.set_state(AuthState::Authenticating);
        let result = match self.client.build_login(credentials) {
            Ok(request) => self
                .send_public(request)
                .await
                .and_then(|r| self.client.parse_login(r)),
            Err(e) => Err(e),
        };
        match result {
            Ok(auth) => {
                self.install(Session::new(&auth.access_token, &auth.refresh_token));
                Ok(auth)
            }
            Err(err) => {
                warn!(error = %err, "login failed, previous session kept");
                self.set_state(previous);
                Err(err)
            }
        }
    }

    pub async fn register(&self, credentials: &RegisterCredentials) -> Result<AuthResponse, ApiError> {
        info!(email = %credentials.email, "registering");
        let previous = self.state();
        self.set_state(AuthState::Authenticating);
        let result = match self.client.build_register(credentials) {
            Ok(request) => self
                .send_public(request)
                .await
                .and_then(|r| self.client.parse_register(r)),
            Err(e) => Err(e),
        };
        match result {
            Ok(auth) => {
                self.install(Session::new(&auth.access_token, &auth.refresh_token));
                Ok(auth)
            }
            Err(err) => {
                warn!(error = %err, "registration failed");
                self.set_state(previous);
                Err(err)
            }
        }
    }

    /// Exchange `refresh_token` for a new pair. The presented token is
    /// consumed by the server whether or not this call succeeds locally.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        self.exchange(refresh_token).await
    }

    /// Single-flight recovery after the server rejected `rejected` with 401.
    ///
    /// Returns the access token to retry with. If a concurrent caller has
    /// already rotated the session, its token is returned without another
    /// exchange. Fails with `ReauthenticationRequired` once the session is
    /// gone.
    pub async fn refresh_after(&self, rejected: Option<&str>) -> Result<String, ApiError> {
        let _guard = self.refresh_lock.lock().await;
        let Some(session) = self.session() else {
            return Err(ApiError::ReauthenticationRequired);
        };
        if let Some(current) = session.access_token.as_deref() {
            if Some(current) != rejected {
                debug!("access token already refreshed by a concurrent request");
                return Ok(current.to_string());
            }
        }
        match self.exchange(&session.refresh_token).await {
            Ok(fresh) => fresh.access_token.ok_or(ApiError::ReauthenticationRequired),
            Err(err) if is_transient(&err) => Err(err),
            Err(_) => Err(ApiError::ReauthenticationRequired),
        }
    }

    /// Drop the access token but keep the refresh token, so the next request
    /// goes through the refresh path instead of a full sign-in.
    pub fn clear_access_token(&self) {
        let snapshot = {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(session) => {
                    session.access_token = None;
                    session.clone()
                }
                None => return,
            }
        };
        debug!("access token cleared");
        self.persist(&snapshot);
    }

    /// Forget every local credential.
    pub fn clear(&self) {
        *self.slot() = None;
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear token store");
        }
        self.csrf.reset();
        self.set_state(AuthState::Unauthenticated);
    }

    async fn exchange(&self, refresh_token: &str) -> Result<Session, ApiError> {
        self.set_state(AuthState::Refreshing);
        let result = match self.client.build_refresh(refresh_token) {
            Ok(request) => self
                .transport
                .execute(request)
                .await
                .and_then(|r| self.client.parse_refresh(r)),
            Err(e) => Err(e),
        };
        match result {
            Ok(pair) => {
                let session = Session::new(pair.access_token, pair.refresh_token);
                self.install(session.clone());
                info!("session refreshed");
                Ok(session)
            }
            Err(err) if is_transient(&err) => {
                warn!(error = %err, "refresh did not complete, keeping session");
                let state = if self.is_authenticated() {
                    AuthState::Authenticated
                } else {
                    AuthState::Unauthenticated
                };
                self.set_state(state);
                Err(err)
            }
            Err(err) => {
                warn!(error = %err, "refresh rejected, clearing session");
                self.clear();
                Err(err)
            }
        }
    }

    async fn send_public(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let request = self.csrf.prepare(self.transport.as_ref(), request).await?;
        self.transport.execute(request).await
    }

    fn install(&self, session: Session) {
        *self.slot() = Some(session.clone());
        self.persist(&session);
        self.set_state(AuthState::Authenticated);
    }

    fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save(session) {
            warn!(error = %e, "failed to persist session");
        }
    }

    fn set_state(&self, state: AuthState) {
        self.state.send_replace(state);
    }

    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn is_transient(err: &ApiError) -> bool {
    matches!(err, ApiError::Network(_) | ApiError::Server { .. })
}
