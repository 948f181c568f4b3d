//! Authenticated request pipeline.
//!
//! Every protected call goes through [`ApiGateway::send`]:
//!
//! 1. run the anti-forgery handshake the configured mode asks for,
//! 2. attach the current access token as a bearer credential,
//! 3. on a 401, ask the session manager for a fresh token (single flight)
//!    and re-issue the request exactly once.
//!
//! A failed refresh clears the session and the query cache and surfaces as
//! `ApiError::ReauthenticationRequired`. Every other status is returned to the
//! caller untouched; the `parse_*` methods of [`TodoClient`] normalize it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::QueryCache;
use crate::client::TodoClient;
use crate::csrf::Csrf;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::session::SessionManager;

#[derive(Clone)]
pub struct ApiGateway {
    client: TodoClient,
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    csrf: Arc<Csrf>,
    cache: Arc<QueryCache>,
}

impl ApiGateway {
    pub fn new(
        client: TodoClient,
        transport: Arc<dyn Transport>,
        session: Arc<SessionManager>,
        csrf: Arc<Csrf>,
        cache: Arc<QueryCache>,
    ) -> Self {
        Self {
            client,
            transport,
            session,
            csrf,
            cache,
        }
    }

    pub fn client(&self) -> &TodoClient {
        &self.client
    }

    /// Send with bearer token, refreshing and retrying once on 401.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let token = self.session.access_token();
        let response = self.dispatch(request.clone(), token.as_deref()).await?;
        if response.status != 401 {
            return Ok(response);
        }

        debug!(method = %request.method, url = %request.path, "access token rejected, refreshing");
        let fresh = match self.session.refresh_after(token.as_deref()).await {
            Ok(fresh) => fresh,
            Err(ApiError::ReauthenticationRequired) => {
                warn!("session could not be refreshed, sign-in required");
                self.session.clear();
                self.cache.clear();
                return Err(ApiError::ReauthenticationRequired);
            }
            Err(e) => return Err(e),
        };
        self.dispatch(request, Some(&fresh)).await
    }

    /// Send `request` and decode it with `parse`.
    pub async fn call<T>(
        &self,
        request: Result<HttpRequest, ApiError>,
        parse: fn(&TodoClient, HttpResponse) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let response = self.send(request?).await?;
        parse(&self.client, response)
    }

    /// Untyped request against the API prefix. Any non-2xx status is
    /// normalized into an `ApiError`; an empty body yields `Value::Null`.
    pub async fn request<B: Serialize + ?Sized + Sync>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        params: &[(String, String)],
    ) -> Result<Value, ApiError> {
        let request = self.client.build(method, path, body, params)?;
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    async fn dispatch(&self, request: HttpRequest, token: Option<&str>) -> Result<HttpResponse, ApiError> {
        let mut request = self.csrf.prepare(self.transport.as_ref(), request).await?;
        if let Some(token) = token {
            request.set_header("authorization", format!("Bearer {token}"));
        }
        debug!(method = %request.method, url = %request.path, "sending request");
        let response = self.transport.execute(request).await?;
        debug!(status = response.status, "response received");
        Ok(response)
    }
}
