//! Anti-forgery cookie handshake.
//!
//! Before a request goes out, `GET /sanctum/csrf-cookie` is issued and the
//! `XSRF-TOKEN` cookie it sets is echoed back as the `X-XSRF-TOKEN` header.
//! The gateway and the session manager share one `Csrf` so that a token
//! cached in `OncePerSession` mode is reused across both.

use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::client::{TodoClient, XSRF_HEADER};
use crate::config::CsrfHandshake;
use crate::error::ApiError;
use crate::http::{HttpRequest, Transport};

#[derive(Debug)]
pub struct Csrf {
    mode: CsrfHandshake,
    client: TodoClient,
    token: Mutex<Option<String>>,
}

impl Csrf {
    pub fn new(mode: CsrfHandshake, client: TodoClient) -> Self {
        Self {
            mode,
            client,
            token: Mutex::new(None),
        }
    }

    /// Attach the anti-forgery header to `request`, running the handshake
    /// first when the mode requires it.
    pub async fn prepare(&self, transport: &dyn Transport, mut request: HttpRequest) -> Result<HttpRequest, ApiError> {
        let token = match self.mode {
            CsrfHandshake::Disabled => return Ok(request),
            CsrfHandshake::EveryRequest => self.handshake(transport).await?,
            CsrfHandshake::OncePerSession => match self.cached() {
                Some(token) => Some(token),
                None => self.handshake(transport).await?,
            },
        };
        if let Some(token) = token {
            request.set_header(XSRF_HEADER, token);
        }
        Ok(request)
    }

    /// Forget the cached token; the next request performs a new handshake.
    pub fn reset(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached(&self) -> Option<String> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn handshake(&self, transport: &dyn Transport) -> Result<Option<String>, ApiError> {
        let response = transport.execute(self.client.build_csrf_cookie()).await?;
        let token = self.client.parse_csrf_cookie(response)?;
        debug!(has_token = token.is_some(), "csrf handshake completed");
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        Ok(token)
    }
}
