//! Stateless HTTP request builder and response parser for the todo API.
//!
//! # Design
//! `TodoClient` holds only the server origin and API prefix and carries no
//! mutable state between calls. Each endpoint is split into a `build_*`
//! method that produces an `HttpRequest` and a `parse_*` method that consumes
//! an `HttpResponse`. Tokens, CSRF headers and retries are layered on top by
//! the gateway and the session manager, so everything here stays
//! deterministic.

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::query::{encode_pairs, encode_segment, TodoQuery};
use crate::types::{
    AuthResponse, Category, CreateTodo, DataEnvelope, LoginCredentials, NewCategory,
    RegisterCredentials, Todo, TodoPage, TokenPair, UpdateTodo, User, UserEnvelope,
};

/// Cookie set by the anti-forgery handshake.
pub const XSRF_COOKIE: &str = "XSRF-TOKEN";
/// Header echoing the anti-forgery cookie.
pub const XSRF_HEADER: &str = "x-xsrf-token";

/// Synchronous, stateless client for the todo API.
#[derive(Debug, Clone)]
pub struct TodoClient {
    base_url: String,
    api_prefix: String,
}

impl TodoClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_prefix(base_url, "/api")
    }

    pub fn with_prefix(base_url: &str, api_prefix: &str) -> Self {
        let prefix = api_prefix.trim_end_matches('/');
        let api_prefix = if prefix.is_empty() || prefix.starts_with('/') {
            prefix.to_string()
        } else {
            format!("/{prefix}")
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_prefix,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::with_prefix(&config.base_url, &config.api_prefix)
    }

    /// Absolute URL of an API path such as `/todos`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.api_prefix, path)
    }

    /// Generic request against the API prefix. `params` are appended as a
    /// query string; `body` is serialized as JSON.
    pub fn build<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&B>,
        params: &[(String, String)],
    ) -> Result<HttpRequest, ApiError> {
        let mut url = self.api_url(path);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&encode_pairs(params));
        }
        let mut request = base_request(method, url);
        if let Some(body) = body {
            let json = serde_json::to_string(body).map_err(|e| ApiError::SerializationError(e.to_string()))?;
            request.set_header("content-type", "application/json");
            request.body = Some(json);
        }
        Ok(request)
    }

    fn build_empty(&self, method: HttpMethod, path: &str) -> HttpRequest {
        base_request(method, self.api_url(path))
    }

    // -----------------------------------------------------------------------
    // Auth
    // -----------------------------------------------------------------------

    /// The anti-forgery handshake lives outside the API prefix.
    pub fn build_csrf_cookie(&self) -> HttpRequest {
        base_request(HttpMethod::Get, format!("{}/sanctum/csrf-cookie", self.base_url))
    }

    pub fn build_login(&self, credentials: &LoginCredentials) -> Result<HttpRequest, ApiError> {
        self.build(HttpMethod::Post, "/auth/login", Some(credentials), &[])
    }

    pub fn build_register(&self, credentials: &RegisterCredentials) -> Result<HttpRequest, ApiError> {
        self.build(HttpMethod::Post, "/auth/register", Some(credentials), &[])
    }

    pub fn build_refresh(&self, refresh_token: &str) -> Result<HttpRequest, ApiError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.build(HttpMethod::Post, "/auth/refresh", Some(&body), &[])
    }

    pub fn build_logout(&self) -> HttpRequest {
        self.build_empty(HttpMethod::Post, "/auth/logout")
    }

    pub fn build_current_user(&self) -> HttpRequest {
        self.build_empty(HttpMethod::Get, "/auth/user")
    }

    /// Returns the anti-forgery token, if the server set one.
    pub fn parse_csrf_cookie(&self, response: HttpResponse) -> Result<Option<String>, ApiError> {
        if !response.is_success() {
            return Err(ApiError::from_response(&response));
        }
        Ok(response.cookie(XSRF_COOKIE))
    }

    pub fn parse_login(&self, response: HttpResponse) -> Result<AuthResponse, ApiError> {
        if response.status == 401 {
            return Err(ApiError::InvalidCredentials);
        }
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_register(&self, response: HttpResponse) -> Result<AuthResponse, ApiError> {
        check_status(&response, 201)?;
        decode(&response.body)
    }

    /// A rejected refresh token (401, or a malformed request) is reported as
    /// `InvalidRefreshToken`; other failures keep their normalized form.
    pub fn parse_refresh(&self, response: HttpResponse) -> Result<TokenPair, ApiError> {
        if matches!(response.status, 400 | 401 | 422) {
            return Err(ApiError::InvalidRefreshToken);
        }
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_logout(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 200)
    }

    pub fn parse_current_user(&self, response: HttpResponse) -> Result<User, ApiError> {
        check_status(&response, 200)?;
        decode::<UserEnvelope>(&response.body).map(|e| e.user)
    }

    // -----------------------------------------------------------------------
    // Todos
    // -----------------------------------------------------------------------

    pub fn build_list_todos(&self, query: &TodoQuery) -> HttpRequest {
        let mut request = self.build_empty(HttpMethod::Get, "/todos");
        request.path.push('?');
        request.path.push_str(&encode_pairs(&query.to_pairs()));
        request
    }

    pub fn build_get_todo(&self, id: Uuid) -> HttpRequest {
        self.build_empty(HttpMethod::Get, &format!("/todos/{id}"))
    }

    pub fn build_create_todo(&self, input: &CreateTodo) -> Result<HttpRequest, ApiError> {
        self.build(HttpMethod::Post, "/todos", Some(input), &[])
    }

    pub fn build_update_todo(&self, id: Uuid, input: &UpdateTodo) -> Result<HttpRequest, ApiError> {
        self.build(HttpMethod::Put, &format!("/todos/{id}"), Some(input), &[])
    }

    pub fn build_delete_todo(&self, id: Uuid) -> HttpRequest {
        self.build_empty(HttpMethod::Delete, &format!("/todos/{id}"))
    }

    pub fn parse_list_todos(&self, response: HttpResponse) -> Result<TodoPage, ApiError> {
        check_status(&response, 200)?;
        decode(&response.body)
    }

    pub fn parse_get_todo(&self, response: HttpResponse) -> Result<Todo, ApiError> {
        check_status(&response, 200)?;
        decode::<DataEnvelope<Todo>>(&response.body).map(|e| e.data)
    }

    pub fn parse_create_todo(&self, response: HttpResponse) -> Result<Todo, ApiError> {
        check_status(&response, 201)?;
        decode::<DataEnvelope<Todo>>(&response.body).map(|e| e.data)
    }

    pub fn parse_update_todo(&self, response: HttpResponse) -> Result<Todo, ApiError> {
        check_status(&response, 200)?;
        decode::<DataEnvelope<Todo>>(&response.body).map(|e| e.data)
    }

    pub fn parse_delete_todo(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 200)
    }

    // -----------------------------------------------------------------------
    // Categories
    // -----------------------------------------------------------------------

    pub fn build_list_categories(&self) -> HttpRequest {
        self.build_empty(HttpMethod::Get, "/categories")
    }

    pub fn build_add_category(&self, input: &NewCategory) -> Result<HttpRequest, ApiError> {
        self.build(HttpMethod::Post, "/categories", Some(input), &[])
    }

    pub fn build_delete_category(&self, name: &str) -> HttpRequest {
        self.build_empty(HttpMethod::Delete, &format!("/categories/{}", encode_segment(name)))
    }

    pub fn parse_list_categories(&self, response: HttpResponse) -> Result<Vec<String>, ApiError> {
        check_status(&response, 200)?;
        decode::<DataEnvelope<Vec<String>>>(&response.body).map(|e| e.data)
    }

    pub fn parse_add_category(&self, response: HttpResponse) -> Result<Category, ApiError> {
        check_status(&response, 201)?;
        decode::<DataEnvelope<Category>>(&response.body).map(|e| e.data)
    }

    pub fn parse_delete_category(&self, response: HttpResponse) -> Result<(), ApiError> {
        check_status(&response, 200)
    }
}

fn base_request(method: HttpMethod, path: String) -> HttpRequest {
    HttpRequest {
        method,
        path,
        headers: vec![
            ("accept".to_string(), "application/json".to_string()),
            ("x-requested-with".to_string(), "XMLHttpRequest".to_string()),
        ],
        body: None,
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::DeserializationError(e.to_string()))
}

/// Map any status other than `expected` to the appropriate `ApiError`.
fn check_status(response: &HttpResponse, expected: u16) -> Result<(), ApiError> {
    if response.status == expected {
        return Ok(());
    }
    Err(ApiError::from_response(response))
}
