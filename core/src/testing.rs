//! Scripted transport and fixtures shared by the unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::app::TodoApp;
use crate::config::{ClientConfig, CsrfHandshake};
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::session::{MemoryTokenStore, Session};

type Reply = Pin<Box<dyn Future<Output = Result<HttpResponse, ApiError>> + Send>>;
type Handler = Box<dyn Fn(HttpRequest) -> Reply + Send + Sync>;

pub(crate) const BASE_URL: &str = "http://api.test";

/// Transport that records every request and answers with a closure.
pub(crate) struct FakeTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub(crate) fn new<F, Fut>(handler: F) -> Arc<Self>
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, ApiError>> + Send + 'static,
    {
        Arc::new(Self {
            handler: Box::new(move |req| Box::pin(handler(req))),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of recorded requests hitting `method path` (query ignored).
    pub(crate) fn count(&self, method: HttpMethod, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| endpoint(r) == (method, path.to_string()))
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request).await
    }
}

/// Method and path of a request, without origin or query string.
pub(crate) fn endpoint(request: &HttpRequest) -> (HttpMethod, String) {
    let without_scheme = request
        .path
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(&request.path);
    let path = without_scheme
        .find('/')
        .map(|i| &without_scheme[i..])
        .unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path);
    (request.method, path.to_string())
}

pub(crate) fn empty(status: u16) -> HttpResponse {
    HttpResponse {
        status,
        headers: Vec::new(),
        body: String::new(),
    }
}

pub(crate) fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.to_string(),
    }
}

pub(crate) fn todo_json(id: Uuid, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "description": null,
        "status": "pending",
        "category": "General",
        "due_date": null,
        "created_at": "2025-05-13T14:00:00Z",
        "updated_at": "2025-05-13T14:00:00Z",
    })
}

pub(crate) fn page_json(todos: Vec<Value>, page: u64, per_page: u64) -> Value {
    let total = todos.len() as u64;
    json!({
        "data": todos,
        "meta": {
            "total": total,
            "current_page": page,
            "last_page": total.div_ceil(per_page).max(1),
            "per_page": per_page,
        }
    })
}

pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        csrf: CsrfHandshake::Disabled,
        ..ClientConfig::new(BASE_URL)
    }
}

/// App with an established session (`access-1` / `refresh-1`).
pub(crate) fn signed_in_app(transport: Arc<FakeTransport>) -> TodoApp {
    let store = Arc::new(MemoryTokenStore::with_session(Session::new("access-1", "refresh-1")));
    let app = TodoApp::new(test_config(), transport, store);
    app.restore().unwrap();
    app
}
