//! In-memory implementation of the todo REST API.
//!
//! Serves the same routes, status codes and JSON envelopes as the production
//! backend so the client crate can be exercised end to end. Everything lives
//! in one `RwLock`ed [`state::Db`]; nothing is persisted.

pub mod auth;
pub mod categories;
pub mod config;
pub mod error;
pub mod models;
pub mod state;
pub mod todos;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;

pub use config::{ConfigError, ServerConfig};
pub use error::AppError;
pub use models::{Category, PageMeta, Paginated, Todo, TodoStatus, User};
pub use state::{AppState, DEFAULT_CATEGORIES};

pub fn app() -> Router {
    app_with_state(AppState::default())
}

/// Router over a caller-owned state, so tests can reach into the store.
pub fn app_with_state(state: AppState) -> Router {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/user", get(auth::user))
        .route("/todos", get(todos::index).post(todos::store))
        .route(
            "/todos/{id}",
            get(todos::show).put(todos::update).delete(todos::destroy),
        )
        .route("/categories", get(categories::index).post(categories::store))
        .route("/categories/{name}", delete(categories::destroy));

    Router::new()
        .route("/sanctum/csrf-cookie", get(auth::csrf_cookie))
        .nest("/api", api)
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, AppState::default()).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with_state(state)).await
}
