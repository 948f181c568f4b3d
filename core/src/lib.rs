//! Client core for the todo service: session, request pipeline and an
//! optimistic query cache.
//!
//! # Overview
//! `TodoClient` builds `HttpRequest` values and parses `HttpResponse` values
//! without touching the network. Everything stateful sits on top of it:
//!
//! - [`session::SessionManager`] owns the access/refresh token pair and
//!   performs single-flight refreshes.
//! - [`gateway::ApiGateway`] attaches credentials and retries once after a
//!   401.
//! - [`cache::QueryCache`] keeps list and detail results, and the services
//!   in [`todos`], [`categories`] and [`auth`] apply optimistic overlays to
//!   it around every mutation.
//!
//! # Design
//! - The host owns I/O. It implements [`http::Transport`] for whichever HTTP
//!   client it uses; the crate never opens a socket.
//! - [`app::TodoApp`] wires one session, one cache and the services
//!   together. Clones share state.
//! - DTOs are defined independently from the mock-server crate; integration
//!   tests catch schema drift.

pub mod app;
pub mod auth;
pub mod cache;
pub mod categories;
pub mod client;
pub mod config;
pub mod csrf;
pub mod error;
pub mod gateway;
pub mod http;
pub mod notify;
pub mod query;
pub mod session;
pub mod todos;
pub mod types;
pub mod validation;

#[cfg(test)]
mod testing;

pub use app::TodoApp;
pub use cache::{QueryCache, QueryKey};
pub use client::TodoClient;
pub use config::{ClientConfig, CsrfHandshake};
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use notify::{Notice, NoticeLevel};
pub use query::{SortDirection, SortField, TodoQuery};
pub use session::{AuthState, FileTokenStore, MemoryTokenStore, Session, TokenStore};
pub use types::{CreateTodo, LoginCredentials, RegisterCredentials, Todo, TodoStatus, UpdateTodo, User};
