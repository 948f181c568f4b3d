//! Shared in-memory store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{TimeDelta, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::models::{Category, CategoryRecord, TodoRecord, TokenPair, TokenRecord, UserRecord};

/// Categories every new account starts with.
pub const DEFAULT_CATEGORIES: [&str; 3] = ["General", "Urgent", "Important"];

#[derive(Debug, Default)]
pub struct Db {
    pub users: HashMap<Uuid, UserRecord>,
    pub todos: HashMap<Uuid, TodoRecord>,
    pub categories: Vec<CategoryRecord>,
    pub access_tokens: HashMap<String, TokenRecord>,
    pub refresh_tokens: HashMap<String, TokenRecord>,
    seq: u64,
}

impl Db {
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn user_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.users
            .values()
            .find(|u| u.user.email.eq_ignore_ascii_case(email))
    }

    /// New access/refresh pair for `user_id`.
    pub fn issue_tokens(&mut self, user_id: Uuid, config: &ServerConfig) -> TokenPair {
        let now = Utc::now();
        let access_token = new_token();
        let refresh_token = new_token();
        self.access_tokens.insert(
            access_token.clone(),
            TokenRecord {
                user_id,
                expires_at: now + config.access_token_ttl,
            },
        );
        self.refresh_tokens.insert(
            refresh_token.clone(),
            TokenRecord {
                user_id,
                expires_at: now + config.refresh_token_ttl,
            },
        );
        TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
        }
    }

    pub fn revoke_user_tokens(&mut self, user_id: Uuid) {
        self.access_tokens.retain(|_, t| t.user_id != user_id);
        self.refresh_tokens.retain(|_, t| t.user_id != user_id);
    }

    pub fn add_category(&mut self, user_id: Uuid, name: &str) -> Category {
        let category = Category {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.categories.push(CategoryRecord {
            category: category.clone(),
            user_id,
        });
        category
    }

    pub fn has_category(&self, user_id: Uuid, name: &str) -> bool {
        self.categories
            .iter()
            .any(|c| c.user_id == user_id && c.category.name == name)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<RwLock<Db>>,
    pub config: Arc<ServerConfig>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            db: Arc::new(RwLock::new(Db::default())),
            config: Arc::new(config),
        }
    }

    /// Test hook: every issued access token is already expired.
    pub async fn expire_access_tokens(&self) {
        let past = Utc::now() - TimeDelta::seconds(1);
        for token in self.db.write().await.access_tokens.values_mut() {
            token.expires_at = past;
        }
    }

    pub async fn live_todo_count(&self) -> usize {
        self.db
            .read()
            .await
            .todos
            .values()
            .filter(|t| t.deleted_at.is_none())
            .count()
    }
}

fn new_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}
