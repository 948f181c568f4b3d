//! Category list with optimistic add and delete.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{Outcome, OverlayId, QueryCache};
use crate::client::TodoClient;
use crate::error::ApiError;
use crate::gateway::ApiGateway;
use crate::notify::Notifier;
use crate::types::{Category, NewCategory};
use crate::validation;

#[derive(Clone)]
pub struct CategoryService {
    gateway: ApiGateway,
    cache: Arc<QueryCache>,
    notifier: Notifier,
    stale_time: Duration,
    protected: Arc<[String]>,
}

impl CategoryService {
    pub fn new(
        gateway: ApiGateway,
        cache: Arc<QueryCache>,
        notifier: Notifier,
        stale_time: Duration,
        protected: Vec<String>,
    ) -> Self {
        Self {
            gateway,
            cache,
            notifier,
            stale_time,
            protected: protected.into(),
        }
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.iter().any(|c| c == name)
    }

    /// Category names, sorted by the server.
    pub async fn list(&self) -> Result<Vec<String>, ApiError> {
        let ticket = {
            let stores = self.cache.lock();
            if stores.categories.is_fresh(&(), self.stale_time) {
                if let Some(names) = stores.categories.get(&()) {
                    return Ok(names.clone());
                }
            }
            stores.categories.ticket(&())
        };
        let request = self.gateway.client().build_list_categories();
        let names = self
            .gateway
            .call(Ok(request), TodoClient::parse_list_categories)
            .await?;
        self.cache.lock().categories.commit_fetch((), names.clone(), ticket);
        Ok(names)
    }

    pub async fn add(&self, name: &str) -> Result<Category, ApiError> {
        let known = self.cache.categories().unwrap_or_default();
        validation::validate_category(name, &known)?;
        let name = name.trim().to_string();

        let overlay = self.cache.next_overlay();
        self.cache
            .lock()
            .categories
            .apply(&(), overlay, |names| names.push(name.clone()));

        let input = NewCategory { name: name.clone() };
        let result = self
            .gateway
            .call(self.gateway.client().build_add_category(&input), TodoClient::parse_add_category)
            .await;
        self.settle(overlay, &result);

        match result {
            Ok(category) => {
                debug!(name = %category.name, "category added");
                self.notifier.success("Category added successfully");
                Ok(category)
            }
            Err(err) => {
                warn!(%name, error = %err, "adding category failed");
                self.notifier.failure(format!("Failed to add category: {}", err.message()));
                Err(err)
            }
        }
    }

    /// Delete a user category. Protected defaults are refused locally.
    pub async fn delete(&self, name: &str) -> Result<(), ApiError> {
        if self.is_protected(name) {
            self.notifier.failure("Cannot delete default categories");
            return Err(ApiError::ProtectedCategory(name.to_string()));
        }

        let overlay = self.cache.next_overlay();
        self.cache
            .lock()
            .categories
            .apply(&(), overlay, |names| names.retain(|n| n != name));

        let request = self.gateway.client().build_delete_category(name);
        let result = self
            .gateway
            .call(Ok(request), TodoClient::parse_delete_category)
            .await;
        self.settle(overlay, &result);
        self.cache.lock().todo_lists.invalidate_all();

        match result {
            Ok(()) => {
                self.notifier.success("Category deleted successfully");
                Ok(())
            }
            Err(err) => {
                warn!(%name, error = %err, "deleting category failed");
                self.notifier.failure(format!("Failed to delete category: {}", err.message()));
                Err(err)
            }
        }
    }

    fn settle<T>(&self, overlay: OverlayId, result: &Result<T, ApiError>) {
        let outcome = if result.is_ok() { Outcome::Commit } else { Outcome::Rollback };
        let mut stores = self.cache.lock();
        stores.categories.settle(&(), overlay, outcome);
        stores.categories.invalidate(&());
    }
}
