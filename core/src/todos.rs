//! Todo reads and optimistic mutations.
//!
//! # Overview
//! Reads are served from the [`QueryCache`] while fresh and fetched through
//! the gateway otherwise. Mutations apply an overlay to every cached entry
//! they affect before the request goes out, then commit or roll back that
//! overlay when the server answers:
//!
//! | mutation | optimistic change                              | on success              | on failure            |
//! |----------|------------------------------------------------|-------------------------|-----------------------|
//! | create   | placeholder prepended to matching first pages  | lists invalidated       | placeholder removed   |
//! | update   | patch applied to lists and detail              | lists + detail invalidated | both restored, invalidated |
//! | delete   | removed from lists, detail evicted             | lists invalidated, detail evicted | lists restored |

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Outcome, Patch, QueryCache, Settlement};
use crate::client::TodoClient;
use crate::error::ApiError;
use crate::gateway::ApiGateway;
use crate::notify::Notifier;
use crate::query::TodoQuery;
use crate::types::{CreateTodo, Todo, TodoPage, UpdateTodo};
use crate::validation;

/// Cached pages and details are dropped this many stale windows after their fetch.
const RETAIN_STALE_WINDOWS: u32 = 4;

#[derive(Clone)]
pub struct TodoService {
    gateway: ApiGateway,
    cache: Arc<QueryCache>,
    notifier: Notifier,
    stale_time: Duration,
    default_per_page: u32,
}

impl TodoService {
    pub fn new(
        gateway: ApiGateway,
        cache: Arc<QueryCache>,
        notifier: Notifier,
        stale_time: Duration,
        default_per_page: u32,
    ) -> Self {
        Self {
            gateway,
            cache,
            notifier,
            stale_time,
            default_per_page,
        }
    }

    /// First page with the configured page size and no filters.
    pub fn default_query(&self) -> TodoQuery {
        TodoQuery::new(1, self.default_per_page)
    }

    /// One page of todos. Only the response to the most recently issued
    /// list query is cached; older responses are still returned.
    pub async fn list(&self, query: &TodoQuery) -> Result<TodoPage, ApiError> {
        let query = query.canonical();
        let fetch = {
            let mut stores = self.cache.lock();
            stores.todo_lists.prune(self.retention());
            if stores.todo_lists.is_fresh(&query, self.stale_time) {
                if let Some(page) = stores.todo_lists.get(&query) {
                    debug!(page = query.page, "todo list served from cache");
                    return Ok(page.clone());
                }
            }
            stores.begin_list_fetch(&query)
        };

        let request = self.client().build_list_todos(&query);
        let page = self.gateway.call(Ok(request), TodoClient::parse_list_todos).await?;
        self.cache.lock().finish_list_fetch(query, fetch, page.clone());
        Ok(page)
    }

    /// Detail read. `None` id means there is nothing to fetch yet.
    pub async fn get(&self, id: Option<Uuid>) -> Result<Option<Todo>, ApiError> {
        let Some(id) = id else {
            return Ok(None);
        };
        let ticket = {
            let mut stores = self.cache.lock();
            stores.todos.prune(self.retention());
            if stores.todos.is_fresh(&id, self.stale_time) {
                if let Some(todo) = stores.todos.get(&id) {
                    return Ok(Some(todo.clone()));
                }
            }
            stores.todos.ticket(&id)
        };

        let request = self.client().build_get_todo(id);
        let todo = self.gateway.call(Ok(request), TodoClient::parse_get_todo).await?;
        self.cache.lock().todos.commit_fetch(id, todo.clone(), ticket);
        Ok(Some(todo))
    }

    pub async fn create(&self, input: CreateTodo) -> Result<Todo, ApiError> {
        validation::validate_create(&input)?;

        let overlay = self.cache.next_overlay();
        let placeholder = placeholder(&input);
        let touched = {
            let mut stores = self.cache.lock();
            let keys = stores
                .todo_lists
                .keys_where(|query, _| query.page == 1 && query.matches(&placeholder));
            for key in &keys {
                stores.todo_lists.apply(key, overlay, |page| {
                    page.data.insert(0, placeholder.clone());
                    page.meta.total += 1;
                });
            }
            keys
        };
        debug!(temp_id = %placeholder.id, lists = touched.len(), "optimistic create applied");

        let result = self
            .gateway
            .call(self.client().build_create_todo(&input), TodoClient::parse_create_todo)
            .await;

        let mut stores = self.cache.lock();
        for key in &touched {
            stores.todo_lists.settle(key, overlay, outcome_of(&result));
        }
        match result {
            Ok(todo) => {
                stores.todo_lists.invalidate_all();
                drop(stores);
                self.notifier.success("Todo created successfully");
                Ok(todo)
            }
            Err(err) => {
                drop(stores);
                warn!(error = %err, "create failed, placeholder removed");
                self.notifier.failure(format!("Failed to create todo: {}", err.message()));
                Err(err)
            }
        }
    }

    pub async fn update(&self, id: Uuid, patch: UpdateTodo) -> Result<Todo, ApiError> {
        validation::validate_update(&patch)?;

        let overlay = self.cache.next_overlay();
        let lists = {
            let mut stores = self.cache.lock();
            let keys = stores
                .todo_lists
                .keys_where(|_, page| page.data.iter().any(|t| t.id == id));
            for key in &keys {
                stores.todo_lists.apply(key, overlay, |page| {
                    for todo in page.data.iter_mut().filter(|t| t.id == id) {
                        patch.apply_to(todo);
                    }
                });
            }
            stores.todos.apply_patch(&id, overlay, &patch);
            keys
        };

        let result = self
            .gateway
            .call(self.client().build_update_todo(id, &patch), TodoClient::parse_update_todo)
            .await;

        {
            let mut stores = self.cache.lock();
            let outcome = outcome_of(&result);
            for key in &lists {
                log_settlement(stores.todo_lists.settle(key, overlay, outcome), "list");
            }
            log_settlement(stores.todos.settle(&id, overlay, outcome), "detail");
            stores.todo_lists.invalidate_all();
            stores.todos.invalidate(&id);
        }

        match result {
            Ok(todo) => {
                self.notifier.success("Todo updated successfully");
                Ok(todo)
            }
            Err(err) => {
                warn!(%id, error = %err, "update failed");
                self.notifier.failure(format!("Failed to update todo: {}", err.message()));
                Err(err)
            }
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ApiError> {
        let overlay = self.cache.next_overlay();
        let lists = {
            let mut stores = self.cache.lock();
            let keys = stores
                .todo_lists
                .keys_where(|_, page| page.data.iter().any(|t| t.id == id));
            for key in &keys {
                stores.todo_lists.apply(key, overlay, |page| {
                    page.data.retain(|t| t.id != id);
                    page.meta.total = page.meta.total.saturating_sub(1);
                });
            }
            stores.todos.remove(&id);
            keys
        };

        let result = self
            .gateway
            .call(Ok(self.client().build_delete_todo(id)), TodoClient::parse_delete_todo)
            .await;

        {
            let mut stores = self.cache.lock();
            let outcome = outcome_of(&result);
            for key in &lists {
                log_settlement(stores.todo_lists.settle(key, overlay, outcome), "list");
            }
            if result.is_ok() {
                stores.todo_lists.invalidate_all();
                // A detail read issued while the request was in flight may have cached it again.
                stores.todos.remove(&id);
            }
        }

        match result {
            Ok(()) => {
                self.notifier.success("Todo deleted successfully");
                Ok(())
            }
            Err(err) => {
                warn!(%id, error = %err, "delete failed");
                self.notifier.failure(format!("Failed to delete todo: {}", err.message()));
                Err(err)
            }
        }
    }

    fn client(&self) -> &TodoClient {
        self.gateway.client()
    }

    fn retention(&self) -> Duration {
        self.stale_time * RETAIN_STALE_WINDOWS
    }
}

fn outcome_of<T>(result: &Result<T, ApiError>) -> Outcome {
    if result.is_ok() {
        Outcome::Commit
    } else {
        Outcome::Rollback
    }
}

fn log_settlement(settlement: Settlement, target: &str) {
    match settlement {
        Settlement::Reverted => warn!(target_entry = target, "optimistic change rolled back"),
        Settlement::Superseded => debug!(target_entry = target, "rollback skipped, newer change owns the entry"),
        Settlement::Committed | Settlement::Evicted => {}
    }
}

/// Local stand-in shown until the server assigns the real id.
fn placeholder(input: &CreateTodo) -> Todo {
    let now = Utc::now();
    Todo {
        id: Uuid::new_v4(),
        title: input.title.trim().to_string(),
        description: input.description.clone(),
        status: input.status,
        category: input.category.clone(),
        due_date: input.due_date,
        created_at: now,
        updated_at: now,
        user_id: None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::http::HttpMethod;
    use crate::notify::NoticeLevel;
    use crate::testing::{endpoint, json_response, page_json, signed_in_app, todo_json, FakeTransport};
    use crate::types::TodoStatus;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn new_todo(title: &str) -> CreateTodo {
        CreateTodo {
            title: title.to_string(),
            description: None,
            status: TodoStatus::Pending,
            category: "General".to_string(),
            due_date: None,
        }
    }

    fn ten_todos() -> Vec<serde_json::Value> {
        (1..=10).map(|n| todo_json(id(n), &format!("Todo {n}"))).collect()
    }

    /// Serves a fixed first page; writes fail with the given status.
    fn server(write_status: u16) -> Arc<FakeTransport> {
        FakeTransport::new(move |req| async move {
            match (req.method, endpoint(&req).1.as_str()) {
                (HttpMethod::Get, "/api/todos") => Ok(json_response(200, page_json(ten_todos(), 1, 10))),
                (HttpMethod::Get, _) => Ok(json_response(200, json!({ "data": todo_json(id(1), "Todo 1") }))),
                _ if write_status >= 400 => Ok(json_response(write_status, json!({ "message": "Server Error" }))),
                (HttpMethod::Post, _) => Ok(json_response(201, json!({ "data": todo_json(id(99), "Created") }))),
                (HttpMethod::Put, _) => Ok(json_response(200, json!({ "data": todo_json(id(1), "Renamed") }))),
                (HttpMethod::Delete, _) => Ok(json_response(200, json!({ "message": "Todo deleted successfully" }))),
            }
        })
    }

    #[tokio::test]
    async fn list_is_served_from_cache_while_fresh() {
        let transport = server(200);
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();

        let first = app.todos().list(&query).await.unwrap();
        let second = app.todos().list(&query.clone().search("  ")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.count(HttpMethod::Get, "/api/todos"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn list_is_refetched_after_stale_time() {
        let transport = server(200);
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();

        app.todos().list(&query).await.unwrap();
        tokio::time::advance(Duration::from_secs(5 * 60 + 1)).await;
        app.todos().list(&query).await.unwrap();

        assert_eq!(transport.count(HttpMethod::Get, "/api/todos"), 2);
    }

    #[tokio::test]
    async fn detail_without_id_is_skipped() {
        let transport = server(200);
        let app = signed_in_app(transport.clone());
        assert_eq!(app.todos().get(None).await.unwrap(), None);
        assert!(transport.requests().is_empty());

        let todo = app.todos().get(Some(id(1))).await.unwrap().unwrap();
        assert_eq!(todo.title, "Todo 1");
        app.todos().get(Some(id(1))).await.unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn empty_title_never_reaches_the_network() {
        let transport = server(200);
        let app = signed_in_app(transport.clone());

        let err = app.todos().create(new_todo("")).await.unwrap_err();

        assert!(err.field_errors().unwrap().contains_key("title"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn failed_create_restores_cached_list() {
        let transport = server(500);
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();
        let before = app.todos().list(&query).await.unwrap();
        let mut notices = app.notifications();

        let err = app.todos().create(new_todo("Buy milk")).await.unwrap_err();

        assert!(matches!(err, ApiError::Server { status: 500, .. }));
        assert_eq!(app.cache().todo_list(&query), Some(before));
        assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Failure);
    }

    #[tokio::test]
    async fn create_prepends_placeholder_until_settled() {
        let gate = Arc::new(Notify::new());
        let released = gate.clone();
        let transport = FakeTransport::new(move |req| {
            let gate = released.clone();
            async move {
                if req.method == HttpMethod::Post {
                    gate.notified().await;
                    return Ok(json_response(201, json!({ "data": todo_json(id(99), "Buy milk") })));
                }
                Ok(json_response(200, page_json(ten_todos(), 1, 10)))
            }
        });
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();
        app.todos().list(&query).await.unwrap();
        let filtered = query.clone().status(TodoStatus::Completed);
        app.todos().list(&filtered).await.unwrap();

        let todos = app.todos().clone();
        let pending = tokio::spawn(async move { todos.create(new_todo("Buy milk")).await });
        while transport.count(HttpMethod::Post, "/api/todos") == 0 {
            tokio::task::yield_now().await;
        }

        let optimistic = app.cache().todo_list(&query).unwrap();
        assert_eq!(optimistic.data[0].title, "Buy milk");
        assert_eq!(optimistic.data.len(), 11);
        assert_eq!(app.cache().todo_list(&filtered).unwrap().data.len(), 10);

        gate.notify_one();
        let created = pending.await.unwrap().unwrap();
        assert_eq!(created.id, id(99));
        assert!(app.cache().is_stale(&crate::cache::QueryKey::todo_list(&query)));
    }

    #[tokio::test]
    async fn failed_update_restores_list_and_detail() {
        let transport = server(422);
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();
        let list_before = app.todos().list(&query).await.unwrap();
        let detail_before = app.todos().get(Some(id(1))).await.unwrap();

        let patch = UpdateTodo {
            title: Some("Renamed".to_string()),
            status: Some(TodoStatus::Completed),
            ..UpdateTodo::default()
        };
        app.todos().update(id(1), patch).await.unwrap_err();

        assert_eq!(app.cache().todo_list(&query), Some(list_before));
        assert_eq!(app.cache().todo(id(1)), detail_before);
        assert!(app.cache().is_stale(&crate::cache::QueryKey::Todo(id(1))));
    }

    #[tokio::test]
    async fn failed_delete_restores_list_but_not_detail() {
        let transport = server(500);
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();
        let before = app.todos().list(&query).await.unwrap();
        app.todos().get(Some(id(3))).await.unwrap();

        app.todos().delete(id(3)).await.unwrap_err();

        assert_eq!(app.cache().todo_list(&query), Some(before));
        assert!(app.cache().todo(id(3)).is_none());
    }

    /// PUT waits for the gate and then answers `put_status`; DELETE succeeds.
    fn racing_server(gate: Arc<Notify>, put_status: u16) -> Arc<FakeTransport> {
        FakeTransport::new(move |req| {
            let gate = gate.clone();
            async move {
                match req.method {
                    HttpMethod::Put => {
                        gate.notified().await;
                        if put_status == 200 {
                            Ok(json_response(200, json!({ "data": todo_json(id(1), "Renamed") })))
                        } else {
                            Ok(json_response(put_status, json!({ "message": "Server Error" })))
                        }
                    }
                    HttpMethod::Delete => Ok(json_response(200, json!({ "message": "Todo deleted successfully" }))),
                    _ if endpoint(&req).1 == "/api/todos" => Ok(json_response(200, page_json(ten_todos(), 1, 10))),
                    _ => Ok(json_response(200, json!({ "data": todo_json(id(1), "Todo 1") }))),
                }
            }
        })
    }

    async fn update_then_delete(put_status: u16) {
        let gate = Arc::new(Notify::new());
        let transport = racing_server(gate.clone(), put_status);
        let app = signed_in_app(transport.clone());
        let query = app.todos().default_query();
        app.todos().list(&query).await.unwrap();
        app.todos().get(Some(id(1))).await.unwrap();

        let todos = app.todos().clone();
        let update = tokio::spawn(async move {
            let patch = UpdateTodo {
                title: Some("Renamed".to_string()),
                ..UpdateTodo::default()
            };
            todos.update(id(1), patch).await
        });
        while transport.count(HttpMethod::Put, &format!("/api/todos/{}", id(1))) == 0 {
            tokio::task::yield_now().await;
        }

        app.todos().delete(id(1)).await.unwrap();
        gate.notify_one();
        let updated = update.await.unwrap();
        assert_eq!(updated.is_ok(), put_status == 200);

        let page = app.cache().todo_list(&query).unwrap();
        assert!(page.data.iter().all(|t| t.id != id(1)));
        assert_eq!(page.data.len(), 9);
        assert!(app.cache().todo(id(1)).is_none());
    }

    #[tokio::test]
    async fn update_then_delete_ends_deleted_when_update_fails() {
        update_then_delete(500).await;
    }

    #[tokio::test]
    async fn update_then_delete_ends_deleted_when_update_succeeds() {
        update_then_delete(200).await;
    }

    #[tokio::test]
    async fn detail_read_during_delete_does_not_resurrect_todo() {
        let gate = Arc::new(Notify::new());
        let released = gate.clone();
        let transport = FakeTransport::new(move |req| {
            let gate = released.clone();
            async move {
                if req.method == HttpMethod::Delete {
                    gate.notified().await;
                    return Ok(json_response(200, json!({ "message": "Todo deleted successfully" })));
                }
                Ok(json_response(200, json!({ "data": todo_json(id(1), "Todo 1") })))
            }
        });
        let app = signed_in_app(transport.clone());
        let path = format!("/api/todos/{}", id(1));
        app.todos().get(Some(id(1))).await.unwrap();

        let todos = app.todos().clone();
        let delete = tokio::spawn(async move { todos.delete(id(1)).await });
        while transport.count(HttpMethod::Delete, &path) == 0 {
            tokio::task::yield_now().await;
        }
        let read = app.todos().get(Some(id(1))).await.unwrap();
        assert_eq!(read.unwrap().title, "Todo 1");

        gate.notify_one();
        delete.await.unwrap().unwrap();

        assert!(app.cache().todo(id(1)).is_none());
        app.todos().get(Some(id(1))).await.unwrap();
        assert_eq!(transport.count(HttpMethod::Get, &path), 3);
    }

    #[tokio::test]
    async fn detail_response_overtaken_by_update_is_not_cached() {
        let gate = Arc::new(Notify::new());
        let released = gate.clone();
        let transport = FakeTransport::new(move |req| {
            let gate = released.clone();
            async move {
                if req.method == HttpMethod::Put {
                    return Ok(json_response(200, json!({ "data": todo_json(id(1), "Renamed") })));
                }
                gate.notified().await;
                Ok(json_response(200, json!({ "data": todo_json(id(1), "Todo 1") })))
            }
        });
        let app = signed_in_app(transport.clone());
        let path = format!("/api/todos/{}", id(1));

        let todos = app.todos().clone();
        let read = tokio::spawn(async move { todos.get(Some(id(1))).await });
        while transport.count(HttpMethod::Get, &path) == 0 {
            tokio::task::yield_now().await;
        }
        let patch = UpdateTodo {
            title: Some("Renamed".to_string()),
            ..UpdateTodo::default()
        };
        app.todos().update(id(1), patch).await.unwrap();
        gate.notify_one();

        let before_update = read.await.unwrap().unwrap().unwrap();
        assert_eq!(before_update.title, "Todo 1");
        assert!(app.cache().todo(id(1)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn aged_pages_are_dropped_from_cache() {
        let transport = server(200);
        let app = signed_in_app(transport.clone());
        let first = app.todos().default_query();
        let other = first.clone().search("milk");
        app.todos().list(&other).await.unwrap();
        app.todos().list(&first).await.unwrap();

        tokio::time::advance(Duration::from_secs(4 * 5 * 60)).await;
        app.todos().list(&first).await.unwrap();

        assert!(app.cache().todo_list(&other).is_none());
        assert!(app.cache().todo_list(&first).is_some());
        assert_eq!(transport.count(HttpMethod::Get, "/api/todos"), 3);
    }

    #[tokio::test]
    async fn late_response_for_old_query_is_discarded() {
        let slow_gate = Arc::new(Notify::new());
        let gate = slow_gate.clone();
        let seen = Arc::new(Mutex::new(0u32));
        let transport = FakeTransport::new(move |req| {
            let gate = gate.clone();
            let seen = seen.clone();
            async move {
                let first = {
                    let mut seen = seen.lock().unwrap();
                    *seen += 1;
                    *seen == 1
                };
                if first {
                    gate.notified().await;
                    return Ok(json_response(200, page_json(vec![todo_json(id(1), "stale")], 1, 10)));
                }
                assert!(req.path.contains("filter%5Btitle%5D=milk"));
                Ok(json_response(200, page_json(vec![todo_json(id(2), "milk")], 1, 10)))
            }
        });
        let app = signed_in_app(transport.clone());
        let old = app.todos().default_query();
        let new = old.clone().search("milk");

        let todos = app.todos().clone();
        let old_query = old.clone();
        let slow = tokio::spawn(async move { todos.list(&old_query).await });
        while transport.requests().is_empty() {
            tokio::task::yield_now().await;
        }
        app.todos().list(&new).await.unwrap();
        slow_gate.notify_one();

        let late = slow.await.unwrap().unwrap();
        assert_eq!(late.data[0].title, "stale");
        assert!(app.cache().todo_list(&old).is_none());
        assert_eq!(app.cache().todo_list(&new).unwrap().data[0].title, "milk");
    }
}
