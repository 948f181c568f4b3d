//! Query cache with revertible optimistic overlays.
//!
//! # Overview
//! Every server read lands in a [`Store`] keyed by a structured key: the
//! canonical [`TodoQuery`] for lists, the todo id for details, unit for the
//! category list and the current user. An entry holds the last value plus a
//! stack of overlays, one per in-flight mutation, each remembering the value
//! it replaced.
//!
//! # Design
//! - `apply` snapshots then mutates, `settle` either drops the snapshot
//!   (commit) or restores it (rollback). A lone failed mutation therefore
//!   leaves the entry exactly as it was.
//! - With several overlays on one key the last issued mutation decides. A
//!   commit marks the overlays below it superseded, so their later rollback
//!   cannot undo it. Rolling back an overlay that still has one above it
//!   hands its snapshot to that overlay instead of touching the value.
//! - Each key carries a version bumped on every local write. A fetch takes a
//!   [`Ticket`] before going to the network and its result is stored only if
//!   the version is unchanged and no overlay is pending, so a late response
//!   never clobbers an optimistic change or a newer result.
//! - Freshness uses `tokio::time::Instant` so tests can drive it with a
//!   paused clock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::query::TodoQuery;
use crate::types::{Todo, TodoPage, UpdateTodo, User};

/// A partial change that can be applied to a cached value.
pub trait Patch<T> {
    fn apply_to(&self, target: &mut T);
}

impl Patch<Todo> for UpdateTodo {
    fn apply_to(&self, todo: &mut Todo) {
        if let Some(title) = &self.title {
            todo.title = title.clone();
        }
        if let Some(description) = &self.description {
            todo.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            todo.status = status;
        }
        if let Some(category) = &self.category {
            todo.category = category.clone();
        }
        if let Some(due_date) = self.due_date {
            todo.due_date = due_date;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    TodoList(TodoQuery),
    Todo(Uuid),
    Categories,
    CurrentUser,
}

impl QueryKey {
    /// List key for `query` in canonical form.
    pub fn todo_list(query: &TodoQuery) -> Self {
        QueryKey::TodoList(query.canonical())
    }
}

/// Identifies one mutation's overlays across every key it touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Committed,
    /// The entry is back to the value it had before the overlay.
    Reverted,
    /// A later mutation owns the value; the rollback changed nothing visible.
    Superseded,
    /// The entry or the overlay no longer exists.
    Evicted,
}

/// Snapshot of a key's version taken when a fetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    version: Option<u64>,
}

#[derive(Debug)]
struct Overlay<V> {
    id: OverlayId,
    prior: V,
    superseded: bool,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    fetched_at: Instant,
    stale: bool,
    overlays: Vec<Overlay<V>>,
}

impl<V> Entry<V> {
    fn fresh(value: V) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            stale: false,
            overlays: Vec::new(),
        }
    }
}

/// Snapshot + apply + revert over one resource type.
#[derive(Debug)]
pub struct Store<K, V> {
    entries: HashMap<K, Entry<V>>,
    versions: HashMap<K, u64>,
    clock: u64,
    epoch: u64,
}

impl<K, V> Default for Store<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            versions: HashMap::new(),
            clock: 0,
            epoch: 0,
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Store<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Present, not invalidated and younger than `max_age`.
    pub fn is_fresh(&self, key: &K, max_age: Duration) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| !e.stale && e.fetched_at.elapsed() < max_age)
    }

    /// Missing or invalidated.
    pub fn is_stale(&self, key: &K) -> bool {
        self.entries.get(key).map_or(true, |e| e.stale)
    }

    pub fn has_pending(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|e| !e.overlays.is_empty())
    }

    pub fn ticket(&self, key: &K) -> Ticket {
        Ticket {
            epoch: self.epoch,
            version: self.versions.get(key).copied(),
        }
    }

    /// Store a fetched value unless the key was written since `ticket` was
    /// taken or an overlay is pending. Returns whether it was stored.
    pub fn commit_fetch(&mut self, key: K, value: V, ticket: Ticket) -> bool {
        if ticket != self.ticket(&key) || self.has_pending(&key) {
            return false;
        }
        self.put(key, value);
        true
    }

    /// Unconditional write. Discards pending overlays.
    pub fn put(&mut self, key: K, value: V) {
        self.touch(&key);
        self.entries.insert(key, Entry::fresh(value));
    }

    /// Snapshot the entry under `id` and mutate it in place. Keys that are
    /// not cached are left alone and `false` is returned.
    pub fn apply(&mut self, key: &K, id: OverlayId, change: impl FnOnce(&mut V)) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.overlays.push(Overlay {
            id,
            prior: entry.value.clone(),
            superseded: false,
        });
        change(&mut entry.value);
        self.touch(key);
        true
    }

    pub fn apply_patch<P: Patch<V>>(&mut self, key: &K, id: OverlayId, patch: &P) -> bool {
        self.apply(key, id, |value| patch.apply_to(value))
    }

    pub fn settle(&mut self, key: &K, id: OverlayId, outcome: Outcome) -> Settlement {
        let Some(entry) = self.entries.get_mut(key) else {
            return Settlement::Evicted;
        };
        let Some(pos) = entry.overlays.iter().position(|o| o.id == id) else {
            return Settlement::Evicted;
        };
        let overlay = entry.overlays.remove(pos);
        let settlement = match outcome {
            Outcome::Commit => {
                for below in &mut entry.overlays[..pos] {
                    below.superseded = true;
                }
                Settlement::Committed
            }
            Outcome::Rollback if overlay.superseded => Settlement::Superseded,
            Outcome::Rollback => match entry.overlays.get_mut(pos) {
                Some(above) => {
                    above.prior = overlay.prior;
                    Settlement::Superseded
                }
                None => {
                    entry.value = overlay.prior;
                    Settlement::Reverted
                }
            },
        };
        self.touch(key);
        settlement
    }

    /// Mark stale; the value stays readable until the next fetch replaces it.
    /// The version moves even when nothing is cached, so a fetch already in
    /// flight for `key` is not stored.
    pub fn invalidate(&mut self, key: &K) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        self.touch(key);
    }

    pub fn invalidate_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stale = true;
        }
    }

    /// Drop the entry and its overlays; it is refetched on next access.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.touch(key);
        self.entries.remove(key).map(|e| e.value)
    }

    pub fn keys_where(&self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(k, e)| predicate(k, &e.value))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Drop entries fetched at least `max_age` ago that have no pending
    /// overlay, together with the versions of keys no longer cached.
    /// Fetches in flight when anything is dropped are not stored.
    pub fn prune(&mut self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !e.overlays.is_empty() || e.fetched_at.elapsed() < max_age);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            let entries = &self.entries;
            self.versions.retain(|k, _| entries.contains_key(k));
            self.epoch += 1;
            debug!(dropped, "pruned aged cache entries");
        }
        dropped
    }

    /// Forget everything. Fetches started before this never land.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.versions.clear();
        self.epoch += 1;
    }

    fn touch(&mut self, key: &K) {
        self.clock += 1;
        self.versions.insert(key.clone(), self.clock);
    }
}

// ---------------------------------------------------------------------------
// QueryCache
// ---------------------------------------------------------------------------

/// A list fetch in flight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListFetch {
    seq: u64,
    ticket: Ticket,
}

#[derive(Debug, Default)]
pub(crate) struct Stores {
    pub(crate) todo_lists: Store<TodoQuery, TodoPage>,
    pub(crate) todos: Store<Uuid, Todo>,
    pub(crate) categories: Store<(), Vec<String>>,
    pub(crate) user: Store<(), User>,
    latest_list: u64,
}

impl Stores {
    /// Register a list fetch; only the most recently issued one may land.
    pub(crate) fn begin_list_fetch(&mut self, query: &TodoQuery) -> ListFetch {
        self.latest_list += 1;
        ListFetch {
            seq: self.latest_list,
            ticket: self.todo_lists.ticket(query),
        }
    }

    pub(crate) fn finish_list_fetch(&mut self, query: TodoQuery, fetch: ListFetch, page: TodoPage) -> bool {
        if fetch.seq != self.latest_list {
            debug!(seq = fetch.seq, latest = self.latest_list, "discarding superseded list response");
            return false;
        }
        self.todo_lists.commit_fetch(query, page, fetch.ticket)
    }
}

/// All cached server state of one signed-in session.
#[derive(Debug, Default)]
pub struct QueryCache {
    stores: Mutex<Stores>,
    overlay_ids: AtomicU64,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_overlay(&self) -> OverlayId {
        OverlayId(self.overlay_ids.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Stores> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn invalidate(&self, key: &QueryKey) {
        let mut stores = self.lock();
        match key {
            QueryKey::TodoList(query) => stores.todo_lists.invalidate(&query.canonical()),
            QueryKey::Todo(id) => stores.todos.invalidate(id),
            QueryKey::Categories => stores.categories.invalidate(&()),
            QueryKey::CurrentUser => stores.user.invalidate(&()),
        }
    }

    pub fn clear(&self) {
        let mut stores = self.lock();
        stores.todo_lists.clear();
        stores.todos.clear();
        stores.categories.clear();
        stores.user.clear();
        debug!("query cache cleared");
    }

    /// Missing or invalidated.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        let stores = self.lock();
        match key {
            QueryKey::TodoList(query) => stores.todo_lists.is_stale(&query.canonical()),
            QueryKey::Todo(id) => stores.todos.is_stale(id),
            QueryKey::Categories => stores.categories.is_stale(&()),
            QueryKey::CurrentUser => stores.user.is_stale(&()),
        }
    }

    pub fn todo_list(&self, query: &TodoQuery) -> Option<TodoPage> {
        self.lock().todo_lists.get(&query.canonical()).cloned()
    }

    pub fn todo(&self, id: Uuid) -> Option<Todo> {
        self.lock().todos.get(&id).cloned()
    }

    pub fn categories(&self) -> Option<Vec<String>> {
        self.lock().categories.get(&()).cloned()
    }

    pub fn current_user(&self) -> Option<User> {
        self.lock().user.get(&()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::types::{PageMeta, TodoStatus};

    fn todo(n: u128, title: &str) -> Todo {
        let at = Utc.with_ymd_and_hms(2025, 5, 13, 14, 0, 0).unwrap();
        Todo {
            id: Uuid::from_u128(n),
            title: title.to_string(),
            description: None,
            status: TodoStatus::Pending,
            category: "General".to_string(),
            due_date: None,
            created_at: at,
            updated_at: at,
            user_id: None,
        }
    }

    fn page(todos: Vec<Todo>) -> TodoPage {
        let total = todos.len() as u64;
        TodoPage {
            data: todos,
            meta: PageMeta {
                total,
                current_page: 1,
                last_page: 1,
                per_page: 10,
            },
        }
    }

    fn rename(title: &str) -> UpdateTodo {
        UpdateTodo {
            title: Some(title.to_string()),
            ..UpdateTodo::default()
        }
    }

    #[test]
    fn rollback_restores_exact_snapshot() {
        let cache = QueryCache::new();
        let mut store = Store::new();
        let original = todo(1, "Write report");
        store.put(original.id, original.clone());

        let id = cache.next_overlay();
        assert!(store.apply_patch(&original.id, id, &rename("Rewritten")));
        assert_eq!(store.get(&original.id).unwrap().title, "Rewritten");

        assert_eq!(store.settle(&original.id, id, Outcome::Rollback), Settlement::Reverted);
        assert_eq!(store.get(&original.id), Some(&original));
        assert!(!store.has_pending(&original.id));
    }

    #[test]
    fn apply_skips_uncached_keys() {
        let mut store: Store<Uuid, Todo> = Store::new();
        let id = QueryCache::new().next_overlay();
        assert!(!store.apply_patch(&Uuid::from_u128(9), id, &rename("x")));
        assert_eq!(store.settle(&Uuid::from_u128(9), id, Outcome::Rollback), Settlement::Evicted);
    }

    #[test]
    fn later_commit_survives_earlier_rollback() {
        let cache = QueryCache::new();
        let mut store = Store::new();
        store.put((), page(vec![todo(1, "a"), todo(2, "b")]));

        let update = cache.next_overlay();
        store.apply(&(), update, |p: &mut TodoPage| p.data[0].title = "a2".to_string());
        let delete = cache.next_overlay();
        store.apply(&(), delete, |p: &mut TodoPage| p.data.retain(|t| t.id != Uuid::from_u128(1)));

        assert_eq!(store.settle(&(), delete, Outcome::Commit), Settlement::Committed);
        assert_eq!(store.settle(&(), update, Outcome::Rollback), Settlement::Superseded);

        let ids: Vec<_> = store.get(&()).unwrap().data.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(2)]);
    }

    #[test]
    fn failed_lower_overlay_hands_snapshot_upwards() {
        let cache = QueryCache::new();
        let mut store = Store::new();
        let before = page(vec![todo(1, "a"), todo(2, "b")]);
        store.put((), before.clone());

        let first = cache.next_overlay();
        store.apply(&(), first, |p: &mut TodoPage| p.data[0].title = "a2".to_string());
        let second = cache.next_overlay();
        store.apply(&(), second, |p: &mut TodoPage| p.data[1].title = "b2".to_string());

        assert_eq!(store.settle(&(), first, Outcome::Rollback), Settlement::Superseded);
        assert_eq!(store.get(&()).unwrap().data[0].title, "a2");
        assert_eq!(store.settle(&(), second, Outcome::Rollback), Settlement::Reverted);
        assert_eq!(store.get(&()), Some(&before));
    }

    #[test]
    fn committed_lower_overlay_is_kept_by_upper_rollback() {
        let cache = QueryCache::new();
        let mut store = Store::new();
        store.put((), page(vec![todo(1, "a")]));

        let first = cache.next_overlay();
        store.apply(&(), first, |p: &mut TodoPage| p.data[0].title = "a2".to_string());
        let second = cache.next_overlay();
        store.apply(&(), second, |p: &mut TodoPage| p.data[0].status = TodoStatus::Completed);

        assert_eq!(store.settle(&(), first, Outcome::Commit), Settlement::Committed);
        assert_eq!(store.settle(&(), second, Outcome::Rollback), Settlement::Reverted);
        let value = &store.get(&()).unwrap().data[0];
        assert_eq!(value.title, "a2");
        assert_eq!(value.status, TodoStatus::Pending);
    }

    #[test]
    fn fetch_never_overwrites_pending_overlay() {
        let cache = QueryCache::new();
        let mut store = Store::new();
        store.put(1u8, "server".to_string());

        let ticket = store.ticket(&1);
        let id = cache.next_overlay();
        store.apply(&1, id, |v: &mut String| *v = "optimistic".to_string());

        assert!(!store.commit_fetch(1, "late".to_string(), ticket));
        assert_eq!(store.get(&1).unwrap(), "optimistic");

        store.settle(&1, id, Outcome::Commit);
        let ticket = store.ticket(&1);
        assert!(store.commit_fetch(1, "refetched".to_string(), ticket));
        assert_eq!(store.get(&1).unwrap(), "refetched");
    }

    #[test]
    fn fetch_started_before_eviction_does_not_resurrect() {
        let mut store = Store::new();
        store.put(1u8, "todo");
        let ticket = store.ticket(&1);
        store.remove(&1);
        assert!(!store.commit_fetch(1, "todo", ticket));
        assert!(store.get(&1).is_none());
    }

    #[test]
    fn invalidating_uncached_key_discards_fetch_in_flight() {
        let mut store: Store<u8, &str> = Store::new();
        let ticket = store.ticket(&1);
        store.invalidate(&1);
        assert!(!store.commit_fetch(1, "before update", ticket));
        assert!(store.get(&1).is_none());

        let ticket = store.ticket(&1);
        assert!(store.commit_fetch(1, "after update", ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_aged_entries_and_their_versions() {
        let cache = QueryCache::new();
        let mut store = Store::new();
        store.put(1u8, "old");
        store.put(2u8, "old but pending");
        let id = cache.next_overlay();
        store.apply(&2, id, |v: &mut &str| *v = "optimistic");
        store.remove(&3);
        tokio::time::advance(Duration::from_secs(60)).await;
        store.put(4u8, "recent");
        let in_flight = store.ticket(&5);

        assert_eq!(store.prune(Duration::from_secs(30)), 1);

        assert!(store.get(&1).is_none());
        assert_eq!(store.get(&2), Some(&"optimistic"));
        assert_eq!(store.get(&4), Some(&"recent"));
        let mut kept: Vec<_> = store.versions.keys().copied().collect();
        kept.sort();
        assert_eq!(kept, vec![2, 4]);
        assert!(!store.commit_fetch(5, "from before prune", in_flight));
    }

    #[test]
    fn prune_without_aged_entries_keeps_tickets_valid() {
        let mut store: Store<u8, &str> = Store::new();
        store.put(1, "fresh");
        let ticket = store.ticket(&2);
        assert_eq!(store.prune(Duration::from_secs(30)), 0);
        assert!(store.commit_fetch(2, "landed", ticket));
    }

    #[test]
    fn fetch_started_before_clear_is_discarded() {
        let mut store: Store<u8, &str> = Store::new();
        let ticket = store.ticket(&1);
        store.clear();
        assert!(!store.commit_fetch(1, "previous user", ticket));
        assert!(store.get(&1).is_none());
    }

    #[test]
    fn superseded_list_response_is_not_cached() {
        let cache = QueryCache::new();
        let first = TodoQuery::default();
        let second = TodoQuery::default().search("milk");

        let mut stores = cache.lock();
        let slow = stores.begin_list_fetch(&first);
        let fast = stores.begin_list_fetch(&second);

        assert!(stores.finish_list_fetch(second.clone(), fast, page(vec![todo(2, "milk")])));
        assert!(!stores.finish_list_fetch(first.clone(), slow, page(vec![todo(1, "old")])));
        drop(stores);

        assert!(cache.todo_list(&first).is_none());
        assert_eq!(cache.todo_list(&second).unwrap().data[0].title, "milk");
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_expires_with_time() {
        let mut store = Store::new();
        store.put((), vec!["General".to_string()]);
        let window = Duration::from_secs(3600);

        assert!(store.is_fresh(&(), window));
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(store.is_fresh(&(), window));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.is_fresh(&(), window));
    }

    #[test]
    fn invalidation_keeps_value_but_marks_stale() {
        let cache = QueryCache::new();
        cache.lock().categories.put((), vec!["General".to_string()]);
        assert!(!cache.is_stale(&QueryKey::Categories));

        cache.invalidate(&QueryKey::Categories);
        assert!(cache.is_stale(&QueryKey::Categories));
        assert_eq!(cache.categories().unwrap(), vec!["General"]);
    }

    #[test]
    fn list_keys_are_canonical() {
        let a = QueryKey::todo_list(&TodoQuery::default().search("  milk "));
        let b = QueryKey::todo_list(&TodoQuery::new(1, 10).search("milk"));
        assert_eq!(a, b);
        assert_ne!(a, QueryKey::todo_list(&TodoQuery::default().search("")));
    }

    #[test]
    fn patch_clears_due_date_only_when_asked() {
        let mut t = todo(1, "a");
        t.due_date = chrono::NaiveDate::from_ymd_opt(2030, 1, 1);
        rename("b").apply_to(&mut t);
        assert!(t.due_date.is_some());
        UpdateTodo {
            due_date: Some(None),
            ..UpdateTodo::default()
        }
        .apply_to(&mut t);
        assert_eq!(t.due_date, None);
        assert_eq!(t.title, "b");
    }
}
