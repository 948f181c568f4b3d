//! Todo resource: filtered listing, CRUD with ownership checks, soft delete.

use std::cmp::Ordering;
use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::error::{AppError, Validator};
use crate::models::{CreateTodoInput, PageMeta, Paginated, Todo, TodoRecord, TodoStatus, UpdateTodoInput};
use crate::state::{AppState, Db};

const TITLE_MAX: usize = 255;
const CATEGORY_MAX: usize = 100;
const DEFAULT_CATEGORY: &str = "General";

const ALLOWED_FILTERS: [&str; 4] = ["title", "category", "status", "due_date_between"];
const ALLOWED_SORTS: [&str; 4] = ["title", "created_at", "due_date", "status"];
const DEFAULT_SORT: &str = "-created_at";

/// Criteria parsed from `filter[...]`, `sort`, `page` and `per_page`.
#[derive(Debug, Default, PartialEq)]
pub struct ListParams {
    pub title: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub due_between: Option<(NaiveDate, NaiveDate)>,
    pub sorts: Vec<(String, bool)>,
    pub page: u64,
    pub per_page: u64,
}

impl ListParams {
    pub fn parse(raw: &HashMap<String, String>, default_per_page: u64, max_per_page: u64) -> Result<Self, AppError> {
        let mut params = ListParams {
            page: 1,
            per_page: default_per_page,
            ..Default::default()
        };

        for (key, value) in raw {
            let Some(name) = key.strip_prefix("filter[").and_then(|k| k.strip_suffix(']')) else {
                continue;
            };
            if !ALLOWED_FILTERS.contains(&name) {
                return Err(AppError::BadRequest(format!(
                    "Requested filter(s) `{name}` are not allowed. Allowed filter(s) are `{}`.",
                    ALLOWED_FILTERS.join(", ")
                )));
            }
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match name {
                "title" => params.title = Some(value.to_string()),
                "category" => params.category = Some(value.to_string()),
                "status" => params.status = Some(value.to_string()),
                _ => params.due_between = Some(parse_range(value)?),
            }
        }

        let sort = raw.get("sort").map(|s| s.trim()).filter(|s| !s.is_empty());
        for part in sort.unwrap_or(DEFAULT_SORT).split(',') {
            let (field, descending) = match part.strip_prefix('-') {
                Some(field) => (field, true),
                None => (part, false),
            };
            if !ALLOWED_SORTS.contains(&field) {
                return Err(AppError::BadRequest(format!(
                    "Requested sort(s) `{field}` is not allowed. Allowed sort(s) are `{}`.",
                    ALLOWED_SORTS.join(", ")
                )));
            }
            params.sorts.push((field.to_string(), descending));
        }

        if let Some(page) = raw.get("page").and_then(|p| p.parse::<u64>().ok()) {
            params.page = page.max(1);
        }
        if let Some(per_page) = raw.get("per_page").and_then(|p| p.parse::<u64>().ok()) {
            params.per_page = per_page.clamp(1, max_per_page);
        }
        Ok(params)
    }

    fn matches(&self, todo: &Todo) -> bool {
        if let Some(title) = &self.title {
            if !todo.title.to_lowercase().contains(&title.to_lowercase()) {
                return false;
            }
        }
        if self.category.as_ref().is_some_and(|c| c != &todo.category) {
            return false;
        }
        if self.status.as_deref().is_some_and(|s| s != todo.status.as_str()) {
            return false;
        }
        if let Some((from, to)) = self.due_between {
            return todo.due_date.is_some_and(|d| d >= from && d <= to);
        }
        true
    }

    fn compare(&self, a: &TodoRecord, b: &TodoRecord) -> Ordering {
        for (field, descending) in &self.sorts {
            let ord = match field.as_str() {
                "title" => a.todo.title.cmp(&b.todo.title),
                "due_date" => a.todo.due_date.cmp(&b.todo.due_date),
                "status" => a.todo.status.as_str().cmp(b.todo.status.as_str()),
                _ => (a.todo.created_at, a.seq).cmp(&(b.todo.created_at, b.seq)),
            };
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.seq.cmp(&b.seq)
    }
}

fn parse_range(value: &str) -> Result<(NaiveDate, NaiveDate), AppError> {
    let invalid = || AppError::BadRequest("Invalid due_date_between filter".to_string());
    let (from, to) = value.split_once(',').ok_or_else(invalid)?;
    let from = NaiveDate::parse_from_str(from.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
    let to = NaiveDate::parse_from_str(to.trim(), "%Y-%m-%d").map_err(|_| invalid())?;
    Ok((from, to))
}

/// One page of `user_id`'s live todos.
pub fn paginate(db: &Db, user_id: Uuid, params: &ListParams) -> Paginated<Todo> {
    let mut rows: Vec<&TodoRecord> = db
        .todos
        .values()
        .filter(|r| r.deleted_at.is_none() && r.todo.user_id == user_id && params.matches(&r.todo))
        .collect();
    rows.sort_by(|a, b| params.compare(a, b));

    let total = rows.len() as u64;
    let last_page = total.div_ceil(params.per_page).max(1);
    let skip = usize::try_from((params.page - 1).saturating_mul(params.per_page)).unwrap_or(usize::MAX);
    let data = rows
        .into_iter()
        .skip(skip)
        .take(params.per_page as usize)
        .map(|r| r.todo.clone())
        .collect();

    Paginated {
        data,
        meta: PageMeta {
            total,
            current_page: params.page,
            last_page,
            per_page: params.per_page,
        },
    }
}

pub async fn index(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(raw): Query<HashMap<String, String>>,
) -> Result<Json<Paginated<Todo>>, AppError> {
    let params = ListParams::parse(&raw, state.config.default_per_page, state.config.max_per_page)?;
    let db = state.db.read().await;
    Ok(Json(paginate(&db, auth.id(), &params)))
}

pub async fn show(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let db = state.db.read().await;
    let record = live(&db, &id)?;
    if record.todo.user_id != auth.id() {
        return Err(AppError::Forbidden("Unauthorized access".to_string()));
    }
    Ok(Json(json!({ "data": record.todo })))
}

pub async fn store(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CreateTodoInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) = payload?;

    let mut v = Validator::default();
    let title = v.required("title", input.title.as_deref());
    if let Some(title) = title {
        v.max("title", title, TITLE_MAX);
    }
    let category = input.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    if let Some(category) = category {
        v.max("category", category, CATEGORY_MAX);
    }
    let status = match input.status.as_deref() {
        None => Some(TodoStatus::Pending),
        Some(raw) => status_field(&mut v, raw),
    };
    let due_date = match input.due_date.as_deref() {
        None => None,
        Some(raw) => date_field(&mut v, raw).filter(|due| {
            let ok = *due >= Utc::now().date_naive();
            if !ok {
                v.fail("due_date", "The due date field must be a date after or equal to today.");
            }
            ok
        }),
    };
    v.finish()?;
    let (Some(title), Some(status)) = (title, status) else {
        return Err(AppError::BadRequest("Malformed todo".to_string()));
    };

    let now = Utc::now();
    let todo = Todo {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: input.description.filter(|d| !d.trim().is_empty()),
        status,
        category: category.unwrap_or(DEFAULT_CATEGORY).to_string(),
        due_date,
        created_at: now,
        updated_at: now,
        user_id: auth.id(),
    };
    let mut db = state.db.write().await;
    let seq = db.next_seq();
    db.todos.insert(
        todo.id,
        TodoRecord {
            todo: todo.clone(),
            seq,
            deleted_at: None,
        },
    );
    info!(todo_id = %todo.id, user_id = %auth.id(), "todo created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Todo created successfully", "data": todo })),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTodoInput>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(input) = payload?;
    let mut db = state.db.write().await;
    let record = live(&db, &id)?;
    if record.todo.user_id != auth.id() {
        return Err(AppError::Forbidden("This action is unauthorized.".to_string()));
    }
    let mut todo = record.todo.clone();

    let mut v = Validator::default();
    if let Some(title) = &input.title {
        if let Some(title) = v.required("title", title.as_deref()) {
            v.max("title", title, TITLE_MAX);
            todo.title = title.to_string();
        }
    }
    if let Some(category) = &input.category {
        if let Some(category) = v.required("category", category.as_deref()) {
            v.max("category", category, CATEGORY_MAX);
            todo.category = category.to_string();
        }
    }
    if let Some(status) = &input.status {
        match status.as_deref() {
            Some(raw) => {
                if let Some(status) = status_field(&mut v, raw) {
                    todo.status = status;
                }
            }
            None => v.fail("status", "The status field is required."),
        }
    }
    if let Some(description) = input.description {
        todo.description = description.filter(|d| !d.trim().is_empty());
    }
    if let Some(due_date) = &input.due_date {
        todo.due_date = match due_date.as_deref() {
            Some(raw) => date_field(&mut v, raw),
            None => None,
        };
    }
    v.finish()?;

    todo.updated_at = Utc::now();
    if let Some(record) = db.todos.get_mut(&todo.id) {
        record.todo = todo.clone();
    }
    info!(todo_id = %todo.id, "todo updated");

    Ok(Json(json!({ "message": "Todo updated successfully", "data": todo })))
}

pub async fn destroy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let mut db = state.db.write().await;
    let record = live(&db, &id)?;
    if record.todo.user_id != auth.id() {
        return Err(AppError::Forbidden("This action is unauthorized.".to_string()));
    }
    let todo_id = record.todo.id;
    if let Some(record) = db.todos.get_mut(&todo_id) {
        record.deleted_at = Some(Utc::now());
    }
    info!(%todo_id, "todo deleted");

    Ok(Json(json!({ "message": "Todo deleted successfully" })))
}

fn live<'a>(db: &'a Db, id: &str) -> Result<&'a TodoRecord, AppError> {
    Uuid::parse_str(id)
        .ok()
        .and_then(|id| db.todos.get(&id))
        .filter(|r| r.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound("Todo not found".to_string()))
}

fn status_field(v: &mut Validator, raw: &str) -> Option<TodoStatus> {
    let status = TodoStatus::parse(raw.trim());
    if status.is_none() {
        v.fail("status", "The selected status is invalid.");
    }
    status
}

fn date_field(v: &mut Validator, raw: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok();
    if date.is_none() {
        v.fail("due_date", "The due date field must be a valid date.");
    }
    date
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_to_newest_first() {
        let params = ListParams::parse(&raw(&[]), 10, 100).unwrap();
        assert_eq!(params.sorts, vec![("created_at".to_string(), true)]);
        assert_eq!((params.page, params.per_page), (1, 10));
    }

    #[test]
    fn rejects_unknown_sort_and_filter() {
        assert!(matches!(
            ListParams::parse(&raw(&[("sort", "-priority")]), 10, 100),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            ListParams::parse(&raw(&[("filter[owner]", "x")]), 10, 100),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn per_page_is_clamped() {
        let params = ListParams::parse(&raw(&[("per_page", "500"), ("page", "0")]), 10, 100).unwrap();
        assert_eq!((params.page, params.per_page), (1, 100));
    }

    #[test]
    fn blank_filters_are_ignored() {
        let params = ListParams::parse(&raw(&[("filter[title]", "  ")]), 10, 100).unwrap();
        assert_eq!(params.title, None);
    }

    #[test]
    fn due_range_parses_both_bounds() {
        let params = ListParams::parse(&raw(&[("filter[due_date_between]", "2030-01-01,2030-01-31")]), 10, 100).unwrap();
        let (from, to) = params.due_between.unwrap();
        assert_eq!(from.to_string(), "2030-01-01");
        assert_eq!(to.to_string(), "2030-01-31");
        assert!(ListParams::parse(&raw(&[("filter[due_date_between]", "2030-01-01")]), 10, 100).is_err());
    }
}
