//! Per-user category names.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::auth::AuthUser;
use crate::error::{AppError, Validator};
use crate::models::CategoryInput;
use crate::state::AppState;

const NAME_MAX: usize = 100;

pub async fn index(State(state): State<AppState>, auth: AuthUser) -> Json<Value> {
    let db = state.db.read().await;
    let mut names: Vec<&str> = db
        .categories
        .iter()
        .filter(|c| c.user_id == auth.id())
        .map(|c| c.category.name.as_str())
        .collect();
    names.sort_unstable();
    Json(json!({ "data": names }))
}

pub async fn store(
    State(state): State<AppState>,
    auth: AuthUser,
    payload: Result<Json<CategoryInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) = payload?;
    let mut db = state.db.write().await;

    let mut v = Validator::default();
    let name = v.required("name", input.name.as_deref());
    if let Some(name) = name {
        v.max("name", name, NAME_MAX);
        if db.has_category(auth.id(), name) {
            v.fail("name", "The name has already been taken.");
        }
    }
    v.finish()?;
    let Some(name) = name else {
        return Err(AppError::BadRequest("Malformed category".to_string()));
    };

    let category = db.add_category(auth.id(), name);
    info!(user_id = %auth.id(), name = %category.name, "category created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Category created successfully", "data": category })),
    ))
}

pub async fn destroy(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let mut db = state.db.write().await;
    let before = db.categories.len();
    db.categories
        .retain(|c| !(c.user_id == auth.id() && c.category.name == name));
    if db.categories.len() == before {
        return Err(AppError::NotFound("Category not found".to_string()));
    }
    info!(user_id = %auth.id(), %name, "category deleted");

    Ok(Json(json!({ "message": "Category deleted successfully" })))
}
