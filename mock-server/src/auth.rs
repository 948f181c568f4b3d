//! Token auth: registration, login, rotation and the bearer extractor.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::header::{AUTHORIZATION, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Validator};
use crate::models::{AuthResponse, LoginInput, RefreshInput, RegisterInput, User, UserRecord};
use crate::state::{AppState, DEFAULT_CATEGORIES};

const PASSWORD_MIN: usize = 8;

/// The user behind a valid, unexpired bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(AppError::unauthenticated)?;

        let db = state.db.read().await;
        let record = db
            .access_tokens
            .get(token)
            .filter(|t| t.expires_at > Utc::now())
            .ok_or_else(AppError::unauthenticated)?;
        let user = db
            .users
            .get(&record.user_id)
            .ok_or_else(AppError::unauthenticated)?;

        Ok(AuthUser {
            user: user.user.clone(),
            token: token.to_string(),
        })
    }
}

pub async fn csrf_cookie() -> impl IntoResponse {
    let cookie = format!("XSRF-TOKEN={}; Path=/; SameSite=Lax", Uuid::new_v4().simple());
    (StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)])
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterInput>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(input) = payload?;
    let mut db = state.db.write().await;

    let mut v = Validator::default();
    let name = v.required("name", input.name.as_deref());
    if let Some(name) = name {
        v.max("name", name, 255);
    }
    let email = v.required("email", input.email.as_deref());
    if let Some(email) = email {
        if !looks_like_email(email) {
            v.fail("email", "The email field must be a valid email address.");
        } else if db.user_by_email(email).is_some() {
            v.fail("email", "The email has already been taken.");
        }
    }
    let password = v.required("password", input.password.as_deref());
    if let Some(password) = password {
        if password.chars().count() < PASSWORD_MIN {
            v.fail(
                "password",
                format!("The password field must be at least {PASSWORD_MIN} characters."),
            );
        }
        if input.password_confirmation.as_deref() != Some(password) {
            v.fail("password", "The password field confirmation does not match.");
        }
    }
    v.finish()?;

    let (Some(name), Some(email), Some(password)) = (name, email, password) else {
        return Err(AppError::BadRequest("Malformed registration".to_string()));
    };
    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: email.to_string(),
    };
    db.users.insert(
        user.id,
        UserRecord {
            user: user.clone(),
            password: password.to_string(),
        },
    );
    for category in DEFAULT_CATEGORIES {
        db.add_category(user.id, category);
    }
    let tokens = db.issue_tokens(user.id, &state.config);
    info!(user_id = %user.id, "user registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { user, tokens })))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginInput>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(input) = payload?;

    let mut v = Validator::default();
    let email = v.required("email", input.email.as_deref());
    let password = v.required("password", input.password.as_deref());
    v.finish()?;
    let (Some(email), Some(password)) = (email, password) else {
        return Err(AppError::BadRequest("Malformed login".to_string()));
    };

    let mut db = state.db.write().await;
    let user = db
        .user_by_email(email)
        .filter(|u| u.password == password)
        .map(|u| u.user.clone())
        .ok_or_else(|| AppError::Unauthenticated("Invalid login credentials".to_string()))?;

    db.revoke_user_tokens(user.id);
    let tokens = db.issue_tokens(user.id, &state.config);
    info!(user_id = %user.id, "user logged in");

    Ok(Json(AuthResponse { user, tokens }))
}

/// Rotates the pair. The presented refresh token is consumed even when it
/// turns out to be expired.
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshInput>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(input) = payload?;

    let mut v = Validator::default();
    let presented = v.required("refresh_token", input.refresh_token.as_deref());
    v.finish()?;
    let Some(presented) = presented else {
        return Err(AppError::BadRequest("Malformed refresh".to_string()));
    };

    let mut db = state.db.write().await;
    let invalid = || AppError::Unauthenticated("Invalid refresh token".to_string());
    let record = db.refresh_tokens.remove(presented).ok_or_else(invalid)?;
    if record.expires_at <= Utc::now() || !db.users.contains_key(&record.user_id) {
        return Err(invalid());
    }

    let tokens = db.issue_tokens(record.user_id, &state.config);
    info!(user_id = %record.user_id, "tokens refreshed");

    Ok(Json(json!(tokens)))
}

pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> Json<Value> {
    state.db.write().await.revoke_user_tokens(auth.id());
    info!(user_id = %auth.id(), "user logged out");
    Json(json!({ "message": "Successfully logged out" }))
}

pub async fn user(auth: AuthUser) -> Json<Value> {
    Json(json!({ "user": auth.user }))
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
