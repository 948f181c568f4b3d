//! Error types for the todo API client.
//!
//! # Design
//! Every non-2xx response is normalized into one `ApiError` variant per
//! status class, each carrying the server's `message` and raw JSON payload.
//! 401 responses normally never reach callers: the gateway resolves them with
//! a token refresh and only surfaces `ReauthenticationRequired` when that
//! fails. Client-side validation reuses `Validation` so callers handle field
//! errors the same way whether or not the request left the process.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::http::HttpResponse;

/// Field name to list of messages, as in a 422 `errors` object.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

static NO_DATA: Value = Value::Null;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// 422, or rejected locally before submission.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        errors: FieldErrors,
        data: Value,
    },

    /// 401 that survived the refresh-and-retry path.
    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String, data: Value },

    /// 403, the resource belongs to another user.
    #[error("forbidden: {message}")]
    Forbidden { message: String, data: Value },

    /// 404, the resource does not exist (or was deleted).
    #[error("not found: {message}")]
    NotFound { message: String, data: Value },

    /// 5xx.
    #[error("server error {status}: {message}")]
    Server {
        status: u16,
        message: String,
        data: Value,
    },

    /// Any other non-2xx status, or a 2xx the endpoint does not produce.
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        data: Value,
    },

    /// No response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The session could not be refreshed; the user must sign in again.
    #[error("reauthentication required")]
    ReauthenticationRequired,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    /// Default categories cannot be deleted.
    #[error("category '{0}' is protected and cannot be deleted")]
    ProtectedCategory(String),

    /// The token store could not be read or written.
    #[error("token storage failed: {0}")]
    Storage(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),
}

impl ApiError {
    /// Normalize a non-success response.
    pub fn from_response(response: &HttpResponse) -> Self {
        let data: Value = serde_json::from_str(&response.body).unwrap_or(Value::Null);
        let message = data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| default_message(response.status).to_string());

        match response.status {
            401 => ApiError::Unauthenticated { message, data },
            403 => ApiError::Forbidden { message, data },
            404 => ApiError::NotFound { message, data },
            422 => {
                let errors = data
                    .get("errors")
                    .cloned()
                    .and_then(|e| serde_json::from_value(e).ok())
                    .unwrap_or_default();
                ApiError::Validation { message, errors, data }
            }
            status @ 500..=599 => ApiError::Server { status, message, data },
            status => ApiError::Http { status, message, data },
        }
    }

    /// Local validation failure with a single field error.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut errors = FieldErrors::new();
        errors.insert(field.to_string(), vec![message.clone()]);
        ApiError::Validation {
            message,
            errors,
            data: Value::Null,
        }
    }

    /// HTTP status this error corresponds to, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Validation { .. } => Some(422),
            ApiError::Unauthenticated { .. } | ApiError::InvalidCredentials => Some(401),
            ApiError::InvalidRefreshToken | ApiError::ReauthenticationRequired => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Server { status, .. } | ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::Validation { message, .. }
            | ApiError::Unauthenticated { message, .. }
            | ApiError::Forbidden { message, .. }
            | ApiError::NotFound { message, .. }
            | ApiError::Server { message, .. }
            | ApiError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Raw server payload, `Null` for errors that never saw a response body.
    pub fn data(&self) -> &Value {
        match self {
            ApiError::Validation { data, .. }
            | ApiError::Unauthenticated { data, .. }
            | ApiError::Forbidden { data, .. }
            | ApiError::NotFound { data, .. }
            | ApiError::Server { data, .. }
            | ApiError::Http { data, .. } => data,
            _ => &NO_DATA,
        }
    }

    /// Field errors of a validation failure.
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        401 => "Unauthenticated.",
        403 => "Unauthorized access",
        404 => "Resource not found.",
        422 => "The given data was invalid.",
        500..=599 => "Server Error",
        _ => "Unexpected response from server",
    }
}
