//! Client-side checks run before a request is built.
//!
//! Failures use the same `ApiError::Validation` shape and wording as a 422
//! from the server, so a form shows them the same way.

use crate::error::{ApiError, FieldErrors};
use crate::types::{CreateTodo, LoginCredentials, RegisterCredentials, UpdateTodo};

pub const TITLE_MAX: usize = 255;
pub const CATEGORY_MAX: usize = 100;
pub const PASSWORD_MIN: usize = 8;

#[derive(Default)]
struct Checks {
    errors: FieldErrors,
}

impl Checks {
    fn fail(&mut self, field: &str, message: String) {
        self.errors.entry(field.to_string()).or_default().push(message);
    }

    fn required(&mut self, field: &str, value: &str) -> bool {
        if value.trim().is_empty() {
            self.fail(field, format!("The {field} field is required."));
            return false;
        }
        true
    }

    fn max(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.fail(field, format!("The {field} field must not be greater than {max} characters."));
        }
    }

    fn finish(self) -> Result<(), ApiError> {
        let mut messages = self.errors.values().flatten();
        let Some(first) = messages.next() else {
            return Ok(());
        };
        let rest = messages.count();
        let message = match rest {
            0 => first.clone(),
            1 => format!("{first} (and 1 more error)"),
            n => format!("{first} (and {n} more errors)"),
        };
        Err(ApiError::Validation {
            message,
            errors: self.errors,
            data: serde_json::Value::Null,
        })
    }
}

pub fn validate_create(input: &CreateTodo) -> Result<(), ApiError> {
    let mut checks = Checks::default();
    if checks.required("title", &input.title) {
        checks.max("title", &input.title, TITLE_MAX);
    }
    if checks.required("category", &input.category) {
        checks.max("category", &input.category, CATEGORY_MAX);
    }
    checks.finish()
}

/// Only the fields being changed are checked.
pub fn validate_update(input: &UpdateTodo) -> Result<(), ApiError> {
    let mut checks = Checks::default();
    if let Some(title) = &input.title {
        if checks.required("title", title) {
            checks.max("title", title, TITLE_MAX);
        }
    }
    if let Some(category) = &input.category {
        if checks.required("category", category) {
            checks.max("category", category, CATEGORY_MAX);
        }
    }
    checks.finish()
}

pub fn validate_category(name: &str, existing: &[String]) -> Result<(), ApiError> {
    let mut checks = Checks::default();
    if checks.required("name", name) {
        checks.max("name", name, CATEGORY_MAX);
        if existing.iter().any(|c| c == name.trim()) {
            checks.fail("name", "The name has already been taken.".to_string());
        }
    }
    checks.finish()
}

pub fn validate_login(credentials: &LoginCredentials) -> Result<(), ApiError> {
    let mut checks = Checks::default();
    if checks.required("email", &credentials.email) && !looks_like_email(&credentials.email) {
        checks.fail("email", "The email field must be a valid email address.".to_string());
    }
    checks.required("password", &credentials.password);
    checks.finish()
}

pub fn validate_register(credentials: &RegisterCredentials) -> Result<(), ApiError> {
    let mut checks = Checks::default();
    if checks.required("name", &credentials.name) {
        checks.max("name", &credentials.name, TITLE_MAX);
    }
    if checks.required("email", &credentials.email) && !looks_like_email(&credentials.email) {
        checks.fail("email", "The email field must be a valid email address.".to_string());
    }
    if checks.required("password", &credentials.password) {
        if credentials.password.chars().count() < PASSWORD_MIN {
            checks.fail(
                "password",
                format!("The password field must be at least {PASSWORD_MIN} characters."),
            );
        }
        if credentials.password != credentials.password_confirmation {
            checks.fail("password", "The password field confirmation does not match.".to_string());
        }
    }
    checks.finish()
}

fn looks_like_email(email: &str) -> bool {
    match email.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}
