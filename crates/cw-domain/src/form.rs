//! Application form validation.
//!
//! One precise input record per endpoint; validation is a pure function
//! returning either the validated record or a list of typed field errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::entities::ApplicantForm;

static NATIONAL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3}-\d{4}-\d{7}-\d$").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{7,15}$").unwrap());
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

const MAX_NAME_LEN: usize = 200;

/// Raw, unvalidated form input as received by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicantFormInput {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub national_id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub email: String,
}

/// A single failed field constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub code: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            code,
            message: message.into(),
        }
    }
}

/// Validate raw form input into an [`ApplicantForm`].
///
/// All failed constraints are reported together so the caller can surface
/// them in one response.
pub fn validate_form(input: &ApplicantFormInput) -> Result<ApplicantForm, Vec<FieldError>> {
    let mut errors = Vec::new();

    let full_name = input.full_name.trim();
    if full_name.is_empty() {
        errors.push(FieldError::new("full_name", "REQUIRED", "full name is required"));
    } else if full_name.chars().count() > MAX_NAME_LEN {
        errors.push(FieldError::new(
            "full_name",
            "TOO_LONG",
            format!("full name exceeds {MAX_NAME_LEN} characters"),
        ));
    }

    let national_id = input.national_id.trim();
    if national_id.is_empty() {
        errors.push(FieldError::new("national_id", "REQUIRED", "national id is required"));
    } else if !NATIONAL_ID_RE.is_match(national_id) {
        errors.push(FieldError::new(
            "national_id",
            "MALFORMED",
            "national id must match NNN-YYYY-NNNNNNN-C",
        ));
    }

    let phone = input.phone.trim();
    if phone.is_empty() {
        errors.push(FieldError::new("phone", "REQUIRED", "phone number is required"));
    } else if !PHONE_RE.is_match(phone) {
        errors.push(FieldError::new(
            "phone",
            "MALFORMED",
            "phone must be 7-15 digits with optional leading +",
        ));
    }

    let email = input.email.trim();
    if email.is_empty() {
        errors.push(FieldError::new("email", "REQUIRED", "email is required"));
    } else if !EMAIL_RE.is_match(email) {
        errors.push(FieldError::new("email", "MALFORMED", "email address is malformed"));
    }

    if errors.is_empty() {
        Ok(ApplicantForm {
            full_name: full_name.to_string(),
            national_id: national_id.to_string(),
            phone: phone.to_string(),
            email: email.to_string(),
        })
    } else {
        Err(errors)
    }
}
