use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::fmt;
use uuid::Uuid;

use crate::store::StoreError;
use crate::wizard::WizardError;

/// A single field that failed validation, reported inline by the wizard step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Dotted path of the offending field (e.g. `address.city`).
    pub field: String,
    /// Human-readable problem description.
    pub message: String,
}

/// Every field problem found in one draft.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub fields: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether a given field has at least one error.
    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }

    /// Ok if nothing was recorded, otherwise the collected errors.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .fields
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{}", joined)
    }
}

impl std::error::Error for ValidationErrors {}

/// Failures of the lead conversion pipeline.
#[derive(Debug, Clone)]
pub enum ConversionError {
    /// A draft failed its schema. Recoverable inside the step.
    Validation(ValidationErrors),
    /// The duplicate lookup failed; duplicates are unknown, not absent.
    DuplicateSearch(String),
    /// The referenced lead (or linked client) does not exist for this tenant.
    NotFound(String),
    /// The lead was already converted by an earlier attempt.
    AlreadyConverted {
        /// Lead that was already processed.
        lead_id: Uuid,
    },
    /// The atomic batch did not land. Nothing was written; safe to retry.
    TransactionCommit(String),
    /// Copying interaction history failed. Never fails a conversion.
    HistoryTransfer(String),
}

impl ConversionError {
    /// Whether the operator may re-submit the same inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConversionError::TransactionCommit(_) | ConversionError::DuplicateSearch(_)
        )
    }

    /// Whether the error ends the wizard (message only, dialog must be reset).
    pub fn closes_wizard(&self) -> bool {
        matches!(
            self,
            ConversionError::NotFound(_) | ConversionError::AlreadyConverted { .. }
        )
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::Validation(e) => write!(f, "Validation failed: {}", e),
            ConversionError::DuplicateSearch(msg) => {
                write!(f, "Duplicate search failed, duplicates unknown: {}", msg)
            }
            ConversionError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ConversionError::AlreadyConverted { lead_id } => write!(
                f,
                "Lead {} was already converted; close this dialog and refresh",
                lead_id
            ),
            ConversionError::TransactionCommit(msg) => {
                write!(f, "Conversion could not be committed, nothing was saved: {}", msg)
            }
            ConversionError::HistoryTransfer(msg) => {
                write!(f, "Interaction history transfer failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConversionError {}

impl From<ValidationErrors> for ConversionError {
    fn from(err: ValidationErrors) -> Self {
        ConversionError::Validation(err)
    }
}

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Document store errors.
    StoreError(StoreError),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Draft validation failed; carries per-field details.
    Validation(ValidationErrors),
    /// The request conflicts with the current state (already converted, busy).
    Conflict(String),
    /// A retryable failure; nothing was persisted.
    Unavailable(String),
    /// Internal server error.
    InternalError(String),
    /// Missing or malformed actor headers.
    Unauthorized(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::StoreError(e) => write!(f, "Store error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Validation(e) => write!(f, "Validation failed: {}", e),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Maps each error variant to an appropriate HTTP status code and JSON body.
    /// Logs errors appropriately based on their severity.
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::StoreError(e) => {
                tracing::error!("Store error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Store error" }),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "Validation failed", "fields": errors.fields }),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::Unavailable(msg) => {
                tracing::warn!("Retryable failure: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error": msg, "retryable": true }),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, json!({ "error": "Unauthorized" }))
            }
            AppError::WithContext { source, context } => {
                // Log full context chain for debugging
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.into_response();
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => AppError::NotFound(msg),
            other => AppError::StoreError(other),
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::Validation(errors) => AppError::Validation(errors),
            ConversionError::NotFound(msg) => AppError::NotFound(msg),
            e @ ConversionError::AlreadyConverted { .. } => AppError::Conflict(e.to_string()),
            e @ ConversionError::TransactionCommit(_) => AppError::Unavailable(e.to_string()),
            e @ ConversionError::DuplicateSearch(_) => AppError::Unavailable(e.to_string()),
            e @ ConversionError::HistoryTransfer(_) => AppError::InternalError(e.to_string()),
        }
    }
}

impl From<WizardError> for AppError {
    fn from(err: WizardError) -> Self {
        match err {
            WizardError::Validation(errors) => AppError::Validation(errors),
            e @ WizardError::Busy => AppError::Conflict(e.to_string()),
            e @ WizardError::Closed(_) => AppError::Conflict(e.to_string()),
            other => AppError::BadRequest(other.to_string()),
        }
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for store errors to add context
impl<T> ResultExt<T> for Result<T, StoreError> {
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::from(e)),
            context: f(),
        })
    }
}
