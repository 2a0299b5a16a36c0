use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::model_client::ModelCallError;
use crate::pipeline::Stage;
use crate::schema::{DecodeError, SchemaViolation};

/// Why a single pipeline step failed.
#[derive(Debug, Clone, PartialEq)]
pub enum StepErrorKind {
    /// Uploaded text is unusable (empty, or too short to be a report).
    Extraction(String),
    RateLimited,
    ServiceOverloaded,
    /// The inference service rejected our credentials.
    InvalidCredentials,
    EmptyResponse,
    /// Connection, TLS or timeout failure before a response arrived.
    Transport(String),
    /// Any other non-success status from the inference service.
    Upstream { status: u16, message: String },
    MalformedOutput(String),
    SchemaViolation(Vec<SchemaViolation>),
    /// A prerequisite stage has no output yet.
    OutOfOrder { missing: Stage },
    /// Caller-supplied parameters are out of range.
    InvalidInput(String),
}

impl From<ModelCallError> for StepErrorKind {
    fn from(err: ModelCallError) -> Self {
        match err {
            ModelCallError::RateLimited => StepErrorKind::RateLimited,
            ModelCallError::Overloaded => StepErrorKind::ServiceOverloaded,
            ModelCallError::InvalidCredentials => StepErrorKind::InvalidCredentials,
            ModelCallError::EmptyResponse => StepErrorKind::EmptyResponse,
            ModelCallError::Transport(msg) => StepErrorKind::Transport(msg),
            ModelCallError::InvalidEnvelope(msg) => StepErrorKind::MalformedOutput(msg),
            ModelCallError::Upstream { status, body } => StepErrorKind::Upstream {
                status,
                message: body,
            },
        }
    }
}

impl From<DecodeError> for StepErrorKind {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Malformed(msg) => StepErrorKind::MalformedOutput(msg),
            DecodeError::Violations(v) => StepErrorKind::SchemaViolation(v),
        }
    }
}

/// Tagged failure of one pipeline step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepError {
    pub stage: Stage,
    pub kind: StepErrorKind,
}

impl StepError {
    pub fn new(stage: Stage, kind: impl Into<StepErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    /// Text safe to show to the end user, naming the failed stage.
    pub fn user_message(&self) -> String {
        let what = self.stage.label();
        match &self.kind {
            StepErrorKind::Extraction(reason) => {
                format!("Could not read the uploaded report: {}", reason)
            }
            StepErrorKind::RateLimited => format!(
                "The AI service is receiving too many requests. Please retry the {} in a moment.",
                what
            ),
            StepErrorKind::ServiceOverloaded => format!(
                "The AI service is temporarily overloaded. Please retry the {} shortly.",
                what
            ),
            StepErrorKind::InvalidCredentials => {
                "The AI service rejected this server's credentials. Please contact support."
                    .to_string()
            }
            StepErrorKind::OutOfOrder { missing } => {
                format!("Complete the {} before the {}.", missing.label(), what)
            }
            StepErrorKind::InvalidInput(reason) => reason.clone(),
            StepErrorKind::EmptyResponse
            | StepErrorKind::MalformedOutput(_)
            | StepErrorKind::SchemaViolation(_) => format!("AI failed to provide the {}.", what),
            StepErrorKind::Transport(_) | StepErrorKind::Upstream { .. } => {
                format!("The {} failed. Please try again.", what)
            }
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = self.stage.label();
        match &self.kind {
            StepErrorKind::Extraction(msg) => write!(f, "{} failed: {}", stage, msg),
            StepErrorKind::RateLimited => write!(f, "{} failed: rate limited", stage),
            StepErrorKind::ServiceOverloaded => write!(f, "{} failed: service overloaded", stage),
            StepErrorKind::InvalidCredentials => {
                write!(f, "{} failed: invalid model credentials", stage)
            }
            StepErrorKind::EmptyResponse => write!(f, "{} failed: empty model response", stage),
            StepErrorKind::Transport(msg) => write!(f, "{} failed: transport: {}", stage, msg),
            StepErrorKind::Upstream { status, message } => {
                write!(f, "{} failed: upstream {}: {}", stage, status, message)
            }
            StepErrorKind::MalformedOutput(msg) => {
                write!(f, "{} failed: malformed output: {}", stage, msg)
            }
            StepErrorKind::SchemaViolation(violations) => {
                let joined: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
                write!(f, "{} failed: schema violations: {}", stage, joined.join("; "))
            }
            StepErrorKind::OutOfOrder { missing } => {
                write!(f, "{} requires {} first", stage, missing.label())
            }
            StepErrorKind::InvalidInput(msg) => write!(f, "{} rejected input: {}", stage, msg),
        }
    }
}

impl std::error::Error for StepError {}

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Error interacting with an external API.
    ExternalApiError(String),
    /// A pipeline step failed.
    Step(StepError),
    /// Internal server error.
    InternalError(String),
    /// Unauthorized access error.
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
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::DatabaseError(e) => write!(f, "Database error: {}", e),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::Step(err) => write!(f, "Pipeline error: {}", err),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn step_status(err: &StepError) -> StatusCode {
        match err.kind {
            StepErrorKind::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StepErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            StepErrorKind::ServiceOverloaded => StatusCode::SERVICE_UNAVAILABLE,
            StepErrorKind::OutOfOrder { .. } => StatusCode::CONFLICT,
            StepErrorKind::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON body.
    fn into_response(self) -> Response {
        let (status, error_message, stage) = match &self {
            AppError::DatabaseError(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "External service error".to_string(),
                    None,
                )
            }
            AppError::Step(err) => {
                tracing::error!("{}", err);
                (
                    Self::step_status(err),
                    err.user_message(),
                    Some(err.stage.as_str()),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    None,
                )
            }
            AppError::Unauthorized(msg) => {
                tracing::warn!("Unauthorized access: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None)
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                return source.clone().into_response();
            }
        };

        let body = match stage {
            Some(stage) => Json(json!({ "error": error_message, "stage": stage })),
            None => Json(json!({ "error": error_message })),
        };

        (status, body).into_response()
    }
}

// Make AppError cloneable for WithContext variant
impl Clone for AppError {
    /// `sqlx::Error` is not cloneable, so `DatabaseError` degrades to
    /// `RowNotFound` when cloned.
    fn clone(&self) -> Self {
        match self {
            AppError::DatabaseError(_e) => AppError::DatabaseError(sqlx::Error::RowNotFound),
            AppError::NotFound(msg) => AppError::NotFound(msg.clone()),
            AppError::BadRequest(msg) => AppError::BadRequest(msg.clone()),
            AppError::ExternalApiError(msg) => AppError::ExternalApiError(msg.clone()),
            AppError::Step(err) => AppError::Step(err.clone()),
            AppError::InternalError(msg) => AppError::InternalError(msg.clone()),
            AppError::Unauthorized(msg) => AppError::Unauthorized(msg.clone()),
            AppError::WithContext { source, context } => AppError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

impl From<StepError> for AppError {
    fn from(err: StepError) -> Self {
        AppError::Step(err)
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

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

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::DatabaseError(e)),
            context: f(),
        })
    }
}
