//! AppSync error types.
//!
//! An `AppSyncError` is either fatal at load time (`UnsupportedDataSource`,
//! `InvalidDefinition`) or local to one GraphQL field, where it becomes a
//! [`FieldError`] and the field resolves to `null`.

use std::fmt;

use crate::request::{FieldError, PathSegment};

/// Well-known AppSync error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum AppSyncErrorCode {
    /// A template failed to parse or referenced something unresolvable.
    #[default]
    TemplateEvaluationError,
    /// A template exceeded a step, depth, iteration or output cap.
    ResourceLimitExceeded,
    /// A data source of an unknown type was declared.
    UnsupportedDataSource,
    /// The emulator definition is inconsistent.
    InvalidDefinition,
    /// The GraphQL request is malformed.
    BadRequest,
    /// A data source invocation failed.
    DataSourceError,
    /// A template called `$util.unauthorized()`.
    Unauthorized,
    /// A template raised an error with `$util.error`.
    CustomTemplateError,
    /// The operation was abandoned before its data source ran.
    Cancelled,
    /// Internal failure.
    InternalFailure,
}

impl AppSyncErrorCode {
    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemplateEvaluationError => "TemplateEvaluationError",
            Self::ResourceLimitExceeded => "ResourceLimitExceeded",
            Self::UnsupportedDataSource => "UnsupportedDataSource",
            Self::InvalidDefinition => "InvalidDefinition",
            Self::BadRequest => "BadRequestException",
            Self::DataSourceError => "DataSourceError",
            Self::Unauthorized => "Unauthorized",
            Self::CustomTemplateError => "CustomTemplateException",
            Self::Cancelled => "Cancelled",
            Self::InternalFailure => "InternalFailure",
        }
    }

    /// Returns the HTTP status used when the error fails a whole request.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        match self {
            Self::BadRequest => http::StatusCode::BAD_REQUEST,
            Self::Unauthorized => http::StatusCode::UNAUTHORIZED,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AppSyncErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An AppSync error.
#[derive(Debug)]
pub struct AppSyncError {
    /// The error code.
    pub code: AppSyncErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// Client-visible `errorType`, overriding the code's name.
    pub error_type: Option<String>,
    /// Extra `data` attached by `$util.error`.
    pub data: Option<serde_json::Value>,
    /// Extra `errorInfo` attached by `$util.error`.
    pub error_info: Option<serde_json::Value>,
    /// The underlying source error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for AppSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppSyncError({}): {}", self.error_type(), self.message)
    }
}

impl std::error::Error for AppSyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl AppSyncError {
    /// Create a new `AppSyncError` with a custom message.
    #[must_use]
    pub fn with_message(code: AppSyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            error_type: None,
            data: None,
            error_info: None,
            source: None,
        }
    }

    /// Set the source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Override the client-visible error type.
    #[must_use]
    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// The client-visible error type.
    #[must_use]
    pub fn error_type(&self) -> &str {
        self.error_type.as_deref().unwrap_or(self.code.as_str())
    }

    /// Convert into a GraphQL field error at `path`.
    #[must_use]
    pub fn into_field_error(self, path: Vec<PathSegment>) -> FieldError {
        FieldError {
            error_type: Some(self.error_type().to_owned()),
            message: self.message,
            data: self.data,
            error_info: self.error_info,
            path,
        }
    }

    // -- Convenience constructors --

    /// Template failed to parse or evaluate.
    #[must_use]
    pub fn template(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::TemplateEvaluationError, message)
    }

    /// A hard evaluation cap was hit.
    #[must_use]
    pub fn resource_limit_exceeded(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::ResourceLimitExceeded, message)
    }

    /// Unknown data source type.
    #[must_use]
    pub fn unsupported_data_source(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::UnsupportedDataSource, message)
    }

    /// Inconsistent emulator definition.
    #[must_use]
    pub fn invalid_definition(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::InvalidDefinition, message)
    }

    /// Malformed request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::BadRequest, message)
    }

    /// Data source failure.
    #[must_use]
    pub fn data_source(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::DataSourceError, message)
    }

    /// Raised by `$util.unauthorized()`.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::with_message(
            AppSyncErrorCode::Unauthorized,
            "Not Authorized to access this field",
        )
    }

    /// Raised by `$util.error(message, type, data, info)`.
    #[must_use]
    pub fn custom(
        message: impl Into<String>,
        error_type: Option<String>,
        data: Option<serde_json::Value>,
        error_info: Option<serde_json::Value>,
    ) -> Self {
        Self {
            error_type,
            data,
            error_info,
            ..Self::with_message(AppSyncErrorCode::CustomTemplateError, message)
        }
    }

    /// Operation abandoned before invocation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::with_message(
            AppSyncErrorCode::Cancelled,
            "The operation was cancelled before its data source was invoked",
        )
    }

    /// Internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AppSyncErrorCode::InternalFailure, message)
    }
}
