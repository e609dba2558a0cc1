use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::repos::RepoError, cache::CodecError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Flattened error chain for logging.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub class: ErrorClass,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, class: ErrorClass, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            class,
            messages,
        }
    }

    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request was wrong; retrying it unchanged will fail again.
    Client,
    /// A backend could not be reached in time; the same request may succeed later.
    Retryable,
    /// A fault in stored data or in this process.
    Internal,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("entity store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("cached value could not be decoded: {0}")]
    Serialization(#[from] CodecError),
    #[error("resource not found")]
    NotFound,
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Store(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Unavailable(message) => Self::StoreUnavailable(message),
            RepoError::Timeout => Self::StoreUnavailable("query deadline exceeded".to_string()),
            RepoError::NotFound => Self::NotFound,
            RepoError::Duplicate { constraint } => Self::Conflict(constraint),
            RepoError::InvalidInput { message } => Self::Validation(message),
            RepoError::Integrity { message } => Self::Store(message),
            RepoError::Persistence(message) => Self::Store(message),
        }
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Domain(_)
            | AppError::NotFound
            | AppError::Conflict(_)
            | AppError::Validation(_) => ErrorClass::Client,
            AppError::StoreUnavailable(_) => ErrorClass::Retryable,
            AppError::Infra(InfraError::Database { .. } | InfraError::Cache { .. }) => {
                ErrorClass::Retryable
            }
            AppError::Infra(_)
            | AppError::Serialization(_)
            | AppError::Store(_)
            | AppError::Unexpected(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(DomainError::NotFound { .. }) | AppError::NotFound => {
                "Resource not found"
            }
            AppError::Domain(DomainError::Validation { .. }) | AppError::Validation(_) => {
                "Request could not be processed"
            }
            AppError::Conflict(_) => "Resource already exists",
            AppError::StoreUnavailable(_) => "Service temporarily unavailable",
            AppError::Infra(InfraError::Database { .. }) => "Service temporarily unavailable",
            AppError::Infra(InfraError::Cache { .. }) => "Cache backend could not start",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Serialization(_) | AppError::Store(_) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self.class(), self)
    }
}
