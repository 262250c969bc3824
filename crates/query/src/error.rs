//! Query engine error types.

use thiserror::Error;
use uuid::Uuid;

use crate::kinds::EntityKind;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persisted query {0} not found")]
    NotFound(Uuid),

    #[error("query execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error("failed to serialize query descriptor")]
    Serialization(#[from] serde_json::Error),
}

impl QueryError {
    /// Caller errors: fix the input or fall back to a default query.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QueryError::Validation(_) | QueryError::NotFound(_))
    }

    /// Infrastructure errors the caller may retry as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::Execution(ExecutionError::Database(_)))
    }

    /// Name of the offending parameter, if this is a validation error.
    pub fn param(&self) -> Option<&str> {
        match self {
            QueryError::Validation(e) => e.param(),
            _ => None,
        }
    }
}

/// Programmer errors in the catalog of kinds, handlers and orderings.
///
/// These are never the caller's fault and are not worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeclarationError {
    #[error("no query strategy declared for {0}")]
    UndeclaredKind(EntityKind),

    #[error("can't figure out how to sort {kind} by :{key}")]
    UnknownSortKey { kind: EntityKind, key: String },

    #[error("{kind} declares parameter '{param}' but registers no handler for it")]
    MissingHandler { kind: EntityKind, param: String },

    #[error("{kind} registers a handler for undeclared parameter '{param}'")]
    OrphanHandler { kind: EntityKind, param: String },

    #[error("{0} queries do not support letter pagination")]
    LettersUnsupported(EntityKind),

    #[error("no association declared between '{from}' and '{to}'")]
    UndeclaredAssociation { from: String, to: String },

    #[error("{kind} declares no include named '{name}'")]
    UnknownInclude { kind: EntityKind, name: String },

    #[error("no coercion declared from {from} to {to}")]
    UndeclaredCoercion { from: EntityKind, to: EntityKind },

    #[error("{kind} default ordering '{key}' is not declared")]
    MissingDefaultOrdering { kind: EntityKind, key: String },
}

/// Caller errors in a raw parameter map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown parameter '{param}' for {kind} queries")]
    UnknownParameter { kind: EntityKind, param: String },

    #[error("parameter '{param}' expects {expected}, got '{got}'")]
    InvalidValue {
        param: String,
        expected: String,
        got: String,
    },

    #[error("missing required parameter '{param}'")]
    MissingParameter { param: String },

    #[error("invalid search string syntax in '{param}' at: '{at}'")]
    SearchSyntax { param: String, at: String },

    #[error("no search criteria supplied")]
    NoSearchCriteria,
}

impl ValidationError {
    /// The parameter the error refers to.
    pub fn param(&self) -> Option<&str> {
        match self {
            ValidationError::UnknownParameter { param, .. }
            | ValidationError::InvalidValue { param, .. }
            | ValidationError::MissingParameter { param }
            | ValidationError::SearchSyntax { param, .. } => Some(param),
            ValidationError::NoSearchCriteria => None,
        }
    }

    /// Qualify the parameter name with the enclosing sub-query parameter.
    pub(crate) fn nested_in(self, outer: &str) -> Self {
        let qualify = |param: String| format!("{outer}.{param}");
        match self {
            ValidationError::UnknownParameter { kind, param } => ValidationError::UnknownParameter {
                kind,
                param: qualify(param),
            },
            ValidationError::InvalidValue {
                param,
                expected,
                got,
            } => ValidationError::InvalidValue {
                param: qualify(param),
                expected,
                got,
            },
            ValidationError::MissingParameter { param } => ValidationError::MissingParameter {
                param: qualify(param),
            },
            ValidationError::SearchSyntax { param, at } => ValidationError::SearchSyntax {
                param: qualify(param),
                at,
            },
            ValidationError::NoSearchCriteria => ValidationError::NoSearchCriteria,
        }
    }
}

/// Failures of the underlying relational round trip.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("unsupported by this executor: {0}")]
    Unsupported(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        QueryError::Execution(ExecutionError::Database(err))
    }
}

/// Result type alias using QueryError.
pub type QueryResult<T> = Result<T, QueryError>;
