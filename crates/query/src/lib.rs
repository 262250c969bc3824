//! Sporeprint query engine.
//!
//! Turns raw, URL-style parameter maps into validated parameter sets,
//! composes them into executable scopes over the biodiversity tables,
//! coerces queries between related entity kinds, and pages through the
//! memoized results. Persisted queries let callers resume a result list by
//! id across requests.
//!
//! The `sporeprint-query` binary is a thin command line over
//! [`QueryEngine`].

pub mod associations;
pub mod builder;
pub mod catalog;
pub mod coerce;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filters;
pub mod grammar;
pub mod handlers;
pub mod instance;
pub mod kinds;
pub mod ordering;
pub mod results;
pub mod schema;
pub mod scope;
pub mod store;

pub use builder::{BuiltScope, ScopeBuilder};
pub use catalog::Catalog;
pub use coerce::Coercion;
pub use config::{Config, EngineLimits};
pub use descriptor::QueryDescriptor;
pub use engine::QueryEngine;
pub use error::{DeclarationError, ExecutionError, QueryError, QueryResult, ValidationError};
pub use executor::{MemoryExecutor, PgExecutor, QueryExecutor, Record};
pub use filters::ContentFilterPrefs;
pub use instance::{InstanceState, QueryInstance};
pub use kinds::EntityKind;
pub use results::{LetterFilter, Page, PageRequest};
pub use schema::{ParamValue, RawParams, ValidatedParams};
pub use scope::Scope;
pub use store::{MemoryQueryStore, PgQueryStore, QueryRecord, QueryStore};
