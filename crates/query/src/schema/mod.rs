//! Parameter declarations and validation.
//!
//! Every entity kind declares, in order, the parameters its queries accept.
//! Validation turns a [`RawParams`] map into an immutable
//! [`ValidatedParams`] whose values match their declarations exactly.

mod validate;
mod value;

use std::fmt;

pub use value::{DateSpec, ParamValue, RawParams, TimeSpec, ValidatedParams};

use crate::config::EngineLimits;
use crate::error::ValidationError;
use crate::kinds::EntityKind;

/// Shape of a declared parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    Integer,
    Float,
    String,
    /// A search string, checked against the search grammar.
    Search,
    Date,
    Time,
    Enum(&'static [&'static str]),
    /// Reference to a row of the named table, by id.
    Record(&'static str),
    List(Box<ValueKind>),
    /// `[min, max]`; either bound may be absent.
    Range(Box<ValueKind>),
    /// A nested parameter map for another kind's query.
    Subquery(EntityKind),
}

impl ValueKind {
    pub fn list(inner: ValueKind) -> Self {
        ValueKind::List(Box::new(inner))
    }

    pub fn range(inner: ValueKind) -> Self {
        ValueKind::Range(Box::new(inner))
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Boolean => f.write_str("a boolean"),
            ValueKind::Integer => f.write_str("an integer"),
            ValueKind::Float => f.write_str("a number"),
            ValueKind::String => f.write_str("a string"),
            ValueKind::Search => f.write_str("a search string"),
            ValueKind::Date => f.write_str("a date"),
            ValueKind::Time => f.write_str("a time"),
            ValueKind::Enum(values) => write!(f, "one of {}", values.join(", ")),
            ValueKind::Record(table) => write!(f, "a {table} id"),
            ValueKind::List(inner) => write!(f, "a list of {inner}"),
            ValueKind::Range(inner) => write!(f, "a range of {inner}"),
            ValueKind::Subquery(kind) => write!(f, "{kind} query parameters"),
        }
    }
}

/// How the scope builder treats a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Contributes predicates through its handler.
    Filter,
    /// A filter that counts as a search criterion for advanced search.
    Criterion,
    /// Consumed by the builder itself (`by`, `reverse`, `advanced_search`).
    Control,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: &'static str,
    pub kind: ValueKind,
    pub required: bool,
    /// Keep an explicitly empty list rather than dropping it as blank.
    pub empty_is_meaningful: bool,
    pub role: ParamRole,
}

impl ParamDecl {
    pub fn new(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            empty_is_meaningful: false,
            role: ParamRole::Filter,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn empty_is_meaningful(mut self) -> Self {
        self.empty_is_meaningful = true;
        self
    }

    pub fn criterion(mut self) -> Self {
        self.role = ParamRole::Criterion;
        self
    }

    pub fn control(mut self) -> Self {
        self.role = ParamRole::Control;
        self
    }
}

/// Source of schemas for nested sub-query parameters.
pub trait SchemaLookup {
    fn schema_for(&self, kind: EntityKind) -> Option<&ParameterSchema>;
}

/// Ordered parameter declarations for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSchema {
    kind: EntityKind,
    decls: Vec<ParamDecl>,
}

impl ParameterSchema {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            decls: Vec::new(),
        }
    }

    /// Declare a parameter. Re-declaring a name replaces it in place.
    pub fn param(mut self, decl: ParamDecl) -> Self {
        match self.decls.iter_mut().find(|d| d.name == decl.name) {
            Some(existing) => *existing = decl,
            None => self.decls.push(decl),
        }
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Declarations in declaration order.
    pub fn declarations(&self) -> &[ParamDecl] {
        &self.decls
    }

    pub fn get(&self, name: &str) -> Option<&ParamDecl> {
        self.decls.iter().find(|d| d.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.decls.iter().map(|d| d.name).collect()
    }

    /// Validate raw input against this schema.
    pub fn validate(
        &self,
        raw: &RawParams,
        lookup: &dyn SchemaLookup,
        limits: &EngineLimits,
    ) -> Result<ValidatedParams, ValidationError> {
        validate::validate(self, raw, lookup, limits)
    }
}
