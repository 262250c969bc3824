//! Entity kinds and their per-kind query strategies.
//!
//! Each kind contributes a [`KindStrategy`]: the parameter schema it accepts,
//! a capability table mapping parameter names to handlers, its named
//! orderings, the field used for letter pagination, and the associations
//! that may be eager-loaded alongside its records.

mod comment;
mod image;
mod location;
mod name;
mod observation;
mod rss_log;

pub use name::{RANKS, rank_ordinal};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::executor::IncludeSpec;
use crate::handlers::{IdSetHandler, JoinStep, ParamHandler, RangeHandler};
use crate::ordering::NamedOrdering;
use crate::schema::{ParamDecl, ParameterSchema, ValueKind};
use crate::scope::{FieldExpr, col};

/// A named category of domain object the engine can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Observation,
    Name,
    Location,
    Image,
    Comment,
    /// Activity feed spanning observations, names and locations.
    RssLog,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Observation,
        EntityKind::Name,
        EntityKind::Location,
        EntityKind::Image,
        EntityKind::Comment,
        EntityKind::RssLog,
    ];

    /// Backing table.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Observation => "observations",
            EntityKind::Name => "names",
            EntityKind::Location => "locations",
            EntityKind::Image => "images",
            EntityKind::Comment => "comments",
            EntityKind::RssLog => "rss_logs",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Observation => "Observation",
            EntityKind::Name => "Name",
            EntityKind::Location => "Location",
            EntityKind::Image => "Image",
            EntityKind::Comment => "Comment",
            EntityKind::RssLog => "RssLog",
        }
    }

    /// Foreign key column an activity feed entry uses to point at this kind.
    pub fn rss_log_column(self) -> Option<&'static str> {
        match self {
            EntityKind::Observation => Some("observation_id"),
            EntityKind::Name => Some("name_id"),
            EntityKind::Location => Some("location_id"),
            _ => None,
        }
    }

    pub(crate) fn strategy(self) -> KindStrategy {
        match self {
            EntityKind::Observation => observation::strategy(),
            EntityKind::Name => name::strategy(),
            EntityKind::Location => location::strategy(),
            EntityKind::Image => image::strategy(),
            EntityKind::Comment => comment::strategy(),
            EntityKind::RssLog => rss_log::strategy(),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entity kind name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for EntityKind {
    type Err = UnknownKind;

    /// Accepts `Observation`, `observation`, `observations`, `rss_log`, `RssLog`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "");
        EntityKind::ALL
            .into_iter()
            .find(|kind| {
                let name = kind.as_str().to_ascii_lowercase();
                normalized == name || normalized == kind.table().replace('_', "")
            })
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Everything the engine knows about querying one entity kind.
pub struct KindStrategy {
    pub kind: EntityKind,
    pub schema: ParameterSchema,
    pub handlers: HashMap<&'static str, Box<dyn ParamHandler>>,
    pub orderings: HashMap<&'static str, NamedOrdering>,
    pub default_order: &'static str,
    /// Title field for letter pagination, if this kind supports it.
    pub letter_field: Option<FieldExpr>,
    pub includes: Vec<IncludeSpec>,
}

impl KindStrategy {
    pub(crate) fn new(kind: EntityKind, schema: ParameterSchema, default_order: &'static str) -> Self {
        Self {
            kind,
            schema,
            handlers: HashMap::new(),
            orderings: HashMap::new(),
            default_order,
            letter_field: None,
            includes: Vec::new(),
        }
    }

    pub(crate) fn handler(mut self, param: &'static str, handler: impl ParamHandler + 'static) -> Self {
        self.handlers.insert(param, Box::new(handler));
        self
    }

    pub(crate) fn ordering(mut self, key: &'static str, ordering: NamedOrdering) -> Self {
        self.orderings.insert(key, ordering);
        self
    }

    pub(crate) fn letters(mut self, field: impl Into<FieldExpr>) -> Self {
        self.letter_field = Some(field.into());
        self
    }

    pub(crate) fn include(mut self, include: IncludeSpec) -> Self {
        self.includes.push(include);
        self
    }

    /// Named orderings available to this kind, sorted.
    pub fn ordering_keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.orderings.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

/// `by`, `reverse` and `id_in_set`, accepted by every kind.
pub(crate) fn base_schema(kind: EntityKind) -> ParameterSchema {
    ParameterSchema::new(kind)
        .param(ParamDecl::new("by", ValueKind::String).control())
        .param(ParamDecl::new("reverse", ValueKind::Boolean).control())
        .param(
            ParamDecl::new("id_in_set", ValueKind::list(ValueKind::Record(kind.table())))
                .empty_is_meaningful(),
        )
}

/// Creation and update times plus owner.
pub(crate) fn stamped(schema: ParameterSchema) -> ParameterSchema {
    schema
        .param(ParamDecl::new("created_at", ValueKind::range(ValueKind::Time)))
        .param(ParamDecl::new("updated_at", ValueKind::range(ValueKind::Time)))
        .param(ParamDecl::new("users", ValueKind::list(ValueKind::Record("users"))))
}

/// `search_*` criteria require `advanced_search=true` to mean anything.
pub(crate) fn advanced(schema: ParameterSchema, criteria: &[&'static str]) -> ParameterSchema {
    criteria.iter().fold(
        schema.param(ParamDecl::new("advanced_search", ValueKind::Boolean).control()),
        |schema, &name| schema.param(ParamDecl::new(name, ValueKind::Search).criterion()),
    )
}

/// Display name of a user, falling back to the login.
pub(crate) fn user_name() -> FieldExpr {
    FieldExpr::FirstNonBlank(vec![col("users", "name").into(), col("users", "login").into()])
}

impl KindStrategy {
    /// Handlers and orderings matching [`base_schema`].
    pub(crate) fn with_common(self) -> Self {
        let table = self.kind.table();
        self.handler("id_in_set", IdSetHandler::new(col(table, "id")))
            .ordering("id", NamedOrdering::by_id())
    }

    /// Handlers and orderings matching [`stamped`].
    pub(crate) fn with_stamps(self) -> Self {
        let table = self.kind.table();
        self.handler("created_at", RangeHandler::new(col(table, "created_at")))
            .handler("updated_at", RangeHandler::new(col(table, "updated_at")))
            .handler(
                "users",
                IdSetHandler::new(col(table, "user_id")).titled("query_title_by_user", "user"),
            )
            .ordering("created_at", NamedOrdering::new().desc(col(table, "created_at")))
            .ordering("updated_at", NamedOrdering::new().desc(col(table, "updated_at")))
            .ordering("user", NamedOrdering::new().outer_join(table, "users").asc(user_name()))
    }

    /// Activity-feed ordering for kinds that carry an `rss_log_id`.
    pub(crate) fn with_rss_log_ordering(self) -> Self {
        let table = self.kind.table();
        self.ordering(
            "rss_log",
            NamedOrdering::new()
                .outer_join(table, "rss_logs")
                .desc(col("rss_logs", "updated_at")),
        )
    }

    /// Every association a handler or ordering of this kind may join.
    pub(crate) fn join_steps(&self) -> Vec<JoinStep> {
        let handler_steps = self.handlers.values().flat_map(|h| h.join_steps());
        let ordering_steps = self.orderings.values().flat_map(|o| o.joins().iter().copied());
        handler_steps.chain(ordering_steps).collect()
    }
}

impl fmt::Debug for KindStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KindStrategy")
            .field("kind", &self.kind)
            .field("params", &self.schema.names())
            .field("orderings", &self.ordering_keys())
            .field("default_order", &self.default_order)
            .finish()
    }
}
