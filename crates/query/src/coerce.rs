//! Cross-kind coercion.
//!
//! A query for one kind becomes the equivalent query for a related kind by
//! walking a declared association path: the new base joins its way back to
//! the old base, so every old predicate still holds. Paths are one-way; an
//! undeclared pair is reported as [`Coercion::NotCoercible`], never as an
//! error.

use tracing::debug;

use crate::associations;
use crate::catalog::Catalog;
use crate::descriptor::QueryDescriptor;
use crate::error::QueryResult;
use crate::kinds::EntityKind;
use crate::ordering;
use crate::scope::{JoinKind, JoinSpec, Scope};

/// A declared route from one kind to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionPath {
    pub from: EntityKind,
    pub to: EntityKind,
    /// Joins from the target's table back to the source's table.
    steps: &'static [(&'static str, &'static str)],
    /// Ordering to resolve on the result; the target's default when unset.
    order: Option<&'static str>,
}

impl CoercionPath {
    const fn new(
        from: EntityKind,
        to: EntityKind,
        steps: &'static [(&'static str, &'static str)],
    ) -> Self {
        Self {
            from,
            to,
            steps,
            order: None,
        }
    }

    const fn ordered_by(mut self, key: &'static str) -> Self {
        self.order = Some(key);
        self
    }

    fn joins(&self) -> QueryResult<Vec<JoinSpec>> {
        let joins = self
            .steps
            .iter()
            .map(|(from, to)| associations::join_spec(from, to, JoinKind::Inner))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(joins)
    }
}

const PATHS: &[CoercionPath] = &[
    CoercionPath::new(
        EntityKind::Observation,
        EntityKind::Image,
        &[("images", "observation_images"), ("observation_images", "observations")],
    ),
    CoercionPath::new(
        EntityKind::Observation,
        EntityKind::Location,
        &[("locations", "observations")],
    ),
    CoercionPath::new(EntityKind::Observation, EntityKind::Name, &[("names", "observations")]),
    CoercionPath::new(
        EntityKind::Image,
        EntityKind::Observation,
        &[("observations", "observation_images"), ("observation_images", "images")],
    ),
    CoercionPath::new(
        EntityKind::RssLog,
        EntityKind::Observation,
        &[("observations", "rss_logs")],
    )
    .ordered_by("rss_log"),
    CoercionPath::new(EntityKind::RssLog, EntityKind::Name, &[("names", "rss_logs")])
        .ordered_by("rss_log"),
    CoercionPath::new(
        EntityKind::RssLog,
        EntityKind::Location,
        &[("locations", "rss_logs")],
    )
    .ordered_by("rss_log"),
];

/// The declared path from `from` to `to`, if any.
pub fn path(from: EntityKind, to: EntityKind) -> Option<&'static CoercionPath> {
    PATHS.iter().find(|p| p.from == from && p.to == to)
}

/// Kinds `from` can be coerced to directly.
pub fn targets(from: EntityKind) -> Vec<EntityKind> {
    PATHS.iter().filter(|p| p.from == from).map(|p| p.to).collect()
}

/// Outcome of a coercion attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion<T> {
    Coerced(T),
    NotCoercible { from: EntityKind, to: EntityKind },
}

impl<T> Coercion<T> {
    pub fn coerced(self) -> Option<T> {
        match self {
            Coercion::Coerced(value) => Some(value),
            Coercion::NotCoercible { .. } => None,
        }
    }

    pub fn is_coercible(&self) -> bool {
        matches!(self, Coercion::Coerced(_))
    }
}

/// Rewrite a built scope for `to`.
///
/// The old ordering is discarded and the path's (or the target's default)
/// ordering is resolved in its place.
pub fn coerce_scope(catalog: &Catalog, scope: &Scope, to: EntityKind) -> QueryResult<Coercion<Scope>> {
    let from = scope.kind();
    if from == to {
        return Ok(Coercion::Coerced(scope.clone()));
    }
    let Some(path) = path(from, to) else {
        debug!(%from, %to, "no coercion path");
        return Ok(Coercion::NotCoercible { from, to });
    };

    let mut coerced = scope.retarget(to, path.joins()?);
    let strategy = catalog.strategy(to)?;
    ordering::resolve_named(
        strategy,
        path.order.unwrap_or(strategy.default_order),
        false,
        &mut coerced,
    )?;

    debug!(%from, %to, joins = coerced.joins().len(), "scope coerced");
    Ok(Coercion::Coerced(coerced))
}

/// Coerce a query descriptor.
///
/// Coercing back to the kind a descriptor was itself coerced from returns
/// that source. When no direct path exists, the source is tried in turn.
pub fn coerce_descriptor(descriptor: &QueryDescriptor, to: EntityKind) -> Coercion<QueryDescriptor> {
    if descriptor.kind == to {
        return Coercion::Coerced(descriptor.clone());
    }
    if let Some(source) = descriptor.source.as_deref()
        && source.kind == to
    {
        return Coercion::Coerced(source.clone());
    }
    if path(descriptor.kind, to).is_some() {
        return Coercion::Coerced(QueryDescriptor::coerced_from(descriptor.clone(), to));
    }
    if let Some(source) = descriptor.source.as_deref() {
        return coerce_descriptor(source, to);
    }
    Coercion::NotCoercible {
        from: descriptor.kind,
        to,
    }
}
