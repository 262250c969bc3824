//! The registry of per-kind strategies, validated once at startup.

use std::collections::HashMap;

use tracing::debug;

use crate::associations;
use crate::error::DeclarationError;
use crate::kinds::{EntityKind, KindStrategy};
use crate::schema::{ParamRole, ParameterSchema, SchemaLookup};

/// All strategies the engine can build scopes for.
#[derive(Debug)]
pub struct Catalog {
    strategies: HashMap<EntityKind, KindStrategy>,
}

impl Catalog {
    /// The built-in strategies for every [`EntityKind`].
    pub fn standard() -> Result<Self, DeclarationError> {
        Self::from_strategies(EntityKind::ALL.into_iter().map(EntityKind::strategy))
    }

    /// Build a catalog, checking each strategy for completeness:
    /// every non-control parameter has a handler, no handler serves an
    /// undeclared parameter, the default ordering exists, and every
    /// association a handler or ordering joins through is declared.
    pub(crate) fn from_strategies(
        strategies: impl IntoIterator<Item = KindStrategy>,
    ) -> Result<Self, DeclarationError> {
        let mut map = HashMap::new();
        for strategy in strategies {
            check(&strategy)?;
            debug!(
                kind = %strategy.kind,
                params = strategy.schema.declarations().len(),
                orderings = strategy.orderings.len(),
                "registered query strategy"
            );
            map.insert(strategy.kind, strategy);
        }
        Ok(Self { strategies: map })
    }

    pub fn strategy(&self, kind: EntityKind) -> Result<&KindStrategy, DeclarationError> {
        self.strategies
            .get(&kind)
            .ok_or(DeclarationError::UndeclaredKind(kind))
    }

    pub fn schema(&self, kind: EntityKind) -> Result<&ParameterSchema, DeclarationError> {
        self.strategy(kind).map(|s| &s.schema)
    }

    /// Registered kinds, in declaration order of [`EntityKind::ALL`].
    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .into_iter()
            .filter(|k| self.strategies.contains_key(k))
            .collect()
    }
}

impl SchemaLookup for Catalog {
    fn schema_for(&self, kind: EntityKind) -> Option<&ParameterSchema> {
        self.strategies.get(&kind).map(|s| &s.schema)
    }
}

fn check(strategy: &KindStrategy) -> Result<(), DeclarationError> {
    let kind = strategy.kind;

    for decl in strategy.schema.declarations() {
        if decl.role != ParamRole::Control && !strategy.handlers.contains_key(decl.name) {
            return Err(DeclarationError::MissingHandler {
                kind,
                param: decl.name.to_string(),
            });
        }
    }

    for param in strategy.handlers.keys() {
        let declared = strategy
            .schema
            .get(param)
            .is_some_and(|d| d.role != ParamRole::Control);
        if !declared {
            return Err(DeclarationError::OrphanHandler {
                kind,
                param: param.to_string(),
            });
        }
    }

    if !strategy.orderings.contains_key(strategy.default_order) {
        return Err(DeclarationError::MissingDefaultOrdering {
            kind,
            key: strategy.default_order.to_string(),
        });
    }

    for step in strategy.join_steps() {
        if !associations::is_declared(step.from, step.to) {
            return Err(DeclarationError::UndeclaredAssociation {
                from: step.from.to_string(),
                to: step.to.to_string(),
            });
        }
    }

    Ok(())
}
