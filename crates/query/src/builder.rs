//! Scope construction from validated parameters.
//!
//! Parameters are applied in declaration order through the kind's
//! capability table, then content filters are injected, then the ordering
//! is resolved. Nothing is executed here.

use tracing::debug;

use crate::catalog::Catalog;
use crate::coerce::{self, Coercion};
use crate::descriptor::QueryDescriptor;
use crate::error::{DeclarationError, QueryResult, ValidationError};
use crate::filters::{self, ContentFilterPrefs};
use crate::handlers::BuildContext;
use crate::kinds::{EntityKind, KindStrategy};
use crate::ordering;
use crate::schema::{ParamRole, ValidatedParams};
use crate::scope::Scope;

/// A composed scope plus the content filters that went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltScope {
    pub scope: Scope,
    pub applied_filters: Vec<String>,
}

/// Composes scopes using the strategies of a [`Catalog`].
pub struct ScopeBuilder<'a> {
    catalog: &'a Catalog,
}

impl<'a> ScopeBuilder<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Build the full scope for `kind`: conditions, content filters and
    /// ordering.
    pub fn build(
        &self,
        kind: EntityKind,
        params: &ValidatedParams,
        prefs: &ContentFilterPrefs,
    ) -> QueryResult<BuiltScope> {
        let strategy = self.catalog.strategy(kind)?;
        let mut scope = Scope::new(kind);

        apply_conditions(self.catalog, strategy, params, &mut scope)?;
        let applied_filters = filters::inject(self.catalog, strategy, &mut scope, params, prefs)?;
        ordering::resolve(strategy, params, &mut scope)?;

        debug!(
            kind = %kind,
            params = params.len(),
            joins = scope.joins().len(),
            predicates = scope.predicates().len(),
            passes = scope.passes().len(),
            order = scope.order().key.as_deref().unwrap_or_default(),
            "scope built"
        );
        Ok(BuiltScope {
            scope,
            applied_filters,
        })
    }

    /// Build a descriptor, following its coercion source if it has one.
    ///
    /// A coerced descriptor's own parameters refine the coerced scope; an
    /// explicit `by` or `reverse` among them replaces the path ordering.
    pub fn build_descriptor(&self, descriptor: &QueryDescriptor) -> QueryResult<BuiltScope> {
        let Some(source) = descriptor.source.as_deref() else {
            return self.build(descriptor.kind, &descriptor.params, &descriptor.content_filters);
        };

        let built = self.build_descriptor(source)?;
        let mut scope = match coerce::coerce_scope(self.catalog, &built.scope, descriptor.kind)? {
            Coercion::Coerced(scope) => scope,
            Coercion::NotCoercible { from, to } => {
                return Err(DeclarationError::UndeclaredCoercion { from, to }.into());
            }
        };

        let strategy = self.catalog.strategy(descriptor.kind)?;
        apply_conditions(self.catalog, strategy, &descriptor.params, &mut scope)?;
        if descriptor.params.contains("by") || descriptor.params.contains("reverse") {
            ordering::resolve(strategy, &descriptor.params, &mut scope)?;
        }

        Ok(BuiltScope {
            scope,
            applied_filters: built.applied_filters,
        })
    }
}

/// Conditions only: no content filters and no ordering. Used for nested
/// sub-queries, whose order is irrelevant.
pub(crate) fn condition_scope(
    catalog: &Catalog,
    kind: EntityKind,
    params: &ValidatedParams,
) -> QueryResult<Scope> {
    let strategy = catalog.strategy(kind)?;
    let mut scope = Scope::new(kind);
    apply_conditions(catalog, strategy, params, &mut scope)?;
    Ok(scope)
}

fn apply_conditions(
    catalog: &Catalog,
    strategy: &KindStrategy,
    params: &ValidatedParams,
    scope: &mut Scope,
) -> QueryResult<()> {
    let mut criteria_hits = 0usize;

    for decl in strategy.schema.declarations() {
        if decl.role == ParamRole::Control {
            continue;
        }
        let Some(value) = params.get(decl.name) else {
            continue;
        };
        let handler = strategy
            .handlers
            .get(decl.name)
            .ok_or_else(|| DeclarationError::MissingHandler {
                kind: strategy.kind,
                param: decl.name.to_string(),
            })?;

        let before = scope.condition_count();
        {
            let mut ctx = BuildContext::new(catalog, scope, params, decl.name);
            handler.apply(value, &mut ctx)?;
        }
        if decl.role == ParamRole::Criterion && scope.condition_count() > before {
            criteria_hits += 1;
        }
    }

    if params.bool("advanced_search") == Some(true) && criteria_hits == 0 {
        return Err(ValidationError::NoSearchCriteria.into());
    }
    Ok(())
}
