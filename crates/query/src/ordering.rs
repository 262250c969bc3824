//! Named orderings and their resolution onto a scope.
//!
//! Resolution rules:
//! - an explicit `by` key wins, then an `id_in_set` position ordering, then
//!   the kind's default;
//! - `by=reverse_<key>` or `reverse=true` flips every term, the tie-break
//!   included (both together cancel out);
//! - named orderings end with `<base>.id DESC` so ties are deterministic;
//!   position orderings have no tie-break.

use tracing::debug;

use crate::error::{DeclarationError, QueryResult};
use crate::handlers::JoinStep;
use crate::kinds::KindStrategy;
use crate::schema::ValidatedParams;
use crate::scope::{FieldExpr, OrderExpr, OrderTerm, OrderingClause, Scope, SortDirection};

const REVERSE_PREFIX: &str = "reverse_";

/// Key recorded on clauses that order by `id_in_set` position.
pub const ID_SET_KEY: &str = "id_in_set";

/// A sort key's joins and terms, without the tie-break.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedOrdering {
    joins: Vec<JoinStep>,
    terms: Vec<OrderTerm>,
}

impl NamedOrdering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders by the tie-break alone.
    pub fn by_id() -> Self {
        Self::default()
    }

    /// Ordering joins are LEFT joins so that sorting never drops rows.
    pub fn outer_join(mut self, from: &'static str, to: &'static str) -> Self {
        self.joins.push(JoinStep::left(from, to));
        self
    }

    pub fn asc(self, field: impl Into<FieldExpr>) -> Self {
        self.term(OrderExpr::Field(field.into()), SortDirection::Asc)
    }

    pub fn desc(self, field: impl Into<FieldExpr>) -> Self {
        self.term(OrderExpr::Field(field.into()), SortDirection::Desc)
    }

    fn term(mut self, expr: OrderExpr, direction: SortDirection) -> Self {
        self.terms.push(OrderTerm { expr, direction });
        self
    }

    pub fn joins(&self) -> &[JoinStep] {
        &self.joins
    }

    pub fn terms(&self) -> &[OrderTerm] {
        &self.terms
    }
}

/// Split `reverse_name` into `("name", true)`.
fn split_reverse(by: &str) -> (&str, bool) {
    match by.strip_prefix(REVERSE_PREFIX) {
        Some(key) => (key, true),
        None => (by, false),
    }
}

/// Resolve the ordering requested by `params` and set it on `scope`.
pub fn resolve(strategy: &KindStrategy, params: &ValidatedParams, scope: &mut Scope) -> QueryResult<()> {
    let reverse_param = params.bool("reverse").unwrap_or(false);

    if let Some(by) = params.str("by") {
        let (key, prefixed) = split_reverse(by);
        return resolve_named(strategy, key, prefixed != reverse_param, scope);
    }

    if let Some(ids) = params.ids(ID_SET_KEY) {
        let direction = if reverse_param {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        scope.set_order(OrderingClause {
            key: Some(ID_SET_KEY.to_string()),
            reversed: reverse_param,
            terms: vec![OrderTerm {
                expr: OrderExpr::Position {
                    column: scope.id_column(),
                    ids,
                },
                direction,
            }],
        });
        return Ok(());
    }

    resolve_named(strategy, strategy.default_order, reverse_param, scope)
}

/// Apply the named ordering `key` with the standard tie-break.
pub fn resolve_named(
    strategy: &KindStrategy,
    key: &str,
    reversed: bool,
    scope: &mut Scope,
) -> QueryResult<()> {
    let ordering = strategy
        .orderings
        .get(key)
        .ok_or_else(|| DeclarationError::UnknownSortKey {
            kind: strategy.kind,
            key: key.to_string(),
        })?;

    for step in ordering.joins() {
        scope.join_with(step.from, step.to, step.kind)?;
    }

    let mut terms = ordering.terms().to_vec();
    terms.push(OrderTerm {
        expr: OrderExpr::Field(scope.id_column().into()),
        direction: SortDirection::Desc,
    });
    if reversed {
        for term in &mut terms {
            term.direction = term.direction.flip();
        }
    }

    debug!(kind = %strategy.kind, key, reversed, terms = terms.len(), "ordering resolved");
    scope.set_order(OrderingClause {
        key: Some(key.to_string()),
        reversed,
        terms,
    });
    Ok(())
}
