//! Composable scope algebra.
//!
//! A [`Scope`] is the executable specification derived from validated
//! parameters: a target kind, deduplicated joins, a conjunction of
//! predicates, optional alternative passes whose id sets are unioned,
//! and an ordering clause. Executors render it (see [`sql`]) or evaluate
//! it directly.

pub mod sql;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::associations;
use crate::error::DeclarationError;
use crate::kinds::EntityKind;

// ---------------------------------------------------------------------------
// Fields and literals
// ---------------------------------------------------------------------------

/// A table-qualified column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

/// Shorthand for [`ColumnRef::new`].
pub fn col(table: &str, column: &str) -> ColumnRef {
    ColumnRef::new(table, column)
}

/// A scalar value in a predicate or a stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v.into())
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Text(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Text(v)
    }
}

impl From<NaiveDate> for Literal {
    fn from(v: NaiveDate) -> Self {
        Literal::Date(v)
    }
}

impl From<NaiveDateTime> for Literal {
    fn from(v: NaiveDateTime) -> Self {
        Literal::Timestamp(v)
    }
}

/// Value expression over one or more columns.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldExpr {
    Column(ColumnRef),
    /// String concatenation; NULL parts contribute nothing.
    Concat(Vec<FieldExpr>),
    /// First part that is neither NULL nor the empty string.
    FirstNonBlank(Vec<FieldExpr>),
    Month(Box<FieldExpr>),
    Day(Box<FieldExpr>),
    /// `offset + sum(weight * column)`; NULL if any column is NULL.
    Linear {
        terms: Vec<(ColumnRef, f64)>,
        offset: f64,
    },
}

impl FieldExpr {
    /// Tables (aliases) the expression reads from.
    pub fn tables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_tables(&mut out);
        out
    }

    fn collect_tables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            FieldExpr::Column(c) => {
                out.insert(c.table.as_str());
            }
            FieldExpr::Concat(parts) | FieldExpr::FirstNonBlank(parts) => {
                for part in parts {
                    part.collect_tables(out);
                }
            }
            FieldExpr::Month(inner) | FieldExpr::Day(inner) => inner.collect_tables(out),
            FieldExpr::Linear { terms, .. } => {
                for (column, _) in terms {
                    out.insert(column.table.as_str());
                }
            }
        }
    }

    pub fn month(self) -> Self {
        FieldExpr::Month(Box::new(self))
    }

    pub fn day(self) -> Self {
        FieldExpr::Day(Box::new(self))
    }

    pub fn linear(terms: Vec<(ColumnRef, f64)>, offset: f64) -> Self {
        FieldExpr::Linear { terms, offset }
    }
}

impl From<ColumnRef> for FieldExpr {
    fn from(c: ColumnRef) -> Self {
        FieldExpr::Column(c)
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A column projection of a nested scope, used by `IN (subquery)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubSelect {
    pub scope: Scope,
    pub column: ColumnRef,
}

/// Hand-written SQL for conditions the structured algebra cannot express.
///
/// Placeholders are `$1`, `$2`, ... bound from `values` in order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFragment {
    pub sql: String,
    pub values: Vec<Literal>,
}

impl RawFragment {
    pub fn new(sql: impl Into<String>, values: Vec<Literal>) -> Self {
        Self {
            sql: sql.into(),
            values,
        }
    }
}

/// A boolean condition over the joined row.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: FieldExpr,
        op: CompareOp,
        value: Literal,
    },
    CompareColumns {
        left: ColumnRef,
        op: CompareOp,
        right: ColumnRef,
    },
    /// Case-insensitive LIKE; `pattern` is already escaped with `\`.
    Like {
        field: FieldExpr,
        pattern: String,
        negated: bool,
    },
    InList {
        field: FieldExpr,
        values: Vec<Literal>,
        negated: bool,
    },
    IsNull {
        field: FieldExpr,
        negated: bool,
    },
    InSubquery {
        field: ColumnRef,
        subquery: Box<SubSelect>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Constant(bool),
    Raw(RawFragment),
}

impl Predicate {
    pub fn compare(field: impl Into<FieldExpr>, op: CompareOp, value: impl Into<Literal>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<FieldExpr>, value: impl Into<Literal>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn columns_eq(left: ColumnRef, right: ColumnRef) -> Self {
        Predicate::CompareColumns {
            left,
            op: CompareOp::Eq,
            right,
        }
    }

    pub fn is_null(field: impl Into<FieldExpr>) -> Self {
        Predicate::IsNull {
            field: field.into(),
            negated: false,
        }
    }

    pub fn is_not_null(field: impl Into<FieldExpr>) -> Self {
        Predicate::IsNull {
            field: field.into(),
            negated: true,
        }
    }

    pub fn like(field: impl Into<FieldExpr>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            field: field.into(),
            pattern: pattern.into(),
            negated: false,
        }
    }

    pub fn not_like(field: impl Into<FieldExpr>, pattern: impl Into<String>) -> Self {
        Predicate::Like {
            field: field.into(),
            pattern: pattern.into(),
            negated: true,
        }
    }

    /// `field IN (values)`; an empty list matches nothing.
    pub fn in_list(field: impl Into<FieldExpr>, values: Vec<Literal>) -> Self {
        if values.is_empty() {
            return Predicate::Constant(false);
        }
        Predicate::InList {
            field: field.into(),
            values,
            negated: false,
        }
    }

    pub fn in_ids(column: ColumnRef, ids: &[i64]) -> Self {
        Self::in_list(column, ids.iter().copied().map(Literal::Int).collect())
    }

    pub fn in_subquery(field: ColumnRef, scope: Scope, column: ColumnRef) -> Self {
        Predicate::InSubquery {
            field,
            subquery: Box::new(SubSelect { scope, column }),
        }
    }

    /// Conjunction, flattened; a single operand is returned as-is.
    pub fn all(mut parts: Vec<Predicate>) -> Self {
        match parts.len() {
            0 => Predicate::Constant(true),
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    /// Disjunction, flattened; a single operand is returned as-is.
    pub fn any(mut parts: Vec<Predicate>) -> Self {
        match parts.len() {
            0 => Predicate::Constant(false),
            1 => parts.remove(0),
            _ => Predicate::Or(parts),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Rough count of leaf conditions, used in logs and tests.
    pub fn leaf_count(&self) -> usize {
        match self {
            Predicate::And(parts) | Predicate::Or(parts) => parts.iter().map(Self::leaf_count).sum(),
            Predicate::Not(inner) => inner.leaf_count(),
            _ => 1,
        }
    }

    /// True if this predicate uses the raw SQL escape hatch anywhere.
    pub fn has_raw(&self) -> bool {
        match self {
            Predicate::Raw(_) => true,
            Predicate::And(parts) | Predicate::Or(parts) => parts.iter().any(Self::has_raw),
            Predicate::Not(inner) => inner.has_raw(),
            Predicate::InSubquery { subquery, .. } => subquery.scope.has_raw(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Joins and passes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
}

/// One join of the scope. Joins are identified by alias.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub table: String,
    pub alias: String,
    pub kind: JoinKind,
    pub on: Predicate,
}

/// Alternative join/predicate set. The id lists of all passes are unioned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pass {
    pub joins: Vec<JoinSpec>,
    pub predicates: Vec<Predicate>,
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn flip(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderExpr {
    Field(FieldExpr),
    /// Position of `column` within an externally supplied id list.
    Position { column: ColumnRef, ids: Vec<i64> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub expr: OrderExpr,
    pub direction: SortDirection,
}

/// Resolved ordering: the named key it came from and its concrete terms,
/// tie-break included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderingClause {
    pub key: Option<String>,
    pub reversed: bool,
    pub terms: Vec<OrderTerm>,
}

/// Title/description hint for callers rendering the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleHint {
    pub tag: String,
    pub args: BTreeMap<String, String>,
}

impl TitleHint {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.args.insert(key.into(), value.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Executable predicate/join/order specification for one entity kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    kind: EntityKind,
    base: String,
    joins: Vec<JoinSpec>,
    predicates: Vec<Predicate>,
    passes: Vec<Pass>,
    order: OrderingClause,
    title: Option<TitleHint>,
}

impl Scope {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            base: kind.table().to_string(),
            joins: Vec::new(),
            predicates: Vec::new(),
            passes: Vec::new(),
            order: OrderingClause::default(),
            title: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn id_column(&self) -> ColumnRef {
        ColumnRef::new(self.base.clone(), "id")
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn order(&self) -> &OrderingClause {
        &self.order
    }

    pub fn title(&self) -> Option<&TitleHint> {
        self.title.as_ref()
    }

    /// Join aliases as a set; join order does not matter for equality.
    pub fn join_aliases(&self) -> BTreeSet<&str> {
        self.joins.iter().map(|j| j.alias.as_str()).collect()
    }

    pub fn has_join(&self, alias: &str) -> bool {
        alias == self.base || self.joins.iter().any(|j| j.alias == alias)
    }

    /// Joined scopes are grouped by the base id to undo row fan-out.
    pub fn grouping(&self) -> Option<ColumnRef> {
        let joined = !self.joins.is_empty() || self.passes.iter().any(|p| !p.joins.is_empty());
        joined.then(|| self.id_column())
    }

    /// Add a join unless one with the same alias is already present.
    ///
    /// Returns true if the join was added.
    pub fn add_join(&mut self, join: JoinSpec) -> bool {
        if self.has_join(&join.alias) {
            return false;
        }
        self.joins.push(join);
        true
    }

    /// Join `to` onto the already-present alias `from` via the declared
    /// association table.
    pub fn join(&mut self, from: &str, to: &str) -> Result<(), DeclarationError> {
        self.join_with(from, to, JoinKind::Inner)
    }

    /// Like [`Scope::join`], but as a LEFT JOIN.
    pub fn outer_join(&mut self, from: &str, to: &str) -> Result<(), DeclarationError> {
        self.join_with(from, to, JoinKind::Left)
    }

    pub fn join_with(&mut self, from: &str, to: &str, kind: JoinKind) -> Result<(), DeclarationError> {
        let spec = associations::join_spec(from, to, kind)?;
        self.add_join(spec);
        Ok(())
    }

    pub fn and_where(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    pub fn add_pass(&mut self, pass: Pass) {
        self.passes.push(pass);
    }

    pub fn set_order(&mut self, order: OrderingClause) {
        self.order = order;
    }

    pub fn set_title(&mut self, title: TitleHint) {
        self.title = Some(title);
    }

    /// Number of conditions contributed so far, passes included.
    pub fn condition_count(&self) -> usize {
        self.predicates.len() + self.passes.len()
    }

    pub fn has_raw(&self) -> bool {
        self.predicates.iter().any(Predicate::has_raw)
            || self
                .passes
                .iter()
                .any(|p| p.predicates.iter().any(Predicate::has_raw))
    }

    /// One pass-free scope per pass, each carrying the shared joins and
    /// predicates plus that pass's own. A scope without passes yields itself.
    pub fn flatten_passes(&self) -> Vec<Scope> {
        if self.passes.is_empty() {
            return vec![self.clone()];
        }
        self.passes
            .iter()
            .map(|pass| {
                let mut flat = Scope {
                    passes: Vec::new(),
                    ..self.clone()
                };
                for join in &pass.joins {
                    flat.add_join(join.clone());
                }
                flat.predicates.extend(pass.predicates.iter().cloned());
                flat
            })
            .collect()
    }

    /// Same joins and ordering, restricted to the given ids and nothing else.
    pub fn restricted_to_ids(&self, ids: &[i64]) -> Scope {
        Scope {
            predicates: vec![Predicate::in_ids(self.id_column(), ids)],
            passes: Vec::new(),
            ..self.clone()
        }
    }

    /// Re-home the scope onto another kind's base table. Used by coercion,
    /// which prepends `path` joins and folds colliding joins into predicates.
    pub(crate) fn retarget(&self, kind: EntityKind, path: Vec<JoinSpec>) -> Scope {
        let base = kind.table().to_string();
        let mut joins: Vec<JoinSpec> = Vec::with_capacity(path.len() + self.joins.len());
        let mut predicates = Vec::new();
        for join in path {
            if join.alias != base && !joins.iter().any(|j: &JoinSpec| j.alias == join.alias) {
                joins.push(join);
            }
        }
        for join in &self.joins {
            let collides = join.alias == base || joins.iter().any(|j| j.alias == join.alias);
            if !collides {
                joins.push(join.clone());
            } else if join.kind == JoinKind::Inner {
                predicates.push(join.on.clone());
            } else {
                tracing::debug!(alias = %join.alias, "dropping colliding outer join during coercion");
            }
        }
        predicates.extend(self.predicates.iter().cloned());
        Scope {
            kind,
            base,
            joins,
            predicates,
            passes: self.passes.clone(),
            order: OrderingClause::default(),
            title: self.title.clone(),
        }
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn joins_are_idempotent() {
        let mut scope = Scope::new(EntityKind::Observation);
        scope.join("observations", "names").unwrap();
        scope.join("observations", "names").unwrap();
        scope.outer_join("observations", "names").unwrap();

        assert_eq!(scope.joins().len(), 1);
        assert!(scope.has_join("names"));
        assert_eq!(scope.grouping(), Some(col("observations", "id")));
    }

    #[test]
    fn base_table_is_never_joined() {
        let mut scope = Scope::new(EntityKind::Name);
        let added = scope.add_join(JoinSpec {
            table: "names".to_string(),
            alias: "names".to_string(),
            kind: JoinKind::Inner,
            on: Predicate::Constant(true),
        });
        assert!(!added);
        assert!(scope.grouping().is_none());
    }

    #[test]
    fn undeclared_association_fails() {
        let mut scope = Scope::new(EntityKind::Observation);
        let err = scope.join("observations", "herbaria").unwrap_err();
        assert!(matches!(err, DeclarationError::UndeclaredAssociation { .. }));
        assert!(scope.joins().is_empty());
    }

    #[test]
    fn empty_id_list_matches_nothing() {
        assert_eq!(
            Predicate::in_ids(col("observations", "id"), &[]),
            Predicate::Constant(false)
        );
    }

    #[test]
    fn flatten_passes_shares_base_conditions() {
        let mut scope = Scope::new(EntityKind::Observation);
        scope.and_where(Predicate::eq(col("observations", "user_id"), 1));
        scope.add_pass(Pass {
            joins: Vec::new(),
            predicates: vec![Predicate::like(col("observations", "notes"), "%a%")],
        });
        let mut second = Pass::default();
        second
            .joins
            .push(associations::join_spec("observations", "comments", JoinKind::Inner).unwrap());
        second
            .predicates
            .push(Predicate::like(col("comments", "comment"), "%a%"));
        scope.add_pass(second);

        let flat = scope.flatten_passes();
        assert_eq!(flat.len(), 2);
        assert!(flat.iter().all(|s| s.passes().is_empty()));
        assert!(flat.iter().all(|s| s.predicates().len() == 2));
        assert!(flat[0].joins().is_empty());
        assert_eq!(flat[1].joins().len(), 1);
    }

    #[test]
    fn restricted_scope_keeps_joins_and_order() {
        let mut scope = Scope::new(EntityKind::Observation);
        scope.join("observations", "names").unwrap();
        scope.and_where(Predicate::eq(col("names", "rank"), 4));
        scope.set_order(OrderingClause {
            key: Some("name".to_string()),
            reversed: false,
            terms: vec![OrderTerm {
                expr: OrderExpr::Field(col("names", "sort_name").into()),
                direction: SortDirection::Asc,
            }],
        });

        let restricted = scope.restricted_to_ids(&[3, 1]);
        assert_eq!(restricted.joins(), scope.joins());
        assert_eq!(restricted.order(), scope.order());
        assert_eq!(restricted.predicates().len(), 1);
    }
}
