//! In-memory executor.
//!
//! Evaluates the structured scope algebra directly over rows held in
//! memory: nested-loop joins, SQL three-valued logic, grouping by base id
//! with MIN over joined sort keys, NULLs last when ascending. Raw SQL
//! fragments cannot be evaluated here and are rejected.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::Datelike;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::{QueryExecutor, Record, RecordRequest};
use crate::error::ExecutionError;
use crate::scope::{
    ColumnRef, CompareOp, FieldExpr, JoinKind, Literal, OrderExpr, Predicate, Scope,
    SortDirection,
};

/// One stored row. A missing column reads as NULL.
pub type Row = BTreeMap<String, Literal>;

type Tables = HashMap<String, Vec<Row>>;

/// Alias to row for one joined tuple; `None` is the NULL side of a LEFT JOIN.
type Binding<'a> = HashMap<&'a str, Option<&'a Row>>;

/// Executor over in-memory tables.
#[derive(Debug, Default)]
pub struct MemoryExecutor {
    tables: RwLock<Tables>,
    round_trips: AtomicUsize,
    record_requests: Mutex<Vec<Vec<i64>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row: Row) {
        self.tables.write().entry(table.to_string()).or_default().push(row);
    }

    pub fn extend(&self, table: &str, rows: impl IntoIterator<Item = Row>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Keep only the rows of `table` for which `keep` holds.
    pub fn retain(&self, table: &str, keep: impl Fn(&Row) -> bool) {
        if let Some(rows) = self.tables.write().get_mut(table) {
            rows.retain(|row| keep(row));
        }
    }

    pub fn table_len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }

    /// Number of executor calls served so far.
    pub fn round_trips(&self) -> usize {
        self.round_trips.load(AtomicOrdering::SeqCst)
    }

    /// Id lists of every record request served so far, in call order.
    pub fn record_requests(&self) -> Vec<Vec<i64>> {
        self.record_requests.lock().clone()
    }

    fn tick(&self) {
        self.round_trips.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn select_ids(&self, scope: &Scope) -> Result<Vec<i64>, ExecutionError> {
        self.tick();
        let tables = self.tables.read();
        let ids = Evaluator { tables: &tables }
            .ordered(scope, None)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        Ok(ids)
    }

    async fn select_letter_projection(
        &self,
        scope: &Scope,
        title: &FieldExpr,
    ) -> Result<Vec<(i64, Option<String>)>, ExecutionError> {
        self.tick();
        let tables = self.tables.read();
        let pairs = Evaluator { tables: &tables }
            .ordered(scope, Some(title))?
            .into_iter()
            .map(|(id, title)| (id, title.map(|t| text(&t).chars().take(4).collect())))
            .collect();
        Ok(pairs)
    }

    async fn select_records(&self, request: &RecordRequest) -> Result<Vec<Record>, ExecutionError> {
        self.tick();
        self.record_requests.lock().push(request.ids.clone());
        let tables = self.tables.read();

        let wanted: HashSet<i64> = request.ids.iter().copied().collect();
        let mut records = rows_where_in(&tables, &request.table, "id", &wanted)
            .into_iter()
            .map(|row| Record::from_json(Value::Object(row)))
            .collect::<Result<Vec<_>, _>>()?;

        for include in &request.includes {
            let (column, keys) = include.lookup(&records);
            let keys: HashSet<i64> = keys.into_iter().collect();
            let children = rows_where_in(&tables, include.table, column, &keys);
            include.attach(&mut records, children);
        }
        Ok(records)
    }

    async fn count(&self, scope: &Scope) -> Result<u64, ExecutionError> {
        self.tick();
        let tables = self.tables.read();
        let ids = Evaluator { tables: &tables }.distinct_ids(scope)?;
        Ok(ids.len() as u64)
    }
}

fn rows_where_in(
    tables: &Tables,
    table: &str,
    column: &str,
    keys: &HashSet<i64>,
) -> Vec<Map<String, Value>> {
    let Some(rows) = tables.get(table) else {
        return Vec::new();
    };
    rows.iter()
        .filter(|row| matches!(row.get(column), Some(Literal::Int(k)) if keys.contains(k)))
        .map(row_json)
        .collect()
}

fn row_json(row: &Row) -> Map<String, Value> {
    row.iter()
        .map(|(k, v)| (k.clone(), literal_json(v)))
        .collect()
}

fn literal_json(literal: &Literal) -> Value {
    match literal {
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Int(v) => Value::from(*v),
        Literal::Float(v) => serde_json::Number::from_f64(*v).map_or(Value::Null, Value::Number),
        Literal::Text(v) => Value::String(v.clone()),
        Literal::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
        Literal::Timestamp(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string()),
    }
}

fn text(literal: &Literal) -> String {
    match literal {
        Literal::Text(v) => v.clone(),
        Literal::Bool(v) => v.to_string(),
        Literal::Int(v) => v.to_string(),
        Literal::Float(v) => v.to_string(),
        Literal::Date(v) => v.format("%Y-%m-%d").to_string(),
        Literal::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// SQL comparison of two non-NULL values; `None` when not comparable.
fn compare_literals(left: &Literal, right: &Literal) -> Option<Ordering> {
    use Literal::{Bool, Date, Float, Int, Text, Timestamp};
    match (left, right) {
        (Int(a), Int(b)) => Some(a.cmp(b)),
        (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
        (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Text(a), Text(b)) => Some(a.cmp(b)),
        (Bool(a), Bool(b)) => Some(a.cmp(b)),
        (Date(a), Date(b)) => Some(a.cmp(b)),
        (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
        (Date(a), Timestamp(b)) => Some(a.and_time(chrono::NaiveTime::MIN).cmp(b)),
        (Timestamp(a), Date(b)) => Some(a.cmp(&b.and_time(chrono::NaiveTime::MIN))),
        _ => None,
    }
}

/// Ascending order with NULLs after every value.
fn nulls_last(left: Option<&Literal>, right: Option<&Literal>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_literals(a, b).unwrap_or(Ordering::Equal),
    }
}

fn apply_op(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// Case-insensitive LIKE with `%`, `_` and `\` escapes.
fn like_matches(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.to_lowercase().chars().collect();
    let mut tokens = Vec::new();
    let mut chars = pattern.to_lowercase().chars().collect::<Vec<_>>().into_iter();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => LikeToken::Char(chars.next().unwrap_or('\\')),
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            c => LikeToken::Char(c),
        });
    }
    like_from(&value, &tokens)
}

#[derive(Clone, Copy)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

fn like_from(value: &[char], tokens: &[LikeToken]) -> bool {
    match tokens.split_first() {
        None => value.is_empty(),
        Some((LikeToken::Any, rest)) => (0..=value.len()).any(|skip| like_from(&value[skip..], rest)),
        Some((LikeToken::One, rest)) => !value.is_empty() && like_from(&value[1..], rest),
        Some((LikeToken::Char(c), rest)) => value.first() == Some(c) && like_from(&value[1..], rest),
    }
}

struct Evaluator<'t> {
    tables: &'t Tables,
}

impl<'t> Evaluator<'t> {
    fn rows(&self, table: &str) -> &'t [Row] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    /// Joined tuples of a pass-free scope that satisfy every predicate.
    fn matching<'a>(&'a self, scope: &'a Scope) -> Result<Vec<Binding<'a>>, ExecutionError> {
        let base = scope.base();
        let mut bindings: Vec<Binding<'a>> = self
            .rows(base)
            .iter()
            .map(|row| HashMap::from([(base, Some(row))]))
            .collect();

        for join in scope.joins() {
            let rows = self.rows(&join.table);
            let mut next = Vec::with_capacity(bindings.len());
            for binding in bindings {
                let mut matched = false;
                for row in rows {
                    let mut candidate = binding.clone();
                    candidate.insert(join.alias.as_str(), Some(row));
                    if self.eval(&join.on, &candidate)? == Some(true) {
                        next.push(candidate);
                        matched = true;
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut candidate = binding;
                    candidate.insert(join.alias.as_str(), None);
                    next.push(candidate);
                }
            }
            bindings = next;
        }

        let mut kept = Vec::with_capacity(bindings.len());
        'tuples: for binding in bindings {
            for predicate in scope.predicates() {
                if self.eval(predicate, &binding)? != Some(true) {
                    continue 'tuples;
                }
            }
            kept.push(binding);
        }
        Ok(kept)
    }

    /// Distinct matching base ids in first-appearance order, passes unioned.
    fn distinct_ids(&self, scope: &Scope) -> Result<Vec<i64>, ExecutionError> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for flat in scope.flatten_passes() {
            for binding in self.matching(&flat)? {
                let id = base_id(&flat, &binding)?;
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    /// Distinct base ids in scope order, each with the aggregated `title`
    /// if one is requested.
    fn ordered(
        &self,
        scope: &Scope,
        title: Option<&FieldExpr>,
    ) -> Result<Vec<(i64, Option<Literal>)>, ExecutionError> {
        if !scope.passes().is_empty() {
            let union = self.distinct_ids(scope)?;
            return self.ordered(&scope.restricted_to_ids(&union), title);
        }

        let mut first_seen: Vec<i64> = Vec::new();
        let mut groups: HashMap<i64, Vec<Binding<'_>>> = HashMap::new();
        for binding in self.matching(scope)? {
            let id = base_id(scope, &binding)?;
            groups
                .entry(id)
                .or_insert_with(|| {
                    first_seen.push(id);
                    Vec::new()
                })
                .push(binding);
        }

        let terms = &scope.order().terms;
        let mut keyed = Vec::with_capacity(first_seen.len());
        for id in first_seen {
            let group = groups.remove(&id).unwrap_or_default();
            let mut keys = Vec::with_capacity(terms.len());
            for term in terms {
                let key = match &term.expr {
                    OrderExpr::Field(field) => self.aggregate(scope, field, &group)?,
                    OrderExpr::Position { ids, .. } => ids
                        .iter()
                        .position(|candidate| *candidate == id)
                        .map(|p| Literal::Int(p as i64 + 1)),
                };
                keys.push(key);
            }
            let title = match title {
                Some(field) => self.aggregate(scope, field, &group)?,
                None => None,
            };
            keyed.push((id, keys, title));
        }

        keyed.sort_by(|(_, a, _), (_, b, _)| {
            for ((left, right), term) in a.iter().zip(b).zip(terms) {
                let ordering = nulls_last(left.as_ref(), right.as_ref());
                let ordering = match term.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(id, _, title)| (id, title)).collect())
    }

    /// A field's value for one base id: MIN over the group when the field
    /// reads a joined table, the (shared) base value otherwise.
    fn aggregate(
        &self,
        scope: &Scope,
        field: &FieldExpr,
        group: &[Binding<'_>],
    ) -> Result<Option<Literal>, ExecutionError> {
        let joined = field.tables().iter().any(|t| *t != scope.base());
        if !joined {
            return match group.first() {
                Some(binding) => self.field(field, binding),
                None => Ok(None),
            };
        }
        let mut min: Option<Literal> = None;
        for binding in group {
            if let Some(value) = self.field(field, binding)? {
                let smaller = match &min {
                    None => true,
                    Some(current) => compare_literals(&value, current) == Some(Ordering::Less),
                };
                if smaller {
                    min = Some(value);
                }
            }
        }
        Ok(min)
    }

    fn field(&self, field: &FieldExpr, binding: &Binding<'_>) -> Result<Option<Literal>, ExecutionError> {
        Ok(match field {
            FieldExpr::Column(column) => column_value(column, binding)?,
            FieldExpr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let Some(value) = self.field(part, binding)? {
                        out.push_str(&text(&value));
                    }
                }
                Some(Literal::Text(out))
            }
            FieldExpr::FirstNonBlank(parts) => {
                let mut found = None;
                for part in parts {
                    match self.field(part, binding)? {
                        Some(Literal::Text(t)) if t.is_empty() => {}
                        Some(value) => {
                            found = Some(value);
                            break;
                        }
                        None => {}
                    }
                }
                found
            }
            FieldExpr::Month(inner) => match self.field(inner, binding)? {
                Some(Literal::Date(d)) => Some(Literal::Int(i64::from(d.month()))),
                Some(Literal::Timestamp(t)) => Some(Literal::Int(i64::from(t.month()))),
                _ => None,
            },
            FieldExpr::Day(inner) => match self.field(inner, binding)? {
                Some(Literal::Date(d)) => Some(Literal::Int(i64::from(d.day()))),
                Some(Literal::Timestamp(t)) => Some(Literal::Int(i64::from(t.day()))),
                _ => None,
            },
            FieldExpr::Linear { terms, offset } => {
                let mut sum = *offset;
                for (column, weight) in terms {
                    match column_value(column, binding)? {
                        Some(Literal::Int(v)) => sum += weight * v as f64,
                        Some(Literal::Float(v)) => sum += weight * v,
                        _ => return Ok(None),
                    }
                }
                Some(Literal::Float(sum))
            }
        })
    }

    /// Three-valued evaluation: `None` is SQL UNKNOWN.
    fn eval(&self, predicate: &Predicate, binding: &Binding<'_>) -> Result<Option<bool>, ExecutionError> {
        Ok(match predicate {
            Predicate::Compare { field, op, value } => self
                .field(field, binding)?
                .and_then(|left| compare_literals(&left, value))
                .map(|ordering| apply_op(*op, ordering)),
            Predicate::CompareColumns { left, op, right } => {
                match (column_value(left, binding)?, column_value(right, binding)?) {
                    (Some(l), Some(r)) => compare_literals(&l, &r).map(|o| apply_op(*op, o)),
                    _ => None,
                }
            }
            Predicate::Like {
                field,
                pattern,
                negated,
            } => self
                .field(field, binding)?
                .map(|value| like_matches(&text(&value), pattern) != *negated),
            Predicate::InList {
                field,
                values,
                negated,
            } => self.field(field, binding)?.map(|value| {
                let found = values
                    .iter()
                    .any(|v| compare_literals(&value, v) == Some(Ordering::Equal));
                found != *negated
            }),
            Predicate::IsNull { field, negated } => {
                Some(self.field(field, binding)?.is_none() != *negated)
            }
            Predicate::InSubquery { field, subquery } => match column_value(field, binding)? {
                None => None,
                Some(value) => {
                    let mut found = false;
                    for flat in subquery.scope.flatten_passes() {
                        for inner in self.matching(&flat)? {
                            if let Some(candidate) = column_value(&subquery.column, &inner)?
                                && compare_literals(&value, &candidate) == Some(Ordering::Equal)
                            {
                                found = true;
                                break;
                            }
                        }
                        if found {
                            break;
                        }
                    }
                    Some(found)
                }
            },
            Predicate::And(parts) => {
                let mut result = Some(true);
                for part in parts {
                    match self.eval(part, binding)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            Predicate::Or(parts) => {
                let mut result = Some(false);
                for part in parts {
                    match self.eval(part, binding)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            Predicate::Not(inner) => self.eval(inner, binding)?.map(|v| !v),
            Predicate::Constant(value) => Some(*value),
            Predicate::Raw(fragment) => {
                return Err(ExecutionError::Unsupported(format!(
                    "raw SQL fragment: {}",
                    fragment.sql
                )));
            }
        })
    }
}

fn column_value(column: &ColumnRef, binding: &Binding<'_>) -> Result<Option<Literal>, ExecutionError> {
    match binding.get(column.table.as_str()) {
        Some(row) => Ok(row.and_then(|r| r.get(&column.column)).cloned()),
        None => Err(ExecutionError::Unsupported(format!(
            "column {}.{} refers to a table that is not joined",
            column.table, column.column
        ))),
    }
}

fn base_id(scope: &Scope, binding: &Binding<'_>) -> Result<i64, ExecutionError> {
    match column_value(&scope.id_column(), binding)? {
        Some(Literal::Int(id)) => Ok(id),
        _ => Err(ExecutionError::Corrupt(format!(
            "{} row without an integer id",
            scope.base()
        ))),
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::kinds::EntityKind;
    use crate::scope::{OrderTerm, OrderingClause, Pass, RawFragment, col};

    fn row(pairs: &[(&str, Literal)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn fixture() -> MemoryExecutor {
        let executor = MemoryExecutor::new();
        executor.extend(
            "names",
            [
                row(&[("id", 1.into()), ("sort_name", "Amanita".into())]),
                row(&[("id", 2.into()), ("sort_name", "Boletus".into())]),
            ],
        );
        executor.extend(
            "observations",
            [
                row(&[("id", 10.into()), ("name_id", 2.into()), ("notes", "spores".into())]),
                row(&[("id", 11.into()), ("name_id", 1.into())]),
                row(&[("id", 12.into())]),
            ],
        );
        executor.extend(
            "comments",
            [
                row(&[
                    ("id", 100.into()),
                    ("target_id", 12.into()),
                    ("target_type", "Observation".into()),
                    ("comment", "Spore print white".into()),
                ]),
                row(&[
                    ("id", 101.into()),
                    ("target_id", 12.into()),
                    ("target_type", "Observation".into()),
                    ("comment", "more spores".into()),
                ]),
            ],
        );
        executor
    }

    fn ordered_by(scope: &mut Scope, expr: OrderExpr, direction: SortDirection) {
        scope.set_order(OrderingClause {
            key: None,
            reversed: false,
            terms: vec![OrderTerm { expr, direction }],
        });
    }

    #[test]
    fn like_handles_wildcards_and_escapes() {
        assert!(like_matches("Spore Print", "%print%"));
        assert!(like_matches("a_b", "a\\_b"));
        assert!(!like_matches("axb", "a\\_b"));
        assert!(like_matches("axb", "a_b"));
        assert!(!like_matches("lichen", "% lichen %"));
        assert!(like_matches(" lichen ", "% lichen %"));
    }

    #[tokio::test]
    async fn outer_join_sorts_nulls_last() {
        let executor = fixture();
        let mut scope = Scope::new(EntityKind::Observation);
        scope.outer_join("observations", "names").unwrap();
        ordered_by(
            &mut scope,
            OrderExpr::Field(col("names", "sort_name").into()),
            SortDirection::Asc,
        );
        assert_eq!(executor.select_ids(&scope).await.unwrap(), vec![11, 10, 12]);

        ordered_by(
            &mut scope,
            OrderExpr::Field(col("names", "sort_name").into()),
            SortDirection::Desc,
        );
        assert_eq!(executor.select_ids(&scope).await.unwrap(), vec![12, 10, 11]);
    }

    #[tokio::test]
    async fn fan_out_is_grouped_by_base_id() {
        let executor = fixture();
        let mut scope = Scope::new(EntityKind::Observation);
        scope.join("observations", "comments").unwrap();
        assert_eq!(executor.select_ids(&scope).await.unwrap(), vec![12]);
        assert_eq!(executor.count(&scope).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn passes_are_unioned() {
        let executor = fixture();
        let mut scope = Scope::new(EntityKind::Observation);
        scope.add_pass(Pass {
            joins: Vec::new(),
            predicates: vec![Predicate::like(col("observations", "notes"), "%spore%")],
        });
        let mut second = Pass::default();
        second.joins.push(
            crate::associations::join_spec("observations", "comments", JoinKind::Inner).unwrap(),
        );
        second
            .predicates
            .push(Predicate::like(col("comments", "comment"), "%spore%"));
        scope.add_pass(second);
        ordered_by(
            &mut scope,
            OrderExpr::Field(col("observations", "id").into()),
            SortDirection::Asc,
        );

        assert_eq!(executor.select_ids(&scope).await.unwrap(), vec![10, 12]);
        assert_eq!(executor.count(&scope).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn null_comparisons_are_unknown() {
        let executor = fixture();
        let mut scope = Scope::new(EntityKind::Observation);
        scope.and_where(Predicate::not(Predicate::eq(col("observations", "notes"), "spores")));
        // Row 10 fails; rows 11 and 12 have NULL notes, so NOT (NULL = x) is unknown.
        assert!(executor.select_ids(&scope).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sub_queries_project_a_column() {
        let executor = fixture();
        let mut inner = Scope::new(EntityKind::Observation);
        inner.and_where(Predicate::is_not_null(col("observations", "notes")));
        let mut scope = Scope::new(EntityKind::Name);
        scope.and_where(Predicate::in_subquery(
            col("names", "id"),
            inner,
            col("observations", "name_id"),
        ));
        assert_eq!(executor.select_ids(&scope).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn letter_projection_takes_four_characters() {
        let executor = fixture();
        let mut scope = Scope::new(EntityKind::Name);
        ordered_by(
            &mut scope,
            OrderExpr::Field(col("names", "sort_name").into()),
            SortDirection::Asc,
        );
        let pairs = executor
            .select_letter_projection(&scope, &col("names", "sort_name").into())
            .await
            .unwrap();
        assert_eq!(
            pairs,
            vec![(1, Some("Aman".to_string())), (2, Some("Bole".to_string()))]
        );
    }

    #[tokio::test]
    async fn raw_fragments_are_unsupported() {
        let executor = fixture();
        let mut scope = Scope::new(EntityKind::Name);
        scope.and_where(Predicate::Raw(RawFragment::new("TRUE", Vec::new())));
        let err = executor.select_ids(&scope).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Unsupported(_)));
    }

    #[tokio::test]
    async fn records_skip_unknown_ids_and_count_requests() {
        let executor = fixture();
        let records = executor
            .select_records(&RecordRequest {
                table: "names".to_string(),
                ids: vec![2, 99],
                includes: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].str("sort_name"), Some("Boletus"));
        assert_eq!(executor.record_requests(), vec![vec![2, 99]]);
        assert_eq!(executor.round_trips(), 1);
    }
}
