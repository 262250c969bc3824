//! Parameter handlers.
//!
//! Each declared parameter of a kind is served by one [`ParamHandler`] in
//! that kind's capability table. A handler reads the validated value and
//! contributes joins, predicates, passes or a title hint to the scope under
//! construction. Handlers never touch ordering; the ordering resolver runs
//! after all of them.

use crate::builder;
use crate::catalog::Catalog;
use crate::error::{QueryResult, ValidationError};
use crate::grammar::{SearchPattern, escape_like_wildcards};
use crate::kinds::EntityKind;
use crate::schema::{ParamValue, ValidatedParams};
use crate::scope::{
    ColumnRef, CompareOp, FieldExpr, JoinKind, Literal, Pass, Predicate, RawFragment, Scope,
    TitleHint, col,
};

/// One hop through a declared association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinStep {
    pub from: &'static str,
    pub to: &'static str,
    pub kind: JoinKind,
}

impl JoinStep {
    pub const fn inner(from: &'static str, to: &'static str) -> Self {
        Self {
            from,
            to,
            kind: JoinKind::Inner,
        }
    }

    pub const fn left(from: &'static str, to: &'static str) -> Self {
        Self {
            from,
            to,
            kind: JoinKind::Left,
        }
    }
}

/// State handed to a handler while it contributes to a scope.
pub struct BuildContext<'a> {
    catalog: &'a Catalog,
    scope: &'a mut Scope,
    params: &'a ValidatedParams,
    param: &'static str,
}

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        catalog: &'a Catalog,
        scope: &'a mut Scope,
        params: &'a ValidatedParams,
        param: &'static str,
    ) -> Self {
        Self {
            catalog,
            scope,
            params,
            param,
        }
    }

    /// The parameter currently being applied.
    pub fn param(&self) -> &'static str {
        self.param
    }

    pub fn kind(&self) -> EntityKind {
        self.scope.kind()
    }

    pub fn base(&self) -> &str {
        self.scope.base()
    }

    /// The full validated parameter set, for handlers spanning several keys.
    pub fn params(&self) -> &ValidatedParams {
        self.params
    }

    pub fn join(&mut self, step: &JoinStep) -> QueryResult<()> {
        self.scope.join_with(step.from, step.to, step.kind)?;
        Ok(())
    }

    pub fn join_all(&mut self, steps: &[JoinStep]) -> QueryResult<()> {
        steps.iter().try_for_each(|step| self.join(step))
    }

    pub fn and_where(&mut self, predicate: Predicate) {
        self.scope.and_where(predicate);
    }

    pub fn add_pass(&mut self, pass: Pass) {
        self.scope.add_pass(pass);
    }

    pub fn set_title(&mut self, title: TitleHint) {
        self.scope.set_title(title);
    }

    /// Condition-only scope of another kind built from nested parameters.
    pub fn subscope(&self, kind: EntityKind, params: &ValidatedParams) -> QueryResult<Scope> {
        builder::condition_scope(self.catalog, kind, params)
    }

    fn search(&self, value: &ParamValue) -> QueryResult<SearchPattern> {
        let text = value.as_str().unwrap_or_default();
        SearchPattern::parse(text).map_err(|e| {
            ValidationError::SearchSyntax {
                param: self.param.to_string(),
                at: e.at,
            }
            .into()
        })
    }
}

/// Applies one validated parameter value to a scope.
pub trait ParamHandler: Send + Sync {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()>;

    /// Associations this handler may join, checked when the catalog is built.
    fn join_steps(&self) -> Vec<JoinStep> {
        Vec::new()
    }
}

/// Handler backed by a plain function or closure.
pub struct FnHandler<F> {
    f: F,
    joins: Vec<JoinStep>,
}

impl<F> FnHandler<F> {
    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }
}

/// Wrap a closure as a handler.
pub fn custom<F>(f: F) -> FnHandler<F>
where
    F: Fn(&ParamValue, &mut BuildContext<'_>) -> QueryResult<()> + Send + Sync,
{
    FnHandler {
        f,
        joins: Vec::new(),
    }
}

impl<F> ParamHandler for FnHandler<F>
where
    F: Fn(&ParamValue, &mut BuildContext<'_>) -> QueryResult<()> + Send + Sync,
{
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        ctx.join_all(&self.joins)?;
        (self.f)(value, ctx)
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

// ---------------------------------------------------------------------------
// Booleans and enumerations
// ---------------------------------------------------------------------------

/// Two mutually exclusive conditions selected by a boolean value.
///
/// Joins are added only when a condition is actually applied.
pub struct BooleanHandler {
    joins: Vec<JoinStep>,
    when_true: Option<Predicate>,
    when_false: Option<Predicate>,
}

impl BooleanHandler {
    pub fn new(when_true: Predicate, when_false: Predicate) -> Self {
        Self {
            joins: Vec::new(),
            when_true: Some(when_true),
            when_false: Some(when_false),
        }
    }

    /// `true` requires a matching joined row; `false` adds nothing.
    pub fn requires_join(steps: &[JoinStep]) -> Self {
        Self {
            joins: steps.to_vec(),
            when_true: None,
            when_false: None,
        }
    }

    /// `column = value`.
    pub fn flag(column: ColumnRef) -> Self {
        Self::new(
            Predicate::eq(column.clone(), true),
            Predicate::eq(column, false),
        )
    }

    /// `true` when the column is set.
    pub fn presence(column: ColumnRef) -> Self {
        Self::new(
            Predicate::is_not_null(column.clone()),
            Predicate::is_null(column),
        )
    }

    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }
}

impl ParamHandler for BooleanHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(flag) = value.as_bool() else {
            return Ok(());
        };
        let requires_join = self.when_true.is_none() && self.when_false.is_none();
        if requires_join {
            if flag {
                ctx.join_all(&self.joins)?;
            }
            return Ok(());
        }
        let chosen = if flag { &self.when_true } else { &self.when_false };
        if let Some(predicate) = chosen {
            ctx.join_all(&self.joins)?;
            ctx.and_where(predicate.clone());
        }
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

/// One condition per enumeration member; members mapped to `None` add nothing.
#[derive(Default)]
pub struct ChoiceHandler {
    joins: Vec<JoinStep>,
    choices: Vec<(&'static str, Option<Predicate>)>,
}

impl ChoiceHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn choice(mut self, member: &'static str, predicate: Predicate) -> Self {
        self.choices.push((member, Some(predicate)));
        self
    }

    pub fn no_op(mut self, member: &'static str) -> Self {
        self.choices.push((member, None));
        self
    }

    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }
}

impl ParamHandler for ChoiceHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(member) = value.as_str() else {
            return Ok(());
        };
        let chosen = self
            .choices
            .iter()
            .find(|(name, _)| *name == member)
            .and_then(|(_, predicate)| predicate.clone());
        if let Some(predicate) = chosen {
            ctx.join_all(&self.joins)?;
            ctx.and_where(predicate);
        }
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

/// `column IN (...)` over the members of a string list.
pub struct MemberHandler {
    column: ColumnRef,
}

impl MemberHandler {
    pub fn new(column: ColumnRef) -> Self {
        Self { column }
    }
}

impl ParamHandler for MemberHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(members) = value.as_strs() else {
            return Ok(());
        };
        let values = members.into_iter().map(Literal::from).collect();
        ctx.and_where(Predicate::in_list(self.column.clone(), values));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// `field >= min` and/or `field <= max`, each bound independent.
///
/// Partial times widen to the whole period they name: a `max` of
/// `2021-03` admits every instant of March.
pub struct RangeHandler {
    field: FieldExpr,
    joins: Vec<JoinStep>,
}

impl RangeHandler {
    pub fn new(field: impl Into<FieldExpr>) -> Self {
        Self {
            field: field.into(),
            joins: Vec::new(),
        }
    }

    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }
}

impl ParamHandler for RangeHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some((min, max)) = value.as_range() else {
            return Ok(());
        };
        let lower = min.and_then(|v| match v {
            ParamValue::Time(t) => t.earliest().map(Literal::Timestamp),
            other => other.to_literal(),
        });
        let upper = max.and_then(|v| match v {
            ParamValue::Time(t) => t.latest().map(Literal::Timestamp),
            other => other.to_literal(),
        });
        if lower.is_none() && upper.is_none() {
            return Ok(());
        }
        ctx.join_all(&self.joins)?;
        if let Some(lower) = lower {
            ctx.and_where(Predicate::compare(self.field.clone(), CompareOp::Ge, lower));
        }
        if let Some(upper) = upper {
            ctx.and_where(Predicate::compare(self.field.clone(), CompareOp::Le, upper));
        }
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

/// Date ranges, including yearless `MM` / `MM-DD` bounds.
///
/// A yearless range whose start falls after its end (`11-15` to `02-01`)
/// wraps around the new year and becomes a single disjunction.
pub struct DateRangeHandler {
    field: FieldExpr,
}

impl DateRangeHandler {
    pub fn new(field: impl Into<FieldExpr>) -> Self {
        Self {
            field: field.into(),
        }
    }

    fn half(&self, value: &ParamValue, lower: bool) -> Option<Predicate> {
        let date = value.as_date()?;
        let op = if lower { CompareOp::Ge } else { CompareOp::Le };
        if !date.is_yearless() {
            let bound = if lower {
                date.first_day()
            } else {
                date.last_day()
            }?;
            return Some(Predicate::compare(self.field.clone(), op, bound));
        }

        let month = Predicate::compare(self.field.clone().month(), op, i64::from(date.month?));
        let Some(day) = date.day else {
            return Some(month);
        };
        let strict = if lower { CompareOp::Gt } else { CompareOp::Lt };
        Some(Predicate::any(vec![
            Predicate::compare(self.field.clone().month(), strict, i64::from(date.month?)),
            Predicate::all(vec![
                Predicate::eq(self.field.clone().month(), i64::from(date.month?)),
                Predicate::compare(self.field.clone().day(), op, i64::from(day)),
            ]),
        ]))
    }

    fn wrapped(&self, min: &ParamValue, max: &ParamValue) -> Option<Predicate> {
        let (from, to) = (min.as_date()?, max.as_date()?);
        if !(from.is_yearless() && to.is_yearless()) {
            return None;
        }
        let (m1, d1) = (from.month?, from.day?);
        let (m2, d2) = (to.month?, to.day?);
        if (m1, d1) <= (m2, d2) {
            return None;
        }
        let month = || self.field.clone().month();
        let day = || self.field.clone().day();
        Some(Predicate::any(vec![
            Predicate::compare(month(), CompareOp::Gt, i64::from(m1)),
            Predicate::compare(month(), CompareOp::Lt, i64::from(m2)),
            Predicate::all(vec![
                Predicate::eq(month(), i64::from(m1)),
                Predicate::compare(day(), CompareOp::Ge, i64::from(d1)),
            ]),
            Predicate::all(vec![
                Predicate::eq(month(), i64::from(m2)),
                Predicate::compare(day(), CompareOp::Le, i64::from(d2)),
            ]),
        ]))
    }
}

impl ParamHandler for DateRangeHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some((min, max)) = value.as_range() else {
            return Ok(());
        };
        if let (Some(min), Some(max)) = (min, max)
            && let Some(wrapped) = self.wrapped(min, max)
        {
            ctx.and_where(wrapped);
            return Ok(());
        }
        if let Some(lower) = min.and_then(|v| self.half(v, true)) {
            ctx.and_where(lower);
        }
        if let Some(upper) = max.and_then(|v| self.half(v, false)) {
            ctx.and_where(upper);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Id sets
// ---------------------------------------------------------------------------

/// `column IN (ids)`, joining through any intervening tables.
///
/// A single id may set a title hint such as `query_title_by_user`.
pub struct IdSetHandler {
    column: ColumnRef,
    joins: Vec<JoinStep>,
    title: Option<(&'static str, &'static str)>,
}

impl IdSetHandler {
    pub fn new(column: ColumnRef) -> Self {
        Self {
            column,
            joins: Vec::new(),
            title: None,
        }
    }

    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }

    pub fn titled(mut self, tag: &'static str, arg: &'static str) -> Self {
        self.title = Some((tag, arg));
        self
    }
}

impl ParamHandler for IdSetHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(ids) = value.as_ids() else {
            return Ok(());
        };
        ctx.join_all(&self.joins)?;
        ctx.and_where(Predicate::in_ids(self.column.clone(), &ids));
        if let (Some((tag, arg)), [id]) = (self.title, ids.as_slice()) {
            ctx.set_title(TitleHint::new(tag).arg(arg, id));
        }
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

// ---------------------------------------------------------------------------
// Free text
// ---------------------------------------------------------------------------

/// Google-style search over one or more fields.
pub struct SearchHandler {
    fields: Vec<FieldExpr>,
    joins: Vec<JoinStep>,
}

impl SearchHandler {
    pub fn new(fields: Vec<FieldExpr>) -> Self {
        Self {
            fields,
            joins: Vec::new(),
        }
    }

    pub fn field(field: impl Into<FieldExpr>) -> Self {
        Self::new(vec![field.into()])
    }

    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }
}

impl ParamHandler for SearchHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let pattern = ctx.search(value)?;
        if pattern.is_empty() {
            return Ok(());
        }
        ctx.join_all(&self.joins)?;
        for predicate in pattern.predicates(&self.fields) {
            ctx.and_where(predicate);
        }
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

/// Search that must also reach a one-to-many association.
///
/// Runs as two passes whose id sets are unioned: the first over the base
/// fields alone, the second over base and joined fields through an inner
/// join. A single outer join would duplicate rows and cannot express
/// "base matches OR any joined row matches" per term.
pub struct TwoPassSearchHandler {
    base_fields: Vec<FieldExpr>,
    joined_fields: Vec<FieldExpr>,
    joins: Vec<JoinStep>,
}

impl TwoPassSearchHandler {
    pub fn new(base_fields: Vec<FieldExpr>, joined_fields: Vec<FieldExpr>, joins: Vec<JoinStep>) -> Self {
        Self {
            base_fields,
            joined_fields,
            joins,
        }
    }
}

impl ParamHandler for TwoPassSearchHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let pattern = ctx.search(value)?;
        if pattern.is_empty() {
            return Ok(());
        }
        ctx.add_pass(Pass {
            joins: Vec::new(),
            predicates: pattern.predicates(&self.base_fields),
        });

        let mut joins = Vec::with_capacity(self.joins.len());
        for step in &self.joins {
            joins.push(crate::associations::join_spec(step.from, step.to, step.kind)?);
        }
        let mut fields = self.base_fields.clone();
        fields.extend(self.joined_fields.iter().cloned());
        ctx.add_pass(Pass {
            joins,
            predicates: pattern.predicates(&fields),
        });
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

/// Case-insensitive "ends with", as used for region names like
/// `Marin Co., California, USA` matching `California, USA`.
pub struct SuffixHandler {
    field: FieldExpr,
}

impl SuffixHandler {
    pub fn new(field: impl Into<FieldExpr>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl ParamHandler for SuffixHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(text) = value.as_str() else {
            return Ok(());
        };
        let pattern = format!("%{}", escape_like_wildcards(text));
        ctx.and_where(Predicate::like(self.field.clone(), pattern));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Taxonomy and geography
// ---------------------------------------------------------------------------

/// Membership in a clade: the name itself, anything whose text name
/// starts with it, or anything whose classification lists it.
///
/// Classification strings look like `Kingdom: _Fungi_\r\nPhylum: ...`,
/// so this needs a regex match and is expressed as a raw fragment.
pub struct CladeHandler {
    table: &'static str,
}

impl CladeHandler {
    pub fn new(table: &'static str) -> Self {
        Self { table }
    }
}

impl ParamHandler for CladeHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(clade) = value.as_str() else {
            return Ok(());
        };
        let t = self.table;
        let sql = format!(
            r#"("{t}"."text_name" = $1 OR "{t}"."text_name" LIKE $2 OR "{t}"."classification" ~ $3)"#
        );
        let values = vec![
            Literal::from(clade),
            Literal::from(format!("{} %", escape_like_wildcards(clade))),
            Literal::from(format!(": _{}_", regex::escape(clade))),
        ];
        ctx.and_where(Predicate::Raw(RawFragment::new(sql, values)));
        Ok(())
    }
}

/// Bounding box over `north`, `south`, `east` and `west`.
///
/// All four must be present. The box is applied once, on the `north`
/// handler's turn; the other three handlers only consume their keys. A box
/// whose west edge lies east of its east edge straddles the date line.
pub struct BoundingBoxHandler {
    /// Point coordinates `(lat, long)` checked when present.
    point: Option<(ColumnRef, ColumnRef)>,
    /// Alias of a table with `north/south/east/west` columns.
    area: &'static str,
    joins: Vec<JoinStep>,
}

impl BoundingBoxHandler {
    pub fn area(table: &'static str) -> Self {
        Self {
            point: None,
            area: table,
            joins: Vec::new(),
        }
    }

    /// Points where known, else the associated area.
    pub fn point_or_area(lat: ColumnRef, long: ColumnRef, area: &'static str, step: JoinStep) -> Self {
        Self {
            point: Some((lat, long)),
            area,
            joins: vec![step],
        }
    }

    fn area_predicate(&self, n: f64, s: f64, e: f64, w: f64) -> Predicate {
        let side = |c: &str| col(self.area, c);
        let orientation = if w <= e {
            Predicate::CompareColumns {
                left: side("west"),
                op: CompareOp::Le,
                right: side("east"),
            }
        } else {
            Predicate::CompareColumns {
                left: side("west"),
                op: CompareOp::Gt,
                right: side("east"),
            }
        };
        Predicate::all(vec![
            Predicate::compare(side("south"), CompareOp::Ge, s),
            Predicate::compare(side("north"), CompareOp::Le, n),
            Predicate::compare(side("west"), CompareOp::Ge, w),
            Predicate::compare(side("east"), CompareOp::Le, e),
            orientation,
        ])
    }

    fn point_predicate(lat: &ColumnRef, long: &ColumnRef, n: f64, s: f64, e: f64, w: f64) -> Predicate {
        let longitude = if w <= e {
            Predicate::all(vec![
                Predicate::compare(long.clone(), CompareOp::Ge, w),
                Predicate::compare(long.clone(), CompareOp::Le, e),
            ])
        } else {
            Predicate::any(vec![
                Predicate::compare(long.clone(), CompareOp::Ge, w),
                Predicate::compare(long.clone(), CompareOp::Le, e),
            ])
        };
        Predicate::all(vec![
            Predicate::compare(lat.clone(), CompareOp::Ge, s),
            Predicate::compare(lat.clone(), CompareOp::Le, n),
            longitude,
        ])
    }

    /// The point lies within the area widened by a fifth of its size on
    /// each side. For an area across the date line, the point must lie
    /// within 72 degrees of it.
    fn plausible(&self, lat: &ColumnRef, long: &ColumnRef) -> Predicate {
        let side = |c: &str| col(self.area, c);
        let (north, south, east, west) = (side("north"), side("south"), side("east"), side("west"));
        let at_least = |point: &ColumnRef, terms: Vec<(ColumnRef, f64)>, offset: f64| {
            let mut all = vec![(point.clone(), 1.0)];
            all.extend(terms);
            Predicate::compare(FieldExpr::linear(all, offset), CompareOp::Ge, 0.0)
        };
        let at_most = |point: &ColumnRef, terms: Vec<(ColumnRef, f64)>, offset: f64| {
            let mut all = vec![(point.clone(), 1.0)];
            all.extend(terms);
            Predicate::compare(FieldExpr::linear(all, offset), CompareOp::Le, 0.0)
        };

        let normal = Predicate::all(vec![
            Predicate::CompareColumns {
                left: west.clone(),
                op: CompareOp::Le,
                right: east.clone(),
            },
            at_least(long, vec![(west.clone(), -1.2), (east.clone(), 0.2)], 0.0),
            at_most(long, vec![(east.clone(), -1.2), (west.clone(), 0.2)], 0.0),
        ]);
        let straddling = Predicate::all(vec![
            Predicate::CompareColumns {
                left: west.clone(),
                op: CompareOp::Gt,
                right: east.clone(),
            },
            Predicate::any(vec![
                at_least(long, vec![(west.clone(), -0.8), (east.clone(), -0.2)], -72.0),
                at_most(long, vec![(east, -0.8), (west, -0.2)], 72.0),
            ]),
        ]);
        Predicate::all(vec![
            Predicate::is_not_null(lat.clone()),
            Predicate::is_not_null(long.clone()),
            at_least(lat, vec![(south.clone(), -1.2), (north.clone(), 0.2)], 0.0),
            at_most(lat, vec![(north, -1.2), (south, 0.2)], 0.0),
            Predicate::any(vec![normal, straddling]),
        ])
    }
}

impl ParamHandler for BoundingBoxHandler {
    fn apply(&self, _value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        if ctx.param() != "north" {
            return Ok(());
        }
        let edge = |key: &str| ctx.params().get(key).and_then(ParamValue::as_f64);
        let (Some(n), Some(s), Some(e), Some(w)) = (edge("north"), edge("south"), edge("east"), edge("west"))
        else {
            return Ok(());
        };

        let area = self.area_predicate(n, s, e, w);
        let predicate = match &self.point {
            None => area,
            // Trust the point when there is no area or the point plausibly
            // lies in it; otherwise judge by the area.
            Some((lat, long)) => {
                let no_area = Predicate::is_null(col(self.area, "id"));
                let plausible = self.plausible(lat, long);
                Predicate::any(vec![
                    Predicate::all(vec![
                        Predicate::any(vec![no_area.clone(), plausible.clone()]),
                        Self::point_predicate(lat, long, n, s, e, w),
                    ]),
                    Predicate::all(vec![
                        Predicate::not(no_area),
                        Predicate::not(plausible),
                        area,
                    ]),
                ])
            }
        };
        ctx.join_all(&self.joins)?;
        ctx.and_where(predicate);
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

// ---------------------------------------------------------------------------
// Nested queries
// ---------------------------------------------------------------------------

/// `field IN (SELECT column FROM <nested query of another kind>)`.
pub struct SubqueryHandler {
    kind: EntityKind,
    field: ColumnRef,
    /// Joins added to the nested scope before projecting `column`.
    joins: Vec<JoinStep>,
    column: ColumnRef,
}

impl SubqueryHandler {
    pub fn new(kind: EntityKind, field: ColumnRef, column: ColumnRef) -> Self {
        Self {
            kind,
            field,
            joins: Vec::new(),
            column,
        }
    }

    pub fn via(mut self, step: JoinStep) -> Self {
        self.joins.push(step);
        self
    }
}

impl ParamHandler for SubqueryHandler {
    fn apply(&self, value: &ParamValue, ctx: &mut BuildContext<'_>) -> QueryResult<()> {
        let Some(nested) = value.as_subquery() else {
            return Ok(());
        };
        let mut scope = ctx.subscope(self.kind, nested)?;
        for step in &self.joins {
            scope.join_with(step.from, step.to, step.kind)?;
        }
        ctx.and_where(Predicate::in_subquery(
            self.field.clone(),
            scope,
            self.column.clone(),
        ));
        Ok(())
    }

    fn join_steps(&self) -> Vec<JoinStep> {
        self.joins.clone()
    }
}

#[cfg(test)]
// Tests are allowed to use unwrap/expect freely.
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::DateSpec;

    fn apply(handler: &dyn ParamHandler, kind: EntityKind, param: &'static str, value: ParamValue) -> Scope {
        let catalog = Catalog::standard().unwrap();
        let mut params = ValidatedParams::default();
        params.insert(param, value.clone());
        let mut scope = Scope::new(kind);
        let mut ctx = BuildContext::new(&catalog, &mut scope, &params, param);
        handler.apply(&value, &mut ctx).unwrap();
        scope
    }

    fn range(min: Option<ParamValue>, max: Option<ParamValue>) -> ParamValue {
        ParamValue::Range {
            min: min.map(Box::new),
            max: max.map(Box::new),
        }
    }

    fn yearless(month: u32, day: u32) -> ParamValue {
        ParamValue::Date(DateSpec {
            year: None,
            month: Some(month),
            day: Some(day),
        })
    }

    #[test]
    fn boolean_picks_one_of_two_conditions() {
        let handler = BooleanHandler::presence(col("observations", "thumb_image_id"));
        let on = apply(&handler, EntityKind::Observation, "has_images", ParamValue::Bool(true));
        let off = apply(&handler, EntityKind::Observation, "has_images", ParamValue::Bool(false));
        assert_eq!(on.predicates(), &[Predicate::is_not_null(col("observations", "thumb_image_id"))]);
        assert_eq!(off.predicates(), &[Predicate::is_null(col("observations", "thumb_image_id"))]);
    }

    #[test]
    fn join_only_boolean_ignores_false() {
        let handler = BooleanHandler::requires_join(&[JoinStep::inner("observations", "sequences")]);
        let on = apply(&handler, EntityKind::Observation, "has_sequences", ParamValue::Bool(true));
        let off = apply(&handler, EntityKind::Observation, "has_sequences", ParamValue::Bool(false));
        assert!(on.has_join("sequences"));
        assert!(off.joins().is_empty());
    }

    #[test]
    fn range_bounds_are_independent() {
        let handler = RangeHandler::new(col("observations", "vote_cache"));
        let kind = EntityKind::Observation;

        let min_only = apply(&handler, kind, "confidence", range(Some(ParamValue::Float(1.0)), None));
        assert_eq!(min_only.predicates().len(), 1);

        let both = apply(
            &handler,
            kind,
            "confidence",
            range(Some(ParamValue::Float(1.0)), Some(ParamValue::Float(2.5))),
        );
        assert_eq!(both.predicates().len(), 2);

        let neither = apply(&handler, kind, "confidence", range(None, None));
        assert!(neither.predicates().is_empty());
    }

    #[test]
    fn yearless_dates_wrap_around_new_year() {
        let handler = DateRangeHandler::new(col("observations", "when"));
        let scope = apply(
            &handler,
            EntityKind::Observation,
            "date",
            range(Some(yearless(11, 15)), Some(yearless(2, 1))),
        );
        assert_eq!(scope.predicates().len(), 1);
        assert!(matches!(&scope.predicates()[0], Predicate::Or(parts) if parts.len() == 4));
    }

    #[test]
    fn ordinary_yearless_range_uses_two_bounds() {
        let handler = DateRangeHandler::new(col("observations", "when"));
        let scope = apply(
            &handler,
            EntityKind::Observation,
            "date",
            range(Some(yearless(5, 1)), Some(yearless(6, 30))),
        );
        assert_eq!(scope.predicates().len(), 2);
    }

    #[test]
    fn id_sets_join_and_set_titles() {
        let handler = IdSetHandler::new(col("project_observations", "project_id"))
            .via(JoinStep::inner("observations", "project_observations"))
            .titled("query_title_for_project", "project");
        let scope = apply(
            &handler,
            EntityKind::Observation,
            "projects",
            ParamValue::List(vec![ParamValue::Id(7)]),
        );
        assert!(scope.has_join("project_observations"));
        let title = scope.title().unwrap();
        assert_eq!(title.tag, "query_title_for_project");
        assert_eq!(title.args["project"], "7");
    }

    #[test]
    fn empty_id_set_matches_nothing() {
        let handler = IdSetHandler::new(col("observations", "id"));
        let scope = apply(&handler, EntityKind::Observation, "id_in_set", ParamValue::List(Vec::new()));
        assert_eq!(scope.predicates(), &[Predicate::Constant(false)]);
    }

    #[test]
    fn two_pass_search_adds_two_passes() {
        let handler = TwoPassSearchHandler::new(
            vec![col("observations", "notes").into()],
            vec![col("comments", "comment").into()],
            vec![JoinStep::inner("observations", "comments")],
        );
        let scope = apply(
            &handler,
            EntityKind::Observation,
            "search_content",
            ParamValue::Str("spores".to_string()),
        );
        assert_eq!(scope.passes().len(), 2);
        assert!(scope.passes()[0].joins.is_empty());
        assert_eq!(scope.passes()[1].joins[0].alias, "comments");
        assert!(scope.joins().is_empty());
    }

    #[test]
    fn bounding_box_straddling_date_line_uses_or() {
        let handler = BoundingBoxHandler::area("locations");
        let catalog = Catalog::standard().unwrap();
        let mut params = ValidatedParams::default();
        for (k, v) in [("north", 10.0), ("south", -10.0), ("east", -170.0), ("west", 170.0)] {
            params.insert(k, ParamValue::Float(v));
        }
        let mut scope = Scope::new(EntityKind::Location);
        let mut ctx = BuildContext::new(&catalog, &mut scope, &params, "north");
        handler.apply(&ParamValue::Float(10.0), &mut ctx).unwrap();

        let [Predicate::And(parts)] = scope.predicates() else {
            panic!("expected one conjunction: {:?}", scope.predicates());
        };
        assert!(parts.contains(&Predicate::CompareColumns {
            left: col("locations", "west"),
            op: CompareOp::Gt,
            right: col("locations", "east"),
        }));
    }

    #[test]
    fn bounding_box_needs_all_four_edges() {
        let handler = BoundingBoxHandler::area("locations");
        let scope = apply(&handler, EntityKind::Location, "north", ParamValue::Float(10.0));
        assert!(scope.predicates().is_empty());
    }

    #[test]
    fn clade_is_a_raw_fragment() {
        let scope = apply(
            &CladeHandler::new("names"),
            EntityKind::Name,
            "clade",
            ParamValue::Str("Agaricales".to_string()),
        );
        assert!(scope.has_raw());
    }
}
