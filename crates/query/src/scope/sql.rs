//! Postgres rendering of scopes through sea-query.

use sea_query::{
    Alias, Cond, Expr, ExprTrait, Func, Order, PostgresQueryBuilder, Query, SelectStatement,
    SimpleExpr, Value,
};

use super::{
    ColumnRef, CompareOp, FieldExpr, JoinKind, JoinSpec, Literal, OrderExpr, Predicate, Scope,
    SortDirection,
};

/// Renders a [`Scope`] as SQL statements.
pub struct ScopeSql<'a> {
    scope: &'a Scope,
}

impl<'a> ScopeSql<'a> {
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope }
    }

    /// Ordered ids of every matching row.
    pub fn ids(&self) -> String {
        let mut query = self.projection(&self.scope.id_column());
        self.add_grouping(&mut query);
        self.add_order(&mut query);
        query.to_string(PostgresQueryBuilder)
    }

    /// Ordered `(id, prefix)` pairs, where prefix is the first four
    /// characters of `title`.
    pub fn letters(&self, title: &FieldExpr) -> String {
        let mut query = Query::select();
        query.expr(column_expr(&self.scope.id_column()));

        let prefix = Expr::cust_with_exprs("LEFT($1, 4)", [field_expr(title)]);
        if self.needs_aggregate(title) {
            query.expr_as(Func::min(prefix), Alias::new("prefix"));
        } else {
            query.expr_as(prefix, Alias::new("prefix"));
        }

        query.from(Alias::new(self.scope.base()));
        self.add_joins(&mut query);
        self.add_filters(&mut query);
        self.add_grouping(&mut query);
        self.add_order(&mut query);
        query.to_string(PostgresQueryBuilder)
    }

    /// Number of distinct matching ids.
    pub fn count(&self) -> String {
        let id = self.scope.id_column();
        let mut query = Query::select();
        query.expr(Expr::cust(format!(
            "COUNT(DISTINCT \"{}\".\"{}\")",
            id.table, id.column
        )));
        query.from(Alias::new(self.scope.base()));
        self.add_joins(&mut query);
        self.add_filters(&mut query);
        query.to_string(PostgresQueryBuilder)
    }

    /// Unordered `SELECT column` over the scope, for use as a sub-select.
    pub fn projection(&self, column: &ColumnRef) -> SelectStatement {
        let mut query = Query::select();
        query.column((Alias::new(&column.table), Alias::new(&column.column)));
        query.from(Alias::new(self.scope.base()));
        self.add_joins(&mut query);
        self.add_filters(&mut query);
        query
    }

    fn add_joins(&self, query: &mut SelectStatement) {
        for join in self.scope.joins() {
            add_join(query, join);
        }
    }

    fn add_filters(&self, query: &mut SelectStatement) {
        if self.scope.passes().is_empty() {
            for predicate in self.scope.predicates() {
                query.and_where(predicate_expr(predicate));
            }
            return;
        }

        // Each pass is its own sub-select over the shared conditions; the
        // outer statement keeps only the union of their ids.
        let id = self.scope.id_column();
        let mut union = Cond::any();
        for flat in self.scope.flatten_passes() {
            union = union.add(column_expr(&id).in_subquery(ScopeSql::new(&flat).projection(&id)));
        }
        query.cond_where(union);
    }

    fn add_grouping(&self, query: &mut SelectStatement) {
        if let Some(group) = self.scope.grouping() {
            query.group_by_col((Alias::new(&group.table), Alias::new(&group.column)));
        }
    }

    fn add_order(&self, query: &mut SelectStatement) {
        for term in &self.scope.order().terms {
            let order = match term.direction {
                SortDirection::Asc => Order::Asc,
                SortDirection::Desc => Order::Desc,
            };
            let expr = match &term.expr {
                OrderExpr::Field(field) if self.needs_aggregate(field) => {
                    Func::min(field_expr(field)).into()
                }
                OrderExpr::Field(field) => field_expr(field),
                OrderExpr::Position { column, ids } => {
                    let list = ids
                        .iter()
                        .map(i64::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    Expr::cust(format!(
                        "array_position(ARRAY[{list}]::bigint[], \"{}\".\"{}\")",
                        column.table, column.column
                    ))
                }
            };
            query.order_by_expr(expr, order);
        }
    }

    /// Grouped scopes aggregate any field read from a joined table.
    fn needs_aggregate(&self, field: &FieldExpr) -> bool {
        self.scope.grouping().is_some() && field.tables().iter().any(|t| *t != self.scope.base())
    }
}

fn add_join(query: &mut SelectStatement, join: &JoinSpec) {
    let join_type = match join.kind {
        JoinKind::Inner => sea_query::JoinType::InnerJoin,
        JoinKind::Left => sea_query::JoinType::LeftJoin,
    };
    query.join_as(
        join_type,
        Alias::new(&join.table),
        Alias::new(&join.alias),
        predicate_expr(&join.on),
    );
}

fn column_expr(column: &ColumnRef) -> SimpleExpr {
    Expr::col((Alias::new(&column.table), Alias::new(&column.column))).into()
}

fn field_expr(field: &FieldExpr) -> SimpleExpr {
    match field {
        FieldExpr::Column(column) => column_expr(column),
        FieldExpr::Concat(parts) => Func::cust(Alias::new("CONCAT"))
            .args(parts.iter().map(field_expr))
            .into(),
        FieldExpr::FirstNonBlank(parts) => Func::coalesce(parts.iter().map(|part| {
            SimpleExpr::from(
                Func::cust(Alias::new("NULLIF")).args([field_expr(part), Expr::val("").into()]),
            )
        }))
        .into(),
        FieldExpr::Month(inner) => {
            Expr::cust_with_exprs("EXTRACT(MONTH FROM $1)", [field_expr(inner)])
        }
        FieldExpr::Day(inner) => Expr::cust_with_exprs("EXTRACT(DAY FROM $1)", [field_expr(inner)]),
        FieldExpr::Linear { terms, offset } => terms.iter().fold(SimpleExpr::from(Expr::val(*offset)), |sum, (column, weight)| {
            sum.add(column_expr(column).mul(Expr::val(*weight)))
        }),
    }
}

fn value(literal: &Literal) -> Value {
    match literal {
        Literal::Bool(v) => (*v).into(),
        Literal::Int(v) => (*v).into(),
        Literal::Float(v) => (*v).into(),
        Literal::Text(v) => v.clone().into(),
        Literal::Date(v) => v.format("%Y-%m-%d").to_string().into(),
        Literal::Timestamp(v) => v.format("%Y-%m-%d %H:%M:%S").to_string().into(),
    }
}

fn compare(left: SimpleExpr, op: CompareOp, right: SimpleExpr) -> SimpleExpr {
    match op {
        CompareOp::Eq => left.eq(right),
        CompareOp::Ne => left.ne(right),
        CompareOp::Lt => left.lt(right),
        CompareOp::Le => left.lte(right),
        CompareOp::Gt => left.gt(right),
        CompareOp::Ge => left.gte(right),
    }
}

/// Render one predicate.
pub fn predicate_expr(predicate: &Predicate) -> SimpleExpr {
    match predicate {
        Predicate::Compare { field, op, value: v } => {
            compare(field_expr(field), *op, SimpleExpr::Value(value(v)))
        }
        Predicate::CompareColumns { left, op, right } => {
            compare(column_expr(left), *op, column_expr(right))
        }
        Predicate::Like {
            field,
            pattern,
            negated,
        } => {
            let lowered: SimpleExpr = Func::lower(field_expr(field)).into();
            let pattern = pattern.to_lowercase();
            if *negated {
                lowered.not_like(pattern)
            } else {
                lowered.like(pattern)
            }
        }
        Predicate::InList {
            field,
            values,
            negated,
        } => {
            if values.is_empty() {
                return Expr::cust(if *negated { "TRUE" } else { "FALSE" });
            }
            let values: Vec<Value> = values.iter().map(value).collect();
            if *negated {
                field_expr(field).is_not_in(values)
            } else {
                field_expr(field).is_in(values)
            }
        }
        Predicate::IsNull { field, negated } => {
            if *negated {
                field_expr(field).is_not_null()
            } else {
                field_expr(field).is_null()
            }
        }
        Predicate::InSubquery { field, subquery } => column_expr(field)
            .in_subquery(ScopeSql::new(&subquery.scope).projection(&subquery.column)),
        Predicate::And(parts) => {
            let mut cond = Cond::all();
            for part in parts {
                cond = cond.add(predicate_expr(part));
            }
            cond.into()
        }
        Predicate::Or(parts) => {
            let mut cond = Cond::any();
            for part in parts {
                cond = cond.add(predicate_expr(part));
            }
            cond.into()
        }
        Predicate::Not(inner) => predicate_expr(inner).not(),
        Predicate::Constant(true) => Expr::cust("TRUE"),
        Predicate::Constant(false) => Expr::cust("FALSE"),
        Predicate::Raw(raw) => {
            Expr::cust_with_values(raw.sql.clone(), raw.values.iter().map(value))
        }
    }
}
