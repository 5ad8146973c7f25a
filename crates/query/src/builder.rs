//! Fluent query builder.
//!
//! The builder is immutable: every method clones the underlying IR and
//! returns a new builder, so partially built queries can be shared and
//! branched. Source and join shape problems surface at the builder;
//! everything else is validated at compile time.

use crate::ir::{
    Expr, JoinClause, OrderByClause, PropRef, Query, RowPredicate, RowProjection, SelectItem,
    Source,
};
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use rivulet_core::{Error, Result, Value};
use rivulet_incremental::JoinKind;

/// Immutable fluent builder over the query IR.
#[derive(Clone, Default, Debug)]
pub struct QueryBuilder {
    query: Query,
}

/// Starts an empty query.
pub fn query() -> QueryBuilder {
    QueryBuilder::default()
}

impl From<QueryBuilder> for Source {
    fn from(b: QueryBuilder) -> Self {
        Source::Query(Box::new(b.query))
    }
}

impl QueryBuilder {
    /// Returns the built IR.
    pub fn build(&self) -> Query {
        self.query.clone()
    }

    /// Sets the root source. Exactly one `from` is allowed.
    pub fn from(&self, alias: impl Into<String>, source: impl Into<Source>) -> Result<Self> {
        if self.query.from.is_some() {
            return Err(Error::OnlyOneSourceAllowed);
        }
        let source = source.into();
        check_source(&source)?;
        let mut next = self.clone();
        next.query.from = Some((alias.into(), source));
        Ok(next)
    }

    /// Adds an equi-join. The `on` expression must be `eq(left, right)` of
    /// two refs at its root.
    pub fn join(
        &self,
        alias: impl Into<String>,
        source: impl Into<Source>,
        on: Expr,
        kind: JoinKind,
    ) -> Result<Self> {
        let source = source.into();
        check_source(&source)?;
        let on = parse_join_condition(on)?;
        let mut next = self.clone();
        next.query.joins.push(JoinClause {
            alias: alias.into(),
            source,
            on: Some(on),
            kind,
        });
        Ok(next)
    }

    /// Adds an inner join.
    pub fn inner_join(
        &self,
        alias: impl Into<String>,
        source: impl Into<Source>,
        on: Expr,
    ) -> Result<Self> {
        self.join(alias, source, on, JoinKind::Inner)
    }

    /// Adds a left outer join.
    pub fn left_join(
        &self,
        alias: impl Into<String>,
        source: impl Into<Source>,
        on: Expr,
    ) -> Result<Self> {
        self.join(alias, source, on, JoinKind::Left)
    }

    /// Adds a right outer join.
    pub fn right_join(
        &self,
        alias: impl Into<String>,
        source: impl Into<Source>,
        on: Expr,
    ) -> Result<Self> {
        self.join(alias, source, on, JoinKind::Right)
    }

    /// Adds a full outer join.
    pub fn full_join(
        &self,
        alias: impl Into<String>,
        source: impl Into<Source>,
        on: Expr,
    ) -> Result<Self> {
        self.join(alias, source, on, JoinKind::Full)
    }

    /// Adds a cross join (no condition).
    pub fn cross_join(
        &self,
        alias: impl Into<String>,
        source: impl Into<Source>,
    ) -> Result<Self> {
        let source = source.into();
        check_source(&source)?;
        let mut next = self.clone();
        next.query.joins.push(JoinClause {
            alias: alias.into(),
            source,
            on: None,
            kind: JoinKind::Cross,
        });
        Ok(next)
    }

    /// Appends a where clause; clauses are conjoined.
    pub fn where_(&self, expr: Expr) -> Self {
        let mut next = self.clone();
        next.query.wheres.push(expr);
        next
    }

    /// Sets the group-by key expressions.
    pub fn group_by(&self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut next = self.clone();
        next.query.group_by = exprs.into_iter().collect();
        next
    }

    /// Appends a having clause; clauses are conjoined.
    pub fn having(&self, expr: Expr) -> Self {
        let mut next = self.clone();
        next.query.havings.push(expr);
        next
    }

    /// Appends an order-by clause.
    pub fn order_by(&self, clause: OrderByClause) -> Self {
        let mut next = self.clone();
        next.query.order_by.push(clause);
        next
    }

    /// Sets the select list.
    pub fn select(&self, items: impl IntoIterator<Item = SelectItem>) -> Self {
        let mut next = self.clone();
        next.query.select = Some(items.into_iter().collect());
        next
    }

    /// Enables distinct output.
    pub fn distinct(&self) -> Self {
        let mut next = self.clone();
        next.query.distinct = true;
        next
    }

    /// Sets the row limit.
    pub fn limit(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.query.limit = Some(n);
        next
    }

    /// Sets the row offset.
    pub fn offset(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.query.offset = Some(n);
        next
    }

    /// Installs an opaque row predicate, applied after the IR where
    /// clauses and never optimized.
    pub fn fn_where(&self, pred: impl Fn(&Value) -> bool + 'static) -> Self {
        let mut next = self.clone();
        next.query.fn_wheres.push(Rc::new(pred) as RowPredicate);
        next
    }

    /// Installs an opaque having predicate over grouped output rows.
    pub fn fn_having(&self, pred: impl Fn(&Value) -> bool + 'static) -> Self {
        let mut next = self.clone();
        next.query.fn_havings.push(Rc::new(pred) as RowPredicate);
        next
    }

    /// Installs an opaque projection, applied instead of `select`.
    pub fn fn_select(&self, f: impl Fn(&Value) -> Value + 'static) -> Self {
        let mut next = self.clone();
        next.query.fn_select = Some(Rc::new(f) as RowProjection);
        next
    }
}

fn check_source(source: &Source) -> Result<()> {
    match source {
        Source::Collection(_) => Ok(()),
        Source::Query(q) => {
            if q.from.is_none() {
                Err(Error::SubQueryMustHaveFrom)
            } else {
                Ok(())
            }
        }
    }
}

/// Join conditions must be `eq(ref, ref)` at the root.
fn parse_join_condition(on: Expr) -> Result<(PropRef, PropRef)> {
    match on {
        Expr::Func { name, mut args } if name == "eq" && args.len() == 2 => {
            let right = args.pop().unwrap_or(Expr::Value(Value::Null));
            let left = args.pop().unwrap_or(Expr::Value(Value::Null));
            match (left, right) {
                (Expr::Ref(l), Expr::Ref(r)) => Ok((l, r)),
                _ => Err(Error::JoinMustBeEquality),
            }
        }
        _ => Err(Error::JoinMustBeEquality),
    }
}
