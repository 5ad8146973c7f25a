//! Query IR definitions.
//!
//! IR nodes are plain value types assembled by the builder and consumed by
//! the compiler. Expressions reference source rows through alias-rooted
//! paths; aggregates are tagged nodes recognized by the group stage.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use rivulet_core::{PropPath, Value};
use rivulet_incremental::JoinKind;

/// Reference to a base collection used as a query input.
///
/// The id is assigned by the store when the collection is created; the
/// name is carried for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionRef {
    pub id: u64,
    pub name: String,
}

impl CollectionRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A query input: a base collection or another query (subquery).
#[derive(Clone, Debug)]
pub enum Source {
    Collection(CollectionRef),
    Query(Box<Query>),
}

impl From<CollectionRef> for Source {
    fn from(r: CollectionRef) -> Self {
        Source::Collection(r)
    }
}

impl From<Query> for Source {
    fn from(q: Query) -> Self {
        Source::Query(Box::new(q))
    }
}

/// Reference to a field, rooted at a source alias.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropRef {
    pub path: PropPath,
}

impl PropRef {
    pub fn new(path: PropPath) -> Self {
        Self { path }
    }
}

/// An IR expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Field reference
    Ref(PropRef),
    /// Literal value
    Value(Value),
    /// Scalar function call
    Func { name: String, args: Vec<Expr> },
    /// Aggregate call; `None` argument means `count(*)`
    Agg { func: String, arg: Option<Box<Expr>> },
}

impl Expr {
    /// Returns true if the expression has an aggregate at its root.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Expr::Agg { .. })
    }

    /// Returns true if any aggregate appears anywhere in the expression.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Agg { .. } => true,
            Expr::Func { args, .. } => args.iter().any(Expr::contains_aggregate),
            _ => false,
        }
    }

    /// Returns the ref path when this is a plain field reference.
    pub fn as_ref_path(&self) -> Option<&PropPath> {
        match self {
            Expr::Ref(r) => Some(&r.path),
            _ => None,
        }
    }
}

/// Builds a field reference from path segments (alias first).
pub fn col(path: impl IntoIterator<Item = impl Into<String>>) -> Expr {
    Expr::Ref(PropRef::new(PropPath::new(path)))
}

/// Builds a literal expression.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Value(value.into())
}

fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Func {
        name: name.into(),
        args,
    }
}

/// Equality comparison.
pub fn eq(left: Expr, right: Expr) -> Expr {
    func("eq", alloc::vec![left, right])
}

/// Greater-than comparison.
pub fn gt(left: Expr, right: Expr) -> Expr {
    func("gt", alloc::vec![left, right])
}

/// Greater-or-equal comparison.
pub fn gte(left: Expr, right: Expr) -> Expr {
    func("gte", alloc::vec![left, right])
}

/// Less-than comparison.
pub fn lt(left: Expr, right: Expr) -> Expr {
    func("lt", alloc::vec![left, right])
}

/// Less-or-equal comparison.
pub fn lte(left: Expr, right: Expr) -> Expr {
    func("lte", alloc::vec![left, right])
}

/// Logical conjunction.
pub fn and(left: Expr, right: Expr) -> Expr {
    func("and", alloc::vec![left, right])
}

/// Logical disjunction.
pub fn or(left: Expr, right: Expr) -> Expr {
    func("or", alloc::vec![left, right])
}

/// Logical negation.
pub fn not(expr: Expr) -> Expr {
    func("not", alloc::vec![expr])
}

/// Membership test against a literal list.
pub fn in_list(expr: Expr, values: impl IntoIterator<Item = impl Into<Value>>) -> Expr {
    let list = Value::Array(values.into_iter().map(Into::into).collect());
    func("in", alloc::vec![expr, Expr::Value(list)])
}

/// String length / array length.
pub fn length(expr: Expr) -> Expr {
    func("length", alloc::vec![expr])
}

/// String concatenation.
pub fn concat(args: impl IntoIterator<Item = Expr>) -> Expr {
    func("concat", args.into_iter().collect())
}

/// Uppercase.
pub fn upper(expr: Expr) -> Expr {
    func("upper", alloc::vec![expr])
}

/// Lowercase.
pub fn lower(expr: Expr) -> Expr {
    func("lower", alloc::vec![expr])
}

/// SQL LIKE match.
pub fn like(expr: Expr, pattern: impl Into<String>) -> Expr {
    func("like", alloc::vec![expr, lit(pattern.into())])
}

/// Case-insensitive SQL LIKE match.
pub fn ilike(expr: Expr, pattern: impl Into<String>) -> Expr {
    func("ilike", alloc::vec![expr, lit(pattern.into())])
}

/// Addition.
pub fn add(left: Expr, right: Expr) -> Expr {
    func("add", alloc::vec![left, right])
}

/// Subtraction.
pub fn sub(left: Expr, right: Expr) -> Expr {
    func("sub", alloc::vec![left, right])
}

/// Multiplication.
pub fn mul(left: Expr, right: Expr) -> Expr {
    func("mul", alloc::vec![left, right])
}

/// Division.
pub fn div(left: Expr, right: Expr) -> Expr {
    func("div", alloc::vec![left, right])
}

/// Modulo.
pub fn modulo(left: Expr, right: Expr) -> Expr {
    func("mod", alloc::vec![left, right])
}

/// `count(*)` aggregate.
pub fn count() -> Expr {
    Expr::Agg {
        func: "count".into(),
        arg: None,
    }
}

/// `count(expr)` aggregate (counts non-null inputs).
pub fn count_of(expr: Expr) -> Expr {
    Expr::Agg {
        func: "count".into(),
        arg: Some(Box::new(expr)),
    }
}

/// `sum(expr)` aggregate.
pub fn sum(expr: Expr) -> Expr {
    Expr::Agg {
        func: "sum".into(),
        arg: Some(Box::new(expr)),
    }
}

/// `avg(expr)` aggregate.
pub fn avg(expr: Expr) -> Expr {
    Expr::Agg {
        func: "avg".into(),
        arg: Some(Box::new(expr)),
    }
}

/// `min(expr)` aggregate.
pub fn min_of(expr: Expr) -> Expr {
    Expr::Agg {
        func: "min".into(),
        arg: Some(Box::new(expr)),
    }
}

/// `max(expr)` aggregate.
pub fn max_of(expr: Expr) -> Expr {
    Expr::Agg {
        func: "max".into(),
        arg: Some(Box::new(expr)),
    }
}

/// Sort direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Null placement within a sort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NullsOrder {
    #[default]
    First,
    Last,
}

/// String comparison mode within a sort.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StringSort {
    /// Compare by Unicode code points
    #[default]
    Codepoint,
    /// Case-insensitive comparison
    CaseInsensitive,
}

/// One order-by clause.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderByClause {
    pub expr: Expr,
    pub direction: Direction,
    pub nulls: NullsOrder,
    pub strings: StringSort,
}

impl OrderByClause {
    /// Creates an ascending clause with default null and string handling.
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: Direction::Asc,
            nulls: NullsOrder::default(),
            strings: StringSort::default(),
        }
    }

    /// Creates a descending clause.
    pub fn desc(expr: Expr) -> Self {
        Self {
            direction: Direction::Desc,
            ..Self::asc(expr)
        }
    }

    /// Overrides null placement.
    pub fn nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = nulls;
        self
    }

    /// Overrides string comparison.
    pub fn strings(mut self, strings: StringSort) -> Self {
        self.strings = strings;
        self
    }
}

/// One join clause.
#[derive(Clone, Debug)]
pub struct JoinClause {
    pub alias: String,
    pub source: Source,
    /// Equality condition `(left ref, right ref)`; `None` for cross joins.
    pub on: Option<(PropRef, PropRef)>,
    pub kind: JoinKind,
}

/// One select output entry.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectItem {
    /// Spread every field of an alias into the output row
    Spread(String),
    /// A named output field computed from an expression
    Field(String, Expr),
}

/// Builds a named select field.
pub fn field(name: impl Into<String>, expr: Expr) -> SelectItem {
    SelectItem::Field(name.into(), expr)
}

/// Builds an alias spread.
pub fn spread(alias: impl Into<String>) -> SelectItem {
    SelectItem::Spread(alias.into())
}

/// Opaque row predicate installed through `fn_where` / `fn_having`.
pub type RowPredicate = Rc<dyn Fn(&Value) -> bool>;

/// Opaque row projection installed through `fn_select`.
pub type RowProjection = Rc<dyn Fn(&Value) -> Value>;

/// The query root.
#[derive(Clone, Default)]
pub struct Query {
    pub from: Option<(String, Source)>,
    pub joins: Vec<JoinClause>,
    /// Where clauses, conjoined at compile time.
    pub wheres: Vec<Expr>,
    pub group_by: Vec<Expr>,
    pub havings: Vec<Expr>,
    pub order_by: Vec<OrderByClause>,
    pub select: Option<Vec<SelectItem>>,
    pub distinct: bool,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub fn_select: Option<RowProjection>,
    pub fn_wheres: Vec<RowPredicate>,
    pub fn_havings: Vec<RowPredicate>,
}

impl Query {
    /// Returns every source alias: the from alias followed by join aliases.
    pub fn aliases(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some((alias, _)) = &self.from {
            out.push(alias.as_str());
        }
        for join in &self.joins {
            out.push(join.alias.as_str());
        }
        out
    }
}

impl core::fmt::Debug for Query {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Query")
            .field("from", &self.from)
            .field("joins", &self.joins)
            .field("wheres", &self.wheres)
            .field("group_by", &self.group_by)
            .field("havings", &self.havings)
            .field("order_by", &self.order_by)
            .field("select", &self.select)
            .field("distinct", &self.distinct)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("fn_select", &self.fn_select.is_some())
            .field("fn_wheres", &self.fn_wheres.len())
            .field("fn_havings", &self.fn_havings.len())
            .finish()
    }
}
