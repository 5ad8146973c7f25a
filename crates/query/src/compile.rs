//! Query compiler: IR to incremental pipeline.
//!
//! Compilation validates the IR with typed errors and assembles the
//! operator chain:
//!
//! ```text
//! scan(alias)... -> join* -> where -> [group -> having] -> order window
//!                -> select -> distinct -> consolidate
//! ```
//!
//! Rows flow namespaced: a scan wraps each source row as `{alias: row}`,
//! so refs resolve uniformly before and after joins. A bare single-source
//! query with no projection unwraps the alias on output.

use crate::eval::{eval, eval_predicate, validate_expr};
use crate::ir::{
    col, CollectionRef, Expr, JoinClause, OrderByClause, PropRef, Query, RowPredicate,
    RowProjection, SelectItem, Source, StringSort,
};
use alloc::boxed::Box;
use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cmp::Ordering;
use rivulet_core::{Error, Key, Result, Value};
use rivulet_incremental::{
    consolidate, filter_deltas, map_deltas, AggFunc, DeltaBatch, DistinctState, GroupInput,
    GroupState, JoinInput, JoinKind, JoinSide, JoinState, TopKState,
};

/// One external input of a compiled pipeline.
#[derive(Clone, Debug)]
pub struct PipelineInput {
    pub input_id: usize,
    pub alias: String,
    pub source: CollectionRef,
}

enum SourceNode {
    External { input_id: usize },
    Sub(Box<Pipeline>),
}

impl SourceNode {
    fn owns(&self, input_id: usize) -> bool {
        match self {
            SourceNode::External { input_id: id } => *id == input_id,
            SourceNode::Sub(p) => p.owns_input(input_id),
        }
    }
}

struct JoinStage {
    alias: String,
    node: SourceNode,
    state: JoinState,
    /// Equality refs, normalized: `left` references an earlier alias,
    /// `right` references this stage's alias. `None` for cross joins.
    on: Option<(Expr, Expr)>,
}

struct GroupStage {
    state: GroupState,
    group_exprs: Vec<Expr>,
    agg_args: Vec<Option<Expr>>,
}

/// A compiled incremental pipeline.
pub struct Pipeline {
    from_alias: String,
    from_node: SourceNode,
    joins: Vec<JoinStage>,
    wheres: Vec<Expr>,
    fn_wheres: Vec<RowPredicate>,
    group: Option<GroupStage>,
    havings: Vec<Expr>,
    fn_havings: Vec<RowPredicate>,
    order: Option<TopKState>,
    select: Option<Vec<SelectItem>>,
    fn_select: Option<RowProjection>,
    distinct: Option<DistinctState>,
    unwrap_output: bool,
    inputs: Vec<PipelineInput>,
}

/// Compiles a query into a pipeline.
pub fn compile(query: &Query) -> Result<Pipeline> {
    let mut next_id = 0usize;
    compile_with(query, &mut next_id)
}

fn compile_with(query: &Query, next_id: &mut usize) -> Result<Pipeline> {
    let (from_alias, from_source) = query
        .from
        .as_ref()
        .ok_or(Error::QueryMustHaveFrom)?
        .clone();

    // ----- structural validation -----------------------------------------
    if (query.limit.is_some() || query.offset.is_some()) && query.order_by.is_empty() {
        return Err(Error::LimitOffsetRequireOrderBy);
    }
    if query.distinct && query.select.is_none() && query.fn_select.is_none() {
        return Err(Error::DistinctRequiresSelect);
    }
    if (!query.havings.is_empty() || !query.fn_havings.is_empty()) && query.group_by.is_empty() {
        return Err(Error::HavingRequiresGroupBy);
    }
    for expr in query
        .wheres
        .iter()
        .chain(query.group_by.iter())
        .chain(query.havings.iter())
        .chain(query.order_by.iter().map(|c| &c.expr))
    {
        validate_expr(expr)?;
    }
    if let Some(items) = &query.select {
        for item in items {
            if let SelectItem::Field(_, expr) = item {
                validate_expr(expr)?;
            }
        }
    }

    // ----- sources --------------------------------------------------------
    let mut inputs = Vec::new();
    let from_node = compile_source(&from_source, &from_alias, next_id, &mut inputs)?;

    let mut known_aliases: Vec<String> = alloc::vec![from_alias.clone()];
    let mut joins = Vec::new();
    for clause in &query.joins {
        let stage = compile_join(clause, &known_aliases, next_id, &mut inputs)?;
        known_aliases.push(clause.alias.clone());
        joins.push(stage);
    }

    // ----- grouping --------------------------------------------------------
    let has_aggregates = query
        .select
        .iter()
        .flatten()
        .any(|item| matches!(item, SelectItem::Field(_, e) if e.contains_aggregate()));
    let grouped = !query.group_by.is_empty() || has_aggregates;

    let group = if grouped {
        Some(compile_group(query)?)
    } else {
        None
    };

    // Having and order-by run over grouped output rows, so their refs must
    // resolve through the select list.
    let havings = if grouped {
        query
            .havings
            .iter()
            .map(|h| rewrite_over_select(h, query.select.as_deref().unwrap_or(&[])))
            .collect::<Result<Vec<_>>>()?
    } else {
        query.havings.clone()
    };

    let order_clauses = if grouped {
        query
            .order_by
            .iter()
            .map(|c| {
                rewrite_over_select(&c.expr, query.select.as_deref().unwrap_or(&[])).map(|expr| {
                    OrderByClause {
                        expr,
                        ..c.clone()
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        query.order_by.clone()
    };

    let order = if order_clauses.is_empty() {
        None
    } else {
        let cmp = order_comparator(order_clauses);
        Some(TopKState::new(
            cmp,
            query.offset.unwrap_or(0),
            query.limit,
        ))
    };

    let unwrap_output = joins.is_empty()
        && query.select.is_none()
        && query.fn_select.is_none()
        && !grouped;

    Ok(Pipeline {
        from_alias,
        from_node,
        joins,
        wheres: query.wheres.clone(),
        fn_wheres: query.fn_wheres.clone(),
        group,
        havings,
        fn_havings: query.fn_havings.clone(),
        order,
        select: if grouped { None } else { query.select.clone() },
        fn_select: if grouped { None } else { query.fn_select.clone() },
        distinct: if query.distinct {
            Some(DistinctState::new())
        } else {
            None
        },
        unwrap_output,
        inputs,
    })
}

fn compile_source(
    source: &Source,
    alias: &str,
    next_id: &mut usize,
    inputs: &mut Vec<PipelineInput>,
) -> Result<SourceNode> {
    match source {
        Source::Collection(r) => {
            let input_id = *next_id;
            *next_id += 1;
            inputs.push(PipelineInput {
                input_id,
                alias: alias.into(),
                source: r.clone(),
            });
            Ok(SourceNode::External { input_id })
        }
        Source::Query(sub) => {
            if sub.from.is_none() {
                return Err(Error::SubQueryMustHaveFrom);
            }
            let pipeline = compile_with(sub, next_id)?;
            inputs.extend(pipeline.inputs.iter().cloned());
            Ok(SourceNode::Sub(Box::new(pipeline)))
        }
    }
}

fn compile_join(
    clause: &JoinClause,
    known_aliases: &[String],
    next_id: &mut usize,
    inputs: &mut Vec<PipelineInput>,
) -> Result<JoinStage> {
    let node = compile_source(&clause.source, &clause.alias, next_id, inputs)?;

    let on = match (&clause.kind, &clause.on) {
        (JoinKind::Cross, _) => None,
        (_, None) => return Err(Error::JoinMustBeEquality),
        (_, Some((a, b))) => Some(orient_join_refs(a, b, &clause.alias, known_aliases)?),
    };

    let alias = clause.alias.clone();
    let merge = Box::new(move |left: Option<&Value>, right: Option<&Value>| {
        merge_namespaced(left, right)
    });

    Ok(JoinStage {
        alias,
        node,
        state: JoinState::new(clause.kind, merge),
        on,
    })
}

/// Orients the join refs so that the left one references an earlier alias
/// and the right one references the joined alias.
fn orient_join_refs(
    a: &PropRef,
    b: &PropRef,
    join_alias: &str,
    known_aliases: &[String],
) -> Result<(Expr, Expr)> {
    if a.path.is_empty() || b.path.is_empty() {
        return Err(Error::EmptyRefPath);
    }
    let head_a = a.path.head().unwrap_or("");
    let head_b = b.path.head().unwrap_or("");

    let (left, right) = if head_a == join_alias && head_b == join_alias {
        return Err(Error::JoinSameTable {
            alias: join_alias.into(),
        });
    } else if head_b == join_alias {
        (a, b)
    } else if head_a == join_alias {
        (b, a)
    } else {
        return Err(Error::JoinWrongTables);
    };

    let left_head = left.path.head().unwrap_or("");
    if !known_aliases.iter().any(|k| k == left_head) {
        return Err(Error::JoinTableMismatch {
            alias: left_head.into(),
        });
    }

    Ok((Expr::Ref(left.clone()), Expr::Ref(right.clone())))
}

/// Merges two namespaced rows; an absent side simply contributes nothing,
/// so refs into it read `Null`.
fn merge_namespaced(left: Option<&Value>, right: Option<&Value>) -> Value {
    let mut fields: Vec<(String, Value)> = Vec::new();
    for side in [left, right].into_iter().flatten() {
        if let Some(obj) = side.as_object() {
            for (k, v) in obj {
                fields.push((k.clone(), v.clone()));
            }
        }
    }
    Value::Object(fields)
}

/// How one grouped select field is produced.
enum GroupField {
    Key(usize),
    Agg(usize),
}

fn compile_group(query: &Query) -> Result<GroupStage> {
    let group_exprs = query.group_by.clone();

    // Without an explicit select, the group keys project themselves,
    // named by their last path segment.
    let items: Vec<SelectItem> = match &query.select {
        Some(items) => items.clone(),
        None => group_exprs
            .iter()
            .map(|e| {
                let name = e
                    .as_ref_path()
                    .and_then(|p| p.segments().last().cloned())
                    .unwrap_or_else(|| "key".into());
                SelectItem::Field(name, e.clone())
            })
            .collect(),
    };

    let mut plan: Vec<(String, GroupField)> = Vec::new();
    let mut agg_funcs: Vec<AggFunc> = Vec::new();
    let mut agg_args: Vec<Option<Expr>> = Vec::new();

    for item in &items {
        match item {
            SelectItem::Spread(alias) => {
                return Err(Error::NonAggregateNotInGroupBy {
                    field: alias.clone(),
                })
            }
            SelectItem::Field(name, expr) => {
                if let Expr::Agg { func, arg } = expr {
                    let parsed = AggFunc::parse(func)
                        .ok_or_else(|| Error::unsupported_aggregate(func.clone()))?;
                    plan.push((name.clone(), GroupField::Agg(agg_funcs.len())));
                    agg_funcs.push(parsed);
                    agg_args.push(arg.as_deref().cloned());
                } else if expr.contains_aggregate() {
                    return Err(Error::UnknownExpressionType {
                        context: format!("select field {}", name),
                    });
                } else {
                    let idx = group_exprs
                        .iter()
                        .position(|g| g == expr)
                        .ok_or_else(|| Error::NonAggregateNotInGroupBy {
                            field: name.clone(),
                        })?;
                    plan.push((name.clone(), GroupField::Key(idx)));
                }
            }
        }
    }

    let build_row = Box::new(move |keys: &[Value], aggs: &[Value]| {
        Value::Object(
            plan.iter()
                .map(|(name, source)| {
                    let value = match source {
                        GroupField::Key(i) => keys.get(*i).cloned().unwrap_or(Value::Null),
                        GroupField::Agg(i) => aggs.get(*i).cloned().unwrap_or(Value::Null),
                    };
                    (name.clone(), value)
                })
                .collect(),
        )
    });

    Ok(GroupStage {
        state: GroupState::new(agg_funcs, build_row),
        group_exprs,
        agg_args,
    })
}

/// Rewrites an expression over grouped output rows: any subexpression that
/// structurally matches a select field becomes a ref to that field.
fn rewrite_over_select(expr: &Expr, select: &[SelectItem]) -> Result<Expr> {
    for item in select {
        if let SelectItem::Field(name, field_expr) = item {
            if field_expr == expr {
                return Ok(col([name.as_str()]));
            }
        }
    }
    match expr {
        Expr::Agg { .. } => Err(Error::AggregateNotInSelect),
        Expr::Ref(_) => Err(Error::UnknownHavingExpression),
        Expr::Value(v) => Ok(Expr::Value(v.clone())),
        Expr::Func { name, args } => Ok(Expr::Func {
            name: name.clone(),
            args: args
                .iter()
                .map(|a| rewrite_over_select(a, select))
                .collect::<Result<Vec<_>>>()?,
        }),
    }
}

/// Builds the window comparator from order-by clauses.
fn order_comparator(clauses: Vec<OrderByClause>) -> Rc<dyn Fn(&Value, &Value) -> Ordering> {
    Rc::new(move |a: &Value, b: &Value| {
        for clause in &clauses {
            let av = eval(&clause.expr, a);
            let bv = eval(&clause.expr, b);
            let ord = compare_for_order(&av, &bv, clause);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    })
}

fn compare_for_order(a: &Value, b: &Value, clause: &OrderByClause) -> Ordering {
    use crate::ir::{Direction, NullsOrder};

    // Null placement is absolute: it does not flip with the direction.
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => {
            return match clause.nulls {
                NullsOrder::First => Ordering::Less,
                NullsOrder::Last => Ordering::Greater,
            }
        }
        (false, true) => {
            return match clause.nulls {
                NullsOrder::First => Ordering::Greater,
                NullsOrder::Last => Ordering::Less,
            }
        }
        (false, false) => {}
    }

    let natural = match (a, b, clause.strings) {
        (Value::Str(x), Value::Str(y), StringSort::CaseInsensitive) => {
            x.to_lowercase().cmp(&y.to_lowercase())
        }
        _ => a.cmp(b),
    };
    match clause.direction {
        Direction::Asc => natural,
        Direction::Desc => natural.reverse(),
    }
}

/// Wraps source rows under their alias.
fn wrap_alias(batch: DeltaBatch, alias: &str) -> DeltaBatch {
    batch
        .into_iter()
        .map(|d| {
            let wrapped = Value::object([(alias, d.row.clone())]);
            d.map_row(|_| wrapped)
        })
        .collect()
}

impl Pipeline {
    /// Returns every external input, including those of subqueries.
    pub fn inputs(&self) -> &[PipelineInput] {
        &self.inputs
    }

    /// Returns true if this pipeline (or a subquery) consumes the input.
    pub fn owns_input(&self, input_id: usize) -> bool {
        self.inputs.iter().any(|i| i.input_id == input_id)
    }

    /// Pushes a change batch for one input through the pipeline and
    /// returns the consolidated output deltas.
    pub fn push(&mut self, input_id: usize, batch: DeltaBatch) -> Result<DeltaBatch> {
        if batch.is_empty() {
            return Ok(DeltaBatch::new());
        }

        let flowed = if self.from_node.owns(input_id) {
            let wrapped = match &mut self.from_node {
                SourceNode::External { .. } => wrap_alias(batch, &self.from_alias),
                SourceNode::Sub(sub) => wrap_alias(sub.push(input_id, batch)?, &self.from_alias),
            };
            self.flow_joins(0, wrapped)
        } else {
            let idx = self
                .joins
                .iter()
                .position(|j| j.node.owns(input_id))
                .ok_or_else(|| Error::input_not_found(format!("input #{}", input_id)))?;
            let wrapped = {
                let stage = &mut self.joins[idx];
                match &mut stage.node {
                    SourceNode::External { .. } => wrap_alias(batch, &stage.alias),
                    SourceNode::Sub(sub) => wrap_alias(sub.push(input_id, batch)?, &stage.alias),
                }
            };
            let out = {
                let stage = &mut self.joins[idx];
                let inputs = join_inputs(wrapped, stage.on.as_ref().map(|(_, r)| r));
                stage.state.push(JoinSide::Right, inputs)
            };
            self.flow_joins(idx + 1, out)
        };

        Ok(self.tail(flowed))
    }

    fn flow_joins(&mut self, start: usize, mut batch: DeltaBatch) -> DeltaBatch {
        for i in start..self.joins.len() {
            if batch.is_empty() {
                break;
            }
            let stage = &mut self.joins[i];
            let inputs = join_inputs(batch, stage.on.as_ref().map(|(l, _)| l));
            batch = stage.state.push(JoinSide::Left, inputs);
        }
        batch
    }

    fn tail(&mut self, mut batch: DeltaBatch) -> DeltaBatch {
        if batch.is_empty() {
            return batch;
        }

        for pred in &self.fn_wheres {
            let p = pred.clone();
            batch = filter_deltas(batch, move |row| p(row));
        }
        if !self.wheres.is_empty() {
            let wheres = self.wheres.clone();
            batch = filter_deltas(batch, move |row| {
                wheres.iter().all(|w| eval_predicate(w, row))
            });
        }

        if let Some(group) = &mut self.group {
            let inputs: Vec<GroupInput> = batch
                .iter()
                .map(|d| {
                    let key_values: Vec<Value> =
                        group.group_exprs.iter().map(|e| eval(e, &d.row)).collect();
                    let group_key = Key::from_group_values(&key_values);
                    let agg_inputs: Vec<Value> = group
                        .agg_args
                        .iter()
                        .map(|arg| match arg {
                            Some(e) => eval(e, &d.row),
                            None => Value::Int(1),
                        })
                        .collect();
                    GroupInput {
                        group_key,
                        key_values,
                        agg_inputs,
                        diff: d.diff,
                    }
                })
                .collect();
            batch = group.state.push(inputs);

            if !self.havings.is_empty() {
                let havings = self.havings.clone();
                batch = filter_deltas(batch, move |row| {
                    havings.iter().all(|h| eval_predicate(h, row))
                });
            }
            for pred in &self.fn_havings {
                let p = pred.clone();
                batch = filter_deltas(batch, move |row| p(row));
            }
        }

        if let Some(order) = &mut self.order {
            batch = order.push(batch);
        }

        if let Some(items) = &self.select {
            let items = items.clone();
            batch = map_deltas(batch, move |row| project_select(&items, row));
        } else if let Some(f) = &self.fn_select {
            let f = f.clone();
            batch = map_deltas(batch, move |row| f(row));
        } else if self.unwrap_output {
            let alias = self.from_alias.clone();
            batch = map_deltas(batch, move |row| {
                row.field(&alias).cloned().unwrap_or(Value::Null)
            });
        }

        if let Some(distinct) = &mut self.distinct {
            batch = distinct.push(batch);
        }

        consolidate(batch)
    }
}

fn join_inputs(batch: DeltaBatch, on_expr: Option<&Expr>) -> Vec<JoinInput> {
    batch
        .into_iter()
        .map(|d| {
            let join_value = match on_expr {
                Some(expr) => eval(expr, &d.row),
                // Cross joins share a constant join value
                None => Value::Bool(true),
            };
            JoinInput::new(join_value, d)
        })
        .collect()
}

fn project_select(items: &[SelectItem], row: &Value) -> Value {
    let mut fields: Vec<(String, Value)> = Vec::new();
    for item in items {
        match item {
            SelectItem::Spread(alias) => {
                if let Some(obj) = row.field(alias).and_then(Value::as_object) {
                    for (k, v) in obj {
                        fields.push((k.clone(), v.clone()));
                    }
                }
            }
            SelectItem::Field(name, expr) => {
                fields.push((name.clone(), eval(expr, row)));
            }
        }
    }
    Value::Object(fields)
}
