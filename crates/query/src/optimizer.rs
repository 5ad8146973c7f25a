//! Index optimizer for where predicates.
//!
//! Decomposes a where conjunction into index probes plus a residual
//! row-wise predicate. Only clauses of the shape `OP(ref, literal)` (or
//! the flipped comparison) over a single field path qualify; anything
//! under `or`, `not` or a function of the field stays residual.

use crate::ir::Expr;
use alloc::vec::Vec;
use rivulet_core::{KeySet, PropPath, Value};
use rivulet_index::{IndexOp, IndexRegistry};

/// Result of optimizing a where conjunction against an index set.
#[derive(Debug)]
pub struct ProbeResult {
    /// True when at least one probe was answered by an index.
    pub can_optimize: bool,
    /// Intersection of all probe results; meaningful only when
    /// `can_optimize` is true.
    pub matching_keys: KeySet,
    /// Clauses that still need row-wise evaluation.
    pub residual: Vec<Expr>,
}

impl ProbeResult {
    /// The unoptimized result: everything residual.
    fn full_scan(residual: Vec<Expr>) -> Self {
        Self {
            can_optimize: false,
            matching_keys: KeySet::new(),
            residual,
        }
    }
}

/// One indexable clause: `op` over `path` against a literal.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexableClause {
    pub path: PropPath,
    pub op: IndexOp,
    pub value: Value,
}

/// Flattens a conjunction: top-level `and` calls decompose into their
/// arguments, recursively.
pub fn flatten_conjunction(wheres: &[Expr]) -> Vec<Expr> {
    let mut out = Vec::new();
    for expr in wheres {
        flatten_into(expr, &mut out);
    }
    out
}

fn flatten_into(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Func { name, args } if name == "and" => {
            for arg in args {
                flatten_into(arg, out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// Recognizes an indexable clause. With `alias` given, the ref path must
/// be rooted at that alias and is stripped down to the row-relative path
/// used by indexes; with `None` the path is taken as row-relative already.
pub fn indexable_clause(expr: &Expr, alias: Option<&str>) -> Option<IndexableClause> {
    let (name, args) = match expr {
        Expr::Func { name, args } if args.len() == 2 => (name.as_str(), args),
        _ => return None,
    };
    let op = parse_op(name)?;
    // ref OP literal, or literal OP ref with the comparison flipped
    let (path, value) = match (&args[0], &args[1]) {
        (Expr::Ref(r), Expr::Value(v)) => (strip_alias(&r.path, alias)?, v.clone()),
        (Expr::Value(v), Expr::Ref(r)) => {
            return Some(IndexableClause {
                path: strip_alias(&r.path, alias)?,
                op: flip(op),
                value: v.clone(),
            })
        }
        _ => return None,
    };
    Some(IndexableClause { path, op, value })
}

fn parse_op(name: &str) -> Option<IndexOp> {
    match name {
        "eq" => Some(IndexOp::Eq),
        "gt" => Some(IndexOp::Gt),
        "gte" => Some(IndexOp::Gte),
        "lt" => Some(IndexOp::Lt),
        "lte" => Some(IndexOp::Lte),
        "in" => Some(IndexOp::In),
        _ => None,
    }
}

fn flip(op: IndexOp) -> IndexOp {
    match op {
        IndexOp::Gt => IndexOp::Lt,
        IndexOp::Gte => IndexOp::Lte,
        IndexOp::Lt => IndexOp::Gt,
        IndexOp::Lte => IndexOp::Gte,
        other => other,
    }
}

fn strip_alias(path: &PropPath, alias: Option<&str>) -> Option<PropPath> {
    match alias {
        None => Some(path.clone()),
        Some(alias) => {
            if path.len() >= 2 && path.head() == Some(alias) {
                Some(path.tail())
            } else {
                None
            }
        }
    }
}

/// Rewrites an alias-rooted expression into a row-relative one, stripping
/// the alias from every ref. Returns `None` when any ref is rooted
/// elsewhere (the expression cannot be pushed down to that source).
pub fn strip_alias_expr(expr: &Expr, alias: &str) -> Option<Expr> {
    match expr {
        Expr::Ref(r) => {
            let path = strip_alias(&r.path, Some(alias))?;
            Some(Expr::Ref(crate::ir::PropRef::new(path)))
        }
        Expr::Value(v) => Some(Expr::Value(v.clone())),
        Expr::Func { name, args } => {
            let args = args
                .iter()
                .map(|a| strip_alias_expr(a, alias))
                .collect::<Option<Vec<_>>>()?;
            Some(Expr::Func {
                name: name.clone(),
                args,
            })
        }
        Expr::Agg { .. } => None,
    }
}

/// Optimizes a where conjunction for a single-source query.
///
/// Returns the intersected probe keys and the residual clauses. Keys are
/// drawn from the synced state only; callers overlay optimistic rows
/// separately.
pub fn optimize_where(
    wheres: &[Expr],
    alias: Option<&str>,
    registry: &mut IndexRegistry,
) -> ProbeResult {
    let clauses = flatten_conjunction(wheres);
    if clauses.is_empty() {
        return ProbeResult::full_scan(Vec::new());
    }

    let mut matching: Option<KeySet> = None;
    let mut residual = Vec::new();

    for clause in clauses {
        let probed = indexable_clause(&clause, alias)
            .and_then(|ic| registry.probe(&ic.path, ic.op, &ic.value));
        match probed {
            Some(keys) => {
                matching = Some(match matching {
                    None => keys,
                    Some(acc) => acc.intersection(&keys).cloned().collect(),
                });
            }
            None => residual.push(clause),
        }
    }

    match matching {
        Some(keys) => ProbeResult {
            can_optimize: true,
            matching_keys: keys,
            residual,
        },
        None => ProbeResult::full_scan(residual),
    }
}

/// Paths eligible for eager auto-indexing: single-field comparison
/// clauses (`=, <, <=, >, >=`) at the top level of the conjunction.
/// Membership (`in`), `or`, `not` and functions over the field do not
/// trigger index creation.
pub fn auto_index_paths(wheres: &[Expr], alias: Option<&str>) -> Vec<PropPath> {
    let mut out: Vec<PropPath> = Vec::new();
    for clause in flatten_conjunction(wheres) {
        if let Some(ic) = indexable_clause(&clause, alias) {
            if ic.op != IndexOp::In && !out.contains(&ic.path) {
                out.push(ic.path);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{and, col, eq, gt, in_list, lit, lower, lt, not, or};
    use rivulet_core::Key;
    use rivulet_index::IndexKind;

    fn row(age: i64, status: &str) -> Value {
        Value::object([
            ("age", Value::Int(age)),
            ("status", Value::from(status)),
        ])
    }

    fn registry() -> IndexRegistry {
        let mut reg = IndexRegistry::new();
        let rows = alloc::vec![
            (Key::Int(1), row(30, "active")),
            (Key::Int(2), row(20, "inactive")),
            (Key::Int(3), row(35, "active")),
        ];
        reg.create_index(
            PropPath::new(["age"]),
            IndexKind::Ordered,
            &mut rows.clone().into_iter(),
        );
        reg.create_index(
            PropPath::new(["status"]),
            IndexKind::Ordered,
            &mut rows.into_iter(),
        );
        reg
    }

    #[test]
    fn test_single_clause_probe() {
        let mut reg = registry();
        let result = optimize_where(&[eq(col(["u", "status"]), lit("active"))], Some("u"), &mut reg);
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys.len(), 2);
        assert!(result.residual.is_empty());
    }

    #[test]
    fn test_conjunction_intersects() {
        let mut reg = registry();
        let result = optimize_where(
            &[
                eq(col(["u", "status"]), lit("active")),
                gt(col(["u", "age"]), lit(32)),
            ],
            Some("u"),
            &mut reg,
        );
        assert!(result.can_optimize);
        assert_eq!(
            result.matching_keys.iter().cloned().collect::<Vec<_>>(),
            alloc::vec![Key::Int(3)]
        );
    }

    #[test]
    fn test_nested_and_flattens() {
        let mut reg = registry();
        let result = optimize_where(
            &[and(
                eq(col(["u", "status"]), lit("active")),
                gt(col(["u", "age"]), lit(32)),
            )],
            Some("u"),
            &mut reg,
        );
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys.len(), 1);
    }

    #[test]
    fn test_flipped_comparison() {
        let mut reg = registry();
        // 32 < age is age > 32
        let result = optimize_where(&[lt(lit(32), col(["u", "age"]))], Some("u"), &mut reg);
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys.len(), 1);
    }

    #[test]
    fn test_or_and_not_stay_residual() {
        let mut reg = registry();
        let result = optimize_where(
            &[or(
                eq(col(["u", "status"]), lit("active")),
                gt(col(["u", "age"]), lit(32)),
            )],
            Some("u"),
            &mut reg,
        );
        assert!(!result.can_optimize);
        assert_eq!(result.residual.len(), 1);

        let result = optimize_where(
            &[not(eq(col(["u", "status"]), lit("active")))],
            Some("u"),
            &mut reg,
        );
        assert!(!result.can_optimize);
    }

    #[test]
    fn test_function_of_field_stays_residual() {
        let mut reg = registry();
        let result = optimize_where(
            &[eq(lower(col(["u", "status"])), lit("active"))],
            Some("u"),
            &mut reg,
        );
        assert!(!result.can_optimize);
        assert_eq!(result.residual.len(), 1);
    }

    #[test]
    fn test_mixed_probe_and_residual() {
        let mut reg = registry();
        let result = optimize_where(
            &[
                eq(col(["u", "status"]), lit("active")),
                or(gt(col(["u", "age"]), lit(32)), lit(false)),
            ],
            Some("u"),
            &mut reg,
        );
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys.len(), 2);
        assert_eq!(result.residual.len(), 1);
    }

    #[test]
    fn test_in_probe() {
        let mut reg = registry();
        let result = optimize_where(
            &[in_list(col(["u", "age"]), [20i64, 35])],
            Some("u"),
            &mut reg,
        );
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys.len(), 2);
    }

    #[test]
    fn test_no_index_full_scan() {
        let mut reg = IndexRegistry::new();
        let result = optimize_where(&[eq(col(["u", "status"]), lit("active"))], Some("u"), &mut reg);
        assert!(!result.can_optimize);
        assert_eq!(result.residual.len(), 1);
    }

    #[test]
    fn test_auto_index_paths() {
        let wheres = alloc::vec![and(
            gt(col(["u", "age"]), lit(25)),
            eq(col(["u", "status"]), lit("active")),
        )];
        let paths = auto_index_paths(&wheres, Some("u"));
        assert_eq!(
            paths,
            alloc::vec![PropPath::new(["age"]), PropPath::new(["status"])]
        );

        // or / not / function clauses are skipped
        let wheres = alloc::vec![
            or(gt(col(["u", "age"]), lit(25)), lit(true)),
            not(eq(col(["u", "x"]), lit(1))),
            eq(lower(col(["u", "name"])), lit("a")),
        ];
        assert!(auto_index_paths(&wheres, Some("u")).is_empty());

        // in does not trigger auto-indexing
        let wheres = alloc::vec![in_list(col(["u", "age"]), [1i64])];
        assert!(auto_index_paths(&wheres, Some("u")).is_empty());
    }
}
