//! Property tests for the order-by window and the index optimizer.

use proptest::prelude::*;
use rivulet_core::{Key, PropPath, Value};
use rivulet_incremental::RowDelta;
use rivulet_index::{IndexKind, IndexRegistry};
use rivulet_query::ir::{col, eq, gt, lit, lte, CollectionRef, OrderByClause};
use rivulet_query::{compile, eval_predicate, optimize_where, query};

fn user(id: i64, age: i64) -> Value {
    Value::object([("id", Value::Int(id)), ("age", Value::Int(age))])
}

/// Rows as (id, age) pairs with unique ids.
fn rows_strategy(max: usize) -> impl Strategy<Value = Vec<(i64, i64)>> {
    prop::collection::vec(-50i64..50, 0..max).prop_map(|ages| {
        ages.into_iter()
            .enumerate()
            .map(|(i, age)| (i as i64, age))
            .collect()
    })
}

proptest! {
    /// Property: after any insert sequence, an order-by+limit window holds
    /// exactly the `limit` rows with the smallest sort keys.
    #[test]
    fn window_matches_naive_sort(rows in rows_strategy(40), limit in 1usize..6) {
        let users = CollectionRef::new(1, "users");
        let q = query()
            .from("u", users)
            .unwrap()
            .order_by(OrderByClause::asc(col(["u", "age"])))
            .limit(limit)
            .build();
        let mut pipeline = compile(&q).unwrap();
        let input = pipeline.inputs()[0].input_id;

        // Live window membership, tracked from emitted deltas
        let mut window: Vec<i64> = Vec::new();
        for (id, age) in &rows {
            let out = pipeline
                .push(input, vec![RowDelta::insert(Key::Int(*id), user(*id, *age))])
                .unwrap();
            for d in out {
                match d.key {
                    Key::Int(id) if d.is_insert() => window.push(id),
                    Key::Int(id) => window.retain(|w| *w != id),
                    _ => unreachable!(),
                }
            }
        }

        // Naive expectation: sort by (age, id), take the first `limit`
        let mut expected = rows.clone();
        expected.sort_by_key(|(id, age)| (*age, *id));
        let expected: Vec<i64> = expected.iter().take(limit).map(|(id, _)| *id).collect();

        window.sort();
        let mut expected_sorted = expected;
        expected_sorted.sort();
        prop_assert_eq!(window, expected_sorted);
    }

    /// Property: index probe results are sound and complete with respect
    /// to row-wise predicate evaluation over the indexed snapshot.
    #[test]
    fn optimizer_sound_and_complete(rows in rows_strategy(40), bound in -50i64..50) {
        let mut registry = IndexRegistry::new();
        let snapshot: Vec<(Key, Value)> = rows
            .iter()
            .map(|(id, age)| (Key::Int(*id), user(*id, *age)))
            .collect();
        registry.create_index(
            PropPath::new(["age"]),
            IndexKind::Ordered,
            &mut snapshot.clone().into_iter(),
        );

        let wheres = vec![gt(col(["u", "age"]), lit(bound))];
        let result = optimize_where(&wheres, Some("u"), &mut registry);
        prop_assert!(result.can_optimize);
        prop_assert!(result.residual.is_empty());

        let namespaced = |row: &Value| Value::object([("u", row.clone())]);
        for (key, row) in &snapshot {
            let matches = eval_predicate(&wheres[0], &namespaced(row));
            prop_assert_eq!(result.matching_keys.contains(key), matches);
        }
    }

    /// Property: a conjunction probe equals the intersection of the
    /// row-wise clause matches.
    #[test]
    fn conjunction_probe_matches_filter(rows in rows_strategy(30), lo in -20i64..0, hi in 0i64..20) {
        let mut registry = IndexRegistry::new();
        let snapshot: Vec<(Key, Value)> = rows
            .iter()
            .map(|(id, age)| (Key::Int(*id), user(*id, *age)))
            .collect();
        registry.create_index(
            PropPath::new(["age"]),
            IndexKind::Ordered,
            &mut snapshot.clone().into_iter(),
        );

        let wheres = vec![gt(col(["u", "age"]), lit(lo)), lte(col(["u", "age"]), lit(hi))];
        let result = optimize_where(&wheres, Some("u"), &mut registry);
        prop_assert!(result.can_optimize);

        for (key, row) in &snapshot {
            let namespaced = Value::object([("u", row.clone())]);
            let matches = wheres.iter().all(|w| eval_predicate(w, &namespaced));
            prop_assert_eq!(result.matching_keys.contains(key), matches);
        }
    }

    /// Property: equality probes agree with equality filtering.
    #[test]
    fn equality_probe_matches_filter(rows in rows_strategy(30), needle in -50i64..50) {
        let mut registry = IndexRegistry::new();
        let snapshot: Vec<(Key, Value)> = rows
            .iter()
            .map(|(id, age)| (Key::Int(*id), user(*id, *age)))
            .collect();
        registry.create_index(
            PropPath::new(["age"]),
            IndexKind::Ordered,
            &mut snapshot.clone().into_iter(),
        );

        let wheres = vec![eq(col(["u", "age"]), lit(needle))];
        let result = optimize_where(&wheres, Some("u"), &mut registry);

        for (key, row) in &snapshot {
            let namespaced = Value::object([("u", row.clone())]);
            let matches = eval_predicate(&wheres[0], &namespaced);
            prop_assert_eq!(result.matching_keys.contains(key), matches);
        }
    }
}
