//! Optimistic mutation lifecycle: apply, persist, promote, roll back.

use futures::executor::block_on;
use futures::FutureExt;
use rivulet_core::{key_from_field, ChangeType, Error, Key, RowChange, Value, ValidationIssue};
use rivulet_store::{
    Collection, CollectionConfig, ManualSync, MutationFn, SchemaValidator, SubscribeOptions,
    SyncWrite, Transaction, TxConfig, TxState,
};
use std::cell::RefCell;
use std::rc::Rc;

fn ok_handler() -> MutationFn {
    Rc::new(|_tx| async { Ok(Value::Null) }.boxed_local())
}

fn failing_handler(msg: &'static str) -> MutationFn {
    Rc::new(move |_tx| async move { Err(Error::mutation_failed(msg)) }.boxed_local())
}

fn user(id: i64, name: &str) -> Value {
    Value::object([("id", Value::Int(id)), ("name", Value::from(name))])
}

fn seeded_collection() -> (Collection, ManualSync) {
    let sync = ManualSync::new();
    let users = Collection::new(
        CollectionConfig::new("users", key_from_field("id"))
            .with_sync(Rc::new(sync.clone()))
            .with_start_sync(true)
            .with_on_insert(ok_handler())
            .with_on_update(ok_handler())
            .with_on_delete(ok_handler()),
    )
    .unwrap();
    sync.push([SyncWrite::Insert(user(1, "A"))]).unwrap();
    sync.ready().unwrap();
    (users, sync)
}

fn record_changes(users: &Collection) -> (rivulet_store::ChangesHandle, Rc<RefCell<Vec<RowChange>>>) {
    let log: Rc<RefCell<Vec<RowChange>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let sub = users
        .subscribe_changes(
            move |batch| sink.borrow_mut().extend(batch.iter().cloned()),
            SubscribeOptions::default(),
        )
        .unwrap();
    (sub, log)
}

/// Optimistic update that persists: visible immediately, one update delta,
/// no flicker when the overlay retires.
#[test]
fn optimistic_update_success() {
    let (users, _sync) = seeded_collection();
    let (_sub, log) = record_changes(&users);

    let tx = Transaction::new(TxConfig {
        mutation_fn: Some(ok_handler()),
        ..TxConfig::default()
    })
    .unwrap();

    tx.mutate(|| users.update(&Key::Int(1), |d| d.set("name", "B")))
        .unwrap()
        .unwrap();

    // Optimistically visible before persistence
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("B"))
    );

    tx.commit().unwrap();
    block_on(tx.is_persisted()).unwrap();
    assert_eq!(tx.state(), TxState::Completed);

    // Still "B" after the overlay retires
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("B"))
    );

    // Exactly one update delta reached subscribers
    let log = log.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].change_type, ChangeType::Update);
    assert_eq!(log[0].value.field("name"), Some(&Value::from("B")));
    assert_eq!(
        log[0].previous.as_ref().unwrap().field("name"),
        Some(&Value::from("A"))
    );
}

/// Optimistic update that fails: visible while persisting, rolled back on
/// rejection, subscribers see the update and its reversal.
#[test]
fn optimistic_update_failure() {
    let (users, _sync) = seeded_collection();
    let (_sub, log) = record_changes(&users);

    let tx = Transaction::new(TxConfig {
        mutation_fn: Some(failing_handler("x")),
        ..TxConfig::default()
    })
    .unwrap();

    tx.mutate(|| users.update(&Key::Int(1), |d| d.set("name", "B")))
        .unwrap()
        .unwrap();
    tx.commit().unwrap();

    // Visible during persisting
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("B"))
    );

    let err = block_on(tx.is_persisted()).unwrap_err();
    assert!(matches!(err, Error::MutationFailed { .. }));
    assert_eq!(tx.state(), TxState::Failed);

    // Rolled back to the synced value
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("A"))
    );

    // Update followed by the reverse update
    let log = log.borrow();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].change_type, ChangeType::Update);
    assert_eq!(log[0].value.field("name"), Some(&Value::from("B")));
    assert_eq!(log[1].change_type, ChangeType::Update);
    assert_eq!(log[1].value.field("name"), Some(&Value::from("A")));
}

#[test]
fn implicit_insert_uses_on_insert_handler() {
    let handled = Rc::new(RefCell::new(Vec::new()));
    let sink = handled.clone();
    let sync = ManualSync::new();
    let users = Collection::new(
        CollectionConfig::new("users", key_from_field("id"))
            .with_sync(Rc::new(sync.clone()))
            .with_start_sync(true)
            .with_on_insert(Rc::new(move |tx| {
                let sink = sink.clone();
                async move {
                    for m in tx.mutations() {
                        sink.borrow_mut().push(m.key.clone());
                    }
                    Ok(Value::object([("refetch", Value::Bool(false))]))
                }
                .boxed_local()
            })),
    )
    .unwrap();
    sync.ready().unwrap();

    let tx = users.insert(user(5, "Eve")).unwrap();
    assert_eq!(tx.state(), TxState::Persisting);
    assert!(users.has(&Key::Int(5)));

    // Handler return value is forwarded unchanged
    let result = block_on(tx.is_persisted()).unwrap();
    assert_eq!(result.field("refetch"), Some(&Value::Bool(false)));
    assert_eq!(*handled.borrow(), vec![Key::Int(5)]);
}

#[test]
fn missing_handlers_are_typed_errors() {
    let sync = ManualSync::new();
    let users = Collection::new(
        CollectionConfig::new("users", key_from_field("id"))
            .with_sync(Rc::new(sync.clone()))
            .with_start_sync(true),
    )
    .unwrap();
    sync.ready().unwrap();

    assert!(matches!(
        users.insert(user(1, "A")),
        Err(Error::MissingInsertHandler)
    ));
    // The op fails before recording anything
    assert!(users.is_empty());
}

#[test]
fn duplicate_and_missing_key_errors() {
    let (users, _sync) = seeded_collection();

    assert!(matches!(
        users.insert(user(1, "again")),
        Err(Error::DuplicateKey { .. })
    ));
    assert!(matches!(
        users.update(&Key::Int(9), |d| d.set("name", "x")),
        Err(Error::UpdateKeyNotFound { .. })
    ));
    assert!(matches!(
        users.delete(&Key::Int(9)),
        Err(Error::DeleteKeyNotFound { .. })
    ));
    assert!(matches!(users.insert_many(vec![]), Err(Error::NoKeysPassed)));
    assert!(matches!(users.delete_many(&[]), Err(Error::NoKeysPassed)));
}

#[test]
fn key_change_is_rejected() {
    let (users, _sync) = seeded_collection();
    let err = users
        .update(&Key::Int(1), |d| d.set("id", Value::Int(2)))
        .unwrap_err();
    assert!(matches!(err, Error::KeyChangeNotAllowed { .. }));
    // Nothing was recorded
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("id"),
        Some(&Value::Int(1))
    );
}

#[test]
fn empty_draft_records_nothing() {
    let (users, _sync) = seeded_collection();
    let (_sub, log) = record_changes(&users);

    let tx = users.update(&Key::Int(1), |d| d.set("name", "A")).unwrap();
    assert_eq!(tx.state(), TxState::Completed);
    assert!(log.borrow().is_empty());
}

struct NameRequired;

impl SchemaValidator for NameRequired {
    fn validate(
        &self,
        row: &Value,
        _op: ChangeType,
    ) -> Result<(), Vec<ValidationIssue>> {
        match row.field("name").and_then(Value::as_str) {
            Some(n) if !n.is_empty() => Ok(()),
            _ => Err(vec![ValidationIssue::new("name required", ["name"])]),
        }
    }
}

#[test]
fn schema_failure_leaves_transaction_pending() {
    let sync = ManualSync::new();
    let users = Collection::new(
        CollectionConfig::new("users", key_from_field("id"))
            .with_sync(Rc::new(sync.clone()))
            .with_start_sync(true)
            .with_schema(Rc::new(NameRequired))
            .with_on_insert(ok_handler()),
    )
    .unwrap();
    sync.ready().unwrap();

    let tx = Transaction::new(TxConfig {
        mutation_fn: Some(ok_handler()),
        ..TxConfig::default()
    })
    .unwrap();

    let result = tx
        .mutate(|| {
            users.insert(Value::object([("id", Value::Int(1)), ("name", Value::from(""))]))
        })
        .unwrap();
    assert!(matches!(result, Err(Error::SchemaValidation { .. })));

    // The transaction survives and the mutation was not recorded
    assert_eq!(tx.state(), TxState::Pending);
    assert!(tx.mutations().is_empty());
    assert!(users.is_empty());
}

#[test]
fn explicit_transaction_batches_multiple_collections() {
    let (users, _s1) = seeded_collection();
    let sync2 = ManualSync::new();
    let posts = Collection::new(
        CollectionConfig::new("posts", key_from_field("id"))
            .with_sync(Rc::new(sync2.clone()))
            .with_start_sync(true),
    )
    .unwrap();
    sync2.ready().unwrap();

    let tx = Transaction::new(TxConfig {
        mutation_fn: Some(ok_handler()),
        ..TxConfig::default()
    })
    .unwrap();

    tx.mutate(|| {
        users.update(&Key::Int(1), |d| d.set("name", "B")).unwrap();
        posts.insert(user(10, "post")).unwrap();
    })
    .unwrap();

    assert_eq!(tx.mutations().len(), 2);
    assert!(posts.has(&Key::Int(10)));

    tx.commit().unwrap();
    block_on(tx.is_persisted()).unwrap();

    // Both overlays retired, values promoted
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("B"))
    );
    assert!(posts.has(&Key::Int(10)));
}

#[test]
fn rollback_reverts_visible_state() {
    let (users, _sync) = seeded_collection();
    let (_sub, log) = record_changes(&users);

    let tx = Transaction::new(TxConfig {
        mutation_fn: Some(ok_handler()),
        ..TxConfig::default()
    })
    .unwrap();
    tx.mutate(|| {
        users.update(&Key::Int(1), |d| d.set("name", "B")).unwrap();
        users.insert(user(2, "new")).unwrap();
    })
    .unwrap();

    assert!(users.has(&Key::Int(2)));

    tx.rollback().unwrap();
    assert_eq!(tx.state(), TxState::Failed);
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("A"))
    );
    assert!(!users.has(&Key::Int(2)));

    // update + insert, then the reversing update + delete
    let log = log.borrow();
    assert_eq!(log.len(), 4);
    assert_eq!(log[2].change_type, ChangeType::Update);
    assert_eq!(log[3].change_type, ChangeType::Delete);
}

#[test]
fn fifo_order_across_collections() {
    let (users, _s1) = seeded_collection();
    let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let make_tx = |tag: &'static str| {
        let order = order.clone();
        Transaction::new(TxConfig {
            mutation_fn: Some(Rc::new(move |_tx| {
                let order = order.clone();
                async move {
                    order.borrow_mut().push(tag);
                    Ok(Value::Null)
                }
                .boxed_local()
            })),
            ..TxConfig::default()
        })
        .unwrap()
    };

    let t1 = make_tx("t1");
    let t2 = make_tx("t2");

    t1.mutate(|| users.update(&Key::Int(1), |d| d.set("name", "B")))
        .unwrap()
        .unwrap();
    t2.mutate(|| users.update(&Key::Int(1), |d| d.set("name", "C")))
        .unwrap()
        .unwrap();

    // Later overlay wins while both are active
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("C"))
    );

    t1.commit().unwrap();
    t2.commit().unwrap();
    block_on(t2.is_persisted()).unwrap();

    assert_eq!(*order.borrow(), vec!["t1", "t2"]);
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("C"))
    );
}

#[test]
fn sync_echo_subsumes_overlay() {
    let (users, sync) = seeded_collection();
    let (_sub, log) = record_changes(&users);

    let tx = Transaction::new(TxConfig {
        mutation_fn: Some(ok_handler()),
        ..TxConfig::default()
    })
    .unwrap();
    tx.mutate(|| users.update(&Key::Int(1), |d| d.set("name", "B")))
        .unwrap()
        .unwrap();
    tx.commit().unwrap();

    // The authoritative echo arrives while the transaction persists
    sync.push([SyncWrite::Update(user(1, "B"))]).unwrap();

    block_on(tx.is_persisted()).unwrap();
    assert_eq!(
        users.get(&Key::Int(1)).unwrap().field("name"),
        Some(&Value::from("B"))
    );

    // One optimistic update; the echo and retirement add nothing
    let log = log.borrow();
    assert_eq!(log.len(), 1);
}
