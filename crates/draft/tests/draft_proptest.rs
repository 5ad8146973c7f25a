//! Property tests for draft diffs.

use proptest::prelude::*;
use rivulet_core::Value;
use rivulet_draft::Draft;

#[derive(Clone, Debug)]
enum Edit {
    SetTop(u8, i64),
    SetNested(u8, i64),
    PushTag(i64),
    PopTag,
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0u8..3, -100i64..100).prop_map(|(f, v)| Edit::SetTop(f, v)),
        (0u8..2, -100i64..100).prop_map(|(f, v)| Edit::SetNested(f, v)),
        (-100i64..100).prop_map(Edit::PushTag),
        Just(Edit::PopTag),
    ]
}

fn field_name(i: u8) -> &'static str {
    ["a", "b", "c"][i as usize % 3]
}

fn nested_name(i: u8) -> &'static str {
    ["x", "y"][i as usize % 2]
}

fn base_row() -> Value {
    Value::object([
        ("a", Value::Int(1)),
        ("b", Value::Int(2)),
        ("c", Value::Int(3)),
        (
            "meta",
            Value::object([("x", Value::Int(0)), ("y", Value::Int(0))]),
        ),
        ("tags", Value::array([Value::Int(7)])),
    ])
}

fn apply(draft: &Draft, edit: &Edit) {
    match edit {
        Edit::SetTop(f, v) => draft.set(field_name(*f), Value::Int(*v)),
        Edit::SetNested(f, v) => {
            if let Some(meta) = draft.object("meta") {
                meta.set(nested_name(*f), Value::Int(*v));
            }
        }
        Edit::PushTag(v) => {
            if let Some(tags) = draft.array("tags") {
                tags.push(Value::Int(*v));
            }
        }
        Edit::PopTag => {
            if let Some(tags) = draft.array("tags") {
                tags.pop();
            }
        }
    }
}

proptest! {
    /// The diff contains exactly the top-level fields whose final value
    /// deep-differs from the original, carrying the full new value.
    #[test]
    fn diff_matches_deep_difference(edits in prop::collection::vec(edit_strategy(), 0..20)) {
        let original = base_row();
        let draft = Draft::new(original.clone());
        for edit in &edits {
            apply(&draft, edit);
        }

        let changes = draft.changes();
        let result = draft.into_value();

        let change_fields = changes.as_object().unwrap();
        for (name, value) in change_fields {
            // Every reported field really differs and carries the final value
            prop_assert_ne!(original.field(name), Some(value));
            prop_assert_eq!(result.field(name), Some(value));
        }
        // Every unreported field is unchanged
        for (name, value) in original.as_object().unwrap() {
            if changes.field(name).is_none() {
                prop_assert_eq!(result.field(name), Some(value));
            }
        }
    }

    /// An edit sequence followed by its exact inverse nets to an empty
    /// diff.
    #[test]
    fn inverse_edits_cancel(values in prop::collection::vec(-100i64..100, 1..10)) {
        let original = base_row();
        let draft = Draft::new(original.clone());

        // Forward: overwrite fields and grow the array
        for v in &values {
            draft.set("a", Value::Int(*v));
            if let Some(tags) = draft.array("tags") {
                tags.push(Value::Int(*v));
            }
        }
        prop_assert!(!draft.is_unchanged());

        // Inverse: restore the original value and shrink the array back
        draft.set("a", Value::Int(1));
        if let Some(tags) = draft.array("tags") {
            for _ in &values {
                tags.pop();
            }
        }

        prop_assert!(draft.is_unchanged());
        prop_assert_eq!(draft.changes(), Value::Object(vec![]));
        prop_assert_eq!(draft.into_value(), original);
    }

    /// The input value is never mutated, whatever the edits.
    #[test]
    fn original_is_never_mutated(edits in prop::collection::vec(edit_strategy(), 0..20)) {
        let original = base_row();
        let draft = Draft::new(original.clone());
        for edit in &edits {
            apply(&draft, edit);
        }
        prop_assert_eq!(draft.original(), original);
    }
}
