//! Schema validation hook.

use rivulet_core::{ChangeType, Error, Result, ValidationIssue, Value};

/// Validates rows before an optimistic mutation is recorded.
///
/// Validation must be synchronous; the trait returns directly. Wrappers
/// that would block on an async validator must reject at configuration
/// time with `Error::AsyncSchema`.
pub trait SchemaValidator {
    /// Validates the row for the given operation. For updates the row is
    /// the merged result (visible value with the draft diff applied).
    fn validate(&self, row: &Value, op: ChangeType) -> std::result::Result<(), Vec<ValidationIssue>>;
}

/// Runs the configured validator, mapping issues into the typed error.
pub fn validate_row(
    schema: Option<&std::rc::Rc<dyn SchemaValidator>>,
    row: &Value,
    op: ChangeType,
) -> Result<()> {
    if let Some(schema) = schema {
        schema
            .validate(row, op)
            .map_err(Error::schema_validation)?;
    }
    Ok(())
}
