//! Error types for Rivulet.

use crate::key::Key;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Result type alias for Rivulet operations.
pub type Result<T> = core::result::Result<T, Error>;

/// A single schema-validation issue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Human-readable description of the problem.
    pub message: String,
    /// Path to the offending field within the row.
    pub path: Vec<String>,
}

impl ValidationIssue {
    /// Creates a validation issue.
    pub fn new(message: impl Into<String>, path: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            message: message.into(),
            path: path.into_iter().map(Into::into).collect(),
        }
    }
}

/// Error types for Rivulet operations.
///
/// This is the single root of the error taxonomy; every fallible public
/// operation in the workspace returns one of these kinds.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    // ----- collection configuration -------------------------------------
    /// Collection was constructed without required configuration.
    MissingConfig { what: String },
    /// Collection has no sync adapter configured.
    MissingSync,
    /// Schema configuration is invalid.
    InvalidSchema { message: String },
    /// Schema validators must be synchronous.
    AsyncSchema,

    // ----- collection state ----------------------------------------------
    /// The collection is in the error state and cannot serve the operation.
    InErrorState,
    /// Lifecycle transition is not allowed.
    InvalidStatusTransition { from: String, to: String },
    /// Subscriber bookkeeping went below zero.
    NegativeSubscriberCount,

    // ----- collection operations -----------------------------------------
    /// The key function produced no usable key for a row.
    UndefinedKey,
    /// Insert of a key already present in the visible state.
    DuplicateKey { key: Key },
    /// The sync channel staged an insert for a key already synced.
    SyncedDuplicateKey { key: Key },
    /// A multi-key operation received an empty key list.
    NoKeysPassed,
    /// Update target does not exist in the visible state.
    UpdateKeyNotFound { key: Key },
    /// Delete target does not exist in the visible state.
    DeleteKeyNotFound { key: Key },
    /// A mutator changed the row's key.
    KeyChangeNotAllowed { from: Key, to: Key },

    // ----- missing mutation handlers --------------------------------------
    /// `insert` outside an explicit transaction with no `on_insert` handler.
    MissingInsertHandler,
    /// `update` outside an explicit transaction with no `on_update` handler.
    MissingUpdateHandler,
    /// `delete` outside an explicit transaction with no `on_delete` handler.
    MissingDeleteHandler,

    // ----- transactions ----------------------------------------------------
    /// Transaction requires a mutation function.
    MissingMutationFn,
    /// `mutate` on a transaction that is no longer pending.
    TxNotPendingMutate { state: String },
    /// `commit` on a transaction that is no longer pending.
    TxNotPendingCommit { state: String },
    /// `rollback` on a completed or failed transaction.
    RollbackAlreadyCompleted { state: String },
    /// Sync `write`/`commit` without an open sync transaction.
    NoPendingSyncTransaction,
    /// Sync `write`/`commit` after the sync transaction committed.
    SyncTransactionAlreadyCommitted,
    /// The mutation handler rejected; carries its message.
    MutationFailed { message: String },

    // ----- query builder ---------------------------------------------------
    /// `from` accepts exactly one source.
    OnlyOneSourceAllowed,
    /// A subquery used as a source must itself have a `from`.
    SubQueryMustHaveFrom,
    /// Source is not a collection or query.
    InvalidSource,
    /// Join `on` must be an equality of two refs.
    JoinMustBeEquality,
    /// The query has no `from` clause.
    QueryMustHaveFrom,

    // ----- query compilation ----------------------------------------------
    /// `distinct` requires `select`.
    DistinctRequiresSelect,
    /// `having` requires `group_by`.
    HavingRequiresGroupBy,
    /// `limit`/`offset` require at least one `order_by` clause.
    LimitOffsetRequireOrderBy,
    /// A referenced source alias has no registered input.
    InputNotFound { alias: String },
    /// Expression node is not valid in this position.
    UnknownExpressionType { context: String },
    /// A `PropRef` with an empty path.
    EmptyRefPath,
    /// Function name is not known to the evaluator.
    UnknownFunction { name: String },

    // ----- joins ------------------------------------------------------------
    /// Join type is not supported by the compiler.
    UnsupportedJoinType { kind: String },
    /// Both sides of the join condition reference the same source.
    JoinSameTable { alias: String },
    /// The join condition references a source that is not part of the join.
    JoinTableMismatch { alias: String },
    /// The join condition does not mention the joined source.
    JoinWrongTables,
    /// Joined source kind is not supported.
    UnsupportedJoinSource,

    // ----- group-by ----------------------------------------------------------
    /// Selected field is neither aggregated nor part of the group key.
    NonAggregateNotInGroupBy { field: String },
    /// Aggregate function is not supported.
    UnsupportedAggregate { name: String },
    /// `having` references an aggregate that is not selected.
    AggregateNotInSelect,
    /// `having` expression shape is not understood.
    UnknownHavingExpression,

    // ----- validation --------------------------------------------------------
    /// Schema validation failed.
    SchemaValidation { issues: Vec<ValidationIssue> },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MissingConfig { what } => write!(f, "Missing collection config: {}", what),
            Error::MissingSync => write!(f, "Collection requires a sync adapter"),
            Error::InvalidSchema { message } => write!(f, "Invalid schema: {}", message),
            Error::AsyncSchema => write!(f, "Schema validators must be synchronous"),
            Error::InErrorState => write!(f, "Collection is in an error state"),
            Error::InvalidStatusTransition { from, to } => {
                write!(f, "Invalid status transition: {} -> {}", from, to)
            }
            Error::NegativeSubscriberCount => write!(f, "Subscriber count went negative"),
            Error::UndefinedKey => write!(f, "Row key is undefined (keys must be string or int)"),
            Error::DuplicateKey { key } => write!(f, "Duplicate key: {:?}", key),
            Error::SyncedDuplicateKey { key } => {
                write!(f, "Sync insert for already-synced key: {:?}", key)
            }
            Error::NoKeysPassed => write!(f, "No keys passed"),
            Error::UpdateKeyNotFound { key } => write!(f, "Cannot update missing key: {:?}", key),
            Error::DeleteKeyNotFound { key } => write!(f, "Cannot delete missing key: {:?}", key),
            Error::KeyChangeNotAllowed { from, to } => {
                write!(f, "Updates may not change the key: {:?} -> {:?}", from, to)
            }
            Error::MissingInsertHandler => write!(f, "No on_insert handler configured"),
            Error::MissingUpdateHandler => write!(f, "No on_update handler configured"),
            Error::MissingDeleteHandler => write!(f, "No on_delete handler configured"),
            Error::MissingMutationFn => write!(f, "Transaction requires a mutation function"),
            Error::TxNotPendingMutate { state } => {
                write!(f, "mutate() requires a pending transaction (state: {})", state)
            }
            Error::TxNotPendingCommit { state } => {
                write!(f, "commit() requires a pending transaction (state: {})", state)
            }
            Error::RollbackAlreadyCompleted { state } => {
                write!(f, "rollback() on a settled transaction (state: {})", state)
            }
            Error::NoPendingSyncTransaction => {
                write!(f, "No sync transaction in progress (call begin first)")
            }
            Error::SyncTransactionAlreadyCommitted => {
                write!(f, "Sync transaction already committed")
            }
            Error::MutationFailed { message } => write!(f, "Mutation handler failed: {}", message),
            Error::OnlyOneSourceAllowed => write!(f, "from() accepts exactly one source"),
            Error::SubQueryMustHaveFrom => write!(f, "Subquery sources must have a from clause"),
            Error::InvalidSource => write!(f, "Source must be a collection or a query"),
            Error::JoinMustBeEquality => {
                write!(f, "Join conditions must be an equality of two refs")
            }
            Error::QueryMustHaveFrom => write!(f, "Query has no from clause"),
            Error::DistinctRequiresSelect => write!(f, "distinct requires select"),
            Error::HavingRequiresGroupBy => write!(f, "having requires group_by"),
            Error::LimitOffsetRequireOrderBy => {
                write!(f, "limit/offset require at least one order_by clause")
            }
            Error::InputNotFound { alias } => write!(f, "No input registered for alias: {}", alias),
            Error::UnknownExpressionType { context } => {
                write!(f, "Unknown expression type in {}", context)
            }
            Error::EmptyRefPath => write!(f, "Ref path is empty"),
            Error::UnknownFunction { name } => write!(f, "Unknown function: {}", name),
            Error::UnsupportedJoinType { kind } => write!(f, "Unsupported join type: {}", kind),
            Error::JoinSameTable { alias } => {
                write!(f, "Join condition references {} on both sides", alias)
            }
            Error::JoinTableMismatch { alias } => {
                write!(f, "Join condition references unknown source: {}", alias)
            }
            Error::JoinWrongTables => write!(f, "Join condition does not mention the joined source"),
            Error::UnsupportedJoinSource => write!(f, "Joined source kind is not supported"),
            Error::NonAggregateNotInGroupBy { field } => {
                write!(f, "Field {} must be aggregated or grouped", field)
            }
            Error::UnsupportedAggregate { name } => write!(f, "Unsupported aggregate: {}", name),
            Error::AggregateNotInSelect => {
                write!(f, "having references an aggregate that is not selected")
            }
            Error::UnknownHavingExpression => write!(f, "Unknown having expression"),
            Error::SchemaValidation { issues } => {
                write!(f, "Schema validation failed ({} issue(s))", issues.len())
            }
        }
    }
}

impl Error {
    /// Creates a missing-config error.
    pub fn missing_config(what: impl Into<String>) -> Self {
        Error::MissingConfig { what: what.into() }
    }

    /// Creates an invalid-schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }

    /// Creates an invalid status transition error.
    pub fn invalid_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Error::InvalidStatusTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates an undefined-key error.
    pub fn undefined_key() -> Self {
        Error::UndefinedKey
    }

    /// Creates a duplicate-key error.
    pub fn duplicate_key(key: Key) -> Self {
        Error::DuplicateKey { key }
    }

    /// Creates an update-target-missing error.
    pub fn update_key_not_found(key: Key) -> Self {
        Error::UpdateKeyNotFound { key }
    }

    /// Creates a delete-target-missing error.
    pub fn delete_key_not_found(key: Key) -> Self {
        Error::DeleteKeyNotFound { key }
    }

    /// Creates a key-change error.
    pub fn key_change_not_allowed(from: Key, to: Key) -> Self {
        Error::KeyChangeNotAllowed { from, to }
    }

    /// Creates a mutation-failure error from a handler message.
    pub fn mutation_failed(message: impl Into<String>) -> Self {
        Error::MutationFailed {
            message: message.into(),
        }
    }

    /// Creates an input-not-found error.
    pub fn input_not_found(alias: impl Into<String>) -> Self {
        Error::InputNotFound {
            alias: alias.into(),
        }
    }

    /// Creates an unknown-function error.
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Error::UnknownFunction { name: name.into() }
    }

    /// Creates an unsupported-aggregate error.
    pub fn unsupported_aggregate(name: impl Into<String>) -> Self {
        Error::UnsupportedAggregate { name: name.into() }
    }

    /// Creates a schema-validation error.
    pub fn schema_validation(issues: Vec<ValidationIssue>) -> Self {
        Error::SchemaValidation { issues }
    }
}
