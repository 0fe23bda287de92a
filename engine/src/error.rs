//! Error types for the Fieldsync engine.

use crate::{Rank, RecordId, TableName};
use thiserror::Error;

/// All possible errors from the Fieldsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Registry errors
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    #[error("duplicate table: {0}")]
    DuplicateTable(TableName),

    #[error("tables '{first}' and '{second}' share dependency rank {rank}")]
    DuplicateRank {
        rank: Rank,
        first: TableName,
        second: TableName,
    },

    #[error("table '{table}' references unknown table '{referenced}'")]
    UnknownReference {
        table: TableName,
        referenced: TableName,
    },

    #[error(
        "table '{table}' (rank {rank}) must rank above referenced table '{referenced}' (rank {referenced_rank})"
    )]
    RankOrder {
        table: TableName,
        rank: Rank,
        referenced: TableName,
        referenced_rank: Rank,
    },

    // Validation errors
    #[error("record not found: {table}/{id}")]
    RecordNotFound { table: TableName, id: RecordId },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Mutation errors
    #[error("record already exists: {table}/{id}")]
    RecordAlreadyExists { table: TableName, id: RecordId },

    #[error("record is pending deletion: {table}/{id}")]
    RecordPendingDelete { table: TableName, id: RecordId },

    #[error("illegal sync status transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: RecordId,
        from: String,
        to: String,
    },

    #[error("record {id} does not belong to table {table}")]
    TableMismatch { table: TableName, id: RecordId },

    // Conflict errors
    #[error("conflict not found: {0}")]
    ConflictNotFound(u64),

    #[error("conflict already resolved: {0}")]
    ConflictAlreadyResolved(u64),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
