//! Intercepted operations and their results
//!
//! The pipeline intercepts a closed set of operations. Each variant carries a
//! typed payload so plugins match on what they care about instead of method
//! names.

use crate::core::{HostSpec, Properties};
use crate::error::{SwitchyardError, SwitchyardResult};

/// One logical database operation flowing through the plugin chain
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Statement returning rows
    ExecuteQuery { sql: String },
    /// Statement returning an update count
    ExecuteUpdate { sql: String },
    /// Statement with an unspecified result
    Execute { sql: String },
    SetReadOnly(bool),
    SetAutoCommit(bool),
    Commit,
    Rollback,
    Close,
}

impl Operation {
    pub fn execute_query(sql: impl Into<String>) -> Self {
        Operation::ExecuteQuery { sql: sql.into() }
    }

    pub fn execute_update(sql: impl Into<String>) -> Self {
        Operation::ExecuteUpdate { sql: sql.into() }
    }

    pub fn execute(sql: impl Into<String>) -> Self {
        Operation::Execute { sql: sql.into() }
    }

    /// Stable name used in logs and telemetry
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ExecuteQuery { .. } => "execute_query",
            Operation::ExecuteUpdate { .. } => "execute_update",
            Operation::Execute { .. } => "execute",
            Operation::SetReadOnly(_) => "set_read_only",
            Operation::SetAutoCommit(_) => "set_auto_commit",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Close => "close",
        }
    }

    /// Statement text of execute-family operations
    pub fn sql(&self) -> Option<&str> {
        match self {
            Operation::ExecuteQuery { sql }
            | Operation::ExecuteUpdate { sql }
            | Operation::Execute { sql } => Some(sql),
            _ => None,
        }
    }

    pub fn is_execute(&self) -> bool {
        self.sql().is_some()
    }
}

/// A result row, one textual value per column
pub type Row = Vec<String>;

/// Result of an operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Rows(Vec<Row>),
    UpdateCount(u64),
    Done,
}

impl OperationResult {
    pub fn into_rows(self) -> SwitchyardResult<Vec<Row>> {
        match self {
            OperationResult::Rows(rows) => Ok(rows),
            other => Err(SwitchyardError::internal(format!(
                "expected rows, got {:?}",
                other
            ))),
        }
    }

    pub fn into_update_count(self) -> SwitchyardResult<u64> {
        match self {
            OperationResult::UpdateCount(count) => Ok(count),
            OperationResult::Done => Ok(0),
            other => Err(SwitchyardError::internal(format!(
                "expected update count, got {:?}",
                other
            ))),
        }
    }
}

/// Arguments of a connect call travelling down the chain
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub protocol: String,
    pub host: HostSpec,
    pub props: Properties,
    /// True for the first physical connection of a logical connection
    pub initial: bool,
}

impl ConnectRequest {
    pub fn new(protocol: impl Into<String>, host: HostSpec, props: Properties, initial: bool) -> Self {
        Self {
            protocol: protocol.into(),
            host,
            props,
            initial,
        }
    }
}
