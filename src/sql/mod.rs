//! Lightweight SQL statement classification
//!
//! Detects transaction boundaries, DML and autocommit changes from statement
//! text without parsing SQL. The results are advisory: they decide whether a
//! connection switch is currently safe, never whether SQL is well-formed.
//! Quoting is not understood; `/* ... */` block comments are stripped.

use lazy_static::lazy_static;
use regex::Regex;

use crate::plugin::Operation;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("whitespace pattern");
    static ref BLOCK_COMMENT: Regex = Regex::new(r"\s*/\*(.*?)\*/\s*").expect("comment pattern");
}

/// Split `sql` on `;` after collapsing whitespace. Blank input yields no statements.
pub fn statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    let collapsed = WHITESPACE.replace_all(sql, " ");
    collapsed.split(';').map(str::to_string).collect()
}

/// First statement, uppercased, comment-stripped and trimmed
pub fn first_statement(sql: &str) -> Option<String> {
    let first = statements(sql).into_iter().next()?;
    let upper = first.to_uppercase();
    let stripped = BLOCK_COMMENT.replace_all(&upper, " ");
    Some(stripped.trim().to_string())
}

fn is_starting_transaction(statement: &str) -> bool {
    statement.starts_with("BEGIN") || statement.starts_with("START TRANSACTION")
}

fn is_closing_transaction(statement: &str) -> bool {
    statement.starts_with("COMMIT")
        || statement.starts_with("ROLLBACK")
        || statement.starts_with("END")
        || statement.starts_with("ABORT")
}

fn is_setting_state(statement: &str) -> bool {
    statement.starts_with("SET ")
}

fn is_statement_dml(statement: &str) -> bool {
    !statement.is_empty()
        && !is_starting_transaction(statement)
        && !is_closing_transaction(statement)
        && !is_setting_state(statement)
}

/// Whether executing `sql` leaves a transaction open.
///
/// Explicit `BEGIN` / `START TRANSACTION` always does; with autocommit off any
/// DML implicitly starts one.
pub fn opens_transaction(sql: &str, autocommit: bool) -> bool {
    let Some(statement) = first_statement(sql) else {
        return false;
    };

    if is_starting_transaction(&statement) {
        return true;
    }

    !autocommit && is_statement_dml(&statement)
}

/// Whether `sql` ends the current transaction
pub fn closes_transaction_sql(sql: &str) -> bool {
    first_statement(sql)
        .map(|s| is_closing_transaction(&s))
        .unwrap_or(false)
}

/// Whether `op` ends the current transaction, either explicitly
/// (commit/rollback) or through statement text
pub fn closes_transaction(op: &Operation) -> bool {
    match op {
        Operation::Commit | Operation::Rollback => true,
        _ => op.sql().map(closes_transaction_sql).unwrap_or(false),
    }
}

/// True unless the statement opens or closes a transaction or is a `SET`
pub fn is_dml(sql: &str) -> bool {
    first_statement(sql)
        .map(|s| is_statement_dml(&s))
        .unwrap_or(false)
}

pub fn sets_autocommit(sql: &str) -> bool {
    first_statement(sql)
        .map(|s| s.starts_with("SET AUTOCOMMIT"))
        .unwrap_or(false)
}

/// Literal assigned by `SET AUTOCOMMIT = ...`.
///
/// `0`/`false` and `1`/`true` are recognized; anything else is `None` and
/// must be treated as "no information".
pub fn extract_autocommit_value(sql: &str) -> Option<bool> {
    let lowered = sql.trim().to_lowercase();
    let (_, value) = lowered.split_once('=')?;
    let value = value.split(';').next().unwrap_or_default().trim();

    match value {
        "false" | "0" => Some(false),
        "true" | "1" => Some(true),
        _ => None,
    }
}

/// Every classification of a statement, as reported by the CLI
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub first_statement: Option<String>,
    pub opens_transaction: bool,
    pub closes_transaction: bool,
    pub is_dml: bool,
    pub sets_autocommit: bool,
    pub autocommit_value: Option<bool>,
}

pub fn classify(sql: &str, autocommit: bool) -> Classification {
    let sets_autocommit = sets_autocommit(sql);
    Classification {
        first_statement: first_statement(sql),
        opens_transaction: opens_transaction(sql, autocommit),
        closes_transaction: closes_transaction_sql(sql),
        is_dml: is_dml(sql),
        sets_autocommit,
        autocommit_value: if sets_autocommit {
            extract_autocommit_value(sql)
        } else {
            None
        },
    }
}
