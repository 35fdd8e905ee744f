//! Prepared statements and bind parameters.

use std::sync::Arc;

use crate::protocol::backend::RowDescription;
use crate::types::{Oid, Value};

/// A statement parsed and described by the server.
///
/// Valid only on the session that prepared it, until
/// [`Session::close_statement`](super::Session::close_statement).
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    name: String,
    sql: String,
    param_types: Vec<Oid>,
    columns: Option<Arc<RowDescription>>,
}

impl PreparedStatement {
    pub(crate) fn new(
        name: String,
        sql: String,
        param_types: Vec<Oid>,
        columns: Option<Arc<RowDescription>>,
    ) -> Self {
        Self {
            name,
            sql,
            param_types,
            columns,
        }
    }

    /// Server-side name; empty for the unnamed statement.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter OIDs as resolved by the server.
    pub fn param_types(&self) -> &[Oid] {
        &self.param_types
    }

    /// Result columns, `None` when the statement returns no rows.
    pub fn columns(&self) -> Option<&Arc<RowDescription>> {
        self.columns.as_ref()
    }
}

/// One bind parameter with an optional explicit type.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    /// Overrides the statement's declared type.
    pub oid: Option<Oid>,
}

impl Param {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            oid: None,
        }
    }

    pub fn typed(value: impl Into<Value>, oid: Oid) -> Self {
        Self {
            value: value.into(),
            oid: Some(oid),
        }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Self { value, oid: None }
    }
}

/// Per-call overrides for an extended-protocol execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Binary transfer where possible; `None` uses the session setting.
    pub binary: Option<bool>,
    /// Row limit for the portal; `0` fetches everything. Limits above
    /// `i32::MAX` are sent as `i32::MAX`.
    pub max_rows: u32,
}

impl ExecuteOptions {
    pub fn binary(mut self, binary: bool) -> Self {
        self.binary = Some(binary);
        self
    }

    pub fn max_rows(mut self, max_rows: u32) -> Self {
        self.max_rows = max_rows;
        self
    }
}
