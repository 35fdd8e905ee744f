//! Lazily decoded rows.
//!
//! A [`RowView`] pairs a raw `DataRow` with the active row description and
//! the value processors resolved for it. Columns are decoded on first access
//! and memoized, so a reducer that never reads a column never pays for (or
//! fails on) its conversion.

use std::sync::Arc;

use once_cell::unsync::OnceCell;

use crate::error::{ProtocolError, Result};
use crate::protocol::backend::{Column, DataRow, RowDescription};
use crate::types::registry::{decode_with, CodecContext, ValueProcessor};
use crate::types::Value;

/// Borrowed, decode-on-demand view of one row.
pub struct RowView<'a> {
    row: &'a DataRow,
    columns: &'a Arc<RowDescription>,
    processors: &'a [Arc<dyn ValueProcessor>],
    ctx: CodecContext<'a>,
    memo: Vec<OnceCell<Value>>,
}

impl<'a> RowView<'a> {
    pub(crate) fn new(
        row: &'a DataRow,
        columns: &'a Arc<RowDescription>,
        processors: &'a [Arc<dyn ValueProcessor>],
        ctx: CodecContext<'a>,
    ) -> Result<Self> {
        if row.len() != columns.len() {
            return Err(ProtocolError::protocol(format!(
                "DataRow has {} columns, RowDescription declared {}",
                row.len(),
                columns.len()
            )));
        }
        let mut memo = Vec::with_capacity(row.len());
        memo.resize_with(row.len(), OnceCell::new);
        Ok(Self {
            row,
            columns,
            processors,
            ctx,
            memo,
        })
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    pub fn columns(&self) -> &'a Arc<RowDescription> {
        self.columns
    }

    pub fn column(&self, index: usize) -> Option<&'a Column> {
        self.columns.columns().get(index)
    }

    /// Undecoded bytes of column `index`; `Some(None)` is SQL null.
    pub fn raw(&self, index: usize) -> Option<Option<&'a [u8]>> {
        self.row.get(index)
    }

    pub fn is_null(&self, index: usize) -> bool {
        matches!(self.row.get(index), Some(None))
    }

    /// Decode column `index`, or return the memoized value.
    pub fn get(&self, index: usize) -> Result<&Value> {
        let cell = self
            .memo
            .get(index)
            .ok_or_else(|| ProtocolError::ColumnNotFound(format!("index {index}")))?;
        cell.get_or_try_init(|| {
            let raw = self.row.get(index).flatten();
            let format = self.columns.columns()[index].format;
            decode_with(self.processors[index].as_ref(), format, raw, &self.ctx)
                .map_err(ProtocolError::from)
        })
    }

    pub fn get_by_name(&self, name: &str) -> Result<&Value> {
        let index = self
            .columns
            .position(name)
            .ok_or_else(|| ProtocolError::ColumnNotFound(name.to_string()))?;
        self.get(index)
    }

    /// Decode every column into an owned row.
    pub fn to_row(&self) -> Result<Row> {
        let values = (0..self.len())
            .map(|i| self.get(i).cloned())
            .collect::<Result<Vec<_>>>()?;
        Ok(Row {
            columns: Arc::clone(self.columns),
            values,
        })
    }
}

/// Fully decoded row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<RowDescription>,
    values: Vec<Value>,
}

impl Row {
    pub fn columns(&self) -> &Arc<RowDescription> {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.values.get(i))
    }
}
