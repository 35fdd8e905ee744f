//! Result-shaping strategies.
//!
//! A [`RowReducer`] receives each row of one statement result as a lazily
//! decoded [`RowView`] and folds it into its accumulator. Which columns get
//! decoded is entirely up to the reducer.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::backend::RowDescription;

use super::row::{Row, RowView};

pub trait RowReducer {
    type Acc;
    type Output;

    /// Fresh accumulator for one statement result. `columns` is `None` for
    /// statements that return no rows.
    fn init(&self, columns: Option<&Arc<RowDescription>>) -> Self::Acc;

    fn step(&self, acc: &mut Self::Acc, row: &RowView<'_>) -> Result<()>;

    fn finish(&self, acc: Self::Acc) -> Self::Output;
}

/// Decode every row in full.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectRows;

impl RowReducer for CollectRows {
    type Acc = Vec<Row>;
    type Output = Vec<Row>;

    fn init(&self, _columns: Option<&Arc<RowDescription>>) -> Self::Acc {
        Vec::new()
    }

    fn step(&self, acc: &mut Self::Acc, row: &RowView<'_>) -> Result<()> {
        acc.push(row.to_row()?);
        Ok(())
    }

    fn finish(&self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Keep the first row; later rows are never decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstRow;

impl RowReducer for FirstRow {
    type Acc = Option<Row>;
    type Output = Option<Row>;

    fn init(&self, _columns: Option<&Arc<RowDescription>>) -> Self::Acc {
        None
    }

    fn step(&self, acc: &mut Self::Acc, row: &RowView<'_>) -> Result<()> {
        if acc.is_none() {
            *acc = Some(row.to_row()?);
        }
        Ok(())
    }

    fn finish(&self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Count rows without decoding any column.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountRows;

impl RowReducer for CountRows {
    type Acc = u64;
    type Output = u64;

    fn init(&self, _columns: Option<&Arc<RowDescription>>) -> Self::Acc {
        0
    }

    fn step(&self, acc: &mut Self::Acc, _row: &RowView<'_>) -> Result<()> {
        *acc += 1;
        Ok(())
    }

    fn finish(&self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Index rows by a key computed from the view. Later rows replace earlier
/// ones with the same key.
pub struct IndexBy<F> {
    key: F,
}

impl<F> IndexBy<F> {
    pub fn new(key: F) -> Self {
        Self { key }
    }
}

impl<F, K> RowReducer for IndexBy<F>
where
    F: Fn(&RowView<'_>) -> Result<K>,
    K: Eq + Hash,
{
    type Acc = HashMap<K, Row>;
    type Output = HashMap<K, Row>;

    fn init(&self, _columns: Option<&Arc<RowDescription>>) -> Self::Acc {
        HashMap::new()
    }

    fn step(&self, acc: &mut Self::Acc, row: &RowView<'_>) -> Result<()> {
        let key = (self.key)(row)?;
        acc.insert(key, row.to_row()?);
        Ok(())
    }

    fn finish(&self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Fold rows into a caller-defined accumulator.
pub struct Fold<A, F> {
    seed: A,
    step: F,
}

impl<A, F> Fold<A, F>
where
    A: Clone,
    F: Fn(&mut A, &RowView<'_>) -> Result<()>,
{
    pub fn new(seed: A, step: F) -> Self {
        Self { seed, step }
    }
}

impl<A, F> RowReducer for Fold<A, F>
where
    A: Clone,
    F: Fn(&mut A, &RowView<'_>) -> Result<()>,
{
    type Acc = A;
    type Output = A;

    fn init(&self, _columns: Option<&Arc<RowDescription>>) -> Self::Acc {
        self.seed.clone()
    }

    fn step(&self, acc: &mut Self::Acc, row: &RowView<'_>) -> Result<()> {
        (self.step)(acc, row)
    }

    fn finish(&self, acc: Self::Acc) -> Self::Output {
        acc
    }
}
