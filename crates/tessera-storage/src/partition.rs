use std::collections::BTreeMap;
use std::sync::Arc;

use tessera_types::Clustering;

use crate::cell::{Cell, CellPath};
use crate::column::ColumnMetadata;

/// Addresses one cell slot within a row: the column, plus the element path
/// for complex columns.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct CellKey {
    column: String,
    path: Option<CellPath>,
}

/// A materialized row: the latest version of every cell written under one
/// clustering position.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Row {
    cells: BTreeMap<CellKey, Cell>,
}

impl Row {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Insert a cell, resolving against any existing version of the same
    /// slot with last-write-wins.
    pub fn apply(&mut self, cell: Cell) {
        let key = CellKey {
            column: cell.column().name().to_owned(),
            path: cell.path().cloned(),
        };
        match self.cells.remove(&key) {
            Some(existing) => {
                self.cells.insert(key, Cell::reconcile(existing, cell));
            }
            None => {
                self.cells.insert(key, cell);
            }
        }
    }

    /// The cell for a simple column, if any.
    pub fn cell(&self, column: &Arc<ColumnMetadata>) -> Option<&Cell> {
        self.cell_at(column, None)
    }

    pub fn cell_at(
        &self,
        column: &Arc<ColumnMetadata>,
        path: Option<&CellPath>,
    ) -> Option<&Cell> {
        self.cells.get(&CellKey {
            column: column.name().to_owned(),
            path: path.cloned(),
        })
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    /// Greatest write timestamp across the row's cells, zero when empty.
    pub fn max_timestamp(&self) -> i64 {
        self.cells
            .values()
            .map(Cell::timestamp)
            .fold(0, i64::max)
    }
}

/// A materialized partition: rows keyed by clustering position.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Partition {
    rows: BTreeMap<Clustering, Row>,
}

impl Partition {
    pub fn is_empty(&self) -> bool {
        self.rows.values().all(Row::is_empty)
    }

    pub fn apply(&mut self, clustering: Clustering, cell: Cell) {
        self.rows.entry(clustering).or_default().apply(cell);
    }

    pub fn row(&self, clustering: Clustering) -> Option<&Row> {
        self.rows.get(&clustering)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Clustering, &Row)> {
        self.rows.iter()
    }

    /// Fold another materialized view of the same partition into this one,
    /// cell by cell, resolving with last-write-wins.
    pub fn merge_from(&mut self, other: &Partition) {
        for (clustering, row) in other.rows() {
            for cell in row.cells() {
                self.apply(*clustering, cell.clone());
            }
        }
    }

    /// Greatest write timestamp across all rows and columns, zero when the
    /// partition holds nothing.
    pub fn max_timestamp(&self) -> i64 {
        self.rows
            .values()
            .map(Row::max_timestamp)
            .fold(0, i64::max)
    }
}
