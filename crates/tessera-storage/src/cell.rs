//! Immutable versioned cells.
//!
//! A `Cell` is one version of one column value. Cells are never mutated
//! after construction: every update builds a new instance, sharing the
//! payload and path by reference, so published cells can be read from any
//! number of threads without synchronization.

use std::mem;
use std::sync::Arc;

use bytes::Bytes;

use tessera_types::{Result, TesseraError};

use crate::column::ColumnMetadata;
use crate::expiration::compute_local_expiration_time;

/// Sentinel ttl meaning "never expires".
pub const NO_TTL: i32 = 0;

/// Sentinel local deletion time meaning "never deleted".
pub const NO_DELETION_TIME: i32 = i32::MAX;

/// Opaque sub-identifier addressing one element of a complex column
/// (collection or UDT). Ownership of the path encoding lives with the
/// complex-column machinery; cells only carry and share it.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellPath(Bytes);

impl CellPath {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn unshared_heap_size(&self) -> u64 {
        mem::size_of::<Self>() as u64 + self.0.len() as u64
    }

    pub fn unshared_heap_size_excluding_data(&self) -> u64 {
        mem::size_of::<Self>() as u64
    }
}

/// One immutable column version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cell {
    column: Arc<ColumnMetadata>,
    timestamp: i64,
    ttl: i32,
    local_deletion_time: i32,
    value: Bytes,
    path: Option<CellPath>,
}

impl Cell {
    /// Construct a cell, enforcing the structural invariants: cells never
    /// belong to primary-key columns, and a path is present iff the column
    /// is complex. Violations are precondition failures surfaced to the
    /// caller, never coerced.
    pub fn new(
        column: Arc<ColumnMetadata>,
        timestamp: i64,
        ttl: i32,
        local_deletion_time: i32,
        value: Bytes,
        path: Option<CellPath>,
    ) -> Result<Self> {
        if column.is_primary_key() {
            return Err(TesseraError::InvalidCell(format!(
                "cell on primary key column {column}"
            )));
        }
        if column.is_complex() != path.is_some() {
            return Err(TesseraError::InvalidCell(format!(
                "column {column} isComplex: {} with cell path: {:?}",
                column.is_complex(),
                path
            )));
        }
        Ok(Self {
            column,
            timestamp,
            ttl,
            local_deletion_time,
            value,
            path,
        })
    }

    /// A live cell with a real value and no expiry.
    pub fn live(
        column: Arc<ColumnMetadata>,
        timestamp: i64,
        value: Bytes,
        path: Option<CellPath>,
    ) -> Result<Self> {
        Self::new(column, timestamp, NO_TTL, NO_DELETION_TIME, value, path)
    }

    /// A live cell that expires `ttl` seconds after `now_in_sec`.
    pub fn expiring(
        column: Arc<ColumnMetadata>,
        timestamp: i64,
        ttl: i32,
        now_in_sec: i32,
        value: Bytes,
        path: Option<CellPath>,
    ) -> Result<Self> {
        if ttl == NO_TTL {
            return Err(TesseraError::InvalidCell(format!(
                "expiring cell on {column} without ttl"
            )));
        }
        let local_deletion_time = compute_local_expiration_time(now_in_sec, ttl);
        Self::new(column, timestamp, ttl, local_deletion_time, value, path)
    }

    /// A deletion marker: empty value, deleted at `now_in_sec`.
    pub fn tombstone(
        column: Arc<ColumnMetadata>,
        timestamp: i64,
        now_in_sec: i32,
        path: Option<CellPath>,
    ) -> Result<Self> {
        Self::new(column, timestamp, NO_TTL, now_in_sec, Bytes::new(), path)
    }

    pub fn column(&self) -> &Arc<ColumnMetadata> {
        &self.column
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn ttl(&self) -> i32 {
        self.ttl
    }

    pub fn local_deletion_time(&self) -> i32 {
        self.local_deletion_time
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn path(&self) -> Option<&CellPath> {
        self.path.as_ref()
    }

    pub fn is_tombstone(&self) -> bool {
        self.local_deletion_time != NO_DELETION_TIME && self.ttl == NO_TTL
    }

    pub fn is_expiring(&self) -> bool {
        self.ttl != NO_TTL
    }

    pub fn is_live(&self, now_in_sec: i32) -> bool {
        self.local_deletion_time == NO_DELETION_TIME
            || (self.ttl != NO_TTL && now_in_sec < self.local_deletion_time)
    }

    /// Rebind this cell to another column. Revalidates the structural
    /// invariants against the new column.
    pub fn with_updated_column(&self, column: Arc<ColumnMetadata>) -> Result<Self> {
        Self::new(
            column,
            self.timestamp,
            self.ttl,
            self.local_deletion_time,
            self.value.clone(),
            self.path.clone(),
        )
    }

    pub fn with_updated_value(&self, value: Bytes) -> Self {
        Self {
            value,
            column: Arc::clone(&self.column),
            path: self.path.clone(),
            ..*self
        }
    }

    pub fn with_updated_timestamp_and_local_deletion_time(
        &self,
        timestamp: i64,
        local_deletion_time: i32,
    ) -> Self {
        Self {
            timestamp,
            local_deletion_time,
            ttl: self.ttl,
            column: Arc::clone(&self.column),
            value: self.value.clone(),
            path: self.path.clone(),
        }
    }

    pub fn with_skipped_value(&self) -> Self {
        self.with_updated_value(Bytes::new())
    }

    /// Retained size of this cell plus its owned payload and path.
    pub fn unshared_heap_size(&self) -> u64 {
        mem::size_of::<Self>() as u64
            + self.value.len() as u64
            + self.path.as_ref().map_or(0, CellPath::unshared_heap_size)
    }

    /// As `unshared_heap_size`, for collaborators that account the payload
    /// separately.
    pub fn unshared_heap_size_excluding_data(&self) -> u64 {
        mem::size_of::<Self>() as u64
            + self
                .path
                .as_ref()
                .map_or(0, CellPath::unshared_heap_size_excluding_data)
    }

    /// Last-write-wins resolution between two versions of the same cell:
    /// higher timestamp wins, a tombstone beats a live cell on ties, and a
    /// remaining tie breaks on the value bytes so the outcome is total.
    pub fn reconcile(a: Self, b: Self) -> Self {
        if a.timestamp != b.timestamp {
            return if a.timestamp > b.timestamp { a } else { b };
        }
        match (a.is_tombstone(), b.is_tombstone()) {
            (true, false) => a,
            (false, true) => b,
            _ => {
                if a.value >= b.value {
                    a
                } else {
                    b
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use crate::column::ColumnMetadata;
    use crate::expiration::MAX_DELETION_TIME;

    use super::{Cell, CellPath, NO_DELETION_TIME, NO_TTL};

    fn regular() -> Arc<ColumnMetadata> {
        ColumnMetadata::regular("ks", "tbl", "v")
    }

    fn complex() -> Arc<ColumnMetadata> {
        ColumnMetadata::complex("ks", "tbl", "m")
    }

    fn path() -> CellPath {
        CellPath::new(Bytes::from_static(b"elem"))
    }

    #[test]
    fn rejects_primary_key_column() {
        let pk = ColumnMetadata::partition_key("ks", "tbl", "pk");
        assert!(Cell::live(pk, 1, Bytes::from_static(b"x"), None).is_err());
    }

    #[test]
    fn path_presence_must_agree_with_complexity() {
        assert!(Cell::live(regular(), 1, Bytes::from_static(b"x"), Some(path())).is_err());
        assert!(Cell::live(complex(), 1, Bytes::from_static(b"x"), None).is_err());
        assert!(Cell::live(regular(), 1, Bytes::from_static(b"x"), None).is_ok());
        assert!(Cell::live(complex(), 1, Bytes::from_static(b"x"), Some(path())).is_ok());
    }

    #[test]
    fn live_cell_shape() {
        let cell = Cell::live(regular(), 10, Bytes::from_static(b"x"), None).unwrap();
        assert_eq!(cell.ttl(), NO_TTL);
        assert_eq!(cell.local_deletion_time(), NO_DELETION_TIME);
        assert!(cell.is_live(i32::MAX - 1));
        assert!(!cell.is_tombstone());
        assert!(!cell.is_expiring());
    }

    #[test]
    fn expiring_cell_shape() {
        let cell =
            Cell::expiring(regular(), 10, 60, 1_000, Bytes::from_static(b"x"), None).unwrap();
        assert_eq!(cell.ttl(), 60);
        assert_eq!(cell.local_deletion_time(), 1_060);
        assert!(cell.is_expiring());
        assert!(cell.is_live(1_059));
        assert!(!cell.is_live(1_060));
    }

    #[test]
    fn expiring_requires_ttl() {
        assert!(
            Cell::expiring(regular(), 10, NO_TTL, 1_000, Bytes::from_static(b"x"), None).is_err()
        );
    }

    #[test]
    fn expiring_deletion_time_saturates() {
        let cell = Cell::expiring(
            regular(),
            10,
            i32::MAX,
            i32::MAX - 5,
            Bytes::from_static(b"x"),
            None,
        )
        .unwrap();
        assert_eq!(cell.local_deletion_time(), MAX_DELETION_TIME);
    }

    #[test]
    fn tombstone_shape() {
        let cell = Cell::tombstone(regular(), 10, 777, None).unwrap();
        assert!(cell.value().is_empty());
        assert_eq!(cell.local_deletion_time(), 777);
        assert!(cell.is_tombstone());
        assert!(!cell.is_live(777));
    }

    #[test]
    fn with_updated_value_changes_only_value_and_is_idempotent() {
        let cell = Cell::expiring(regular(), 10, 60, 1_000, Bytes::from_static(b"x"), None)
            .unwrap();
        let updated = cell.with_updated_value(Bytes::from_static(b"y"));
        assert_eq!(updated.value(), &Bytes::from_static(b"y"));
        assert_eq!(updated.timestamp(), cell.timestamp());
        assert_eq!(updated.ttl(), cell.ttl());
        assert_eq!(updated.local_deletion_time(), cell.local_deletion_time());
        assert_eq!(updated.column(), cell.column());

        let again = updated.with_updated_value(Bytes::from_static(b"y"));
        assert_eq!(again, updated);
    }

    #[test]
    fn with_updated_timestamp_and_deletion_time() {
        let cell = Cell::live(regular(), 10, Bytes::from_static(b"x"), None).unwrap();
        let updated = cell.with_updated_timestamp_and_local_deletion_time(99, 1_234);
        assert_eq!(updated.timestamp(), 99);
        assert_eq!(updated.local_deletion_time(), 1_234);
        assert_eq!(updated.value(), cell.value());
    }

    #[test]
    fn with_skipped_value_keeps_metadata() {
        let cell = Cell::live(complex(), 10, Bytes::from_static(b"x"), Some(path())).unwrap();
        let skipped = cell.with_skipped_value();
        assert!(skipped.value().is_empty());
        assert_eq!(skipped.path(), cell.path());
        assert_eq!(skipped.timestamp(), cell.timestamp());
    }

    #[test]
    fn with_updated_column_revalidates() {
        let cell = Cell::live(regular(), 10, Bytes::from_static(b"x"), None).unwrap();
        assert!(cell.with_updated_column(complex()).is_err());
        let rebound = cell
            .with_updated_column(ColumnMetadata::regular("ks", "tbl", "w"))
            .unwrap();
        assert_eq!(rebound.column().name(), "w");
    }

    #[test]
    fn heap_size_excluding_data_ignores_payload() {
        let small = Cell::live(regular(), 1, Bytes::from_static(b"a"), None).unwrap();
        let large = small.with_updated_value(Bytes::from(vec![0u8; 4096]));
        assert!(large.unshared_heap_size() > small.unshared_heap_size());
        assert_eq!(
            large.unshared_heap_size_excluding_data(),
            small.unshared_heap_size_excluding_data()
        );
    }

    #[test]
    fn reconcile_prefers_newer_then_tombstone() {
        let old = Cell::live(regular(), 1, Bytes::from_static(b"a"), None).unwrap();
        let new = Cell::live(regular(), 2, Bytes::from_static(b"b"), None).unwrap();
        assert_eq!(Cell::reconcile(old.clone(), new.clone()), new);

        let live = Cell::live(regular(), 5, Bytes::from_static(b"a"), None).unwrap();
        let gone = Cell::tombstone(regular(), 5, 100, None).unwrap();
        assert_eq!(Cell::reconcile(live, gone.clone()), gone);
    }
}
