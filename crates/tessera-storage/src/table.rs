use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::{debug, trace};

use tessera_types::{Clustering, PartitionKey};

use crate::cell::Cell;
use crate::memtable::Memtable;
use crate::partition::Partition;

/// More than one unflushed buffer exists only transiently, while a flush is
/// in progress.
type MemtableList = SmallVec<[Arc<Memtable>; 2]>;

struct TableInner {
    active: Arc<Memtable>,
    sealed: MemtableList,
    durable: std::collections::BTreeMap<PartitionKey, Partition>,
}

/// One table's local storage: an active write buffer, zero or more sealed
/// buffers awaiting flush, and the durable materialized region.
pub struct TableStore {
    keyspace: String,
    name: String,
    inner: RwLock<TableInner>,
    active_readers: Arc<AtomicUsize>,
}

/// Scoped handle for one read. Reads take a `&ReadGuard` so the resource is
/// provably held for their duration and released on every exit path,
/// including failure, when the guard drops.
pub struct ReadGuard {
    active_readers: Arc<AtomicUsize>,
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        self.active_readers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl TableStore {
    pub fn new(keyspace: &str, name: &str) -> Self {
        Self {
            keyspace: keyspace.to_owned(),
            name: name.to_owned(),
            inner: RwLock::new(TableInner {
                active: Arc::new(Memtable::default()),
                sealed: MemtableList::new(),
                durable: std::collections::BTreeMap::new(),
            }),
            active_readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply one cell write to the active memtable.
    pub fn apply(&self, key: PartitionKey, clustering: Clustering, cell: Cell) {
        let active = Arc::clone(&self.inner.read().active);
        active.apply(key, clustering, cell);
    }

    /// Seal the active memtable. It stays readable as an unflushed buffer
    /// until `flush` materializes it.
    pub fn seal_active(&self) {
        let mut inner = self.inner.write();
        if inner.active.is_empty() {
            return;
        }
        let sealed = std::mem::replace(&mut inner.active, Arc::new(Memtable::default()));
        inner.sealed.push(sealed);
        debug!(
            keyspace = %self.keyspace,
            table = %self.name,
            sealed = inner.sealed.len(),
            "table.seal"
        );
    }

    /// Materialize every sealed buffer into the durable region.
    pub fn flush(&self) {
        let mut inner = self.inner.write();
        let sealed = std::mem::take(&mut inner.sealed);
        for memtable in &sealed {
            for (key, partition) in memtable.partitions_snapshot() {
                inner
                    .durable
                    .entry(key)
                    .or_default()
                    .merge_from(&partition);
            }
        }
        debug!(
            keyspace = %self.keyspace,
            table = %self.name,
            flushed = sealed.len(),
            "table.flush"
        );
    }

    /// Snapshot of every unflushed buffer that may hold writes: the active
    /// memtable plus any sealed ones.
    pub fn unflushed_memtables(&self) -> MemtableList {
        let inner = self.inner.read();
        let mut list = MemtableList::new();
        list.push(Arc::clone(&inner.active));
        list.extend(inner.sealed.iter().cloned());
        list
    }

    /// Open a scoped read. The returned guard must outlive every read made
    /// under it.
    pub fn begin_read(&self) -> ReadGuard {
        self.active_readers.fetch_add(1, Ordering::AcqRel);
        ReadGuard {
            active_readers: Arc::clone(&self.active_readers),
        }
    }

    /// Number of read guards currently outstanding.
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::Acquire)
    }

    /// Single materializing full-partition read: the durable region merged
    /// with every unflushed buffer. `None` when the partition is absent
    /// everywhere.
    pub fn read_partition(&self, _guard: &ReadGuard, key: PartitionKey) -> Option<Partition> {
        let (durable, memtables) = {
            let inner = self.inner.read();
            let mut list = MemtableList::new();
            list.push(Arc::clone(&inner.active));
            list.extend(inner.sealed.iter().cloned());
            (inner.durable.get(&key).cloned(), list)
        };
        let mut merged = durable;
        for memtable in memtables {
            if let Some(partition) = memtable.partition(key) {
                match merged.as_mut() {
                    Some(m) => m.merge_from(&partition),
                    None => merged = Some(partition),
                }
            }
        }
        trace!(
            keyspace = %self.keyspace,
            table = %self.name,
            key = key.0,
            present = merged.is_some(),
            "table.read_partition"
        );
        merged
    }

    /// The durable region's view of one partition, ignoring unflushed
    /// buffers.
    pub fn durable_partition(&self, _guard: &ReadGuard, key: PartitionKey) -> Option<Partition> {
        self.inner.read().durable.get(&key).cloned()
    }
}
