use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::trace;

use tessera_types::{Clustering, PartitionKey};

use crate::cell::Cell;
use crate::partition::Partition;

/// An unflushed write buffer. Writes land in the table's active memtable;
/// sealed memtables stay readable until a flush materializes them into the
/// durable region.
#[derive(Default)]
pub struct Memtable {
    partitions: RwLock<BTreeMap<PartitionKey, Partition>>,
}

impl Memtable {
    pub fn apply(&self, key: PartitionKey, clustering: Clustering, cell: Cell) {
        trace!(
            key = key.0,
            clustering = clustering.0,
            column = %cell.column(),
            timestamp = cell.timestamp(),
            "memtable.apply"
        );
        self.partitions
            .write()
            .entry(key)
            .or_default()
            .apply(clustering, cell);
    }

    /// Materialized snapshot of one partition, if the buffer holds it.
    pub fn partition(&self, key: PartitionKey) -> Option<Partition> {
        self.partitions.read().get(&key).cloned()
    }

    /// Materialized snapshot of every partition, for flushing.
    pub fn partitions_snapshot(&self) -> Vec<(PartitionKey, Partition)> {
        self.partitions
            .read()
            .iter()
            .map(|(key, partition)| (*key, partition.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.read().is_empty()
    }
}
