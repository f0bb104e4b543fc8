//! Persisted consensus bookkeeping.
//!
//! Ballot state for a partition is stored as ordinary cells in a reserved
//! table, one row per target table, with three fixed columns: the last
//! promised ballot, the last accepted proposal, and the last committed
//! update. The in-memory cache in front of it holds the same snapshot shape.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{debug, trace};

use tessera_storage::{Cell, ColumnMetadata, Partition, TableStore};
use tessera_types::{Ballot, Clustering, PartitionKey, Result, TableId};

use crate::codec;

pub const PAXOS_KEYSPACE: &str = "system";
pub const PAXOS_TABLE: &str = "paxos";

/// Last promised (phase-1) ballot column.
pub fn promise_column() -> &'static Arc<ColumnMetadata> {
    static COLUMN: OnceLock<Arc<ColumnMetadata>> = OnceLock::new();
    COLUMN.get_or_init(|| ColumnMetadata::regular(PAXOS_KEYSPACE, PAXOS_TABLE, "promise"))
}

/// Last accepted (phase-2) proposal column.
pub fn proposal_column() -> &'static Arc<ColumnMetadata> {
    static COLUMN: OnceLock<Arc<ColumnMetadata>> = OnceLock::new();
    COLUMN.get_or_init(|| ColumnMetadata::regular(PAXOS_KEYSPACE, PAXOS_TABLE, "proposal"))
}

/// Last committed ballot column.
pub fn commit_column() -> &'static Arc<ColumnMetadata> {
    static COLUMN: OnceLock<Arc<ColumnMetadata>> = OnceLock::new();
    COLUMN.get_or_init(|| ColumnMetadata::regular(PAXOS_KEYSPACE, PAXOS_TABLE, "commit"))
}

/// Identity of a target table as seen by the consensus layer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableRef {
    pub id: TableId,
    pub keyspace: String,
    pub name: String,
}

impl TableRef {
    pub fn new(id: TableId, keyspace: &str, name: &str) -> Self {
        Self {
            id,
            keyspace: keyspace.to_owned(),
            name: name.to_owned(),
        }
    }
}

/// An accepted or committed value: the ballot it was agreed under, plus the
/// cells it writes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Commit {
    pub ballot: Ballot,
    pub update: Partition,
}

impl Commit {
    pub fn empty() -> Self {
        Self {
            ballot: Ballot::none(),
            update: Partition::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_empty()
    }

    /// Greatest write timestamp among the cells this commit writes; the
    /// commit's effective time is the time of the cells it wrote.
    pub fn latest_write_timestamp(&self) -> i64 {
        self.update.max_timestamp()
    }

    /// The more recent of two commits by ballot precedence; either side may
    /// be absent.
    pub fn latest(a: Option<Commit>, b: Option<Commit>) -> Option<Commit> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if a.ballot >= b.ballot { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

/// Point-in-time view of the consensus state for one (partition, table).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PaxosSnapshot {
    pub promised: Ballot,
    pub accepted: Option<Commit>,
    pub committed: Commit,
}

impl PaxosSnapshot {
    pub fn empty() -> Self {
        Self {
            promised: Ballot::none(),
            accepted: None,
            committed: Commit::empty(),
        }
    }
}

/// Local consensus persistence: the reserved ballot table plus the cache in
/// front of it.
pub struct PaxosStore {
    store: Arc<TableStore>,
    cache: Mutex<HashMap<(PartitionKey, TableId), PaxosSnapshot>>,
}

impl Default for PaxosStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PaxosStore {
    pub fn new() -> Self {
        Self {
            store: Arc::new(TableStore::new(PAXOS_KEYSPACE, PAXOS_TABLE)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The reserved table's storage, for flush control and memtable scans.
    pub fn store(&self) -> &Arc<TableStore> {
        &self.store
    }

    /// Record a phase-1 promise: persist the ballot as the promise cell and
    /// advance the cached snapshot.
    pub fn promise(&self, key: PartitionKey, table: &TableRef, ballot: Ballot) -> Result<()> {
        let cell = Cell::live(
            Arc::clone(promise_column()),
            ballot.unix_micros() as i64,
            codec::encode_ballot(ballot)?,
            None,
        )?;
        self.store.apply(key, Clustering::from(table.id), cell);
        let mut cache = self.cache.lock();
        let snapshot = cache
            .entry((key, table.id))
            .or_insert_with(PaxosSnapshot::empty);
        snapshot.promised = snapshot.promised.max(ballot);
        trace!(key = key.0, table = table.id.0, ballot = %ballot, "paxos.promise");
        Ok(())
    }

    /// Record a phase-2 acceptance: persist ballot and update as the
    /// proposal cell and advance the cached snapshot.
    pub fn accept(&self, key: PartitionKey, table: &TableRef, proposal: Commit) -> Result<()> {
        let cell = Cell::live(
            Arc::clone(proposal_column()),
            proposal.ballot.unix_micros() as i64,
            codec::encode_commit(&proposal)?,
            None,
        )?;
        self.store.apply(key, Clustering::from(table.id), cell);
        let mut cache = self.cache.lock();
        let snapshot = cache
            .entry((key, table.id))
            .or_insert_with(PaxosSnapshot::empty);
        trace!(key = key.0, table = table.id.0, ballot = %proposal.ballot, "paxos.accept");
        snapshot.accepted = Commit::latest(snapshot.accepted.take(), Some(proposal));
        Ok(())
    }

    /// Record a commit: persist it as the commit cell, apply the committed
    /// cells to the base table, and advance the cached snapshot.
    pub fn commit(
        &self,
        key: PartitionKey,
        table: &TableRef,
        committed: Commit,
        base: &TableStore,
    ) -> Result<()> {
        let cell = Cell::live(
            Arc::clone(commit_column()),
            committed.ballot.unix_micros() as i64,
            codec::encode_commit(&committed)?,
            None,
        )?;
        self.store.apply(key, Clustering::from(table.id), cell);
        for (clustering, row) in committed.update.rows() {
            for cell in row.cells() {
                base.apply(key, *clustering, cell.clone());
            }
        }
        let mut cache = self.cache.lock();
        let snapshot = cache
            .entry((key, table.id))
            .or_insert_with(PaxosSnapshot::empty);
        debug!(key = key.0, table = table.id.0, ballot = %committed.ballot, "paxos.commit");
        snapshot.committed = Commit::latest(Some(snapshot.committed.clone()), Some(committed))
            .unwrap_or_else(Commit::empty);
        Ok(())
    }

    /// Cache snapshot, if one exists. Absence is normal.
    pub fn cached_if_present(&self, key: PartitionKey, table: TableId) -> Option<PaxosSnapshot> {
        self.cache.lock().get(&(key, table)).cloned()
    }

    /// Drop the cached snapshot for one (partition, table), as happens under
    /// cache pressure or after a restart. Persisted state is unaffected.
    pub fn evict(&self, key: PartitionKey, table: TableId) {
        self.cache.lock().remove(&(key, table));
    }

    /// Force-load the persisted snapshot from durable storage, bypassing
    /// both the cache and any unflushed buffers, so it stays an independent
    /// evidence source. Always yields a snapshot; a never-flushed partition
    /// loads as empty. Cells that have expired by `now_in_sec` contribute
    /// nothing.
    pub fn load_state(
        &self,
        key: PartitionKey,
        table: &TableRef,
        now_in_sec: i32,
    ) -> Result<PaxosSnapshot> {
        let guard = self.store.begin_read();
        let partition = self.store.durable_partition(&guard, key);
        let row = partition
            .as_ref()
            .and_then(|p| p.row(Clustering::from(table.id)));

        let mut snapshot = PaxosSnapshot::empty();
        if let Some(row) = row {
            if let Some(cell) = live_cell(row.cell(promise_column()), now_in_sec) {
                snapshot.promised = codec::decode_ballot(cell.value())?;
            }
            if let Some(cell) = live_cell(row.cell(proposal_column()), now_in_sec) {
                snapshot.accepted =
                    Some(codec::decode_commit(&table.keyspace, &table.name, cell.value())?);
            }
            if let Some(cell) = live_cell(row.cell(commit_column()), now_in_sec) {
                snapshot.committed =
                    codec::decode_commit(&table.keyspace, &table.name, cell.value())?;
            }
        }
        trace!(
            key = key.0,
            table = table.id.0,
            promised = %snapshot.promised,
            "paxos.load_state"
        );
        Ok(snapshot)
    }
}

fn live_cell(cell: Option<&Cell>, now_in_sec: i32) -> Option<&Cell> {
    cell.filter(|c| !c.value().is_empty() && c.is_live(now_in_sec))
}
