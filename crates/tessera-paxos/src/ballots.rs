//! Most-recent-ballot reconciliation across independent evidence sources.
//!
//! Three sources can disagree about the latest Paxos round for a partition:
//! the in-memory snapshot cache, the durable region of the reserved ballot
//! table, and write buffers that have not flushed yet. Reconciliation merges
//! them by ballot precedence and cross-checks against the fully materialized
//! base table, for verification of linearizable conditional writes under
//! deterministic simulation. Diagnostics only; production read paths own
//! their own retry semantics.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use tessera_storage::TableStore;
use tessera_types::{Ballot, Clustering, PartitionKey, Result};

use crate::state::{
    commit_column, promise_column, proposal_column, Commit, PaxosSnapshot, PaxosStore, TableRef,
};

/// Most recent ballot timestamps known for one partition, per phase, plus
/// the independent base-table cross-check. Freshly constructed per
/// reconciliation call, never cached.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LatestBallots {
    pub promise: i64,
    pub accept: i64,
    pub commit: i64,
    pub persisted: i64,
}

impl LatestBallots {
    /// Most recent ballot seen anywhere.
    pub fn any(&self) -> i64 {
        self.promise.max(self.accept).max(self.commit).max(self.persisted)
    }

    /// Durable floor: the most recent committed-or-applied write.
    pub fn permanent(&self) -> i64 {
        self.commit.max(self.persisted)
    }

    /// Merge the cache and durable snapshots with the base-table
    /// cross-check. Pure: all source reads happen at the callers.
    ///
    /// An absent cache defers to the durable snapshot. An accepted proposal
    /// whose update is empty contributes zero. A commit contributes the
    /// greatest write timestamp of the cells it wrote.
    pub fn merge(
        cache: Option<&PaxosSnapshot>,
        persisted: &PaxosSnapshot,
        base_table: i64,
    ) -> Self {
        let promised = Ballot::latest(
            Some(persisted.promised),
            cache.map(|snapshot| snapshot.promised),
        );
        let accepted = Commit::latest(
            persisted.accepted.clone(),
            cache.and_then(|snapshot| snapshot.accepted.clone()),
        );
        let committed = Commit::latest(
            Some(persisted.committed.clone()),
            cache.map(|snapshot| snapshot.committed.clone()),
        )
        .unwrap_or_else(Commit::empty);

        Self {
            promise: promised.unix_micros() as i64,
            accept: match accepted {
                Some(accepted) if !accepted.is_empty() => accepted.latest_write_timestamp(),
                _ => 0,
            },
            commit: committed.latest_write_timestamp(),
            persisted: base_table,
        }
    }
}

impl fmt::Display for LatestBallots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{},{},{}]",
            self.promise, self.accept, self.commit, self.persisted
        )
    }
}

/// Reconciliation context for one base table on one node.
pub struct Ballots {
    paxos: Arc<PaxosStore>,
    base: Arc<TableStore>,
    table: TableRef,
}

impl Ballots {
    pub fn new(paxos: Arc<PaxosStore>, base: Arc<TableStore>, table: TableRef) -> Self {
        Self { paxos, base, table }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    /// Reconcile the most recent ballots known for `key`.
    ///
    /// `include_empty_proposals` is accepted for interface compatibility
    /// with the verification harness and does not alter the merge: empty
    /// proposals always contribute zero.
    pub fn read(
        &self,
        key: PartitionKey,
        now_in_sec: i32,
        include_empty_proposals: bool,
    ) -> Result<LatestBallots> {
        let cache = self.paxos.cached_if_present(key, self.table.id);
        let persisted = self.paxos.load_state(key, &self.table, now_in_sec)?;
        let base_table = self.latest_from_base_table(key);
        let merged = LatestBallots::merge(cache.as_ref(), &persisted, base_table);
        trace!(
            key = key.0,
            table = self.table.id.0,
            include_empty_proposals,
            ballots = %merged,
            "paxos.reconcile"
        );
        Ok(merged)
    }

    /// Per-field annotated trace of where the winning ballots live, for
    /// manual divergence analysis across replicas. Each field renders as
    /// `cache[*](persisted-if-different)`; `*` marks a non-zero value
    /// explained by an unflushed write.
    pub fn debug_trace(&self, key: PartitionKey, now_in_sec: i32) -> Result<String> {
        let state = self.paxos.cached_if_present(key, self.table.id);
        let persisted = self.paxos.load_state(key, &self.table, now_in_sec)?;
        let memtable = self.latest_from_paxos_memtables(key);
        let cache = state.unwrap_or_else(|| persisted.clone());
        let base_table = self.latest_from_base_table(key);
        let base_memtable = self.latest_from_base_memtables(key);

        Ok(format!(
            "{}, {}, {}, {}",
            debug_ballot(
                ballot_micros(cache.promised),
                memtable[0],
                ballot_micros(persisted.promised),
            ),
            debug_ballot(
                commit_micros(cache.accepted.as_ref()),
                memtable[1],
                commit_micros(persisted.accepted.as_ref()),
            ),
            debug_ballot(
                commit_micros(Some(&cache.committed)),
                memtable[2],
                commit_micros(Some(&persisted.committed)),
            ),
            debug_ballot(base_memtable, 0, base_table),
        ))
    }

    /// Per-phase maxima of the ballot cell timestamps still sitting in
    /// unflushed buffers of the reserved table. Cells with empty payloads
    /// contribute nothing.
    fn latest_from_paxos_memtables(&self, key: PartitionKey) -> [i64; 3] {
        let clustering = Clustering::from(self.table.id);
        let columns = [promise_column(), proposal_column(), commit_column()];
        let mut result = [0i64; 3];
        for memtable in self.paxos.store().unflushed_memtables() {
            let Some(partition) = memtable.partition(key) else {
                continue;
            };
            let Some(row) = partition.row(clustering) else {
                continue;
            };
            for (slot, column) in result.iter_mut().zip(columns) {
                if let Some(cell) = row.cell(column) {
                    if !cell.value().is_empty() {
                        *slot = (*slot).max(cell.timestamp());
                    }
                }
            }
        }
        result
    }

    /// Greatest write timestamp in the fully materialized base-table
    /// partition, via a scoped read released on every exit path. Zero when
    /// the partition is absent.
    fn latest_from_base_table(&self, key: PartitionKey) -> i64 {
        let guard = self.base.begin_read();
        self.base
            .read_partition(&guard, key)
            .map_or(0, |partition| partition.max_timestamp())
    }

    /// As `latest_from_base_table`, but over unflushed base-table buffers
    /// only. Trace annotation support.
    fn latest_from_base_memtables(&self, key: PartitionKey) -> i64 {
        let mut timestamp = 0;
        for memtable in self.base.unflushed_memtables() {
            if let Some(partition) = memtable.partition(key) {
                timestamp = timestamp.max(partition.max_timestamp());
            }
        }
        timestamp
    }
}

fn ballot_micros(ballot: Ballot) -> i64 {
    ballot.unix_micros() as i64
}

fn commit_micros(commit: Option<&Commit>) -> i64 {
    commit.map_or(0, |commit| commit.ballot.unix_micros() as i64)
}

fn debug_ballot(cache: i64, memtable: i64, persisted: i64) -> String {
    let mut out = debug_ballot_vs_memtable(cache, memtable);
    if cache != persisted {
        out.push('(');
        out.push_str(&debug_ballot_vs_memtable(persisted, memtable));
        out.push(')');
    }
    out
}

fn debug_ballot_vs_memtable(value: i64, memtable: i64) -> String {
    if memtable == value && memtable != 0 {
        format!("{value}*")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use tessera_types::{Ballot, NodeId};

    use crate::state::{Commit, PaxosSnapshot};

    use super::{debug_ballot, LatestBallots};

    #[test]
    fn any_and_permanent_are_field_maxima() {
        let ballots = LatestBallots {
            promise: 100,
            accept: 0,
            commit: 50,
            persisted: 70,
        };
        assert_eq!(ballots.any(), 100);
        assert_eq!(ballots.permanent(), 70);
        assert_eq!(ballots.to_string(), "[100,0,50,70]");
    }

    #[test]
    fn merge_prefers_more_recent_cache_promise() {
        let mut cache = PaxosSnapshot::empty();
        cache.promised = Ballot::new(200, 0, NodeId(2));
        let mut persisted = PaxosSnapshot::empty();
        persisted.promised = Ballot::new(100, 0, NodeId(1));

        let merged = LatestBallots::merge(Some(&cache), &persisted, 0);
        assert_eq!(merged.promise, 200);
    }

    #[test]
    fn merge_without_cache_defers_to_persisted() {
        let mut persisted = PaxosSnapshot::empty();
        persisted.promised = Ballot::new(100, 0, NodeId(1));
        let merged = LatestBallots::merge(None, &persisted, 40);
        assert_eq!(merged.promise, 100);
        assert_eq!(merged.persisted, 40);
    }

    #[test]
    fn empty_accepted_proposal_contributes_zero() {
        let mut persisted = PaxosSnapshot::empty();
        persisted.accepted = Some(Commit {
            ballot: Ballot::new(150, 0, NodeId(1)),
            update: Default::default(),
        });
        let merged = LatestBallots::merge(None, &persisted, 0);
        assert_eq!(merged.accept, 0);
    }

    #[test]
    fn debug_ballot_annotation_grammar() {
        // Agreement between cache and persisted: no parenthesized alternate.
        assert_eq!(debug_ballot(50, 0, 50), "50");
        // Memtable explains the resolved value.
        assert_eq!(debug_ballot(300, 300, 50), "300*(50)");
        // Zero is never starred.
        assert_eq!(debug_ballot(0, 0, 0), "0");
        // Persisted can be the starred side too.
        assert_eq!(debug_ballot(10, 20, 20), "10(20*)");
    }
}
