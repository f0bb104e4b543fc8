use std::sync::Arc;

use bytes::Bytes;

use tessera_paxos::{Ballots, Commit, PaxosStore, TableRef};
use tessera_storage::{Cell, ColumnMetadata, Partition, TableStore};
use tessera_types::{Ballot, Clustering, NodeId, PartitionKey, TableId};

const KEY: PartitionKey = PartitionKey(7);

struct Fixture {
    paxos: Arc<PaxosStore>,
    base: Arc<TableStore>,
    ballots: Ballots,
    table: TableRef,
}

fn fixture() -> Fixture {
    let paxos = Arc::new(PaxosStore::new());
    let base = Arc::new(TableStore::new("ks", "tbl"));
    let table = TableRef::new(TableId(1), "ks", "tbl");
    let ballots = Ballots::new(Arc::clone(&paxos), Arc::clone(&base), table.clone());
    Fixture {
        paxos,
        base,
        ballots,
        table,
    }
}

fn ballot(micros: u64) -> Ballot {
    Ballot::new(micros, 0, NodeId(1))
}

fn commit_writing(timestamp: i64) -> Commit {
    let mut update = Partition::default();
    update.apply(
        Clustering(0),
        Cell::live(
            ColumnMetadata::regular("ks", "tbl", "v"),
            timestamp,
            Bytes::from_static(b"x"),
            None,
        )
        .unwrap(),
    );
    Commit {
        ballot: ballot(timestamp as u64),
        update,
    }
}

fn empty_proposal(micros: u64) -> Commit {
    Commit {
        ballot: ballot(micros),
        update: Partition::default(),
    }
}

fn flush_paxos(fx: &Fixture) {
    fx.paxos.store().seal_active();
    fx.paxos.store().flush();
}

#[test]
fn cache_absent_defers_to_persisted() {
    // Persisted promise=100, accepted proposal empty, commit=50; cache
    // evicted; base table holds the committed write.
    let fx = fixture();
    fx.paxos.promise(KEY, &fx.table, ballot(100)).unwrap();
    fx.paxos.accept(KEY, &fx.table, empty_proposal(90)).unwrap();
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(50), &fx.base)
        .unwrap();
    flush_paxos(&fx);
    fx.paxos.evict(KEY, fx.table.id);

    let result = fx.ballots.read(KEY, 0, false).unwrap();
    assert_eq!(result.promise, 100);
    assert_eq!(result.accept, 0);
    assert_eq!(result.commit, 50);
    assert_eq!(result.persisted, 50);
    assert_eq!(result.any(), 100);
    assert_eq!(result.permanent(), 50);
}

#[test]
fn more_recent_cache_promise_wins() {
    let fx = fixture();
    fx.paxos.promise(KEY, &fx.table, ballot(100)).unwrap();
    flush_paxos(&fx);

    // The newer promise has reached the cache and an unflushed buffer, but
    // not yet durable storage.
    fx.paxos.promise(KEY, &fx.table, ballot(200)).unwrap();

    let persisted = fx.paxos.load_state(KEY, &fx.table, 0).unwrap();
    assert_eq!(persisted.promised, ballot(100));

    let result = fx.ballots.read(KEY, 0, false).unwrap();
    assert_eq!(result.promise, 200);
}

#[test]
fn trace_marks_unflushed_commit_and_shows_divergent_persisted() {
    let fx = fixture();
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(50), &fx.base)
        .unwrap();
    flush_paxos(&fx);
    fx.base.seal_active();
    fx.base.flush();

    // A newer commit sits only in cache and unflushed buffers.
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(300), &fx.base)
        .unwrap();

    let trace = fx.ballots.debug_trace(KEY, 0).unwrap();
    assert_eq!(trace, "0, 0, 300*(50), 300");
}

#[test]
fn trace_without_divergence_has_no_parenthesized_alternate() {
    let fx = fixture();
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(50), &fx.base)
        .unwrap();
    flush_paxos(&fx);
    fx.base.seal_active();
    fx.base.flush();
    fx.paxos.evict(KEY, fx.table.id);

    // Commit agrees between cache fallback and durable state, so no
    // alternate appears; the base field still records that the durable
    // region, not a memtable, explains the value.
    let trace = fx.ballots.debug_trace(KEY, 0).unwrap();
    assert_eq!(trace, "0, 0, 50, 0(50)");
}

#[test]
fn reconciliation_is_deterministic() {
    let fx = fixture();
    fx.paxos.promise(KEY, &fx.table, ballot(100)).unwrap();
    fx.paxos
        .accept(KEY, &fx.table, commit_writing(80))
        .unwrap();
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(60), &fx.base)
        .unwrap();
    flush_paxos(&fx);

    let first = fx.ballots.read(KEY, 0, false).unwrap();
    for _ in 0..10 {
        assert_eq!(fx.ballots.read(KEY, 0, false).unwrap(), first);
    }
    // The flag is threaded but inert.
    assert_eq!(fx.ballots.read(KEY, 0, true).unwrap(), first);
}

#[test]
fn permanent_is_stable_across_flush_states() {
    let fx = fixture();
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(300), &fx.base)
        .unwrap();

    let unflushed = fx.ballots.read(KEY, 0, false).unwrap();
    assert_eq!(unflushed.permanent(), 300);

    fx.paxos.store().seal_active();
    let sealed = fx.ballots.read(KEY, 0, false).unwrap();
    assert_eq!(sealed.permanent(), 300);

    fx.paxos.store().flush();
    fx.base.seal_active();
    fx.base.flush();
    let flushed = fx.ballots.read(KEY, 0, false).unwrap();
    assert_eq!(flushed.permanent(), 300);
}

#[test]
fn read_releases_all_scoped_resources() {
    let fx = fixture();
    fx.paxos
        .commit(KEY, &fx.table, commit_writing(50), &fx.base)
        .unwrap();

    let _ = fx.ballots.read(KEY, 0, false).unwrap();
    let _ = fx.ballots.read(PartitionKey(999), 0, false).unwrap();
    let _ = fx.ballots.debug_trace(KEY, 0).unwrap();
    assert_eq!(fx.base.active_readers(), 0);
    assert_eq!(fx.paxos.store().active_readers(), 0);
}

#[test]
fn absent_partition_resolves_to_zeroes() {
    let fx = fixture();
    let result = fx.ballots.read(PartitionKey(404), 0, false).unwrap();
    assert_eq!(
        result,
        tessera_paxos::LatestBallots {
            promise: 0,
            accept: 0,
            commit: 0,
            persisted: 0
        }
    );
    assert_eq!(result.any(), 0);
}
