#![forbid(unsafe_code)]

mod ballots;
mod codec;
mod state;

pub use ballots::{Ballots, LatestBallots};
pub use state::{
    commit_column, promise_column, proposal_column, Commit, PaxosSnapshot, PaxosStore, TableRef,
    PAXOS_KEYSPACE, PAXOS_TABLE,
};
