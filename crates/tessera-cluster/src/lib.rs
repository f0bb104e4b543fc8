#![forbid(unsafe_code)]

//! Deterministic simulated cluster for ballot reconciliation.
//!
//! Each simulated node owns its stores and runs a worker thread consuming
//! request messages. Reads of a node's local state execute on that node's
//! own thread; observing a foreign node's state through shared memory would
//! be incorrect, so routing is message passing even inside one process.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, trace};

use tessera_paxos::{Ballots, Commit, LatestBallots, PaxosStore, TableRef};
use tessera_storage::TableStore;
use tessera_types::{Ballot, NodeId, PartitionKey, Result, TableId, TesseraError};

/// Cluster shape. One base table per node is enough for reconciliation
/// verification; schema management is out of scope.
#[derive(Clone, Debug)]
pub struct ClusterOptions {
    pub nodes: u16,
    pub keyspace: String,
    pub table: String,
    pub table_id: TableId,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            nodes: 3,
            keyspace: "ks".to_owned(),
            table: "tbl".to_owned(),
            table_id: TableId(1),
        }
    }
}

enum Request {
    Promise {
        key: PartitionKey,
        ballot: Ballot,
        reply: mpsc::Sender<Result<()>>,
    },
    Accept {
        key: PartitionKey,
        proposal: Commit,
        reply: mpsc::Sender<Result<()>>,
    },
    Commit {
        key: PartitionKey,
        committed: Commit,
        reply: mpsc::Sender<Result<()>>,
    },
    Seal {
        reply: mpsc::Sender<()>,
    },
    Flush {
        reply: mpsc::Sender<()>,
    },
    ReadBallots {
        key: PartitionKey,
        now_in_sec: i32,
        include_empty_proposals: bool,
        reply: mpsc::Sender<Result<LatestBallots>>,
    },
    DebugTrace {
        key: PartitionKey,
        now_in_sec: i32,
        reply: mpsc::Sender<Result<String>>,
    },
    Shutdown,
}

struct NodeState {
    id: NodeId,
    paxos: Arc<PaxosStore>,
    base: Arc<TableStore>,
    ballots: Ballots,
    table: TableRef,
}

impl NodeState {
    fn new(id: NodeId, options: &ClusterOptions) -> Self {
        let paxos = Arc::new(PaxosStore::new());
        let base = Arc::new(TableStore::new(&options.keyspace, &options.table));
        let table = TableRef::new(options.table_id, &options.keyspace, &options.table);
        let ballots = Ballots::new(
            Arc::clone(&paxos),
            Arc::clone(&base),
            table.clone(),
        );
        Self {
            id,
            paxos,
            base,
            ballots,
            table,
        }
    }

    fn run(self, requests: mpsc::Receiver<Request>) {
        for request in requests {
            match request {
                Request::Promise { key, ballot, reply } => {
                    let _ = reply.send(self.paxos.promise(key, &self.table, ballot));
                }
                Request::Accept { key, proposal, reply } => {
                    let _ = reply.send(self.paxos.accept(key, &self.table, proposal));
                }
                Request::Commit {
                    key,
                    committed,
                    reply,
                } => {
                    let _ =
                        reply.send(self.paxos.commit(key, &self.table, committed, &self.base));
                }
                Request::Seal { reply } => {
                    self.paxos.store().seal_active();
                    self.base.seal_active();
                    let _ = reply.send(());
                }
                Request::Flush { reply } => {
                    self.paxos.store().flush();
                    self.base.flush();
                    let _ = reply.send(());
                }
                Request::ReadBallots {
                    key,
                    now_in_sec,
                    include_empty_proposals,
                    reply,
                } => {
                    trace!(node = self.id.0, key = key.0, "cluster.node.read_ballots");
                    let _ =
                        reply.send(self.ballots.read(key, now_in_sec, include_empty_proposals));
                }
                Request::DebugTrace {
                    key,
                    now_in_sec,
                    reply,
                } => {
                    let _ = reply.send(self.ballots.debug_trace(key, now_in_sec));
                }
                Request::Shutdown => break,
            }
        }
        debug!(node = self.id.0, "cluster.node.stopped");
    }
}

struct NodeHandle {
    id: NodeId,
    sender: mpsc::Sender<Request>,
    thread: Option<thread::JoinHandle<()>>,
}

/// A set of simulated nodes, each with its own execution context.
pub struct Cluster {
    nodes: Vec<NodeHandle>,
}

impl Cluster {
    pub fn new(options: ClusterOptions) -> Result<Self> {
        let mut nodes = Vec::with_capacity(options.nodes as usize);
        for index in 0..options.nodes {
            let id = NodeId(index);
            let state = NodeState::new(id, &options);
            let (sender, receiver) = mpsc::channel();
            let thread = thread::Builder::new()
                .name(format!("sim-node-{index}"))
                .spawn(move || state.run(receiver))?;
            nodes.push(NodeHandle {
                id,
                sender,
                thread: Some(thread),
            });
        }
        debug!(nodes = nodes.len(), "cluster.started");
        Ok(Self { nodes })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    fn node(&self, id: NodeId) -> Result<&NodeHandle> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(TesseraError::Invalid("no such simulated node"))
    }

    fn dispatch(&self, id: NodeId, request: Request) -> Result<()> {
        self.node(id)?
            .sender
            .send(request)
            .map_err(|_| TesseraError::Invalid("simulated node stopped"))
    }

    pub fn promise(&self, node: NodeId, key: PartitionKey, ballot: Ballot) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.dispatch(node, Request::Promise { key, ballot, reply })?;
        recv(&response)?
    }

    pub fn accept(&self, node: NodeId, key: PartitionKey, proposal: Commit) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.dispatch(node, Request::Accept { key, proposal, reply })?;
        recv(&response)?
    }

    pub fn commit(&self, node: NodeId, key: PartitionKey, committed: Commit) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.dispatch(
            node,
            Request::Commit {
                key,
                committed,
                reply,
            },
        )?;
        recv(&response)?
    }

    /// Seal both stores' active memtables on one node.
    pub fn seal(&self, node: NodeId) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.dispatch(node, Request::Seal { reply })?;
        recv(&response)
    }

    /// Flush sealed memtables into the durable region on one node.
    pub fn flush(&self, node: NodeId) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.dispatch(node, Request::Flush { reply })?;
        recv(&response)
    }

    pub fn debug_trace(&self, node: NodeId, key: PartitionKey, now_in_sec: i32) -> Result<String> {
        let (reply, response) = mpsc::channel();
        self.dispatch(
            node,
            Request::DebugTrace {
                key,
                now_in_sec,
                reply,
            },
        )?;
        recv(&response)?
    }

    /// Reconcile ballots for every (key, replica) pair. Requests for all
    /// pairs are dispatched up front, so reads proceed in parallel across
    /// nodes, then replies are collected grouped per key in replica order.
    /// Each read executes on the owning node's own thread.
    pub fn read_ballots(
        &self,
        keys: &[PartitionKey],
        replicas_for_keys: &[Vec<NodeId>],
        now_in_sec: i32,
        include_empty_proposals: bool,
    ) -> Result<Vec<Vec<LatestBallots>>> {
        if keys.len() != replicas_for_keys.len() {
            return Err(TesseraError::Invalid(
                "replica list does not match key list",
            ));
        }
        trace!(
            keys = keys.len(),
            include_empty_proposals,
            "cluster.read_ballots"
        );
        let mut pending = Vec::with_capacity(keys.len());
        for (key, replicas) in keys.iter().zip(replicas_for_keys) {
            let mut responses = Vec::with_capacity(replicas.len());
            for replica in replicas {
                let (reply, response) = mpsc::channel();
                self.dispatch(
                    *replica,
                    Request::ReadBallots {
                        key: *key,
                        now_in_sec,
                        include_empty_proposals,
                        reply,
                    },
                )?;
                responses.push(response);
            }
            pending.push(responses);
        }

        let mut result = Vec::with_capacity(pending.len());
        for responses in pending {
            let mut per_key = Vec::with_capacity(responses.len());
            for response in responses {
                per_key.push(recv(&response)??);
            }
            result.push(per_key);
        }
        Ok(result)
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        for node in &self.nodes {
            let _ = node.sender.send(Request::Shutdown);
        }
        for node in &mut self.nodes {
            if let Some(thread) = node.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

fn recv<T>(response: &mpsc::Receiver<T>) -> Result<T> {
    response
        .recv()
        .map_err(|_| TesseraError::Invalid("simulated node stopped"))
}
