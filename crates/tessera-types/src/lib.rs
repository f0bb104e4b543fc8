#![forbid(unsafe_code)]

use std::fmt;

/// Identity of a user table, as stored in the reserved ballot table's
/// clustering position.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableId(pub u32);

/// Identity of a simulated node.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct NodeId(pub u16);

/// Decorated partition key. Byte-level key typing and partitioner tokens are
/// external collaborators; the storage core only needs an ordered identity.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PartitionKey(pub u64);

/// Clustering position of a row within a partition.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Clustering(pub u64);

#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    #[error("invalid cell: {0}")]
    InvalidCell(String),
    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, TesseraError>;

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TableId> for Clustering {
    fn from(value: TableId) -> Self {
        Clustering(value.0 as u64)
    }
}

pub mod ballot {
    //! Time-ordered ballot identifiers establishing proposal precedence.

    use core::convert::TryInto;

    use super::{NodeId, Result, TesseraError};

    pub const BALLOT_ENCODED_LEN: usize = 16;

    /// A ballot identifier. Precedence is a total order: the embedded
    /// timestamp decides first, then the proposal sequence, then the
    /// proposing node, so comparisons are deterministic across replicas.
    ///
    /// Field order matters: the derived `Ord` is lexicographic.
    #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
    pub struct Ballot {
        micros: u64,
        seq: u32,
        node: NodeId,
    }

    impl Ballot {
        pub fn new(micros: u64, seq: u32, node: NodeId) -> Self {
            Self { micros, seq, node }
        }

        /// The zero ballot, lower than every real ballot.
        pub const fn none() -> Self {
            Self {
                micros: 0,
                seq: 0,
                node: NodeId(0),
            }
        }

        pub fn is_none(&self) -> bool {
            *self == Self::none()
        }

        /// Embedded logical timestamp in microseconds.
        pub fn unix_micros(&self) -> u64 {
            self.micros
        }

        pub fn seq(&self) -> u32 {
            self.seq
        }

        pub fn node(&self) -> NodeId {
            self.node
        }

        /// The more recent of two ballots; either side may be absent.
        pub fn latest(a: Option<Ballot>, b: Option<Ballot>) -> Ballot {
            match (a, b) {
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => Ballot::none(),
            }
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < BALLOT_ENCODED_LEN {
                return Err(TesseraError::Invalid("ballot buffer too small"));
            }
            dst[..8].copy_from_slice(&self.micros.to_be_bytes());
            dst[8..12].copy_from_slice(&self.seq.to_be_bytes());
            dst[12..14].copy_from_slice(&self.node.0.to_be_bytes());
            dst[14..16].fill(0);
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < BALLOT_ENCODED_LEN {
                return Err(TesseraError::Corruption("ballot encoding truncated"));
            }
            if src[14..16] != [0; 2] {
                return Err(TesseraError::Corruption("ballot reserved bytes not zero"));
            }
            let micros = u64::from_be_bytes(
                src[..8]
                    .try_into()
                    .map_err(|_| TesseraError::Corruption("ballot micros truncated"))?,
            );
            let seq = u32::from_be_bytes(
                src[8..12]
                    .try_into()
                    .map_err(|_| TesseraError::Corruption("ballot seq truncated"))?,
            );
            let node = u16::from_be_bytes(
                src[12..14]
                    .try_into()
                    .map_err(|_| TesseraError::Corruption("ballot node truncated"))?,
            );
            Ok(Self {
                micros,
                seq,
                node: NodeId(node),
            })
        }
    }

    impl core::fmt::Display for Ballot {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "{}:{}@{}", self.micros, self.seq, self.node.0)
        }
    }
}

pub use ballot::{Ballot, BALLOT_ENCODED_LEN};
