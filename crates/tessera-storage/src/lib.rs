#![forbid(unsafe_code)]

mod cell;
mod column;
mod expiration;
mod memtable;
mod partition;
mod table;

pub use cell::{Cell, CellPath, NO_DELETION_TIME, NO_TTL};
pub use column::{ColumnKind, ColumnMetadata};
pub use expiration::{compute_local_expiration_time, MAX_DELETION_TIME};
pub use memtable::Memtable;
pub use partition::{Partition, Row};
pub use table::{ReadGuard, TableStore};
