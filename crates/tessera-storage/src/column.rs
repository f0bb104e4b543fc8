use std::fmt;
use std::sync::Arc;

/// Position a column occupies within its table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Regular,
}

/// Identity of a column. Full schema machinery (value types, comparators)
/// lives outside this core; cells only need the identity, whether the column
/// participates in the primary key, and whether it is complex.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnMetadata {
    keyspace: String,
    table: String,
    name: String,
    kind: ColumnKind,
    complex: bool,
}

impl ColumnMetadata {
    pub fn regular(keyspace: &str, table: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            keyspace: keyspace.to_owned(),
            table: table.to_owned(),
            name: name.to_owned(),
            kind: ColumnKind::Regular,
            complex: false,
        })
    }

    /// A regular column holding collection/UDT elements, addressed by cell
    /// path.
    pub fn complex(keyspace: &str, table: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            keyspace: keyspace.to_owned(),
            table: table.to_owned(),
            name: name.to_owned(),
            kind: ColumnKind::Regular,
            complex: true,
        })
    }

    pub fn partition_key(keyspace: &str, table: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            keyspace: keyspace.to_owned(),
            table: table.to_owned(),
            name: name.to_owned(),
            kind: ColumnKind::PartitionKey,
            complex: false,
        })
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn is_primary_key(&self) -> bool {
        !matches!(self.kind, ColumnKind::Regular)
    }

    pub fn is_complex(&self) -> bool {
        self.complex
    }
}

impl fmt::Display for ColumnMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.keyspace, self.table, self.name)
    }
}
