//! Storage codec for persisted consensus state.
//!
//! Promise cells carry just the ballot; proposal and commit cells carry the
//! ballot followed by the update's cells, so a snapshot reloaded from the
//! reserved table reconstructs the same `Commit` the coordinator persisted.

use core::convert::TryInto;

use bytes::Bytes;

use tessera_storage::{Cell, CellPath, ColumnMetadata, Partition};
use tessera_types::{Ballot, Clustering, Result, TesseraError, BALLOT_ENCODED_LEN};

use crate::state::Commit;

const PATH_FLAG: u8 = 0b0000_0001;

pub(crate) fn encode_ballot(ballot: Ballot) -> Result<Bytes> {
    let mut buf = vec![0u8; BALLOT_ENCODED_LEN];
    ballot.encode(&mut buf)?;
    Ok(Bytes::from(buf))
}

pub(crate) fn decode_ballot(data: &[u8]) -> Result<Ballot> {
    Ballot::decode(data)
}

pub(crate) fn encode_commit(commit: &Commit) -> Result<Bytes> {
    let mut buf = vec![0u8; BALLOT_ENCODED_LEN];
    commit.ballot.encode(&mut buf)?;

    let rows: Vec<_> = commit.update.rows().collect();
    if rows.len() > u32::MAX as usize {
        return Err(TesseraError::Invalid("commit update has too many rows"));
    }
    buf.extend_from_slice(&(rows.len() as u32).to_be_bytes());
    for (clustering, row) in rows {
        buf.extend_from_slice(&clustering.0.to_be_bytes());
        let cells: Vec<_> = row.cells().collect();
        if cells.len() > u32::MAX as usize {
            return Err(TesseraError::Invalid("commit row has too many cells"));
        }
        buf.extend_from_slice(&(cells.len() as u32).to_be_bytes());
        for cell in cells {
            encode_cell(&mut buf, cell)?;
        }
    }
    Ok(Bytes::from(buf))
}

pub(crate) fn decode_commit(keyspace: &str, table: &str, data: &[u8]) -> Result<Commit> {
    if data.len() < BALLOT_ENCODED_LEN {
        return Err(TesseraError::Corruption("commit payload truncated"));
    }
    let ballot = Ballot::decode(&data[..BALLOT_ENCODED_LEN])?;
    let mut cursor = Cursor::new(&data[BALLOT_ENCODED_LEN..]);

    let mut update = Partition::default();
    let row_count = cursor.read_u32()?;
    for _ in 0..row_count {
        let clustering = Clustering(cursor.read_u64()?);
        let cell_count = cursor.read_u32()?;
        for _ in 0..cell_count {
            let cell = decode_cell(keyspace, table, &mut cursor)?;
            update.apply(clustering, cell);
        }
    }
    if !cursor.is_exhausted() {
        return Err(TesseraError::Corruption("commit payload has trailing bytes"));
    }
    Ok(Commit { ballot, update })
}

fn encode_cell(buf: &mut Vec<u8>, cell: &Cell) -> Result<()> {
    let name = cell.column().name().as_bytes();
    if name.len() > u16::MAX as usize {
        return Err(TesseraError::Invalid("column name too long to encode"));
    }
    buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
    buf.extend_from_slice(name);

    let flags = if cell.path().is_some() { PATH_FLAG } else { 0 };
    buf.push(flags);
    buf.extend_from_slice(&cell.timestamp().to_be_bytes());
    buf.extend_from_slice(&cell.ttl().to_be_bytes());
    buf.extend_from_slice(&cell.local_deletion_time().to_be_bytes());
    if let Some(path) = cell.path() {
        if path.bytes().len() > u16::MAX as usize {
            return Err(TesseraError::Invalid("cell path too long to encode"));
        }
        buf.extend_from_slice(&(path.bytes().len() as u16).to_be_bytes());
        buf.extend_from_slice(path.bytes());
    }
    if cell.value().len() > u32::MAX as usize {
        return Err(TesseraError::Invalid("cell value too long to encode"));
    }
    buf.extend_from_slice(&(cell.value().len() as u32).to_be_bytes());
    buf.extend_from_slice(cell.value());
    Ok(())
}

fn decode_cell(keyspace: &str, table: &str, cursor: &mut Cursor<'_>) -> Result<Cell> {
    let name_len = cursor.read_u16()? as usize;
    let name = core::str::from_utf8(cursor.read_bytes(name_len)?)
        .map_err(|_| TesseraError::Corruption("cell column name not utf-8"))?
        .to_owned();
    let flags = cursor.read_u8()?;
    if flags & !PATH_FLAG != 0 {
        return Err(TesseraError::Corruption("unknown cell flags"));
    }
    let timestamp = cursor.read_i64()?;
    let ttl = cursor.read_i32()?;
    let local_deletion_time = cursor.read_i32()?;
    let path = if flags & PATH_FLAG != 0 {
        let path_len = cursor.read_u16()? as usize;
        Some(CellPath::new(cursor.read_bytes(path_len)?.to_vec()))
    } else {
        None
    };
    let value_len = cursor.read_u32()? as usize;
    let value = Bytes::from(cursor.read_bytes(value_len)?.to_vec());

    let column = if path.is_some() {
        ColumnMetadata::complex(keyspace, table, &name)
    } else {
        ColumnMetadata::regular(keyspace, table, &name)
    };
    Cell::new(column, timestamp, ttl, local_deletion_time, value, path)
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_exhausted(&self) -> bool {
        self.offset == self.data.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .ok_or(TesseraError::Corruption("commit payload length overflow"))?;
        if end > self.data.len() {
            return Err(TesseraError::Corruption("commit payload truncated"));
        }
        let out = &self.data[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }
}
