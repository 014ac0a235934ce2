// Per-field index: ordered or hash behind one insert/lookup contract, plus its unit format.
use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::core::error::{Error, ErrorKind};
use crate::core::hash_index::HashIndex;
use crate::core::ordered_index::OrderedIndex;
use crate::core::schema::IndexStrategy;
use crate::core::value::{RowId, Value};

const MAGIC: [u8; 4] = *b"TBIX";
const VERSION: u32 = 1;
const TAG_ORDERED: u8 = 1;
const TAG_HASH: u8 = 2;
const DIGEST_LEN: usize = 32;
pub const INDEX_HEADER_LEN: usize = 20 + DIGEST_LEN;

#[derive(Clone, Debug)]
pub enum FieldIndex {
    Ordered(OrderedIndex<Value>),
    Hash(HashIndex<Value>),
}

impl FieldIndex {
    pub fn new(strategy: IndexStrategy) -> Self {
        match strategy {
            IndexStrategy::Ordered => FieldIndex::Ordered(OrderedIndex::new()),
            IndexStrategy::Hash => FieldIndex::Hash(HashIndex::new()),
        }
    }

    pub fn strategy(&self) -> IndexStrategy {
        match self {
            FieldIndex::Ordered(_) => IndexStrategy::Ordered,
            FieldIndex::Hash(_) => IndexStrategy::Hash,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FieldIndex::Ordered(index) => index.len(),
            FieldIndex::Hash(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered indices keep every insert; hash indices let the latest insert win.
    pub fn insert(&mut self, key: Value, row_id: RowId) {
        match self {
            FieldIndex::Ordered(index) => index.insert(key, row_id),
            FieldIndex::Hash(index) => {
                index.insert(key, row_id);
            }
        }
    }

    pub fn lookup(&self, key: &Value) -> Option<RowId> {
        match self {
            FieldIndex::Ordered(index) => index.search(key),
            FieldIndex::Hash(index) => index.lookup(key),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let (tag, payload) = match self {
            FieldIndex::Ordered(index) => (TAG_ORDERED, serde_json::to_vec(index)),
            FieldIndex::Hash(index) => (TAG_HASH, serde_json::to_vec(index)),
        };
        let payload = payload.map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode index")
                .with_source(err)
        })?;

        let mut buf = Vec::with_capacity(INDEX_HEADER_LEN + payload.len());
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.push(tag);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        buf.extend_from_slice(&Sha256::digest(&payload));
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decodes an index unit, requiring it to hold the `expected` strategy.
    pub fn decode(buf: &[u8], expected: IndexStrategy) -> Result<Self, Error> {
        if buf.len() < INDEX_HEADER_LEN {
            return Err(corrupt("index header too small"));
        }
        if buf[0..4] != MAGIC {
            return Err(corrupt("bad index magic"));
        }
        let version = u32::from_le_bytes(read_4(buf, 4));
        if version != VERSION {
            return Err(corrupt(&format!("unsupported index version {version}")));
        }
        let strategy = match buf[8] {
            TAG_ORDERED => IndexStrategy::Ordered,
            TAG_HASH => IndexStrategy::Hash,
            _ => return Err(corrupt("unknown index strategy tag")),
        };
        if strategy != expected {
            return Err(corrupt(&format!(
                "index unit holds a {} index, schema expects {}",
                strategy.name(),
                expected.name()
            )));
        }
        let payload_len = u64::from_le_bytes(read_8(buf, 12));
        let payload = &buf[INDEX_HEADER_LEN..];
        if payload.len() as u64 != payload_len {
            return Err(corrupt("index payload length mismatch"));
        }
        if Sha256::digest(payload).as_slice() != &buf[20..INDEX_HEADER_LEN] {
            return Err(corrupt("index payload digest mismatch"));
        }

        let index = match strategy {
            IndexStrategy::Ordered => serde_json::from_slice(payload).map(FieldIndex::Ordered),
            IndexStrategy::Hash => serde_json::from_slice(payload).map(FieldIndex::Hash),
        };
        index.map_err(|err| corrupt("index payload is malformed").with_source(err))
    }

    /// Reads the unit at `path`; `None` when it has never been written.
    pub fn load(path: &Path, strategy: IndexStrategy) -> Result<Option<Self>, Error> {
        let buf = match fs::read(path) {
            Ok(buf) => buf,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io(err, path).with_message("failed to read index")),
        };
        Self::decode(&buf, strategy)
            .map(Some)
            .map_err(|err| err.with_path(path))
    }

    pub fn store(&self, path: &Path) -> Result<(), Error> {
        let buf = self.encode()?;
        fs::write(path, buf).map_err(|err| Error::io(err, path).with_message("failed to write index"))
    }
}

fn corrupt(message: &str) -> Error {
    Error::new(ErrorKind::Corrupt).with_message(message)
}

fn read_4(buf: &[u8], offset: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&buf[offset..offset + 4]);
    out
}

fn read_8(buf: &[u8], offset: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    out
}
