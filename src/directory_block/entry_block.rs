use crate::error::{ChainError, Result};
use crate::primitives::codec::put_u32;
use crate::primitives::{merkle_root, Hash, Reader};
use serde::Serialize;

/// The entries a single chain gained at one directory block height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryBlock {
    #[serde(rename = "ChainID")]
    pub chain_id: Hash,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "EntryHashes")]
    pub entry_hashes: Vec<Hash>,
}

impl EntryBlock {
    pub fn new(chain_id: Hash, db_height: u32) -> Self {
        EntryBlock {
            chain_id,
            db_height,
            entry_hashes: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, entry_hash: Hash) {
        self.entry_hashes.push(entry_hash);
    }

    pub fn key_mr(&self) -> Hash {
        merkle_root(&self.entry_hashes)
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(40 + self.entry_hashes.len() * 32);
        buf.extend_from_slice(self.chain_id.as_bytes());
        put_u32(&mut buf, self.db_height);
        let count = u32::try_from(self.entry_hashes.len())
            .map_err(|_| ChainError::malformed("too many entries"))?;
        put_u32(&mut buf, count);
        for h in &self.entry_hashes {
            buf.extend_from_slice(h.as_bytes());
        }
        Ok(buf)
    }

    pub fn unmarshal_binary_data(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut r = Reader::new(data);
        let chain_id = r.read_hash("entry block chain id")?;
        let db_height = r.read_u32("entry block height")?;
        let count = r.read_u32("entry block count")? as usize;
        if r.len() / 32 < count {
            return Err(ChainError::malformed("entry block count exceeds data"));
        }
        let mut entry_hashes = Vec::with_capacity(count);
        for _ in 0..count {
            entry_hashes.push(r.read_hash("entry hash")?);
        }
        Ok((
            EntryBlock {
                chain_id,
                db_height,
                entry_hashes,
            },
            r.remaining(),
        ))
    }
}
