use crate::directory_block::header::DBlockHeader;
use crate::error::{ChainError, Result};
use crate::primitives::merkle::{hash_pair, merkle_root};
use crate::primitives::{Hash, Reader};
use serde::Serialize;

/// One body entry: a chain and the key Merkle root of its block at this height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DBEntry {
    #[serde(rename = "ChainID")]
    pub chain_id: Hash,
    #[serde(rename = "KeyMR")]
    pub key_mr: Hash,
}

impl DBEntry {
    pub fn new(chain_id: Hash, key_mr: Hash) -> Self {
        DBEntry { chain_id, key_mr }
    }

    pub fn marshal_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(self.chain_id.as_bytes());
        buf.extend_from_slice(self.key_mr.as_bytes());
        buf
    }

    pub fn hash(&self) -> Hash {
        Hash::sha256(&self.marshal_binary())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryBlock {
    #[serde(rename = "Header")]
    pub header: DBlockHeader,
    #[serde(rename = "DBEntries")]
    pub entries: Vec<DBEntry>,
}

impl DirectoryBlock {
    /// Builds a block whose header body fields (`body_mr`, `block_count`)
    /// are derived from `entries`.
    pub fn new(mut header: DBlockHeader, entries: Vec<DBEntry>) -> Result<Self> {
        header.set_body_mr(Self::calculate_body_mr(&entries));
        let count = u32::try_from(entries.len())
            .map_err(|_| ChainError::InvalidBlock("too many body entries".to_string()))?;
        header.set_block_count(count);
        Ok(DirectoryBlock { header, entries })
    }

    pub fn calculate_body_mr(entries: &[DBEntry]) -> Hash {
        let leaves: Vec<Hash> = entries.iter().map(DBEntry::hash).collect();
        merkle_root(&leaves)
    }

    pub fn header_hash(&self) -> Result<Hash> {
        self.header.hash()
    }

    /// Merkle root over the header hash and the body Merkle root.
    pub fn key_mr(&self) -> Result<Hash> {
        Ok(hash_pair(&self.header_hash()?, &self.header.get_body_mr()))
    }

    /// SHA-256 of the whole marshalled block.
    pub fn full_hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.marshal_binary()?))
    }

    pub fn db_height(&self) -> u32 {
        self.header.get_db_height()
    }

    /// Body Merkle root and block count agree with the entries.
    pub fn body_is_consistent(&self) -> bool {
        self.header.get_body_mr() == Self::calculate_body_mr(&self.entries)
            && self.header.get_block_count() as usize == self.entries.len()
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut buf = self.header.marshal_binary()?;
        for entry in &self.entries {
            buf.extend_from_slice(&entry.marshal_binary());
        }
        Ok(buf)
    }

    pub fn unmarshal_binary_data(data: &[u8]) -> Result<(Self, &[u8])> {
        let (header, rest) = DBlockHeader::unmarshal_binary_data(data)?;
        let mut r = Reader::new(rest);
        let count = header.get_block_count() as usize;
        // every entry is 64 bytes; reject counts the input cannot hold before allocating
        if r.len() / 64 < count {
            return Err(ChainError::Malformed(format!(
                "directory block claims {} entries, only {} bytes follow",
                count,
                r.len()
            )));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let chain_id = r.read_hash("entry chain id")?;
            let key_mr = r.read_hash("entry key mr")?;
            entries.push(DBEntry { chain_id, key_mr });
        }
        Ok((DirectoryBlock { header, entries }, r.remaining()))
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        Self::unmarshal_binary_data(data).map(|(block, _)| block)
    }

    pub fn is_same_as(&self, other: &DirectoryBlock) -> bool {
        self == other
    }

    pub fn json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_block::{ADMIN_CHAIN_ID, EC_CHAIN_ID};
    use crate::error::ErrorKind;

    fn sample_block() -> DirectoryBlock {
        let mut header = DBlockHeader::new();
        header.set_db_height(3);
        header.set_network_id(7);
        let entries = vec![
            DBEntry::new(ADMIN_CHAIN_ID, Hash::sha256(b"admin")),
            DBEntry::new(EC_CHAIN_ID, Hash::sha256(b"ec")),
        ];
        DirectoryBlock::new(header, entries).unwrap()
    }

    #[test]
    fn test_body_fields_are_derived() {
        let block = sample_block();
        assert_eq!(block.header.get_block_count(), 2);
        assert!(!block.header.get_body_mr().is_zero());
        assert!(block.body_is_consistent());
    }

    #[test]
    fn test_empty_body_has_zero_mr() {
        let block = DirectoryBlock::new(DBlockHeader::new(), vec![]).unwrap();
        assert!(block.header.get_body_mr().is_zero());
        assert_eq!(block.header.get_block_count(), 0);
    }

    #[test]
    fn test_round_trip() {
        let block = sample_block();
        let bytes = block.marshal_binary().unwrap();
        let decoded = DirectoryBlock::unmarshal_binary(&bytes).unwrap();
        assert!(decoded.is_same_as(&block));
        assert_eq!(decoded.key_mr().unwrap(), block.key_mr().unwrap());
        assert_eq!(decoded.full_hash().unwrap(), block.full_hash().unwrap());
    }

    #[test]
    fn test_truncated_body() {
        let bytes = sample_block().marshal_binary().unwrap();
        let err = DirectoryBlock::unmarshal_binary(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_key_mr_differs_from_full_hash() {
        let block = sample_block();
        assert_ne!(block.key_mr().unwrap(), block.full_hash().unwrap());
    }
}
