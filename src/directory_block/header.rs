use crate::directory_block::DBLOCK_CHAIN_ID;
use crate::error::Result;
use crate::primitives::codec::{put_u32, put_u48};
use crate::primitives::{Hash, Reader, Timestamp};
use serde::{Serialize, Serializer};
use std::fmt;

/// Marshalled size of a header.
pub const HEADER_LENGTH: usize = 1 + 4 + 32 + 32 + 32 + 6 + 4 + 4;

/// The canonical per-height directory block header.
///
/// Setters do no validation; linkage is checked when a block is applied
/// to the [`DirectoryChain`](super::DirectoryChain).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DBlockHeader {
    version: u8,
    network_id: u32,
    body_mr: Hash,
    prev_key_mr: Hash,
    prev_full_hash: Hash,
    timestamp: Timestamp,
    db_height: u32,
    block_count: u32,
}

impl DBlockHeader {
    pub fn new() -> Self {
        let mut header = Self::default();
        header.init();
        header
    }

    /// Resets to the genesis shape: zero digests and zero numerics.
    pub fn init(&mut self) {
        self.version = 0;
        self.network_id = 0;
        self.body_mr = Hash::ZERO;
        self.prev_key_mr = Hash::ZERO;
        self.prev_full_hash = Hash::ZERO;
        self.timestamp = Timestamp::default();
        self.db_height = 0;
        self.block_count = 0;
    }

    pub fn get_version(&self) -> u8 {
        self.version
    }

    pub fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    pub fn get_network_id(&self) -> u32 {
        self.network_id
    }

    pub fn set_network_id(&mut self, network_id: u32) {
        self.network_id = network_id;
    }

    pub fn get_body_mr(&self) -> Hash {
        self.body_mr
    }

    pub fn set_body_mr(&mut self, body_mr: Hash) {
        self.body_mr = body_mr;
    }

    pub fn get_prev_key_mr(&self) -> Hash {
        self.prev_key_mr
    }

    pub fn set_prev_key_mr(&mut self, prev_key_mr: Hash) {
        self.prev_key_mr = prev_key_mr;
    }

    pub fn get_prev_full_hash(&self) -> Hash {
        self.prev_full_hash
    }

    pub fn set_prev_full_hash(&mut self, prev_full_hash: Hash) {
        self.prev_full_hash = prev_full_hash;
    }

    pub fn get_timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Stored at minute precision; sub-minute detail is dropped.
    pub fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp.to_minute_precision();
    }

    pub fn get_db_height(&self) -> u32 {
        self.db_height
    }

    pub fn set_db_height(&mut self, db_height: u32) {
        self.db_height = db_height;
    }

    pub fn get_block_count(&self) -> u32 {
        self.block_count
    }

    pub fn set_block_count(&mut self, block_count: u32) {
        self.block_count = block_count;
    }

    pub fn get_chain_id(&self) -> Hash {
        DBLOCK_CHAIN_ID
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LENGTH);
        buf.push(self.version);
        put_u32(&mut buf, self.network_id);
        buf.extend_from_slice(self.body_mr.as_bytes());
        buf.extend_from_slice(self.prev_key_mr.as_bytes());
        buf.extend_from_slice(self.prev_full_hash.as_bytes());
        put_u48(&mut buf, self.timestamp.minutes())?;
        put_u32(&mut buf, self.db_height);
        put_u32(&mut buf, self.block_count);
        Ok(buf)
    }

    /// Decodes a header, returning the bytes that follow it.
    pub fn unmarshal_binary_data(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut r = Reader::new(data);
        let header = DBlockHeader {
            version: r.read_u8("header version")?,
            network_id: r.read_u32("header network id")?,
            body_mr: r.read_hash("header body mr")?,
            prev_key_mr: r.read_hash("header prev key mr")?,
            prev_full_hash: r.read_hash("header prev full hash")?,
            timestamp: Timestamp::from_minutes(r.read_u48("header timestamp")?),
            db_height: r.read_u32("header db height")?,
            block_count: r.read_u32("header block count")?,
        };
        Ok((header, r.remaining()))
    }

    /// Decodes in place. On error the receiver is left untouched.
    pub fn unmarshal_binary(&mut self, data: &[u8]) -> Result<()> {
        let (header, _) = Self::unmarshal_binary_data(data)?;
        *self = header;
        Ok(())
    }

    /// SHA-256 of the marshalled header.
    pub fn hash(&self) -> Result<Hash> {
        Ok(Hash::sha256(&self.marshal_binary()?))
    }

    pub fn is_same_as(&self, other: &DBlockHeader) -> bool {
        self == other
    }

    pub fn json_byte(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize)]
struct HeaderJson {
    #[serde(rename = "Version")]
    version: u8,
    #[serde(rename = "NetworkID")]
    network_id: u32,
    #[serde(rename = "BodyMR")]
    body_mr: Hash,
    #[serde(rename = "PrevKeyMR")]
    prev_key_mr: Hash,
    #[serde(rename = "PrevFullHash")]
    prev_full_hash: Hash,
    #[serde(rename = "Timestamp")]
    timestamp: u64,
    #[serde(rename = "DBHeight")]
    db_height: u32,
    #[serde(rename = "BlockCount")]
    block_count: u32,
    #[serde(rename = "ChainID")]
    chain_id: Hash,
}

impl Serialize for DBlockHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        HeaderJson {
            version: self.version,
            network_id: self.network_id,
            body_mr: self.body_mr,
            prev_key_mr: self.prev_key_mr,
            prev_full_hash: self.prev_full_hash,
            timestamp: self.timestamp.minutes(),
            db_height: self.db_height,
            block_count: self.block_count,
            chain_id: self.get_chain_id(),
        }
        .serialize(serializer)
    }
}

impl fmt::Display for DBlockHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "  {:<17}{}", "Version:", self.version)?;
        writeln!(f, "  {:<17}{}", "NetworkID:", self.network_id)?;
        writeln!(f, "  {:<17}{}", "BodyMR:", self.body_mr)?;
        writeln!(f, "  {:<17}{}", "PrevKeyMR:", self.prev_key_mr)?;
        writeln!(f, "  {:<17}{}", "PrevFullHash:", self.prev_full_hash)?;
        writeln!(f, "  {:<17}{}", "Timestamp:", self.timestamp.minutes())?;
        writeln!(f, "  {:<17}{}", "Timestamp Str:", self.timestamp.local_string())?;
        writeln!(f, "  {:<17}{}", "DBHeight:", self.db_height)?;
        writeln!(f, "  {:<17}{}", "BlockCount:", self.block_count)
    }
}
