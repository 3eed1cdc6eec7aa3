//! Bounds-checked binary reading and big-endian writing helpers.
//!
//! Every read checks the remaining length first, so truncated or empty
//! input surfaces as `ChainError::Malformed` instead of a panic.

use crate::error::{ChainError, Result};
use crate::primitives::hash::{Hash, HASH_LENGTH};
use crate::primitives::timestamp::Timestamp;

/// Largest value a 6-byte big-endian field can carry.
pub const MAX_U48: u64 = (1 << 48) - 1;

pub struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data }
    }

    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn read_bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(ChainError::Malformed(format!(
                "{}: need {} bytes, have {}",
                what,
                n,
                self.data.len()
            )));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.read_bytes(1, what)?[0])
    }

    pub fn read_u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array::<4>(what)?))
    }

    pub fn read_u48(&mut self, what: &str) -> Result<u64> {
        let bytes = self.read_bytes(6, what)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    pub fn read_hash(&mut self, what: &str) -> Result<Hash> {
        Ok(Hash(self.read_array::<HASH_LENGTH>(what)?))
    }

    /// Message timestamps travel as 6-byte big-endian milliseconds.
    pub fn read_timestamp(&mut self) -> Result<Timestamp> {
        Ok(Timestamp::from_millis(self.read_u48("timestamp")?))
    }

    /// A `u32` length prefix followed by that many bytes.
    pub fn read_var_bytes(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.read_u32(what)? as usize;
        self.read_bytes(len, what)
    }
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u48(buf: &mut Vec<u8>, v: u64) -> Result<()> {
    if v > MAX_U48 {
        return Err(ChainError::Malformed(format!(
            "value {} does not fit in 6 bytes",
            v
        )));
    }
    buf.extend_from_slice(&v.to_be_bytes()[2..]);
    Ok(())
}

pub fn put_timestamp(buf: &mut Vec<u8>, ts: Timestamp) -> Result<()> {
    put_u48(buf, ts.millis())
}

pub fn put_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| ChainError::malformed("length prefix overflow"))?;
    put_u32(buf, len);
    buf.extend_from_slice(bytes);
    Ok(())
}
