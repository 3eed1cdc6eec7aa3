use crate::error::ChainError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

pub const HASH_LENGTH: usize = 32;

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; HASH_LENGTH]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; HASH_LENGTH]);

    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }

    /// SHA-256 of `data`.
    pub fn sha256(data: &[u8]) -> Self {
        Hash(Sha256::digest(data).into())
    }

    /// Well-known chain ids are zero except for their final byte.
    pub const fn with_last_byte(b: u8) -> Self {
        let mut bytes = [0u8; HASH_LENGTH];
        bytes[HASH_LENGTH - 1] = b;
        Hash(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LENGTH]
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ChainError::Malformed(format!("Invalid hex hash: {}", e)))?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChainError> {
        let arr: [u8; HASH_LENGTH] = bytes.try_into().map_err(|_| {
            ChainError::Malformed(format!(
                "Hash must be {} bytes, got {}",
                HASH_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Hash(arr))
    }

    /// Big-endian integer of the first eight bytes; used to spread keys over VMs.
    pub fn prefix_u64(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(prefix)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl From<[u8; HASH_LENGTH]> for Hash {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Hash(bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_hash() {
        assert!(Hash::ZERO.is_zero());
        assert!(Hash::default().is_zero());
        assert!(!Hash::sha256(b"x").is_zero());
    }

    #[test]
    fn test_hex_round_trip() {
        let hex_str = "1934687145014f234b3451c151345a14350e13462568c4146317181456256526";
        let hash = Hash::from_hex(hex_str).unwrap();
        assert_eq!(hash.to_hex(), hex_str);
        assert_eq!(hash.to_string(), hex_str);
    }

    #[test]
    fn test_bad_hex_lengths() {
        assert!(Hash::from_hex("00").is_err());
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn test_well_known_chain_id() {
        let id = Hash::with_last_byte(0x0d);
        assert_eq!(
            id.to_hex(),
            "000000000000000000000000000000000000000000000000000000000000000d"
        );
    }

    #[test]
    fn test_json_is_hex_string() {
        let json = serde_json::to_string(&Hash::with_last_byte(1)).unwrap();
        assert_eq!(
            json,
            "\"0000000000000000000000000000000000000000000000000000000000000001\""
        );
    }
}
