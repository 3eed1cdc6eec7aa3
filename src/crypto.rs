//! Cryptographic primitives for fedchain

use crate::error::{ChainError, Result};
use crate::primitives::Reader;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa, All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Compressed secp256k1 public key bytes.
pub type PublicKeyBytes = [u8; PUBLIC_KEY_SIZE];

/// Marshalled size of a [`Signature`]: public key followed by compact signature.
pub const SIGNATURE_LENGTH: usize = PUBLIC_KEY_SIZE + COMPACT_SIGNATURE_SIZE;

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    /// Creates a KeyPair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)
            .map_err(|e| ChainError::CryptoError(format!("Invalid hex secret key: {}", e)))?;
        Self::from_secret_bytes(&bytes)
    }

    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        self.public_key.serialize()
    }

    /// Signs the SHA-256 digest of `data`, returning the signer's key with the signature.
    pub fn sign(&self, data: &[u8]) -> Result<Signature> {
        let digest = Sha256::digest(data);
        let message = Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;
        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(Signature {
            public_key: self.public_key_bytes(),
            signature: signature.serialize_compact(),
        })
    }
}

/// A signature together with the public key that produced it.
///
/// The default value is the all-zero placeholder slot; it marshals but never verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub public_key: PublicKeyBytes,
    pub signature: [u8; COMPACT_SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Signature {
            public_key: [0u8; PUBLIC_KEY_SIZE],
            signature: [0u8; COMPACT_SIGNATURE_SIZE],
        }
    }
}

impl Signature {
    pub fn is_same_as(&self, other: &Signature) -> bool {
        self == other
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.signature);
        Ok(out)
    }

    pub fn unmarshal_binary_data(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut r = Reader::new(data);
        let public_key = r.read_array::<PUBLIC_KEY_SIZE>("signature public key")?;
        let signature = r.read_array::<COMPACT_SIGNATURE_SIZE>("signature bytes")?;
        Ok((
            Signature {
                public_key,
                signature,
            },
            r.remaining(),
        ))
    }

    /// Checks this signature over `data`.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        verify_signature(&self.public_key, data, &self.signature)
    }

    pub fn custom_marshal_text(&self) -> String {
        format!(
            "key {} sig {}",
            hex::encode(self.public_key),
            hex::encode(self.signature)
        )
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Signature", 2)?;
        s.serialize_field("PublicKey", &hex::encode(self.public_key))?;
        s.serialize_field("Signature", &hex::encode(self.signature))?;
        s.end()
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, message, and signature bytes.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<()> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;

    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = ecdsa::Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))
}

/// Parses a hex-encoded compressed public key.
pub fn public_key_from_hex(hex_str: &str) -> Result<PublicKeyBytes> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex public key: {}", e)))?;
    PublicKey::from_slice(&bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;
    bytes.try_into().map_err(|_| {
        ChainError::CryptoError(format!("Public key must be {} bytes", PUBLIC_KEY_SIZE))
    })
}
