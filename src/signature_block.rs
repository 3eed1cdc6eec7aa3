//! Signature block for redeem conditions (RCDs).
//!
//! The block holds the signatures that authorize one RCD. Each signature
//! has an index, so for a multisig RCD the signatures can be matched to
//! the keys in the RCD. The single-signature RCD has one fixed signer
//! slot at index 0.

use crate::crypto::{KeyPair, PublicKeyBytes, Signature};
use crate::error::{ChainError, Result};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignatureBlock {
    #[serde(rename = "Signatures")]
    signatures: Vec<Signature>,
}

impl SignatureBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A block holding one signature of `data` by `key`.
    pub fn new_single(key: &KeyPair, data: &[u8]) -> Result<Self> {
        let mut block = Self::new();
        block.add_signature(key.sign(data)?);
        Ok(block)
    }

    /// Replaces the signature in slot 0, or fills it when the block is empty.
    pub fn add_signature(&mut self, sig: Signature) {
        if let Some(first) = self.signatures.first_mut() {
            *first = sig;
        } else {
            self.signatures.push(sig);
        }
    }

    pub fn get_signature(&self, index: usize) -> Option<&Signature> {
        self.signatures.get(index)
    }

    /// The signatures in index order. An empty block reports a single
    /// placeholder slot rather than an empty list.
    pub fn get_signatures(&self) -> Vec<Signature> {
        if self.signatures.is_empty() {
            vec![Signature::default()]
        } else {
            self.signatures.clone()
        }
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn is_same_as(&self, other: Option<&SignatureBlock>) -> bool {
        let Some(other) = other else {
            return false;
        };
        self.signatures.len() == other.signatures.len()
            && self
                .signatures
                .iter()
                .zip(other.signatures.iter())
                .all(|(a, b)| a.is_same_as(b))
    }

    /// Checks signature `index` over `data` against the RCD key expected at that index.
    pub fn verify(&self, rcd_keys: &[PublicKeyBytes], data: &[u8]) -> Result<()> {
        if rcd_keys.is_empty() {
            return Err(ChainError::SignatureMissing);
        }
        for (i, key) in rcd_keys.iter().enumerate() {
            let sig = self.get_signature(i).ok_or(ChainError::SignatureMissing)?;
            if &sig.public_key != key {
                return Err(ChainError::SignatureInvalid(format!(
                    "signature {} is not from the expected key",
                    i
                )));
            }
            sig.verify(data)
                .map_err(|e| ChainError::SignatureInvalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for sig in self.get_signatures() {
            let data = sig
                .marshal_binary()
                .map_err(|e| ChainError::SignatureMarshalFailed(e.to_string()))?;
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    /// Always reads exactly one signature slot.
    pub fn unmarshal_binary_data(data: &[u8]) -> Result<(Self, &[u8])> {
        let (sig, rest) = Signature::unmarshal_binary_data(data)
            .map_err(|e| ChainError::SignatureUnmarshalFailed(e.to_string()))?;
        Ok((
            SignatureBlock {
                signatures: vec![sig],
            },
            rest,
        ))
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        Self::unmarshal_binary_data(data).map(|(block, _)| block)
    }

    pub fn json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn custom_marshal_text(&self) -> String {
        let mut out = String::from("Signature Block: \n");
        for sig in &self.signatures {
            out.push_str(" signature: ");
            out.push_str(&sig.custom_marshal_text());
            out.push_str("\n ");
        }
        out
    }
}

impl std::fmt::Display for SignatureBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.custom_marshal_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SIGNATURE_LENGTH;
    use crate::error::ErrorKind;

    #[test]
    fn test_add_signature_replaces_slot_zero() {
        let key = KeyPair::generate().unwrap();
        let first = key.sign(b"one").unwrap();
        let second = key.sign(b"two").unwrap();

        let mut block = SignatureBlock::new();
        block.add_signature(first);
        block.add_signature(second);

        assert_eq!(block.len(), 1);
        assert!(block.get_signature(0).unwrap().is_same_as(&second));
    }

    #[test]
    fn test_lazy_default_slot() {
        let block = SignatureBlock::new();
        let sigs = block.get_signatures();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0], Signature::default());
        // reporting the slot does not fill it
        assert!(block.is_empty());
    }

    #[test]
    fn test_get_signature_out_of_range() {
        let block = SignatureBlock::new();
        assert!(block.get_signature(0).is_none());
        assert!(block.get_signature(5).is_none());
    }

    #[test]
    fn test_is_same_as() {
        let key = KeyPair::generate().unwrap();
        let a = SignatureBlock::new_single(&key, b"data").unwrap();
        let b = a.clone();
        assert!(a.is_same_as(Some(&b)));
        assert!(!a.is_same_as(None));
        assert!(!a.is_same_as(Some(&SignatureBlock::new())));
    }

    #[test]
    fn test_empty_block_marshals_placeholder() {
        let bytes = SignatureBlock::new().marshal_binary().unwrap();
        assert_eq!(bytes, vec![0u8; SIGNATURE_LENGTH]);
    }

    #[test]
    fn test_unmarshal() {
        let key = KeyPair::generate().unwrap();
        let block = SignatureBlock::new_single(&key, b"data").unwrap();
        let bytes = block.marshal_binary().unwrap();

        let decoded = SignatureBlock::unmarshal_binary(&bytes).unwrap();
        assert!(decoded.is_same_as(Some(&block)));
        assert!(decoded.verify(&[key.public_key_bytes()], b"data").is_ok());

        let err = SignatureBlock::unmarshal_binary(&bytes[..10]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureUnmarshalFailed);
        assert!(SignatureBlock::unmarshal_binary(&[]).is_err());
    }

    #[test]
    fn test_verify_wrong_key() {
        let key = KeyPair::generate().unwrap();
        let other = KeyPair::generate().unwrap();
        let block = SignatureBlock::new_single(&key, b"data").unwrap();
        let err = block.verify(&[other.public_key_bytes()], b"data").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
    }
}
