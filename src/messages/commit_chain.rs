use crate::crypto::{KeyPair, PublicKeyBytes};
use crate::error::Result;
use crate::messages::base::{serialize_hex, vm_index_for_hash, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::codec::put_timestamp;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::signature_block::SignatureBlock;
use crate::state::ConsensusView;
use serde::Serialize;
use std::ops::RangeInclusive;

/// Entry credits a chain commit may pay.
pub const COMMIT_CREDITS: RangeInclusive<u8> = 10..=20;

/// A paid commitment to create a chain with its first entry.
///
/// Authorized by the entry-credit key it names rather than by a server,
/// so it carries no message-level signature.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommitChain {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    pub chain_id_hash: Hash,
    pub entry_hash: Hash,
    pub credits: u8,
    #[serde(rename = "ECPubKey", serialize_with = "serialize_hex")]
    pub ec_public_key: PublicKeyBytes,
    pub authorization: SignatureBlock,
}

impl CommitChain {
    /// Builds a commit authorized by `ec_key`.
    pub fn new(
        timestamp: Timestamp,
        chain_id_hash: Hash,
        entry_hash: Hash,
        credits: u8,
        ec_key: &KeyPair,
    ) -> Result<Self> {
        let mut commit = CommitChain {
            base: MessageBase::default(),
            timestamp,
            chain_id_hash,
            entry_hash,
            credits,
            ec_public_key: ec_key.public_key_bytes(),
            authorization: SignatureBlock::new(),
        };
        commit.authorization = SignatureBlock::new_single(ec_key, &commit.commit_data()?)?;
        Ok(commit)
    }

    /// The bytes the entry-credit key signs.
    pub fn commit_data(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(6 + 32 + 32 + 1 + 33);
        put_timestamp(&mut buf, self.timestamp)?;
        buf.extend_from_slice(self.chain_id_hash.as_bytes());
        buf.extend_from_slice(self.entry_hash.as_bytes());
        buf.push(self.credits);
        buf.extend_from_slice(&self.ec_public_key);
        Ok(buf)
    }

    pub fn is_authorized(&self) -> bool {
        match self.commit_data() {
            Ok(data) => self.authorization.verify(&[self.ec_public_key], &data).is_ok(),
            Err(_) => false,
        }
    }
}

impl Msg for CommitChain {
    const TYPE: MessageType = MessageType::CommitChain;
    const SIGNED: bool = false;

    fn base(&self) -> &MessageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MessageBase {
        &mut self.base
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.chain_id_hash.as_bytes());
        buf.extend_from_slice(self.entry_hash.as_bytes());
        buf.push(self.credits);
        buf.extend_from_slice(&self.ec_public_key);
        buf.extend_from_slice(&self.authorization.marshal_binary()?);
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let chain_id_hash = r.read_hash("commit chain id hash")?;
        let entry_hash = r.read_hash("commit entry hash")?;
        let credits = r.read_u8("commit credits")?;
        let ec_public_key = r.read_array("commit ec public key")?;
        let (authorization, rest) = SignatureBlock::unmarshal_binary_data(r.remaining())?;
        *r = Reader::new(rest);
        Ok(CommitChain {
            base: MessageBase::default(),
            timestamp,
            chain_id_hash,
            entry_hash,
            credits,
            ec_public_key,
            authorization,
        })
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.chain_id_hash == other.chain_id_hash
            && self.entry_hash == other.entry_hash
            && self.credits == other.credits
            && self.ec_public_key == other.ec_public_key
            && self.authorization.is_same_as(Some(&other.authorization))
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if !COMMIT_CREDITS.contains(&self.credits) {
            return Validity::Invalid;
        }
        if !self.is_authorized() {
            return Validity::Invalid;
        }
        match view.pending_commit_credits(&self.entry_hash) {
            Some(existing) if existing >= self.credits => Validity::Invalid,
            _ => Validity::Valid,
        }
    }

    fn compute_vm_index(&self, view: &dyn ConsensusView) -> usize {
        match self.get_hash() {
            Ok(hash) => vm_index_for_hash(&hash, view),
            Err(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state::view::testing::FixedView;

    fn commit(credits: u8) -> CommitChain {
        let key = KeyPair::generate().unwrap();
        CommitChain::new(
            Timestamp::now(),
            Hash::sha256(b"chain"),
            Hash::sha256(b"entry"),
            credits,
            &key,
        )
        .unwrap()
    }

    #[test]
    fn test_marshal_unmarshal() {
        let c = commit(11);
        let bytes = c.marshal_binary().unwrap();
        let (decoded, rest) = CommitChain::unmarshal_binary_data(&bytes).unwrap();
        assert!(rest.is_empty());
        assert!(decoded.is_same_as(&c));
        assert!(decoded.is_authorized());
    }

    #[test]
    fn test_unmarshal_nil() {
        assert_eq!(CommitChain::unmarshal_binary(&[]).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_message_signature_not_supported() {
        let mut c = commit(11);
        let key = KeyPair::generate().unwrap();
        assert!(c.sign(&key).is_err());
        assert_eq!(c.verify_signature().unwrap_err().kind(), ErrorKind::SignatureMissing);
    }

    #[test]
    fn test_validate_credits_and_authorization() {
        let mut view = FixedView::new(3, 0);
        assert_eq!(commit(10).validate(&view), Validity::Valid);
        assert_eq!(commit(20).validate(&view), Validity::Valid);
        assert_eq!(commit(9).validate(&view), Validity::Invalid);
        assert_eq!(commit(21).validate(&view), Validity::Invalid);

        let mut tampered = commit(12);
        tampered.entry_hash = Hash::sha256(b"other");
        assert_eq!(tampered.validate(&view), Validity::Invalid);

        view.commits.insert(Hash::sha256(b"entry"), 15);
        assert_eq!(commit(12).validate(&view), Validity::Invalid);
        assert_eq!(commit(15).validate(&view), Validity::Invalid);
        assert_eq!(commit(16).validate(&view), Validity::Valid);
    }

    #[test]
    fn test_vm_index_is_deterministic() {
        let view = FixedView::new(3, 4);
        let c = commit(10);
        let vm = c.compute_vm_index(&view);
        assert!(vm < 3);
        assert_eq!(vm, c.compute_vm_index(&view));
    }
}
