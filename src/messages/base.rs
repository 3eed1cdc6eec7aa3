//! Shared message plumbing: metadata, hash memoization, the codec frame
//! and signing, implemented once for every variant through [`Msg`].

use crate::crypto::{KeyPair, Signature};
use crate::error::{ChainError, Result};
use crate::messages::{Message, MessageType, Validity};
use crate::primitives::codec::put_timestamp;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::ConsensusView;
use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};

/// Addressing and cache metadata. Never marshalled, never compared.
#[derive(Debug, Clone, Default)]
pub struct MessageBase {
    /// Peer the message arrived from; `None` when produced locally.
    pub origin: Option<String>,
    hash: OnceCell<Hash>,
    msg_hash: OnceCell<Hash>,
}

impl MessageBase {
    pub fn from_peer(peer: impl Into<String>) -> Self {
        MessageBase {
            origin: Some(peer.into()),
            ..Default::default()
        }
    }

    pub fn is_hash_cached(&self) -> bool {
        self.hash.get().is_some()
    }

    pub fn is_msg_hash_cached(&self) -> bool {
        self.msg_hash.get().is_some()
    }
}

/// The capability set every message variant provides.
///
/// Variants supply their fields, validation and lane assignment; framing,
/// hashing and signing are provided here.
pub trait Msg: Clone + Serialize + Into<Message> {
    const TYPE: MessageType;
    /// Whether a message-level signature follows the signed fields.
    const SIGNED: bool = true;

    fn base(&self) -> &MessageBase;
    fn base_mut(&mut self) -> &mut MessageBase;
    fn timestamp(&self) -> Timestamp;

    fn signature(&self) -> Option<&Signature> {
        None
    }

    fn set_signature(&mut self, _sig: Signature) {}

    /// Server identity the message claims to come from.
    fn signer_id(&self) -> Option<Hash> {
        None
    }

    /// Height the message refers to, if any.
    fn db_height(&self) -> Option<u32> {
        None
    }

    /// Writes the variant fields that follow the type tag and timestamp.
    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()>;

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self>;

    fn fields_same_as(&self, other: &Self) -> bool;

    fn validate(&self, view: &dyn ConsensusView) -> Validity;

    fn compute_vm_index(&self, view: &dyn ConsensusView) -> usize;

    fn msg_type(&self) -> MessageType {
        Self::TYPE
    }

    fn marshal_for_signature(&self) -> Result<Vec<u8>> {
        let mut buf = vec![Self::TYPE.tag()];
        put_timestamp(&mut buf, self.timestamp())?;
        self.write_fields(&mut buf)?;
        Ok(buf)
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut data = self.marshal_for_signature()?;
        if let Some(sig) = self.signature() {
            data.extend_from_slice(&sig.marshal_binary()?);
        }
        Ok(data)
    }

    fn unmarshal_binary_data(data: &[u8]) -> Result<(Self, &[u8])> {
        let mut r = Reader::new(data);
        let tag = r.read_u8("message type")?;
        if tag != Self::TYPE.tag() {
            return Err(ChainError::WrongMessageType {
                expected: Self::TYPE.tag(),
                got: tag,
            });
        }
        let timestamp = r.read_timestamp()?;
        let mut msg = Self::read_fields(&mut r, timestamp)?;

        let mut rest = r.remaining();
        if Self::SIGNED && !rest.is_empty() {
            let (sig, tail) = Signature::unmarshal_binary_data(rest)
                .map_err(|e| ChainError::SignatureUnmarshalFailed(e.to_string()))?;
            msg.set_signature(sig);
            rest = tail;
        }
        Ok((msg, rest))
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        Self::unmarshal_binary_data(data).map(|(msg, _)| msg)
    }

    /// Hash of the signed content; independent of who signed it.
    fn get_hash(&self) -> Result<Hash> {
        self.base()
            .hash
            .get_or_try_init(|| Ok(Hash::sha256(&self.marshal_for_signature()?)))
            .copied()
    }

    /// Hash of the full wire encoding, signature included.
    fn get_msg_hash(&self) -> Result<Hash> {
        self.base()
            .msg_hash
            .get_or_try_init(|| Ok(Hash::sha256(&self.marshal_binary()?)))
            .copied()
    }

    fn get_repeat_hash(&self) -> Result<Hash> {
        self.get_msg_hash()
    }

    fn sign(&mut self, key: &KeyPair) -> Result<()> {
        if !Self::SIGNED {
            return Err(ChainError::CryptoError(format!(
                "{} messages carry no signature",
                Self::TYPE.name()
            )));
        }
        let data = self.marshal_for_signature()?;
        let sig = key.sign(&data)?;
        self.set_signature(sig);
        // the wire encoding just changed
        self.base_mut().msg_hash = OnceCell::new();
        Ok(())
    }

    /// `Ok(false)` when the signature does not verify, `SignatureMissing` when absent.
    fn verify_signature(&self) -> Result<bool> {
        let sig = self.signature().ok_or(ChainError::SignatureMissing)?;
        let data = self.marshal_for_signature()?;
        Ok(sig.verify(&data).is_ok())
    }

    fn is_same_as(&self, other: &Self) -> bool {
        if self.timestamp() != other.timestamp() {
            return false;
        }
        match (self.signature(), other.signature()) {
            (None, None) => {}
            (Some(a), Some(b)) if a.is_same_as(b) => {}
            _ => return false,
        }
        self.fields_same_as(other)
    }

    fn json_byte(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Signed by the server it names, with the key the roster holds for it.
pub(crate) fn check_server_signature<M: Msg>(msg: &M, view: &dyn ConsensusView) -> Validity {
    let Some(id) = msg.signer_id() else {
        return Validity::Invalid;
    };
    let Some(key) = view.server_key(&id) else {
        return Validity::Invalid;
    };
    let Some(sig) = msg.signature() else {
        return Validity::Invalid;
    };
    if sig.public_key != key {
        return Validity::Invalid;
    }
    match msg.verify_signature() {
        Ok(true) => Validity::Valid,
        _ => Validity::Invalid,
    }
}

/// Rejects a missing or broken signature without consulting the height.
/// A signer the roster already knows must have signed with its roster key.
pub(crate) fn check_signature_sound<M: Msg>(msg: &M, view: &dyn ConsensusView) -> Option<Validity> {
    let Some(sig) = msg.signature() else {
        return Some(Validity::Invalid);
    };
    let roster_key = msg.signer_id().and_then(|id| view.server_key(&id));
    if roster_key.is_some_and(|key| sig.public_key != key) {
        return Some(Validity::Invalid);
    }
    match msg.verify_signature() {
        Ok(true) => None,
        _ => Some(Validity::Invalid),
    }
}

/// Tri-state ordering of a message height against the height being built.
/// Only a soundly signed message may be held back as undecidable.
pub(crate) fn check_height<M: Msg>(msg: &M, db_height: u32, view: &dyn ConsensusView) -> Option<Validity> {
    if let Some(v) = check_signature_sound(msg, view) {
        return Some(v);
    }
    let leader_height = view.leader_height();
    if db_height < leader_height {
        Some(Validity::Invalid)
    } else if db_height > leader_height {
        Some(Validity::Indeterminate)
    } else {
        None
    }
}

/// Deterministic lane for content keyed by its hash.
pub(crate) fn vm_index_for_hash(hash: &Hash, view: &dyn ConsensusView) -> usize {
    let count = view.vm_count(view.leader_height());
    if count == 0 {
        return 0;
    }
    (hash.prefix_u64() % count as u64) as usize
}

pub(crate) fn serialize_hex<S: Serializer, T: AsRef<[u8]>>(
    bytes: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes.as_ref()))
}
