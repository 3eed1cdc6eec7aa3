use crate::crypto::Signature;
use crate::error::Result;
use crate::messages::base::{check_height, check_server_signature, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::codec::put_u32;
use crate::primitives::merkle::hash_pair;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::ConsensusView;
use serde::Serialize;

/// A leader's ordering decision: message `message_hash` sits at
/// `(db_height, vm_index, list_height)`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ack {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "VMIndex")]
    pub vm_index: u8,
    pub list_height: u32,
    pub message_hash: Hash,
    /// Chains every ack of the lane: `sha256(prev_serial || message_hash)`.
    pub serial_hash: Hash,
    #[serde(rename = "LeaderID")]
    pub leader_id: Hash,
    pub signature: Option<Signature>,
}

impl Ack {
    pub fn new(
        timestamp: Timestamp,
        db_height: u32,
        vm_index: u8,
        list_height: u32,
        message_hash: Hash,
        serial_hash: Hash,
        leader_id: Hash,
    ) -> Self {
        Ack {
            base: MessageBase::default(),
            timestamp,
            db_height,
            vm_index,
            list_height,
            message_hash,
            serial_hash,
            leader_id,
            signature: None,
        }
    }

    pub fn next_serial(prev_serial: &Hash, message_hash: &Hash) -> Hash {
        hash_pair(prev_serial, message_hash)
    }
}

impl Msg for Ack {
    const TYPE: MessageType = MessageType::Ack;

    fn base(&self) -> &MessageBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MessageBase {
        &mut self.base
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    fn set_signature(&mut self, sig: Signature) {
        self.signature = Some(sig);
    }

    fn signer_id(&self) -> Option<Hash> {
        Some(self.leader_id)
    }

    fn db_height(&self) -> Option<u32> {
        Some(self.db_height)
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_u32(buf, self.db_height);
        buf.push(self.vm_index);
        put_u32(buf, self.list_height);
        buf.extend_from_slice(self.message_hash.as_bytes());
        buf.extend_from_slice(self.serial_hash.as_bytes());
        buf.extend_from_slice(self.leader_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        Ok(Ack::new(
            timestamp,
            r.read_u32("ack db height")?,
            r.read_u8("ack vm index")?,
            r.read_u32("ack list height")?,
            r.read_hash("ack message hash")?,
            r.read_hash("ack serial hash")?,
            r.read_hash("ack leader id")?,
        ))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.db_height == other.db_height
            && self.vm_index == other.vm_index
            && self.list_height == other.list_height
            && self.message_hash == other.message_hash
            && self.serial_hash == other.serial_hash
            && self.leader_id == other.leader_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if let Some(v) = check_height(self, self.db_height, view) {
            return v;
        }
        if (self.vm_index as usize) >= view.vm_count(self.db_height) {
            return Validity::Invalid;
        }
        let cursor = view.lane_cursor(self.db_height, self.vm_index as usize) as u64;
        if u64::from(self.list_height) >= cursor + u64::from(view.ack_window()) {
            return Validity::Invalid;
        }
        if view.leader_of(self.db_height, self.vm_index as usize) != Some(self.leader_id) {
            return Validity::Invalid;
        }
        check_server_signature(self, view)
    }

    fn compute_vm_index(&self, _view: &dyn ConsensusView) -> usize {
        self.vm_index as usize
    }
}
