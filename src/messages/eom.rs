use crate::crypto::Signature;
use crate::error::Result;
use crate::messages::base::{check_height, check_server_signature, MessageBase, Msg};
use crate::messages::{MessageType, Validity, MINUTES_PER_BLOCK};
use crate::primitives::codec::put_u32;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::ConsensusView;
use serde::Serialize;

/// A lane leader's declaration that one minute of its lane is complete.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EndOfMinute {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    pub minute: u8,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "VMIndex")]
    pub vm_index: u8,
    #[serde(rename = "ServerID")]
    pub server_id: Hash,
    pub signature: Option<Signature>,
}

impl EndOfMinute {
    pub fn new(timestamp: Timestamp, minute: u8, db_height: u32, vm_index: u8, server_id: Hash) -> Self {
        EndOfMinute {
            base: MessageBase::default(),
            timestamp,
            minute,
            db_height,
            vm_index,
            server_id,
            signature: None,
        }
    }

    /// The EOM that closes the last minute and seals its lane.
    pub fn is_final_minute(&self) -> bool {
        self.minute + 1 >= MINUTES_PER_BLOCK
    }
}

impl Msg for EndOfMinute {
    const TYPE: MessageType = MessageType::EndOfMinute;

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
        Some(self.server_id)
    }

    fn db_height(&self) -> Option<u32> {
        Some(self.db_height)
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(self.minute);
        put_u32(buf, self.db_height);
        buf.push(self.vm_index);
        buf.extend_from_slice(self.server_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let minute = r.read_u8("eom minute")?;
        let db_height = r.read_u32("eom db height")?;
        let vm_index = r.read_u8("eom vm index")?;
        let server_id = r.read_hash("eom server id")?;
        Ok(EndOfMinute::new(timestamp, minute, db_height, vm_index, server_id))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.minute == other.minute
            && self.db_height == other.db_height
            && self.vm_index == other.vm_index
            && self.server_id == other.server_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if self.minute >= MINUTES_PER_BLOCK {
            return Validity::Invalid;
        }
        if let Some(v) = check_height(self, self.db_height, view) {
            return v;
        }
        if view.leader_of(self.db_height, self.vm_index as usize) != Some(self.server_id) {
            return Validity::Invalid;
        }
        check_server_signature(self, view)
    }

    fn compute_vm_index(&self, _view: &dyn ConsensusView) -> usize {
        self.vm_index as usize
    }
}
