use crate::crypto::Signature;
use crate::error::Result;
use crate::messages::base::{check_height, check_server_signature, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::codec::put_u32;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::process_list::HeightStatus;
use crate::state::ConsensusView;
use serde::Serialize;

/// Reports that a federated server did not sign a closing height in time.
/// Only validated; it has no effect on execution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SignatureTimeout {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "VMIndex")]
    pub vm_index: u8,
    #[serde(rename = "ServerID")]
    pub server_id: Hash,
    #[serde(rename = "SignerID")]
    pub signer_id: Hash,
    pub signature: Option<Signature>,
}

impl SignatureTimeout {
    pub fn new(timestamp: Timestamp, db_height: u32, vm_index: u8, server_id: Hash, signer_id: Hash) -> Self {
        SignatureTimeout {
            base: MessageBase::default(),
            timestamp,
            db_height,
            vm_index,
            server_id,
            signer_id,
            signature: None,
        }
    }
}

impl Msg for SignatureTimeout {
    const TYPE: MessageType = MessageType::SignatureTimeout;

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
        Some(self.signer_id)
    }

    fn db_height(&self) -> Option<u32> {
        Some(self.db_height)
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_u32(buf, self.db_height);
        buf.push(self.vm_index);
        buf.extend_from_slice(self.server_id.as_bytes());
        buf.extend_from_slice(self.signer_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        Ok(SignatureTimeout::new(
            timestamp,
            r.read_u32("timeout db height")?,
            r.read_u8("timeout vm index")?,
            r.read_hash("timeout server id")?,
            r.read_hash("timeout signer id")?,
        ))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.db_height == other.db_height
            && self.vm_index == other.vm_index
            && self.server_id == other.server_id
            && self.signer_id == other.signer_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if !view.is_federated(&self.signer_id) {
            return Validity::Invalid;
        }
        if let Some(v) = check_height(self, self.db_height, view) {
            return v;
        }
        if view.height_status(self.db_height) != Some(HeightStatus::Closing) {
            return Validity::Indeterminate;
        }
        check_server_signature(self, view)
    }

    fn compute_vm_index(&self, _view: &dyn ConsensusView) -> usize {
        self.vm_index as usize
    }
}
