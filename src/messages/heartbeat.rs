use crate::crypto::Signature;
use crate::error::Result;
use crate::messages::base::{check_height, check_server_signature, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::codec::put_u32;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::ConsensusView;
use serde::Serialize;

/// Liveness signal from a roster server, mostly audit servers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Heartbeat {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "ServerID")]
    pub server_id: Hash,
    pub signature: Option<Signature>,
}

impl Heartbeat {
    pub fn new(timestamp: Timestamp, db_height: u32, server_id: Hash) -> Self {
        Heartbeat {
            base: MessageBase::default(),
            timestamp,
            db_height,
            server_id,
            signature: None,
        }
    }
}

impl Msg for Heartbeat {
    const TYPE: MessageType = MessageType::Heartbeat;

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
        put_u32(buf, self.db_height);
        buf.extend_from_slice(self.server_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let db_height = r.read_u32("heartbeat db height")?;
        let server_id = r.read_hash("heartbeat server id")?;
        Ok(Heartbeat::new(timestamp, db_height, server_id))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.db_height == other.db_height && self.server_id == other.server_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if view.server_role(&self.server_id).is_none() {
            return Validity::Invalid;
        }
        if let Some(v) = check_height(self, self.db_height, view) {
            return v;
        }
        check_server_signature(self, view)
    }

    fn compute_vm_index(&self, _view: &dyn ConsensusView) -> usize {
        0
    }
}
