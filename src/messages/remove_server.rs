use crate::crypto::Signature;
use crate::error::Result;
use crate::messages::base::{check_server_signature, vm_index_for_hash, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::{ConsensusView, ServerRole};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoveServer {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "ServerID")]
    pub server_id: Hash,
    #[serde(rename = "SignerID")]
    pub signer_id: Hash,
    pub signature: Option<Signature>,
}

impl RemoveServer {
    pub fn new(timestamp: Timestamp, server_id: Hash, signer_id: Hash) -> Self {
        RemoveServer {
            base: MessageBase::default(),
            timestamp,
            server_id,
            signer_id,
            signature: None,
        }
    }
}

impl Msg for RemoveServer {
    const TYPE: MessageType = MessageType::RemoveServer;

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

    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.server_id.as_bytes());
        buf.extend_from_slice(self.signer_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let server_id = r.read_hash("remove server id")?;
        let signer_id = r.read_hash("remove signer id")?;
        Ok(RemoveServer::new(timestamp, server_id, signer_id))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.server_id == other.server_id && self.signer_id == other.signer_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if !view.is_federated(&self.signer_id) {
            return Validity::Invalid;
        }
        match view.server_role(&self.server_id) {
            None => return Validity::Invalid,
            // the federated set never empties
            Some(ServerRole::Federated) if view.federated_count() <= 1 => return Validity::Invalid,
            Some(_) => {}
        }
        check_server_signature(self, view)
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

    fn signed_remove(view: &FixedView, server_id: Hash) -> RemoveServer {
        let mut rm = RemoveServer::new(Timestamp::now(), server_id, view.ids[0]);
        rm.sign(&view.keys[0]).unwrap();
        rm
    }

    #[test]
    fn test_marshal_unmarshal() {
        let view = FixedView::new(2, 0);
        let rm = signed_remove(&view, view.ids[1]);
        assert!(RemoveServer::unmarshal_binary(&rm.marshal_binary().unwrap()).unwrap().is_same_as(&rm));
        assert_eq!(RemoveServer::unmarshal_binary(&[]).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_validate() {
        let view = FixedView::new(2, 0);
        assert_eq!(signed_remove(&view, view.ids[1]).validate(&view), Validity::Valid);
        assert_eq!(signed_remove(&view, view.audit_ids[0]).validate(&view), Validity::Valid);
        assert_eq!(signed_remove(&view, Hash::sha256(b"unknown")).validate(&view), Validity::Invalid);

        let single = FixedView::new(1, 0);
        assert_eq!(signed_remove(&single, single.ids[0]).validate(&single), Validity::Invalid);
    }
}
