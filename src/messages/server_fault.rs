use crate::crypto::Signature;
use crate::error::Result;
use crate::messages::base::{check_server_signature, check_signature_sound, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::codec::put_u32;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::ConsensusView;
use serde::Serialize;

/// Evidence, signed by a federated server, that another federated server
/// failed its lane and which audit server should replace it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerFault {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "VMIndex")]
    pub vm_index: u8,
    #[serde(rename = "FaultedID")]
    pub faulted_id: Hash,
    #[serde(rename = "AuditID")]
    pub audit_id: Hash,
    #[serde(rename = "SignerID")]
    pub signer_id: Hash,
    pub signature: Option<Signature>,
}

impl ServerFault {
    pub fn new(
        timestamp: Timestamp,
        db_height: u32,
        vm_index: u8,
        faulted_id: Hash,
        audit_id: Hash,
        signer_id: Hash,
    ) -> Self {
        ServerFault {
            base: MessageBase::default(),
            timestamp,
            db_height,
            vm_index,
            faulted_id,
            audit_id,
            signer_id,
            signature: None,
        }
    }
}

impl Msg for ServerFault {
    const TYPE: MessageType = MessageType::ServerFault;

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
        buf.extend_from_slice(self.faulted_id.as_bytes());
        buf.extend_from_slice(self.audit_id.as_bytes());
        buf.extend_from_slice(self.signer_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        Ok(ServerFault::new(
            timestamp,
            r.read_u32("fault db height")?,
            r.read_u8("fault vm index")?,
            r.read_hash("fault faulted id")?,
            r.read_hash("fault audit id")?,
            r.read_hash("fault signer id")?,
        ))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.db_height == other.db_height
            && self.vm_index == other.vm_index
            && self.faulted_id == other.faulted_id
            && self.audit_id == other.audit_id
            && self.signer_id == other.signer_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if !view.is_federated(&self.signer_id) {
            return Validity::Invalid;
        }
        if !view.is_federated(&self.faulted_id) || !view.is_audit(&self.audit_id) {
            return Validity::Invalid;
        }
        if let Some(v) = check_signature_sound(self, view) {
            return v;
        }
        if self.db_height > view.leader_height() {
            return Validity::Indeterminate;
        }
        check_server_signature(self, view)
    }

    fn compute_vm_index(&self, _view: &dyn ConsensusView) -> usize {
        self.vm_index as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::state::view::testing::FixedView;

    fn signed_fault(view: &FixedView, signer: usize, faulted: Hash) -> ServerFault {
        let mut fault = ServerFault::new(
            Timestamp::now(),
            view.leader_height,
            0,
            faulted,
            view.audit_ids[0],
            view.ids[signer],
        );
        fault.sign(&view.keys[signer]).unwrap();
        fault
    }

    #[test]
    fn test_marshal_unmarshal() {
        let view = FixedView::new(3, 0);
        let fault = signed_fault(&view, 0, view.ids[1]);
        let decoded = ServerFault::unmarshal_binary(&fault.marshal_binary().unwrap()).unwrap();
        assert!(decoded.is_same_as(&fault));
        assert_eq!(ServerFault::unmarshal_binary(&[]).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_validate() {
        let view = FixedView::new(3, 0);
        assert_eq!(signed_fault(&view, 0, view.ids[1]).validate(&view), Validity::Valid);
        // faulted server unknown
        assert_eq!(
            signed_fault(&view, 0, Hash::sha256(b"nobody")).validate(&view),
            Validity::Invalid
        );

        let mut future = signed_fault(&view, 0, view.ids[1]);
        future.db_height = 4;
        future.sign(&view.keys[0]).unwrap();
        assert_eq!(future.validate(&view), Validity::Indeterminate);
    }
}
