use crate::crypto::{PublicKeyBytes, Signature};
use crate::error::Result;
use crate::messages::base::{check_server_signature, serialize_hex, vm_index_for_hash, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::{ConsensusView, ServerRole};
use serde::Serialize;

/// Adds a server to the roster, or moves it between the federated and
/// audit sets. Signed by a federated server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddServer {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "ServerID")]
    pub server_id: Hash,
    pub role: ServerRole,
    #[serde(serialize_with = "serialize_hex")]
    pub public_key: PublicKeyBytes,
    #[serde(rename = "SignerID")]
    pub signer_id: Hash,
    pub signature: Option<Signature>,
}

impl AddServer {
    pub fn new(
        timestamp: Timestamp,
        server_id: Hash,
        role: ServerRole,
        public_key: PublicKeyBytes,
        signer_id: Hash,
    ) -> Self {
        AddServer {
            base: MessageBase::default(),
            timestamp,
            server_id,
            role,
            public_key,
            signer_id,
            signature: None,
        }
    }
}

impl Msg for AddServer {
    const TYPE: MessageType = MessageType::AddServer;

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
        buf.push(self.role.to_byte());
        buf.extend_from_slice(&self.public_key);
        buf.extend_from_slice(self.signer_id.as_bytes());
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let server_id = r.read_hash("add server id")?;
        let role = ServerRole::from_byte(r.read_u8("add server role")?)?;
        let public_key = r.read_array("add server public key")?;
        let signer_id = r.read_hash("add server signer id")?;
        Ok(AddServer::new(timestamp, server_id, role, public_key, signer_id))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.server_id == other.server_id
            && self.role == other.role
            && self.public_key == other.public_key
            && self.signer_id == other.signer_id
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if !view.is_federated(&self.signer_id) {
            return Validity::Invalid;
        }
        if view.server_role(&self.server_id) == Some(self.role) {
            return Validity::Invalid;
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
    use crate::crypto::KeyPair;
    use crate::error::ErrorKind;
    use crate::state::view::testing::FixedView;

    fn signed_add(view: &FixedView, server_id: Hash, role: ServerRole) -> AddServer {
        let new_key = KeyPair::generate().unwrap();
        let mut add = AddServer::new(Timestamp::now(), server_id, role, new_key.public_key_bytes(), view.ids[0]);
        add.sign(&view.keys[0]).unwrap();
        add
    }

    #[test]
    fn test_marshal_unmarshal() {
        let view = FixedView::new(2, 0);
        let add = signed_add(&view, Hash::sha256(b"new"), ServerRole::Federated);
        let bytes = add.marshal_binary().unwrap();
        assert!(AddServer::unmarshal_binary(&bytes).unwrap().is_same_as(&add));
        assert_eq!(AddServer::unmarshal_binary(&[]).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_unknown_role_is_malformed() {
        let view = FixedView::new(2, 0);
        let mut bytes = signed_add(&view, Hash::sha256(b"new"), ServerRole::Audit)
            .marshal_binary()
            .unwrap();
        // tag, timestamp, server id, then the role byte
        bytes[1 + 6 + 32] = 9;
        assert_eq!(AddServer::unmarshal_binary(&bytes).unwrap_err().kind(), ErrorKind::Malformed);
    }

    #[test]
    fn test_validate() {
        let view = FixedView::new(2, 0);
        assert_eq!(signed_add(&view, Hash::sha256(b"new"), ServerRole::Audit).validate(&view), Validity::Valid);
        // already federated
        assert_eq!(signed_add(&view, view.ids[1], ServerRole::Federated).validate(&view), Validity::Invalid);
        // promotion of an audit server is a role change
        assert_eq!(signed_add(&view, view.audit_ids[0], ServerRole::Federated).validate(&view), Validity::Valid);

        let outsider = KeyPair::generate().unwrap();
        let mut add = AddServer::new(Timestamp::now(), Hash::sha256(b"x"), ServerRole::Audit, outsider.public_key_bytes(), view.audit_ids[0]);
        add.sign(&view.audit_keys[0]).unwrap();
        assert_eq!(add.validate(&view), Validity::Invalid);
    }
}
