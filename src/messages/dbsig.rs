use crate::crypto::{Signature, SIGNATURE_LENGTH};
use crate::directory_block::header::HEADER_LENGTH;
use crate::directory_block::DBlockHeader;
use crate::error::Result;
use crate::messages::base::{check_height, check_server_signature, MessageBase, Msg};
use crate::messages::{MessageType, Validity};
use crate::primitives::codec::put_u32;
use crate::primitives::{Hash, Reader, Timestamp};
use crate::state::ConsensusView;
use serde::Serialize;

/// A federated server's signature over the directory block header it built.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DirectoryBlockSignature {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    #[serde(rename = "DBHeight")]
    pub db_height: u32,
    #[serde(rename = "VMIndex")]
    pub vm_index: u8,
    #[serde(rename = "ServerID")]
    pub server_id: Hash,
    #[serde(rename = "DirectoryBlockHeader")]
    pub header: DBlockHeader,
    #[serde(rename = "DBSignature")]
    pub header_signature: Signature,
    pub signature: Option<Signature>,
}

impl DirectoryBlockSignature {
    pub fn new(
        timestamp: Timestamp,
        db_height: u32,
        vm_index: u8,
        server_id: Hash,
        header: DBlockHeader,
        header_signature: Signature,
    ) -> Self {
        DirectoryBlockSignature {
            base: MessageBase::default(),
            timestamp,
            db_height,
            vm_index,
            server_id,
            header,
            header_signature,
            signature: None,
        }
    }

    /// The header signature verifies under `key`.
    pub fn header_signed_by(&self, key: &[u8]) -> bool {
        if self.header_signature.public_key.as_slice() != key {
            return false;
        }
        match self.header.marshal_binary() {
            Ok(data) => self.header_signature.verify(&data).is_ok(),
            Err(_) => false,
        }
    }
}

impl Msg for DirectoryBlockSignature {
    const TYPE: MessageType = MessageType::DirectoryBlockSignature;

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
        buf.push(self.vm_index);
        buf.extend_from_slice(self.server_id.as_bytes());
        buf.extend_from_slice(&self.header.marshal_binary()?);
        buf.extend_from_slice(&self.header_signature.marshal_binary()?);
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let db_height = r.read_u32("dbsig db height")?;
        let vm_index = r.read_u8("dbsig vm index")?;
        let server_id = r.read_hash("dbsig server id")?;
        let (header, _) =
            DBlockHeader::unmarshal_binary_data(r.read_bytes(HEADER_LENGTH, "dbsig header")?)?;
        let (header_signature, _) = Signature::unmarshal_binary_data(
            r.read_bytes(SIGNATURE_LENGTH, "dbsig header signature")?,
        )?;
        Ok(DirectoryBlockSignature::new(
            timestamp,
            db_height,
            vm_index,
            server_id,
            header,
            header_signature,
        ))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.db_height == other.db_height
            && self.vm_index == other.vm_index
            && self.server_id == other.server_id
            && self.header.is_same_as(&other.header)
            && self.header_signature.is_same_as(&other.header_signature)
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        if !view.is_federated(&self.server_id) {
            return Validity::Invalid;
        }
        if let Some(v) = check_height(self, self.db_height, view) {
            return v;
        }
        if self.header.get_db_height() != self.db_height
            || self.header.get_network_id() != view.network_id()
        {
            return Validity::Invalid;
        }
        match view.server_key(&self.server_id) {
            Some(key) if self.header_signed_by(&key) => {}
            _ => return Validity::Invalid,
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
    use crate::messages::Message;
    use crate::state::view::testing::FixedView;

    fn signed_dbsig(view: &FixedView, server: usize, header: &DBlockHeader) -> DirectoryBlockSignature {
        let key = &view.keys[server];
        let header_sig = key.sign(&header.marshal_binary().unwrap()).unwrap();
        let mut sig = DirectoryBlockSignature::new(
            Timestamp::now(),
            header.get_db_height(),
            0,
            view.ids[server],
            header.clone(),
            header_sig,
        );
        sig.sign(key).unwrap();
        sig
    }

    fn header_at(view: &FixedView, height: u32) -> DBlockHeader {
        let mut header = DBlockHeader::new();
        header.set_db_height(height);
        header.set_network_id(view.network_id);
        header
    }

    #[test]
    fn test_marshal_unmarshal() {
        let view = FixedView::new(3, 2);
        let sig = signed_dbsig(&view, 1, &header_at(&view, 2));
        let bytes = sig.marshal_binary().unwrap();
        let decoded = DirectoryBlockSignature::unmarshal_binary(&bytes).unwrap();
        assert!(decoded.is_same_as(&sig));

        let via_enum = Message::unmarshal_binary(&bytes).unwrap();
        assert!(via_enum.is_same_as(&Message::DirectoryBlockSignature(sig)));
    }

    #[test]
    fn test_unmarshal_nil_and_truncated_header() {
        assert_eq!(
            DirectoryBlockSignature::unmarshal_binary(&[]).unwrap_err().kind(),
            ErrorKind::Malformed
        );
        let view = FixedView::new(3, 2);
        let bytes = signed_dbsig(&view, 1, &header_at(&view, 2)).marshal_binary().unwrap();
        assert!(DirectoryBlockSignature::unmarshal_binary(&bytes[..100]).is_err());
    }

    #[test]
    fn test_validate() {
        let view = FixedView::new(3, 2);
        assert_eq!(signed_dbsig(&view, 0, &header_at(&view, 2)).validate(&view), Validity::Valid);
        assert_eq!(signed_dbsig(&view, 0, &header_at(&view, 1)).validate(&view), Validity::Invalid);
        assert_eq!(
            signed_dbsig(&view, 0, &header_at(&view, 3)).validate(&view),
            Validity::Indeterminate
        );

        let mut foreign = header_at(&view, 2);
        foreign.set_network_id(view.network_id + 1);
        assert_eq!(signed_dbsig(&view, 0, &foreign).validate(&view), Validity::Invalid);

        // header signed with a different server's key
        let mut swapped = signed_dbsig(&view, 0, &header_at(&view, 2));
        swapped.header_signature = view.keys[1]
            .sign(&swapped.header.marshal_binary().unwrap())
            .unwrap();
        swapped.sign(&view.keys[0]).unwrap();
        assert_eq!(swapped.validate(&view), Validity::Invalid);
    }
}
