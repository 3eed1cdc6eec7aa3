use crate::directory_block::DirectoryBlock;
use crate::error::{ChainError, Result};
use crate::messages::base::{MessageBase, Msg};
use crate::messages::{DirectoryBlockSignature, Message, MessageType, Validity};
use crate::primitives::codec::{put_u32, put_var_bytes};
use crate::primitives::{Reader, Timestamp};
use crate::process_list::ProcessList;
use crate::state::ConsensusView;
use serde::Serialize;
use std::collections::HashSet;

/// A recorded block with the signatures that finalized it, sent to nodes
/// that fell behind so they can apply it without replaying its messages.
///
/// The roster changes and commits the block's body commits to travel
/// along as `payload`, so the receiver ends up with the same roster and
/// entry blocks as the servers that built it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DBState {
    #[serde(skip)]
    pub base: MessageBase,
    pub timestamp: Timestamp,
    pub directory_block: DirectoryBlock,
    pub signatures: Vec<DirectoryBlockSignature>,
    pub payload: Vec<Message>,
}

impl DBState {
    pub fn new(timestamp: Timestamp, directory_block: DirectoryBlock, signatures: Vec<DirectoryBlockSignature>) -> Self {
        DBState {
            base: MessageBase::default(),
            timestamp,
            directory_block,
            signatures,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<Message>) -> Self {
        self.payload = payload;
        self
    }

    /// Replays the payload into a scratch process list. Fails when the
    /// payload holds anything besides roster changes and commits.
    pub fn content(&self) -> Result<ProcessList> {
        let mut pl = ProcessList::new(self.directory_block.db_height(), Vec::new());
        for msg in &self.payload {
            pl.record_payload(msg.clone())?;
        }
        Ok(pl)
    }

    /// Whether the payload rebuilds exactly the block's body.
    pub fn payload_matches_body(&self) -> bool {
        match self.content() {
            Ok(pl) => pl.body_entries() == self.directory_block.entries,
            Err(_) => false,
        }
    }

    /// Distinct federated servers whose signature covers this block's header.
    pub fn valid_signer_count(&self, view: &dyn ConsensusView) -> usize {
        let mut signers = HashSet::new();
        for sig in &self.signatures {
            if !view.is_federated(&sig.server_id) || !sig.header.is_same_as(&self.directory_block.header) {
                continue;
            }
            match view.server_key(&sig.server_id) {
                Some(key) if sig.header_signed_by(&key) => {
                    signers.insert(sig.server_id);
                }
                _ => {}
            }
        }
        signers.len()
    }
}

impl Msg for DBState {
    const TYPE: MessageType = MessageType::DBState;
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

    fn db_height(&self) -> Option<u32> {
        Some(self.directory_block.db_height())
    }

    fn write_fields(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_var_bytes(buf, &self.directory_block.marshal_binary()?)?;
        let count = u8::try_from(self.signatures.len())
            .map_err(|_| ChainError::malformed("too many signatures in DBState"))?;
        buf.push(count);
        for sig in &self.signatures {
            put_var_bytes(buf, &sig.marshal_binary()?)?;
        }
        let count = u32::try_from(self.payload.len())
            .map_err(|_| ChainError::malformed("too many payload messages in DBState"))?;
        put_u32(buf, count);
        for msg in &self.payload {
            put_var_bytes(buf, &msg.marshal_binary()?)?;
        }
        Ok(())
    }

    fn read_fields(r: &mut Reader<'_>, timestamp: Timestamp) -> Result<Self> {
        let directory_block = DirectoryBlock::unmarshal_binary(r.read_var_bytes("dbstate block")?)?;
        let count = r.read_u8("dbstate signature count")?;
        let mut signatures = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let bytes = r.read_var_bytes("dbstate signature")?;
            signatures.push(DirectoryBlockSignature::unmarshal_binary(bytes)?);
        }
        let count = r.read_u32("dbstate payload count")?;
        let mut payload = Vec::new();
        for _ in 0..count {
            let bytes = r.read_var_bytes("dbstate payload message")?;
            payload.push(Message::unmarshal_binary(bytes)?);
        }
        Ok(DBState::new(timestamp, directory_block, signatures).with_payload(payload))
    }

    fn fields_same_as(&self, other: &Self) -> bool {
        self.directory_block.is_same_as(&other.directory_block)
            && self.signatures.len() == other.signatures.len()
            && self
                .signatures
                .iter()
                .zip(other.signatures.iter())
                .all(|(a, b)| a.is_same_as(b))
            && self.payload.len() == other.payload.len()
            && self
                .payload
                .iter()
                .zip(other.payload.iter())
                .all(|(a, b)| a.is_same_as(b))
    }

    fn validate(&self, view: &dyn ConsensusView) -> Validity {
        let height = self.directory_block.db_height();
        let next = view.highest_recorded_block().map_or(0, |h| h + 1);
        if height < next {
            return Validity::Invalid;
        }
        if height > next {
            return Validity::Indeterminate;
        }
        if view.check_block_linkage(&self.directory_block).is_err() {
            return Validity::Invalid;
        }
        if self.valid_signer_count(view) < view.fed_quorum() {
            return Validity::Invalid;
        }
        if !self.payload_matches_body() {
            return Validity::Invalid;
        }
        Validity::Valid
    }

    fn compute_vm_index(&self, _view: &dyn ConsensusView) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::directory_block::DBlockHeader;
    use crate::error::ErrorKind;
    use crate::messages::RemoveServer;
    use crate::primitives::Hash;
    use crate::state::view::testing::FixedView;

    fn block_at(view: &FixedView, height: u32) -> DirectoryBlock {
        block_with_body(view, height, vec![])
    }

    fn block_with_body(view: &FixedView, height: u32, entries: Vec<crate::directory_block::DBEntry>) -> DirectoryBlock {
        let (prev_key_mr, prev_full_hash) = view.chain.prev_links();
        let mut header = DBlockHeader::new();
        header.set_db_height(height);
        header.set_network_id(view.network_id);
        header.set_prev_key_mr(prev_key_mr);
        header.set_prev_full_hash(prev_full_hash);
        DirectoryBlock::new(header, entries).unwrap()
    }

    fn sign_block(block: &DirectoryBlock, id: Hash, key: &KeyPair) -> DirectoryBlockSignature {
        let header_sig = key.sign(&block.header.marshal_binary().unwrap()).unwrap();
        let mut sig = DirectoryBlockSignature::new(Timestamp::now(), block.db_height(), 0, id, block.header.clone(), header_sig);
        sig.sign(key).unwrap();
        sig
    }

    fn dbstate(view: &FixedView, height: u32, signers: usize) -> DBState {
        let block = block_at(view, height);
        let sigs = (0..signers).map(|i| sign_block(&block, view.ids[i], &view.keys[i])).collect();
        DBState::new(Timestamp::now(), block, sigs)
    }

    #[test]
    fn test_marshal_unmarshal() {
        let view = FixedView::new(3, 0);
        let state = dbstate(&view, 0, 2);
        let bytes = state.marshal_binary().unwrap();
        let decoded = DBState::unmarshal_binary(&bytes).unwrap();
        assert!(decoded.is_same_as(&state));
        assert_eq!(DBState::unmarshal_binary(&[]).unwrap_err().kind(), ErrorKind::Malformed);
        assert!(DBState::unmarshal_binary(&bytes[..bytes.len() - 5]).is_err());
    }

    #[test]
    fn test_validate_heights() {
        let view = FixedView::new(3, 0);
        assert_eq!(dbstate(&view, 0, 2).validate(&view), Validity::Valid);
        assert_eq!(dbstate(&view, 1, 2).validate(&view), Validity::Indeterminate);
    }

    #[test]
    fn test_requires_quorum() {
        let view = FixedView::new(3, 0);
        assert_eq!(dbstate(&view, 0, 1).validate(&view), Validity::Invalid);

        // duplicate signatures from one server count once
        let mut state = dbstate(&view, 0, 1);
        state.signatures.push(state.signatures[0].clone());
        assert_eq!(state.validate(&view), Validity::Invalid);
    }

    #[test]
    fn test_rejects_broken_linkage() {
        let view = FixedView::new(3, 0);
        let mut block = block_at(&view, 0);
        block.header.set_prev_key_mr(Hash::sha256(b"fork"));
        let sigs = (0..3).map(|i| sign_block(&block, view.ids[i], &view.keys[i])).collect();
        let state = DBState::new(Timestamp::now(), block, sigs);
        assert_eq!(state.validate(&view), Validity::Invalid);
    }

    fn admin_payload(view: &FixedView) -> Vec<Message> {
        let mut rm = RemoveServer::new(Timestamp::from_millis(5), view.audit_ids[0], view.ids[0]);
        rm.sign(&view.keys[0]).unwrap();
        vec![rm.into()]
    }

    fn dbstate_with_payload(view: &FixedView, payload: Vec<Message>) -> DBState {
        let mut pl = ProcessList::new(0, Vec::new());
        for msg in &payload {
            pl.record_payload(msg.clone()).unwrap();
        }
        let block = block_with_body(view, 0, pl.body_entries());
        let sigs = (0..2).map(|i| sign_block(&block, view.ids[i], &view.keys[i])).collect();
        DBState::new(Timestamp::now(), block, sigs).with_payload(payload)
    }

    #[test]
    fn test_payload_must_rebuild_body() {
        let view = FixedView::new(3, 0);
        let state = dbstate_with_payload(&view, admin_payload(&view));
        assert_eq!(state.validate(&view), Validity::Valid);

        let decoded = DBState::unmarshal_binary(&state.marshal_binary().unwrap()).unwrap();
        assert!(decoded.is_same_as(&state));
        assert_eq!(decoded.validate(&view), Validity::Valid);

        // the signed body names an admin entry the payload no longer backs
        let mut stripped = state.clone();
        stripped.payload.clear();
        assert_eq!(stripped.validate(&view), Validity::Invalid);

        let mut swapped = state;
        let mut other = RemoveServer::new(Timestamp::from_millis(6), view.audit_ids[0], view.ids[0]);
        other.sign(&view.keys[0]).unwrap();
        swapped.payload = vec![other.into()];
        assert_eq!(swapped.validate(&view), Validity::Invalid);
    }

    #[test]
    fn test_payload_holds_only_block_content() {
        let view = FixedView::new(3, 0);
        let mut state = dbstate(&view, 0, 2);
        let mut hb = crate::messages::Heartbeat::new(Timestamp::now(), 0, view.audit_ids[0]);
        hb.sign(&view.audit_keys[0]).unwrap();
        state.payload.push(hb.into());
        assert!(state.content().is_err());
        assert_eq!(state.validate(&view), Validity::Invalid);
    }
}
