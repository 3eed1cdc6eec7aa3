//! Leader and follower execution, the per-height process pass and the
//! close/sign/record transitions.

use super::{Server, State};
use crate::error::{ChainError, Result};
use crate::messages::{
    Ack, AddServer, CommitChain, DBState, DirectoryBlockSignature, EndOfMinute, Heartbeat, Message,
    Msg, RemoveServer, ServerFault,
};
use crate::primitives::Timestamp;
use crate::process_list::{HeightStatus, Vm};
use std::time::Instant;
use tracing::{debug, error, info, warn};

impl State {
    /// Orders an acked message into the lane this server leads: assigns the
    /// next slot, signs the ack, broadcasts both and executes locally.
    pub(crate) fn leader_execute(&mut self, msg: Message) -> Result<()> {
        let h = self.leader_height;
        let vm_index = msg.compute_vm_index(&*self);
        let msg_hash = msg.get_msg_hash()?;

        let lane = match self.process_lists.get_mut(&h) {
            Some(pl) if pl.status == HeightStatus::Open => pl.vms.get_mut(vm_index),
            _ => None,
        };
        let Some(lane) = lane.filter(|lane| !lane.sealed) else {
            debug!(msg = %msg, dbheight = h, vm = vm_index, "lane closed, parked for next height");
            self.park(msg, Instant::now());
            return Ok(());
        };
        let (list_height, serial_hash) = lane.assign(&msg_hash);

        let mut ack = Ack::new(
            Timestamp::now(),
            h,
            vm_index as u8,
            list_height,
            msg_hash,
            serial_hash,
            self.identity,
        );
        ack.sign(&self.key)?;
        self.repeats.insert(ack.get_msg_hash()?);
        debug!(
            msg = %msg,
            dbheight = h,
            vm = vm_index,
            list_height,
            "leader ordered message"
        );

        self.send_out(msg.clone());
        self.send_out(ack.clone().into());
        self.place(ack, msg)
    }

    /// An acked message arrived; place it once its ack is known.
    pub(crate) fn follower_execute_msg(&mut self, msg: Message) -> Result<()> {
        let hash = msg.get_msg_hash()?;
        if let Some(ack) = self.pending_acks.remove(&hash) {
            return self.place(ack, msg);
        }
        debug!(msg = %msg, "waiting for ack");
        self.pending_msgs.insert(hash, msg);
        Ok(())
    }

    pub(crate) fn follower_execute_ack(&mut self, ack: Ack) -> Result<()> {
        if let Some(msg) = self.pending_msgs.remove(&ack.message_hash) {
            return self.place(ack, msg);
        }
        self.pending_acks.insert(ack.message_hash, ack);
        Ok(())
    }

    fn place(&mut self, ack: Ack, msg: Message) -> Result<()> {
        let h = ack.db_height;
        let vm_index = ack.vm_index as usize;
        let Some(lane) = self.lane_mut(h, vm_index) else {
            debug!(msg = %msg, dbheight = h, vm = vm_index, "no lane for ack, dropped");
            return Ok(());
        };
        let msg_hash = ack.message_hash;
        match lane.add(ack, msg) {
            Ok(true) => {
                self.unacked_rounds.remove(&msg_hash);
                self.process_height(h)
            }
            // repeat, or a conflicting placement that was refused
            Ok(false) | Err(_) => Ok(()),
        }
    }

    fn lane_mut(&mut self, db_height: u32, vm_index: usize) -> Option<&mut Vm> {
        self.process_lists.get_mut(&db_height)?.vms.get_mut(vm_index)
    }

    /// Runs every lane of `db_height` as far as its filled slots allow, then
    /// closes the height if all lanes are sealed.
    fn process_height(&mut self, db_height: u32) -> Result<()> {
        let vm_count = match self.process_lists.get(&db_height) {
            Some(pl) => pl.vm_count(),
            None => return Ok(()),
        };
        for vm_index in 0..vm_count {
            loop {
                let next = self
                    .process_lists
                    .get(&db_height)
                    .and_then(|pl| pl.vms.get(vm_index))
                    .and_then(Vm::next_ready)
                    .cloned();
                let Some(msg) = next else { break };
                if !msg.process(db_height, self)? {
                    break;
                }
                match self.lane_mut(db_height, vm_index) {
                    Some(lane) => lane.advance(),
                    None => break,
                }
            }
        }

        let ready_to_close = self
            .process_lists
            .get(&db_height)
            .map(|pl| pl.status == HeightStatus::Open && pl.all_sealed())
            .unwrap_or(false);
        if ready_to_close {
            self.close_height(db_height, false)?;
        }
        self.check_signatures(db_height)
    }

    pub(crate) fn process_eom(&mut self, db_height: u32, eom: &EndOfMinute) -> Result<bool> {
        let vm_index = eom.vm_index as usize;
        let Some(lane) = self.lane_mut(db_height, vm_index) else {
            return Ok(true);
        };
        if eom.minute < lane.minute {
            debug!(dbheight = db_height, vm = vm_index, minute = eom.minute, "stale minute skipped");
            return Ok(true);
        }
        lane.minute = eom.minute + 1;
        if eom.is_final_minute() {
            lane.sealed = true;
            debug!(dbheight = db_height, vm = vm_index, "lane sealed");
        } else {
            debug!(dbheight = db_height, vm = vm_index, minute = eom.minute, "minute ended");
        }
        Ok(true)
    }

    pub(crate) fn process_commit_chain(&mut self, db_height: u32, commit: &CommitChain) -> Result<bool> {
        self.db.put_commit(&commit.entry_hash, &commit.marshal_binary()?)?;
        if let Some(pl) = self.process_lists.get_mut(&db_height) {
            pl.record_payload(commit.clone().into())?;
        }
        debug!(
            dbheight = db_height,
            chain = %commit.chain_id_hash,
            entry = %commit.entry_hash,
            credits = commit.credits,
            "commit processed"
        );
        Ok(true)
    }

    pub(crate) fn process_add_server(&mut self, db_height: u32, add: &AddServer) -> Result<bool> {
        self.apply_add_server(add);
        if let Some(pl) = self.process_lists.get_mut(&db_height) {
            pl.record_payload(add.clone().into())?;
        }
        info!(
            dbheight = db_height,
            server = %add.server_id,
            role = ?add.role,
            "server added to roster"
        );
        Ok(true)
    }

    pub(crate) fn process_remove_server(&mut self, db_height: u32, remove: &RemoveServer) -> Result<bool> {
        self.apply_remove_server(remove);
        if let Some(pl) = self.process_lists.get_mut(&db_height) {
            pl.record_payload(remove.clone().into())?;
        }
        info!(dbheight = db_height, server = %remove.server_id, "server removed from roster");
        Ok(true)
    }

    fn apply_add_server(&mut self, add: &AddServer) {
        self.roster.add(Server::new(add.server_id, add.public_key, add.role));
    }

    fn apply_remove_server(&mut self, remove: &RemoveServer) {
        if self.roster.remove(&remove.server_id).is_none() {
            warn!(server = %remove.server_id, "removal of unknown server ignored");
        }
        self.faults.clear(&remove.server_id);
    }

    /// Builds the height's block and, on a federated server, signs it.
    fn close_height(&mut self, db_height: u32, forced: bool) -> Result<()> {
        let (prev_key_mr, prev_full_hash) = self.chain.prev_links();
        let fallback = self
            .chain
            .last()
            .map(|b| b.header.get_timestamp())
            .unwrap_or_else(Timestamp::now);
        let network_id = self.network_id;
        let identity = self.identity;

        let Some(pl) = self.process_lists.get_mut(&db_height) else {
            return Ok(());
        };
        let block = pl.build_block(network_id, prev_key_mr, prev_full_hash, fallback)?;
        let header = block.header.clone();
        let led_vm = pl.vm_led_by(&identity);
        pl.block = Some(block);
        pl.status = HeightStatus::Closing;
        pl.forced = forced;
        info!(
            dbheight = db_height,
            forced,
            entries = header.get_block_count(),
            "height closing"
        );

        let Some(vm_index) = led_vm else {
            return Ok(());
        };
        let header_signature = self.key.sign(&header.marshal_binary()?)?;
        let mut dbsig = DirectoryBlockSignature::new(
            Timestamp::now(),
            db_height,
            vm_index as u8,
            identity,
            header,
            header_signature,
        );
        dbsig.sign(&self.key)?;
        self.repeats.insert(dbsig.get_msg_hash()?);
        self.send_out(dbsig.clone().into());
        self.process_dbsig(dbsig)
    }

    pub(crate) fn process_dbsig(&mut self, sig: DirectoryBlockSignature) -> Result<()> {
        let h = sig.db_height;
        let server = sig.server_id;
        let Some(pl) = self.process_lists.get_mut(&h) else {
            debug!(dbheight = h, server = %server, "signature for a settled height ignored");
            return Ok(());
        };
        if !pl.add_dbsig(sig) {
            return Ok(());
        }
        debug!(dbheight = h, server = %server, signatures = pl.dbsigs.len(), "block signature collected");

        if pl.status == HeightStatus::Open && pl.quorum_header().is_some() {
            warn!(dbheight = h, "signature quorum before lanes sealed, closing height");
            self.close_height(h, true)?;
        }
        self.check_signatures(h)
    }

    /// Records the height once a quorum signed the local header.
    fn check_signatures(&mut self, db_height: u32) -> Result<()> {
        let Some(pl) = self.process_lists.get_mut(&db_height) else {
            return Ok(());
        };
        if pl.status != HeightStatus::Closing {
            return Ok(());
        }
        let Some(block) = pl.block.as_ref() else {
            return Ok(());
        };
        let local = block.header.hash()?;
        if pl.signatures_for(&local).len() >= pl.quorum() {
            pl.status = HeightStatus::Signed;
            return self.record_block(db_height);
        }

        let Some(signed) = pl.quorum_header() else {
            return Ok(());
        };
        let signed = signed.hash()?;
        if pl.forced {
            if !pl.needs_dbstate {
                warn!(
                    dbheight = db_height,
                    local = %local,
                    signed = %signed,
                    "forced close disagrees with signed header, waiting for dbstate"
                );
                pl.needs_dbstate = true;
            }
            return Ok(());
        }
        let reason = format!(
            "height {}: quorum signed header {} but local header is {}",
            db_height, signed, local
        );
        self.halt(reason)
    }

    fn halt(&mut self, reason: String) -> Result<()> {
        error!(
            leader_height = self.leader_height,
            reason = %reason,
            "block production halted"
        );
        self.halted = Some(reason.clone());
        Err(ChainError::ChainHalted(reason))
    }

    fn record_block(&mut self, db_height: u32) -> Result<()> {
        let Some(mut pl) = self.process_lists.remove(&db_height) else {
            return Ok(());
        };
        let Some(block) = pl.block.take() else {
            return Ok(());
        };
        let header_hash = block.header.hash()?;
        let sigs = pl
            .signatures_for(&header_hash)
            .into_iter()
            .map(|s| s.marshal_binary())
            .collect::<Result<Vec<_>>>()?;
        if let Err(e) = self.chain.apply_block(block.clone()) {
            return self.halt(format!("block {} does not extend the chain: {}", db_height, e));
        }

        let payload = pl
            .payload
            .iter()
            .map(Message::marshal_binary)
            .collect::<Result<Vec<_>>>()?;
        self.db.put_dblock(&block)?;
        for eblock in pl.new_eblocks.values() {
            self.db.put_eblock(db_height, eblock)?;
        }
        self.db.put_dblock_signatures(db_height, &sigs)?;
        self.db.put_dblock_payload(db_height, &payload)?;
        let key_mr = block.key_mr()?;
        info!(
            dbheight = db_height,
            key_mr = %key_mr,
            entries = block.entries.len(),
            signatures = sigs.len(),
            "directory block recorded"
        );
        self.advance_to(db_height);
        Ok(())
    }

    /// Moves past a recorded height and opens the next one.
    fn advance_to(&mut self, recorded: u32) {
        self.highest_recorded = Some(recorded);
        self.leader_height = recorded + 1;
        self.audit_heartbeats.clear();
        self.process_lists.retain(|&h, _| h > recorded);
        self.pending_acks.retain(|_, ack| ack.db_height > recorded);

        // unordered messages get another chance at the next height, up to
        // the retry limit counted in heights
        let now = Instant::now();
        let unordered: Vec<(_, Message)> = self.pending_msgs.drain().collect();
        for (hash, msg) in unordered {
            if matches!(&msg, Message::EndOfMinute(eom) if eom.db_height <= recorded) {
                self.unacked_rounds.remove(&hash);
                continue;
            }
            let rounds = {
                let rounds = self.unacked_rounds.entry(hash).or_insert(0);
                *rounds += 1;
                *rounds
            };
            if rounds >= self.consensus.max_validation_retries {
                warn!(msg = %msg, heights = rounds, "never acked, message dropped");
                self.discard(&msg);
                continue;
            }
            self.park(msg, now);
        }

        self.open_process_list(recorded + 1);
        self.height_advanced = true;
        info!(
            dbheight = recorded + 1,
            federated = self.roster.federated().len(),
            parked = self.holding.len(),
            "height opened"
        );
    }

    /// Applies a block recorded elsewhere without replaying its ordering:
    /// the block itself, then the roster changes and commits it carries.
    pub(crate) fn follower_execute_dbstate(&mut self, dbstate: DBState) -> Result<()> {
        let content = dbstate.content()?;
        let block = dbstate.directory_block;
        let h = block.db_height();
        self.chain.apply_block(block.clone())?;

        let header_hash = block.header.hash()?;
        let mut sigs = Vec::new();
        for sig in &dbstate.signatures {
            if sig.header.hash()? == header_hash {
                sigs.push(sig.marshal_binary()?);
            }
        }
        let mut payload = Vec::with_capacity(dbstate.payload.len());
        for msg in &dbstate.payload {
            match msg {
                Message::AddServer(add) => self.apply_add_server(add),
                Message::RemoveServer(remove) => self.apply_remove_server(remove),
                Message::CommitChain(commit) => {
                    self.db.put_commit(&commit.entry_hash, &commit.marshal_binary()?)?;
                }
                _ => {}
            }
            payload.push(msg.marshal_binary()?);
        }

        self.db.put_dblock(&block)?;
        for eblock in content.new_eblocks.values() {
            self.db.put_eblock(h, eblock)?;
        }
        self.db.put_dblock_signatures(h, &sigs)?;
        self.db.put_dblock_payload(h, &payload)?;
        info!(
            dbheight = h,
            signatures = sigs.len(),
            payload = payload.len(),
            "block applied from dbstate"
        );
        self.advance_to(h);
        Ok(())
    }

    pub(crate) fn process_heartbeat(&mut self, hb: Heartbeat) -> Result<()> {
        if self.audit_heartbeats.iter().any(|seen| seen.server_id == hb.server_id) {
            return Ok(());
        }
        debug!(server = %hb.server_id, dbheight = hb.db_height, "audit heartbeat");
        self.audit_heartbeats.push(hb);
        Ok(())
    }

    pub(crate) fn process_server_fault(&mut self, fault: ServerFault) -> Result<()> {
        let faulted = fault.faulted_id;
        let count = self.faults.record(faulted, fault.into());
        if count >= self.consensus.fault_threshold {
            warn!(server = %faulted, faults = count, "server past fault threshold");
        } else {
            debug!(server = %faulted, faults = count, "fault evidence recorded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::directory_block::DBlockHeader;
    use crate::error::ErrorKind;
    use crate::primitives::Hash;
    use crate::state::tests::solo_state;
    use crate::state::{ConsensusView, Disposition, ServerRole};

    #[test]
    fn test_follower_pairs_ack_in_either_order() {
        let (mut leader, mut rx, _) = solo_state();
        leader.end_minute().unwrap();
        let msg = rx.out.try_recv().unwrap();
        let ack = match rx.out.try_recv().unwrap() {
            Message::Ack(ack) => ack,
            other => panic!("expected ack, got {}", other),
        };

        // the ack first: nothing runs until the message shows up
        let (mut follower, _frx, _) = solo_state();
        follower.roster = leader.roster.clone();
        follower.process_lists.clear();
        follower.open_process_list(0);
        follower.follower_execute_ack(ack.clone()).unwrap();
        assert_eq!(follower.process_list(0).unwrap().vms[0].minute, 0);
        follower.follower_execute_msg(msg.clone()).unwrap();
        assert_eq!(follower.process_list(0).unwrap().vms[0].minute, 1);
        assert!(follower.pending_msgs.is_empty());
        assert!(follower.pending_acks.is_empty());
    }

    fn foreign_dbsig(state: &State, key: &KeyPair) -> DirectoryBlockSignature {
        let mut foreign = DBlockHeader::new();
        foreign.set_db_height(0);
        foreign.set_network_id(state.network_id());
        foreign.set_body_mr(Hash::sha256(b"elsewhere"));
        let header_signature = key.sign(&foreign.marshal_binary().unwrap()).unwrap();
        DirectoryBlockSignature::new(Timestamp::now(), 0, 0, state.identity(), foreign, header_signature)
    }

    #[test]
    fn test_conflicting_quorum_halts() {
        let (mut state, _rx, key) = solo_state();
        let (prev_key_mr, prev_full_hash) = state.chain.prev_links();
        let network_id = state.network_id();
        let pl = state.process_lists.get_mut(&0).unwrap();
        let block = pl
            .build_block(network_id, prev_key_mr, prev_full_hash, Timestamp::now())
            .unwrap();
        pl.block = Some(block);
        pl.status = HeightStatus::Closing;

        let sig = foreign_dbsig(&state, &key);
        let err = state.process_dbsig(sig).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ChainHalted);
        assert!(state.is_halted());
        assert!(state.chain().is_empty());
        let retry = state.retry_holding(Instant::now(), false);
        assert_eq!(retry.unwrap_err().kind(), ErrorKind::ChainHalted);
    }

    #[test]
    fn test_forced_close_mismatch_waits_for_dbstate() {
        let (mut state, _rx, key) = solo_state();
        let sig = foreign_dbsig(&state, &key);
        // an observer: it builds the block but never signs it
        state.identity = Hash::sha256(b"observer");
        state.process_dbsig(sig).unwrap();

        let pl = state.process_list(0).unwrap();
        assert_eq!(pl.status, HeightStatus::Closing);
        assert!(pl.forced);
        assert!(pl.needs_dbstate);
        assert!(!state.is_halted());
    }

    #[test]
    fn test_audit_heartbeats_reset_per_block() {
        let (mut state, _rx, _) = solo_state();
        let audit = KeyPair::generate().unwrap();
        let audit_id = Hash::sha256(&audit.public_key_bytes());
        state
            .roster
            .add(Server::new(audit_id, audit.public_key_bytes(), ServerRole::Audit));

        let mut hb = Heartbeat::new(Timestamp::now(), 0, audit_id);
        hb.sign(&audit).unwrap();
        assert_eq!(state.handle_message(hb.into()).unwrap(), Disposition::Executed);
        assert_eq!(state.promotion_candidates(), vec![audit_id]);
        assert_eq!(state.get_audit_heartbeats().len(), 1);

        for _ in 0..10 {
            state.end_minute().unwrap();
        }
        assert!(state.promotion_candidates().is_empty());
        assert!(state.get_audit_heartbeats().is_empty());
    }

    #[test]
    fn test_fault_evidence_accumulates() {
        let (mut state, _rx, _) = solo_state();
        let accused = state.identity();
        for i in 0..state.consensus.fault_threshold {
            let fault = ServerFault::new(Timestamp::from_millis(i as u64), 0, 0, accused, Hash::ZERO, accused);
            state.process_server_fault(fault).unwrap();
        }
        assert_eq!(state.get_fed_server_faults()[0].len(), state.consensus.fault_threshold);
        assert_eq!(state.servers_past_fault_threshold(), vec![accused]);
        assert!(state.is_federated(&accused));
    }

    fn unacked_commit() -> Message {
        let ec_key = KeyPair::generate().unwrap();
        CommitChain::new(Timestamp::from_millis(7), Hash::sha256(b"c"), Hash::sha256(b"e"), 5, &ec_key)
            .unwrap()
            .into()
    }

    #[test]
    fn test_unacked_message_dropped_after_retry_limit() {
        let (mut follower, _rx, _) = solo_state();
        let commit = unacked_commit();
        let repeat = commit.get_repeat_hash().unwrap();
        follower.repeats.insert(repeat);

        let limit = follower.consensus.max_validation_retries;
        for round in 0..limit {
            follower.follower_execute_msg(commit.clone()).unwrap();
            follower.advance_to(round);
            let reparked = follower.holding.take_due(Instant::now(), true);
            if round + 1 < limit {
                assert_eq!(reparked.len(), 1);
            } else {
                assert!(reparked.is_empty());
            }
        }
        assert!(follower.unacked_rounds.is_empty());
        assert!(follower.pending_msgs.is_empty());
        // dropped, so a fresh copy is not a repeat
        assert!(follower.repeats.insert(repeat));
    }

    #[test]
    fn test_placement_clears_unacked_count() {
        let (mut follower, _rx, _) = solo_state();
        let commit = unacked_commit();
        let hash = commit.get_msg_hash().unwrap();
        follower.follower_execute_msg(commit.clone()).unwrap();
        follower.advance_to(0);
        assert_eq!(follower.unacked_rounds.get(&hash), Some(&1));
        follower.holding.take_due(Instant::now(), true);

        follower.follower_execute_msg(commit).unwrap();
        let ack = Ack::new(
            Timestamp::now(),
            1,
            0,
            0,
            hash,
            Ack::next_serial(&Hash::ZERO, &hash),
            follower.identity(),
        );
        follower.follower_execute_ack(ack).unwrap();
        assert!(follower.unacked_rounds.is_empty());
        assert_eq!(follower.process_list(1).unwrap().commits.len(), 1);
    }
}
