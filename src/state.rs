//! The consensus state: roster, process lists, recorded chain and the
//! queues around them.
//!
//! Every message enters through [`State::handle_message`], which filters
//! repeats, validates against the current view and then either executes,
//! parks or rejects the message. Execution itself lives in `execute`.

mod execute;
pub mod faults;
pub mod holding;
pub mod roster;
pub mod view;

pub use faults::FaultLists;
pub use holding::Holding;
pub use roster::{Roster, Server, ServerRole};
pub use view::ConsensusView;

use crate::cache::RepeatCache;
use crate::config::{Config, ConsensusConfig};
use crate::crypto::{KeyPair, PublicKeyBytes};
use crate::directory_block::{DirectoryBlock, DirectoryChain};
use crate::error::{ChainError, Result};
use crate::messages::{Ack, CommitChain, DBState, DirectoryBlockSignature, Heartbeat, Message, Msg, Validity};
use crate::persistence::Database;
use crate::primitives::{Hash, Timestamp};
use crate::process_list::{HeightStatus, ProcessList};
use crate::queues::OutboundQueues;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What [`State::handle_message`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Executed,
    /// Undecidable for now; held for a retry.
    Parked,
    /// Failed validation and was handed to the invalid queue.
    Rejected,
    /// Seen before.
    Duplicate,
}

/// Everything a [`State`] needs besides its database and queues.
#[derive(Debug, Clone)]
pub struct StateSettings {
    pub identity: Hash,
    pub key: KeyPair,
    pub network_id: u32,
    pub consensus: ConsensusConfig,
    pub roster: Roster,
}

impl StateSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let mut servers = Vec::new();
        for entry in &config.federated {
            let (id, key) = entry.parse()?;
            servers.push(Server::new(id, key, ServerRole::Federated));
        }
        for entry in &config.audit {
            let (id, key) = entry.parse()?;
            servers.push(Server::new(id, key, ServerRole::Audit));
        }
        Ok(StateSettings {
            identity: config.identity()?,
            key: config.key_pair()?,
            network_id: config.network_id()?,
            consensus: config.consensus.clone(),
            roster: Roster::new(servers),
        })
    }
}

pub struct State {
    identity: Hash,
    key: KeyPair,
    network_id: u32,
    consensus: ConsensusConfig,

    roster: Roster,
    faults: FaultLists,
    /// Audit heartbeats seen since the last recorded block.
    audit_heartbeats: Vec<Heartbeat>,

    process_lists: BTreeMap<u32, ProcessList>,
    chain: DirectoryChain,
    db: Box<dyn Database>,

    queues: OutboundQueues,
    holding: Holding,
    repeats: RepeatCache,
    /// Acked messages waiting for their ack, by message hash.
    pending_msgs: HashMap<Hash, Message>,
    /// Acks waiting for their message, by message hash.
    pending_acks: HashMap<Hash, Ack>,
    /// Heights an acked-lane message has waited without an ack.
    unacked_rounds: HashMap<Hash, u32>,

    leader_height: u32,
    highest_recorded: Option<u32>,
    halted: Option<String>,
    height_advanced: bool,
}

impl State {
    /// Builds the state on top of whatever `db` has already recorded.
    pub fn new(settings: StateSettings, db: Box<dyn Database>, queues: OutboundQueues) -> Result<Self> {
        let mut chain = DirectoryChain::new();
        for block in db.load_dblocks()? {
            chain.apply_block(block)?;
        }
        let highest_recorded = chain.next_height().checked_sub(1);
        let leader_height = chain.next_height();

        let mut state = State {
            identity: settings.identity,
            key: settings.key,
            network_id: settings.network_id,
            holding: Holding::new(
                settings.consensus.max_validation_retries,
                Duration::from_millis(settings.consensus.retry_backoff_ms),
                settings.consensus.queue_capacity,
            ),
            repeats: RepeatCache::new(settings.consensus.repeat_cache_size),
            consensus: settings.consensus,
            roster: settings.roster,
            faults: FaultLists::new(),
            audit_heartbeats: Vec::new(),
            process_lists: BTreeMap::new(),
            chain,
            db,
            queues,
            pending_msgs: HashMap::new(),
            pending_acks: HashMap::new(),
            unacked_rounds: HashMap::new(),
            leader_height,
            highest_recorded,
            halted: None,
            height_advanced: false,
        };
        state.open_process_list(leader_height);
        info!(
            identity = %state.identity,
            dbheight = leader_height,
            federated = state.roster.federated().len(),
            audit = state.roster.audit().len(),
            "state initialized"
        );
        Ok(state)
    }

    pub fn identity(&self) -> Hash {
        self.identity
    }

    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn chain(&self) -> &DirectoryChain {
        &self.chain
    }

    pub fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn process_list(&self, db_height: u32) -> Option<&ProcessList> {
        self.process_lists.get(&db_height)
    }

    pub fn holding_len(&self) -> usize {
        self.holding.len()
    }

    pub fn directory_block_seconds(&self) -> u64 {
        self.consensus.directory_block_seconds
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.consensus.retry_backoff_ms)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some(reason) => Err(ChainError::ChainHalted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Validates and executes one inbound or locally produced message.
    pub fn handle_message(&mut self, msg: Message) -> Result<Disposition> {
        self.ensure_running()?;
        let repeat_hash = msg.get_repeat_hash()?;
        if !self.repeats.insert(repeat_hash) {
            debug!(msg = %msg, "repeat dropped");
            return Ok(Disposition::Duplicate);
        }

        let disposition = self.dispatch(msg, Instant::now())?;
        self.drain_after_advance()?;
        Ok(disposition)
    }

    fn dispatch(&mut self, msg: Message, now: Instant) -> Result<Disposition> {
        match msg.validate(&*self) {
            Validity::Valid => {
                self.execute(msg)?;
                Ok(Disposition::Executed)
            }
            Validity::Indeterminate => {
                debug!(
                    msg = %msg,
                    dbheight = ?msg.db_height(),
                    leader_height = self.leader_height,
                    "parked until decidable"
                );
                self.park(msg, now);
                Ok(Disposition::Parked)
            }
            Validity::Invalid => {
                self.reject(msg);
                Ok(Disposition::Rejected)
            }
        }
    }

    fn reject(&mut self, msg: Message) {
        warn!(
            msg = %msg,
            msg_type = %msg.msg_type(),
            dbheight = ?msg.db_height(),
            origin = ?msg.base().origin,
            "invalid message"
        );
        // a full invalid queue is already logged
        let _ = self.queues.send_invalid(msg);
    }

    /// Runs a valid message on the leader or follower path.
    fn execute(&mut self, msg: Message) -> Result<()> {
        let locally_produced = msg.base().origin.is_none();
        if msg.needs_ack() && self.leads_lane_of(&msg) {
            return msg.leader_execute(self);
        }
        if locally_produced {
            // nobody else has seen it yet
            self.send_out(msg.clone());
        }
        msg.follower_execute(self)
    }

    /// Whether this server leads the lane `msg` is ordered into at the
    /// current height.
    fn leads_lane_of(&self, msg: &Message) -> bool {
        let vm = msg.compute_vm_index(self);
        ConsensusView::leader_of(self, self.leader_height, vm) == Some(self.identity)
    }

    pub(crate) fn send_out(&self, msg: Message) {
        // a full outbound queue is already logged
        let _ = self.queues.send_out(msg);
    }

    /// Re-checks parked messages that are due at `now`, or all of them with
    /// `force`. Returns how many were executed.
    pub fn retry_holding(&mut self, now: Instant, force: bool) -> Result<usize> {
        self.ensure_running()?;
        let executed = self.retry_parked(now, force)?;
        self.drain_after_advance()?;
        Ok(executed)
    }

    fn retry_parked(&mut self, now: Instant, force: bool) -> Result<usize> {
        let mut executed = 0;
        for parked in self.holding.take_due(now, force) {
            match parked.msg.validate(&*self) {
                Validity::Valid => {
                    self.execute(parked.msg)?;
                    executed += 1;
                }
                Validity::Invalid => self.reject(parked.msg),
                Validity::Indeterminate => {
                    let attempts = parked.attempts + 1;
                    if let Some(msg) = self.holding.repark(parked, now) {
                        warn!(
                            msg = %msg,
                            attempts,
                            leader_height = self.leader_height,
                            "retries exhausted, message dropped"
                        );
                        self.discard(&msg);
                    }
                }
            }
        }
        Ok(executed)
    }

    pub(crate) fn park(&mut self, msg: Message, now: Instant) {
        if let Some(evicted) = self.holding.park(msg, now) {
            warn!(
                msg = %evicted,
                capacity = self.holding.capacity(),
                "holding full, oldest message dropped"
            );
            self.discard(&evicted);
        }
    }

    /// Lets a dropped message be received again later.
    pub(crate) fn discard(&mut self, msg: &Message) {
        if let Ok(hash) = msg.get_repeat_hash() {
            self.repeats.forget(&hash);
        }
        if let Ok(hash) = msg.get_msg_hash() {
            self.unacked_rounds.remove(&hash);
        }
    }

    /// A recorded block makes parked messages for the next height decidable.
    fn drain_after_advance(&mut self) -> Result<()> {
        while std::mem::take(&mut self.height_advanced) {
            self.retry_parked(Instant::now(), true)?;
        }
        Ok(())
    }

    /// Builds and signs the end-of-minute for the lane this server leads,
    /// if the lane is still open.
    pub fn new_eom(&self) -> Result<Option<Message>> {
        let Some(pl) = self.process_lists.get(&self.leader_height) else {
            return Ok(None);
        };
        if pl.status != HeightStatus::Open {
            return Ok(None);
        }
        let Some(vm_index) = pl.vm_led_by(&self.identity) else {
            return Ok(None);
        };
        let vm = &pl.vms[vm_index];
        if vm.sealed {
            return Ok(None);
        }
        let mut eom = crate::messages::EndOfMinute::new(
            Timestamp::now(),
            vm.minute,
            self.leader_height,
            vm_index as u8,
            self.identity,
        );
        eom.sign(&self.key)?;
        Ok(Some(eom.into()))
    }

    /// Ends the current minute of the lane this server leads.
    pub fn end_minute(&mut self) -> Result<Option<Disposition>> {
        match self.new_eom()? {
            Some(eom) => self.handle_message(eom).map(Some),
            None => Ok(None),
        }
    }

    /// A signed heartbeat, for audit servers proving they are alive.
    pub fn new_heartbeat(&self) -> Result<Option<Message>> {
        if !self.is_audit(&self.identity) {
            return Ok(None);
        }
        let mut hb = Heartbeat::new(Timestamp::now(), self.leader_height, self.identity);
        hb.sign(&self.key)?;
        Ok(Some(hb.into()))
    }

    pub fn heartbeat(&mut self) -> Result<Option<Disposition>> {
        match self.new_heartbeat()? {
            Some(hb) => self.handle_message(hb).map(Some),
            None => Ok(None),
        }
    }

    /// Fault evidence per federated server, in roster order.
    pub fn get_fed_server_faults(&self) -> Vec<Vec<Message>> {
        self.roster
            .federated()
            .iter()
            .map(|s| self.faults.faults_for(&s.id).to_vec())
            .collect()
    }

    /// Federated servers whose fault evidence reached the configured threshold.
    pub fn servers_past_fault_threshold(&self) -> Vec<Hash> {
        self.roster
            .federated()
            .iter()
            .filter(|s| self.faults.count(&s.id) >= self.consensus.fault_threshold)
            .map(|s| s.id)
            .collect()
    }

    /// Heartbeats received from audit servers this period.
    pub fn get_audit_heartbeats(&self) -> &[Heartbeat] {
        &self.audit_heartbeats
    }

    /// Audit servers that sent a heartbeat since the last recorded block.
    pub fn promotion_candidates(&self) -> Vec<Hash> {
        self.roster
            .audit()
            .iter()
            .filter(|s| self.audit_heartbeats.iter().any(|hb| hb.server_id == s.id))
            .map(|s| s.id)
            .collect()
    }

    /// The recorded block at `db_height` with its finalizing signatures and
    /// the admin and commit messages it carries.
    pub fn load_dbstate(&self, db_height: u32) -> Result<Option<DBState>> {
        let Some(block) = self.db.get_dblock(db_height)? else {
            return Ok(None);
        };
        let signatures = self
            .db
            .get_dblock_signatures(db_height)?
            .iter()
            .map(|bytes| DirectoryBlockSignature::unmarshal_binary(bytes))
            .collect::<Result<Vec<_>>>()?;
        let payload = self
            .db
            .get_dblock_payload(db_height)?
            .iter()
            .map(|bytes| Message::unmarshal_binary(bytes))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(
            DBState::new(Timestamp::now(), block, signatures).with_payload(payload),
        ))
    }

    fn open_process_list(&mut self, db_height: u32) {
        let federated = self.roster.federated().to_vec();
        self.process_lists
            .entry(db_height)
            .or_insert_with(|| ProcessList::new(db_height, federated));
    }
}

impl ConsensusView for State {
    fn leader_height(&self) -> u32 {
        self.leader_height
    }

    fn highest_recorded_block(&self) -> Option<u32> {
        self.highest_recorded
    }

    fn network_id(&self) -> u32 {
        self.network_id
    }

    fn server_role(&self, id: &Hash) -> Option<ServerRole> {
        self.roster.role_of(id)
    }

    fn server_key(&self, id: &Hash) -> Option<PublicKeyBytes> {
        self.roster.get(id).map(|s| s.public_key)
    }

    fn federated_count(&self) -> usize {
        self.roster.federated().len()
    }

    fn vm_count(&self, db_height: u32) -> usize {
        self.process_lists
            .get(&db_height)
            .map(ProcessList::vm_count)
            .unwrap_or_else(|| self.roster.federated().len())
    }

    fn leader_of(&self, db_height: u32, vm_index: usize) -> Option<Hash> {
        if let Some(pl) = self.process_lists.get(&db_height) {
            return pl.leader_of(vm_index).map(|s| s.id);
        }
        let federated = self.roster.federated();
        let n = federated.len();
        if vm_index >= n {
            return None;
        }
        federated.get((vm_index + db_height as usize) % n).map(|s| s.id)
    }

    fn height_status(&self, db_height: u32) -> Option<HeightStatus> {
        if let Some(pl) = self.process_lists.get(&db_height) {
            return Some(pl.status);
        }
        match self.highest_recorded {
            Some(h) if db_height <= h => Some(HeightStatus::Recorded),
            _ => None,
        }
    }

    fn pending_commit_credits(&self, entry_hash: &Hash) -> Option<u8> {
        let bytes = self.db.get_commit(entry_hash).ok().flatten()?;
        CommitChain::unmarshal_binary(&bytes).ok().map(|c| c.credits)
    }

    fn check_block_linkage(&self, block: &DirectoryBlock) -> Result<()> {
        self.chain.check_linkage(block)
    }

    fn lane_cursor(&self, db_height: u32, vm_index: usize) -> usize {
        self.process_lists
            .get(&db_height)
            .and_then(|pl| pl.vms.get(vm_index))
            .map_or(0, |vm| vm.height())
    }

    fn ack_window(&self) -> u32 {
        self.consensus.ack_window
    }
}
