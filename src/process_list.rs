//! Per-height ordering: one lane per federated server, the signatures
//! collected for the height, and the block assembled when it closes.

pub mod vm;

pub use vm::Vm;

use crate::directory_block::{DBEntry, DBlockHeader, DirectoryBlock, EntryBlock, ADMIN_CHAIN_ID, EC_CHAIN_ID};
use crate::error::{ChainError, Result};
use crate::messages::{DirectoryBlockSignature, Message, Msg};
use crate::primitives::{merkle_root, Hash, Timestamp};
use crate::state::Server;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeightStatus {
    /// Lanes still accepting messages.
    Open,
    /// Block built; collecting signatures.
    Closing,
    /// Quorum reached on the local header.
    Signed,
    Recorded,
}

#[derive(Debug)]
pub struct ProcessList {
    pub db_height: u32,
    pub status: HeightStatus,
    /// Federated roster snapshot taken when the height opened.
    pub federated: Vec<Server>,
    pub vms: Vec<Vm>,
    pub dbsigs: Vec<DirectoryBlockSignature>,
    /// Hashes of the commits processed at this height.
    pub commits: Vec<Hash>,
    /// Hashes of the roster changes processed at this height.
    pub admin: Vec<Hash>,
    /// The admin and commit messages behind `admin` and `commits`, in
    /// processing order.
    pub payload: Vec<Message>,
    pub new_eblocks: BTreeMap<Hash, EntryBlock>,
    pub block: Option<DirectoryBlock>,
    /// Closed by a signature quorum rather than by sealed lanes.
    pub forced: bool,
    /// A signed header disagreed with ours; waiting for a DBState.
    pub needs_dbstate: bool,
}

impl ProcessList {
    pub fn new(db_height: u32, federated: Vec<Server>) -> Self {
        let vms = federated.iter().map(|_| Vm::new()).collect();
        ProcessList {
            db_height,
            status: HeightStatus::Open,
            federated,
            vms,
            dbsigs: Vec::new(),
            commits: Vec::new(),
            admin: Vec::new(),
            payload: Vec::new(),
            new_eblocks: BTreeMap::new(),
            block: None,
            forced: false,
            needs_dbstate: false,
        }
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    /// Leader of `vm_index`; leadership rotates one lane per height.
    pub fn leader_of(&self, vm_index: usize) -> Option<&Server> {
        let n = self.federated.len();
        if vm_index >= n {
            return None;
        }
        self.federated.get((vm_index + self.db_height as usize) % n)
    }

    /// The lane `id` leads at this height.
    pub fn vm_led_by(&self, id: &Hash) -> Option<usize> {
        let n = self.federated.len();
        let i = self.federated.iter().position(|s| s.id == *id)?;
        Some((i + n - self.db_height as usize % n) % n)
    }

    pub fn quorum(&self) -> usize {
        self.federated.len() / 2 + 1
    }

    pub fn all_sealed(&self) -> bool {
        !self.vms.is_empty() && self.vms.iter().all(|vm| vm.sealed)
    }

    /// Keeps the first signature from each server. Returns whether it was new.
    pub fn add_dbsig(&mut self, sig: DirectoryBlockSignature) -> bool {
        if self.dbsigs.iter().any(|s| s.server_id == sig.server_id) {
            return false;
        }
        self.dbsigs.push(sig);
        true
    }

    /// Signatures whose header hashes to `header_hash`.
    pub fn signatures_for(&self, header_hash: &Hash) -> Vec<&DirectoryBlockSignature> {
        self.dbsigs
            .iter()
            .filter(|s| s.header.hash().map(|h| h == *header_hash).unwrap_or(false))
            .collect()
    }

    /// A header signed by a quorum, if one exists.
    pub fn quorum_header(&self) -> Option<DBlockHeader> {
        let mut counts: BTreeMap<Hash, (usize, &DBlockHeader)> = BTreeMap::new();
        for sig in &self.dbsigs {
            if let Ok(hash) = sig.header.hash() {
                counts.entry(hash).or_insert((0, &sig.header)).0 += 1;
            }
        }
        counts
            .into_values()
            .find(|(count, _)| *count >= self.quorum())
            .map(|(_, header)| header.clone())
    }

    /// Adds a processed roster change or commit to the block body.
    pub fn record_payload(&mut self, msg: Message) -> Result<()> {
        match &msg {
            Message::CommitChain(commit) => {
                self.commits.push(commit.get_hash()?);
                self.add_new_eblock_entry(commit.chain_id_hash, commit.entry_hash);
            }
            Message::AddServer(_) | Message::RemoveServer(_) => self.admin.push(msg.get_hash()?),
            other => {
                return Err(ChainError::InvalidBlock(format!(
                    "{} is not block content",
                    other.msg_type()
                )))
            }
        }
        self.payload.push(msg);
        Ok(())
    }

    pub fn add_new_eblock_entry(&mut self, chain_id: Hash, entry_hash: Hash) {
        let db_height = self.db_height;
        self.new_eblocks
            .entry(chain_id)
            .or_insert_with(|| EntryBlock::new(chain_id, db_height))
            .add_entry(entry_hash);
    }

    pub fn get_new_eblock(&self, chain_id: &Hash) -> Option<&EntryBlock> {
        self.new_eblocks.get(chain_id)
    }

    /// Body entries in canonical order: admin, entry credits, then new
    /// entry blocks by chain id.
    pub fn body_entries(&self) -> Vec<DBEntry> {
        let mut entries = Vec::new();
        if !self.admin.is_empty() {
            entries.push(DBEntry::new(ADMIN_CHAIN_ID, merkle_root(&self.admin)));
        }
        if !self.commits.is_empty() {
            entries.push(DBEntry::new(EC_CHAIN_ID, merkle_root(&self.commits)));
        }
        for (chain_id, eblock) in &self.new_eblocks {
            entries.push(DBEntry::new(*chain_id, eblock.key_mr()));
        }
        entries
    }

    /// Timestamp of the first ack in lane 0, the first thing ordered at this height.
    pub fn first_ack_timestamp(&self) -> Option<Timestamp> {
        self.vms.first()?.ack_at(0).map(|ack| ack.timestamp)
    }

    /// Assembles this height's directory block on top of the given links.
    pub fn build_block(
        &self,
        network_id: u32,
        prev_key_mr: Hash,
        prev_full_hash: Hash,
        fallback_timestamp: Timestamp,
    ) -> Result<DirectoryBlock> {
        if self.status != HeightStatus::Open {
            return Err(ChainError::InvalidBlock(format!(
                "height {} is already {:?}",
                self.db_height, self.status
            )));
        }
        let mut header = DBlockHeader::new();
        header.set_network_id(network_id);
        header.set_db_height(self.db_height);
        header.set_prev_key_mr(prev_key_mr);
        header.set_prev_full_hash(prev_full_hash);
        header.set_timestamp(self.first_ack_timestamp().unwrap_or(fallback_timestamp));
        DirectoryBlock::new(header, self.body_entries())
    }
}
