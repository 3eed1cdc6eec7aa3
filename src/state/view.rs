use crate::crypto::PublicKeyBytes;
use crate::directory_block::DirectoryBlock;
use crate::error::Result;
use crate::primitives::Hash;
use crate::process_list::HeightStatus;
use crate::state::roster::ServerRole;

/// The read-only slice of consensus state that message validation sees.
pub trait ConsensusView {
    /// Height whose process list is currently being built.
    fn leader_height(&self) -> u32;
    fn highest_recorded_block(&self) -> Option<u32>;
    fn network_id(&self) -> u32;
    fn server_role(&self, id: &Hash) -> Option<ServerRole>;
    fn server_key(&self, id: &Hash) -> Option<PublicKeyBytes>;
    fn federated_count(&self) -> usize;
    fn vm_count(&self, db_height: u32) -> usize;
    fn leader_of(&self, db_height: u32, vm_index: usize) -> Option<Hash>;
    fn height_status(&self, db_height: u32) -> Option<HeightStatus>;
    /// Credits of the commit already held for `entry_hash`, if any.
    fn pending_commit_credits(&self, entry_hash: &Hash) -> Option<u8>;
    /// Checks that `block` would extend the recorded chain.
    fn check_block_linkage(&self, block: &DirectoryBlock) -> Result<()>;
    /// Slots of a lane executed so far.
    fn lane_cursor(&self, db_height: u32, vm_index: usize) -> usize;
    /// How far past a lane's cursor an ack may point.
    fn ack_window(&self) -> u32;

    fn is_federated(&self, id: &Hash) -> bool {
        self.server_role(id) == Some(ServerRole::Federated)
    }

    fn is_audit(&self, id: &Hash) -> bool {
        self.server_role(id) == Some(ServerRole::Audit)
    }

    /// Signatures needed to finalize a block.
    fn fed_quorum(&self) -> usize {
        self.federated_count() / 2 + 1
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::directory_block::DirectoryChain;
    use std::collections::HashMap;

    /// A static view over generated federated and audit servers.
    pub(crate) struct FixedView {
        pub leader_height: u32,
        pub network_id: u32,
        pub ids: Vec<Hash>,
        pub keys: Vec<KeyPair>,
        pub audit_ids: Vec<Hash>,
        pub audit_keys: Vec<KeyPair>,
        pub status: Option<HeightStatus>,
        pub commits: HashMap<Hash, u8>,
        pub chain: DirectoryChain,
        pub lane_cursor: usize,
        pub ack_window: u32,
    }

    impl FixedView {
        pub fn new(federated: usize, leader_height: u32) -> Self {
            let keys: Vec<KeyPair> = (0..federated).map(|_| KeyPair::generate().unwrap()).collect();
            let audit_keys = vec![KeyPair::generate().unwrap()];
            FixedView {
                leader_height,
                network_id: 0xFA92E5A4,
                ids: keys.iter().map(|k| Hash::sha256(&k.public_key_bytes())).collect(),
                keys,
                audit_ids: audit_keys.iter().map(|k| Hash::sha256(&k.public_key_bytes())).collect(),
                audit_keys,
                status: Some(HeightStatus::Open),
                commits: HashMap::new(),
                chain: DirectoryChain::new(),
                lane_cursor: 0,
                ack_window: 64,
            }
        }

        pub fn leader_index(&self, db_height: u32, vm_index: usize) -> usize {
            (vm_index + db_height as usize) % self.ids.len()
        }
    }

    impl ConsensusView for FixedView {
        fn leader_height(&self) -> u32 {
            self.leader_height
        }

        fn highest_recorded_block(&self) -> Option<u32> {
            self.chain.len().checked_sub(1).map(|h| h as u32)
        }

        fn network_id(&self) -> u32 {
            self.network_id
        }

        fn server_role(&self, id: &Hash) -> Option<ServerRole> {
            if self.ids.contains(id) {
                Some(ServerRole::Federated)
            } else if self.audit_ids.contains(id) {
                Some(ServerRole::Audit)
            } else {
                None
            }
        }

        fn server_key(&self, id: &Hash) -> Option<PublicKeyBytes> {
            self.ids
                .iter()
                .zip(&self.keys)
                .chain(self.audit_ids.iter().zip(&self.audit_keys))
                .find(|(i, _)| *i == id)
                .map(|(_, k)| k.public_key_bytes())
        }

        fn federated_count(&self) -> usize {
            self.ids.len()
        }

        fn vm_count(&self, _db_height: u32) -> usize {
            self.ids.len()
        }

        fn leader_of(&self, db_height: u32, vm_index: usize) -> Option<Hash> {
            if vm_index >= self.ids.len() {
                return None;
            }
            Some(self.ids[self.leader_index(db_height, vm_index)])
        }

        fn height_status(&self, db_height: u32) -> Option<HeightStatus> {
            if db_height == self.leader_height {
                self.status
            } else {
                None
            }
        }

        fn pending_commit_credits(&self, entry_hash: &Hash) -> Option<u8> {
            self.commits.get(entry_hash).copied()
        }

        fn check_block_linkage(&self, block: &DirectoryBlock) -> Result<()> {
            self.chain.check_linkage(block)
        }

        fn lane_cursor(&self, _db_height: u32, _vm_index: usize) -> usize {
            self.lane_cursor
        }

        fn ack_window(&self) -> u32 {
            self.ack_window
        }
    }
}
