use crate::directory_block::block::DirectoryBlock;
use crate::error::{ChainError, Result};
use crate::primitives::Hash;

#[derive(Debug, Clone)]
struct Link {
    block: DirectoryBlock,
    key_mr: Hash,
    full_hash: Hash,
}

/// The hash-chained sequence of recorded directory blocks.
#[derive(Debug, Clone, Default)]
pub struct DirectoryChain {
    links: Vec<Link>,
}

impl DirectoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn last(&self) -> Option<&DirectoryBlock> {
        self.links.last().map(|l| &l.block)
    }

    pub fn get(&self, height: u32) -> Option<&DirectoryBlock> {
        self.links.get(height as usize).map(|l| &l.block)
    }

    /// Height of the next block this chain will accept.
    pub fn next_height(&self) -> u32 {
        self.links.len() as u32
    }

    /// `(prev_key_mr, prev_full_hash)` for the next block; zero at genesis.
    pub fn prev_links(&self) -> (Hash, Hash) {
        self.links
            .last()
            .map(|l| (l.key_mr, l.full_hash))
            .unwrap_or((Hash::ZERO, Hash::ZERO))
    }

    /// Checks that `block` extends this chain without applying it.
    pub fn check_linkage(&self, block: &DirectoryBlock) -> Result<()> {
        let height = block.db_height();
        if height != self.next_height() {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid block height. Expected {}, but got {}.",
                self.next_height(),
                height
            )));
        }

        let (prev_key_mr, prev_full_hash) = self.prev_links();
        if block.header.get_prev_key_mr() != prev_key_mr {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid previous key MR at height {}. Expected {}, but got {}.",
                height,
                prev_key_mr,
                block.header.get_prev_key_mr()
            )));
        }
        if block.header.get_prev_full_hash() != prev_full_hash {
            return Err(ChainError::InvalidBlock(format!(
                "Invalid previous full hash at height {}. Expected {}, but got {}.",
                height,
                prev_full_hash,
                block.header.get_prev_full_hash()
            )));
        }

        if !block.body_is_consistent() {
            return Err(ChainError::InvalidBlock(format!(
                "Body Merkle root or block count mismatch at height {}.",
                height
            )));
        }
        Ok(())
    }

    pub fn apply_block(&mut self, block: DirectoryBlock) -> Result<()> {
        self.check_linkage(&block)?;
        let key_mr = block.key_mr()?;
        let full_hash = block.full_hash()?;
        self.links.push(Link {
            block,
            key_mr,
            full_hash,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory_block::{DBEntry, DBlockHeader, EC_CHAIN_ID};

    fn next_block(chain: &DirectoryChain, entries: Vec<DBEntry>) -> DirectoryBlock {
        let (prev_key_mr, prev_full_hash) = chain.prev_links();
        let mut header = DBlockHeader::new();
        header.set_db_height(chain.next_height());
        header.set_prev_key_mr(prev_key_mr);
        header.set_prev_full_hash(prev_full_hash);
        DirectoryBlock::new(header, entries).unwrap()
    }

    #[test]
    fn test_height_monotonicity_and_links() {
        let mut chain = DirectoryChain::new();
        for i in 0..5u8 {
            let entries = vec![DBEntry::new(EC_CHAIN_ID, Hash::sha256(&[i]))];
            let block = next_block(&chain, entries);
            chain.apply_block(block).unwrap();
        }
        assert_eq!(chain.len(), 5);
        for h in 1..5u32 {
            let prev = chain.get(h - 1).unwrap();
            let cur = chain.get(h).unwrap();
            assert_eq!(cur.db_height(), prev.db_height() + 1);
            assert_eq!(cur.header.get_prev_key_mr(), prev.key_mr().unwrap());
            assert_eq!(cur.header.get_prev_full_hash(), prev.full_hash().unwrap());
        }
    }

    #[test]
    fn test_genesis_links_are_zero() {
        let chain = DirectoryChain::new();
        let genesis = next_block(&chain, vec![]);
        assert!(genesis.header.get_prev_key_mr().is_zero());
        assert!(genesis.header.get_prev_full_hash().is_zero());
        assert!(genesis.header.get_body_mr().is_zero());
    }

    #[test]
    fn test_rejects_gap_and_bad_links() {
        let mut chain = DirectoryChain::new();
        chain.apply_block(next_block(&chain, vec![])).unwrap();

        let mut skipped = next_block(&chain, vec![]);
        skipped.header.set_db_height(2);
        assert!(chain.apply_block(skipped).is_err());

        let mut bad_link = next_block(&chain, vec![]);
        bad_link.header.set_prev_key_mr(Hash::sha256(b"fork"));
        assert!(chain.apply_block(bad_link).is_err());

        let mut bad_body = next_block(&chain, vec![]);
        bad_body.header.set_block_count(4);
        assert!(chain.apply_block(bad_body).is_err());

        assert_eq!(chain.len(), 1);
    }
}
