// Thin re-export module: the directory block is split into the header,
// the block with its body entries, entry blocks, and the recorded chain.

pub mod block;
pub mod chain;
pub mod entry_block;
pub mod header;

pub use block::{DBEntry, DirectoryBlock};
pub use chain::DirectoryChain;
pub use entry_block::EntryBlock;
pub use header::DBlockHeader;

use crate::primitives::Hash;

pub const ADMIN_CHAIN_ID: Hash = Hash::with_last_byte(0x0a);
pub const EC_CHAIN_ID: Hash = Hash::with_last_byte(0x0c);
pub const DBLOCK_CHAIN_ID: Hash = Hash::with_last_byte(0x0d);
pub const FACTOID_CHAIN_ID: Hash = Hash::with_last_byte(0x0f);
