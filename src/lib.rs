//! fedchain - consensus core of a federated blockchain node
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Messages
//! - [`messages`] - The consensus message taxonomy, codec and validation
//! - [`signature_block`] - Signature containers for authorized payloads
//!
//! ## Consensus
//! - [`state`] - Roster, validation choke point, leader/follower execution
//! - [`process_list`] - Per-height lanes and block assembly
//! - [`directory_block`] - Directory blocks, entry blocks and the chain
//!
//! ## Cryptography & Encoding
//! - [`crypto`] - Signatures and verification (secp256k1)
//! - [`primitives`] - Hashes, Merkle roots, timestamps, binary codec
//!
//! ## State Management
//! - [`persistence`] - Database layer (SQLite)
//! - [`cache`] - Repeat-message filter
//! - [`queues`] - Outbound and invalid message queues
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`node`] - The node task driving the state

#![forbid(unsafe_code)]

// ============================================================================
// Messages
// ============================================================================
pub mod messages;
pub mod signature_block;

// ============================================================================
// Consensus
// ============================================================================
pub mod directory_block;
pub mod process_list;
pub mod state;

// ============================================================================
// Cryptography & Encoding
// ============================================================================
pub mod crypto;
pub mod primitives;

// ============================================================================
// State Management
// ============================================================================
pub mod cache;
pub mod persistence;
pub mod queues;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
pub mod node;

pub use error::{ChainError, ErrorKind, Result};
pub use messages::{Message, MessageType, Msg, Validity};
pub use primitives::{Hash, Timestamp};
pub use state::{ConsensusView, Disposition, State, StateSettings};
