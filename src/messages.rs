//! The consensus message taxonomy.
//!
//! Each variant lives in its own module and implements [`Msg`]. The
//! [`Message`] sum type carries any of them, decodes by type tag and
//! routes execution into the [`State`].

pub mod ack;
pub mod add_server;
pub mod base;
pub mod commit_chain;
pub mod dbsig;
pub mod dbstate;
pub mod eom;
pub mod heartbeat;
pub mod remove_server;
pub mod server_fault;
pub mod signature_timeout;

pub use ack::Ack;
pub use add_server::AddServer;
pub use base::{MessageBase, Msg};
pub use commit_chain::CommitChain;
pub use dbsig::DirectoryBlockSignature;
pub use dbstate::DBState;
pub use eom::EndOfMinute;
pub use heartbeat::Heartbeat;
pub use remove_server::RemoveServer;
pub use server_fault::ServerFault;
pub use signature_timeout::SignatureTimeout;

use crate::crypto::KeyPair;
use crate::error::{ChainError, Result};
use crate::primitives::{Hash, Timestamp};
use crate::state::{ConsensusView, State};
use serde::Serialize;
use std::fmt;

/// Minutes in one directory block period; the EOM for the last one seals a lane.
pub const MINUTES_PER_BLOCK: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    EndOfMinute = 0,
    Ack = 1,
    ServerFault = 3,
    CommitChain = 5,
    DirectoryBlockSignature = 7,
    Heartbeat = 10,
    SignatureTimeout = 15,
    DBState = 20,
    AddServer = 22,
    RemoveServer = 23,
}

impl MessageType {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::EndOfMinute => "EOM",
            MessageType::Ack => "ACK",
            MessageType::ServerFault => "FED_SERVER_FAULT",
            MessageType::CommitChain => "COMMIT_CHAIN",
            MessageType::DirectoryBlockSignature => "DBSIG",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::SignatureTimeout => "SIGNATURE_TIMEOUT",
            MessageType::DBState => "DBSTATE",
            MessageType::AddServer => "ADD_SERVER",
            MessageType::RemoveServer => "REMOVE_SERVER",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of validating a message against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Never valid; drop it.
    Invalid,
    /// Cannot be decided yet; park and retry.
    Indeterminate,
    /// Execute now.
    Valid,
}

impl Validity {
    /// The wire-level tri-state: -1, 0 or 1.
    pub fn as_i8(self) -> i8 {
        match self {
            Validity::Invalid => -1,
            Validity::Indeterminate => 0,
            Validity::Valid => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    EndOfMinute(EndOfMinute),
    Ack(Ack),
    ServerFault(ServerFault),
    CommitChain(CommitChain),
    DirectoryBlockSignature(DirectoryBlockSignature),
    Heartbeat(Heartbeat),
    SignatureTimeout(SignatureTimeout),
    DBState(DBState),
    AddServer(AddServer),
    RemoveServer(RemoveServer),
}

macro_rules! each_variant {
    ($msg:expr, $m:ident => $body:expr) => {
        match $msg {
            Message::EndOfMinute($m) => $body,
            Message::Ack($m) => $body,
            Message::ServerFault($m) => $body,
            Message::CommitChain($m) => $body,
            Message::DirectoryBlockSignature($m) => $body,
            Message::Heartbeat($m) => $body,
            Message::SignatureTimeout($m) => $body,
            Message::DBState($m) => $body,
            Message::AddServer($m) => $body,
            Message::RemoveServer($m) => $body,
        }
    };
}

macro_rules! impl_from_variant {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Message {
                fn from(m: $variant) -> Self {
                    Message::$variant(m)
                }
            }
        )*
    };
}

impl_from_variant!(
    EndOfMinute,
    Ack,
    ServerFault,
    CommitChain,
    DirectoryBlockSignature,
    Heartbeat,
    SignatureTimeout,
    DBState,
    AddServer,
    RemoveServer,
);

type Decoder = fn(&[u8]) -> Result<(Message, &[u8])>;

fn decode_as<M: Msg>(data: &[u8]) -> Result<(Message, &[u8])> {
    M::unmarshal_binary_data(data).map(|(m, rest)| (m.into(), rest))
}

/// Type tag to decoder.
const DECODERS: &[(MessageType, Decoder)] = &[
    (MessageType::EndOfMinute, decode_as::<EndOfMinute>),
    (MessageType::Ack, decode_as::<Ack>),
    (MessageType::ServerFault, decode_as::<ServerFault>),
    (MessageType::CommitChain, decode_as::<CommitChain>),
    (MessageType::DirectoryBlockSignature, decode_as::<DirectoryBlockSignature>),
    (MessageType::Heartbeat, decode_as::<Heartbeat>),
    (MessageType::SignatureTimeout, decode_as::<SignatureTimeout>),
    (MessageType::DBState, decode_as::<DBState>),
    (MessageType::AddServer, decode_as::<AddServer>),
    (MessageType::RemoveServer, decode_as::<RemoveServer>),
];

impl Message {
    /// Decodes any message by its leading type tag.
    pub fn unmarshal_binary_data(data: &[u8]) -> Result<(Message, &[u8])> {
        let tag = *data
            .first()
            .ok_or_else(|| ChainError::malformed("empty message"))?;
        let decoder = DECODERS
            .iter()
            .find(|(t, _)| t.tag() == tag)
            .map(|(_, d)| *d)
            .ok_or_else(|| ChainError::Malformed(format!("unknown message type {}", tag)))?;
        decoder(data)
    }

    pub fn unmarshal_binary(data: &[u8]) -> Result<Message> {
        Self::unmarshal_binary_data(data).map(|(m, _)| m)
    }

    pub fn msg_type(&self) -> MessageType {
        each_variant!(self, m => m.msg_type())
    }

    pub fn base(&self) -> &MessageBase {
        each_variant!(self, m => m.base())
    }

    pub fn base_mut(&mut self) -> &mut MessageBase {
        each_variant!(self, m => m.base_mut())
    }

    pub fn timestamp(&self) -> Timestamp {
        each_variant!(self, m => m.timestamp())
    }

    pub fn db_height(&self) -> Option<u32> {
        each_variant!(self, m => m.db_height())
    }

    pub fn signer_id(&self) -> Option<Hash> {
        each_variant!(self, m => m.signer_id())
    }

    pub fn get_hash(&self) -> Result<Hash> {
        each_variant!(self, m => m.get_hash())
    }

    pub fn get_msg_hash(&self) -> Result<Hash> {
        each_variant!(self, m => m.get_msg_hash())
    }

    pub fn get_repeat_hash(&self) -> Result<Hash> {
        each_variant!(self, m => m.get_repeat_hash())
    }

    pub fn marshal_for_signature(&self) -> Result<Vec<u8>> {
        each_variant!(self, m => m.marshal_for_signature())
    }

    pub fn marshal_binary(&self) -> Result<Vec<u8>> {
        each_variant!(self, m => m.marshal_binary())
    }

    pub fn sign(&mut self, key: &KeyPair) -> Result<()> {
        each_variant!(self, m => m.sign(key))
    }

    pub fn verify_signature(&self) -> Result<bool> {
        each_variant!(self, m => m.verify_signature())
    }

    pub fn validate(&self, view: &dyn ConsensusView) -> Validity {
        each_variant!(self, m => m.validate(view))
    }

    pub fn compute_vm_index(&self, view: &dyn ConsensusView) -> usize {
        each_variant!(self, m => m.compute_vm_index(view))
    }

    pub fn json_byte(&self) -> Result<Vec<u8>> {
        each_variant!(self, m => m.json_byte())
    }

    pub fn json_string(&self) -> Result<String> {
        each_variant!(self, m => m.json_string())
    }

    pub fn is_same_as(&self, other: &Message) -> bool {
        match (self, other) {
            (Message::EndOfMinute(a), Message::EndOfMinute(b)) => a.is_same_as(b),
            (Message::Ack(a), Message::Ack(b)) => a.is_same_as(b),
            (Message::ServerFault(a), Message::ServerFault(b)) => a.is_same_as(b),
            (Message::CommitChain(a), Message::CommitChain(b)) => a.is_same_as(b),
            (Message::DirectoryBlockSignature(a), Message::DirectoryBlockSignature(b)) => {
                a.is_same_as(b)
            }
            (Message::Heartbeat(a), Message::Heartbeat(b)) => a.is_same_as(b),
            (Message::SignatureTimeout(a), Message::SignatureTimeout(b)) => a.is_same_as(b),
            (Message::DBState(a), Message::DBState(b)) => a.is_same_as(b),
            (Message::AddServer(a), Message::AddServer(b)) => a.is_same_as(b),
            (Message::RemoveServer(a), Message::RemoveServer(b)) => a.is_same_as(b),
            _ => false,
        }
    }

    /// Whether the message is ordered into a process list through an Ack.
    pub fn needs_ack(&self) -> bool {
        matches!(
            self,
            Message::EndOfMinute(_)
                | Message::CommitChain(_)
                | Message::AddServer(_)
                | Message::RemoveServer(_)
        )
    }

    /// Execution on the node that leads the message's lane.
    pub fn leader_execute(self, state: &mut State) -> Result<()> {
        if self.needs_ack() {
            state.leader_execute(self)
        } else {
            self.follower_execute(state)
        }
    }

    /// Execution on every other node.
    pub fn follower_execute(self, state: &mut State) -> Result<()> {
        match self {
            Message::Ack(ack) => state.follower_execute_ack(ack),
            Message::DirectoryBlockSignature(sig) => state.process_dbsig(sig),
            Message::DBState(dbstate) => state.follower_execute_dbstate(dbstate),
            Message::Heartbeat(hb) => state.process_heartbeat(hb),
            Message::ServerFault(fault) => state.process_server_fault(fault),
            Message::SignatureTimeout(_) => Ok(()),
            acked => state.follower_execute_msg(acked),
        }
    }

    /// Applies a message that reached its lane's cursor. Returns whether
    /// the lane may move past it.
    pub(crate) fn process(&self, db_height: u32, state: &mut State) -> Result<bool> {
        match self {
            Message::EndOfMinute(eom) => state.process_eom(db_height, eom),
            Message::CommitChain(commit) => state.process_commit_chain(db_height, commit),
            Message::AddServer(add) => state.process_add_server(db_height, add),
            Message::RemoveServer(remove) => state.process_remove_server(db_height, remove),
            _ => Ok(true),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get_msg_hash() {
            Ok(hash) => write!(f, "{}[{}]", self.msg_type(), &hash.to_hex()[..8]),
            Err(_) => write!(f, "{}[?]", self.msg_type()),
        }
    }
}
