use crate::crypto::PublicKeyBytes;
use crate::error::{ChainError, Result};
use crate::messages::base::serialize_hex;
use crate::primitives::Hash;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServerRole {
    Federated,
    Audit,
}

impl ServerRole {
    pub fn to_byte(self) -> u8 {
        match self {
            ServerRole::Federated => 0,
            ServerRole::Audit => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(ServerRole::Federated),
            1 => Ok(ServerRole::Audit),
            other => Err(ChainError::Malformed(format!("unknown server role {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Server {
    pub id: Hash,
    #[serde(serialize_with = "serialize_hex")]
    pub public_key: PublicKeyBytes,
    pub role: ServerRole,
}

impl Server {
    pub fn new(id: Hash, public_key: PublicKeyBytes, role: ServerRole) -> Self {
        Server { id, public_key, role }
    }
}

/// The federated and audit server sets. The federated set is kept sorted by
/// identity so every node derives the same lane leaders.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    federated: Vec<Server>,
    audit: Vec<Server>,
}

impl Roster {
    pub fn new(servers: impl IntoIterator<Item = Server>) -> Self {
        let mut roster = Roster::default();
        for server in servers {
            roster.add(server);
        }
        roster
    }

    pub fn federated(&self) -> &[Server] {
        &self.federated
    }

    pub fn audit(&self) -> &[Server] {
        &self.audit
    }

    pub fn get(&self, id: &Hash) -> Option<&Server> {
        self.federated.iter().chain(self.audit.iter()).find(|s| s.id == *id)
    }

    pub fn role_of(&self, id: &Hash) -> Option<ServerRole> {
        self.get(id).map(|s| s.role)
    }

    pub fn fed_index(&self, id: &Hash) -> Option<usize> {
        self.federated.iter().position(|s| s.id == *id)
    }

    /// Inserts `server`, replacing any entry with the same identity.
    pub fn add(&mut self, server: Server) {
        self.remove(&server.id);
        match server.role {
            ServerRole::Federated => {
                let at = self.federated.partition_point(|s| s.id < server.id);
                self.federated.insert(at, server);
            }
            ServerRole::Audit => self.audit.push(server),
        }
    }

    pub fn remove(&mut self, id: &Hash) -> Option<Server> {
        if let Some(i) = self.fed_index(id) {
            return Some(self.federated.remove(i));
        }
        let i = self.audit.iter().position(|s| s.id == *id)?;
        Some(self.audit.remove(i))
    }
}
