use crate::messages::Message;
use crate::primitives::Hash;
use std::collections::HashMap;

/// Fault evidence collected per accused server.
///
/// Detection only; nothing here changes the roster.
#[derive(Debug, Default)]
pub struct FaultLists {
    by_server: HashMap<Hash, Vec<Message>>,
}

impl FaultLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records evidence against `server`. Returns the evidence count.
    pub fn record(&mut self, server: Hash, evidence: Message) -> usize {
        let list = self.by_server.entry(server).or_default();
        list.push(evidence);
        list.len()
    }

    pub fn faults_for(&self, server: &Hash) -> &[Message] {
        self.by_server.get(server).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, server: &Hash) -> usize {
        self.faults_for(server).len()
    }

    pub fn clear(&mut self, server: &Hash) {
        self.by_server.remove(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ServerFault;
    use crate::primitives::Timestamp;

    #[test]
    fn test_record_and_clear() {
        let mut faults = FaultLists::new();
        let accused = Hash::sha256(b"accused");
        let evidence = ServerFault::new(Timestamp::now(), 0, 0, accused, Hash::ZERO, Hash::ZERO);
        assert_eq!(faults.record(accused, evidence.clone().into()), 1);
        assert_eq!(faults.record(accused, evidence.into()), 2);
        assert_eq!(faults.count(&Hash::ZERO), 0);
        faults.clear(&accused);
        assert!(faults.faults_for(&accused).is_empty());
    }
}
