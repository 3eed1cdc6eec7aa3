use crate::error::{ChainError, Result};
use crate::messages::{Ack, Message, Msg};
use crate::primitives::Hash;
use tracing::warn;

/// One ordered lane of a process list, led by a single federated server.
#[derive(Debug, Default)]
pub struct Vm {
    list: Vec<Option<Message>>,
    acks: Vec<Option<Ack>>,
    cursor: usize,
    pub minute: u8,
    pub sealed: bool,
    // leader side: next slot to hand out and the serial chain so far
    pub(crate) next_list_height: u32,
    pub(crate) last_serial: Hash,
}

impl Vm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots executed so far.
    pub fn height(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Places `msg` at the slot its ack names. Returns `false` for an exact
    /// repeat, an error when the slot already holds a different message or
    /// the ack's serial hash breaks the lane's chain.
    pub fn add(&mut self, ack: Ack, msg: Message) -> Result<bool> {
        let slot = ack.list_height as usize;
        if let Some(existing) = self.get(slot) {
            if existing.get_msg_hash()? == msg.get_msg_hash()? {
                return Ok(false);
            }
            warn!(
                slot,
                existing = %existing,
                incoming = %msg,
                "conflicting placement rejected"
            );
            return Err(ChainError::Malformed(format!(
                "list height {} already holds a different message",
                slot
            )));
        }
        self.check_serial(slot, &ack)?;
        if slot >= self.list.len() {
            self.list.resize_with(slot + 1, || None);
            self.acks.resize_with(slot + 1, || None);
        }
        self.list[slot] = Some(msg);
        self.acks[slot] = Some(ack);
        Ok(true)
    }

    /// The serial hash at `slot` must follow from the ack before it and
    /// lead into the ack after it, where those are known.
    fn check_serial(&self, slot: usize, ack: &Ack) -> Result<()> {
        let prev = match slot.checked_sub(1) {
            None => Some(Hash::ZERO),
            Some(before) => self.ack_at(before).map(|a| a.serial_hash),
        };
        let breaks_prev =
            prev.is_some_and(|prev| ack.serial_hash != Ack::next_serial(&prev, &ack.message_hash));
        let breaks_next = self
            .ack_at(slot + 1)
            .is_some_and(|next| next.serial_hash != Ack::next_serial(&ack.serial_hash, &next.message_hash));
        if breaks_prev || breaks_next {
            warn!(slot, serial = %ack.serial_hash, "ack breaks the serial chain");
            return Err(ChainError::Malformed(format!(
                "serial hash at list height {} does not chain",
                slot
            )));
        }
        Ok(())
    }

    /// The message at the cursor, if its slot is filled and the lane is open.
    pub fn next_ready(&self) -> Option<&Message> {
        if self.sealed {
            return None;
        }
        self.list.get(self.cursor).and_then(Option::as_ref)
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    pub fn get(&self, list_height: usize) -> Option<&Message> {
        self.list.get(list_height).and_then(Option::as_ref)
    }

    pub fn ack_at(&self, list_height: usize) -> Option<&Ack> {
        self.acks.get(list_height).and_then(Option::as_ref)
    }

    /// First unfilled slot below the highest filled one.
    pub fn gap(&self) -> Option<usize> {
        let last = self.list.iter().rposition(Option::is_some)?;
        self.list[..last].iter().position(Option::is_none)
    }

    /// Hands out the next slot and serial hash for a message this node leads.
    pub(crate) fn assign(&mut self, msg_hash: &Hash) -> (u32, Hash) {
        let list_height = self.next_list_height;
        self.next_list_height += 1;
        self.last_serial = Ack::next_serial(&self.last_serial, msg_hash);
        (list_height, self.last_serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Heartbeat;
    use crate::primitives::Timestamp;

    fn msg(tag: &[u8]) -> Message {
        Heartbeat::new(Timestamp::from_millis(1), 0, Hash::sha256(tag)).into()
    }

    fn ack_for(list_height: u32, msg: &Message, serial: Hash) -> Ack {
        let hash = msg.get_msg_hash().unwrap();
        Ack::new(Timestamp::now(), 0, 0, list_height, hash, serial, Hash::ZERO)
    }

    /// Acked messages for slots 0.. with an unbroken serial chain.
    fn chained(tags: &[&[u8]]) -> Vec<(Ack, Message)> {
        let mut serial = Hash::ZERO;
        tags.iter()
            .enumerate()
            .map(|(i, tag)| {
                let m = msg(tag);
                serial = Ack::next_serial(&serial, &m.get_msg_hash().unwrap());
                (ack_for(i as u32, &m, serial), m)
            })
            .collect()
    }

    #[test]
    fn test_gap_stalls_cursor() {
        let mut vm = Vm::new();
        let mut lane = chained(&[b"0", b"1", b"2"]);
        let (a2, m2) = lane.pop().unwrap();
        let (a0, m0) = lane.remove(0);
        assert!(vm.add(a2, m2).unwrap());
        assert!(vm.next_ready().is_none());
        assert!(vm.add(a0, m0).unwrap());
        assert!(vm.next_ready().is_some());
        vm.advance();
        assert!(vm.next_ready().is_none());
        assert_eq!(vm.gap(), Some(1));
    }

    #[test]
    fn test_duplicate_and_conflict() {
        let mut vm = Vm::new();
        let (a, m) = chained(&[b"x"]).remove(0);
        assert!(vm.add(a.clone(), m.clone()).unwrap());
        assert!(!vm.add(a, m).unwrap());
        let (b, other) = chained(&[b"y"]).remove(0);
        assert!(vm.add(b, other).is_err());
    }

    #[test]
    fn test_sealed_lane_stops() {
        let mut vm = Vm::new();
        let (a, m) = chained(&[b"x"]).remove(0);
        vm.add(a, m).unwrap();
        vm.sealed = true;
        assert!(vm.next_ready().is_none());
    }

    #[test]
    fn test_assign_chains_serials() {
        let mut vm = Vm::new();
        let (h0, s0) = vm.assign(&Hash::sha256(b"a"));
        let (h1, s1) = vm.assign(&Hash::sha256(b"b"));
        assert_eq!((h0, h1), (0, 1));
        assert_eq!(s1, Ack::next_serial(&s0, &Hash::sha256(b"b")));
    }

    #[test]
    fn test_serial_chain_enforced() {
        let lane = chained(&[b"a", b"b", b"c"]);

        let mut vm = Vm::new();
        let (a0, m0) = lane[0].clone();
        assert!(vm.add(a0, m0).unwrap());
        // slot 1 signed over a stale serial
        let (_, m1) = lane[1].clone();
        assert!(vm.add(ack_for(1, &m1, Hash::ZERO), m1.clone()).is_err());
        assert!(vm.get(1).is_none());
        let (a1, _) = lane[1].clone();
        assert!(vm.add(a1, m1).unwrap());

        // a late slot 1 must lead into the slot 2 already held
        let mut vm = Vm::new();
        let (a2, m2) = lane[2].clone();
        vm.add(a2, m2).unwrap();
        let other = msg(b"other");
        let forged = ack_for(1, &other, Ack::next_serial(&Hash::ZERO, &other.get_msg_hash().unwrap()));
        assert!(vm.add(forged, other).is_err());

        // slot 0 always chains from zero
        let (_, m0) = lane[0].clone();
        assert!(vm.add(ack_for(0, &m0, Hash::sha256(b"junk")), m0).is_err());
    }
}
