//! Bounded message queues between the consensus state and its transport.

use crate::error::{ChainError, Result};
use crate::messages::Message;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::{debug, warn};

/// Producer side held by the [`State`](crate::state::State).
#[derive(Debug, Clone)]
pub struct OutboundQueues {
    out: Sender<Message>,
    invalid: Sender<Message>,
}

/// Consumer side handed to the transport.
#[derive(Debug)]
pub struct QueueReceivers {
    /// Messages to broadcast to peers.
    pub out: Receiver<Message>,
    /// Messages that failed validation, for diagnostics or peer scoring.
    pub invalid: Receiver<Message>,
}

pub fn channel(capacity: usize) -> (OutboundQueues, QueueReceivers) {
    let capacity = capacity.max(1);
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (invalid_tx, invalid_rx) = mpsc::channel(capacity);
    (
        OutboundQueues {
            out: out_tx,
            invalid: invalid_tx,
        },
        QueueReceivers {
            out: out_rx,
            invalid: invalid_rx,
        },
    )
}

fn try_push(queue: &Sender<Message>, name: &str, msg: Message) -> Result<()> {
    match queue.try_send(msg) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(msg)) => {
            warn!(queue = name, msg = %msg, "queue full, message dropped");
            Err(ChainError::QueueError(format!("{} queue full", name)))
        }
        Err(TrySendError::Closed(msg)) => {
            debug!(queue = name, msg = %msg, "queue closed");
            Err(ChainError::QueueError(format!("{} queue closed", name)))
        }
    }
}

impl OutboundQueues {
    pub fn send_out(&self, msg: Message) -> Result<()> {
        try_push(&self.out, "outbound", msg)
    }

    pub fn send_invalid(&self, msg: Message) -> Result<()> {
        try_push(&self.invalid, "invalid", msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::messages::Heartbeat;
    use crate::primitives::{Hash, Timestamp};

    fn msg() -> Message {
        Heartbeat::new(Timestamp::now(), 0, Hash::ZERO).into()
    }

    #[test]
    fn test_full_queue_reports() {
        let (queues, mut rx) = channel(1);
        queues.send_out(msg()).unwrap();
        assert_eq!(queues.send_out(msg()).unwrap_err().kind(), ErrorKind::Queue);
        assert!(rx.out.try_recv().is_ok());
        assert!(rx.invalid.try_recv().is_err());
    }

    #[test]
    fn test_closed_queue_reports() {
        let (queues, rx) = channel(4);
        drop(rx);
        assert_eq!(queues.send_invalid(msg()).unwrap_err().kind(), ErrorKind::Queue);
    }
}
