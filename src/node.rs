use crate::config::{Config, DatabaseKind};
use crate::error::{ErrorKind, Result};
use crate::messages::{DBState, Message};
use crate::persistence::{Database, InMemoryDatabase, SqliteDatabase};
use crate::queues::{self, QueueReceivers};
use crate::state::{State, StateSettings};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Running,
    /// Block production stopped on a fatal chain mismatch.
    Halted,
}

/// The transport's side of a node: where to push inbound messages and
/// where to pick up outbound ones.
pub struct NodeChannels {
    pub inbound: mpsc::Sender<Message>,
    pub outbound: QueueReceivers,
}

pub struct Node {
    pub config: Config,
    pub state: Arc<Mutex<State>>,
    pub status: Arc<RwLock<NodeState>>,
    inbound: mpsc::Receiver<Message>,
}

impl Node {
    /// Opens the configured database and builds the node on top of it.
    pub fn init(config: Config) -> Result<(Self, NodeChannels)> {
        let db: Box<dyn Database> = match config.database.kind {
            DatabaseKind::Memory => Box::new(InMemoryDatabase::new()),
            DatabaseKind::Sqlite => {
                let db_path = std::path::Path::new(&config.database.path);
                if let Some(parent) = db_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                match SqliteDatabase::open(&config.database.path) {
                    Ok(db) => Box::new(db),
                    Err(e) => {
                        warn!(
                            "Failed to open DB at {}: {}. Falling back to in-memory persistence.",
                            config.database.path, e
                        );
                        Box::new(InMemoryDatabase::new())
                    }
                }
            }
        };
        Self::with_database(config, db)
    }

    pub fn with_database(config: Config, db: Box<dyn Database>) -> Result<(Self, NodeChannels)> {
        let settings = StateSettings::from_config(&config)?;
        let capacity = config.consensus.queue_capacity;
        let (queues, outbound) = queues::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));

        info!(
            name = %config.node.name,
            network_id = settings.network_id,
            identity = %settings.identity,
            "Starting fedchain node"
        );
        let state = State::new(settings, db, queues)?;
        let node = Node {
            config,
            state: Arc::new(Mutex::new(state)),
            status: Arc::new(RwLock::new(NodeState::Booting)),
            inbound: inbound_rx,
        };
        Ok((
            node,
            NodeChannels {
                inbound: inbound_tx,
                outbound,
            },
        ))
    }

    /// The recorded block at `db_height` packaged for a node that fell behind.
    pub fn dbstate(&self, db_height: u32) -> Result<Option<DBState>> {
        self.state.lock().load_dbstate(db_height)
    }

    /// Drives the state until the inbound channel closes or the chain halts.
    ///
    /// Inbound messages, the end-of-minute timer and holding retries are
    /// all handled on this one task, so execution follows arrival order.
    pub async fn run(self) -> Result<()> {
        let Node {
            state,
            status,
            mut inbound,
            ..
        } = self;

        let (minute, backoff) = {
            let s = state.lock();
            (
                Duration::from_millis(s.directory_block_seconds() * 1000 / 10),
                s.retry_backoff().max(Duration::from_millis(1)),
            )
        };
        let mut minute_tick = tokio::time::interval_at(tokio::time::Instant::now() + minute, minute);
        let mut retry_tick = tokio::time::interval(backoff);
        *status.write().await = NodeState::Running;
        info!(minute_ms = minute.as_millis() as u64, "Node running");

        loop {
            let result = tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => step(&state, |s| s.handle_message(msg).map(|_| ())),
                    None => {
                        info!("inbound channel closed, node stopping");
                        return Ok(());
                    }
                },
                _ = minute_tick.tick() => step(&state, |s| {
                    s.end_minute()?;
                    s.heartbeat()?;
                    Ok(())
                }),
                _ = retry_tick.tick() => step(&state, |s| s.retry_holding(Instant::now(), false).map(|_| ())),
            };
            if let Err(e) = result {
                *status.write().await = NodeState::Halted;
                return Err(e);
            }
        }
    }
}

/// Runs one state operation. Only a halted chain is fatal to the loop.
fn step(state: &Mutex<State>, f: impl FnOnce(&mut State) -> Result<()>) -> Result<()> {
    let mut guard = state.lock();
    match f(&mut guard) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::ChainHalted => {
            error!(error = %e, "chain halted");
            Err(e)
        }
        Err(e) => {
            warn!(error = %e, "state operation failed");
            Ok(())
        }
    }
}
