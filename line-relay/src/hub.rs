use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::{ClientId, Registry};

/// Outcome of relaying one line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    /// Clients whose queue was full; the line was dropped for them only.
    pub dropped: usize,
    /// Clients already closed or whose writer had gone away.
    pub skipped: usize,
}

/// Fans each line out to every registered client, the sender included.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    shutdown: CancellationToken,
}

impl Hub {
    pub fn new(registry: Arc<Registry>, shutdown: CancellationToken) -> Self {
        Self { registry, shutdown }
    }

    /// Enqueues `line` for every client without waiting on any of them.
    pub async fn broadcast(&self, from: ClientId, line: &str) -> Fanout {
        let mut fanout = Fanout::default();
        if self.shutdown.is_cancelled() {
            return fanout;
        }

        for client in self.registry.snapshot().await {
            if client.is_closed() {
                fanout.skipped += 1;
                continue;
            }
            match client.outbox().try_send(line.to_owned()) {
                Ok(()) => fanout.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    fanout.dropped += 1;
                    warn!(
                        client = client.id(),
                        from, "outbound queue full, dropping line"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    fanout.skipped += 1;
                    debug!(client = client.id(), "writer gone, skipping client");
                }
            }
        }

        fanout
    }
}
