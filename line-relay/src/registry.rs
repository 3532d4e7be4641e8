use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type ClientId = u64;

/// Close switch shared by a client's reader, writer, and registry entry.
///
/// Exactly one `close` call wins, however many race.
#[derive(Debug, Clone, Default)]
pub struct Closer {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl Closer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the connection was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn closed(&self) {
        self.token.cancelled().await
    }
}

/// Everything other tasks need to reach one connected client.
///
/// The connection itself stays with the client's reader and writer tasks;
/// the handle only carries the outbound queue and the close switch.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ClientId,
    peer: String,
    outbox: mpsc::Sender<String>,
    closer: Closer,
}

impl ClientHandle {
    pub fn new(
        id: ClientId,
        peer: impl Into<String>,
        outbox: mpsc::Sender<String>,
        closer: Closer,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            outbox,
            closer,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn outbox(&self) -> &mpsc::Sender<String> {
        &self.outbox
    }

    /// Closes the client's connection. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.closer.close()
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }
}

/// Connected clients in connection order.
#[derive(Debug)]
pub struct Registry {
    clients: Mutex<Vec<ClientHandle>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Appends a client and returns the number of registered clients.
    pub async fn register(&self, client: ClientHandle) -> usize {
        let mut clients = self.clients.lock().await;
        clients.push(client);
        clients.len()
    }

    pub async fn unregister(&self, id: ClientId) -> Option<ClientHandle> {
        let mut clients = self.clients.lock().await;
        let index = clients.iter().position(|client| client.id == id)?;
        Some(clients.remove(index))
    }

    pub async fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Closes every registered connection and returns how many were still open.
    ///
    /// Holds the lock for the whole pass so a concurrent `unregister` cannot
    /// interleave with it.
    pub async fn close_all(&self) -> usize {
        let clients = self.clients.lock().await;
        let mut closed = 0;
        for client in clients.iter() {
            if client.close() {
                closed += 1;
            } else {
                debug!(client = client.id, peer = %client.peer, "connection already closed");
            }
        }
        closed
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
