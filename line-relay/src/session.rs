use std::{io, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    select,
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, trace, warn};

use crate::{
    hub::Hub,
    line::{Inbound, read_line, write_line},
    registry::{ClientHandle, ClientId, Closer},
    relay::RelayState,
};

/// Why a client's reader stopped.
#[derive(Debug)]
pub enum Disconnect {
    /// The client sent `STOP`.
    Stop,
    /// The peer closed its side of the connection.
    Eof,
    /// The connection was closed from the relay side.
    Closed,
    /// Relay-wide shutdown was observed.
    Shutdown,
    Failed(io::Error),
}

/// Registers a freshly accepted connection and spawns its reader and writer.
pub(crate) async fn start_client<S>(
    stream: S,
    peer: String,
    state: &Arc<RelayState>,
    tracker: &TaskTracker,
) -> ClientId
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (outbox, inbox) = mpsc::channel(state.queue_capacity);
    let closer = Closer::new();
    let shutdown = state.coordinator.token();

    let id = state.registry.next_id();
    let active = state
        .registry
        .register(ClientHandle::new(id, peer.clone(), outbox, closer.clone()))
        .await;
    info!(client = id, %peer, active, "client connected");

    tracker.spawn(write_loop(
        id,
        write_half,
        inbox,
        closer.clone(),
        shutdown.clone(),
    ));

    let state = Arc::clone(state);
    tracker.spawn(async move {
        let reason = read_loop(id, BufReader::new(read_half), &state.hub, &closer, &shutdown).await;
        closer.close();
        state.registry.unregister(id).await;
        log_disconnect(id, &peer, reason);
    });

    id
}

/// Reads lines from one client until it stops, fails, or is closed.
///
/// Every line other than `STOP` is handed to the hub. The shutdown token is
/// checked before each read; a read already in flight is only interrupted by
/// `closer`.
pub async fn read_loop<R>(
    id: ClientId,
    mut reader: R,
    hub: &Hub,
    closer: &Closer,
    shutdown: &CancellationToken,
) -> Disconnect
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = String::new();
    loop {
        if shutdown.is_cancelled() {
            return Disconnect::Shutdown;
        }

        let read = select! {
            biased;
            _ = closer.closed() => {
                return if shutdown.is_cancelled() {
                    Disconnect::Shutdown
                } else {
                    Disconnect::Closed
                };
            }
            read = read_line(&mut reader, &mut buf) => read,
        };

        match read {
            Ok(true) => match Inbound::parse(&buf) {
                Inbound::Stop => return Disconnect::Stop,
                Inbound::Text(text) => {
                    let fanout = hub.broadcast(id, text).await;
                    trace!(client = id, ?fanout, "relayed line");
                }
            },
            Ok(false) => return Disconnect::Eof,
            Err(err) => return Disconnect::Failed(err),
        }
    }
}

/// Drains the client's queue onto its connection in FIFO order.
///
/// Exits without draining as soon as the client is closed or the relay shuts
/// down, then shuts down the write side of the connection.
pub async fn write_loop<W>(
    id: ClientId,
    mut writer: W,
    mut inbox: mpsc::Receiver<String>,
    closer: Closer,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = closer.closed() => break,
            next = inbox.recv() => match next {
                Some(line) => line,
                None => break,
            },
        };

        select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = closer.closed() => break,
            written = write_line(&mut writer, &line) => {
                if let Err(err) = written {
                    warn!(client = id, error = ?err, "failed to deliver line to client");
                }
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(client = id, error = ?err, "failed to close connection cleanly");
    }
}

fn log_disconnect(id: ClientId, peer: &str, reason: Disconnect) {
    match reason {
        Disconnect::Failed(err) => {
            warn!(client = id, %peer, error = ?err, "error reading from client")
        }
        Disconnect::Eof => info!(client = id, %peer, "client closed the connection"),
        reason => info!(client = id, %peer, ?reason, "client disconnected"),
    }
}
