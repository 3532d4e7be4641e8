use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, select, time::sleep};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::{
    hub::Hub,
    listener::Listener,
    registry::Registry,
    session::start_client,
    shutdown::ShutdownCoordinator,
};

/// Pause after a failed accept so a persistent error (such as running out of
/// file descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Tunables for a running relay.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Lines buffered per client before new ones are dropped for that client.
    pub queue_capacity: usize,
    /// How long to wait for client tasks to finish once shutdown starts.
    pub drain_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Relay<L> {
    listener: L,
    settings: RelaySettings,
    state: Arc<RelayState>,
}

pub(crate) struct RelayState {
    pub(crate) registry: Arc<Registry>,
    pub(crate) hub: Hub,
    pub(crate) coordinator: ShutdownCoordinator,
    pub(crate) queue_capacity: usize,
}

impl RelayState {
    fn new(queue_capacity: usize) -> Self {
        let registry = Arc::new(Registry::new());
        let coordinator = ShutdownCoordinator::new();
        let hub = Hub::new(Arc::clone(&registry), coordinator.token());
        Self {
            registry,
            hub,
            coordinator,
            queue_capacity: queue_capacity.max(1),
        }
    }
}

impl<L: Listener> Relay<L> {
    pub fn new(listener: L) -> Self {
        Self::with_settings(listener, RelaySettings::default())
    }

    pub fn with_settings(listener: L, settings: RelaySettings) -> Self {
        let state = Arc::new(RelayState::new(settings.queue_capacity));
        Self {
            listener,
            settings,
            state,
        }
    }

    /// Relays lines until `shutdown` resolves, then drains every task.
    ///
    /// Returns once the accept loop and every client task have finished, or
    /// after the drain timeout has passed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay {
            listener,
            settings,
            state,
        } = self;
        let tracker = TaskTracker::new();

        let accept = tracker.spawn(accept_loop(listener, Arc::clone(&state), tracker.clone()));

        shutdown.await;
        state.coordinator.drain(&state.registry).await;
        tracker.close();

        let drained = tokio::time::timeout(settings.drain_timeout, async {
            if let Err(err) = accept.await {
                warn!(error = ?err, "accept loop panicked");
            }
            tracker.wait().await;
        })
        .await;

        let phase = state.coordinator.phase();
        match drained {
            Ok(()) => info!(?phase, "shutdown sequence over"),
            Err(_) => warn!(
                ?phase,
                remaining = tracker.len(),
                timeout = ?settings.drain_timeout,
                "shutdown timed out, some client tasks may still be running"
            ),
        }
        Ok(())
    }

    /// Runs until the process receives SIGINT.
    ///
    /// The handler is installed before the first connection is accepted.
    #[cfg(unix)]
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        use anyhow::Context;
        use tokio::signal::unix::{SignalKind, signal};

        let mut interrupt =
            signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
        self.run_until(async move {
            interrupt.recv().await;
        })
        .await
    }

    #[cfg(not(unix))]
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

impl Relay<TcpListener> {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

async fn accept_loop<L: Listener>(mut listener: L, state: Arc<RelayState>, tracker: TaskTracker) {
    let shutdown = state.coordinator.token();

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let accepted = select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                start_client(stream, peer.to_string(), &state, &tracker).await;
            }
            Err(err) if shutdown.is_cancelled() => {
                debug!(error = ?err, "accept interrupted by shutdown");
                break;
            }
            Err(err) => {
                warn!(error = ?err, "failed to accept connection");
                select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    drop(listener);
    info!("listener closed");
}
