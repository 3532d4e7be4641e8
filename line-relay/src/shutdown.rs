//! Graceful shutdown coordination via `CancellationToken`.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::Registry;

const IDLE: u8 = 0;
const DRAINING: u8 = 1;
const DONE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Draining,
    Done,
}

/// Owns the relay-wide shutdown signal and drives the drain sequence.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    phase: AtomicU8,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            phase: AtomicU8::new(IDLE),
        }
    }

    /// Get a clone of the shutdown token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            IDLE => Phase::Idle,
            DRAINING => Phase::Draining,
            _ => Phase::Done,
        }
    }

    /// Signals every task to stop and closes every registered connection.
    ///
    /// Only the first call does anything; it returns `true`. The accept loop
    /// drops its listener once it observes the cancelled token.
    pub async fn drain(&self, registry: &Registry) -> bool {
        if self
            .phase
            .compare_exchange(IDLE, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("shutdown already in progress");
            return false;
        }

        info!("initiating shutdown sequence");
        self.token.cancel();

        let closed = registry.close_all().await;
        info!(closed, "closed client connections");

        self.phase.store(DONE, Ordering::Release);
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ClientHandle, Closer};
    use tokio::sync::mpsc;

    #[test]
    fn starts_idle() {
        let coord = ShutdownCoordinator::new();
        assert_eq!(coord.phase(), Phase::Idle);
        assert!(!coord.token().is_cancelled());
    }

    #[tokio::test]
    async fn drain_cancels_token_and_finishes() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();

        assert!(coord.drain(&Registry::new()).await);
        assert!(token.is_cancelled());
        assert_eq!(coord.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn drain_closes_registered_clients() {
        let registry = Registry::new();
        let closer = Closer::new();
        let (tx, _rx) = mpsc::channel(1);
        registry
            .register(ClientHandle::new(registry.next_id(), "peer", tx, closer.clone()))
            .await;

        ShutdownCoordinator::new().drain(&registry).await;
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn second_drain_is_a_no_op() {
        let coord = ShutdownCoordinator::new();
        let registry = Registry::new();

        assert!(coord.drain(&registry).await);
        assert!(!coord.drain(&registry).await);
        assert!(!coord.drain(&registry).await);
        assert_eq!(coord.phase(), Phase::Done);
    }

    #[tokio::test]
    async fn waiters_wake_on_drain() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
            true
        });

        coord.drain(&Registry::new()).await;
        assert!(waiter.await.unwrap());
    }
}
