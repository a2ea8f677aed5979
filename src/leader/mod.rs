//! The leader election gate (section 4.H): acquires a lease, fans out an
//! "am I leader" value to subscribers (the status writer, chiefly), and
//! treats loss of leadership as fatal so a restart races for the lease
//! cleanly rather than limping along half-elected.
//!
//! As with [`crate::cache::ObjectSource`] and [`crate::status::StatusSink`],
//! the gate never speaks to a real Kubernetes lease/configmap pair itself;
//! it is parameterized over [`LeaseBackend`].

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::errors::ContourError;
use crate::Result;

/// Abstracts lease acquisition/renewal (section 4.H ambient addition).
/// Implementations own whatever talks to the Kubernetes Lease/ConfigMap
/// pair; this crate ships only [`SingleProcessLease`], which always wins
/// immediately and never loses, for tests and single-replica deployments.
#[async_trait::async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Attempts to (re)acquire leadership. Returns `true` while this
    /// process holds the lease.
    async fn try_acquire(&mut self) -> Result<bool>;
}

/// Always holds the lease. The natural backend for a deployment that never
/// runs more than one replica, and for every unit test in this crate that
/// doesn't specifically exercise the multi-replica gate.
#[derive(Debug, Default)]
pub struct SingleProcessLease;

#[async_trait::async_trait]
impl LeaseBackend for SingleProcessLease {
    async fn try_acquire(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// A backend whose acquisition outcome is scripted up front, for testing
/// leadership-loss handling deterministically.
pub struct ScriptedLease {
    script: std::collections::VecDeque<Result<bool>>,
}

impl ScriptedLease {
    pub fn new(script: Vec<bool>) -> Self {
        Self { script: script.into_iter().map(Ok).collect() }
    }
}

#[async_trait::async_trait]
impl LeaseBackend for ScriptedLease {
    async fn try_acquire(&mut self) -> Result<bool> {
        self.script.pop_front().unwrap_or(Ok(false))
    }
}

/// Owns the renewal loop and fans out "am I leader" over a `watch` channel
/// (section 4.H: "a single notifier fans the 'elected' event out to
/// subscribers"). `renew_deadline` governs both the renewal cadence and the
/// deadline within it, per the default "10s within a 15s lease" in section
/// 5; this gate treats a failed renewal attempt as an immediate loss of
/// leadership rather than retrying silently, since the lease itself already
/// encodes the retry budget.
pub struct LeaderElectionGate<B: LeaseBackend> {
    backend: B,
    retry_period: Duration,
    sender: watch::Sender<bool>,
}

impl<B: LeaseBackend> LeaderElectionGate<B> {
    pub fn new(backend: B, retry_period: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self { backend, retry_period, sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    /// Runs until `shutdown` fires or leadership is lost after having been
    /// held (section 4.H: "loss of leadership terminates the process").
    /// Never having acquired leadership at all is not fatal — the process
    /// simply keeps retrying at `retry_period`, which is the normal
    /// steady-state for every non-leader replica.
    pub async fn run(mut self, shutdown: tokio_util::sync::CancellationToken) -> Result<()> {
        let mut ever_leader = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("leader election gate shutting down");
                    return Ok(());
                }
                result = self.backend.try_acquire() => {
                    match result {
                        Ok(true) => {
                            if !ever_leader {
                                info!("acquired leader lease");
                            }
                            ever_leader = true;
                            let _ = self.sender.send(true);
                        }
                        Ok(false) => {
                            let _ = self.sender.send(false);
                            if ever_leader {
                                warn!("lost leader lease");
                                return Err(ContourError::fatal("leader lease lost"));
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "lease renewal attempt failed");
                            let _ = self.sender.send(false);
                            if ever_leader {
                                return Err(ContourError::fatal_with_source(
                                    "leader lease lost",
                                    Box::new(err),
                                ));
                            }
                        }
                    }
                }
            }
            tokio::time::sleep(self.retry_period).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_process_lease_always_wins() {
        let gate = LeaderElectionGate::new(SingleProcessLease, Duration::from_millis(10));
        let mut rx = gate.subscribe();
        let shutdown = tokio_util::sync::CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        let handle = tokio::spawn(gate.run(shutdown_clone));
        rx.changed().await.unwrap();
        assert!(*rx.borrow());

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn losing_a_held_lease_is_fatal() {
        let backend = ScriptedLease::new(vec![true, false]);
        let gate = LeaderElectionGate::new(backend, Duration::from_millis(1));
        let shutdown = tokio_util::sync::CancellationToken::new();

        let result = gate.run(shutdown).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn never_acquiring_is_not_fatal() {
        let backend = ScriptedLease::new(vec![false, false]);
        let gate = LeaderElectionGate::new(backend, Duration::from_millis(1));
        let shutdown = tokio_util::sync::CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            shutdown_clone.cancel();
        });

        let result = gate.run(shutdown).await;
        assert!(result.is_ok());
    }
}
