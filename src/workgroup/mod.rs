//! The event loop / workgroup (section 4.G): a single owner for the
//! lifetimes of every long-lived worker task (API ingestion, the DAG
//! builder loop, the status writer, the xDS server, the admin endpoint,
//! leader election). When any one returns, a shared stop signal is
//! propagated and every other worker must return within a bounded grace
//! period; the first non-`Ok` termination reason becomes the process exit
//! reason (section 4.G, section 5 "Cancellation").

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::ContourError;
use crate::Result;

/// A named worker future. Workers receive a [`CancellationToken`] and are
/// expected to return promptly once it fires; a worker that returns
/// `Err(_)` (including "finished when it shouldn't have", which a caller
/// encodes as an error) triggers shutdown of every other worker.
pub struct Workgroup {
    token: CancellationToken,
    grace_period: Duration,
    tasks: JoinSet<(&'static str, Result<()>)>,
}

impl Workgroup {
    pub fn new(grace_period: Duration) -> Self {
        Self { token: CancellationToken::new(), grace_period, tasks: JoinSet::new() }
    }

    /// The token every worker should select on alongside its own work.
    pub fn stop_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Registers a worker. `name` identifies it in logs and in the final
    /// termination reason.
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.spawn(async move { (name, future.await) });
    }

    /// Runs until the first worker returns, then raises the stop signal and
    /// waits up to `grace_period` for the rest to drain. Returns the first
    /// non-`Ok` reason encountered, or `Ok(())` if every worker exited
    /// cleanly within the grace period.
    pub async fn run(mut self) -> Result<()> {
        let mut outcome: Result<()> = Ok(());
        let mut first_done = None;

        if let Some(result) = self.tasks.join_next().await {
            let (name, worker_result) = result.map_err(|e| {
                ContourError::fatal_with_source("worker task panicked", Box::new(e))
            })?;
            first_done = Some(name);
            if let Err(err) = &worker_result {
                error!(worker = name, error = %err, "worker exited with an error, stopping workgroup");
            } else {
                info!(worker = name, "worker exited, stopping workgroup");
            }
            outcome = worker_result;
        }

        self.token.cancel();

        let drain = async {
            while let Some(result) = self.tasks.join_next().await {
                match result {
                    Ok((name, Ok(()))) => info!(worker = name, "worker drained cleanly"),
                    Ok((name, Err(err))) => {
                        warn!(worker = name, error = %err, "worker exited with an error during drain");
                        if outcome.is_ok() {
                            outcome = Err(err);
                        }
                    }
                    Err(join_err) => {
                        warn!(error = %join_err, "worker task panicked during drain");
                    }
                }
            }
        };

        if tokio::time::timeout(self.grace_period, drain).await.is_err() {
            warn!(
                grace_period_seconds = self.grace_period.as_secs(),
                first_exited = ?first_done,
                "workgroup grace period elapsed with workers still running"
            );
            self.tasks.abort_all();
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn first_exit_stops_the_group() {
        let mut group = Workgroup::new(Duration::from_millis(200));
        let token = group.stop_token();

        group.spawn("eager", async { Ok(()) });
        group.spawn("patient", async move {
            token.cancelled().await;
            Ok(())
        });

        let result = group.run().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn an_erroring_worker_is_the_exit_reason() {
        let mut group = Workgroup::new(Duration::from_millis(200));
        let token = group.stop_token();

        group.spawn("failing", async { Err(ContourError::fatal("boom")) });
        group.spawn("patient", async move {
            token.cancelled().await;
            Ok(())
        });

        let result = group.run().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn slow_worker_is_aborted_after_grace_period() {
        let mut group = Workgroup::new(Duration::from_millis(20));
        group.spawn("eager", async { Ok(()) });
        group.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        let result = group.run().await;
        assert!(result.is_ok());
    }
}
