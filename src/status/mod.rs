//! The status writer (section 4.F): turns the `StatusFact` stream the DAG
//! builder emits into debounced, leader-gated patches against the
//! `/status` subresource of the objects the builder visited.
//!
//! The writer never talks JSON-patch to a real API server itself (out of
//! scope, section 1); it is parameterized over [`StatusSink`], mirroring
//! the `ObjectSource`/`LeaseBackend` seams used elsewhere in this crate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::{Condition, Generation, ObjectRef, StatusFact};
use crate::observability::metrics::MetricsRecorder;
use crate::Result;

/// What gets patched onto one object's `/status`. `observed_generation` lets
/// clients detect stale status (section 4.F "Semantics"); conditions for
/// types not present in a patch are left untouched by the sink.
#[derive(Debug, PartialEq, Eq)]
pub struct StatusPatch {
    pub observed_generation: Generation,
    pub conditions: Vec<Condition>,
}

/// The ambient seam this module is built against (SPEC_FULL.md 4.F). A real
/// implementation issues a JSON-patch to `/status`; tests use
/// [`RecordingStatusSink`].
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    async fn patch_status(&self, obj: &ObjectRef, patch: StatusPatch) -> Result<()>;
}

/// Records every patch it receives, in order, for assertions in tests.
#[derive(Default)]
pub struct RecordingStatusSink {
    patches: std::sync::Mutex<Vec<(ObjectRef, StatusPatch)>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patches(&self) -> Vec<(ObjectRef, StatusPatch)> {
        self.patches.lock().expect("recording sink lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl StatusSink for RecordingStatusSink {
    async fn patch_status(&self, obj: &ObjectRef, patch: StatusPatch) -> Result<()> {
        self.patches.lock().expect("recording sink lock poisoned").push((obj.clone(), patch));
        Ok(())
    }
}

/// Per-object pending state: only the latest generation and conditions
/// matter (section 4.F "Policy" — "keeping only the latest generation
/// seen").
#[derive(Default)]
struct Pending {
    entries: BTreeMap<ObjectRef, (Generation, Vec<Condition>)>,
}

impl Pending {
    fn record(&mut self, fact: StatusFact) {
        self.entries.insert(fact.object, (fact.generation, fact.conditions));
    }

    fn drain(&mut self) -> BTreeMap<ObjectRef, (Generation, Vec<Condition>)> {
        std::mem::take(&mut self.entries)
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Debounces and leader-gates the flush of `StatusFact`s onto a
/// [`StatusSink`] (section 4.F).
pub struct StatusWriter {
    sink: Arc<dyn StatusSink>,
    debounce: Duration,
    max_retries: u32,
}

impl StatusWriter {
    /// `debounce` is the "a few hundred ms" flush interval from section
    /// 4.F; a few hundred ms is the right order of magnitude to avoid
    /// API-server hot-looping on a busy cluster without noticeably
    /// delaying status visibility.
    pub fn new(sink: Arc<dyn StatusSink>, debounce: Duration) -> Self {
        Self { sink, debounce, max_retries: 5 }
    }

    /// Runs until `facts` closes or `shutdown` fires. Non-leader instances
    /// keep draining `facts` into `pending` (section 4.F: "non-leader
    /// instances accumulate facts so that a newly-elected leader has
    /// up-to-date state to flush") but never call the sink; becoming
    /// leader flushes everything accumulated so far on the very next tick.
    pub async fn run(
        mut self,
        mut facts: mpsc::Receiver<StatusFact>,
        mut is_leader: watch::Receiver<bool>,
        mut shutdown: tokio_util::sync::CancellationToken,
    ) {
        let mut pending = Pending::default();
        let mut ticker = tokio::time::interval(self.debounce);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("status writer shutting down, flushing pending batch");
                    self.flush(&mut pending, *is_leader.borrow()).await;
                    break;
                }
                fact = facts.recv() => {
                    match fact {
                        Some(fact) => pending.record(fact),
                        None => {
                            self.flush(&mut pending, *is_leader.borrow()).await;
                            break;
                        }
                    }
                }
                Ok(()) = is_leader.changed() => {
                    if *is_leader.borrow() && !pending.is_empty() {
                        debug!("became leader with a pending status batch, flushing immediately");
                        self.flush(&mut pending, true).await;
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut pending, *is_leader.borrow()).await;
                }
            }
        }
    }

    /// Issues one patch per pending object, retrying `TransientApi` errors
    /// with exponential backoff and dropping everything else (section 4.F
    /// "Failure": "a persistent failure on one object never blocks writes
    /// to others").
    async fn flush(&self, pending: &mut Pending, leader: bool) {
        if !leader {
            return;
        }

        for (object, (generation, conditions)) in pending.drain() {
            let kind = object.kind.as_str();
            let patch = StatusPatch { observed_generation: generation, conditions };
            let mut attempt = 0;
            loop {
                match self.sink.patch_status(&object, patch.clone()).await {
                    Ok(()) => {
                        MetricsRecorder::new().record_status_flush(kind, true);
                        break;
                    }
                    Err(err) if err.is_local() || attempt >= self.max_retries => {
                        warn!(object = %object, error = %err, "giving up on status patch");
                        MetricsRecorder::new().record_status_flush(kind, false);
                        break;
                    }
                    Err(err) => {
                        attempt += 1;
                        let backoff = Duration::from_millis(100 * 2u64.pow(attempt.min(6)));
                        warn!(object = %object, error = %err, attempt, "retrying status patch");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }
}

impl Clone for StatusPatch {
    fn clone(&self) -> Self {
        Self { observed_generation: self.observed_generation, conditions: self.conditions.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectKind, ObjectRef};
    use std::time::Duration;

    fn fact(name: &str, generation: Generation) -> StatusFact {
        StatusFact::new(
            ObjectRef::new(ObjectKind::HttpProxy, "default", name),
            generation,
            vec![Condition::valid()],
        )
    }

    #[tokio::test]
    async fn leader_flushes_on_debounce_tick() {
        let sink = Arc::new(RecordingStatusSink::new());
        let writer = StatusWriter::new(sink.clone(), Duration::from_millis(20));
        let (fact_tx, fact_rx) = mpsc::channel(8);
        let (leader_tx, leader_rx) = watch::channel(true);
        let shutdown = tokio_util::sync::CancellationToken::new();

        fact_tx.send(fact("a", 1)).await.unwrap();
        drop(fact_tx);

        writer.run(fact_rx, leader_rx, shutdown).await;
        drop(leader_tx);

        assert_eq!(sink.patches().len(), 1);
    }

    #[tokio::test]
    async fn non_leader_accumulates_without_writing() {
        let sink = Arc::new(RecordingStatusSink::new());
        let writer = StatusWriter::new(sink.clone(), Duration::from_millis(500));
        let (fact_tx, fact_rx) = mpsc::channel(8);
        let (_leader_tx, leader_rx) = watch::channel(false);
        let shutdown = tokio_util::sync::CancellationToken::new();

        fact_tx.send(fact("a", 1)).await.unwrap();
        drop(fact_tx);

        writer.run(fact_rx, leader_rx, shutdown).await;

        assert!(sink.patches().is_empty());
    }

    #[tokio::test]
    async fn only_latest_generation_is_flushed() {
        let sink = Arc::new(RecordingStatusSink::new());
        let writer = StatusWriter::new(sink.clone(), Duration::from_millis(20));
        let (fact_tx, fact_rx) = mpsc::channel(8);
        let (_leader_tx, leader_rx) = watch::channel(true);
        let shutdown = tokio_util::sync::CancellationToken::new();

        fact_tx.send(fact("a", 1)).await.unwrap();
        fact_tx.send(fact("a", 2)).await.unwrap();
        drop(fact_tx);

        writer.run(fact_rx, leader_rx, shutdown).await;

        let patches = sink.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1.observed_generation, 2);
    }
}
