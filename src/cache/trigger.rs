//! The "latest-wins" single-slot notification between the cache and the DAG
//! builder (section 9design notes, "Coalescing"): a burst of inserts
//! collapses to one pending trigger; the builder drains it, rebuilds once,
//! then re-checks, so a 1000-pod rollout produces one rebuild, not 1000.

use tokio::sync::watch;

/// Held by the cache; each change bumps the generation counter that
/// [`TriggerReceiver`] watches.
#[derive(Clone)]
pub struct CoalescingTrigger {
    tx: watch::Sender<u64>,
}

impl CoalescingTrigger {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    pub fn subscribe(&self) -> TriggerReceiver {
        TriggerReceiver { rx: self.tx.subscribe() }
    }
}

impl Default for CoalescingTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by the DAG builder loop. `changed()` resolves as soon as at least
/// one notification has landed since the last call, regardless of how many
/// landed in between — that's the coalescing property.
pub struct TriggerReceiver {
    rx: watch::Receiver<u64>,
}

impl TriggerReceiver {
    /// Waits for the next pending change. Returns `Err` only if every
    /// `CoalescingTrigger` clone has been dropped (the cache shut down).
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }

    /// True if a change has landed since the receiver last observed one,
    /// without blocking — used for the builder's re-check after a build
    /// completes, per the design note ("A pending update arriving during
    /// the build is seen on the next iteration").
    pub fn has_pending(&mut self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn multiple_notifications_coalesce_into_one_wakeup() {
        let trigger = CoalescingTrigger::new();
        let mut rx = trigger.subscribe();

        trigger.notify();
        trigger.notify();
        trigger.notify();

        rx.changed().await.unwrap();
        rx.mark_seen();
        assert!(!rx.has_pending());
    }

    #[tokio::test]
    async fn a_change_during_build_is_seen_on_next_check() {
        let trigger = CoalescingTrigger::new();
        let mut rx = trigger.subscribe();
        trigger.notify();
        rx.changed().await.unwrap();
        rx.mark_seen();

        trigger.notify();
        assert!(rx.has_pending());
    }
}
