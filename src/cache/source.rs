//! The `ObjectSource` seam (section 4.A ambient addition): the cache does
//! not itself speak to the Kubernetes API. Anything that can hand it a
//! stream of typed add/update/delete events qualifies as a source, which
//! keeps the cache, and everything downstream of it, testable without a
//! real API server.

use tokio::sync::mpsc;

use crate::domain::{ObjectKind, ObjectRef};

use super::store::CacheEntry;

/// One observed change to a watched object (section 6 "Inbound from
/// Kubernetes API"): a real informer delivers these after list+watch
/// resumption; a `StaticObjectSource` just replays a fixed script.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: ObjectRef,
    pub action: WatchAction,
}

#[derive(Debug, Clone)]
pub enum WatchAction {
    Upsert(CacheEntry),
    Delete,
}

impl WatchEvent {
    pub fn upsert(key: ObjectRef, entry: CacheEntry) -> Self {
        Self { key, action: WatchAction::Upsert(entry) }
    }

    pub fn delete(key: ObjectRef) -> Self {
        Self { key, action: WatchAction::Delete }
    }

    pub fn kind(&self) -> ObjectKind {
        self.key.kind
    }
}

/// Abstracts "a typed object stream from the Kubernetes API" down to its
/// observable contract: a channel of [`WatchEvent`]s. Implementers own
/// whatever reconnection/resumption logic the real client needs; none of
/// that is this crate's concern.
pub trait ObjectSource: Send + Sync {
    /// Takes ownership of the receiving end of this source's event stream.
    /// Called exactly once per source, typically by the workgroup at
    /// startup.
    fn events(&mut self) -> mpsc::Receiver<WatchEvent>;
}

/// Replays a fixed script of events, then closes its channel. Used by
/// tests and by the section 8 scenario fixtures; a production binary
/// plugs in a real informer-backed source instead (out of scope here).
pub struct StaticObjectSource {
    events: Vec<WatchEvent>,
}

impl StaticObjectSource {
    pub fn new(events: Vec<WatchEvent>) -> Self {
        Self { events }
    }
}

impl ObjectSource for StaticObjectSource {
    fn events(&mut self) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(self.events.len().max(1));
        let events = std::mem::take(&mut self.events);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Drains a source's events into the cache until the channel closes,
/// applying each one and letting the cache's own coalescing trigger fan
/// out the rebuild signal (section 4.A, design notes "Coalescing"). This
/// is the ingestion layer's entire job: no retry, no backoff, no decode —
/// those belong to the `ObjectSource` implementation, per the "decode
/// errors are logged and that object is ignored" rule living at the
/// source boundary, not here.
pub async fn pump_into_cache(
    mut source: impl ObjectSource,
    cache: std::sync::Arc<super::store::ObjectCache>,
) {
    let mut events = source.events();
    while let Some(event) = events.recv().await {
        match event.action {
            WatchAction::Upsert(entry) => {
                cache.insert(event.key, entry);
            }
            WatchAction::Delete => {
                cache.remove(&event.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectKind, ServicePort};

    fn svc(name: &str) -> CacheEntry {
        CacheEntry::Service(crate::domain::Service {
            namespace: "default".into(),
            name: name.into(),
            ports: vec![ServicePort { name: None, port: 80, target_port: 8080 }],
        })
    }

    #[tokio::test]
    async fn static_source_replays_events_into_the_cache() {
        let key = ObjectRef::new(ObjectKind::Service, "default", "echo");
        let source =
            StaticObjectSource::new(vec![WatchEvent::upsert(key.clone(), svc("echo"))]);
        let cache = std::sync::Arc::new(super::super::store::ObjectCache::new(false));

        pump_into_cache(source, cache.clone()).await;

        assert!(cache.get(&key).is_some());
    }

    #[tokio::test]
    async fn delete_event_removes_the_key() {
        let key = ObjectRef::new(ObjectKind::Service, "default", "echo");
        let source = StaticObjectSource::new(vec![
            WatchEvent::upsert(key.clone(), svc("echo")),
            WatchEvent::delete(key.clone()),
        ]);
        let cache = std::sync::Arc::new(super::super::store::ObjectCache::new(false));

        pump_into_cache(source, cache.clone()).await;

        assert!(cache.get(&key).is_none());
    }
}
