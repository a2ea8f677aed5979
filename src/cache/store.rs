use std::collections::HashSet;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cache::trigger::{CoalescingTrigger, TriggerReceiver};
use crate::domain::{
    EndpointSlice, ExtensionService, Gateway, GatewayClass, Generation, GrpcRoute, HttpProxy,
    HttpRoute, Ingress, Namespace, ObjectKind, ObjectRef, ReferenceGrant, Secret, SecretKind,
    Service, TcpRoute, TlsCertificateDelegation, TlsRoute,
};

/// One typed payload per watched kind, wrapped so a single `DashMap` can
/// hold every kind under its `ObjectRef` key. The cache never downcasts
/// across kinds; callers use [`ObjectCache::list`] / [`ObjectCache::get`]
/// with a kind-specific accessor.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Service(Service),
    EndpointSlice(EndpointSlice),
    Secret(Secret),
    Ingress(Ingress),
    HttpProxy(HttpProxy),
    TlsCertificateDelegation(TlsCertificateDelegation),
    ExtensionService(ExtensionService),
    Gateway(Gateway),
    GatewayClass(GatewayClass),
    HttpRoute(HttpRoute),
    TlsRoute(TlsRoute),
    TcpRoute(TcpRoute),
    GrpcRoute(GrpcRoute),
    ReferenceGrant(ReferenceGrant),
    Namespace(Namespace),
}

impl CacheEntry {
    pub fn kind(&self) -> ObjectKind {
        match self {
            CacheEntry::Service(_) => ObjectKind::Service,
            CacheEntry::EndpointSlice(_) => ObjectKind::EndpointSlice,
            CacheEntry::Secret(_) => ObjectKind::Secret,
            CacheEntry::Ingress(_) => ObjectKind::Ingress,
            CacheEntry::HttpProxy(_) => ObjectKind::HttpProxy,
            CacheEntry::TlsCertificateDelegation(_) => ObjectKind::TlsCertificateDelegation,
            CacheEntry::ExtensionService(_) => ObjectKind::ExtensionService,
            CacheEntry::Gateway(_) => ObjectKind::Gateway,
            CacheEntry::GatewayClass(_) => ObjectKind::GatewayClass,
            CacheEntry::HttpRoute(_) => ObjectKind::HttpRoute,
            CacheEntry::TlsRoute(_) => ObjectKind::TlsRoute,
            CacheEntry::TcpRoute(_) => ObjectKind::TcpRoute,
            CacheEntry::GrpcRoute(_) => ObjectKind::GrpcRoute,
            CacheEntry::ReferenceGrant(_) => ObjectKind::ReferenceGrant,
            CacheEntry::Namespace(_) => ObjectKind::Namespace,
        }
    }

    /// A secret is only syntactically admissible if it carries the material
    /// its kind requires (section 4.A: "secrets are only retained if they
    /// are syntactically valid certificate/key material or are referenced
    /// by a watched routing object").
    fn admissible(&self) -> bool {
        match self {
            CacheEntry::Secret(s) => match s.kind {
                SecretKind::TlsCertificate => {
                    s.certificate_chain.as_deref().is_some_and(|c| !c.trim().is_empty())
                        && s.private_key.as_deref().is_some_and(|k| !k.trim().is_empty())
                }
                SecretKind::CertificateAuthorityBundle => {
                    s.certificate_chain.as_deref().is_some_and(|c| !c.trim().is_empty())
                }
                SecretKind::Opaque => true,
            },
            _ => true,
        }
    }
}

struct StoredEntry {
    value: CacheEntry,
    generation: Generation,
}

/// Typed, indexed in-memory store of watched resources (section 4.A).
///
/// Inserts are last-writer-wins per key and report whether the stored value
/// actually changed, so unchanged re-deliveries (identical resource version
/// replayed after a watch resync) don't propagate a rebuild trigger.
pub struct ObjectCache {
    entries: DashMap<ObjectRef, StoredEntry>,
    next_generation: std::sync::atomic::AtomicU64,
    pruning: bool,
    trigger: CoalescingTrigger,
}

impl ObjectCache {
    /// `pruning`: when true, [`ObjectCache::prune_unreferenced`] actually
    /// removes Service/EndpointSlice/Secret entries nothing references; when
    /// false the cache retains everything it has ever seen (section 4.A
    /// "non-pruning mode").
    pub fn new(pruning: bool) -> Self {
        Self {
            entries: DashMap::new(),
            next_generation: std::sync::atomic::AtomicU64::new(1),
            pruning,
            trigger: CoalescingTrigger::new(),
        }
    }

    pub fn subscribe(&self) -> TriggerReceiver {
        self.trigger.subscribe()
    }

    /// Insert or update an object. Returns `true` if the stored value
    /// changed (admission-filtered secrets that fail validation are
    /// logged and dropped, matching the "decode errors... logged and that
    /// object is ignored" failure mode in section 4.A).
    pub fn insert(&self, key: ObjectRef, value: CacheEntry) -> bool {
        if !value.admissible() {
            warn!(object = %key, "rejecting syntactically invalid object at admission");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let changed = match self.entries.get(&key) {
            Some(existing) => existing.value != value,
            None => true,
        };

        self.entries.insert(key.clone(), StoredEntry { value, generation });

        if changed {
            debug!(object = %key, "cache entry changed");
            self.trigger.notify();
        }
        changed
    }

    /// Remove an object; returns `true` if it was present.
    pub fn remove(&self, key: &ObjectRef) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            debug!(object = %key, "cache entry removed");
            self.trigger.notify();
        }
        removed
    }

    pub fn get(&self, key: &ObjectRef) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value.clone())
    }

    pub fn list(&self, kind: ObjectKind) -> Vec<(ObjectRef, CacheEntry)> {
        self.entries
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    /// Same as [`ObjectCache::list`] but includes each entry's generation,
    /// for callers (the DAG builder) that need to stamp `observedGeneration`
    /// onto a [`crate::domain::StatusFact`].
    pub fn list_with_generations(&self, kind: ObjectKind) -> Vec<(ObjectRef, CacheEntry, Generation)> {
        self.entries
            .iter()
            .filter(|entry| entry.key().kind == kind)
            .map(|entry| (entry.key().clone(), entry.value().value.clone(), entry.value().generation))
            .collect()
    }

    pub fn generation_of(&self, key: &ObjectRef) -> Option<Generation> {
        self.entries.get(key).map(|e| e.generation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweep Service/EndpointSlice/Secret entries that nothing in
    /// `referenced` points to. No-op when the cache was constructed in
    /// non-pruning mode.
    pub fn prune_unreferenced(&self, referenced: &HashSet<ObjectRef>) {
        if !self.pruning {
            return;
        }
        let prunable_kinds =
            [ObjectKind::Service, ObjectKind::EndpointSlice, ObjectKind::Secret];
        let stale: Vec<ObjectRef> = self
            .entries
            .iter()
            .filter(|e| prunable_kinds.contains(&e.key().kind) && !referenced.contains(e.key()))
            .map(|e| e.key().clone())
            .collect();
        for key in stale {
            self.entries.remove(&key);
        }
    }
}
