//! The object cache (section 4.A): a typed, indexed, last-writer-wins store
//! of watched resources, plus the "latest-wins" coalescing trigger mentioned
//! in the design notes (section 9) that the workgroup reads before every
//! DAG rebuild.

mod source;
mod store;
mod trigger;

pub use source::{pump_into_cache, ObjectSource, StaticObjectSource, WatchAction, WatchEvent};
pub use store::{CacheEntry, ObjectCache};
pub use trigger::{CoalescingTrigger, TriggerReceiver};
