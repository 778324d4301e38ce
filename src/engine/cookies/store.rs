//! Cookie store infrastructure.
//!
//! A **cookie store** is the persistence layer behind per-zone cookie jars.
//! - A **Zone** only *holds a [`CookieJarHandle`](crate::cookies::CookieJarHandle)*, never a store.
//! - The zone manager asks the store to fill a freshly constructed jar and to
//!   write it back on flush or teardown.
//!
//! This module exports two implementations:
//! - [`BinaryCookieStore`]: one binary cookie file per zone in a directory.
//! - [`InMemoryCookieStore`]: keeps the encoded bytes in memory (tests, or
//!   profiles that should not touch the disk).
//!
//! ## Example
//! ```rust,no_run
//! use gosub_cookies::cookies::BinaryCookieStore;
//! use gosub_cookies::zone::{ZoneConfig, ZoneId, ZoneManager};
//! use gosub_cookies::EngineConfig;
//!
//! let store = BinaryCookieStore::new("/tmp/profile");
//! let mut zones = ZoneManager::new(EngineConfig::default(), Some(store));
//! let work = ZoneId::new();
//! zones.create_zone(work, ZoneConfig::default()).unwrap();
//! ```
mod binary;
mod in_memory;

use crate::engine::cookies::CookieJar;
use crate::engine::errors::CookieResult;
use crate::engine::zone::ZoneId;
use std::sync::Arc;

/// Cookie files, one per zone.
pub use binary::BinaryCookieStore;
/// Encoded jars kept in memory.
pub use in_memory::InMemoryCookieStore;

/// Reads and writes the persistent part of a zone's cookie jar.
///
/// Implementations must be `Send + Sync` and safe for concurrent use.
pub trait CookieStore: Send + Sync {
    /// Fills `jar` with the persisted cookies of `zone_id`.
    ///
    /// A zone without persisted data leaves the jar untouched.
    fn load_into(&self, zone_id: ZoneId, jar: &mut CookieJar) -> CookieResult<()>;

    /// Writes the persistent cookies of `jar` for `zone_id`.
    ///
    /// On failure the jar stays dirty so the next flush tries again.
    fn persist_zone(&self, zone_id: ZoneId, jar: &mut CookieJar) -> CookieResult<()>;

    /// Removes all persisted cookie data for `zone_id`. Idempotent.
    fn remove_zone(&self, zone_id: ZoneId) -> CookieResult<()>;
}

pub type CookieStoreHandle = Arc<dyn CookieStore>;
