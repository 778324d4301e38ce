use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::cookies::store::CookieStore;
use crate::engine::cookies::CookieJar;
use crate::engine::errors::CookieResult;
use crate::engine::zone::ZoneId;

/// Keeps the encoded cookie file of every zone in memory.
#[derive(Default)]
pub struct InMemoryCookieStore {
    /// Encoded jars per zone
    files: RwLock<HashMap<ZoneId, Vec<u8>>>,
}

impl InMemoryCookieStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn contains(&self, zone_id: ZoneId) -> bool {
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&zone_id)
    }
}

impl CookieStore for InMemoryCookieStore {
    fn load_into(&self, zone_id: ZoneId, jar: &mut CookieJar) -> CookieResult<()> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(bytes) = files.get(&zone_id) {
            jar.read_persistent(bytes)?;
        }
        Ok(())
    }

    fn persist_zone(&self, zone_id: ZoneId, jar: &mut CookieJar) -> CookieResult<()> {
        let mut bytes = Vec::new();
        jar.write_persistent(&mut bytes)?;
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(zone_id, bytes);
        Ok(())
    }

    fn remove_zone(&self, zone_id: ZoneId) -> CookieResult<()> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&zone_id);
        Ok(())
    }
}
