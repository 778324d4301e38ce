// src/engine/zone/manager.rs
//! [`ZoneManager`]: the registry of zones and their cookie jars.
//!
//! The manager always holds the default zone ([`ZoneId::DEFAULT`]). Other
//! zones are created with a [`ZoneConfig`] and are reference counted: the
//! zone's jar is flushed to the cookie store and dropped only when the last
//! reference goes away. Jars are built lazily on first use.
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::config::EngineConfig;
use crate::engine::cookies::{CookieJar, CookieJarHandle, CookieServices, CookieStoreHandle, TickReport};
use crate::engine::errors::{CookieError, EngineError};
use crate::engine::zone::{Zone, ZoneConfig, ZoneId};

pub struct ZoneManager {
    config: EngineConfig,
    store: Option<CookieStoreHandle>,
    services: CookieServices,
    zones: Mutex<HashMap<ZoneId, Zone>>,
}

impl ZoneManager {
    pub fn new(config: EngineConfig, store: Option<CookieStoreHandle>) -> Self {
        let mut zones = HashMap::new();
        zones.insert(ZoneId::DEFAULT, Zone::new(ZoneId::DEFAULT, ZoneConfig::default()));
        Self {
            config,
            store,
            services: CookieServices::default(),
            zones: Mutex::new(zones),
        }
    }

    /// Oracle, confirmation UI and clock handed to every jar built from now on.
    pub fn with_services(mut self, services: CookieServices) -> Self {
        self.services = services;
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ZoneId, Zone>> {
        self.zones.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new zone with the given config. The caller holds its first reference.
    pub fn create_zone(&self, zone_id: ZoneId, config: ZoneConfig) -> Result<(), EngineError> {
        let mut zones = self.lock();
        if zones.contains_key(&zone_id) {
            return Err(EngineError::ZoneAlreadyExists);
        }
        if zones.len() >= self.config.max_zones {
            return Err(EngineError::ZoneLimitExceeded);
        }
        log::debug!("creating zone {zone_id} (shared: {}, temporary: {})", config.share_with_default, config.temporary);
        zones.insert(zone_id, Zone::new(zone_id, config));
        Ok(())
    }

    /// The cookie jar of a zone, built (and loaded) on first use.
    ///
    /// Zones that share the default jar get the default zone's handle.
    pub fn jar(&self, zone_id: ZoneId) -> Result<CookieJarHandle, EngineError> {
        let mut zones = self.lock();
        self.jar_locked(&mut zones, zone_id)
    }

    fn jar_locked(&self, zones: &mut HashMap<ZoneId, Zone>, zone_id: ZoneId) -> Result<CookieJarHandle, EngineError> {
        let zone = zones.get(&zone_id).ok_or(EngineError::ZoneNotFound)?;
        if zone.is_shared() {
            return self.jar_locked(zones, ZoneId::DEFAULT);
        }
        if let Some(jar) = &zone.jar {
            return Ok(jar.clone());
        }

        let config = zone.config.cookies.clone().unwrap_or_else(|| self.config.cookies.clone());
        let mut jar = CookieJar::new(config, self.services.clone());
        if zone.is_persistent() {
            if let Some(store) = &self.store {
                if let Err(e) = store.load_into(zone_id, &mut jar) {
                    log::warn!("could not load cookies of zone {zone_id}: {e}");
                }
            }
        }

        let handle = jar.into_handle();
        if let Some(zone) = zones.get_mut(&zone_id) {
            zone.jar = Some(handle.clone());
        }
        Ok(handle)
    }

    pub fn add_reference(&self, zone_id: ZoneId) -> Result<usize, EngineError> {
        let mut zones = self.lock();
        let zone = zones.get_mut(&zone_id).ok_or(EngineError::ZoneNotFound)?;
        zone.refs += 1;
        Ok(zone.refs)
    }

    /// Drops one reference; the zone is torn down when none are left.
    /// Returns the remaining count.
    pub fn remove_reference(&self, zone_id: ZoneId) -> Result<usize, EngineError> {
        if zone_id.is_default() {
            return Err(EngineError::DefaultZone);
        }
        let removed = {
            let mut zones = self.lock();
            let zone = zones.get_mut(&zone_id).ok_or(EngineError::ZoneNotFound)?;
            zone.refs = zone.refs.saturating_sub(1);
            if zone.refs > 0 {
                return Ok(zone.refs);
            }
            zones.remove(&zone_id)
        };
        if let Some(zone) = removed {
            self.teardown(zone);
        }
        Ok(0)
    }

    /// Tears a zone down regardless of outstanding references.
    pub fn destroy_zone(&self, zone_id: ZoneId) -> Result<(), EngineError> {
        if zone_id.is_default() {
            return Err(EngineError::DefaultZone);
        }
        let zone = self.lock().remove(&zone_id).ok_or(EngineError::ZoneNotFound)?;
        self.teardown(zone);
        Ok(())
    }

    /// Destroys a zone and deletes its persisted cookies.
    pub fn purge_zone(&self, zone_id: ZoneId) -> Result<(), EngineError> {
        let zone = {
            let mut zones = self.lock();
            if zone_id.is_default() {
                return Err(EngineError::DefaultZone);
            }
            zones.remove(&zone_id).ok_or(EngineError::ZoneNotFound)?
        };
        if let Some(jar) = &zone.jar {
            jar.write().unwrap_or_else(PoisonError::into_inner).shutdown();
        }
        if zone.is_persistent() {
            if let Some(store) = &self.store {
                store.remove_zone(zone_id)?;
            }
        }
        Ok(())
    }

    fn teardown(&self, zone: Zone) {
        log::debug!("tearing down zone {}", zone.id);
        let Some(handle) = &zone.jar else {
            return;
        };
        let mut jar = handle.write().unwrap_or_else(PoisonError::into_inner);
        jar.shutdown();
        if zone.is_persistent() && jar.is_dirty() {
            if let Some(store) = &self.store {
                if let Err(e) = store.persist_zone(zone.id, &mut jar) {
                    log::error!("could not save cookies of zone {}: {e}", zone.id);
                }
            }
        }
    }

    pub fn zone_exists(&self, zone_id: ZoneId) -> bool {
        self.lock().contains_key(&zone_id)
    }

    pub fn is_temporary(&self, zone_id: ZoneId) -> bool {
        self.lock().get(&zone_id).is_some_and(|z| z.config.temporary)
    }

    pub fn is_shared(&self, zone_id: ZoneId) -> bool {
        self.lock().get(&zone_id).is_some_and(Zone::is_shared)
    }

    pub fn reference_count(&self, zone_id: ZoneId) -> Option<usize> {
        self.lock().get(&zone_id).map(|z| z.refs)
    }

    /// Writes the jar of one zone when it has unsaved changes.
    pub fn flush(&self, zone_id: ZoneId) -> Result<bool, EngineError> {
        let zones = self.lock();
        let zone = zones.get(&zone_id).ok_or(EngineError::ZoneNotFound)?;
        if zone.is_shared() {
            return Ok(false);
        }
        self.flush_zone(zone).map_err(EngineError::from)
    }

    fn flush_zone(&self, zone: &Zone) -> Result<bool, CookieError> {
        let (Some(store), Some(handle)) = (&self.store, &zone.jar) else {
            return Ok(false);
        };
        if !zone.is_persistent() {
            return Ok(false);
        }
        let mut jar = handle.write().unwrap_or_else(PoisonError::into_inner);
        if !jar.is_dirty() {
            return Ok(false);
        }
        store.persist_zone(zone.id, &mut jar)?;
        Ok(true)
    }

    /// Writes every dirty jar. Failures are logged and the jar stays dirty.
    /// Returns the number of jars written.
    pub fn flush_all(&self) -> usize {
        let zones = self.lock();
        let mut written = 0;
        for zone in zones.values() {
            match self.flush_zone(zone) {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => log::error!("could not save cookies of zone {}: {e}", zone.id),
            }
        }
        written
    }

    /// Advances the pending cookies of every live jar.
    pub fn tick_all(&self) -> TickReport {
        let zones = self.lock();
        let mut report = TickReport::default();
        for handle in zones.values().filter_map(|z| z.jar.as_ref()) {
            report.merge(handle.write().unwrap_or_else(PoisonError::into_inner).tick());
        }
        report
    }

    /// Drops expired cookies and trims every live jar. Returns the number of
    /// cookies removed.
    pub fn free_unused_resources(&self) -> usize {
        let zones = self.lock();
        zones
            .values()
            .filter_map(|z| z.jar.as_ref())
            .map(|handle| handle.write().unwrap_or_else(PoisonError::into_inner).free_unused_resources())
            .sum()
    }

    /// Ends the browsing session: session cookies go, dirty jars are written
    /// and pending cookies are dropped.
    pub fn shutdown(&self) {
        let zones = self.lock();
        for zone in zones.values() {
            let Some(handle) = &zone.jar else {
                continue;
            };
            {
                let mut jar = handle.write().unwrap_or_else(PoisonError::into_inner);
                jar.shutdown();
                jar.end_session();
            }
            if let Err(e) = self.flush_zone(zone) {
                log::error!("could not save cookies of zone {}: {e}", zone.id);
            }
        }
    }

    pub fn iter(&self) -> Vec<ZoneId> {
        self.lock().keys().copied().collect()
    }
}
