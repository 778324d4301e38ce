// src/engine/zone/zone.rs
//! [`Zone`] and [`ZoneId`].
//!
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::cookies::CookieJarHandle;
use crate::engine::zone::ZoneConfig;

/// A unique identifier for a zone, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZoneId(Uuid);

impl ZoneId {
    /// The zone that owns the default cookie jar.
    pub const DEFAULT: ZoneId = ZoneId(Uuid::nil());

    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for ZoneId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ZoneId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ZoneId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// A zone is a browsing context with its own cookie jar. A zone created with
// `share_with_default` has no jar of its own: every cookie call goes to the
// default zone's jar.
pub(crate) struct Zone {
    pub id: ZoneId,
    pub config: ZoneConfig,
    /// Live references; the zone is torn down when this reaches zero.
    pub refs: usize,
    /// Own jar, built on first use. Always `None` for shared zones.
    pub jar: Option<CookieJarHandle>,
}

impl Zone {
    pub fn new(id: ZoneId, config: ZoneConfig) -> Self {
        Self {
            id,
            config,
            refs: 1,
            jar: None,
        }
    }

    /// Uses the default zone's jar instead of its own.
    pub fn is_shared(&self) -> bool {
        self.config.share_with_default && !self.id.is_default()
    }

    /// Its jar is loaded from and written to the cookie store.
    pub fn is_persistent(&self) -> bool {
        !self.config.temporary && !self.is_shared()
    }
}
