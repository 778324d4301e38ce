//! Zone configuration.
//!
//! `ZoneConfig` controls how a single zone gets its cookie jar. A *zone* acts
//! like a browser profile/container: either it has a jar of its own, or it
//! shares the default zone's jar.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use gosub_cookies::zone::ZoneConfig;
//! let cfg = ZoneConfig::default();
//! assert!(!cfg.share_with_default);
//! assert!(!cfg.temporary);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use gosub_cookies::zone::ZoneConfig;
//! use gosub_cookies::{CookieConfig, CookiePolicy};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = ZoneConfig::builder()
//!     .temporary(true)
//!     .cookies(CookieConfig::builder().policy(CookiePolicy::ThirdPartyRestricted).build()?)
//!     .build()?; // returns Result<ZoneConfig, ZoneConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `share_with_default`: use the default zone's jar (same handle, not a copy).
//! - `temporary`: never load from or write to the cookie store.
//! - `cookies`: cookie configuration for this zone's own jar; the engine
//!   default applies when `None`.
//!
//! # Errors
//!
//! Builder validation returns [`ZoneConfigError`] when a shared zone also
//! carries its own cookie configuration or is marked temporary.

use std::fmt;

use crate::engine::config::CookieConfig;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneConfig {
    pub share_with_default: bool,
    pub temporary: bool,
    pub cookies: Option<CookieConfig>,
}

impl ZoneConfig {
    pub fn builder() -> ZoneConfigBuilder {
        ZoneConfigBuilder::default()
    }
}

/// Builder for [`ZoneConfig`], mirroring `CookieConfigBuilder`.
#[derive(Debug, Clone, Default)]
pub struct ZoneConfigBuilder {
    inner: ZoneConfig,
}

impl ZoneConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut ZoneConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn share_with_default(self, on: bool) -> Self { self.map(|c| c.share_with_default = on) }
    pub fn temporary(self, on: bool) -> Self { self.map(|c| c.temporary = on) }
    pub fn cookies(self, cookies: CookieConfig) -> Self { self.map(|c| c.cookies = Some(cookies)) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut ZoneConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<ZoneConfig, ZoneConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneConfigError {
    SharedWithCookieConfig,
    SharedAndTemporary,
}

impl fmt::Display for ZoneConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneConfigError::SharedWithCookieConfig =>
                write!(f, "a zone sharing the default jar cannot have its own cookie configuration"),
            ZoneConfigError::SharedAndTemporary =>
                write!(f, "a zone sharing the default jar cannot be temporary"),
        }
    }
}
impl std::error::Error for ZoneConfigError {}

fn validate(c: &ZoneConfig) -> Result<(), ZoneConfigError> {
    if c.share_with_default && c.cookies.is_some() {
        return Err(ZoneConfigError::SharedWithCookieConfig);
    }
    if c.share_with_default && c.temporary {
        return Err(ZoneConfigError::SharedAndTemporary);
    }
    Ok(())
}
