//! Cookie engine configuration.
//!
//! `CookieConfig` replaces the preference store the cookie jar would
//! otherwise query: the global acceptance policy and the size limits that
//! drive eviction. It provides defaults via [`Default`] and a fluent
//! [`CookieConfig::builder()`] with validation.
//!
//! # Examples
//!
//! ```rust
//! use gosub_cookies::{CookieConfig, CookiePolicy};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = CookieConfig::builder()
//!     .policy(CookiePolicy::ThirdPartyRestricted)
//!     .max_total_cookies(1000)
//!     .max_cookies_per_domain(40)
//!     .max_file_size(256 * 1024)
//!     .build()?;
//! assert_eq!(cfg.max_total_cookies, 1000);
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `policy`: global acceptance policy (default: accept all).
//! - `max_total_cookies`: jar-wide cookie limit (default: 4000).
//! - `max_cookies_per_domain`: limit per exact domain (default: 50).
//! - `max_cookie_length`: longest accepted `name` + `value` (default: 4096).
//! - `max_header_len`: longest generated `Cookie:` header (default: 8192).
//! - `max_file_size`: optional size budget for the cookie file.
//! - `session_only`: accept cookies but discard all of them at exit.
//! - `accept_version_1`: process `Set-Cookie2` headers (default: true).

use std::fmt;

/// Largest payload a single file record can carry.
const MAX_RECORD_LENGTH: usize = u16::MAX as usize;

const DEFAULT_MAX_ZONES: usize = 32;

/// Global cookie acceptance policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CookiePolicy {
    /// Accept every valid cookie.
    #[default]
    AcceptAll,
    /// Never store cookies.
    RejectAll,
    /// Reject cookies set in a third-party context unless the site allows it.
    ThirdPartyRestricted,
    /// Ask the user before storing a cookie.
    Ask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CookieConfig {
    pub policy: CookiePolicy,
    pub max_total_cookies: usize,
    pub max_cookies_per_domain: usize,
    pub max_cookie_length: usize,
    pub max_header_len: usize,
    pub max_file_size: Option<u64>,
    pub session_only: bool,
    pub accept_version_1: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            policy: CookiePolicy::AcceptAll,
            max_total_cookies: 4000,
            max_cookies_per_domain: 50,
            max_cookie_length: 4096,
            max_header_len: 8192,
            max_file_size: None,
            session_only: false,
            accept_version_1: true,
        }
    }
}

impl CookieConfig {
    pub fn builder() -> CookieConfigBuilder {
        CookieConfigBuilder::default()
    }
}

/// Builder for [`CookieConfig`], mirroring `ZoneConfigBuilder`.
#[derive(Debug, Clone, Default)]
pub struct CookieConfigBuilder {
    inner: CookieConfig,
}

impl CookieConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut CookieConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn policy(self, policy: CookiePolicy) -> Self { self.map(|c| c.policy = policy) }
    pub fn max_total_cookies(self, n: usize) -> Self { self.map(|c| c.max_total_cookies = n) }
    pub fn max_cookies_per_domain(self, n: usize) -> Self { self.map(|c| c.max_cookies_per_domain = n) }
    pub fn max_cookie_length(self, n: usize) -> Self { self.map(|c| c.max_cookie_length = n) }
    pub fn max_header_len(self, n: usize) -> Self { self.map(|c| c.max_header_len = n) }
    pub fn max_file_size(self, bytes: u64) -> Self { self.map(|c| c.max_file_size = Some(bytes)) }
    pub fn session_only(self, on: bool) -> Self { self.map(|c| c.session_only = on) }
    pub fn accept_version_1(self, on: bool) -> Self { self.map(|c| c.accept_version_1 = on) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut CookieConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<CookieConfig, CookieConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq)]
pub enum CookieConfigError {
    ZeroLimit(&'static str),
    PerDomainLarger { per_domain: usize, total: usize },
    CookieTooLong(usize),
}

impl fmt::Display for CookieConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CookieConfigError::ZeroLimit(field) =>
                write!(f, "{field} must be at least 1"),
            CookieConfigError::PerDomainLarger { per_domain, total } =>
                write!(f, "max_cookies_per_domain ({per_domain}) > max_total_cookies ({total})"),
            CookieConfigError::CookieTooLong(len) =>
                write!(f, "max_cookie_length {len} does not fit a file record (max {MAX_RECORD_LENGTH})"),
        }
    }
}
impl std::error::Error for CookieConfigError {}

fn validate(c: &CookieConfig) -> Result<(), CookieConfigError> {
    if c.max_total_cookies == 0 {
        return Err(CookieConfigError::ZeroLimit("max_total_cookies"));
    }
    if c.max_cookies_per_domain == 0 {
        return Err(CookieConfigError::ZeroLimit("max_cookies_per_domain"));
    }
    if c.max_cookie_length == 0 {
        return Err(CookieConfigError::ZeroLimit("max_cookie_length"));
    }
    if c.max_header_len == 0 {
        return Err(CookieConfigError::ZeroLimit("max_header_len"));
    }
    if c.max_cookies_per_domain > c.max_total_cookies {
        return Err(CookieConfigError::PerDomainLarger {
            per_domain: c.max_cookies_per_domain,
            total: c.max_total_cookies,
        });
    }
    // Name and value share one record together with the other fields.
    if c.max_cookie_length > MAX_RECORD_LENGTH / 2 {
        return Err(CookieConfigError::CookieTooLong(c.max_cookie_length));
    }
    Ok(())
}

/// Main engine configuration. Also contains the default cookie configuration for zones.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of zones (the default zone included)
    pub max_zones: usize,
    /// Cookie configuration used when a zone does not supply its own
    pub cookies: CookieConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_zones: DEFAULT_MAX_ZONES,
            cookies: CookieConfig::default(),
        }
    }
}
