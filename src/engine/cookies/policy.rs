//! Collaborators a jar consults while accepting cookies, and per-site policy.
//!
//! - [`DomainOracle`] classifies domains (public-suffix like or not). It is
//!   external; the engine only caches its answers.
//! - [`CookieConfirmation`] asks the user about a cookie. The answer arrives
//!   later through a `oneshot` channel and is picked up by [`CookieJar::tick`].
//! - [`SitePolicy`] is the sticky, per-domain override of the global policy.
//!
//! [`CookieJar::tick`]: crate::cookies::CookieJar::tick

use crate::engine::clock::{ClockHandle, SystemClock};
use crate::engine::cookies::pending::{PendingCookieView, UserDecision};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Answer of the domain oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainClass {
    /// A registrable domain; it may own cookies.
    Normal,
    /// Too generic to own cookies (`co.uk`, `com`).
    PublicSuffixLike,
    /// Not known yet; ask again on the next tick.
    Pending,
}

impl DomainClass {
    pub(crate) fn to_byte(self) -> Option<u8> {
        match self {
            DomainClass::Normal => Some(1),
            DomainClass::PublicSuffixLike => Some(2),
            DomainClass::Pending => None,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(DomainClass::Normal),
            2 => Some(DomainClass::PublicSuffixLike),
            _ => None,
        }
    }
}

/// Classifies cookie domains.
///
/// Called at most once per distinct domain per tick. Implementations that
/// resolve asynchronously return [`DomainClass::Pending`] until they know.
pub trait DomainOracle: Send + Sync {
    fn classify(&self, domain: &str) -> DomainClass;
}

/// Asks the user whether a cookie may be stored.
///
/// The jar keeps the receiver and polls it on every tick. Dropping the sender
/// counts as a rejection. `cancel` fires when the jar is torn down; a late
/// answer is then ignored.
pub trait CookieConfirmation: Send + Sync {
    fn ask(&self, view: PendingCookieView, cancel: CancellationToken) -> oneshot::Receiver<UserDecision>;
}

/// Everything a jar needs from its environment.
#[derive(Clone)]
pub struct CookieServices {
    pub oracle: Option<Arc<dyn DomainOracle>>,
    pub confirmation: Option<Arc<dyn CookieConfirmation>>,
    pub clock: ClockHandle,
}

impl Default for CookieServices {
    fn default() -> Self {
        Self {
            oracle: None,
            confirmation: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl fmt::Debug for CookieServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieServices")
            .field("oracle", &self.oracle.is_some())
            .field("confirmation", &self.confirmation.is_some())
            .finish()
    }
}

impl CookieServices {
    pub fn with_oracle(mut self, oracle: Arc<dyn DomainOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_confirmation(mut self, ui: Arc<dyn CookieConfirmation>) -> Self {
        self.confirmation = Some(ui);
        self
    }

    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = clock;
        self
    }
}

/// Per-site override of the global cookie policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteCookieMode {
    #[default]
    Default,
    Accept,
    Reject,
    Ask,
}

/// Per-site override for cookies set in a third-party context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteThirdPartyMode {
    #[default]
    Default,
    Accept,
    Reject,
}

/// Sticky per-domain policy, stored on the domain node and in the cookie file.
///
/// A non-default policy keeps its domain node alive even without cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SitePolicy {
    pub cookie_mode: SiteCookieMode,
    pub third_party: SiteThirdPartyMode,
}

impl SitePolicy {
    pub fn is_default(&self) -> bool {
        *self == SitePolicy::default()
    }
}

impl SiteCookieMode {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            SiteCookieMode::Default => 0,
            SiteCookieMode::Accept => 1,
            SiteCookieMode::Reject => 2,
            SiteCookieMode::Ask => 3,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SiteCookieMode::Default,
            1 => SiteCookieMode::Accept,
            2 => SiteCookieMode::Reject,
            3 => SiteCookieMode::Ask,
            _ => return None,
        })
    }
}

impl SiteThirdPartyMode {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            SiteThirdPartyMode::Default => 0,
            SiteThirdPartyMode::Accept => 1,
            SiteThirdPartyMode::Reject => 2,
        }
    }

    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0 => SiteThirdPartyMode::Default,
            1 => SiteThirdPartyMode::Accept,
            2 => SiteThirdPartyMode::Reject,
            _ => return None,
        })
    }
}

/// Tells whether `url` is third party relative to the first-party document.
///
/// Two hosts are the same party when they are equal or share a parent domain
/// of at least two labels (`a.example.com` and `b.example.com`). IP literals
/// only match themselves. URLs without a host are never third party.
pub fn is_third_party(url: &Url, first_party: &Url) -> bool {
    let (Some(host), Some(top)) = (url.host_str(), first_party.host_str()) else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let top = top.to_ascii_lowercase();
    if host == top {
        return false;
    }
    if matches!(url.host(), Some(url::Host::Ipv4(_) | url::Host::Ipv6(_)))
        || matches!(first_party.host(), Some(url::Host::Ipv4(_) | url::Host::Ipv6(_)))
    {
        return true;
    }

    let common = host
        .rsplit('.')
        .zip(top.rsplit('.'))
        .take_while(|(a, b)| a == b)
        .count();
    common < 2
}
