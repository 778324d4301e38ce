//! Cookies waiting to be accepted.
//!
//! A [`PendingCookie`] is created for every decoded `Set-Cookie[2]` entry that
//! passed validation. It is not visible to requests until it is committed.
//!
//! ```text
//! Parsed ──► NeedsDomainPolicy ──► NeedsUserConfirmation ──► Accepted
//!   │               │                       │
//!   └───────────────┴───────────────────────┴──────────────► Rejected
//! ```

use crate::engine::cookies::cookies::{Cookie, CookieFlags};
use crate::engine::cookies::policy::is_third_party;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;

/// Answer of the confirmation UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserDecision {
    Accept,
    /// Accept, and accept later updates of this cookie without asking.
    AcceptWithUpdates,
    Reject,
    /// Accept, and accept every cookie from this site from now on.
    AcceptAllFromDomain,
    /// Reject, and reject every cookie from this site from now on.
    RejectAllFromDomain,
}

/// What the confirmation UI gets to see about a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCookieView {
    /// Zone-local id of the pending entry.
    pub request_id: u64,
    /// URL of the response that set the cookie.
    pub url: String,
    pub domain: String,
    pub path: String,
    pub name: String,
    pub value: String,
    pub expires: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub version: u8,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
    pub third_party: bool,
    /// A cookie with the same name already exists and would be replaced.
    pub replaces_existing: bool,
}

#[derive(Debug)]
pub(crate) enum PendingState {
    Parsed,
    NeedsDomainPolicy,
    /// `None` until the question has been asked.
    NeedsUserConfirmation(Option<oneshot::Receiver<UserDecision>>),
    Accepted,
    Rejected,
}

impl PendingState {
    pub fn is_awaiting_user(&self) -> bool {
        matches!(self, PendingState::NeedsUserConfirmation(_))
    }
}

/// Identity used to collapse repeated questions about the same cookie.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PendingKey {
    domain: String,
    path: String,
    name: String,
    secure: bool,
    version: u8,
    ports: Option<Vec<u16>>,
}

#[derive(Debug)]
pub(crate) struct PendingCookie {
    pub id: u64,
    pub cookie: Cookie,
    /// Domain the cookie is stored under (request host or `Domain` attribute).
    pub domain: String,
    pub path: String,
    /// Host of the response.
    pub host: String,
    pub url: Url,
    pub third_party: bool,
    pub state: PendingState,
}

impl PendingCookie {
    pub fn new(id: u64, cookie: Cookie, domain: String, path: String, url: &Url, first_party: Option<&Url>) -> Self {
        Self {
            id,
            cookie,
            domain,
            path,
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            url: url.clone(),
            third_party: first_party.is_some_and(|fp| is_third_party(url, fp)),
            state: PendingState::Parsed,
        }
    }

    /// The cookie domain differs from the host that set it.
    pub fn is_foreign_domain(&self) -> bool {
        self.domain != self.host
    }

    pub fn key(&self) -> PendingKey {
        PendingKey {
            domain: self.domain.clone(),
            path: self.path.clone(),
            name: self.cookie.name.clone(),
            secure: self.cookie.flags.contains(CookieFlags::SECURE),
            version: self.cookie.version,
            ports: self.cookie.port.as_ref().map(|p| p.ports.clone()),
        }
    }

    pub fn view(&self, replaces_existing: bool) -> PendingCookieView {
        PendingCookieView {
            request_id: self.id,
            url: self.url.to_string(),
            domain: self.domain.clone(),
            path: self.path.clone(),
            name: self.cookie.name.clone(),
            value: self.cookie.value.clone(),
            expires: self.cookie.expires.timestamp(),
            secure: self.cookie.is_secure(),
            http_only: self.cookie.is_http_only(),
            version: self.cookie.version,
            comment: self.cookie.comment.clone(),
            comment_url: self.cookie.comment_url.clone(),
            third_party: self.third_party,
            replaces_existing,
        }
    }

    /// Takes over the cookie data of a newer entry with the same key.
    pub fn supersede_with(&mut self, newer: PendingCookie) {
        self.cookie = newer.cookie;
        self.url = newer.url;
        self.third_party = newer.third_party;
    }
}
