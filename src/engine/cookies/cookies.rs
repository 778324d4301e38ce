//! Cookie core types.
//!
//! This module defines the stored [`Cookie`] record, its flag bitfield and the
//! shared [`CookieJarHandle`].
//!
//! # Concurrency model
//! - [`CookieJarHandle`] is `Arc<RwLock<CookieJar>>`.
//!   - Zones that share the default jar hold a clone of the *same* handle, so
//!     every accept/query call is forwarded to the single owning jar.
//!   - Callers take a **read lock** for inspection and a **write lock** for
//!     anything that accepts, queries (queries refresh `last_used`) or evicts.
//!
//! # Typical usage
//! ```ignore
//! let jar = zones.jar(zone_id)?; // -> CookieJarHandle
//! let header = jar.write().unwrap().build_cookie_header(&RequestContext::new(&url));
//! ```
//!
//! Cookies are never stored with an expiry in the past, and cookies flagged
//! [`CookieFlags::DISCARD_AT_EXIT`] never reach the cookie file.

use crate::engine::cookies::CookieJar;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

/// A handle to a cookie jar.
///
/// This is a reference-counted, read/write-locked pointer to a [`CookieJar`].
pub type CookieJarHandle = Arc<RwLock<CookieJar>>;

bitflags! {
    /// Boolean attributes of a stored cookie.
    #[derive(Default)]
    pub struct CookieFlags: u32 {
        /// Only sent over secure transports.
        const SECURE              = 0x0001;
        /// Not exposed to script-initiated requests.
        const HTTP_ONLY           = 0x0002;
        /// Never matched as a partial segment prefix (`/a` does not match `/ab`).
        const FULL_PATH_ONLY      = 0x0004;
        /// Only sent to the exact host it was set for (no `Domain` attribute).
        const EXACT_SERVER_ONLY   = 0x0008;
        /// Never evicted automatically.
        const PROTECTED           = 0x0010;
        /// Removed at the end of the session and never written to disk.
        const DISCARD_AT_EXIT     = 0x0020;
        /// The user allowed future updates without asking again.
        const ACCEPT_UPDATES      = 0x0040;
        /// Accepted while the response was a third-party one.
        const THIRD_PARTY         = 0x0080;
        /// The header carried `name=` rather than a bare `name`.
        const ASSIGNED            = 0x0100;
        /// Set by a response to a request that carried a password.
        const HAVE_PASSWORD       = 0x0200;
        /// Set by a response to an authenticated request.
        const HAVE_AUTHENTICATION = 0x0400;
    }
}

impl CookieFlags {
    /// Flags an updated cookie inherits from the record it replaces.
    /// `DISCARD_AT_EXIT` is not among them: it follows the new header and the
    /// current session-only setting.
    pub(crate) const CARRIED: CookieFlags = CookieFlags::from_bits_truncate(
        CookieFlags::ACCEPT_UPDATES.bits()
            | CookieFlags::THIRD_PARTY.bits()
            | CookieFlags::HAVE_PASSWORD.bits()
            | CookieFlags::HAVE_AUTHENTICATION.bits()
            | CookieFlags::PROTECTED.bits(),
    );
}

/// When a cookie stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expiry {
    /// Lives until the end of the session.
    Session,
    /// Expires at the given Unix timestamp (seconds).
    At(i64),
}

impl Expiry {
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self, Expiry::At(t) if *t <= now)
    }

    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Expiry::Session => None,
            Expiry::At(t) => Some(*t),
        }
    }
}

/// The `Port` restriction of a version 1 cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortList {
    pub ports: Vec<u16>,
    /// `Port` was sent without a value (restricts to the request port).
    pub bare: bool,
}

impl PortList {
    pub fn contains(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }

    /// Comma separated list, as stored on disk and echoed in `$Port`.
    pub fn joined(&self) -> String {
        self.ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }

    pub(crate) fn parse(list: &str) -> Option<PortList> {
        let mut ports = Vec::new();
        for part in list.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            ports.push(part.parse::<u16>().ok()?);
        }
        if ports.is_empty() {
            return None;
        }
        Some(PortList { ports, bare: false })
    }
}

/// A cookie as stored in a jar.
///
/// The domain and path a cookie belongs to are not part of the record: they
/// are given by the domain node and path node holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name (case-sensitive).
    pub name: String,
    /// Raw cookie value, kept verbatim (quotes included).
    pub value: String,
    pub expires: Expiry,
    /// Last time the cookie was sent, `0` when unused since load or insert.
    pub last_used: i64,
    /// Last time the server wrote the cookie.
    pub last_sync: i64,
    pub flags: CookieFlags,
    /// `0` for `Set-Cookie`, `1` for `Set-Cookie2`.
    pub version: u8,
    pub comment: Option<String>,
    pub comment_url: Option<String>,
    /// `Domain` as received, echoed in `$Domain`.
    pub received_domain: Option<String>,
    /// `Path` as received, echoed in `$Path`.
    pub received_path: Option<String>,
    pub port: Option<PortList>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            expires: Expiry::Session,
            last_used: 0,
            last_sync: 0,
            flags: CookieFlags::ASSIGNED,
            version: 0,
            comment: None,
            comment_url: None,
            received_domain: None,
            received_path: None,
            port: None,
        }
    }

    pub fn is_secure(&self) -> bool { self.flags.contains(CookieFlags::SECURE) }
    pub fn is_http_only(&self) -> bool { self.flags.contains(CookieFlags::HTTP_ONLY) }
    pub fn is_protected(&self) -> bool { self.flags.contains(CookieFlags::PROTECTED) }
    pub fn discard_at_exit(&self) -> bool { self.flags.contains(CookieFlags::DISCARD_AT_EXIT) }
    pub fn full_path_only(&self) -> bool { self.flags.contains(CookieFlags::FULL_PATH_ONLY) }
    pub fn exact_server_only(&self) -> bool { self.flags.contains(CookieFlags::EXACT_SERVER_ONLY) }
    pub fn accepted_as_third_party(&self) -> bool { self.flags.contains(CookieFlags::THIRD_PARTY) }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.is_expired(now)
    }

    /// True when the cookie belongs in the cookie file.
    pub fn is_persistent(&self, now: i64) -> bool {
        !self.discard_at_exit() && matches!(self.expires, Expiry::At(t) if t > now)
    }

    /// Appends the `Cookie:` header fragment for this cookie.
    pub(crate) fn write_request_fragment(&self, out: &mut String) {
        out.push_str(&self.name);
        if self.flags.contains(CookieFlags::ASSIGNED) {
            out.push('=');
            out.push_str(&self.value);
        }

        if self.version == 0 {
            return;
        }
        if let Some(path) = &self.received_path {
            let _ = write!(out, "; $Path=\"{path}\"");
        }
        if let Some(domain) = &self.received_domain {
            let _ = write!(out, "; $Domain=\"{domain}\"");
        }
        if let Some(port) = &self.port {
            if port.bare {
                out.push_str("; $Port");
            } else {
                let _ = write!(out, "; $Port=\"{}\"", port.joined());
            }
        }
    }

    pub(crate) fn request_fragment(&self) -> String {
        let mut out = String::with_capacity(self.name.len() + self.value.len() + 1);
        self.write_request_fragment(&mut out);
        out
    }

    pub(crate) fn snapshot(&self, domain: &str, path: &str) -> CookieSnapshot {
        CookieSnapshot {
            domain: domain.to_string(),
            path: path.to_string(),
            name: self.name.clone(),
            value: self.value.clone(),
            expires: self.expires.timestamp(),
            last_used: self.last_used,
            secure: self.is_secure(),
            http_only: self.is_http_only(),
            exact_server_only: self.exact_server_only(),
            protected: self.is_protected(),
            discard_at_exit: self.discard_at_exit(),
            third_party: self.accepted_as_third_party(),
            version: self.version,
        }
    }
}

/// A flattened, serializable view of one cookie, for inspection and export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSnapshot {
    pub domain: String,
    pub path: String,
    pub name: String,
    pub value: String,
    /// `None` for session cookies.
    pub expires: Option<i64>,
    pub last_used: i64,
    pub secure: bool,
    pub http_only: bool,
    pub exact_server_only: bool,
    pub protected: bool,
    pub discard_at_exit: bool,
    pub third_party: bool,
    pub version: u8,
}
