//! Gosub cookie engine.
//!
//! Accepts `Set-Cookie`/`Set-Cookie2` directives, indexes them in a
//! domain/path tree, serves them back on outgoing requests, persists them in a
//! compact binary format and keeps zones (browsing contexts) isolated from, or
//! linked to, the default cookie jar.
//!
//! ```rust
//! use gosub_cookies::cookies::{CookieJar, RequestContext};
//! use url::Url;
//!
//! let mut jar = CookieJar::default();
//! let url = Url::parse("https://www.example.com/account").unwrap();
//! let mut headers = http::HeaderMap::new();
//! headers.append("set-cookie", "sid=abc123; Path=/; Secure".parse().unwrap());
//! jar.store_response_cookies(&url, &headers).unwrap();
//!
//! let header = jar.build_cookie_header(&RequestContext::new(&url));
//! assert_eq!(header.value, "sid=abc123");
//! ```
mod engine;

pub use engine::clock;
pub use engine::config::{CookieConfig, CookieConfigBuilder, CookieConfigError, CookiePolicy, EngineConfig};
pub use engine::cookies;
pub use engine::errors::{CookieError, CookieResult, EngineError};
pub use engine::zone;
