// src/engine/cookies.rs
//! Cookies: [`CookieJar`], [`CookieStore`], the domain/path index and the
//! binary cookie file codec.

mod cookies;
mod cookie_jar;
mod codec;
mod domain_index;
mod eviction;
mod parser;
mod path_index;
mod pending;
mod policy;
mod store;

pub use cookies::{Cookie, CookieFlags, CookieJarHandle, CookieSnapshot, Expiry, PortList};

pub use cookie_jar::{AcceptReport, CookieHeader, CookieJar, RequestContext, ResponseContext, TickReport};

pub use codec::{APP_VERSION, FILE_VERSION};

pub use parser::{parse_cookie_date, HeaderKind, SetCookieHeader};

pub use pending::{PendingCookieView, UserDecision};

pub use policy::{
    is_third_party, CookieConfirmation, CookieServices, DomainClass, DomainOracle, SiteCookieMode,
    SitePolicy, SiteThirdPartyMode,
};

pub use store::{BinaryCookieStore, CookieStore, CookieStoreHandle, InMemoryCookieStore};
