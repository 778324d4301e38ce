//! The cookie jar of one zone.
//!
//! A **cookie jar** holds every cookie of a zone in a domain tree (reversed
//! host labels) whose nodes each own a path tree. Responses feed cookies in
//! through [`CookieJar::accept_headers`]; requests get their `Cookie:` header
//! from [`CookieJar::build_cookie_header`].
//!
//! ## Accepting
//! Every decoded cookie becomes a pending entry that is validated against the
//! request, then resolved against the domain oracle, the site and global
//! policy and, when the policy says so, the user. Entries that wait on the
//! oracle or the user stay queued; [`CookieJar::tick`] re-examines the queue
//! in FIFO order. Nothing is visible to requests before it is committed.
//!
//! ## Limits
//! After each commit the per-domain and jar-wide limits are enforced by
//! evicting least recently used, unprotected cookies.
//!
//! This type is **not** internally synchronized. Share it as a
//! [`CookieJarHandle`].

use crate::engine::config::{CookieConfig, CookiePolicy};
use crate::engine::cookies::codec;
use crate::engine::cookies::cookies::{Cookie, CookieFlags, CookieJarHandle, CookieSnapshot, PortList};
use crate::engine::cookies::domain_index::{self, DomainNode, Location};
use crate::engine::cookies::eviction::{self, Candidates, CookieRef};
use crate::engine::cookies::parser::{self, HeaderKind, ParsedCookie, PortSpec, SetCookieHeader};
use crate::engine::cookies::path_index::{self, PathNode};
use crate::engine::cookies::pending::{PendingCookie, PendingState, UserDecision};
use crate::engine::cookies::policy::{
    is_third_party, CookieServices, DomainClass, SiteCookieMode, SitePolicy, SiteThirdPartyMode,
};
use crate::engine::errors::{CookieError, CookieResult};
use http::HeaderMap;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use url::Url;

/// The response a batch of cookie headers arrived with.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub url: Url,
    /// URL of the top-level document, for third-party decisions.
    pub first_party: Option<Url>,
    /// The request carried a password.
    pub has_password: bool,
    /// The request was authenticated.
    pub has_authentication: bool,
}

impl ResponseContext {
    pub fn new(url: &Url) -> Self {
        Self {
            url: url.clone(),
            first_party: None,
            has_password: false,
            has_authentication: false,
        }
    }

    pub fn first_party(mut self, top: &Url) -> Self {
        self.first_party = Some(top.clone());
        self
    }

    pub fn password(mut self, yes: bool) -> Self {
        self.has_password = yes;
        self
    }

    pub fn authentication(mut self, yes: bool) -> Self {
        self.has_authentication = yes;
        self
    }
}

/// An outgoing request that needs a `Cookie:` header.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: Url,
    pub first_party: Option<Url>,
    /// Issued by script rather than by the HTTP layer; `HttpOnly` cookies are hidden.
    pub script: bool,
}

impl RequestContext {
    pub fn new(url: &Url) -> Self {
        Self {
            url: url.clone(),
            first_party: None,
            script: false,
        }
    }

    pub fn first_party(mut self, top: &Url) -> Self {
        self.first_party = Some(top.clone());
        self
    }

    pub fn script(mut self, yes: bool) -> Self {
        self.script = yes;
        self
    }

    pub fn is_secure(&self) -> bool {
        matches!(self.url.scheme(), "https" | "wss")
    }
}

/// Outcome of an accept call or a tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcceptReport {
    /// Committed (stored, updated, or deleted by an expired update).
    pub accepted: usize,
    /// Malformed, refused by policy or by the user.
    pub rejected: usize,
    /// Accepted but lost because the jar could not grow to store it.
    pub failed: usize,
    /// Still waiting on the domain oracle or the user.
    pub pending: usize,
}

impl AcceptReport {
    /// Adds the counts of `other`. `pending` is summed as well, so merging
    /// the reports of separate jars gives the total queue length.
    pub fn merge(&mut self, other: AcceptReport) {
        self.accepted += other.accepted;
        self.rejected += other.rejected;
        self.failed += other.failed;
        self.pending += other.pending;
    }
}

pub type TickReport = AcceptReport;

/// A generated `Cookie:` header.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CookieHeader {
    pub value: String,
    /// Highest cookie version included.
    pub version: u8,
    /// A cookie set by a response to a password-carrying request is included.
    pub have_password: bool,
    /// A cookie set by a response to an authenticated request is included.
    pub have_authentication: bool,
}

impl CookieHeader {
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Commit,
    Reject,
    Wait,
    /// Ready to put the question to the user.
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
    Ask,
}

/// Request attributes the matcher checks cookies against.
struct Query {
    secure: bool,
    script: bool,
    port: Option<u16>,
    third_party_only: bool,
    now: i64,
}

struct Hit {
    domain: Vec<usize>,
    path: Vec<usize>,
    index: usize,
    version: u8,
}

fn max_version(hits: &[Hit]) -> u8 {
    hits.iter().map(|h| h.version).max().unwrap_or(0)
}

fn cookie_matches(c: &Cookie, q: &Query, exact_server: bool, full_path: bool, skip_dollar: bool) -> bool {
    !c.is_expired(q.now)
        && (!c.is_secure() || q.secure)
        && (!c.is_http_only() || !q.script)
        && (!c.full_path_only() || full_path)
        && (!c.exact_server_only() || exact_server)
        && c.port.as_ref().map_or(true, |p| q.port.is_some_and(|port| p.contains(port)))
        && (!q.third_party_only || c.accepted_as_third_party())
        && !(skip_dollar && c.name.starts_with('$'))
}

/// Directory part of a request path (`/a/b` -> `/a`, `/a` -> `/`).
fn default_path(request_path: &str) -> String {
    match request_path.rfind('/') {
        None | Some(0) => "/".to_string(),
        Some(i) => request_path[..i].to_string(),
    }
}

/// Validates a `Domain` attribute against the response host and returns the
/// domain the cookie is stored under.
fn cookie_domain(host: &str, attr: &str, version_1: bool) -> CookieResult<String> {
    let attr = attr.trim().to_ascii_lowercase();
    let bare = attr.trim_start_matches('.').trim_end_matches('.');
    let reject = |why: &str| -> CookieResult<String> {
        Err(CookieError::MalformedInput(format!("Domain={attr} rejected for {host}: {why}")))
    };

    if bare.is_empty() {
        return reject("empty domain");
    }
    if domain_index::is_ip_literal(host) {
        return if bare == host { Ok(host.to_string()) } else { reject("IP hosts only match themselves") };
    }
    if bare == host {
        return Ok(host.to_string());
    }
    if !bare.contains('.') {
        return reject("single label domain");
    }
    let Some(prefix) = host.strip_suffix(bare).and_then(|p| p.strip_suffix('.')) else {
        return reject("host is not inside the domain");
    };
    if version_1 && prefix.contains('.') {
        return reject("host minus domain contains a dot");
    }
    Ok(bare.to_string())
}

/// Every cookie of one zone, plus the queue of cookies not yet accepted.
#[derive(Debug)]
pub struct CookieJar {
    config: CookieConfig,
    services: CookieServices,
    root: DomainNode,
    pending: VecDeque<PendingCookie>,
    next_id: u64,
    total_count: usize,
    dirty: bool,
    cancel: CancellationToken,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new(CookieConfig::default(), CookieServices::default())
    }
}

impl CookieJar {
    pub fn new(config: CookieConfig, services: CookieServices) -> Self {
        Self {
            config,
            services,
            root: DomainNode::default(),
            pending: VecDeque::new(),
            next_id: 0,
            total_count: 0,
            dirty: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn into_handle(self) -> CookieJarHandle {
        Arc::new(RwLock::new(self))
    }

    pub fn config(&self) -> &CookieConfig {
        &self.config
    }

    /// Number of stored cookies.
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Number of cookies waiting on the oracle or the user.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The jar changed since it was last loaded or written.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn now(&self) -> i64 {
        self.services.clock.now()
    }

    // ---------- Accepting ----------

    /// Accepts the cookie headers of one response, in header order.
    ///
    /// Malformed or refused cookies are counted, not returned as errors. Only
    /// [`CookieError::ResourceExhausted`] fails the call, and then nothing
    /// from this response has been queued. Runs one [`tick`](Self::tick)
    /// before returning, so the report also covers older queued entries that
    /// resolved meanwhile.
    pub fn accept_headers(&mut self, ctx: &ResponseContext, headers: &[SetCookieHeader]) -> CookieResult<AcceptReport> {
        let mut report = AcceptReport::default();
        if self.cancel.is_cancelled() {
            report.rejected = headers.len();
            return Ok(report);
        }

        let now = self.now();
        let mut batch = Vec::new();
        for header in headers {
            if header.kind == HeaderKind::SetCookie2 && !self.config.accept_version_1 {
                log::debug!("ignoring Set-Cookie2 from {}", ctx.url);
                report.rejected += 1;
                continue;
            }
            for parsed in parser::parse_header(header, now) {
                match parsed.and_then(|p| self.prepare(ctx, p, now)) {
                    Ok(entry) => {
                        batch.try_reserve(1)?;
                        batch.push(entry);
                    }
                    Err(CookieError::ResourceExhausted) => return Err(CookieError::ResourceExhausted),
                    Err(e) => {
                        log::debug!("cookie from {} rejected: {e}", ctx.url);
                        report.rejected += 1;
                    }
                }
            }
        }

        self.pending.try_reserve(batch.len())?;
        self.pending.extend(batch);

        report.merge(self.tick());
        Ok(report)
    }

    /// Accepts the `Set-Cookie` and `Set-Cookie2` headers of a response.
    pub fn store_response_cookies(&mut self, url: &Url, headers: &HeaderMap) -> CookieResult<AcceptReport> {
        let mut list = Vec::new();
        for kind in [HeaderKind::SetCookie, HeaderKind::SetCookie2] {
            for value in headers.get_all(kind.header_name()) {
                match value.to_str() {
                    Ok(v) => list.push(SetCookieHeader { kind, value: v.to_string() }),
                    Err(_) => log::debug!("ignoring non-visible-ASCII {} header from {url}", kind.header_name()),
                }
            }
        }
        self.accept_headers(&ResponseContext::new(url), &list)
    }

    /// Validates a decoded cookie against the response it came with.
    fn prepare(&mut self, ctx: &ResponseContext, parsed: ParsedCookie, now: i64) -> CookieResult<PendingCookie> {
        let host = ctx
            .url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CookieError::MalformedInput(format!("response URL {} has no host", ctx.url)))?;

        if parsed.name.len() + parsed.value.len() > self.config.max_cookie_length {
            return Err(CookieError::MalformedInput(format!(
                "cookie {} is longer than {} bytes",
                parsed.name, self.config.max_cookie_length
            )));
        }

        let version_1 = parsed.version >= 1;
        let mut flags = CookieFlags::empty();

        let domain = match parsed.domain.as_deref() {
            None => {
                flags |= CookieFlags::EXACT_SERVER_ONLY;
                host.clone()
            }
            Some(attr) => cookie_domain(&host, attr, version_1)?,
        };

        let request_path = ctx.url.path();
        let path = match parsed.path.as_deref() {
            Some(p) if p.starts_with('/') => {
                if version_1 && !request_path.starts_with(p) {
                    return Err(CookieError::MalformedInput(format!(
                        "Path={p} is not a prefix of {request_path}"
                    )));
                }
                if p.len() > 1 && p.ends_with('/') {
                    flags |= CookieFlags::FULL_PATH_ONLY;
                }
                p.to_string()
            }
            _ => default_path(request_path),
        };

        let port = match parsed.port {
            None => None,
            Some(spec) => {
                let request_port = ctx.url.port_or_known_default().ok_or_else(|| {
                    CookieError::MalformedInput(format!("Port attribute on a portless URL {}", ctx.url))
                })?;
                match spec {
                    PortSpec::Bare => Some(PortList { ports: vec![request_port], bare: true }),
                    PortSpec::List(list) if list.contains(request_port) => Some(list),
                    PortSpec::List(list) => {
                        return Err(CookieError::MalformedInput(format!(
                            "request port {request_port} not in Port=\"{}\"",
                            list.joined()
                        )))
                    }
                }
            }
        };

        flags.set(CookieFlags::SECURE, parsed.secure);
        flags.set(CookieFlags::HTTP_ONLY, parsed.http_only);
        flags.set(CookieFlags::ASSIGNED, parsed.assigned);
        flags.set(CookieFlags::DISCARD_AT_EXIT, parsed.discard || self.config.session_only);
        flags.set(CookieFlags::HAVE_PASSWORD, ctx.has_password);
        flags.set(CookieFlags::HAVE_AUTHENTICATION, ctx.has_authentication);

        let cookie = Cookie {
            name: parsed.name,
            value: parsed.value,
            expires: parsed.expires,
            last_used: 0,
            last_sync: now,
            flags,
            version: parsed.version,
            comment: parsed.comment,
            comment_url: parsed.comment_url,
            received_domain: if version_1 { parsed.domain } else { None },
            received_path: if version_1 { parsed.path } else { None },
            port,
        };

        self.next_id += 1;
        Ok(PendingCookie::new(self.next_id, cookie, domain, path, &ctx.url, ctx.first_party.as_ref()))
    }

    /// Processes every queued cookie whose dependencies have resolved, in
    /// FIFO order. Entries still waiting stay queued in their order.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.cancel.is_cancelled() {
            report.rejected = self.pending.len();
            self.pending.clear();
            return report;
        }

        let now = self.now();
        let mut answers = HashMap::new();
        let queue = std::mem::take(&mut self.pending);
        let mut waiting: VecDeque<PendingCookie> = VecDeque::with_capacity(queue.len());

        for mut entry in queue {
            let mut step = self.advance(&mut entry, &mut answers);
            if step == Step::Ask {
                let key = entry.key();
                if let Some(earlier) = waiting
                    .iter_mut()
                    .find(|w| w.state.is_awaiting_user() && w.key() == key)
                {
                    log::debug!("cookie {} already awaits confirmation, merged", entry.cookie.name);
                    earlier.supersede_with(entry);
                    continue;
                }
                step = if self.ask(&mut entry) {
                    self.advance(&mut entry, &mut answers)
                } else {
                    entry.state = PendingState::Rejected;
                    Step::Reject
                };
            }

            match step {
                Step::Commit => match self.commit(entry, now) {
                    Ok(()) => report.accepted += 1,
                    Err(e) => {
                        log::warn!("failed to store cookie: {e}");
                        report.failed += 1;
                    }
                },
                Step::Reject => report.rejected += 1,
                Step::Wait | Step::Ask => waiting.push_back(entry),
            }
        }

        report.pending = waiting.len();
        self.pending = waiting;
        report
    }

    fn advance(&mut self, entry: &mut PendingCookie, answers: &mut HashMap<String, DomainClass>) -> Step {
        match &mut entry.state {
            PendingState::Parsed | PendingState::NeedsDomainPolicy => {
                if entry.is_foreign_domain() {
                    match self.domain_class(&entry.domain, answers) {
                        DomainClass::Pending => {
                            entry.state = PendingState::NeedsDomainPolicy;
                            return Step::Wait;
                        }
                        DomainClass::PublicSuffixLike => {
                            log::debug!("cookie {} rejected: {} is public-suffix like", entry.cookie.name, entry.domain);
                            entry.state = PendingState::Rejected;
                            return Step::Reject;
                        }
                        DomainClass::Normal => {}
                    }
                }
                match self.resolve_policy(entry) {
                    Verdict::Accept => {
                        entry.state = PendingState::Accepted;
                        Step::Commit
                    }
                    Verdict::Reject => {
                        log::debug!("cookie {} for {} rejected by policy", entry.cookie.name, entry.domain);
                        entry.state = PendingState::Rejected;
                        Step::Reject
                    }
                    Verdict::Ask => {
                        entry.state = PendingState::NeedsUserConfirmation(None);
                        Step::Ask
                    }
                }
            }
            PendingState::NeedsUserConfirmation(None) => Step::Ask,
            PendingState::NeedsUserConfirmation(Some(rx)) => {
                let decision = match rx.try_recv() {
                    Ok(decision) => decision,
                    Err(TryRecvError::Empty) => return Step::Wait,
                    Err(TryRecvError::Closed) => {
                        log::debug!("confirmation for cookie {} was dropped", entry.cookie.name);
                        UserDecision::Reject
                    }
                };
                self.apply_decision(entry, decision)
            }
            PendingState::Accepted => Step::Commit,
            PendingState::Rejected => Step::Reject,
        }
    }

    /// Cached classification of `domain`, or the oracle's answer. The oracle
    /// is asked at most once per domain per tick.
    fn domain_class(&mut self, domain: &str, answers: &mut HashMap<String, DomainClass>) -> DomainClass {
        let Some(oracle) = self.services.oracle.clone() else {
            return DomainClass::Normal;
        };
        let labels = domain_index::labels(domain);
        let (at, exact) = self.root.locate(&labels);
        if exact {
            if let Some(class) = self.root.node(&at).and_then(|n| n.class) {
                return class;
            }
        }

        let class = *answers
            .entry(domain.to_string())
            .or_insert_with(|| oracle.classify(domain));
        if class != DomainClass::Pending {
            if let Ok(at) = self.root.locate_or_create(&labels) {
                if let Some(node) = self.root.node_mut(&at) {
                    node.class = Some(class);
                }
            }
        }
        class
    }

    /// Site policy for `host`: the nearest non-default setting walking up
    /// from the host, per field.
    fn effective_site_policy(&self, host: &str) -> SitePolicy {
        let (at, _) = self.root.locate(&domain_index::labels(host));
        let mut policy = SitePolicy::default();
        for node in self.root.chain(&at).into_iter().rev() {
            if policy.cookie_mode == SiteCookieMode::Default {
                policy.cookie_mode = node.policy.cookie_mode;
            }
            if policy.third_party == SiteThirdPartyMode::Default {
                policy.third_party = node.policy.third_party;
            }
        }
        policy
    }

    fn resolve_policy(&self, entry: &mut PendingCookie) -> Verdict {
        let site = self.effective_site_policy(&entry.host);
        let global = self.config.policy;

        let verdict = match site.cookie_mode {
            SiteCookieMode::Accept => Verdict::Accept,
            SiteCookieMode::Reject => Verdict::Reject,
            SiteCookieMode::Ask => Verdict::Ask,
            SiteCookieMode::Default => match global {
                CookiePolicy::RejectAll => Verdict::Reject,
                CookiePolicy::Ask => Verdict::Ask,
                CookiePolicy::AcceptAll | CookiePolicy::ThirdPartyRestricted => Verdict::Accept,
            },
        };
        if verdict == Verdict::Reject {
            return Verdict::Reject;
        }

        if entry.third_party {
            let allowed = match site.third_party {
                SiteThirdPartyMode::Accept => true,
                SiteThirdPartyMode::Reject => false,
                SiteThirdPartyMode::Default => global != CookiePolicy::ThirdPartyRestricted,
            };
            if !allowed {
                return Verdict::Reject;
            }
            entry.cookie.flags |= CookieFlags::THIRD_PARTY;
        }

        if verdict == Verdict::Ask && self.existing(entry).is_some_and(|c| c.flags.contains(CookieFlags::ACCEPT_UPDATES)) {
            return Verdict::Accept;
        }
        verdict
    }

    /// The stored cookie a pending entry would replace.
    fn existing(&self, entry: &PendingCookie) -> Option<&Cookie> {
        let loc = self.root.find(&entry.domain, &entry.path);
        if !loc.exact_server || !loc.full_path {
            return None;
        }
        self.path_node(&loc)?.cookie(&entry.cookie.name)
    }

    fn ask(&mut self, entry: &mut PendingCookie) -> bool {
        let Some(ui) = self.services.confirmation.clone() else {
            log::debug!("no confirmation UI, cookie {} rejected", entry.cookie.name);
            return false;
        };
        let view = entry.view(self.existing(entry).is_some());
        let rx = ui.ask(view, self.cancel.child_token());
        entry.state = PendingState::NeedsUserConfirmation(Some(rx));
        true
    }

    fn apply_decision(&mut self, entry: &mut PendingCookie, decision: UserDecision) -> Step {
        let accept = match decision {
            UserDecision::Accept => true,
            UserDecision::AcceptWithUpdates => {
                entry.cookie.flags |= CookieFlags::ACCEPT_UPDATES;
                true
            }
            UserDecision::Reject => false,
            UserDecision::AcceptAllFromDomain => {
                self.set_site_cookie_mode(&entry.host, SiteCookieMode::Accept);
                true
            }
            UserDecision::RejectAllFromDomain => {
                self.set_site_cookie_mode(&entry.host, SiteCookieMode::Reject);
                false
            }
        };
        if accept {
            entry.state = PendingState::Accepted;
            Step::Commit
        } else {
            entry.state = PendingState::Rejected;
            Step::Reject
        }
    }

    fn set_site_cookie_mode(&mut self, host: &str, mode: SiteCookieMode) {
        let mut policy = self.site_policy(host);
        policy.cookie_mode = mode;
        if let Err(e) = self.set_site_policy(host, policy) {
            log::warn!("could not record site policy for {host}: {e}");
        }
    }

    // ---------- Storing ----------

    fn path_node(&self, loc: &Location) -> Option<&PathNode> {
        self.root.node(&loc.domain)?.paths.node(&loc.path)
    }

    fn commit(&mut self, entry: PendingCookie, now: i64) -> CookieResult<()> {
        let loc = self.root.find_or_create(&entry.domain, &entry.path)?;
        let name = entry.cookie.name.clone();
        if self.upsert(&loc, entry.cookie, now)? {
            let committed = CookieRef { domain: loc.domain, path: loc.path, name };
            self.enforce_limits(&committed);
        } else {
            self.prune_location(&loc);
        }
        Ok(())
    }

    /// Stores `cookie` at `loc`, replacing a cookie with the same name.
    /// Returns `false` when nothing was stored (the cookie was expired).
    fn upsert(&mut self, loc: &Location, mut cookie: Cookie, now: i64) -> CookieResult<bool> {
        let node = self
            .root
            .node_mut(&loc.domain)
            .and_then(|d| d.paths.node_mut(&loc.path))
            .ok_or(CookieError::ResourceExhausted)?;
        node.cookies.try_reserve(1)?;

        if let Some(pos) = node.cookies.iter().position(|c| c.name == cookie.name) {
            let old = node.cookies.remove(pos);
            cookie.flags |= old.flags & CookieFlags::CARRIED;
            self.total_count -= 1;
            self.dirty = true;
        }

        if cookie.is_expired(now) {
            log::debug!("cookie {} removed by expiry", cookie.name);
            return Ok(false);
        }

        node.cookies.push(cookie);
        self.total_count += 1;
        self.dirty = true;
        Ok(true)
    }

    fn evict(&mut self, r: &CookieRef) -> Option<Cookie> {
        let cookie = eviction::take(&mut self.root, r)?;
        self.total_count -= 1;
        self.dirty = true;
        Some(cookie)
    }

    fn enforce_limits(&mut self, committed: &CookieRef) {
        let mut evicted = 0;

        while self.root.node(&committed.domain).map_or(0, DomainNode::own_count) > self.config.max_cookies_per_domain {
            let filter = Candidates { skip: Some(committed), deep: false, ..Candidates::default() };
            let Some(r) = eviction::find_least_recently_used(&self.root, &committed.domain, filter) else {
                break;
            };
            if self.evict(&r).is_none() {
                break;
            }
            evicted += 1;
        }

        while self.total_count > self.config.max_total_cookies {
            let filter = Candidates { skip: Some(committed), ..Candidates::default() };
            let Some(r) = eviction::find_least_recently_used(&self.root, &[], filter) else {
                break;
            };
            if self.evict(&r).is_none() {
                break;
            }
            evicted += 1;
        }

        if evicted > 0 {
            log::debug!("evicted {evicted} cookies to stay within limits");
            self.root.prune_all();
        }
    }

    /// Evicts until the jar-wide limit holds. Does not prune.
    fn evict_to_limit(&mut self) -> usize {
        let mut evicted = 0;
        while self.total_count > self.config.max_total_cookies {
            let Some(r) = eviction::find_least_recently_used(&self.root, &[], Candidates::default()) else {
                break;
            };
            if self.evict(&r).is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn prune_location(&mut self, loc: &Location) {
        if let Some(node) = self.root.node_mut(&loc.domain) {
            node.paths.prune_along(&loc.path);
        }
        self.root.prune_along(&loc.domain);
    }

    // ---------- Querying ----------

    fn select(&self, labels: &[String], segs: &[&str], q: &Query, skip_dollar: bool) -> Vec<Hit> {
        let (dom_at, exact) = self.root.locate(labels);
        let mut hits = Vec::new();

        for depth in (1..=dom_at.len()).rev() {
            let at = &dom_at[..depth];
            let Some(node) = self.root.node(at) else {
                continue;
            };
            let exact_server = exact && depth == dom_at.len();

            let mut paths = Vec::new();
            node.paths.matches(segs, &mut Vec::new(), &mut paths);
            for (path_at, full) in paths {
                let Some(pnode) = node.paths.node(&path_at) else {
                    continue;
                };
                for (index, c) in pnode.cookies.iter().enumerate() {
                    if cookie_matches(c, q, exact_server, full, skip_dollar) {
                        hits.push(Hit { domain: at.to_vec(), path: path_at.clone(), index, version: c.version });
                    }
                }
            }
        }
        hits
    }

    fn cookie_at(&self, hit: &Hit) -> Option<&Cookie> {
        self.root.node(&hit.domain)?.paths.node(&hit.path)?.cookies.get(hit.index)
    }

    fn cookie_at_mut(&mut self, hit: &Hit) -> Option<&mut Cookie> {
        self.root.node_mut(&hit.domain)?.paths.node_mut(&hit.path)?.cookies.get_mut(hit.index)
    }

    /// Builds the `Cookie:` header for a request.
    ///
    /// Cookies are ordered most specific first: deepest path first within a
    /// domain, then the parent domains. When a version 1 cookie is sent,
    /// the selection is redone once without any cookie whose name starts
    /// with `$`, for compatibility with servers that set attribute-like
    /// classic cookies. The header stops growing at `max_header_len`. Every
    /// included cookie gets its `last_used` refreshed.
    pub fn build_cookie_header(&mut self, req: &RequestContext) -> CookieHeader {
        let Some(host) = req.url.host_str() else {
            return CookieHeader::default();
        };
        let now = self.now();
        let labels = domain_index::labels(host);
        let segs = path_index::segments(req.url.path());
        let query = Query {
            secure: req.is_secure(),
            script: req.script,
            port: req.url.port_or_known_default(),
            third_party_only: self.config.policy == CookiePolicy::ThirdPartyRestricted
                && req.first_party.as_ref().is_some_and(|top| is_third_party(&req.url, top)),
            now,
        };

        let mut hits = self.select(&labels, &segs, &query, false);
        let mut built = self.assemble(&hits, max_version(&hits));
        if built.1.iter().any(|&i| hits[i].version >= 1) {
            hits = self.select(&labels, &segs, &query, true);
            built = self.assemble(&hits, max_version(&hits));
        }
        // `$Version` names the highest version actually sent.
        let sent = built.1.iter().map(|&i| hits[i].version).max().unwrap_or(0);
        if sent < built.0.version {
            built = self.assemble(&hits, sent);
        }

        let (header, emitted) = built;
        for &i in &emitted {
            if let Some(c) = self.cookie_at_mut(&hits[i]) {
                c.last_used = now;
            }
        }
        header
    }

    /// Joins the fragments of `hits` up to `max_header_len`, leaving out
    /// cookies newer than `version`. Returns the header and the indices of
    /// the hits it includes.
    fn assemble(&self, hits: &[Hit], version: u8) -> (CookieHeader, Vec<usize>) {
        let mut header = CookieHeader { version, ..CookieHeader::default() };
        if version >= 1 {
            header.value = format!("$Version={version}; ");
        }
        let prefix_len = header.value.len();

        let mut emitted = Vec::with_capacity(hits.len());
        for (i, hit) in hits.iter().enumerate() {
            if hit.version > version {
                continue;
            }
            let Some(c) = self.cookie_at(hit) else {
                continue;
            };
            let fragment = c.request_fragment();
            let sep = if header.value.len() > prefix_len { 2 } else { 0 };
            if header.value.len() + sep + fragment.len() > self.config.max_header_len {
                break;
            }
            if sep > 0 {
                header.value.push_str("; ");
            }
            header.value.push_str(&fragment);
            header.have_password |= c.flags.contains(CookieFlags::HAVE_PASSWORD);
            header.have_authentication |= c.flags.contains(CookieFlags::HAVE_AUTHENTICATION);
            emitted.push(i);
        }

        if emitted.is_empty() {
            return (CookieHeader::default(), emitted);
        }
        (header, emitted)
    }

    /// The `Cookie:` header value for a plain HTTP request to `url`.
    pub fn get_request_cookies(&mut self, url: &Url) -> Option<String> {
        let header = self.build_cookie_header(&RequestContext::new(url));
        (!header.is_empty()).then_some(header.value)
    }

    // ---------- Inspection ----------

    fn collect_node(node: &DomainNode, domain: &str, path: Option<&str>, out: &mut Vec<CookieSnapshot>) {
        let wanted = path.map(|p| path_index::join(&path_index::segments(p)));
        let mut segs = Vec::new();
        node.paths.walk(&mut segs, &mut |segs, pnode| {
            let p = path_index::join(segs);
            if wanted.as_ref().is_some_and(|w| *w != p) {
                return;
            }
            out.extend(pnode.cookies.iter().map(|c| c.snapshot(domain, &p)));
        });
    }

    /// Every stored cookie.
    pub fn snapshot(&self) -> Vec<CookieSnapshot> {
        let mut out = Vec::new();
        let mut labels = Vec::new();
        self.root.walk(&mut labels, &mut |labels, node| {
            Self::collect_node(node, &domain_index::host_name(labels), None, &mut out);
        });
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    /// Cookies stored for exactly `domain`, optionally only at `path`.
    pub fn cookies_for_domain(&self, domain: &str, path: Option<&str>) -> Vec<CookieSnapshot> {
        let labels = domain_index::labels(domain);
        let (at, exact) = self.root.locate(&labels);
        let mut out = Vec::new();
        match self.root.node(&at) {
            Some(node) if exact && !at.is_empty() => {
                Self::collect_node(node, &domain_index::host_name(&labels), path, &mut out)
            }
            _ => {}
        }
        out
    }

    /// Stored cookies grouped per (domain, path), as `("example.com/a", "x=1; y=2")`.
    pub fn get_all_cookies(&self) -> Vec<(String, String)> {
        let mut groups: Vec<(String, String)> = Vec::new();
        for s in self.snapshot() {
            let key = format!("{}{}", s.domain, s.path);
            let pair = format!("{}={}", s.name, s.value);
            match groups.last_mut() {
                Some((k, v)) if *k == key => {
                    v.push_str("; ");
                    v.push_str(&pair);
                }
                _ => groups.push((key, pair)),
            }
        }
        groups
    }

    // ---------- Management ----------

    /// Removes every cookie. Site policies are kept.
    pub fn clear(&mut self) {
        self.root.for_each_node_mut(&mut |n| n.paths = PathNode::default());
        self.root.prune_all();
        self.total_count = 0;
        self.dirty = true;
    }

    /// Removes the cookie `name` stored at exactly (`domain`, `path`).
    pub fn remove_cookie(&mut self, domain: &str, path: &str, name: &str) -> bool {
        let loc = self.root.find(domain, path);
        if !loc.exact_server || !loc.full_path || loc.domain.is_empty() {
            return false;
        }
        let Some(node) = self.root.node_mut(&loc.domain).and_then(|d| d.paths.node_mut(&loc.path)) else {
            return false;
        };
        let Some(pos) = node.cookies.iter().position(|c| c.name == name) else {
            return false;
        };
        node.cookies.remove(pos);
        self.total_count -= 1;
        self.dirty = true;
        self.prune_location(&loc);
        true
    }

    /// Removes every cookie of `domain` and its subdomains.
    pub fn remove_cookies_for_domain(&mut self, domain: &str) -> usize {
        let (at, exact) = self.root.locate(&domain_index::labels(domain));
        if !exact || at.is_empty() {
            return 0;
        }
        let Some(node) = self.root.node_mut(&at) else {
            return 0;
        };
        let removed = node.count();
        node.for_each_node_mut(&mut |n| n.paths = PathNode::default());
        self.finish_removal(removed)
    }

    /// Removes every cookie stored for the host of `url` (all paths).
    pub fn remove_cookies_for_url(&mut self, url: &Url) -> usize {
        let Some(host) = url.host_str() else {
            return 0;
        };
        let (at, exact) = self.root.locate(&domain_index::labels(host));
        if !exact || at.is_empty() {
            return 0;
        }
        let Some(node) = self.root.node_mut(&at) else {
            return 0;
        };
        let removed = node.own_count();
        node.paths = PathNode::default();
        self.finish_removal(removed)
    }

    fn finish_removal(&mut self, removed: usize) -> usize {
        if removed > 0 {
            self.total_count -= removed;
            self.dirty = true;
        }
        self.root.prune_all();
        removed
    }

    /// Marks a cookie as exempt from (or subject to) automatic eviction.
    pub fn set_protected(&mut self, domain: &str, path: &str, name: &str, protected: bool) -> bool {
        let loc = self.root.find(domain, path);
        if !loc.exact_server || !loc.full_path {
            return false;
        }
        let Some(cookie) = self
            .root
            .node_mut(&loc.domain)
            .and_then(|d| d.paths.node_mut(&loc.path))
            .and_then(|p| p.cookies.iter_mut().find(|c| c.name == name))
        else {
            return false;
        };
        cookie.flags.set(CookieFlags::PROTECTED, protected);
        self.dirty = true;
        true
    }

    /// Policy set for exactly `host`.
    pub fn site_policy(&self, host: &str) -> SitePolicy {
        let (at, exact) = self.root.locate(&domain_index::labels(host));
        match self.root.node(&at) {
            Some(node) if exact => node.policy,
            _ => SitePolicy::default(),
        }
    }

    /// Sets the sticky policy of `host`. A default policy removes the override.
    pub fn set_site_policy(&mut self, host: &str, policy: SitePolicy) -> CookieResult<()> {
        let labels = domain_index::labels(host);
        if labels.is_empty() {
            return Err(CookieError::MalformedInput(format!("invalid host {host:?}")));
        }
        let at = self.root.locate_or_create(&labels)?;
        if let Some(node) = self.root.node_mut(&at) {
            node.policy = policy;
        }
        if policy.is_default() {
            self.root.prune_along(&at);
        }
        self.dirty = true;
        Ok(())
    }

    /// Drops every session cookie and every cookie marked discard-at-exit.
    pub fn end_session(&mut self) -> usize {
        let mut removed = 0;
        self.root.for_each_node_mut(&mut |n| {
            n.paths.for_each_list_mut(&mut |list| {
                let before = list.len();
                list.retain(|c| c.expires.timestamp().is_some() && !c.discard_at_exit());
                removed += before - list.len();
            });
        });
        self.finish_removal(removed)
    }

    /// Removes expired cookies, trims to `max_total_cookies` and prunes
    /// nodes that hold nothing but a cached domain classification.
    pub fn free_unused_resources(&mut self) -> usize {
        let now = self.now();
        let mut removed = 0;
        self.root.for_each_node_mut(&mut |n| {
            n.paths.for_each_list_mut(&mut |list| {
                let before = list.len();
                list.retain(|c| !c.is_expired(now));
                removed += before - list.len();
            });
        });
        if removed > 0 {
            self.total_count -= removed;
            self.dirty = true;
        }
        removed += self.evict_to_limit();
        self.root.prune_all();
        removed
    }

    // ---------- Persistence ----------

    /// Replaces the jar content with a decoded cookie file.
    ///
    /// Damaged parts of the file are dropped; only an unusable header is an
    /// error. The result is trimmed to `max_total_cookies`.
    pub fn read_persistent(&mut self, bytes: &[u8]) -> CookieResult<usize> {
        let now = self.now();
        let (root, stats) = codec::decode(bytes, now)?;
        self.root = root;
        self.root.prune_all();
        self.total_count = self.root.count();

        let evicted = self.evict_to_limit();
        if evicted > 0 {
            self.root.prune_all();
        }
        self.dirty = evicted > 0;

        log::info!(
            "loaded {} cookies ({} skipped, {} expired, {} evicted)",
            self.total_count,
            stats.skipped,
            stats.expired,
            evicted
        );
        Ok(self.total_count)
    }

    /// Writes the persistent cookies. When `max_file_size` is set, least
    /// recently used cookies are evicted first until the file fits.
    pub fn write_persistent<W: Write>(&mut self, out: W) -> CookieResult<u64> {
        let now = self.now();
        if let Some(budget) = self.config.max_file_size {
            let mut size = codec::encoded_size(&self.root, now);
            let mut evicted = 0;
            while size > budget {
                let filter = Candidates { persistent_at: Some(now), ..Candidates::default() };
                let Some(r) = eviction::find_least_recently_used(&self.root, &[], filter) else {
                    break;
                };
                if self.evict(&r).is_none() {
                    break;
                }
                // Emptied branches drop out of the file too.
                size = codec::encoded_size(&self.root, now);
                evicted += 1;
            }
            if evicted > 0 {
                log::debug!("evicted {evicted} cookies to fit the {budget} byte cookie file");
                self.root.prune_all();
            }
        }

        let written = codec::encode(&self.root, now, out)?;
        self.dirty = false;
        Ok(written)
    }

    /// Cancels outstanding questions and drops every pending cookie.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        if !self.pending.is_empty() {
            log::debug!("dropping {} pending cookies", self.pending.len());
            self.pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::engine::cookies::pending::PendingCookieView;
    use crate::engine::cookies::policy::{CookieConfirmation, DomainOracle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    const NOW: i64 = 1_700_000_000;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn jar_with(config: CookieConfig, services: CookieServices) -> (CookieJar, Arc<ManualClock>) {
        init();
        let clock = Arc::new(ManualClock::new(NOW));
        let jar = CookieJar::new(config, services.with_clock(clock.clone()));
        (jar, clock)
    }

    fn new_jar() -> (CookieJar, Arc<ManualClock>) {
        jar_with(CookieConfig::default(), CookieServices::default())
    }

    fn set(jar: &mut CookieJar, url: &str, header: &str) -> AcceptReport {
        jar.accept_headers(&ResponseContext::new(&u(url)), &[SetCookieHeader::set_cookie(header)])
            .unwrap()
    }

    fn cookie_header(jar: &mut CookieJar, url: &str) -> String {
        jar.build_cookie_header(&RequestContext::new(&u(url))).value
    }

    #[derive(Default)]
    struct QueueUi {
        asked: Mutex<Vec<(PendingCookieView, oneshot::Sender<UserDecision>)>>,
    }

    impl QueueUi {
        fn answer_all(&self, decision: UserDecision) {
            for (_, tx) in self.asked.lock().unwrap().drain(..) {
                let _ = tx.send(decision);
            }
        }

        fn count(&self) -> usize {
            self.asked.lock().unwrap().len()
        }
    }

    impl CookieConfirmation for QueueUi {
        fn ask(&self, view: PendingCookieView, _cancel: CancellationToken) -> oneshot::Receiver<UserDecision> {
            let (tx, rx) = oneshot::channel();
            self.asked.lock().unwrap().push((view, tx));
            rx
        }
    }

    struct FixedOracle {
        answer: Mutex<DomainClass>,
        calls: AtomicUsize,
    }

    impl FixedOracle {
        fn new(answer: DomainClass) -> Arc<Self> {
            Arc::new(Self { answer: Mutex::new(answer), calls: AtomicUsize::new(0) })
        }
    }

    impl DomainOracle for FixedOracle {
        fn classify(&self, _domain: &str) -> DomainClass {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.answer.lock().unwrap()
        }
    }

    fn ask_policy() -> CookieConfig {
        CookieConfig::builder().policy(CookiePolicy::Ask).build().unwrap()
    }

    #[test]
    fn stores_and_returns_a_cookie() {
        let (mut jar, _) = new_jar();
        let report = set(&mut jar, "https://www.example.com/", "sid=abc; Path=/");
        assert_eq!(report, AcceptReport { accepted: 1, ..AcceptReport::default() });
        assert_eq!(cookie_header(&mut jar, "https://www.example.com/page"), "sid=abc");
        assert_eq!(jar.total_count(), 1);
        assert!(jar.is_dirty());
    }

    #[test]
    fn replace_keeps_one_record_with_latest_value() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "name=a; Max-Age=100");
        set(&mut jar, "http://example.com/", "name=b");

        let all = jar.snapshot();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].value, "b");
        assert_eq!(jar.total_count(), 1);
    }

    #[test]
    fn expired_update_deletes() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "name=x");
        set(&mut jar, "http://example.com/", "name=x; Expires=Thu, 01 Jan 1970 00:00:10 GMT");

        assert!(jar.snapshot().is_empty());
        assert_eq!(jar.total_count(), 0);
        assert!(jar.root.children.is_empty(), "emptied nodes are pruned");
    }

    #[test]
    fn expired_new_cookie_is_dropped() {
        let (mut jar, _) = new_jar();
        let report = set(&mut jar, "http://example.com/", "gone=1; Max-Age=0");
        assert_eq!(report.accepted, 1);
        assert_eq!(jar.total_count(), 0);
        assert!(jar.root.children.is_empty());
    }

    #[test]
    fn path_prefix_visibility() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/a/index.html", "p=1; Path=/a");
        assert_eq!(cookie_header(&mut jar, "http://example.com/a/b/c"), "p=1");
        assert_eq!(cookie_header(&mut jar, "http://example.com/abc"), "p=1");
        assert_eq!(cookie_header(&mut jar, "http://example.com/x"), "");
    }

    #[test]
    fn trailing_slash_path_only_matches_full_segments() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "f=1; Path=/a/");
        assert_eq!(cookie_header(&mut jar, "http://example.com/a/b"), "f=1");
        assert_eq!(cookie_header(&mut jar, "http://example.com/ab"), "");
    }

    #[test]
    fn default_path_is_request_directory() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/docs/page.html", "d=1");
        assert_eq!(jar.snapshot()[0].path, "/docs");
        assert_eq!(default_path("/"), "/");
        assert_eq!(default_path("/page"), "/");
    }

    #[test]
    fn secure_and_http_only_are_enforced() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "https://example.com/", "s=1; Secure");
        set(&mut jar, "https://example.com/", "h=1; HttpOnly");

        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "h=1");
        let script = jar.build_cookie_header(&RequestContext::new(&u("https://example.com/")).script(true));
        assert_eq!(script.value, "s=1");
        assert_eq!(cookie_header(&mut jar, "wss://example.com/"), "s=1; h=1");
    }

    #[test]
    fn host_only_cookies_stay_on_their_host() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "host=1");
        set(&mut jar, "http://example.com/", "wide=1; Domain=example.com");

        assert_eq!(cookie_header(&mut jar, "http://www.example.com/"), "wide=1");
        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "host=1; wide=1");
    }

    #[test]
    fn domain_attribute_validation() {
        let (mut jar, _) = new_jar();
        assert_eq!(set(&mut jar, "http://www.example.com/", "a=1; Domain=other.com").rejected, 1);
        assert_eq!(set(&mut jar, "http://www.example.com/", "a=1; Domain=com").rejected, 1);
        assert_eq!(set(&mut jar, "http://10.0.0.1/", "a=1; Domain=0.0.1").rejected, 1);
        assert_eq!(set(&mut jar, "http://10.0.0.1/", "a=1; Domain=10.0.0.1").accepted, 1);
        assert_eq!(set(&mut jar, "http://www.example.com/", "b=1; Domain=.example.com").accepted, 1);
        assert_eq!(jar.cookies_for_domain("example.com", None).len(), 1);
    }

    #[test]
    fn overlong_cookie_is_rejected() {
        let config = CookieConfig::builder().max_cookie_length(8).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        assert_eq!(set(&mut jar, "http://example.com/", "name=123456").rejected, 1);
        assert_eq!(set(&mut jar, "http://example.com/", "name=123").accepted, 1);
    }

    #[test]
    fn end_to_end_ordering() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "https://example.com/", "root=1; Domain=example.com; Path=/");
        set(&mut jar, "https://a.example.com/x/", "x=2; Path=/x");
        set(&mut jar, "https://a.example.com/x/z/", "z=3; Path=/x/z");

        assert_eq!(cookie_header(&mut jar, "https://a.example.com/x/y"), "x=2; root=1");
    }

    #[test]
    fn last_used_is_refreshed_by_queries() {
        let (mut jar, clock) = new_jar();
        set(&mut jar, "http://example.com/", "a=1");
        assert_eq!(jar.snapshot()[0].last_used, 0);

        clock.advance(30);
        cookie_header(&mut jar, "http://example.com/");
        assert_eq!(jar.snapshot()[0].last_used, NOW + 30);
    }

    #[test]
    fn header_length_is_bounded() {
        let config = CookieConfig::builder().max_header_len(12).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        set(&mut jar, "http://example.com/", "aaaa=1");
        set(&mut jar, "http://example.com/", "bbbb=2");
        set(&mut jar, "http://example.com/", "cccc=3");

        let header = cookie_header(&mut jar, "http://example.com/");
        assert_eq!(header, "aaaa=1");
    }

    #[test]
    fn dollar_cookies_are_dropped_when_a_version_1_cookie_is_sent() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "$Legacy=1");
        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "$Legacy=1");

        jar.accept_headers(
            &ResponseContext::new(&u("http://example.com/")),
            &[SetCookieHeader::set_cookie2("v1=\"x\"; Version=1; Path=\"/\"")],
        )
        .unwrap();

        let header = jar.build_cookie_header(&RequestContext::new(&u("http://example.com/")));
        assert_eq!(header.version, 1);
        assert_eq!(header.value, "$Version=1; v1=\"x\"; $Path=\"/\"");
    }

    #[test]
    fn dollar_cookies_stay_when_the_version_1_cookie_does_not_fit() {
        let config = CookieConfig::builder().max_header_len(30).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        set(&mut jar, "http://example.com/", "$Legacy=1");
        jar.accept_headers(
            &ResponseContext::new(&u("http://example.com/")),
            &[SetCookieHeader::set_cookie2(format!("v1=\"{}\"; Version=1", "x".repeat(40)))],
        )
        .unwrap();
        assert_eq!(jar.total_count(), 2);

        let header = jar.build_cookie_header(&RequestContext::new(&u("http://example.com/")));
        assert_eq!(header.version, 0);
        assert_eq!(header.value, "$Legacy=1");
    }

    #[test]
    fn version_1_port_restriction() {
        let (mut jar, _) = new_jar();
        let ctx = ResponseContext::new(&u("http://example.com:8080/"));
        let report = jar
            .accept_headers(
                &ctx,
                &[
                    SetCookieHeader::set_cookie2("p=1; Version=1; Port=\"8080\""),
                    SetCookieHeader::set_cookie2("q=1; Version=1; Port=\"80\""),
                    SetCookieHeader::set_cookie2("r=1; Version=1; Port"),
                ],
            )
            .unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);

        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "");
        assert_eq!(
            cookie_header(&mut jar, "http://example.com:8080/"),
            "$Version=1; p=1; $Port=\"8080\"; r=1; $Port"
        );
    }

    #[test]
    fn set_cookie2_can_be_disabled() {
        let config = CookieConfig::builder().accept_version_1(false).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        let report = jar
            .accept_headers(
                &ResponseContext::new(&u("http://example.com/")),
                &[SetCookieHeader::set_cookie2("a=1; Version=1")],
            )
            .unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(jar.total_count(), 0);
    }

    #[test]
    fn eviction_keeps_total_within_limit_and_spares_protected() {
        let config = CookieConfig::builder().max_total_cookies(3).max_cookies_per_domain(3).build().unwrap();
        let (mut jar, clock) = jar_with(config, CookieServices::default());

        set(&mut jar, "http://keep.example/", "keep=1");
        assert!(jar.set_protected("keep.example", "/", "keep", true));

        for i in 0..5 {
            clock.advance(1);
            set(&mut jar, &format!("http://site{i}.example/"), &format!("c{i}=1"));
            assert!(jar.total_count() <= 3);
        }

        let names: Vec<_> = jar.snapshot().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"keep".to_string()));
        assert!(names.contains(&"c4".to_string()), "the newest cookie survives");
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn per_domain_limit_evicts_within_the_domain() {
        let config = CookieConfig::builder().max_cookies_per_domain(2).build().unwrap();
        let (mut jar, clock) = jar_with(config, CookieServices::default());

        set(&mut jar, "http://other.com/", "o=1");
        for name in ["a", "b", "c"] {
            clock.advance(1);
            set(&mut jar, "http://example.com/", &format!("{name}=1"));
        }

        let names: Vec<_> = jar.cookies_for_domain("example.com", None).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(jar.cookies_for_domain("other.com", None).len(), 1);
    }

    #[test]
    fn used_cookies_outlive_unused_ones() {
        let config = CookieConfig::builder().max_total_cookies(2).max_cookies_per_domain(2).build().unwrap();
        let (mut jar, clock) = jar_with(config, CookieServices::default());

        set(&mut jar, "http://a.com/", "used=1");
        clock.advance(1);
        set(&mut jar, "http://b.com/", "unused=1");
        cookie_header(&mut jar, "http://a.com/");
        clock.advance(1);
        set(&mut jar, "http://c.com/", "new=1");

        let names: Vec<_> = jar.snapshot().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"used".to_string()));
        assert!(!names.contains(&"unused".to_string()));
    }

    #[test]
    fn updates_carry_flags_forward() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "a=1; Max-Age=100");
        jar.set_protected("example.com", "/", "a", true);
        set(&mut jar, "http://example.com/", "a=2; Max-Age=100");

        let s = &jar.snapshot()[0];
        assert_eq!(s.value, "2");
        assert!(s.protected);
    }

    #[test]
    fn persistent_update_clears_discard_at_exit() {
        let (mut jar, _) = new_jar();
        jar.accept_headers(
            &ResponseContext::new(&u("http://example.com/")),
            &[SetCookieHeader::set_cookie2("a=1; Version=1; Discard")],
        )
        .unwrap();
        assert!(jar.snapshot()[0].discard_at_exit);

        set(&mut jar, "http://example.com/", "a=2; Max-Age=3600");
        assert_eq!(jar.total_count(), 1);
        assert!(!jar.snapshot()[0].discard_at_exit);

        let mut out = Vec::new();
        jar.write_persistent(&mut out).unwrap();
        let (mut restored, _) = new_jar();
        assert_eq!(restored.read_persistent(&out).unwrap(), 1);
        assert_eq!(cookie_header(&mut restored, "http://example.com/"), "a=2");
    }

    #[test]
    fn session_only_still_discards_updates() {
        let config = CookieConfig::builder().session_only(true).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        set(&mut jar, "http://example.com/", "a=1; Max-Age=3600");
        set(&mut jar, "http://example.com/", "a=2; Max-Age=3600");
        assert!(jar.snapshot()[0].discard_at_exit);
    }

    #[test]
    fn reject_all_stores_nothing() {
        let config = CookieConfig::builder().policy(CookiePolicy::RejectAll).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        assert_eq!(set(&mut jar, "http://example.com/", "a=1").rejected, 1);
        assert_eq!(jar.total_count(), 0);
    }

    #[test]
    fn site_policy_overrides_global_policy() {
        let config = CookieConfig::builder().policy(CookiePolicy::RejectAll).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        jar.set_site_policy("example.com", SitePolicy { cookie_mode: SiteCookieMode::Accept, ..SitePolicy::default() })
            .unwrap();

        assert_eq!(set(&mut jar, "http://www.example.com/", "a=1").accepted, 1, "inherited from parent");
        assert_eq!(set(&mut jar, "http://other.com/", "a=1").rejected, 1);
    }

    #[test]
    fn third_party_restrictions() {
        let config = CookieConfig::builder().policy(CookiePolicy::ThirdPartyRestricted).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        let top = u("https://news.example.com/");
        let ctx = ResponseContext::new(&u("https://ads.tracker.net/pixel")).first_party(&top);

        let report = jar.accept_headers(&ctx, &[SetCookieHeader::set_cookie("t=1")]).unwrap();
        assert_eq!(report.rejected, 1);

        jar.set_site_policy(
            "ads.tracker.net",
            SitePolicy { third_party: SiteThirdPartyMode::Accept, ..SitePolicy::default() },
        )
        .unwrap();
        let report = jar.accept_headers(&ctx, &[SetCookieHeader::set_cookie("t=1")]).unwrap();
        assert_eq!(report.accepted, 1);
        assert!(jar.snapshot()[0].third_party);

        // A first-party cookie of the same host is not sent in a third-party context.
        set(&mut jar, "https://ads.tracker.net/", "own=1");
        let req = RequestContext::new(&u("https://ads.tracker.net/pixel")).first_party(&top);
        assert_eq!(jar.build_cookie_header(&req).value, "t=1");
        assert_eq!(cookie_header(&mut jar, "https://ads.tracker.net/pixel"), "t=1; own=1");
    }

    #[test]
    fn ask_without_ui_rejects() {
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default());
        assert_eq!(set(&mut jar, "http://example.com/", "a=1").rejected, 1);
    }

    #[test]
    fn ask_waits_for_the_user() {
        let ui = Arc::new(QueueUi::default());
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default().with_confirmation(ui.clone()));

        let report = set(&mut jar, "http://example.com/", "a=1");
        assert_eq!(report.pending, 1);
        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "", "not visible while pending");

        assert_eq!(jar.tick(), TickReport { pending: 1, ..TickReport::default() });
        ui.answer_all(UserDecision::Accept);
        assert_eq!(jar.tick().accepted, 1);
        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "a=1");
    }

    #[test]
    fn identical_questions_collapse() {
        let ui = Arc::new(QueueUi::default());
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default().with_confirmation(ui.clone()));

        set(&mut jar, "http://example.com/", "a=1");
        set(&mut jar, "http://example.com/", "a=2");
        assert_eq!(ui.count(), 1);
        assert_eq!(jar.pending_count(), 1);

        ui.answer_all(UserDecision::Accept);
        jar.tick();
        assert_eq!(jar.snapshot()[0].value, "2", "newest data wins");
    }

    #[test]
    fn dropped_question_rejects() {
        let ui = Arc::new(QueueUi::default());
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default().with_confirmation(ui.clone()));
        set(&mut jar, "http://example.com/", "a=1");
        ui.asked.lock().unwrap().clear();
        assert_eq!(jar.tick().rejected, 1);
        assert_eq!(jar.pending_count(), 0);
    }

    #[test]
    fn accept_with_updates_skips_later_questions() {
        let ui = Arc::new(QueueUi::default());
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default().with_confirmation(ui.clone()));
        set(&mut jar, "http://example.com/", "a=1");
        ui.answer_all(UserDecision::AcceptWithUpdates);
        jar.tick();

        let report = set(&mut jar, "http://example.com/", "a=2");
        assert_eq!(report.accepted, 1);
        assert_eq!(ui.count(), 0);
        assert_eq!(jar.snapshot()[0].value, "2");
    }

    #[test]
    fn domain_wide_answers_become_site_policy() {
        let ui = Arc::new(QueueUi::default());
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default().with_confirmation(ui.clone()));
        set(&mut jar, "http://bad.com/", "a=1");
        ui.answer_all(UserDecision::RejectAllFromDomain);
        jar.tick();

        assert_eq!(jar.site_policy("bad.com").cookie_mode, SiteCookieMode::Reject);
        assert_eq!(set(&mut jar, "http://bad.com/", "b=1").rejected, 1);
        assert_eq!(ui.count(), 0);

        set(&mut jar, "http://good.com/", "a=1");
        ui.answer_all(UserDecision::AcceptAllFromDomain);
        jar.tick();
        assert_eq!(set(&mut jar, "http://good.com/", "b=1").accepted, 1);
    }

    #[test]
    fn oracle_rejects_public_suffix_domains() {
        let oracle = FixedOracle::new(DomainClass::PublicSuffixLike);
        let (mut jar, _) = jar_with(CookieConfig::default(), CookieServices::default().with_oracle(oracle.clone()));

        assert_eq!(set(&mut jar, "http://www.example.co.uk/", "a=1; Domain=co.uk").rejected, 1);
        assert_eq!(set(&mut jar, "http://www.example.co.uk/", "b=1").accepted, 1, "host cookies skip the oracle");
    }

    #[test]
    fn oracle_is_asked_once_per_domain_per_tick() {
        let oracle = FixedOracle::new(DomainClass::Pending);
        let (mut jar, _) = jar_with(CookieConfig::default(), CookieServices::default().with_oracle(oracle.clone()));

        let ctx = ResponseContext::new(&u("http://www.example.com/"));
        let headers = [
            SetCookieHeader::set_cookie("a=1; Domain=example.com"),
            SetCookieHeader::set_cookie("b=1; Domain=example.com"),
        ];
        let report = jar.accept_headers(&ctx, &headers).unwrap();
        assert_eq!(report.pending, 2);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

        *oracle.answer.lock().unwrap() = DomainClass::Normal;
        let report = jar.tick();
        assert_eq!(report.accepted, 2);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);

        // The answer is cached on the domain node.
        jar.accept_headers(&ctx, &[SetCookieHeader::set_cookie("c=1; Domain=example.com")]).unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn waiting_cookies_commit_in_arrival_order() {
        let oracle = FixedOracle::new(DomainClass::Pending);
        let (mut jar, _) = jar_with(CookieConfig::default(), CookieServices::default().with_oracle(oracle.clone()));

        let ctx = ResponseContext::new(&u("http://www.example.com/"));
        jar.accept_headers(&ctx, &[SetCookieHeader::set_cookie("a=1; Domain=example.com")]).unwrap();
        jar.accept_headers(&ctx, &[SetCookieHeader::set_cookie("a=2; Domain=example.com")]).unwrap();
        assert_eq!(jar.pending_count(), 2);
        assert_eq!(jar.total_count(), 0);

        *oracle.answer.lock().unwrap() = DomainClass::Normal;
        assert_eq!(jar.tick().accepted, 2);
        assert_eq!(jar.total_count(), 1);
        assert_eq!(cookie_header(&mut jar, "http://www.example.com/"), "a=2");
    }

    #[test]
    fn reports_merge_field_by_field() {
        let mut total = AcceptReport { accepted: 1, rejected: 2, failed: 0, pending: 1 };
        total.merge(AcceptReport { accepted: 3, rejected: 0, failed: 1, pending: 2 });
        assert_eq!(total, AcceptReport { accepted: 4, rejected: 2, failed: 1, pending: 3 });

        let (mut jar, _) = new_jar();
        let report = set(&mut jar, "http://example.com/", "a=1");
        assert_eq!(report, AcceptReport { accepted: 1, ..AcceptReport::default() });
    }

    #[test]
    fn shutdown_drops_pending_cookies() {
        let ui = Arc::new(QueueUi::default());
        let (mut jar, _) = jar_with(ask_policy(), CookieServices::default().with_confirmation(ui.clone()));
        set(&mut jar, "http://example.com/", "a=1");

        jar.shutdown();
        assert!(jar.is_shut_down());
        assert_eq!(jar.pending_count(), 0);

        ui.answer_all(UserDecision::Accept);
        assert_eq!(jar.tick(), TickReport::default());
        assert_eq!(jar.total_count(), 0);
        assert_eq!(set(&mut jar, "http://example.com/", "b=1").rejected, 1);
    }

    #[test]
    fn session_only_marks_cookies_discard_at_exit() {
        let config = CookieConfig::builder().session_only(true).build().unwrap();
        let (mut jar, _) = jar_with(config, CookieServices::default());
        set(&mut jar, "http://example.com/", "a=1; Max-Age=3600");
        assert!(jar.snapshot()[0].discard_at_exit);

        let mut out = Vec::new();
        jar.write_persistent(&mut out).unwrap();
        assert_eq!(out.len(), 12);
    }

    #[test]
    fn end_session_keeps_persistent_cookies() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "session=1");
        set(&mut jar, "http://example.com/", "kept=1; Max-Age=3600");
        jar.accept_headers(
            &ResponseContext::new(&u("http://example.com/")),
            &[SetCookieHeader::set_cookie2("disc=1; Version=1; Max-Age=3600; Discard")],
        )
        .unwrap();

        assert_eq!(jar.end_session(), 2);
        let names: Vec<_> = jar.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[test]
    fn persistent_round_trip() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "https://www.example.com/", "a=1; Max-Age=3600; Secure; HttpOnly");
        set(&mut jar, "https://example.com/shop", "b=2; Max-Age=3600; Path=/shop; Domain=example.com");
        set(&mut jar, "https://example.com/", "session=3");
        jar.set_site_policy("blocked.com", SitePolicy { cookie_mode: SiteCookieMode::Reject, ..SitePolicy::default() })
            .unwrap();

        let mut bytes = Vec::new();
        jar.write_persistent(&mut bytes).unwrap();
        assert!(!jar.is_dirty());

        let (mut restored, _) = new_jar();
        assert_eq!(restored.read_persistent(&bytes).unwrap(), 2);

        let mut before = jar.snapshot();
        before.retain(|s| s.expires.is_some());
        assert_eq!(restored.snapshot(), before);
        assert_eq!(restored.site_policy("blocked.com").cookie_mode, SiteCookieMode::Reject);
    }

    #[test]
    fn file_budget_evicts_least_recently_used() {
        let (mut jar, clock) = new_jar();
        for i in 0..10 {
            clock.advance(1);
            set(&mut jar, "http://example.com/", &format!("c{i}={}; Max-Age=3600", "x".repeat(40)));
        }
        let full = codec::encoded_size(&jar.root, NOW + 10);

        let mut small = CookieConfig::default();
        small.max_file_size = Some(full / 2);
        jar.config = small;

        let mut out = Vec::new();
        let written = jar.write_persistent(&mut out).unwrap();
        assert!(written <= full / 2);
        assert!(jar.total_count() < 10);
        assert!(jar.snapshot().iter().any(|s| s.name == "c9"), "newest cookies survive");
    }

    #[test]
    fn file_budget_counts_emptied_domains() {
        let (mut jar, clock) = new_jar();
        for host in ["a.com", "b.com", "c.com"] {
            clock.advance(1);
            set(&mut jar, &format!("http://{host}/"), "k=1; Max-Age=3600");
        }

        let (mut expected, _) = new_jar();
        for host in ["b.com", "c.com"] {
            set(&mut expected, &format!("http://{host}/"), "k=1; Max-Age=3600");
        }
        let budget = codec::encoded_size(&expected.root, NOW + 3);

        jar.config.max_file_size = Some(budget);
        let mut out = Vec::new();
        assert_eq!(jar.write_persistent(&mut out).unwrap(), budget);
        assert_eq!(jar.total_count(), 2, "one eviction is enough");
        assert!(jar.cookies_for_domain("a.com", None).is_empty());
    }

    #[test]
    fn free_unused_resources_drops_expired_cookies() {
        let (mut jar, clock) = new_jar();
        set(&mut jar, "http://example.com/", "short=1; Max-Age=10");
        set(&mut jar, "http://example.com/", "long=1; Max-Age=1000");

        clock.advance(20);
        assert_eq!(cookie_header(&mut jar, "http://example.com/"), "long=1");
        assert_eq!(jar.free_unused_resources(), 1);
        assert_eq!(jar.total_count(), 1);
    }

    #[test]
    fn removal_operations() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "a=1");
        set(&mut jar, "http://example.com/x", "b=1; Path=/x");
        set(&mut jar, "http://www.example.com/", "c=1");
        set(&mut jar, "http://other.com/", "d=1");

        assert!(jar.remove_cookie("example.com", "/x", "b"));
        assert!(!jar.remove_cookie("example.com", "/x", "b"));
        assert_eq!(jar.remove_cookies_for_url(&u("http://www.example.com/any")), 1);
        assert_eq!(jar.remove_cookies_for_domain("example.com"), 1);
        assert_eq!(jar.total_count(), 1);

        jar.clear();
        assert_eq!(jar.total_count(), 0);
        assert!(jar.snapshot().is_empty());
    }

    #[test]
    fn header_map_convenience() {
        let (mut jar, _) = new_jar();
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", "a=1".parse().unwrap());
        headers.append("set-cookie", "b=2; Path=/".parse().unwrap());
        headers.append("set-cookie2", "c=3; Version=1".parse().unwrap());

        let url = u("http://example.com/");
        let report = jar.store_response_cookies(&url, &headers).unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(
            jar.get_request_cookies(&url).as_deref(),
            Some("$Version=1; a=1; b=2; c=3")
        );
        assert_eq!(jar.get_all_cookies(), vec![("example.com/".to_string(), "a=1; b=2; c=3".to_string())]);
    }

    #[test]
    fn password_taint_is_reported() {
        let (mut jar, _) = new_jar();
        let ctx = ResponseContext::new(&u("https://bank.example/")).password(true);
        jar.accept_headers(&ctx, &[SetCookieHeader::set_cookie("s=1")]).unwrap();

        let header = jar.build_cookie_header(&RequestContext::new(&u("https://bank.example/")));
        assert!(header.have_password);
        assert!(!header.have_authentication);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let (mut jar, _) = new_jar();
        set(&mut jar, "http://example.com/", "a=1");
        let json = jar.to_json().unwrap();
        assert!(json.contains("\"name\": \"a\""));
    }
}
