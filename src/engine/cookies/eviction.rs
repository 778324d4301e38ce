//! Least-recently-used selection for eviction.
//!
//! A cookie that was never sent since it was loaded or inserted
//! (`last_used == 0`) goes before any cookie that was, even an old one.
//! Ties go to the cookie the server wrote longest ago. Protected cookies are
//! never selected.

use crate::engine::cookies::cookies::Cookie;
use crate::engine::cookies::domain_index::DomainNode;
use crate::engine::cookies::path_index::PathNode;

/// Address of a stored cookie. Names are unique per (domain, path) node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CookieRef {
    pub domain: Vec<usize>,
    pub path: Vec<usize>,
    pub name: String,
}

impl CookieRef {
    fn is(&self, domain: &[usize], path: &[usize], name: &str) -> bool {
        self.domain == domain && self.path == path && self.name == name
    }
}

/// Which cookies may be selected.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidates<'a> {
    /// Only cookies with `last_used` strictly below this are eligible.
    pub floor: i64,
    /// Never select this one (the cookie being committed).
    pub skip: Option<&'a CookieRef>,
    /// Only cookies that would be written to the cookie file, as of this time.
    pub persistent_at: Option<i64>,
    /// Descend into subdomains.
    pub deep: bool,
}

impl Default for Candidates<'_> {
    fn default() -> Self {
        Self { floor: i64::MAX, skip: None, persistent_at: None, deep: true }
    }
}

fn eviction_key(c: &Cookie) -> (bool, i64, i64) {
    (c.last_used != 0, c.last_used, c.last_sync)
}

/// Finds the best eviction candidate under the domain node at `base`.
pub(crate) fn find_least_recently_used(root: &DomainNode, base: &[usize], filter: Candidates<'_>) -> Option<CookieRef> {
    let node = root.node(base)?;
    let mut best: Option<(CookieRef, (bool, i64, i64))> = None;
    let mut at = base.to_vec();
    scan_domain(node, &mut at, &filter, &mut best);
    best.map(|(r, _)| r)
}

fn scan_domain(
    node: &DomainNode,
    at: &mut Vec<usize>,
    filter: &Candidates<'_>,
    best: &mut Option<(CookieRef, (bool, i64, i64))>,
) {
    let mut path = Vec::new();
    scan_path(&node.paths, at, &mut path, filter, best);
    if filter.deep {
        for (i, child) in node.children.iter().enumerate() {
            at.push(i);
            scan_domain(child, at, filter, best);
            at.pop();
        }
    }
}

fn scan_path(
    node: &PathNode,
    domain: &[usize],
    path: &mut Vec<usize>,
    filter: &Candidates<'_>,
    best: &mut Option<(CookieRef, (bool, i64, i64))>,
) {
    for c in &node.cookies {
        if c.is_protected() || c.last_used >= filter.floor {
            continue;
        }
        if filter.persistent_at.is_some_and(|now| !c.is_persistent(now)) {
            continue;
        }
        if filter.skip.is_some_and(|s| s.is(domain, path.as_slice(), &c.name)) {
            continue;
        }
        let key = eviction_key(c);
        if best.as_ref().map_or(true, |(_, k)| key < *k) {
            *best = Some((
                CookieRef { domain: domain.to_vec(), path: path.clone(), name: c.name.clone() },
                key,
            ));
        }
    }
    for (i, child) in node.children.iter().enumerate() {
        path.push(i);
        scan_path(child, domain, path, filter, best);
        path.pop();
    }
}

/// Removes the referenced cookie without pruning, so other refs stay valid.
pub(crate) fn take(root: &mut DomainNode, r: &CookieRef) -> Option<Cookie> {
    let list = &mut root.node_mut(&r.domain)?.paths.node_mut(&r.path)?.cookies;
    let pos = list.iter().position(|c| c.name == r.name)?;
    Some(list.remove(pos))
}
