//! Domain tree keyed by reversed host labels.
//!
//! `www.example.com` lives at root → `com` → `example` → `www`. IP literals
//! and single-label hosts (`localhost`) are a single opaque label. Labels are
//! stored lowercased and siblings are sorted, so lookups are a binary search
//! per level. Every node owns the path tree of cookies set for exactly that
//! domain.

use crate::engine::cookies::path_index::{self, PathNode};
use crate::engine::cookies::policy::{DomainClass, SitePolicy};
use crate::engine::errors::{CookieError, CookieResult};
use std::net::Ipv4Addr;

/// True for `1.2.3.4` and bracketed or bare IPv6 literals.
pub(crate) fn is_ip_literal(host: &str) -> bool {
    host.parse::<Ipv4Addr>().is_ok() || host.starts_with('[') || host.contains(':')
}

/// Lowercased labels of `host`, top-level label first.
pub(crate) fn labels(host: &str) -> Vec<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return Vec::new();
    }
    if is_ip_literal(&host) || !host.contains('.') {
        return vec![host];
    }
    host.rsplit('.')
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rebuilds a host name from top-level-first labels.
pub(crate) fn host_name<S: AsRef<str>>(labels: &[S]) -> String {
    labels
        .iter()
        .rev()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(".")
}

/// Result of [`DomainNode::find`] / [`DomainNode::find_or_create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Location {
    /// Index path of the domain node from the root.
    pub domain: Vec<usize>,
    /// Index path of the path node inside that domain node.
    pub path: Vec<usize>,
    /// The domain node is the requested host itself.
    pub exact_server: bool,
    /// The path node is the requested path itself.
    pub full_path: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DomainNode {
    pub label: String,
    pub paths: PathNode,
    pub children: Vec<DomainNode>,
    pub policy: SitePolicy,
    /// Cached oracle answer; dropped by the free sweep.
    pub class: Option<DomainClass>,
}

impl DomainNode {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Self::default()
        }
    }

    /// No cookies, no children and no sticky policy.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.children.is_empty() && self.policy.is_default()
    }

    pub fn child_index(&self, label: &str) -> Result<usize, usize> {
        self.children.binary_search_by(|c| c.label.as_str().cmp(label))
    }

    /// Deepest existing domain node for `labels` and whether it is exact.
    pub fn locate(&self, labels: &[String]) -> (Vec<usize>, bool) {
        let mut at = Vec::with_capacity(labels.len());
        let mut node = self;
        for label in labels {
            match node.child_index(label) {
                Ok(i) => {
                    at.push(i);
                    node = &node.children[i];
                }
                Err(_) => return (at, false),
            }
        }
        (at, true)
    }

    pub fn locate_or_create(&mut self, labels: &[String]) -> CookieResult<Vec<usize>> {
        let mut at = Vec::new();
        at.try_reserve(labels.len())?;
        let mut node = self;
        for label in labels {
            let i = match node.child_index(label) {
                Ok(i) => i,
                Err(i) => {
                    node.children.try_reserve(1)?;
                    node.children.insert(i, DomainNode::new(label));
                    i
                }
            };
            at.push(i);
            node = &mut node.children[i];
        }
        Ok(at)
    }

    /// Soft lookup: the deepest existing (domain, path) for the pair.
    pub fn find(&self, host: &str, path: &str) -> Location {
        let (domain, exact_server) = self.locate(&labels(host));
        let (path, full_path) = match self.node(&domain) {
            Some(node) => node.paths.locate(&path_index::segments(path)),
            None => (Vec::new(), false),
        };
        Location { domain, path, exact_server, full_path }
    }

    /// Finds or creates the exact (domain, path) node pair.
    pub fn find_or_create(&mut self, host: &str, path: &str) -> CookieResult<Location> {
        let domain = self.locate_or_create(&labels(host))?;
        let node = self
            .node_mut(&domain)
            .ok_or(CookieError::ResourceExhausted)?;
        let path = node.paths.locate_or_create(&path_index::segments(path))?;
        Ok(Location { domain, path, exact_server: true, full_path: true })
    }

    pub fn node(&self, at: &[usize]) -> Option<&DomainNode> {
        at.iter().try_fold(self, |n, &i| n.children.get(i))
    }

    pub fn node_mut(&mut self, at: &[usize]) -> Option<&mut DomainNode> {
        at.iter().try_fold(self, |n, &i| n.children.get_mut(i))
    }

    /// Nodes from the top-level label down to `at`, root excluded.
    pub fn chain(&self, at: &[usize]) -> Vec<&DomainNode> {
        let mut out = Vec::with_capacity(at.len());
        let mut node = self;
        for &i in at {
            match node.children.get(i) {
                Some(child) => {
                    out.push(child);
                    node = child;
                }
                None => break,
            }
        }
        out
    }

    /// Removes empty domain nodes along `at`, deepest first.
    pub fn prune_along(&mut self, at: &[usize]) -> bool {
        if let Some((&first, rest)) = at.split_first() {
            if first < self.children.len() && self.children[first].prune_along(rest) {
                self.children.remove(first);
            }
        }
        self.is_empty()
    }

    /// Prunes empty path and domain nodes in the whole subtree. Nodes that
    /// only carry a cached oracle answer go as well.
    pub fn prune_all(&mut self) {
        self.paths.prune_all();
        for child in self.children.iter_mut() {
            child.prune_all();
        }
        self.children.retain(|c| !c.is_empty());
    }

    pub fn count(&self) -> usize {
        self.paths.count() + self.children.iter().map(DomainNode::count).sum::<usize>()
    }

    /// Number of cookies stored for exactly this domain.
    pub fn own_count(&self) -> usize {
        self.paths.count()
    }

    /// Visits every domain node depth-first with its top-level-first labels.
    pub fn walk<'a>(&'a self, labels: &mut Vec<&'a str>, f: &mut dyn FnMut(&[&str], &'a DomainNode)) {
        f(labels, self);
        for child in &self.children {
            labels.push(&child.label);
            child.walk(labels, f);
            labels.pop();
        }
    }

    pub fn for_each_node_mut(&mut self, f: &mut dyn FnMut(&mut DomainNode)) {
        f(self);
        for child in self.children.iter_mut() {
            child.for_each_node_mut(f);
        }
    }
}
