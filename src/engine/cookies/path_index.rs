//! Per-domain path tree.
//!
//! Each node is one `/`-separated segment and owns the cookies stored for
//! exactly that path. The root node is `/`. Children are kept sorted by
//! segment and found by binary search.

use crate::engine::cookies::cookies::Cookie;
use crate::engine::errors::CookieResult;

/// Splits a path into its non-empty segments (`/a//b/` -> `["a", "b"]`).
pub(crate) fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Joins segments back into the canonical path form.
pub(crate) fn join(segments: &[&str]) -> String {
    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    out
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct PathNode {
    pub segment: String,
    pub cookies: Vec<Cookie>,
    pub children: Vec<PathNode>,
}

impl PathNode {
    pub fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            cookies: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.children.is_empty()
    }

    pub fn child_index(&self, segment: &str) -> Result<usize, usize> {
        self.children
            .binary_search_by(|c| c.segment.as_str().cmp(segment))
    }

    /// Deepest existing node for `segs`, with a flag telling whether it is
    /// the exact path.
    pub fn locate(&self, segs: &[&str]) -> (Vec<usize>, bool) {
        let mut at = Vec::with_capacity(segs.len());
        let mut node = self;
        for seg in segs {
            match node.child_index(seg) {
                Ok(i) => {
                    at.push(i);
                    node = &node.children[i];
                }
                Err(_) => return (at, false),
            }
        }
        (at, true)
    }

    /// Finds or creates the node for `segs`, returning its index path.
    pub fn locate_or_create(&mut self, segs: &[&str]) -> CookieResult<Vec<usize>> {
        let mut at = Vec::new();
        at.try_reserve(segs.len())?;
        let mut node = self;
        for seg in segs {
            let i = match node.child_index(seg) {
                Ok(i) => i,
                Err(i) => {
                    node.children.try_reserve(1)?;
                    node.children.insert(i, PathNode::new(seg));
                    i
                }
            };
            at.push(i);
            node = &mut node.children[i];
        }
        Ok(at)
    }

    pub fn node(&self, at: &[usize]) -> Option<&PathNode> {
        at.iter().try_fold(self, |n, &i| n.children.get(i))
    }

    pub fn node_mut(&mut self, at: &[usize]) -> Option<&mut PathNode> {
        at.iter().try_fold(self, |n, &i| n.children.get_mut(i))
    }

    pub fn cookie(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Every node whose path matches the request path `segs`, most specific
    /// first, as `(index path, matched on a segment boundary)`.
    ///
    /// For each level, the exact child subtree comes first, then siblings
    /// whose segment is a strict prefix of the request segment (longest
    /// first), then the node itself.
    pub fn matches(&self, segs: &[&str], at: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, bool)>) {
        if let Some((seg, rest)) = segs.split_first() {
            if let Ok(i) = self.child_index(seg) {
                at.push(i);
                self.children[i].matches(rest, at, out);
                at.pop();
            }

            let mut partial: Vec<usize> = self
                .children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.segment.len() < seg.len() && seg.starts_with(c.segment.as_str()))
                .map(|(i, _)| i)
                .collect();
            partial.sort_by(|a, b| self.children[*b].segment.len().cmp(&self.children[*a].segment.len()));
            for i in partial {
                let mut p = at.clone();
                p.push(i);
                out.push((p, false));
            }
        }
        out.push((at.clone(), true));
    }

    /// Removes empty nodes along `at`, deepest first. Returns whether this
    /// node is now empty.
    pub fn prune_along(&mut self, at: &[usize]) -> bool {
        if let Some((&first, rest)) = at.split_first() {
            if first < self.children.len() && self.children[first].prune_along(rest) {
                self.children.remove(first);
            }
        }
        self.is_empty()
    }

    /// Removes every empty node below this one.
    pub fn prune_all(&mut self) {
        for child in self.children.iter_mut() {
            child.prune_all();
        }
        self.children.retain(|c| !c.is_empty());
    }

    pub fn count(&self) -> usize {
        self.cookies.len() + self.children.iter().map(PathNode::count).sum::<usize>()
    }

    /// Visits every node depth-first with its full path.
    pub fn walk<'a>(&'a self, prefix: &mut Vec<&'a str>, f: &mut dyn FnMut(&[&str], &'a PathNode)) {
        f(prefix, self);
        for child in &self.children {
            prefix.push(&child.segment);
            child.walk(prefix, f);
            prefix.pop();
        }
    }

    /// Applies `f` to every cookie list in the subtree.
    pub fn for_each_list_mut(&mut self, f: &mut dyn FnMut(&mut Vec<Cookie>)) {
        f(&mut self.cookies);
        for child in self.children.iter_mut() {
            child.for_each_list_mut(f);
        }
    }
}
