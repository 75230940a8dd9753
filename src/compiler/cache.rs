use crate::compiler::CompiledArtifact;
use crate::compiler::key::{AsCacheKey, CacheKey, CacheKeyRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CACHE_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a trie node, stable for the node's lifetime.
#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct CacheNodeId(u64);

/// A trie of specialization keys. The path from the root spells out the
/// schedule of one graph shape; the node at the end of the path owns the
/// artifact compiled for it. Children are ordered by kind, then key length,
/// then key bytes.
pub struct CacheNode {
    id: CacheNodeId,
    next: BTreeMap<CacheKey, CacheNode>,
    compiled_fn: Option<Box<dyn CompiledArtifact>>,
}

impl Default for CacheNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for CacheNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheNode")
            .field("id", &self.id)
            .field("num_children", &self.num_children())
            .field("has_compiled_fn", &self.compiled_fn.is_some())
            .finish()
    }
}

impl CacheNode {
    pub fn new() -> Self {
        Self {
            id: CacheNodeId(NEXT_CACHE_NODE_ID.fetch_add(1, Ordering::Relaxed)),
            next: BTreeMap::new(),
            compiled_fn: None,
        }
    }

    pub fn id(&self) -> CacheNodeId {
        self.id
    }

    /// Child for `key`, created on a miss. The key bytes are copied only then.
    pub fn lookup(&mut self, key: CacheKeyRef<'_>) -> &mut CacheNode {
        if !self.next.contains_key(&key as &dyn AsCacheKey) {
            self.next.insert(key.to_owned_key(), CacheNode::new());
        }
        self.next
            .get_mut(&key as &dyn AsCacheKey)
            .expect("child was inserted above")
    }

    /// Child for `key` without creating it.
    pub fn get(&self, key: CacheKeyRef<'_>) -> Option<&CacheNode> {
        self.next.get(&key as &dyn AsCacheKey)
    }

    pub fn children(&self) -> impl Iterator<Item = (&CacheKey, &CacheNode)> {
        self.next.iter()
    }

    pub fn num_children(&self) -> usize {
        self.next.len()
    }

    /// Trie nodes below and including this one.
    pub fn count_nodes(&self) -> usize {
        1 + self.next.values().map(|x| x.count_nodes()).sum::<usize>()
    }

    /// Artifacts installed below and including this one.
    pub fn count_artifacts(&self) -> usize {
        usize::from(self.compiled_fn.is_some())
            + self.next.values().map(|x| x.count_artifacts()).sum::<usize>()
    }

    pub fn compiled_fn(&self) -> Option<&dyn CompiledArtifact> {
        self.compiled_fn.as_deref()
    }

    /// An installed artifact is never replaced.
    pub(crate) fn set_compiled_fn(&mut self, compiled_fn: Box<dyn CompiledArtifact>) {
        if self.compiled_fn.is_some() {
            log::warn!("{:?} already holds an artifact, keeping it", self.id);
            return;
        }
        self.compiled_fn = Some(compiled_fn);
    }

    pub fn clear(&mut self) {
        self.next.clear();
        self.compiled_fn = None;
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty() && self.compiled_fn.is_none()
    }
}
