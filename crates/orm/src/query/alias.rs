//! Table alias generation for self-referencing subqueries

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Hands out `<prefix>_<n>` aliases.
///
/// One generator is created per root query and cloned into every subquery
/// compiled for it, so aliases are unique within a statement and numbering
/// restarts for each unrelated query.
#[derive(Debug, Clone)]
pub struct AliasGenerator {
    prefix: Arc<str>,
    next: Arc<AtomicUsize>,
}

impl AliasGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: Arc::from(prefix),
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocate the next alias
    pub fn next_alias(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let alias = format!("{}_{}", self.prefix, n);
        trace!(alias = %alias, "allocated self-join alias");
        alias
    }

    /// Number of aliases handed out so far
    pub fn issued(&self) -> usize {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for AliasGenerator {
    fn default() -> Self {
        Self::new("self_join")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_counter() {
        let root = AliasGenerator::new("self_join");
        let nested = root.clone();
        assert_eq!(root.next_alias(), "self_join_0");
        assert_eq!(nested.next_alias(), "self_join_1");
        assert_eq!(root.issued(), 2);
    }

    #[test]
    fn test_independent_generators_restart_numbering() {
        let a = AliasGenerator::new("sj");
        let b = AliasGenerator::new("sj");
        assert_eq!(a.next_alias(), "sj_0");
        assert_eq!(b.next_alias(), "sj_0");
    }
}
