//! Visited set shared by all branches of one run.

use crate::identity::NodeIdentity;
use dashmap::DashSet;

/// Identities already claimed for a query in the current run
///
/// There is no removal: a run creates a fresh set and drops it at the end.
#[derive(Debug, Default)]
pub struct VisitedSet {
    inner: DashSet<NodeIdentity>,
}

impl VisitedSet {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `identity`
    ///
    /// Returns `false` if another branch already claimed it.
    pub fn try_mark(&self, identity: &NodeIdentity) -> bool {
        self.inner.insert(identity.clone())
    }

    /// True if `identity` has been claimed
    #[must_use]
    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.inner.contains(identity)
    }

    /// Number of claimed identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if nothing was claimed yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_try_mark_once() {
        let visited = VisitedSet::new();
        let id = NodeIdentity::parse("tracker.example").unwrap();

        assert!(visited.is_empty());
        assert!(visited.try_mark(&id));
        assert!(!visited.try_mark(&id));
        assert!(visited.contains(&id));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn test_normalized_identities_collide() {
        let visited = VisitedSet::new();
        assert!(visited.try_mark(&NodeIdentity::parse("Relay.Example").unwrap()));
        assert!(!visited.try_mark(&NodeIdentity::parse("relay.example").unwrap()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_single_winner() {
        let visited = Arc::new(VisitedSet::new());
        let winners = Arc::new(AtomicUsize::new(0));
        let id = NodeIdentity::parse("contested.example").unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..32 {
            let visited = visited.clone();
            let winners = winners.clone();
            let id = id.clone();
            tasks.spawn(async move {
                if visited.try_mark(&id) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
