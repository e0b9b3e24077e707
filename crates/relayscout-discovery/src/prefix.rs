//! Prefix policy over the local domain's items.
//!
//! The local domain is asked for the entities it hosts. Items whose identity
//! starts with a configured prefix are crawled first, in prefix-list order;
//! the rest are crawled afterwards unless stop-on-first already ended the
//! pass. With no prefixes configured every item is an ordinary candidate.

use crate::config::{DiscoveryConfig, SearchPrefixes};
use crate::crawler::{Crawler, RootStatus};
use crate::directory::DirectoryTransport;
use crate::identity::NodeIdentity;

/// Prefix pass settings for one run
#[derive(Debug, Clone)]
pub struct PrefixPolicy {
    prefixes: SearchPrefixes,
    stop_on_first: bool,
}

/// Outcome of a prefix pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixPassReport {
    /// Items the local domain listed (`None` if the listing failed)
    pub listed: Option<usize>,
    /// Prefix-matching items that were crawled, in order
    pub prioritized: Vec<NodeIdentity>,
    /// Non-matching items that were crawled, in order
    pub ordinary: Vec<NodeIdentity>,
    /// Stop-on-first ended the pass; the run must not crawl further seeds
    pub stopped: bool,
}

impl PrefixPolicy {
    /// Policy with explicit settings
    #[must_use]
    pub fn new(prefixes: SearchPrefixes, stop_on_first: bool) -> Self {
        Self {
            prefixes,
            stop_on_first,
        }
    }

    /// Policy from run configuration
    #[must_use]
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.prefixes(), config.stop_on_first)
    }

    /// Split items into prefix matches (prefix-list order, then item order)
    /// and the remaining items (item order)
    ///
    /// An item matching several prefixes appears once, under the first.
    #[must_use]
    pub fn partition(&self, items: &[NodeIdentity]) -> (Vec<NodeIdentity>, Vec<NodeIdentity>) {
        let mut prioritized: Vec<NodeIdentity> = Vec::new();
        for prefix in self.prefixes.iter() {
            for item in items {
                if item.starts_with(prefix) && !prioritized.contains(item) {
                    prioritized.push(item.clone());
                }
            }
        }

        let mut ordinary: Vec<NodeIdentity> = Vec::new();
        for item in items {
            if !prioritized.contains(item) && !ordinary.contains(item) {
                ordinary.push(item.clone());
            }
        }

        (prioritized, ordinary)
    }

    /// Run the pass against `domain`, giving each crawled item `depth`
    pub async fn run<T: DirectoryTransport>(
        &self,
        crawler: &Crawler<T>,
        domain: &NodeIdentity,
        depth: u32,
    ) -> PrefixPassReport {
        let mut report = PrefixPassReport::default();

        let Some(items) = crawler.list_items(domain).await else {
            tracing::debug!("Local domain {} listed no items", domain);
            return report;
        };
        report.listed = Some(items.len());

        let (prioritized, ordinary) = self.partition(&items);
        tracing::debug!(
            "Local domain {} listed {} items, {} match search prefixes",
            domain,
            items.len(),
            prioritized.len()
        );

        for item in prioritized {
            if crawler.context().is_stopped() {
                report.stopped = true;
                return report;
            }
            let outcome = crawler.crawl(&item, depth).await;
            // an earlier seed may already have crawled the item successfully
            let succeeded = outcome.root_answered()
                || (outcome.root == RootStatus::AlreadyVisited
                    && crawler.context().was_answered(&item));
            if self.stop_on_first && succeeded {
                tracing::info!("Prefixed node {} answered, skipping remaining discovery", item);
                report.prioritized.push(item);
                report.stopped = true;
                return report;
            }
            report.prioritized.push(item);
        }

        for item in ordinary {
            if crawler.context().is_stopped() {
                report.stopped = true;
                return report;
            }
            // already handled by the prefix pass or an earlier seed
            if crawler.context().visited.contains(&item) {
                continue;
            }
            crawler.crawl(&item, depth).await;
            report.ordinary.push(item);
        }

        report
    }
}
