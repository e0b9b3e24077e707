//! Bounded Crawler
//!
//! Walks the service graph from a seed with an explicit work stack of
//! `(identity, remaining depth)` frames. Termination does not depend on the
//! graph's shape:
//! - every child frame carries strictly less depth than its parent, and frames
//!   with zero depth issue no query;
//! - every query consumes one unit of the run-wide [`QueryBudget`], which never
//!   goes below zero;
//! - the [`VisitedSet`] lets each identity be queried at most once per run.
//!
//! A failed or timed-out query ends that frame only; it is counted in
//! [`CrawlStats`] and logged, never propagated.

use crate::config::{DiscoveryConfig, SearchPrefixes};
use crate::directory::{DirectoryClient, DirectoryTransport, QueryKind};
use crate::identity::NodeIdentity;
use crate::mapped::MappedNodes;
use crate::types::{ChildRef, TransportProtocol};
use crate::visited::VisitedSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run-wide count of directory queries still allowed
#[derive(Debug)]
pub struct QueryBudget {
    limit: usize,
    remaining: AtomicUsize,
}

impl QueryBudget {
    /// Budget of `limit` queries
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            remaining: AtomicUsize::new(limit),
        }
    }

    /// Take one query from the budget; `false` once it is exhausted
    pub fn try_acquire(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
            .is_ok()
    }

    /// Queries left
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Queries taken so far
    #[must_use]
    pub fn used(&self) -> usize {
        self.limit - self.remaining()
    }

    /// True when no query is left
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Per-run query diagnostics
#[derive(Debug, Default)]
pub struct CrawlStats {
    queried: AtomicUsize,
    answered: AtomicUsize,
    timed_out: AtomicUsize,
    failed: AtomicUsize,
    skipped_visited: AtomicUsize,
}

/// Point-in-time copy of [`CrawlStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStatsSnapshot {
    /// Queries issued
    pub queried: usize,
    /// Queries answered with an item list
    pub answered: usize,
    /// Queries that hit the reply timeout
    pub timed_out: usize,
    /// Queries that failed otherwise (transport, remote error)
    pub failed: usize,
    /// Frames dropped because the identity was already visited
    pub skipped_visited: usize,
}

impl CrawlStats {
    /// Snapshot the counters
    #[must_use]
    pub fn snapshot(&self) -> CrawlStatsSnapshot {
        CrawlStatsSnapshot {
            queried: self.queried.load(Ordering::Relaxed),
            answered: self.answered.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_visited: self.skipped_visited.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every branch of one discovery run
///
/// Created fresh per run and discarded once its [`MappedNodes`] were merged.
#[derive(Debug)]
pub struct RunContext {
    /// Identities already claimed
    pub visited: VisitedSet,
    /// Results found so far
    pub nodes: MappedNodes,
    /// Shared query budget
    pub budget: QueryBudget,
    /// Query diagnostics
    pub stats: CrawlStats,
    answered: VisitedSet,
    protocol: TransportProtocol,
    max_entries: usize,
    local_identity: Option<NodeIdentity>,
    global_stop: Option<SearchPrefixes>,
    stopped: AtomicBool,
}

impl RunContext {
    /// Fresh run state from `config`
    ///
    /// `local_identity` is never queried.
    #[must_use]
    pub fn new(config: &DiscoveryConfig, local_identity: Option<NodeIdentity>) -> Self {
        let global_stop = config
            .stops_globally()
            .then(|| config.prefixes())
            .filter(|p| !p.is_empty());

        Self {
            visited: VisitedSet::new(),
            nodes: MappedNodes::new(),
            budget: QueryBudget::new(config.max_search_nodes),
            stats: CrawlStats::default(),
            answered: VisitedSet::new(),
            protocol: config.target_protocol(),
            max_entries: config.max_entries,
            local_identity,
            global_stop,
            stopped: AtomicBool::new(false),
        }
    }

    /// Target protocol
    #[must_use]
    pub fn protocol(&self) -> TransportProtocol {
        self.protocol
    }

    /// Halt every branch before its next query
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// True once a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// True once the relay entry target was reached
    #[must_use]
    pub fn entry_target_reached(&self) -> bool {
        self.nodes.relay_count() >= self.max_entries
    }

    /// True if `identity` answered a services query earlier in this run
    #[must_use]
    pub fn was_answered(&self, identity: &NodeIdentity) -> bool {
        self.answered.contains(identity)
    }

    fn is_local(&self, identity: &NodeIdentity) -> bool {
        self.local_identity.as_ref() == Some(identity)
    }

    /// Record what `child` offers; returns `true` if a new relay was added
    fn record(&self, child: &ChildRef) -> bool {
        if let Some(tracker) = child.to_tracker_entry() {
            self.nodes.add_tracker(tracker);
        }

        let Some(relay) = child.to_relay_entry(self.protocol) else {
            return false;
        };
        if !self.nodes.add_relay(relay) {
            return false;
        }

        if let Some(prefix) = self
            .global_stop
            .as_ref()
            .and_then(|p| p.matching(child.identity.as_str()))
        {
            tracing::info!(
                "Relay {} matches prefix {:?}, stopping discovery run",
                child.identity,
                prefix
            );
            self.request_stop();
        }
        true
    }
}

/// What happened to a branch's seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootStatus {
    /// The seed answered its query
    Answered,
    /// The seed's query timed out or failed
    Failed,
    /// Another branch already claimed the seed
    AlreadyVisited,
    /// No query issued (zero depth, budget, entry target, stop, own identity)
    #[default]
    Skipped,
}

/// Result of one branch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchOutcome {
    /// Fate of the seed itself
    pub root: RootStatus,
    /// Queries this branch issued
    pub queries: usize,
    /// New relay entries this branch recorded
    pub relays_found: usize,
}

impl BranchOutcome {
    /// True if the seed answered
    #[must_use]
    pub fn root_answered(&self) -> bool {
        self.root == RootStatus::Answered
    }
}

struct Frame {
    identity: NodeIdentity,
    depth: u32,
    root: bool,
}

/// Depth- and budget-bounded walker over the service graph
pub struct Crawler<T> {
    client: Arc<DirectoryClient<T>>,
    ctx: Arc<RunContext>,
}

impl<T> Clone for Crawler<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<T: DirectoryTransport> Crawler<T> {
    /// Crawler for one run
    #[must_use]
    pub fn new(client: Arc<DirectoryClient<T>>, ctx: Arc<RunContext>) -> Self {
        Self { client, ctx }
    }

    /// Shared run state
    #[must_use]
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Crawl from `seed` with `depth` hops of budget
    ///
    /// `depth` counts queried levels: depth 1 queries the seed only, and its
    /// children are recorded but not queried.
    pub async fn crawl(&self, seed: &NodeIdentity, depth: u32) -> BranchOutcome {
        let mut outcome = BranchOutcome::default();
        let mut stack = vec![Frame {
            identity: seed.clone(),
            depth,
            root: true,
        }];

        while let Some(frame) = stack.pop() {
            if frame.depth == 0 || self.ctx.is_local(&frame.identity) {
                continue;
            }
            if self.ctx.is_stopped() || self.ctx.entry_target_reached() {
                tracing::debug!("Branch from {} halted before {}", seed, frame.identity);
                break;
            }
            if self.ctx.budget.is_exhausted() {
                tracing::debug!("Query budget exhausted before {}", frame.identity);
                break;
            }
            if !self.ctx.visited.try_mark(&frame.identity) {
                self.ctx.stats.skipped_visited.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Skipping visited node {}", frame.identity);
                if frame.root {
                    outcome.root = RootStatus::AlreadyVisited;
                }
                continue;
            }
            if !self.ctx.budget.try_acquire() {
                tracing::debug!("Query budget exhausted before {}", frame.identity);
                break;
            }

            outcome.queries += 1;
            let Some(children) = self.query(&frame.identity, QueryKind::Services).await else {
                if frame.root {
                    outcome.root = RootStatus::Failed;
                }
                continue;
            };
            if frame.root {
                outcome.root = RootStatus::Answered;
            }

            for child in &children {
                if self.ctx.record(child) {
                    outcome.relays_found += 1;
                }
            }

            let child_depth = frame.depth - 1;
            if child_depth > 0 {
                stack.extend(children.into_iter().rev().map(|child| Frame {
                    identity: child.identity,
                    depth: child_depth,
                    root: false,
                }));
            }
        }

        outcome
    }

    /// List the items a domain hosts, consuming one unit of query budget
    ///
    /// Does not mark the domain visited: listing items and crawling services
    /// are different queries.
    pub async fn list_items(&self, domain: &NodeIdentity) -> Option<Vec<NodeIdentity>> {
        if self.ctx.is_stopped() || self.ctx.entry_target_reached() {
            tracing::debug!("Run halted before listing items of {}", domain);
            return None;
        }
        if !self.ctx.budget.try_acquire() {
            tracing::debug!("No query budget left to list items of {}", domain);
            return None;
        }
        let items = self.query(domain, QueryKind::Items).await?;
        Some(items.into_iter().map(|child| child.identity).collect())
    }

    async fn query(&self, identity: &NodeIdentity, kind: QueryKind) -> Option<Vec<ChildRef>> {
        self.ctx.stats.queried.fetch_add(1, Ordering::Relaxed);

        match self.client.query(identity, kind).await {
            Ok(children) => {
                self.ctx.stats.answered.fetch_add(1, Ordering::Relaxed);
                if kind == QueryKind::Services {
                    self.ctx.answered.try_mark(identity);
                }
                tracing::debug!("{} listed {} children ({:?})", identity, children.len(), kind);
                Some(children)
            }
            Err(e) if e.is_timeout() => {
                self.ctx.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Query to {} timed out", identity);
                None
            }
            Err(e) => {
                self.ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Query to {} failed: {}", identity, e);
                None
            }
        }
    }
}

impl<T: DirectoryTransport + 'static> Crawler<T> {
    /// Crawl several seeds, at most `concurrency` branches at a time
    ///
    /// A branch that panics is logged and dropped; the others complete.
    pub async fn crawl_all(
        &self,
        seeds: Vec<NodeIdentity>,
        depth: u32,
        concurrency: usize,
    ) -> Vec<BranchOutcome> {
        if concurrency <= 1 || seeds.len() <= 1 {
            let mut outcomes = Vec::with_capacity(seeds.len());
            for seed in &seeds {
                if self.ctx.is_stopped() {
                    break;
                }
                outcomes.push(self.crawl(seed, depth).await);
            }
            return outcomes;
        }

        let permits = Arc::new(Semaphore::new(concurrency));
        let mut branches = JoinSet::new();
        for seed in seeds {
            let crawler = self.clone();
            let permits = permits.clone();
            branches.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                if crawler.ctx.is_stopped() {
                    return None;
                }
                Some(crawler.crawl(&seed, depth).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = branches.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => tracing::warn!("Crawl branch aborted: {}", e),
            }
        }
        outcomes
    }
}
