//! Discovery Orchestrator
//!
//! Drives one discovery run per trigger and merges its results into the
//! connection's [`RelayTable`].
//!
//! Seeding order:
//! 1. every configured tracker (always, regardless of auto-discovery);
//! 2. with auto-discovery: the prefix pass over the local domain, then, unless
//!    it stopped the run, the local server and the online roster contacts.
//!
//! All seeds share one visited set, one result accumulator and one query
//! budget. Only one run executes at a time per connection; a second trigger
//! waits for the first to finish.

use crate::config::DiscoveryConfig;
use crate::crawler::{CrawlStatsSnapshot, Crawler, RunContext};
use crate::directory::{DirectoryClient, DirectoryTransport};
use crate::identity::NodeIdentity;
use crate::mapped::RelayTable;
use crate::prefix::PrefixPolicy;
use crate::types::{RelayEntry, TrackerEntry};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Discovery scheduling errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// Registration ended before the run could start
    #[error("Connection is not registered")]
    NotRegistered,

    /// A newer registration replaced the one that scheduled this run
    #[error("Discovery trigger superseded by a newer registration")]
    Superseded,
}

/// Per-connection run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run in progress
    Idle,
    /// A run holds the run lock
    Running,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
        }
    }
}

/// Online roster contacts, supplied by the presence layer
pub trait RosterSource: Send + Sync {
    /// Full identities of every available presence resource
    fn online_resources(&self) -> Vec<NodeIdentity>;
}

impl RosterSource for Vec<NodeIdentity> {
    fn online_resources(&self) -> Vec<NodeIdentity> {
        self.clone()
    }
}

/// Empty roster
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoster;

impl RosterSource for NoRoster {
    fn online_resources(&self) -> Vec<NodeIdentity> {
        Vec::new()
    }
}

/// Everything discovery keeps per connection
///
/// Holds the run lock and the long-lived relay table; passed explicitly to
/// the orchestrator rather than looked up from a global registry.
#[derive(Debug)]
pub struct ConnectionContext {
    local_identity: NodeIdentity,
    local_domain: NodeIdentity,
    server: NodeIdentity,
    relay_table: RelayTable,
    run_lock: Mutex<()>,
    running: AtomicBool,
    registered: AtomicBool,
    generation: AtomicU64,
    runs_completed: AtomicU64,
}

impl ConnectionContext {
    /// Context for the account `local_identity` connected through `server`
    #[must_use]
    pub fn new(local_identity: NodeIdentity, server: NodeIdentity) -> Self {
        let local_domain = local_identity.domain_identity();
        Self {
            local_identity,
            local_domain,
            server,
            relay_table: RelayTable::new(),
            run_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
        }
    }

    /// Own account identity (never queried)
    #[must_use]
    pub fn local_identity(&self) -> &NodeIdentity {
        &self.local_identity
    }

    /// Domain of the account, listed by the prefix pass
    #[must_use]
    pub fn local_domain(&self) -> &NodeIdentity {
        &self.local_domain
    }

    /// Server the connection is attached to
    #[must_use]
    pub fn server(&self) -> &NodeIdentity {
        &self.server
    }

    /// Long-lived relay table
    #[must_use]
    pub fn relay_table(&self) -> &RelayTable {
        &self.relay_table
    }

    /// Current run state
    #[must_use]
    pub fn state(&self) -> RunState {
        if self.running.load(Ordering::Acquire) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// True between a registration and its teardown
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    /// Completed runs on this connection
    #[must_use]
    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    fn register(&self) -> u64 {
        self.registered.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn unregister(&self) {
        self.registered.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn check_current(&self, generation: u64) -> Result<(), DiscoveryError> {
        if !self.is_registered() {
            return Err(DiscoveryError::NotRegistered);
        }
        if self.generation.load(Ordering::Acquire) != generation {
            return Err(DiscoveryError::Superseded);
        }
        Ok(())
    }
}

/// Marks the context `Running` and resets it to `Idle` on every exit path
struct RunningGuard<'a> {
    context: &'a ConnectionContext,
}

impl<'a> RunningGuard<'a> {
    fn enter(context: &'a ConnectionContext) -> Self {
        context.running.store(true, Ordering::Release);
        Self { context }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.context.running.store(false, Ordering::Release);
    }
}

/// Summary of one discovery run
#[derive(Debug, Clone)]
pub struct DiscoveryReport {
    /// Relay entries found, sorted by identity
    pub relays: Vec<RelayEntry>,
    /// Tracker entries learned, sorted by identity
    pub trackers: Vec<TrackerEntry>,
    /// Query diagnostics
    pub stats: CrawlStatsSnapshot,
    /// Directory queries charged to the budget (item listings included)
    pub queries_used: usize,
    /// Identities the relay table did not know before this run
    pub newly_added: usize,
    /// Stop-on-first ended the run before every seed was crawled
    pub stopped_early: bool,
    /// Wall time of the run
    pub elapsed: Duration,
}

/// Runs discovery for one connection
pub struct DiscoveryOrchestrator<T, R> {
    client: Arc<DirectoryClient<T>>,
    roster: R,
    context: Arc<ConnectionContext>,
    config: RwLock<DiscoveryConfig>,
    trackers: RwLock<Vec<TrackerEntry>>,
}

impl<T: DirectoryTransport + 'static, R: RosterSource> DiscoveryOrchestrator<T, R> {
    /// Create an orchestrator with no pre-configured trackers
    #[must_use]
    pub fn new(
        client: Arc<DirectoryClient<T>>,
        roster: R,
        context: Arc<ConnectionContext>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            client,
            roster,
            context,
            config: RwLock::new(config),
            trackers: RwLock::new(Vec::new()),
        }
    }

    /// Set the pre-configured trackers
    #[must_use]
    pub fn with_trackers(mut self, trackers: Vec<TrackerEntry>) -> Self {
        self.trackers = RwLock::new(trackers);
        self
    }

    /// Connection context
    #[must_use]
    pub fn context(&self) -> &Arc<ConnectionContext> {
        &self.context
    }

    /// Replace the configuration; takes effect at the next run
    pub async fn update_config(&self, config: DiscoveryConfig) {
        *self.config.write().await = config;
    }

    /// Replace the pre-configured trackers; takes effect at the next run
    pub async fn set_trackers(&self, trackers: Vec<TrackerEntry>) {
        *self.trackers.write().await = trackers;
    }

    /// Run discovery now, waiting for any run in progress to finish first
    pub async fn run(&self) -> DiscoveryReport {
        let _lock = self.context.run_lock.lock().await;
        self.run_locked().await
    }

    /// Handle "registration became active": schedule a run
    ///
    /// The run is skipped if the registration ends, or is replaced by a newer
    /// one, before it acquires the run lock.
    pub fn on_registered(
        self: &Arc<Self>,
    ) -> JoinHandle<Result<DiscoveryReport, DiscoveryError>>
    where
        R: 'static,
    {
        let generation = self.context.register();
        tracing::debug!("Registration {} active, scheduling discovery", generation);

        let this = self.clone();
        tokio::spawn(async move { this.run_for(generation).await })
    }

    /// Handle "registration ended": suppress any run not yet started
    ///
    /// A run already in progress completes normally.
    pub fn on_unregistered(&self) {
        self.context.unregister();
        tracing::debug!("Registration ended, pending discovery suppressed");
    }

    async fn run_for(&self, generation: u64) -> Result<DiscoveryReport, DiscoveryError> {
        let _lock = self.context.run_lock.lock().await;
        if let Err(e) = self.context.check_current(generation) {
            tracing::debug!("Skipping discovery for registration {}: {}", generation, e);
            return Err(e);
        }
        Ok(self.run_locked().await)
    }

    async fn run_locked(&self) -> DiscoveryReport {
        let _running = RunningGuard::enter(&self.context);
        let start = Instant::now();

        let config = self.config.read().await.clone();
        let trackers = self.trackers.read().await.clone();

        tracing::info!(
            "Start relay discovery for {} ({} trackers, depth {}, {} queries)",
            self.context.local_identity,
            trackers.len(),
            config.max_depth,
            config.max_search_nodes
        );

        let ctx = Arc::new(RunContext::new(
            &config,
            Some(self.context.local_identity.clone()),
        ));
        let crawler = Crawler::new(self.client.clone(), ctx.clone());
        let depth = config.max_depth;
        let concurrency = config.branch_concurrency();

        let tracker_seeds = trackers.into_iter().map(|t| t.identity).collect();
        crawler.crawl_all(tracker_seeds, depth, concurrency).await;

        let mut stopped_early = false;
        if config.auto_discovery && !ctx.is_stopped() {
            let pass = PrefixPolicy::from_config(&config)
                .run(&crawler, &self.context.local_domain, depth)
                .await;
            stopped_early = pass.stopped;

            if !stopped_early && !ctx.is_stopped() {
                crawler.crawl(&self.context.server, depth).await;

                if config.search_roster && !ctx.is_stopped() {
                    let contacts = self.roster.online_resources();
                    tracing::debug!("Crawling {} online roster contacts", contacts.len());
                    crawler.crawl_all(contacts, depth, concurrency).await;
                }
            }
        }
        stopped_early |= ctx.is_stopped();

        let newly_added = self.context.relay_table.merge(&ctx.nodes);
        self.context.runs_completed.fetch_add(1, Ordering::Relaxed);

        let stats = ctx.stats.snapshot();
        let report = DiscoveryReport {
            relays: ctx.nodes.relays(),
            trackers: ctx.nodes.trackers(),
            stats,
            queries_used: ctx.budget.used(),
            newly_added,
            stopped_early,
            elapsed: start.elapsed(),
        };

        tracing::info!(
            "End of relay discovery for {}: {} relays, {} trackers in {} ms \
             (queried {}, answered {}, timed out {}, failed {})",
            self.context.local_identity,
            report.relays.len(),
            report.trackers.len(),
            report.elapsed.as_millis(),
            stats.queried,
            stats.answered,
            stats.timed_out,
            stats.failed
        );

        report
    }
}
