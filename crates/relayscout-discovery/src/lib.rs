//! # RelayScout Discovery
//!
//! Bounded discovery of media relays over a hierarchical service directory.
//!
//! This crate provides:
//! - A directory query client with a bounded reply wait
//! - A depth- and budget-bounded crawler with per-run deduplication
//! - A prefix policy that prioritizes well-known relay hosts
//! - A per-connection orchestrator merging results into a relay table
//!
//! ## Discovery Run
//!
//! ```text
//! trackers ──► crawl ──┐
//!                      │     (auto-discovery)
//! local domain items ──┼──► prefixed items, stop-on-first
//!                      │    then remaining items
//! server ──────────────┤
//! roster contacts ─────┘
//!                      ▼
//!              MappedNodes ──merge──► RelayTable
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use relayscout_discovery::{
//!     ConnectionContext, DirectoryClient, DiscoveryConfig, DiscoveryOrchestrator, NodeIdentity,
//!     NoRoster, UdpDirectoryTransport,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DiscoveryConfig::default();
//! let (transport, replies) = UdpDirectoryTransport::connect("127.0.0.1:5347".parse()?).await?;
//! let client = Arc::new(DirectoryClient::new(transport, config.reply_timeout()));
//! client.spawn_dispatcher(replies);
//!
//! let context = Arc::new(ConnectionContext::new(
//!     NodeIdentity::parse("alice@example.org/laptop")?,
//!     NodeIdentity::parse("example.org")?,
//! ));
//! let orchestrator = DiscoveryOrchestrator::new(client, NoRoster, context, config);
//!
//! let report = orchestrator.run().await;
//! println!("found {} relays", report.relays.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crawler;
pub mod directory;
pub mod identity;
pub mod mapped;
pub mod orchestrator;
pub mod prefix;
pub mod types;
pub mod visited;

// Re-export commonly used types
pub use config::{DiscoveryConfig, PropertySource, SearchPrefixes, StopScope};
pub use crawler::{BranchOutcome, CrawlStatsSnapshot, Crawler, QueryBudget, RootStatus, RunContext};
pub use directory::{
    DirectoryClient, DirectoryTransport, QueryError, QueryKind, UdpDirectoryTransport,
};
pub use identity::{IdentityError, NodeIdentity};
pub use mapped::{MappedNodes, RelayTable};
pub use orchestrator::{
    ConnectionContext, DiscoveryError, DiscoveryOrchestrator, DiscoveryReport, NoRoster,
    RosterSource, RunState,
};
pub use prefix::{PrefixPassReport, PrefixPolicy};
pub use types::{ChildKind, ChildRef, RelayEntry, RelayPolicy, TrackerEntry, TransportProtocol};
pub use visited::VisitedSet;
