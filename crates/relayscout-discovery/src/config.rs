//! Discovery configuration
//!
//! Read once per run. Every setting is optional; a value that cannot be used
//! is logged and replaced by its default rather than failing the run.

use crate::types::TransportProtocol;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default target protocol
pub const DEFAULT_PROTOCOL: TransportProtocol = TransportProtocol::Udp;

/// Default relay entry target per run
pub const DEFAULT_MAX_ENTRIES: usize = 6;

/// Default depth budget per seed
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Default total directory queries per run
pub const DEFAULT_MAX_SEARCH_NODES: usize = 20;

/// Default baseline reply round trip
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5_000;

/// Default multiplier over the baseline reply round trip
pub const DEFAULT_REPLY_TIMEOUT_MULTIPLIER: f64 = 1.5;

/// Property key prefix used by [`DiscoveryConfig::from_properties`]
pub const PROPERTY_PREFIX: &str = "relay_discovery.";

/// Where stop-on-first applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopScope {
    /// Only the prefix pass over local-domain items
    #[default]
    PrefixOnly,
    /// Also any prefix-matching relay found later in the run
    Global,
}

/// Ordered list of identity prefixes searched first
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPrefixes(Vec<String>);

impl SearchPrefixes {
    /// Parse a comma-separated list
    ///
    /// Entries are trimmed and empty entries dropped. `off` (any case) disables
    /// the prefix policy.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("off") {
            return Self::default();
        }
        Self(
            raw.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// True when no prefix is configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prefixes in configured order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// First configured prefix `candidate` starts with
    #[must_use]
    pub fn matching(&self, candidate: &str) -> Option<&str> {
        self.iter().find(|p| candidate.starts_with(p))
    }
}

/// Relay discovery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Target protocol name (`udp`, `tcp`)
    pub protocol: String,

    /// Stop querying once this many relay entries were collected
    pub max_entries: usize,

    /// Depth budget given to every seed
    pub max_depth: u32,

    /// Total directory queries per run
    pub max_search_nodes: usize,

    /// Comma-separated prefixes searched first
    pub search_prefixes: String,

    /// Stop after the first successful prefix match
    pub stop_on_first: bool,

    /// Where stop-on-first applies
    pub stop_on_first_scope: StopScope,

    /// Crawl online roster contacts
    pub search_roster: bool,

    /// Crawl local domain, server and roster (trackers are always crawled)
    pub auto_discovery: bool,

    /// Baseline reply round trip in milliseconds
    pub reply_timeout_ms: u64,

    /// Multiplier over the baseline
    pub reply_timeout_multiplier: f64,

    /// Concurrent tracker/roster branches
    pub parallel_branches: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_depth: DEFAULT_MAX_DEPTH,
            max_search_nodes: DEFAULT_MAX_SEARCH_NODES,
            search_prefixes: String::new(),
            stop_on_first: true,
            stop_on_first_scope: StopScope::PrefixOnly,
            search_roster: false,
            auto_discovery: true,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            reply_timeout_multiplier: DEFAULT_REPLY_TIMEOUT_MULTIPLIER,
            parallel_branches: 1,
        }
    }
}

impl DiscoveryConfig {
    /// Target protocol, falling back to UDP on an unknown name
    #[must_use]
    pub fn target_protocol(&self) -> TransportProtocol {
        match self.protocol.parse() {
            Ok(protocol) => protocol,
            Err(e) => {
                tracing::warn!("{}, falling back to {}", e, DEFAULT_PROTOCOL);
                DEFAULT_PROTOCOL
            }
        }
    }

    /// Parsed prefix list
    #[must_use]
    pub fn prefixes(&self) -> SearchPrefixes {
        SearchPrefixes::parse(&self.search_prefixes)
    }

    /// Effective per-query reply timeout (baseline times multiplier)
    #[must_use]
    pub fn reply_timeout(&self) -> Duration {
        let multiplier =
            if self.reply_timeout_multiplier.is_finite() && self.reply_timeout_multiplier > 0.0 {
                self.reply_timeout_multiplier
            } else {
                tracing::warn!(
                    "Invalid reply timeout multiplier {}, using {}",
                    self.reply_timeout_multiplier,
                    DEFAULT_REPLY_TIMEOUT_MULTIPLIER
                );
                DEFAULT_REPLY_TIMEOUT_MULTIPLIER
            };
        let millis = (self.reply_timeout_ms as f64 * multiplier).round();
        Duration::from_millis(millis as u64)
    }

    /// Branch concurrency, at least one
    #[must_use]
    pub fn branch_concurrency(&self) -> usize {
        self.parallel_branches.max(1)
    }

    /// True if stop-on-first also applies outside the prefix pass
    #[must_use]
    pub fn stops_globally(&self) -> bool {
        self.stop_on_first && self.stop_on_first_scope == StopScope::Global
    }

    /// Build a configuration from flat string properties
    ///
    /// Keys are `relay_discovery.<field>`. Missing keys keep their default;
    /// unparseable values are logged and keep their default.
    #[must_use]
    pub fn from_properties(source: &impl PropertySource) -> Self {
        let mut config = Self::default();

        if let Some(protocol) = source.property("protocol") {
            if protocol.parse::<TransportProtocol>().is_ok() {
                config.protocol = protocol.trim().to_ascii_lowercase();
            } else {
                warn_fallback("protocol", &protocol);
            }
        }
        parse_into(source, "max_entries", &mut config.max_entries);
        parse_into(source, "max_depth", &mut config.max_depth);
        parse_into(source, "max_search_nodes", &mut config.max_search_nodes);
        if let Some(prefixes) = source.property("search_prefixes") {
            config.search_prefixes = prefixes;
        }
        parse_bool_into(source, "stop_on_first", &mut config.stop_on_first);
        if let Some(scope) = source.property("stop_on_first_scope") {
            match scope.trim().to_ascii_lowercase().as_str() {
                "prefix_only" => config.stop_on_first_scope = StopScope::PrefixOnly,
                "global" => config.stop_on_first_scope = StopScope::Global,
                _ => warn_fallback("stop_on_first_scope", &scope),
            }
        }
        parse_bool_into(source, "search_roster", &mut config.search_roster);
        parse_bool_into(source, "auto_discovery", &mut config.auto_discovery);
        parse_into(source, "reply_timeout_ms", &mut config.reply_timeout_ms);
        parse_into(
            source,
            "reply_timeout_multiplier",
            &mut config.reply_timeout_multiplier,
        );
        parse_into(source, "parallel_branches", &mut config.parallel_branches);

        config
    }
}

/// Flat string property lookup supplied by the embedding application
pub trait PropertySource {
    /// Raw value for `relay_discovery.<name>`
    fn property(&self, name: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn property(&self, name: &str) -> Option<String> {
        self.get(&format!("{PROPERTY_PREFIX}{name}")).cloned()
    }
}

fn warn_fallback(name: &str, raw: &str) {
    tracing::warn!("Ignoring invalid {}{} value {:?}", PROPERTY_PREFIX, name, raw);
}

fn parse_into<T: std::str::FromStr>(source: &impl PropertySource, name: &str, slot: &mut T) {
    if let Some(raw) = source.property(name) {
        match raw.trim().parse() {
            Ok(value) => *slot = value,
            Err(_) => warn_fallback(name, &raw),
        }
    }
}

fn parse_bool_into(source: &impl PropertySource, name: &str, slot: &mut bool) {
    if let Some(raw) = source.property(name) {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => *slot = true,
            "false" | "0" | "no" | "off" => *slot = false,
            _ => warn_fallback(name, &raw),
        }
    }
}
