/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tunable parameters of ledger acquisition.
//!
//! All parameters have defaults, so the simplest valid configuration is:
//!
//! ```
//! let configuration = ledger_sync::config::Configuration::builder().build();
//! ```
//!
//! Individual parameters can be overridden on the builder:
//!
//! ```
//! # use std::time::Duration;
//! let configuration = ledger_sync::config::Configuration::builder()
//!     .timer_interval(Duration::from_millis(500))
//!     .max_timeouts(4)
//!     .log_events(false)
//!     .build();
//! ```

use std::time::Duration;

use typed_builder::TypedBuilder;

#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. Every parameter is optional and falls back to its
    default if not set.
    "))]
pub struct Configuration {
    #[builder(
        default = Duration::from_secs(2),
        setter(doc = "Set the interval between two timer ticks of an acquisition. Default: 2 seconds.")
    )]
    pub timer_interval: Duration,
    #[builder(
        default = 10,
        setter(doc = "Set the number of timer ticks without progress after which an acquisition fails. Default: 10.")
    )]
    pub max_timeouts: u32,
    #[builder(
        default = 6,
        setter(doc = "Set the number of timeouts after which a stalled acquisition also asks its peers for objects by hash. Default: 6.")
    )]
    pub aggressive_timeouts: u32,
    #[builder(
        default = 256,
        setter(doc = "Set the maximum number of missing nodes looked up per tree per round. Default: 256.")
    )]
    pub max_missing_nodes: usize,
    #[builder(
        default = 128,
        setter(doc = "Set the maximum number of node ids in one request. Default: 128.")
    )]
    pub max_nodes_per_request: usize,
    #[builder(
        default = 512,
        setter(doc = "Set the capacity of the set of recently requested nodes kept per tree. Default: 512.")
    )]
    pub recent_nodes_capacity: usize,
    #[builder(
        default = 3,
        setter(doc = "Set the number of peers added to an acquisition at a time. Default: 3.")
    )]
    pub peers_per_round: usize,
    #[builder(
        default = 4,
        setter(doc = "Set the number of queued ledger data jobs above which timer ticks are deferred. Default: 4.")
    )]
    pub max_pending_ledger_jobs: usize,
    #[builder(
        default = Duration::from_secs(60),
        setter(doc = "Set how long an acquisition may go untouched before a sweep removes it. Default: 60 seconds.")
    )]
    pub idle_timeout: Duration,
    #[builder(
        default = 512,
        setter(doc = "Set the maximum number of recently failed ledger hashes remembered. Default: 512.")
    )]
    pub failure_cache_capacity: usize,
    #[builder(
        default = Duration::from_secs(300),
        setter(doc = "Set how long a failed ledger hash is refused before it may be acquired again. Default: 5 minutes.")
    )]
    pub failure_cache_expiry: Duration,
    #[builder(
        default = 64,
        setter(doc = "Set the number of complete ledgers kept in the ledger cache. Default: 64.")
    )]
    pub ledger_cache_capacity: usize,
    #[builder(default = true, setter(doc = "Enable logging of events? Default: true."))]
    pub log_events: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}
