//! Gmail rule pipeline: a declarative rule engine that scans a mailbox,
//! evaluates user-authored rules against each candidate message, and
//! applies the matched actions through a rate-limited, circuit-broken
//! Gmail API adapter.
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - the Provider Adapter (`GmailClient`) and its production
//!   implementation, wrapped in retry/backoff and circuit-breaker policy
//! - [`rate_limiter`] / [`circuit_breaker`] - the resilience policy
//!   wrapped around every adapter call
//! - [`label_manager`] - the Label Resolver: name/id caching, system-label
//!   bypass, and hierarchy creation
//! - [`models`] / [`rule_store`] / [`rule_compiler`] - the rule model, its
//!   JSON-backed store, and the two-phase query/predicate compiler
//! - [`pipeline`] - the Pipeline Executor that ties the above into a
//!   single scan-and-apply run, with checkpointing and a rollback log
//! - [`jobs`] - the async job manager that runs pipeline executions in
//!   the background with cooperative cancellation
//! - [`progress`] - weighted multi-step progress tracking shared by jobs
//! - [`exclusions`] - the persistent per-action opt-out list consulted by
//!   the executor
//! - [`config`] - on-disk configuration for every module above
//! - [`cli`] - command-line interface and pipeline orchestration

pub mod auth;
pub mod circuit_breaker;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod exclusions;
pub mod jobs;
pub mod label_manager;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod rate_limiter;
pub mod rule_compiler;
pub mod rule_store;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{GmailClient, MessageFormat, ProductionGmailClient};
pub use config::{Config, ExecutorConfig, JobsConfig};
pub use error::{GmailError, Result};
pub use exclusions::ExclusionManager;
pub use jobs::{JobManager, JobStatus, JobSummary};
pub use label_manager::LabelManager;
pub use models::{Action, ActionType, Condition, Conjunction, Field, MatchableEmail, Operator, Rule};
pub use pipeline::{Executor, RunOptions, RunSummary};
pub use progress::{Operation, OperationState, ProgressSnapshot, Step};
pub use rule_store::RuleStore;
