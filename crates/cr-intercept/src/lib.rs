//! Corral Request Interception
//!
//! Turns rule verdicts into host actions. The [`RequestInterceptor`] receives
//! navigation and tab lifecycle events, asks the rules engine what to do, and
//! drives the host through the [`TabHost`] trait. Usage statistics leave
//! through a bounded, non-blocking [`StatsDispatcher`].
//!
//! # Modules
//!
//! - `interceptor`: Per-navigation processing and tab lifecycle handling
//! - `host`: Host and container lifecycle traits plus an in-memory host
//! - `stats`: Stats events, recorder trait and queue
//! - `bindings`: Tab to container map
//! - `config`: Router configuration
//! - `sweeper`: Periodic cache purge
//! - `error`: Error types

pub mod bindings;
pub mod config;
pub mod error;
pub mod host;
pub mod interceptor;
pub mod stats;
pub mod sweeper;

pub use bindings::TabBindings;
pub use config::{InterceptorConfig, RouterConfig};
pub use error::{ConfigError, HostError, StatsError};
pub use host::{
    ContainerLifecycle, CreateTab, HostOp, MemoryTabHost, NoopLifecycle, Notice, TabHost, TabInfo,
};
pub use interceptor::{HostEvent, Outcome, RequestDetails, RequestInterceptor, Verdict};
pub use stats::{MemoryStatsRecorder, StatsDispatcher, StatsEvent, StatsKind, StatsRecorder};
pub use sweeper::spawn_cache_sweeper;
