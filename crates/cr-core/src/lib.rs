//! Corral Core Library
//!
//! This crate provides the rule evaluation core for the Corral container router.
//! Every top-level navigation is checked against a user-defined rule set to decide
//! whether it stays where it is, moves into another container, leaves all
//! containers, or is blocked.
//!
//! # Architecture
//!
//! Evaluation is a pure function of (url, current container, rule snapshot). The
//! engine memoizes that function in an insertion-ordered, TTL-bounded cache whose
//! key embeds a fingerprint of the rule snapshot, so any rule mutation is visible
//! on the next call without an explicit flush.
//!
//! # Modules
//!
//! - `types`: Rules, preferences and evaluation results
//! - `url`: Fast URL helpers plus normalization
//! - `matcher`: Exact / Domain / Glob / Regex pattern matching
//! - `validate`: Pattern syntax validation per match kind
//! - `cache`: Evaluation cache and clock abstraction
//! - `store`: Rule store trait and in-memory implementation
//! - `engine`: Precedence-ordered rule evaluation and rule CRUD
//! - `api`: Tagged request/response message model
//! - `error`: Error types

pub mod api;
pub mod cache;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod store;
pub mod types;
pub mod url;
pub mod validate;

// Re-export commonly used types
pub use cache::{Clock, EvaluationCache, ManualClock, MonotonicClock};
pub use engine::{EngineConfig, NewRule, RuleUpdate, RulesEngine};
pub use error::{PatternError, RouteError, StoreError};
pub use matcher::{MatchTarget, UrlMatcher};
pub use store::{MemoryRuleStore, RuleSet, RuleStore};
pub use types::{
    Action, EvaluationResult, MatchKind, NavigationContext, Preferences, RestrictAction, Rule,
    RuleKind, TabId, NO_CONTAINER, TAB_ID_NONE,
};
pub use validate::validate_pattern;
