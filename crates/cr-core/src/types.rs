//! Core type definitions for Corral
//!
//! These types are shared by the matcher, the rules engine and the request
//! interceptor. They serialize in camelCase so they can cross the wasm and
//! message boundaries unchanged.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the "not in any named container" context.
pub const NO_CONTAINER: &str = "no-container";

/// Host tab identifier.
pub type TabId = i64;

/// Tab id the host reports for requests that do not belong to a tab.
pub const TAB_ID_NONE: TabId = -1;

/// Returns true when `container` denotes the uncontained state.
#[inline]
pub fn is_uncontained(container: Option<&str>) -> bool {
    !container.is_some_and(is_container)
}

/// Returns true when `id` names a real container.
#[inline]
pub fn is_container(id: &str) -> bool {
    !id.is_empty() && id != NO_CONTAINER
}

// =============================================================================
// Match Kinds
// =============================================================================

/// How a rule pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Normalized URL equality
    Exact,
    /// Host (and optional path prefix) match, subdomains included
    Domain,
    /// `*` / `?` wildcards over the full URL
    Glob,
    /// Case-insensitive regular expression over the full URL
    Regex,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Domain => "domain",
            Self::Glob => "glob",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "domain" => Ok(Self::Domain),
            "glob" => Ok(Self::Glob),
            "regex" => Ok(Self::Regex),
            other => Err(format!("unknown match kind '{other}'")),
        }
    }
}

// =============================================================================
// Rule Kinds
// =============================================================================

/// Routing semantics of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Route matching URLs into the rule's container
    Include,
    /// Route matching URLs out of every container
    Exclude,
    /// Matching URLs may only be opened in the rule's container
    Restrict,
}

impl RuleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Exclude => "exclude",
            Self::Restrict => "restrict",
        }
    }

    /// Whether rules of this kind must name a container.
    #[inline]
    pub fn requires_container(self) -> bool {
        !matches!(self, Self::Exclude)
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            "restrict" => Ok(Self::Restrict),
            other => Err(format!("unknown rule kind '{other}'")),
        }
    }
}

// =============================================================================
// Rule
// =============================================================================

fn default_enabled() -> bool {
    true
}

/// A routing rule. Rules are replaced, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    /// Target container. Absent for Exclude rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub pattern: String,
    pub match_kind: MatchKind,
    pub rule_kind: RuleKind,
    /// Higher evaluates first within the rule's kind.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub modified: DateTime<Utc>,
}

// =============================================================================
// Preferences
// =============================================================================

/// What a Restrict rule does with a URL opened outside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictAction {
    /// Reopen the URL in the restricted container
    #[default]
    Redirect,
    /// Cancel the navigation
    Block,
}

/// Notification toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPrefs {
    pub on_exclude: bool,
    pub on_restrict: bool,
}

/// User preferences consulted by the engine and the interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    /// Container for URLs no rule matches, opened from the uncontained state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_container_id: Option<String>,
    /// Keep the original tab open after redirecting
    pub keep_old_tabs: bool,
    pub notifications: NotificationPrefs,
    pub restrict_action: RestrictAction,
}

// =============================================================================
// Evaluation Result
// =============================================================================

/// What to do with a navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the navigation proceed where it is
    Open,
    /// Reopen the URL in another container
    Redirect,
    /// Reopen the URL outside every container
    Exclude,
    /// Cancel the navigation
    Block,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Redirect => "redirect",
            Self::Exclude => "exclude",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating a URL against the rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<Rule>,
    pub reason: String,
}

impl EvaluationResult {
    pub fn open(container_id: Option<String>, rule: Option<&Rule>, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Open,
            container_id,
            matched_rule: rule.cloned(),
            reason: reason.into(),
        }
    }

    pub fn redirect(container_id: impl Into<String>, rule: Option<&Rule>, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Redirect,
            container_id: Some(container_id.into()),
            matched_rule: rule.cloned(),
            reason: reason.into(),
        }
    }

    pub fn exclude(rule: &Rule, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Exclude,
            container_id: Some(NO_CONTAINER.to_string()),
            matched_rule: Some(rule.clone()),
            reason: reason.into(),
        }
    }

    pub fn block(container_id: Option<String>, rule: &Rule, reason: impl Into<String>) -> Self {
        Self {
            action: Action::Block,
            container_id,
            matched_rule: Some(rule.clone()),
            reason: reason.into(),
        }
    }

    /// Kind of the rule that produced this result, if any.
    pub fn matched_kind(&self) -> Option<RuleKind> {
        self.matched_rule.as_ref().map(|rule| rule.rule_kind)
    }
}

// =============================================================================
// Navigation Context
// =============================================================================

/// A single intercepted navigation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationContext {
    pub url: String,
    pub tab_id: TabId,
    pub current_container_id: Option<String>,
    pub is_main_frame: bool,
}
