//! Rule set and config files.

use std::fs;
use std::path::Path;

use chrono::Utc;

use cr_core::{MatchKind, MemoryRuleStore, Rule, RuleKind, RuleSet};
use cr_intercept::RouterConfig;

pub fn read_rule_set(path: &Path) -> Result<RuleSet, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    RuleSet::from_json(&json).map_err(|e| format!("Invalid rule set '{}': {}", path.display(), e))
}

pub fn load_store(path: &Path) -> Result<MemoryRuleStore, String> {
    let set = read_rule_set(path)?;
    MemoryRuleStore::from_rule_set(set).map_err(|e| format!("Invalid rule set '{}': {}", path.display(), e))
}

pub fn write_rule_set(path: &Path, set: &RuleSet) -> Result<(), String> {
    let json = serde_json::to_string_pretty(set)
        .map_err(|e| format!("Failed to serialize rule set: {}", e))?;
    fs::write(path, json).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}

/// Load a router config, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<RouterConfig, String> {
    match path {
        Some(path) => RouterConfig::from_path(path).map_err(|e| e.to_string()),
        None => Ok(RouterConfig::default()),
    }
}

/// Inline JSON, or `@path` to read it from a file.
pub fn read_json_arg(arg: &str) -> Result<String, String> {
    match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e)),
        None => Ok(arg.to_string()),
    }
}

/// A mixed rule set of `count` rules over every match and rule kind.
pub fn synthetic_rules(count: usize) -> Vec<Rule> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let (pattern, match_kind) = match i % 4 {
                0 => (format!("site{i}.example.com"), MatchKind::Domain),
                1 => (format!("https://*.host{i}.org/*"), MatchKind::Glob),
                2 => (format!(r"^https://app{i}\.test/"), MatchKind::Regex),
                _ => (format!("https://exact{i}.net/login"), MatchKind::Exact),
            };
            let rule_kind = match i % 3 {
                0 => RuleKind::Include,
                1 => RuleKind::Exclude,
                _ => RuleKind::Restrict,
            };
            Rule {
                id: format!("synthetic-{i}"),
                container_id: rule_kind.requires_container().then(|| "work".to_string()),
                pattern,
                match_kind,
                rule_kind,
                priority: (i % 7) as i32,
                enabled: true,
                created: now,
                modified: now,
            }
        })
        .collect()
}
