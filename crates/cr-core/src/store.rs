//! Rule storage
//!
//! The engine only reads snapshots from the store and writes whole rules back.
//! Persistence formats belong to whichever backend implements [`RuleStore`];
//! [`MemoryRuleStore`] keeps everything in process.

use std::collections::BTreeSet;
use async_trait::async_trait;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{Preferences, Rule};

/// Source of rules, preferences and known containers.
///
/// Implementations must be `Send + Sync`; every call is a suspension point.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All enabled rules, in any order.
    async fn enabled_rules(&self) -> Result<Vec<Rule>, StoreError>;

    async fn preferences(&self) -> Result<Preferences, StoreError>;

    /// Whether `container_id` names a container the user has defined.
    async fn container_exists(&self, container_id: &str) -> Result<bool, StoreError>;

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>, StoreError>;

    /// Store a new rule. Fails with `DuplicateId` if the id is taken.
    async fn insert_rule(&self, rule: Rule) -> Result<(), StoreError>;

    /// Replace the rule with the same id. Fails with `NotFound` if absent.
    async fn replace_rule(&self, rule: Rule) -> Result<(), StoreError>;

    /// Delete a rule, returning it. Fails with `NotFound` if absent.
    async fn delete_rule(&self, id: &str) -> Result<Rule, StoreError>;
}

// =============================================================================
// Rule Set Document
// =============================================================================

/// Rules, preferences and containers as one serializable document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSet {
    pub containers: Vec<String>,
    pub preferences: Preferences,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Default)]
struct MemoryState {
    rules: Vec<Rule>,
    preferences: Preferences,
    containers: BTreeSet<String>,
}

/// In-process rule store. Rules keep their insertion order.
#[derive(Default)]
pub struct MemoryRuleStore {
    state: RwLock<MemoryState>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a rule set document. Duplicate ids are rejected.
    pub fn from_rule_set(set: RuleSet) -> Result<Self, StoreError> {
        let mut seen = BTreeSet::new();
        for rule in &set.rules {
            if !seen.insert(rule.id.as_str()) {
                return Err(StoreError::DuplicateId(rule.id.clone()));
            }
        }

        Ok(Self {
            state: RwLock::new(MemoryState {
                rules: set.rules,
                preferences: set.preferences,
                containers: set.containers.into_iter().collect(),
            }),
        })
    }

    pub fn with_container(self, container_id: impl Into<String>) -> Self {
        self.add_container(container_id);
        self
    }

    pub fn with_preferences(self, preferences: Preferences) -> Self {
        self.set_preferences(preferences);
        self
    }

    pub fn add_container(&self, container_id: impl Into<String>) {
        self.write().containers.insert(container_id.into());
    }

    pub fn set_preferences(&self, preferences: Preferences) {
        self.write().preferences = preferences;
    }

    /// Current contents as a document.
    pub fn snapshot(&self) -> RuleSet {
        let state = self.read();
        RuleSet {
            containers: state.containers.iter().cloned().collect(),
            preferences: state.preferences.clone(),
            rules: state.rules.clone(),
        }
    }

    /// Enabled rules without going through the async trait.
    pub fn enabled_rules_now(&self) -> Vec<Rule> {
        self.read().rules.iter().filter(|rule| rule.enabled).cloned().collect()
    }

    pub fn preferences_now(&self) -> Preferences {
        self.read().preferences.clone()
    }

    pub fn rule_count(&self) -> usize {
        self.read().rules.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read()
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn enabled_rules(&self) -> Result<Vec<Rule>, StoreError> {
        Ok(self.enabled_rules_now())
    }

    async fn preferences(&self) -> Result<Preferences, StoreError> {
        Ok(self.preferences_now())
    }

    async fn container_exists(&self, container_id: &str) -> Result<bool, StoreError> {
        Ok(self.read().containers.contains(container_id))
    }

    async fn get_rule(&self, id: &str) -> Result<Option<Rule>, StoreError> {
        Ok(self.read().rules.iter().find(|rule| rule.id == id).cloned())
    }

    async fn insert_rule(&self, rule: Rule) -> Result<(), StoreError> {
        let mut state = self.write();
        if state.rules.iter().any(|existing| existing.id == rule.id) {
            return Err(StoreError::DuplicateId(rule.id));
        }
        state.rules.push(rule);
        Ok(())
    }

    async fn replace_rule(&self, rule: Rule) -> Result<(), StoreError> {
        let mut state = self.write();
        match state.rules.iter_mut().find(|existing| existing.id == rule.id) {
            Some(slot) => {
                *slot = rule;
                Ok(())
            }
            None => Err(StoreError::NotFound(rule.id)),
        }
    }

    async fn delete_rule(&self, id: &str) -> Result<Rule, StoreError> {
        let mut state = self.write();
        match state.rules.iter().position(|rule| rule.id == id) {
            Some(idx) => Ok(state.rules.remove(idx)),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }
}
