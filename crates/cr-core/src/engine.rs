//! Rules Engine
//!
//! Turns (url, current container) into an [`EvaluationResult`]. Candidate
//! rules are bucketed by kind and the buckets are consulted strictly in the
//! order Restrict, Exclude, Include; priority only orders rules inside a
//! bucket. The first rule that yields a decision wins.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{CacheKey, Clock, EvaluationCache, MonotonicClock, RuleFingerprint};
use crate::error::{RouteError, StoreError};
use crate::matcher::{MatchTarget, UrlMatcher};
use crate::store::RuleStore;
use crate::types::{
    is_container, EvaluationResult, MatchKind, Preferences, RestrictAction, Rule, RuleKind,
};
use crate::validate::validate_pattern;

/// Human-readable reasons attached to evaluation results.
pub mod reason {
    pub const NO_MATCHING_RULES: &str = "no matching rules";
    pub const DEFAULT_CONTAINER: &str = "no matching rules, opening in default container";
    pub const NO_APPLICABLE_RULES: &str = "no applicable rules";
    pub const ALREADY_RESTRICTED: &str = "already in restricted container";
    pub const RESTRICTED: &str = "restricted to container";
    pub const ALREADY_UNCONTAINED: &str = "already uncontained";
    pub const EXCLUDED: &str = "excluded from containers";
    pub const ALREADY_INCLUDED: &str = "already in target container";
    pub const INCLUDED: &str = "included in container";
    pub const FOREIGN_CONTAINER: &str = "include rule does not move tabs out of another container";
}

// =============================================================================
// Configuration
// =============================================================================

/// Cache tuning for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum cached evaluations; 0 disables the cache
    pub cache_capacity: usize,
    /// Lifetime of a cached evaluation in milliseconds
    pub cache_ttl_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            cache_ttl_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

// =============================================================================
// Mutation Requests
// =============================================================================

/// Request to create a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    #[serde(default)]
    pub container_id: Option<String>,
    pub pattern: String,
    pub match_kind: MatchKind,
    pub rule_kind: RuleKind,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Partial update of a rule; absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleUpdate {
    pub container_id: Option<String>,
    pub pattern: Option<String>,
    pub match_kind: Option<MatchKind>,
    pub rule_kind: Option<RuleKind>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
}

// =============================================================================
// Engine
// =============================================================================

pub struct RulesEngine<S> {
    store: S,
    matcher: UrlMatcher,
    cache: Mutex<EvaluationCache>,
    clock: Box<dyn Clock>,
    config: EngineConfig,
}

impl<S: RuleStore> RulesEngine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Box::new(MonotonicClock::new()))
    }

    /// Create an engine whose cache expiry follows `clock`.
    pub fn with_clock(store: S, config: EngineConfig, clock: Box<dyn Clock>) -> Self {
        let cache = EvaluationCache::new(config.cache_capacity, config.cache_ttl());
        Self {
            store,
            matcher: UrlMatcher::new(),
            cache: Mutex::new(cache),
            clock,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate `url` for a tab currently in `current_container_id`.
    pub async fn evaluate(
        &self,
        url: &str,
        current_container_id: Option<&str>,
    ) -> Result<EvaluationResult, RouteError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RouteError::InvalidInput("url is required".to_string()));
        }

        let rules = self.store.enabled_rules().await?;
        let preferences = self.store.preferences().await?;
        Ok(self.evaluate_snapshot(&rules, &preferences, url, current_container_id))
    }

    /// Evaluate against an already-fetched snapshot. Never suspends.
    pub fn evaluate_snapshot(
        &self,
        rules: &[Rule],
        preferences: &Preferences,
        url: &str,
        current_container_id: Option<&str>,
    ) -> EvaluationResult {
        let key = CacheKey::new(
            url,
            current_container_id,
            RuleFingerprint::of(rules),
            preferences,
        );
        let now = self.clock.now_millis();

        if let Some(hit) = self.lock_cache().get(&key, now) {
            log::trace!("Cache hit for {url}");
            return hit;
        }

        let result = decide(&self.matcher, rules, preferences, url, current_container_id);
        log::debug!(
            "Evaluated {url} from {}: {} ({})",
            current_container_id.unwrap_or("<none>"),
            result.action,
            result.reason
        );

        self.lock_cache().insert(key, result.clone(), now);
        result
    }

    /// Diagnostic: test a single pattern against a URL.
    pub fn test_pattern(&self, url: &str, pattern: &str, kind: MatchKind) -> bool {
        self.matcher.matches(url, pattern, kind)
    }

    pub async fn add_rule(&self, request: NewRule) -> Result<Rule, RouteError> {
        let pattern = request.pattern.trim().to_string();
        validate_pattern(&pattern, request.match_kind)?;
        let container_id = self
            .check_container(request.rule_kind, request.container_id)
            .await?;

        let stamp = self.next_timestamp().await?;
        let rule = Rule {
            id: Uuid::new_v4().to_string(),
            container_id,
            pattern,
            match_kind: request.match_kind,
            rule_kind: request.rule_kind,
            priority: request.priority.unwrap_or(0),
            enabled: request.enabled.unwrap_or(true),
            created: stamp,
            modified: stamp,
        };

        self.store.insert_rule(rule.clone()).await?;
        self.clear_cache();
        log::debug!("Added {} rule {} ({})", rule.rule_kind, rule.id, rule.pattern);
        Ok(rule)
    }

    pub async fn update_rule(&self, id: &str, update: RuleUpdate) -> Result<Rule, RouteError> {
        let mut rule = self
            .store
            .get_rule(id)
            .await?
            .ok_or_else(|| RouteError::RuleNotFound(id.to_string()))?;

        if let Some(pattern) = update.pattern {
            rule.pattern = pattern.trim().to_string();
        }
        if let Some(match_kind) = update.match_kind {
            rule.match_kind = match_kind;
        }
        if let Some(rule_kind) = update.rule_kind {
            rule.rule_kind = rule_kind;
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        if update.container_id.is_some() {
            rule.container_id = update.container_id;
        }

        validate_pattern(&rule.pattern, rule.match_kind)?;
        rule.container_id = self
            .check_container(rule.rule_kind, rule.container_id.take())
            .await?;
        rule.modified = self.next_timestamp().await?;

        self.store.replace_rule(rule.clone()).await.map_err(|e| match e {
            StoreError::NotFound(id) => RouteError::RuleNotFound(id),
            other => RouteError::Store(other),
        })?;
        self.clear_cache();
        log::debug!("Updated rule {}", rule.id);
        Ok(rule)
    }

    pub async fn remove_rule(&self, id: &str) -> Result<Rule, RouteError> {
        let removed = self.store.delete_rule(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => RouteError::RuleNotFound(id),
            other => RouteError::Store(other),
        })?;
        self.clear_cache();
        log::debug!("Removed rule {}", removed.id);
        Ok(removed)
    }

    /// Drop expired cache entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock_cache().purge_expired(now)
    }

    pub fn clear_cache(&self) {
        self.lock_cache().clear();
    }

    pub fn cache_len(&self) -> usize {
        self.lock_cache().len()
    }

    async fn check_container(
        &self,
        kind: RuleKind,
        container_id: Option<String>,
    ) -> Result<Option<String>, RouteError> {
        if !kind.requires_container() {
            return Ok(None);
        }

        let container_id = container_id
            .map(|id| id.trim().to_string())
            .filter(|id| is_container(id))
            .ok_or(RouteError::MissingContainer(kind))?;

        if !self.store.container_exists(&container_id).await? {
            return Err(RouteError::UnknownContainer(container_id));
        }
        Ok(Some(container_id))
    }

    /// A timestamp strictly later than every enabled rule's `modified`, so a
    /// mutation always changes the snapshot fingerprint.
    async fn next_timestamp(&self) -> Result<DateTime<Utc>, RouteError> {
        let rules = self.store.enabled_rules().await?;
        let now = Utc::now();
        Ok(match RuleFingerprint::of(&rules).latest_modified {
            Some(latest) if latest >= now => latest + TimeDelta::microseconds(1),
            _ => now,
        })
    }

    fn lock_cache(&self) -> MutexGuard<'_, EvaluationCache> {
        self.cache.lock()
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Evaluate `url` against `rules` without caching.
pub fn decide(
    matcher: &UrlMatcher,
    rules: &[Rule],
    preferences: &Preferences,
    url: &str,
    current_container_id: Option<&str>,
) -> EvaluationResult {
    let current = current_container_id.filter(|id| is_container(id));
    let target = MatchTarget::new(url);

    let mut restrict = Vec::new();
    let mut exclude = Vec::new();
    let mut include = Vec::new();

    for rule in rules.iter().filter(|rule| rule.enabled) {
        if !matcher.matches_target(&target, &rule.pattern, rule.match_kind) {
            continue;
        }
        match rule.rule_kind {
            RuleKind::Restrict => restrict.push(rule),
            RuleKind::Exclude => exclude.push(rule),
            RuleKind::Include => include.push(rule),
        }
    }

    if restrict.is_empty() && exclude.is_empty() && include.is_empty() {
        return match default_container(preferences) {
            Some(default) if current.is_none() => {
                EvaluationResult::redirect(default, None, reason::DEFAULT_CONTAINER)
            }
            _ => EvaluationResult::open(current.map(str::to_string), None, reason::NO_MATCHING_RULES),
        };
    }

    for bucket in [&mut restrict, &mut exclude, &mut include] {
        // Stable: equal priorities keep store order
        bucket.sort_by(|a, b| b.priority.cmp(&a.priority));
        for rule in bucket.iter() {
            if let Some(result) = decide_rule(rule, current, preferences) {
                return result;
            }
        }
    }

    EvaluationResult::open(current.map(str::to_string), None, reason::NO_APPLICABLE_RULES)
}

/// Decision for a single matching rule. `current` is `None` when uncontained.
///
/// Returns `None` only for a rule that lacks the container its kind needs.
pub fn decide_rule(
    rule: &Rule,
    current: Option<&str>,
    preferences: &Preferences,
) -> Option<EvaluationResult> {
    match rule.rule_kind {
        RuleKind::Restrict => {
            let target = rule.container_id.as_deref().filter(|id| is_container(id))?;
            if current == Some(target) {
                return Some(EvaluationResult::open(
                    Some(target.to_string()),
                    Some(rule),
                    reason::ALREADY_RESTRICTED,
                ));
            }
            Some(match preferences.restrict_action {
                RestrictAction::Redirect => {
                    EvaluationResult::redirect(target, Some(rule), reason::RESTRICTED)
                }
                RestrictAction::Block => {
                    EvaluationResult::block(Some(target.to_string()), rule, reason::RESTRICTED)
                }
            })
        }
        RuleKind::Exclude => Some(match current {
            None => EvaluationResult::open(None, Some(rule), reason::ALREADY_UNCONTAINED),
            Some(_) => EvaluationResult::exclude(rule, reason::EXCLUDED),
        }),
        RuleKind::Include => {
            let target = rule.container_id.as_deref().filter(|id| is_container(id))?;
            Some(match current {
                Some(current) if current == target => EvaluationResult::open(
                    Some(target.to_string()),
                    Some(rule),
                    reason::ALREADY_INCLUDED,
                ),
                None => EvaluationResult::redirect(target, Some(rule), reason::INCLUDED),
                Some(other) => EvaluationResult::open(
                    Some(other.to_string()),
                    Some(rule),
                    reason::FOREIGN_CONTAINER,
                ),
            })
        }
    }
}

fn default_container(preferences: &Preferences) -> Option<&str> {
    preferences
        .default_container_id
        .as_deref()
        .filter(|id| is_container(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::store::MemoryRuleStore;
    use crate::types::{Action, NO_CONTAINER};
    use std::sync::Arc;

    fn engine() -> RulesEngine<MemoryRuleStore> {
        let store = MemoryRuleStore::new()
            .with_container("work")
            .with_container("personal")
            .with_container("banking")
            .with_container("shopping");
        RulesEngine::new(store)
    }

    fn new_rule(pattern: &str, kind: RuleKind, container: Option<&str>, priority: i32) -> NewRule {
        NewRule {
            container_id: container.map(str::to_string),
            pattern: pattern.to_string(),
            match_kind: MatchKind::Domain,
            rule_kind: kind,
            priority: Some(priority),
            enabled: None,
        }
    }

    #[tokio::test]
    async fn test_precedence_restrict_over_exclude_over_include() {
        let engine = engine();
        engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("work"), 100))
            .await
            .unwrap();
        engine
            .add_rule(new_rule("example.com", RuleKind::Exclude, None, 50))
            .await
            .unwrap();
        let result = engine.evaluate("https://example.com", Some("personal")).await.unwrap();
        assert_eq!(result.matched_kind(), Some(RuleKind::Exclude));

        engine
            .add_rule(new_rule("example.com", RuleKind::Restrict, Some("banking"), -10))
            .await
            .unwrap();
        let result = engine.evaluate("https://example.com", Some("personal")).await.unwrap();
        assert_eq!(result.matched_kind(), Some(RuleKind::Restrict));
        assert_eq!(result.action, Action::Redirect);
        assert_eq!(result.container_id.as_deref(), Some("banking"));
    }

    #[tokio::test]
    async fn test_priority_within_bucket() {
        let engine = engine();
        engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("work"), 1))
            .await
            .unwrap();
        engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("shopping"), 5))
            .await
            .unwrap();

        let result = engine.evaluate("https://example.com", None).await.unwrap();
        assert_eq!(result.action, Action::Redirect);
        assert_eq!(result.container_id.as_deref(), Some("shopping"));
    }

    #[tokio::test]
    async fn test_no_loop_after_redirect() {
        let engine = engine();
        engine
            .add_rule(new_rule("mail.example.com", RuleKind::Include, Some("work"), 0))
            .await
            .unwrap();
        engine
            .add_rule(new_rule("bank.com", RuleKind::Restrict, Some("banking"), 0))
            .await
            .unwrap();

        for (url, start) in [
            ("https://mail.example.com/inbox", None),
            ("https://bank.com/login", Some("personal")),
        ] {
            let first = engine.evaluate(url, start).await.unwrap();
            assert_eq!(first.action, Action::Redirect);
            let second = engine
                .evaluate(url, first.container_id.as_deref())
                .await
                .unwrap();
            assert_eq!(second.action, Action::Open);
        }
    }

    #[tokio::test]
    async fn test_exclude_round_trip() {
        let engine = engine();
        engine
            .add_rule(new_rule("ads.example.com", RuleKind::Exclude, None, 0))
            .await
            .unwrap();

        let result = engine.evaluate("https://ads.example.com", Some("work")).await.unwrap();
        assert_eq!(result.action, Action::Exclude);
        assert_eq!(result.container_id.as_deref(), Some(NO_CONTAINER));

        let result = engine
            .evaluate("https://ads.example.com", Some(NO_CONTAINER))
            .await
            .unwrap();
        assert_eq!(result.action, Action::Open);
    }

    #[tokio::test]
    async fn test_restrict_enforcement() {
        let engine = engine();
        engine
            .add_rule(new_rule("bank.com", RuleKind::Restrict, Some("banking"), 0))
            .await
            .unwrap();

        let result = engine.evaluate("https://bank.com", Some("personal")).await.unwrap();
        assert_eq!(result.action, Action::Redirect);
        assert_eq!(result.container_id.as_deref(), Some("banking"));

        let result = engine.evaluate("https://bank.com", Some("banking")).await.unwrap();
        assert_eq!(result.action, Action::Open);

        // The browser contacts evil.com here, so the restrict rule must not fire
        let result = engine
            .evaluate("https://evil.com\\@bank.com/", Some("personal"))
            .await
            .unwrap();
        assert_eq!(result.action, Action::Open);
        assert!(result.matched_rule.is_none());
    }

    #[tokio::test]
    async fn test_restrict_block_preference() {
        let engine = engine();
        engine.store().set_preferences(Preferences {
            restrict_action: RestrictAction::Block,
            ..Preferences::default()
        });
        engine
            .add_rule(new_rule("bank.com", RuleKind::Restrict, Some("banking"), 0))
            .await
            .unwrap();

        let result = engine.evaluate("https://bank.com", Some("personal")).await.unwrap();
        assert_eq!(result.action, Action::Block);
        assert_eq!(result.container_id.as_deref(), Some("banking"));
    }

    #[tokio::test]
    async fn test_include_does_not_clobber_other_container() {
        let engine = engine();
        engine
            .add_rule(new_rule("github.com", RuleKind::Include, Some("work"), 0))
            .await
            .unwrap();

        let result = engine.evaluate("https://github.com", Some("personal")).await.unwrap();
        assert_eq!(result.action, Action::Open);
        assert_eq!(result.container_id.as_deref(), Some("personal"));
        assert_eq!(result.reason, reason::FOREIGN_CONTAINER);
    }

    #[tokio::test]
    async fn test_default_container_fallback() {
        let engine = engine();
        engine.store().set_preferences(Preferences {
            default_container_id: Some("personal".to_string()),
            ..Preferences::default()
        });

        let result = engine.evaluate("https://unruled.org", None).await.unwrap();
        assert_eq!(result.action, Action::Redirect);
        assert_eq!(result.container_id.as_deref(), Some("personal"));

        let result = engine.evaluate("https://unruled.org", Some("work")).await.unwrap();
        assert_eq!(result.action, Action::Open);
        assert_eq!(result.reason, reason::NO_MATCHING_RULES);
    }

    #[tokio::test]
    async fn test_cache_coherence_after_update() {
        let engine = engine();
        let low = engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("work"), 1))
            .await
            .unwrap();
        engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("shopping"), 5))
            .await
            .unwrap();

        let before = engine.evaluate("https://example.com", None).await.unwrap();
        assert_eq!(before.container_id.as_deref(), Some("shopping"));
        assert_eq!(engine.cache_len(), 1);

        // Bypass the engine's eager clear: the fingerprint alone must invalidate
        let mut raised = engine.store().get_rule(&low.id).await.unwrap().unwrap();
        raised.priority = 10;
        raised.modified = raised.modified + TimeDelta::seconds(5);
        engine.store().replace_rule(raised).await.unwrap();

        let after = engine.evaluate("https://example.com", None).await.unwrap();
        assert_eq!(after.container_id.as_deref(), Some("work"));

        let updated = engine
            .update_rule(&low.id, RuleUpdate { priority: Some(0), ..RuleUpdate::default() })
            .await
            .unwrap();
        assert!(updated.modified > low.modified);
        let again = engine.evaluate("https://example.com", None).await.unwrap();
        assert_eq!(again.container_id.as_deref(), Some("shopping"));
    }

    #[tokio::test]
    async fn test_cache_hit_and_ttl() {
        let clock = Arc::new(ManualClock::new(0));

        let store = MemoryRuleStore::new().with_container("work");
        let config = EngineConfig {
            cache_capacity: 10,
            cache_ttl_ms: 1_000,
        };
        let engine = RulesEngine::with_clock(store, config, Box::new(clock.clone()));

        engine.evaluate("https://a.com", None).await.unwrap();
        engine.evaluate("https://a.com", None).await.unwrap();
        assert_eq!(engine.cache_len(), 1);

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(engine.purge_expired(), 1);
        assert_eq!(engine.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_add_rule_validation() {
        let engine = engine();

        let err = engine
            .add_rule(new_rule("example.com", RuleKind::Include, None, 0))
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::MissingContainer(RuleKind::Include));

        let err = engine
            .add_rule(new_rule("example.com", RuleKind::Restrict, Some(NO_CONTAINER), 0))
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::MissingContainer(RuleKind::Restrict));

        let err = engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("ghost"), 0))
            .await
            .unwrap_err();
        assert_eq!(err, RouteError::UnknownContainer("ghost".to_string()));

        let err = engine
            .add_rule(new_rule("bad host", RuleKind::Exclude, None, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Pattern(_)));

        // Exclude rules never carry a container
        let rule = engine
            .add_rule(new_rule("ads.com", RuleKind::Exclude, Some("work"), 0))
            .await
            .unwrap();
        assert!(rule.container_id.is_none());
        assert!(rule.enabled);
    }

    #[tokio::test]
    async fn test_update_and_remove_unknown() {
        let engine = engine();
        assert_eq!(
            engine.update_rule("nope", RuleUpdate::default()).await.unwrap_err(),
            RouteError::RuleNotFound("nope".to_string())
        );
        assert_eq!(
            engine.remove_rule("nope").await.unwrap_err(),
            RouteError::RuleNotFound("nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_disabled_rules_are_ignored() {
        let engine = engine();
        let rule = engine
            .add_rule(new_rule("example.com", RuleKind::Include, Some("work"), 0))
            .await
            .unwrap();
        engine
            .update_rule(&rule.id, RuleUpdate { enabled: Some(false), ..RuleUpdate::default() })
            .await
            .unwrap();

        let result = engine.evaluate("https://example.com", None).await.unwrap();
        assert_eq!(result.action, Action::Open);
        assert!(result.matched_rule.is_none());
    }

    #[tokio::test]
    async fn test_empty_url_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.evaluate("  ", None).await,
            Err(RouteError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rule_without_container_falls_through() {
        let now = Utc::now();
        let broken = Rule {
            id: "broken".to_string(),
            container_id: None,
            pattern: "example.com".to_string(),
            match_kind: MatchKind::Domain,
            rule_kind: RuleKind::Include,
            priority: 0,
            enabled: true,
            created: now,
            modified: now,
        };
        let result = decide(
            &UrlMatcher::new(),
            &[broken],
            &Preferences::default(),
            "https://example.com",
            None,
        );
        assert_eq!(result.action, Action::Open);
        assert_eq!(result.reason, reason::NO_APPLICABLE_RULES);
    }
}
