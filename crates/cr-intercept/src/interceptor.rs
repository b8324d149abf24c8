//! Request Interceptor
//!
//! Reacts to host navigation and tab lifecycle events. Each main-frame web
//! navigation is evaluated once and the verdict is carried out through the
//! host: proceed, reopen in another container, reopen uncontained, or
//! cancel. Host and store failures never block the user; the navigation
//! proceeds and the failure is logged.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cr_core::types::{is_container, is_uncontained};
use cr_core::url::{extract_domain, is_web_url, take_query_param};
use cr_core::{
    Action, EvaluationResult, NavigationContext, Preferences, Rule, RuleStore, RulesEngine,
    StoreError, TabId, NO_CONTAINER, TAB_ID_NONE,
};

use crate::bindings::TabBindings;
use crate::config::InterceptorConfig;
use crate::host::{ContainerLifecycle, CreateTab, Notice, TabHost, TabInfo};
use crate::stats::{StatsDispatcher, StatsKind};

pub const HINT_REASON: &str = "container hint";

// =============================================================================
// Events and Outcomes
// =============================================================================

/// A request the host is about to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub url: String,
    pub tab_id: TabId,
    #[serde(default = "main_frame")]
    pub is_main_frame: bool,
    #[serde(default)]
    pub tab_index: Option<u32>,
}

fn main_frame() -> bool {
    true
}

/// Host events, tagged for JSON traces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostEvent {
    BeforeRequest(RequestDetails),
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab_id: TabId,
        url: String,
        #[serde(default)]
        tab_index: Option<u32>,
    },
    TabCreated {
        tab: TabInfo,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved {
        tab_id: TabId,
    },
}

/// How the host should treat the original request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Proceed,
    Cancel,
}

/// What processing a navigation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not a navigation the router handles
    Ignored,
    /// Left where it is
    Proceeded(EvaluationResult),
    /// Reopened in another container
    Redirected { tab: TabInfo, result: EvaluationResult },
    /// Reopened outside all containers
    Excluded { tab: TabInfo, result: EvaluationResult },
    /// Cancelled with no replacement
    Blocked(EvaluationResult),
    /// A collaborator failed; the request proceeds untouched
    FailedOpen(String),
}

impl Outcome {
    pub fn verdict(&self) -> Verdict {
        match self {
            Outcome::Redirected { .. } | Outcome::Excluded { .. } | Outcome::Blocked(_) => {
                Verdict::Cancel
            }
            Outcome::Ignored | Outcome::Proceeded(_) | Outcome::FailedOpen(_) => Verdict::Proceed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Ignored => "ignored",
            Outcome::Proceeded(_) => "proceeded",
            Outcome::Redirected { .. } => "redirected",
            Outcome::Excluded { .. } => "excluded",
            Outcome::Blocked(_) => "blocked",
            Outcome::FailedOpen(_) => "failed-open",
        }
    }

    pub fn result(&self) -> Option<&EvaluationResult> {
        match self {
            Outcome::Proceeded(result)
            | Outcome::Blocked(result)
            | Outcome::Redirected { result, .. }
            | Outcome::Excluded { result, .. } => Some(result),
            Outcome::Ignored | Outcome::FailedOpen(_) => None,
        }
    }
}

// =============================================================================
// Interceptor
// =============================================================================

pub struct RequestInterceptor<S, H, L> {
    engine: Arc<RulesEngine<S>>,
    host: Arc<H>,
    lifecycle: Arc<L>,
    stats: StatsDispatcher,
    bindings: TabBindings,
    config: InterceptorConfig,
}

impl<S, H, L> RequestInterceptor<S, H, L>
where
    S: RuleStore + 'static,
    H: TabHost + 'static,
    L: ContainerLifecycle + 'static,
{
    pub fn new(
        engine: Arc<RulesEngine<S>>,
        host: Arc<H>,
        lifecycle: Arc<L>,
        stats: StatsDispatcher,
        config: InterceptorConfig,
    ) -> Self {
        Self {
            engine,
            host,
            lifecycle,
            stats,
            bindings: TabBindings::new(),
            config,
        }
    }

    pub fn engine(&self) -> &Arc<RulesEngine<S>> {
        &self.engine
    }

    pub fn bindings(&self) -> &TabBindings {
        &self.bindings
    }

    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    /// Route a host event. Lifecycle events have no outcome.
    pub async fn handle(&self, event: HostEvent) -> Option<Outcome> {
        match event {
            HostEvent::BeforeRequest(details) => Some(self.on_before_request(details).await),
            HostEvent::TabUpdated {
                tab_id,
                url,
                tab_index,
            } => Some(self.on_tab_updated(tab_id, &url, tab_index).await),
            HostEvent::TabCreated { tab } => {
                self.on_tab_created(&tab);
                None
            }
            HostEvent::TabRemoved { tab_id } => {
                self.on_tab_removed(tab_id).await;
                None
            }
        }
    }

    pub async fn on_before_request(&self, details: RequestDetails) -> Outcome {
        if !details.is_main_frame || !routable(details.tab_id, &details.url) {
            return Outcome::Ignored;
        }
        self.process(details.tab_id, &details.url, details.tab_index, false)
            .await
    }

    /// A tab navigated without a request the host let us see first.
    pub async fn on_tab_updated(&self, tab_id: TabId, url: &str, tab_index: Option<u32>) -> Outcome {
        if !routable(tab_id, url) {
            return Outcome::Ignored;
        }
        self.process(tab_id, url, tab_index, true).await
    }

    pub fn on_tab_created(&self, tab: &TabInfo) {
        if tab.id == TAB_ID_NONE {
            return;
        }
        self.bindings.bind(tab.id, tab.container_id.as_deref());
        if let Some(container) = tab.container_id.as_deref().filter(|c| is_container(c)) {
            self.stats.record(container, StatsKind::Open);
        }
    }

    /// Attribute the close and sweep empty temporary containers in the
    /// background.
    pub async fn on_tab_removed(&self, tab_id: TabId) {
        if let Some(container) = self.bindings.remove(tab_id) {
            self.stats.record(container, StatsKind::Close);
        }

        let lifecycle = Arc::clone(&self.lifecycle);
        tokio::spawn(async move {
            match lifecycle.cleanup_empty_temporary_containers().await {
                Ok(0) => {}
                Ok(removed) => log::debug!("Removed {removed} empty temporary containers"),
                Err(e) => log::debug!("Temporary container cleanup failed: {e}"),
            }
        });
    }

    async fn process(
        &self,
        tab_id: TabId,
        url: &str,
        tab_index: Option<u32>,
        refresh_binding: bool,
    ) -> Outcome {
        let current = match self.host.tab_container(tab_id).await {
            Ok(container) => container.filter(|c| is_container(c)),
            Err(e) => {
                log::warn!("Failed to resolve container of tab {tab_id}: {e}");
                return Outcome::FailedOpen(e.to_string());
            }
        };
        if refresh_binding {
            self.bindings.bind(tab_id, current.as_deref());
        }

        let (clean_url, hint) = take_query_param(url.trim(), &self.config.container_hint_param);
        let nav = NavigationContext {
            url: clean_url,
            tab_id,
            current_container_id: current,
            is_main_frame: true,
        };

        // One snapshot drives the verdict and every preference applied below
        let (rules, preferences) = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Failed to load rules for {}: {e}", nav.url);
                return Outcome::FailedOpen(e.to_string());
            }
        };

        let result = self.engine.evaluate_snapshot(
            &rules,
            &preferences,
            &nav.url,
            nav.current_container_id.as_deref(),
        );
        let result = match hint {
            Some(hint) => {
                self.apply_hint(result, &hint, &nav, &rules, &preferences)
                    .await
            }
            None => result,
        };

        match result.action {
            Action::Open => self.proceed(&nav, result),
            Action::Redirect => self.redirect(&nav, tab_index, &preferences, result).await,
            Action::Exclude => self.exclude(&nav, tab_index, &preferences, result).await,
            Action::Block => self.block(&nav, &preferences, result).await,
        }
    }

    async fn snapshot(&self) -> Result<(Vec<Rule>, Preferences), StoreError> {
        let store = self.engine.store();
        let rules = store.enabled_rules().await?;
        let preferences = store.preferences().await?;
        Ok((rules, preferences))
    }

    /// A container hint turns an `Open` into a move to the hinted container,
    /// provided the rules would leave the moved tab where it lands. Otherwise
    /// the hint is dropped and the rules decide.
    async fn apply_hint(
        &self,
        result: EvaluationResult,
        hint: &str,
        nav: &NavigationContext,
        rules: &[Rule],
        preferences: &Preferences,
    ) -> EvaluationResult {
        if result.action != Action::Open {
            return result;
        }

        let target = (!is_uncontained(Some(hint))).then_some(hint);
        if target == nav.current_container_id.as_deref() {
            return result;
        }

        let landed = self
            .engine
            .evaluate_snapshot(rules, preferences, &nav.url, target);
        if landed.action != Action::Open {
            log::debug!(
                "Ignoring hint for {}: {} ({})",
                target.unwrap_or(NO_CONTAINER),
                landed.action,
                landed.reason
            );
            return result;
        }

        if let Some(target) = target {
            match self.engine.store().container_exists(target).await {
                Ok(true) => {}
                Ok(false) => {
                    log::debug!("Ignoring hint for unknown container {target}");
                    return result;
                }
                Err(e) => {
                    log::warn!("Failed to check hinted container {target}: {e}");
                    return result;
                }
            }
        }

        EvaluationResult::redirect(target.unwrap_or(NO_CONTAINER), None, HINT_REASON)
    }

    fn proceed(&self, nav: &NavigationContext, result: EvaluationResult) -> Outcome {
        if let Some(current) = nav.current_container_id.as_deref() {
            self.stats.record(current, StatsKind::Touch);
        }
        if result.matched_rule.is_some() {
            let container = result.container_id.as_deref().unwrap_or(NO_CONTAINER);
            self.stats.record(container, StatsKind::Match);
        }
        Outcome::Proceeded(result)
    }

    async fn redirect(
        &self,
        nav: &NavigationContext,
        tab_index: Option<u32>,
        preferences: &Preferences,
        result: EvaluationResult,
    ) -> Outcome {
        let target = result
            .container_id
            .clone()
            .filter(|c| is_container(c));

        let tab = match self
            .host
            .create_tab(CreateTab {
                url: nav.url.clone(),
                container_id: target.clone(),
                index: tab_index,
            })
            .await
        {
            Ok(tab) => tab,
            Err(e) => {
                log::warn!("Failed to reopen {} in {:?}: {e}", nav.url, target);
                return Outcome::FailedOpen(e.to_string());
            }
        };

        log::debug!(
            "Moved tab {} to tab {} in {} ({})",
            nav.tab_id,
            tab.id,
            target.as_deref().unwrap_or(NO_CONTAINER),
            result.reason
        );
        self.stats
            .record(target.as_deref().unwrap_or(NO_CONTAINER), StatsKind::Match);
        self.retire_old_tab(nav.tab_id, preferences);
        Outcome::Redirected { tab, result }
    }

    async fn exclude(
        &self,
        nav: &NavigationContext,
        tab_index: Option<u32>,
        preferences: &Preferences,
        result: EvaluationResult,
    ) -> Outcome {
        let tab = match self
            .host
            .create_tab(CreateTab {
                url: nav.url.clone(),
                container_id: None,
                index: tab_index,
            })
            .await
        {
            Ok(tab) => tab,
            Err(e) => {
                log::warn!("Failed to reopen {} uncontained: {e}", nav.url);
                return Outcome::FailedOpen(e.to_string());
            }
        };

        let source = nav.current_container_id.as_deref().unwrap_or(NO_CONTAINER);
        log::debug!("Excluded tab {} from {source}, reopened as tab {}", nav.tab_id, tab.id);
        self.stats.record(source, StatsKind::Match);

        if preferences.notifications.on_exclude {
            self.notify(Notice {
                title: "Opened outside containers".to_string(),
                message: format!("{} was excluded from {source}", extract_domain(&nav.url)),
            })
            .await;
        }

        self.retire_old_tab(nav.tab_id, preferences);
        Outcome::Excluded { tab, result }
    }

    async fn block(
        &self,
        nav: &NavigationContext,
        preferences: &Preferences,
        result: EvaluationResult,
    ) -> Outcome {
        let container = result.container_id.as_deref().unwrap_or(NO_CONTAINER);
        log::debug!("Blocked {} in tab {}: restricted to {container}", nav.url, nav.tab_id);
        self.stats.record(container, StatsKind::Match);

        if preferences.notifications.on_restrict {
            self.notify(Notice {
                title: "Navigation blocked".to_string(),
                message: format!(
                    "{} may only be opened in the {container} container",
                    extract_domain(&nav.url)
                ),
            })
            .await;
        }
        Outcome::Blocked(result)
    }

    async fn notify(&self, notice: Notice) {
        if let Err(e) = self.host.notify(notice).await {
            log::debug!("Notification failed: {e}");
        }
    }

    /// Close the replaced tab after the grace delay unless the user keeps them.
    fn retire_old_tab(&self, tab_id: TabId, preferences: &Preferences) {
        if preferences.keep_old_tabs {
            return;
        }

        let host = Arc::clone(&self.host);
        let grace = self.config.close_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Err(e) = host.remove_tab(tab_id).await {
                log::warn!("Failed to close tab {tab_id}: {e}");
            }
        });
    }
}

#[inline]
fn routable(tab_id: TabId, url: &str) -> bool {
    tab_id != TAB_ID_NONE && is_web_url(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use cr_core::{MatchKind, MemoryRuleStore, NewRule, RestrictAction, RuleKind};

    use crate::error::HostError;
    use crate::host::{HostOp, MemoryTabHost, NoopLifecycle};
    use crate::stats::MemoryStatsRecorder;

    type TestInterceptor<L = NoopLifecycle> = RequestInterceptor<MemoryRuleStore, MemoryTabHost, L>;

    struct Harness<L = NoopLifecycle> {
        interceptor: TestInterceptor<L>,
        host: Arc<MemoryTabHost>,
        recorder: Arc<MemoryStatsRecorder>,
    }

    fn harness_with<L: ContainerLifecycle + 'static>(
        preferences: Preferences,
        lifecycle: Arc<L>,
    ) -> Harness<L> {
        let store = MemoryRuleStore::new()
            .with_container("work")
            .with_container("personal")
            .with_container("banking")
            .with_preferences(preferences);
        let engine = Arc::new(RulesEngine::new(store));
        let host = Arc::new(MemoryTabHost::new());
        let recorder = Arc::new(MemoryStatsRecorder::new());
        let (stats, _drain) = StatsDispatcher::spawn(recorder.clone(), 64);
        let interceptor = RequestInterceptor::new(
            engine,
            host.clone(),
            lifecycle,
            stats,
            InterceptorConfig::default(),
        );
        Harness {
            interceptor,
            host,
            recorder,
        }
    }

    fn harness(preferences: Preferences) -> Harness {
        harness_with(preferences, Arc::new(NoopLifecycle))
    }

    async fn add(h: &Harness<impl ContainerLifecycle + 'static>, pattern: &str, kind: RuleKind, container: Option<&str>) {
        h.interceptor
            .engine()
            .add_rule(NewRule {
                container_id: container.map(str::to_string),
                pattern: pattern.to_string(),
                match_kind: MatchKind::Domain,
                rule_kind: kind,
                priority: None,
                enabled: None,
            })
            .await
            .unwrap();
    }

    fn request(url: &str, tab_id: TabId) -> RequestDetails {
        RequestDetails {
            url: url.to_string(),
            tab_id,
            is_main_frame: true,
            tab_index: Some(2),
        }
    }

    /// Let spawned stats and close tasks run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignored_requests() {
        let h = harness(Preferences::default());
        let tab = h.host.open_tab("about:blank", None);

        let mut sub = request("https://example.com", tab.id);
        sub.is_main_frame = false;
        assert_eq!(h.interceptor.on_before_request(sub).await, Outcome::Ignored);
        assert_eq!(
            h.interceptor.on_before_request(request("https://example.com", TAB_ID_NONE)).await,
            Outcome::Ignored
        );
        assert_eq!(
            h.interceptor.on_before_request(request("about:config", tab.id)).await,
            Outcome::Ignored
        );
        assert_eq!(
            h.interceptor.on_tab_updated(tab.id, "moz-extension://x/page.html", None).await,
            Outcome::Ignored
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_redirect_creates_tab_and_closes_original() {
        let h = harness(Preferences::default());
        add(&h, "mail.example.com", RuleKind::Include, Some("work")).await;
        let tab = h.host.open_tab("about:blank", None);

        let outcome = h
            .interceptor
            .on_before_request(request("https://mail.example.com/inbox", tab.id))
            .await;
        assert_eq!(outcome.verdict(), Verdict::Cancel);
        let new_tab = match &outcome {
            Outcome::Redirected { tab, .. } => tab.clone(),
            other => panic!("unexpected outcome {other:?}"),
        };
        assert_eq!(new_tab.container_id.as_deref(), Some("work"));
        assert_eq!(new_tab.index, Some(2));
        assert_eq!(new_tab.url.as_deref(), Some("https://mail.example.com/inbox"));

        // Original is still open during the grace delay
        assert!(h.host.tab(tab.id).is_some());
        settle().await;
        assert!(h.host.tab(tab.id).is_none());
        assert_eq!(h.recorder.count("work", StatsKind::Match), 1);

        // The replacement tab does not bounce again
        let again = h
            .interceptor
            .on_before_request(request("https://mail.example.com/inbox", new_tab.id))
            .await;
        assert_eq!(again.verdict(), Verdict::Proceed);
        assert!(matches!(again, Outcome::Proceeded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_old_tabs() {
        let h = harness(Preferences {
            keep_old_tabs: true,
            ..Preferences::default()
        });
        add(&h, "mail.example.com", RuleKind::Include, Some("work")).await;
        let tab = h.host.open_tab("about:blank", None);

        let outcome = h
            .interceptor
            .on_before_request(request("https://mail.example.com", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::Redirected { .. }));
        settle().await;
        assert!(h.host.tab(tab.id).is_some());
        assert_eq!(h.host.tabs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclude_notifies_and_attributes_source() {
        let mut preferences = Preferences::default();
        preferences.notifications.on_exclude = true;
        let h = harness(preferences);
        add(&h, "ads.example.com", RuleKind::Exclude, None).await;
        let tab = h.host.open_tab("about:blank", Some("work"));

        let outcome = h
            .interceptor
            .on_before_request(request("https://ads.example.com", tab.id))
            .await;
        match &outcome {
            Outcome::Excluded { tab, .. } => assert_eq!(tab.container_id, None),
            other => panic!("unexpected outcome {other:?}"),
        }
        settle().await;
        assert_eq!(h.recorder.count("work", StatsKind::Match), 1);
        assert_eq!(h.host.notices().len(), 1);
        assert!(h.host.notices()[0].message.contains("ads.example.com"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restrict_block_names_container() {
        let mut preferences = Preferences {
            restrict_action: RestrictAction::Block,
            ..Preferences::default()
        };
        preferences.notifications.on_restrict = true;
        let h = harness(preferences);
        add(&h, "bank.com", RuleKind::Restrict, Some("banking")).await;
        let tab = h.host.open_tab("about:blank", Some("personal"));

        let outcome = h
            .interceptor
            .on_before_request(request("https://bank.com/login", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::Blocked(_)));
        assert_eq!(outcome.verdict(), Verdict::Cancel);
        assert_eq!(h.host.tabs().len(), 1);

        // Notification failures do not change the outcome
        h.host.fail(HostOp::Notify);
        let again = h
            .interceptor
            .on_before_request(request("https://bank.com/login", tab.id))
            .await;
        assert!(matches!(again, Outcome::Blocked(_)));

        let notices = h.host.notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].message.contains("banking"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_records_touch_and_match() {
        let h = harness(Preferences::default());
        add(&h, "github.com", RuleKind::Include, Some("work")).await;
        let tab = h.host.open_tab("about:blank", Some("work"));

        let outcome = h
            .interceptor
            .on_before_request(request("https://github.com", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::Proceeded(_)));
        settle().await;
        assert_eq!(h.recorder.count("work", StatsKind::Touch), 1);
        assert_eq!(h.recorder.count("work", StatsKind::Match), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_open_on_host_failure() {
        let h = harness(Preferences::default());
        add(&h, "mail.example.com", RuleKind::Include, Some("work")).await;
        let tab = h.host.open_tab("about:blank", None);

        h.host.fail(HostOp::TabContainer);
        let outcome = h
            .interceptor
            .on_before_request(request("https://mail.example.com", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::FailedOpen(_)));
        assert_eq!(outcome.verdict(), Verdict::Proceed);

        h.host.recover(HostOp::TabContainer);
        h.host.fail(HostOp::CreateTab);
        let outcome = h
            .interceptor
            .on_before_request(request("https://mail.example.com", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::FailedOpen(_)));
        settle().await;
        assert!(h.host.tab(tab.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_container_hint() {
        let h = harness(Preferences::default());
        add(&h, "bank.com", RuleKind::Restrict, Some("banking")).await;
        let tab = h.host.open_tab("about:blank", None);

        // Hint moves an otherwise unruled navigation and is stripped
        let outcome = h
            .interceptor
            .on_before_request(request("https://news.org/?a=1&corral-container=personal", tab.id))
            .await;
        let moved = match &outcome {
            Outcome::Redirected { tab, result } => {
                assert_eq!(tab.container_id.as_deref(), Some("personal"));
                assert_eq!(tab.url.as_deref(), Some("https://news.org/?a=1"));
                assert_eq!(result.reason, HINT_REASON);
                tab.clone()
            }
            other => panic!("unexpected outcome {other:?}"),
        };
        let landed = h
            .interceptor
            .on_before_request(request("https://news.org/?a=1", moved.id))
            .await;
        assert!(matches!(landed, Outcome::Proceeded(_)));

        // The sentinel hint opens uncontained
        let contained = h.host.open_tab("about:blank", Some("work"));
        let outcome = h
            .interceptor
            .on_before_request(request("https://news.org/?corral-container=no-container", contained.id))
            .await;
        match &outcome {
            Outcome::Redirected { tab, .. } => assert_eq!(tab.container_id, None),
            other => panic!("unexpected outcome {other:?}"),
        }

        // Rules win over hints
        let outcome = h
            .interceptor
            .on_before_request(request("https://bank.com/?corral-container=personal", tab.id))
            .await;
        match &outcome {
            Outcome::Redirected { tab, .. } => assert_eq!(tab.container_id.as_deref(), Some("banking")),
            other => panic!("unexpected outcome {other:?}"),
        }

        // Unknown or matching hints are ignored
        let outcome = h
            .interceptor
            .on_before_request(request("https://news.org/?corral-container=ghost", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::Proceeded(_)));
        let outcome = h
            .interceptor
            .on_before_request(request("https://news.org/?corral-container=work", contained.id))
            .await;
        assert!(matches!(outcome, Outcome::Proceeded(_)));
    }

    async fn assert_hint_ignored(h: &Harness, url: &str, tab: &TabInfo) {
        let before = h.host.tabs().len();
        let outcome = h.interceptor.on_before_request(request(url, tab.id)).await;
        match &outcome {
            Outcome::Proceeded(result) => assert_ne!(result.reason, HINT_REASON),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(h.host.tabs().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_never_bounces_off_rules() {
        let h = harness(Preferences::default());
        add(&h, "bank.com", RuleKind::Restrict, Some("banking")).await;
        add(&h, "ads.example.com", RuleKind::Exclude, None).await;

        // Restrict placement wins over a hint out of the restricted container
        let banking = h.host.open_tab("about:blank", Some("banking"));
        assert_hint_ignored(&h, "https://bank.com/?corral-container=personal", &banking).await;

        // Exclude placement wins over a hint into a container
        let plain = h.host.open_tab("about:blank", None);
        assert_hint_ignored(&h, "https://ads.example.com/?corral-container=work", &plain).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hint_never_bounces_off_default_container() {
        let h = harness(Preferences {
            default_container_id: Some("personal".to_string()),
            ..Preferences::default()
        });

        // Uncontained would be sent straight back to the default container
        let work = h.host.open_tab("about:blank", Some("work"));
        assert_hint_ignored(&h, "https://news.org/?corral-container=no-container", &work).await;

        // A contained target is stable and still honored
        let outcome = h
            .interceptor
            .on_before_request(request("https://news.org/?corral-container=banking", work.id))
            .await;
        match &outcome {
            Outcome::Redirected { tab, .. } => {
                assert_eq!(tab.container_id.as_deref(), Some("banking"))
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    /// Store that counts preference reads.
    struct CountingStore {
        inner: MemoryRuleStore,
        preference_reads: AtomicUsize,
    }

    #[async_trait]
    impl RuleStore for CountingStore {
        async fn enabled_rules(&self) -> Result<Vec<Rule>, StoreError> {
            self.inner.enabled_rules().await
        }

        async fn preferences(&self) -> Result<Preferences, StoreError> {
            self.preference_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.preferences().await
        }

        async fn container_exists(&self, container_id: &str) -> Result<bool, StoreError> {
            self.inner.container_exists(container_id).await
        }

        async fn get_rule(&self, id: &str) -> Result<Option<Rule>, StoreError> {
            self.inner.get_rule(id).await
        }

        async fn insert_rule(&self, rule: Rule) -> Result<(), StoreError> {
            self.inner.insert_rule(rule).await
        }

        async fn replace_rule(&self, rule: Rule) -> Result<(), StoreError> {
            self.inner.replace_rule(rule).await
        }

        async fn delete_rule(&self, id: &str) -> Result<Rule, StoreError> {
            self.inner.delete_rule(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_preference_snapshot_per_navigation() {
        let store = CountingStore {
            inner: MemoryRuleStore::new().with_container("work"),
            preference_reads: AtomicUsize::new(0),
        };
        let engine = Arc::new(RulesEngine::new(store));
        let host = Arc::new(MemoryTabHost::new());
        let interceptor = RequestInterceptor::new(
            engine.clone(),
            host.clone(),
            Arc::new(NoopLifecycle),
            StatsDispatcher::disabled(),
            InterceptorConfig::default(),
        );
        let tab = host.open_tab("about:blank", None);

        let outcome = interceptor
            .on_before_request(request("https://news.org/?corral-container=work", tab.id))
            .await;
        assert!(matches!(outcome, Outcome::Redirected { .. }));
        assert_eq!(engine.store().preference_reads.load(Ordering::SeqCst), 1);
    }

    struct CountingLifecycle(AtomicUsize);

    #[async_trait]
    impl ContainerLifecycle for CountingLifecycle {
        async fn cleanup_empty_temporary_containers(&self) -> Result<usize, HostError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(HostError::Rejected {
                operation: "cleanup",
                reason: "busy".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tab_lifecycle() {
        let lifecycle = Arc::new(CountingLifecycle(AtomicUsize::new(0)));
        let h = harness_with(Preferences::default(), lifecycle.clone());

        let tab = TabInfo {
            id: 7,
            container_id: Some("work".to_string()),
            url: None,
            index: None,
        };
        assert_eq!(h.interceptor.handle(HostEvent::TabCreated { tab }).await, None);
        assert_eq!(h.interceptor.bindings().get(7).as_deref(), Some("work"));

        h.interceptor.handle(HostEvent::TabRemoved { tab_id: 7 }).await;
        assert!(h.interceptor.bindings().is_empty());
        settle().await;

        assert_eq!(h.recorder.count("work", StatsKind::Open), 1);
        assert_eq!(h.recorder.count("work", StatsKind::Close), 1);
        assert_eq!(lifecycle.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tab_updated_refreshes_binding() {
        let h = harness(Preferences::default());
        let tab = h.host.open_tab("about:blank", Some("personal"));

        let outcome = h
            .interceptor
            .on_tab_updated(tab.id, "https://unruled.org", None)
            .await;
        assert!(matches!(outcome, Outcome::Proceeded(_)));
        assert_eq!(h.interceptor.bindings().get(tab.id).as_deref(), Some("personal"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tab_updated_redirects_and_excludes() {
        let h = harness(Preferences::default());
        add(&h, "mail.example.com", RuleKind::Include, Some("work")).await;
        add(&h, "ads.example.com", RuleKind::Exclude, None).await;

        let plain = h.host.open_tab("about:blank", None);
        let outcome = h
            .interceptor
            .handle(HostEvent::TabUpdated {
                tab_id: plain.id,
                url: "https://mail.example.com/inbox".to_string(),
                tab_index: Some(4),
            })
            .await;
        match &outcome {
            Some(Outcome::Redirected { tab, .. }) => {
                assert_eq!(tab.container_id.as_deref(), Some("work"));
                assert_eq!(tab.index, Some(4));
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let work = h.host.open_tab("about:blank", Some("work"));
        let outcome = h
            .interceptor
            .on_tab_updated(work.id, "https://ads.example.com/banner", None)
            .await;
        match &outcome {
            Outcome::Excluded { tab, .. } => assert_eq!(tab.container_id, None),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(outcome.verdict(), Verdict::Cancel);
        assert_eq!(h.interceptor.bindings().get(work.id).as_deref(), Some("work"));

        settle().await;
        assert!(h.host.tab(plain.id).is_none());
        assert!(h.host.tab(work.id).is_none());
        assert_eq!(h.recorder.count("work", StatsKind::Match), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tab_updated_fails_open_on_host_failure() {
        let h = harness(Preferences::default());
        let tab = h.host.open_tab("about:blank", None);
        h.host.fail(HostOp::TabContainer);
        let outcome = h
            .interceptor
            .on_tab_updated(tab.id, "https://mail.example.com", None)
            .await;
        assert_eq!(outcome.verdict(), Verdict::Proceed);
    }

    #[test]
    fn test_host_event_wire_format() {
        let event: HostEvent = serde_json::from_str(
            r#"{"type":"beforeRequest","url":"https://a.com","tabId":3}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            HostEvent::BeforeRequest(RequestDetails {
                url: "https://a.com".to_string(),
                tab_id: 3,
                is_main_frame: true,
                tab_index: None,
            })
        );

        let event: HostEvent = serde_json::from_str(
            r#"{"type":"tabCreated","tab":{"id":4,"containerId":"work"}}"#,
        )
        .unwrap();
        assert!(matches!(event, HostEvent::TabCreated { .. }));
    }
}
