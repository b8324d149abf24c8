//! Replays a trace of host events through the interceptor.
//!
//! The trace is a JSON document `{"tabs": [...], "events": [...]}`. Tabs are
//! open before the first event. Tabs the interceptor opens or closes are
//! reported back as `tabCreated` and `tabRemoved`, the way a browser would.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use cr_core::{RuleSet, RulesEngine, MemoryRuleStore, NO_CONTAINER};
use cr_intercept::{
    spawn_cache_sweeper, HostEvent, MemoryStatsRecorder, MemoryTabHost, NoopLifecycle, Outcome,
    RequestInterceptor, RouterConfig, StatsDispatcher, StatsKind, TabInfo,
};

use crate::rules;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Trace {
    pub tabs: Vec<TabInfo>,
    pub events: Vec<HostEvent>,
}

pub struct StepReport {
    pub event: HostEvent,
    pub outcome: Option<Outcome>,
}

pub struct SimulationReport {
    pub steps: Vec<StepReport>,
    pub stats: BTreeMap<(String, StatsKind), usize>,
    pub tabs: Vec<TabInfo>,
}

pub struct SimulateOptions {
    pub rules_path: String,
    pub trace_path: String,
    pub config_path: Option<String>,
}

pub async fn run_simulate(opts: SimulateOptions) -> Result<(), String> {
    let set = rules::read_rule_set(Path::new(&opts.rules_path))?;
    let trace_json = std::fs::read_to_string(&opts.trace_path)
        .map_err(|e| format!("Failed to read '{}': {}", opts.trace_path, e))?;
    let trace: Trace = serde_json::from_str(&trace_json)
        .map_err(|e| format!("Invalid trace '{}': {}", opts.trace_path, e))?;
    let config = rules::load_config(opts.config_path.as_deref().map(Path::new))?;

    let report = simulate(set, trace, &config).await?;

    println!("Events");
    println!("--------------------------------------------------");
    for (i, step) in report.steps.iter().enumerate() {
        println!("{:>3}  {:<40} {}", i + 1, describe_event(&step.event), describe_outcome(step.outcome.as_ref()));
    }

    println!();
    println!("Stats");
    println!("--------------------------------------------------");
    if report.stats.is_empty() {
        println!("  (none)");
    }
    for ((container, kind), count) in &report.stats {
        println!("  {:<20} {:<6} {}", container, format!("{kind:?}").to_lowercase(), count);
    }

    println!();
    println!("Tabs");
    println!("--------------------------------------------------");
    for tab in &report.tabs {
        println!(
            "  #{:<4} {:<20} {}",
            tab.id,
            tab.container_id.as_deref().unwrap_or(NO_CONTAINER),
            tab.url.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

/// Run `trace` against `set` with in-memory collaborators.
pub async fn simulate(set: RuleSet, trace: Trace, config: &RouterConfig) -> Result<SimulationReport, String> {
    let store = MemoryRuleStore::from_rule_set(set).map_err(|e| e.to_string())?;
    let engine = Arc::new(RulesEngine::with_config(store, config.engine.clone()));
    let host = Arc::new(MemoryTabHost::new());
    for tab in trace.tabs {
        host.insert_tab(tab);
    }

    let recorder = Arc::new(MemoryStatsRecorder::new());
    let (stats, drain) = StatsDispatcher::spawn(recorder.clone(), config.stats_queue);
    let sweeper = config
        .interceptor
        .sweep_interval()
        .map(|every| spawn_cache_sweeper(engine.clone(), every));

    let interceptor = RequestInterceptor::new(
        engine,
        host.clone(),
        Arc::new(NoopLifecycle),
        stats,
        config.interceptor.clone(),
    );

    // Seed bindings for tabs that already exist
    for tab in host.tabs() {
        interceptor.on_tab_created(&tab);
    }

    let mut steps = Vec::with_capacity(trace.events.len());
    let mut removed = BTreeSet::new();
    for event in trace.events {
        if let HostEvent::TabRemoved { tab_id } = &event {
            removed.insert(*tab_id);
        }
        let outcome = interceptor.handle(event.clone()).await;
        if let Some(Outcome::Redirected { tab, .. } | Outcome::Excluded { tab, .. }) = &outcome {
            interceptor.on_tab_created(tab);
        }
        steps.push(StepReport { event, outcome });
    }

    // Let delayed closes finish, then report them
    let before: Vec<_> = host.tabs().into_iter().map(|tab| tab.id).collect();
    tokio::time::sleep(config.interceptor.close_grace() + Duration::from_millis(50)).await;
    for tab_id in before {
        if removed.contains(&tab_id) || host.tab(tab_id).is_some() {
            continue;
        }
        let event = HostEvent::TabRemoved { tab_id };
        let outcome = interceptor.handle(event.clone()).await;
        steps.push(StepReport { event, outcome });
    }
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    drop(interceptor);
    drain.await.map_err(|e| format!("Stats task failed: {}", e))?;

    let mut stats = BTreeMap::new();
    for event in recorder.events() {
        *stats.entry((event.container_id, event.kind)).or_insert(0) += 1;
    }

    Ok(SimulationReport {
        steps,
        stats,
        tabs: host.tabs(),
    })
}

fn describe_event(event: &HostEvent) -> String {
    match event {
        HostEvent::BeforeRequest(details) => format!("request  #{} {}", details.tab_id, details.url),
        HostEvent::TabUpdated { tab_id, url, .. } => format!("updated  #{} {}", tab_id, url),
        HostEvent::TabCreated { tab } => format!(
            "created  #{} in {}",
            tab.id,
            tab.container_id.as_deref().unwrap_or(NO_CONTAINER)
        ),
        HostEvent::TabRemoved { tab_id } => format!("removed  #{}", tab_id),
    }
}

fn describe_outcome(outcome: Option<&Outcome>) -> String {
    match outcome {
        None => String::new(),
        Some(Outcome::Redirected { tab, result }) | Some(Outcome::Excluded { tab, result }) => format!(
            "-> {} to #{} in {} ({})",
            outcome.map(Outcome::name).unwrap_or_default(),
            tab.id,
            tab.container_id.as_deref().unwrap_or(NO_CONTAINER),
            result.reason
        ),
        Some(Outcome::FailedOpen(error)) => format!("-> failed-open: {}", error),
        Some(other) => match other.result() {
            Some(result) => format!("-> {} ({})", other.name(), result.reason),
            None => format!("-> {}", other.name()),
        },
    }
}
