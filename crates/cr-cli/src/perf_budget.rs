use std::path::Path;
use std::time::Instant;

use cr_core::{EngineConfig, MemoryRuleStore, Preferences, Rule, RulesEngine};

use crate::rules::{self, synthetic_rules};

pub struct PerfBudgetOptions {
    pub rules_path: Option<String>,
    pub synthetic: usize,
    pub iterations: usize,
}

const BUDGET_LOAD_MS: f64 = 100.0;
const BUDGET_EVAL_P99_US: f64 = 1000.0;
const BUDGET_CACHED_P99_US: f64 = 50.0;

const BUDGET_URLS: [(&str, Option<&str>); 6] = [
    ("https://mail.example.com/inbox?folder=1", None),
    ("https://www.bank.com/login", Some("personal")),
    ("https://ads.example.com/pixel.gif", Some("work")),
    ("https://github.com/rust-lang/rust", Some("work")),
    ("https://app.host17.org/dashboard", None),
    ("https://unruled.test/", None),
];

pub fn run_perf_budget(opts: PerfBudgetOptions) -> Result<(), String> {
    println!("Performance Budget Check");
    println!("==================================================");

    println!("Loading rules...");
    let load_begin = Instant::now();
    let (rules, preferences) = match &opts.rules_path {
        Some(path) => {
            let store = rules::load_store(Path::new(path))?;
            (store.enabled_rules_now(), store.preferences_now())
        }
        None => (synthetic_rules(opts.synthetic), Preferences::default()),
    };
    let load_ms = load_begin.elapsed().as_secs_f64() * 1000.0;
    println!("  {} enabled rules", rules.len());

    let uncached = RulesEngine::with_config(
        MemoryRuleStore::new(),
        EngineConfig {
            cache_capacity: 0,
            ..EngineConfig::default()
        },
    );
    let cached = RulesEngine::with_config(MemoryRuleStore::new(), EngineConfig::default());

    println!("Warming up...");
    for _ in 0..100 {
        measure(&uncached, &rules, &preferences, 1);
    }

    println!("Measuring evaluation latency...");
    let eval = measure(&uncached, &rules, &preferences, opts.iterations);
    let hits = measure(&cached, &rules, &preferences, opts.iterations);

    let mut passed = true;
    println!();
    println!("Results");
    println!("--------------------------------------------------");

    passed &= report_budget("Rule Load", load_ms, BUDGET_LOAD_MS, "ms");
    println!("  Evaluate P50: {:.2} μs", percentile(&eval, 0.50));
    passed &= report_budget("Evaluate P99 Latency", percentile(&eval, 0.99), BUDGET_EVAL_P99_US, "μs");
    println!("  Cached P50: {:.2} μs", percentile(&hits, 0.50));
    passed &= report_budget("Cached P99 Latency", percentile(&hits, 0.99), BUDGET_CACHED_P99_US, "μs");

    println!();
    println!("==================================================");

    if passed {
        println!("✓ All performance budgets passed");
        Ok(())
    } else {
        Err("Performance budget exceeded".to_string())
    }
}

fn report_budget(name: &str, actual: f64, limit: f64, unit: &str) -> bool {
    let passed = actual <= limit;
    let status = if passed { "✓" } else { "✗" };
    println!(
        "{} {}: {:.2} {} (limit: {:.2} {})",
        status, name, actual, unit, limit, unit
    );
    passed
}

/// Sorted per-evaluation latencies in microseconds.
fn measure(
    engine: &RulesEngine<MemoryRuleStore>,
    rules: &[Rule],
    preferences: &Preferences,
    iterations: usize,
) -> Vec<f64> {
    let mut latencies = Vec::with_capacity(iterations * BUDGET_URLS.len());

    for _ in 0..iterations {
        for (url, container) in BUDGET_URLS {
            let start = Instant::now();
            let _ = engine.evaluate_snapshot(rules, preferences, url, container);
            latencies.push(start.elapsed().as_secs_f64() * 1_000_000.0);
        }
    }

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latencies
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p).ceil() as usize;
    let idx = idx.saturating_sub(1).min(sorted.len() - 1);
    sorted[idx]
}
