//! Corral CLI
//!
//! Tools for checking rule sets, evaluating URLs and replaying host events.

mod perf_budget;
mod rules;
mod simulate;

use std::path::Path;

use clap::{Parser, Subcommand};

use cr_core::api;
use cr_core::{validate_pattern, MatchKind, RulesEngine, NO_CONTAINER};

use perf_budget::{run_perf_budget, PerfBudgetOptions};
use simulate::{run_simulate, SimulateOptions};

#[derive(Parser)]
#[command(name = "cr-cli")]
#[command(about = "Corral container routing tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a URL against a rule set
    Evaluate {
        /// URL to evaluate
        url: String,

        /// Rule set file
        #[arg(short, long)]
        rules: String,

        /// Container the tab is currently in
        #[arg(short, long)]
        container: Option<String>,

        /// Router config file
        #[arg(long)]
        config: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Test a single pattern against a URL
    TestPattern {
        url: String,
        pattern: String,

        /// exact, domain, glob or regex
        #[arg(short = 'k', long, default_value = "domain")]
        kind: MatchKind,
    },

    /// Validate a pattern, or every rule in a rule set
    Validate {
        /// Pattern to validate
        pattern: Option<String>,

        /// Match kind of the pattern
        #[arg(short = 'k', long, default_value = "domain")]
        kind: MatchKind,

        /// Rule set file to validate instead
        #[arg(short, long, conflicts_with = "pattern")]
        rules: Option<String>,
    },

    /// Run a JSON message against a rule set
    Dispatch {
        /// Request JSON, or @file
        request: String,

        /// Rule set file
        #[arg(short, long)]
        rules: String,

        /// Write the resulting rule set back to the file
        #[arg(short, long)]
        write: bool,
    },

    /// Replay a trace of host events through the interceptor
    Simulate {
        /// Rule set file
        #[arg(short, long)]
        rules: String,

        /// Trace file
        #[arg(short, long)]
        trace: String,

        /// Router config file
        #[arg(long)]
        config: Option<String>,
    },

    /// Check evaluation latency against budgets
    PerfBudget {
        /// Rule set file (synthetic rules when absent)
        #[arg(short, long)]
        rules: Option<String>,

        /// Number of synthetic rules
        #[arg(long, default_value_t = 500)]
        synthetic: usize,

        /// Measurement rounds
        #[arg(long, default_value_t = 2000)]
        iterations: usize,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Evaluate {
            url,
            rules,
            container,
            config,
            json,
        } => cmd_evaluate(&url, &rules, container.as_deref(), config.as_deref(), json).await,
        Commands::TestPattern { url, pattern, kind } => cmd_test_pattern(&url, &pattern, kind),
        Commands::Validate {
            pattern,
            kind,
            rules,
        } => cmd_validate(pattern.as_deref(), kind, rules.as_deref()),
        Commands::Dispatch {
            request,
            rules,
            write,
        } => cmd_dispatch(&request, &rules, write).await,
        Commands::Simulate {
            rules,
            trace,
            config,
        } => {
            run_simulate(SimulateOptions {
                rules_path: rules,
                trace_path: trace,
                config_path: config,
            })
            .await
        }
        Commands::PerfBudget {
            rules,
            synthetic,
            iterations,
        } => run_perf_budget(PerfBudgetOptions {
            rules_path: rules,
            synthetic,
            iterations,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn cmd_evaluate(
    url: &str,
    rules_path: &str,
    container: Option<&str>,
    config_path: Option<&str>,
    json: bool,
) -> Result<(), String> {
    let store = rules::load_store(Path::new(rules_path))?;
    let config = rules::load_config(config_path.map(Path::new))?;
    let engine = RulesEngine::with_config(store, config.engine);

    let result = engine
        .evaluate(url, container)
        .await
        .map_err(|e| e.to_string())?;

    if json {
        let out = serde_json::to_string_pretty(&result)
            .map_err(|e| format!("Failed to serialize result: {}", e))?;
        println!("{out}");
        return Ok(());
    }

    println!("URL:       {}", url);
    println!("Current:   {}", container.unwrap_or(NO_CONTAINER));
    println!("Action:    {}", result.action);
    if let Some(target) = &result.container_id {
        println!("Container: {}", target);
    }
    if let Some(rule) = &result.matched_rule {
        println!(
            "Rule:      {} ({} {} '{}', priority {})",
            rule.id, rule.rule_kind, rule.match_kind, rule.pattern, rule.priority
        );
    }
    println!("Reason:    {}", result.reason);
    Ok(())
}

fn cmd_test_pattern(url: &str, pattern: &str, kind: MatchKind) -> Result<(), String> {
    if let Err(e) = validate_pattern(pattern, kind) {
        println!("Warning: {e}");
    }

    let matched = cr_core::matcher::matches(url, pattern, kind);
    println!("{} {} '{}' against {}", if matched { "✓ MATCH" } else { "✗ NO MATCH" }, kind, pattern, url);
    Ok(())
}

fn cmd_validate(pattern: Option<&str>, kind: MatchKind, rules_path: Option<&str>) -> Result<(), String> {
    if let Some(pattern) = pattern {
        validate_pattern(pattern, kind).map_err(|e| e.to_string())?;
        println!("✓ Valid {} pattern", kind);
        return Ok(());
    }

    let path = rules_path.ok_or("Nothing to validate: pass a pattern or --rules")?;
    let set = rules::read_rule_set(Path::new(path))?;

    let mut invalid = 0usize;
    for rule in &set.rules {
        let problem = match validate_pattern(&rule.pattern, rule.match_kind) {
            Err(e) => Some(e.to_string()),
            Ok(()) if rule.rule_kind.requires_container() => match rule.container_id.as_deref() {
                None => Some(format!("{} rule has no container", rule.rule_kind)),
                Some(id) if !set.containers.iter().any(|c| c == id) => {
                    Some(format!("unknown container '{}'", id))
                }
                Some(_) => None,
            },
            Ok(()) => None,
        };

        if let Some(problem) = problem {
            invalid += 1;
            println!("✗ {}: {}", rule.id, problem);
        }
    }

    println!("Rules:      {}", set.rules.len());
    println!("Enabled:    {}", set.rules.iter().filter(|r| r.enabled).count());
    println!("Containers: {}", set.containers.len());

    if invalid > 0 {
        return Err(format!("{} invalid rule(s)", invalid));
    }
    println!("✓ Rule set is valid");
    Ok(())
}

async fn cmd_dispatch(request: &str, rules_path: &str, write: bool) -> Result<(), String> {
    let path = Path::new(rules_path);
    let engine = RulesEngine::new(rules::load_store(path)?);
    let request = rules::read_json_arg(request)?;

    let response = api::dispatch_json(&engine, &request).await;
    println!("{response}");

    if write {
        rules::write_rule_set(path, &engine.store().snapshot())?;
    }
    Ok(())
}
