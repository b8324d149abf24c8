//! WebAssembly bindings for Corral

use wasm_bindgen::prelude::*;

use cr_core::cache::Clock;
use cr_core::url::{extract_domain as core_extract_domain, is_valid_url as core_is_valid_url, normalize};
use cr_core::{
    EngineConfig, EvaluationResult, MatchKind, MemoryRuleStore, RuleSet, RulesEngine,
};

/// Millisecond clock backed by `Date.now()`; `Instant` is unavailable in the browser.
struct JsClock;

impl Clock for JsClock {
    fn now_millis(&self) -> u64 {
        js_sys::Date::now().max(0.0) as u64
    }
}

// =============================================================================
// Logging
// =============================================================================

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = JsValue::from_str(&format!("[corral] {}: {}", record.target(), record.args()));
        match record.level() {
            log::Level::Error => web_sys::console::error_1(&line),
            log::Level::Warn => web_sys::console::warn_1(&line),
            log::Level::Info => web_sys::console::info_1(&line),
            log::Level::Debug | log::Level::Trace => web_sys::console::debug_1(&line),
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Route `log` output to the browser console. Later calls only change the level.
#[wasm_bindgen]
pub fn init_logging(level: Option<String>) {
    let filter = level
        .as_deref()
        .and_then(|level| level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Warn);
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
}

// =============================================================================
// Router
// =============================================================================

/// Rules engine over an in-memory rule set supplied by the extension.
#[wasm_bindgen]
pub struct Router {
    engine: RulesEngine<MemoryRuleStore>,
    config: EngineConfig,
}

#[wasm_bindgen]
impl Router {
    /// Create an empty router. `config_json` is an optional engine config.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<Router, JsValue> {
        let config = match config_json.as_deref() {
            Some(json) if !json.trim().is_empty() => serde_json::from_str::<EngineConfig>(json)
                .map_err(|e| JsValue::from_str(&format!("Invalid config: {e}")))?,
            _ => EngineConfig::default(),
        };
        Ok(Router {
            engine: build_engine(MemoryRuleStore::new(), &config),
            config,
        })
    }

    /// Replace the rule set with a `{containers, preferences, rules}` document.
    pub fn load(&mut self, rule_set_json: &str) -> Result<(), JsValue> {
        let set = RuleSet::from_json(rule_set_json)
            .map_err(|e| JsValue::from_str(&format!("Failed to parse rule set: {e}")))?;
        let store = MemoryRuleStore::from_rule_set(set)
            .map_err(|e| JsValue::from_str(&format!("Failed to load rule set: {e}")))?;
        self.engine = build_engine(store, &self.config);
        log::debug!("Loaded {} rules", self.engine.store().rule_count());
        Ok(())
    }

    pub fn evaluate(&self, url: &str, current_container_id: Option<String>) -> Result<JsValue, JsValue> {
        let url = url.trim();
        if url.is_empty() {
            return Err(JsValue::from_str("url is required"));
        }

        let store = self.engine.store();
        let result = self.engine.evaluate_snapshot(
            &store.enabled_rules_now(),
            &store.preferences_now(),
            url,
            current_container_id.as_deref(),
        );
        Ok(result_to_js(&result))
    }

    #[wasm_bindgen(js_name = cacheSize)]
    pub fn cache_size(&self) -> u32 {
        self.engine.cache_len() as u32
    }

    #[wasm_bindgen(js_name = ruleCount)]
    pub fn rule_count(&self) -> u32 {
        self.engine.store().rule_count() as u32
    }

    #[wasm_bindgen(js_name = purgeExpired)]
    pub fn purge_expired(&self) -> u32 {
        self.engine.purge_expired() as u32
    }

    #[wasm_bindgen(js_name = clearCache)]
    pub fn clear_cache(&self) {
        self.engine.clear_cache();
    }
}

fn build_engine(store: MemoryRuleStore, config: &EngineConfig) -> RulesEngine<MemoryRuleStore> {
    RulesEngine::with_clock(store, config.clone(), Box::new(JsClock))
}

fn result_to_js(result: &EvaluationResult) -> JsValue {
    let obj = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&obj, &"action".into(), &JsValue::from_str(result.action.as_str()));
    if let Some(container) = &result.container_id {
        let _ = js_sys::Reflect::set(&obj, &"containerId".into(), &JsValue::from_str(container));
    }
    if let Some(rule) = &result.matched_rule {
        let _ = js_sys::Reflect::set(&obj, &"ruleId".into(), &JsValue::from_str(&rule.id));
        let _ = js_sys::Reflect::set(&obj, &"ruleKind".into(), &JsValue::from_str(rule.rule_kind.as_str()));
    }
    let _ = js_sys::Reflect::set(&obj, &"reason".into(), &JsValue::from_str(&result.reason));
    obj.into()
}

// =============================================================================
// Pattern Utilities
// =============================================================================

fn parse_kind(match_kind: &str) -> Result<MatchKind, String> {
    match_kind.parse::<MatchKind>()
}

#[wasm_bindgen]
pub fn test_pattern(url: &str, pattern: &str, match_kind: &str) -> Result<bool, JsValue> {
    let kind = parse_kind(match_kind).map_err(|e| JsValue::from_str(&e))?;
    Ok(cr_core::matcher::matches(url, pattern, kind))
}

/// Returns `{valid: true}` or `{valid: false, error}`.
#[wasm_bindgen]
pub fn validate_pattern(pattern: &str, match_kind: &str) -> JsValue {
    let outcome = parse_kind(match_kind)
        .and_then(|kind| cr_core::validate_pattern(pattern, kind).map_err(|e| e.to_string()));

    let obj = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&obj, &"valid".into(), &JsValue::from(outcome.is_ok()));
    if let Err(error) = outcome {
        let _ = js_sys::Reflect::set(&obj, &"error".into(), &JsValue::from_str(&error));
    }
    obj.into()
}

#[wasm_bindgen]
pub fn normalize_url(url: &str) -> String {
    normalize(url)
}

#[wasm_bindgen]
pub fn extract_domain(url: &str) -> String {
    core_extract_domain(url)
}

#[wasm_bindgen]
pub fn is_valid_url(url: &str) -> bool {
    core_is_valid_url(url)
}
