//! Message API
//!
//! Tagged JSON requests for the rule engine, as sent by a settings UI or any
//! other front end. Every request gets exactly one response; failures come
//! back as `Response::Error` instead of propagating.

use serde::{Deserialize, Serialize};

use crate::engine::{NewRule, RuleUpdate, RulesEngine};
use crate::store::RuleStore;
use crate::types::{EvaluationResult, MatchKind, Rule};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    AddRule {
        rule: NewRule,
    },
    #[serde(rename_all = "camelCase")]
    UpdateRule {
        id: String,
        #[serde(default)]
        updates: RuleUpdate,
    },
    RemoveRule {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    Evaluate {
        url: String,
        #[serde(default)]
        current_container_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TestPattern {
        url: String,
        pattern: String,
        match_kind: MatchKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    Rule { rule: Rule },
    Removed { rule: Rule },
    Evaluation { result: EvaluationResult },
    PatternResult { matches: bool },
    Error { message: String },
}

impl Response {
    fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

/// Run one request against `engine`.
pub async fn dispatch<S: RuleStore>(engine: &RulesEngine<S>, request: Request) -> Response {
    let outcome = match request {
        Request::AddRule { rule } => engine.add_rule(rule).await.map(|rule| Response::Rule { rule }),
        Request::UpdateRule { id, updates } => engine
            .update_rule(&id, updates)
            .await
            .map(|rule| Response::Rule { rule }),
        Request::RemoveRule { id } => engine
            .remove_rule(&id)
            .await
            .map(|rule| Response::Removed { rule }),
        Request::Evaluate {
            url,
            current_container_id,
        } => engine
            .evaluate(&url, current_container_id.as_deref())
            .await
            .map(|result| Response::Evaluation { result }),
        Request::TestPattern {
            url,
            pattern,
            match_kind,
        } => Ok(Response::PatternResult {
            matches: engine.test_pattern(&url, &pattern, match_kind),
        }),
    };

    outcome.unwrap_or_else(|e| {
        log::debug!("Request failed: {e}");
        Response::error(e)
    })
}

/// Parse a JSON request, run it, and serialize the response.
pub async fn dispatch_json<S: RuleStore>(engine: &RulesEngine<S>, json: &str) -> String {
    let response = match serde_json::from_str::<Request>(json) {
        Ok(request) => dispatch(engine, request).await,
        Err(e) => Response::error(format!("Malformed request: {e}")),
    };

    serde_json::to_string(&response).unwrap_or_else(|e| {
        format!(r#"{{"type":"error","message":"Failed to serialize response: {e}"}}"#)
    })
}
