// Copyright 2025 Tracejudge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Span-driven metric dispatch.
//!
//! Instrumented spans carry their evaluation intent as attributes: a
//! `metrics.configs` JSON object describing which metrics to run with what
//! settings, and a `gen_ai.normalized_input_output` payload holding the
//! prompt/completion text. The dispatcher parses both tolerantly, runs each
//! configured metric, and records results through an [`EvaluationSink`].
//! One malformed metric config never takes down its neighbors.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use tracejudge_core::{EvaluationRecord, TestCase};

use crate::coerce::{coerce_bool, coerce_threshold};
use crate::evaluate::{
    evaluate_with_contextual_precision, evaluate_with_contextual_relevancy, evaluate_with_g_eval,
    EvalOutcome, PersistOptions,
};
use crate::llm_client::JudgeClient;
use crate::MetricConfig;

/// Span attribute holding the metric configuration object.
pub const METRICS_CONFIGS_KEY: &str = "metrics.configs";
/// Span attribute holding the normalized prompt/completion payload.
pub const NORMALIZED_IO_KEY: &str = "gen_ai.normalized_input_output";

const DEFAULT_JUDGE_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(String),
}

/// Destination for evaluation records. Implementations own ID minting and
/// storage layout.
pub trait EvaluationSink: Send + Sync {
    fn insert_evaluation(&self, record: &EvaluationRecord) -> Result<String, SinkError>;
}

/// The closed set of metric types a span config can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    GEval,
    ContextualRelevancy,
    ContextualPrecision,
}

impl MetricKind {
    /// Parse a config `type` tag. Unknown tags return `None` so callers can
    /// skip them instead of failing.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "GEvalEvaluator" => Some(MetricKind::GEval),
            "ContextualRelevancyMetric" => Some(MetricKind::ContextualRelevancy),
            "ContextualPrecisionMetric" => Some(MetricKind::ContextualPrecision),
            _ => None,
        }
    }
}

/// Builds a judge client for a model name from a span config.
pub type JudgeFactory = Box<dyn Fn(&str) -> Arc<dyn JudgeClient> + Send + Sync>;

pub struct SpanMetricsDispatcher {
    judge_factory: JudgeFactory,
    sink: Arc<dyn EvaluationSink>,
}

impl SpanMetricsDispatcher {
    pub fn new(judge_factory: JudgeFactory, sink: Arc<dyn EvaluationSink>) -> Self {
        Self {
            judge_factory,
            sink,
        }
    }

    /// Run every metric configured on a span's attributes against its
    /// prompt/completion text. Returns the outcome per executed metric;
    /// metrics with unknown types or unusable configs are skipped with a
    /// warning.
    pub async fn process_span(
        &self,
        attrs: &HashMap<String, String>,
        span_id: &str,
        trace_id: &str,
        span_name: &str,
    ) -> Vec<(String, EvalOutcome)> {
        let mut results = Vec::new();

        let (Some(configs_raw), Some(nio_raw)) =
            (attrs.get(METRICS_CONFIGS_KEY), attrs.get(NORMALIZED_IO_KEY))
        else {
            return results;
        };

        let configs: serde_json::Map<String, Value> = match serde_json::from_str(configs_raw) {
            Ok(configs) => configs,
            Err(e) => {
                warn!(span_id, error = %e, "unparseable metrics.configs attribute");
                return results;
            }
        };
        let nio: Value = match serde_json::from_str(nio_raw) {
            Ok(nio) => nio,
            Err(e) => {
                warn!(span_id, error = %e, "unparseable normalized input/output attribute");
                return results;
            }
        };

        let input = nio["prompts"][0]["content"].as_str().unwrap_or("");
        let output = nio["completions"][0]["content"].as_str().unwrap_or("");
        if input.is_empty() || output.is_empty() {
            return results;
        }

        let persist = PersistOptions {
            parent_id: span_id.to_string(),
            parent_type: "span".to_string(),
            project_id: None,
            source: "automatic".to_string(),
            tags: None,
            meta: Some(serde_json::json!({
                "trace_id": trace_id,
                "span_name": span_name,
            })),
        };

        for (metric_name, config) in &configs {
            let Some(tag) = config.get("type").and_then(Value::as_str) else {
                warn!(span_id, metric = %metric_name, "metric config has no type, skipping");
                continue;
            };
            let Some(kind) = MetricKind::parse(tag) else {
                warn!(span_id, metric = %metric_name, r#type = tag, "unknown metric type, skipping");
                continue;
            };

            let outcome = self
                .run_metric(kind, metric_name, config, input, output, &persist)
                .await;
            if let Some(error) = &outcome.error {
                warn!(span_id, metric = %metric_name, error = %error, "metric evaluation failed");
            }
            results.push((metric_name.clone(), outcome));
        }
        results
    }

    async fn run_metric(
        &self,
        kind: MetricKind,
        metric_name: &str,
        config: &Value,
        input: &str,
        output: &str,
        persist: &PersistOptions,
    ) -> EvalOutcome {
        let model = config
            .get("evaluation_model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_JUDGE_MODEL);
        let judge = (self.judge_factory)(model);
        let metric_config = metric_config_from(config);

        match kind {
            MetricKind::GEval => {
                let Some(criteria) = config.get("criteria").and_then(Value::as_str) else {
                    return EvalOutcome::failed("metric config is missing criteria".to_string());
                };
                evaluate_with_g_eval(
                    judge,
                    metric_name,
                    criteria,
                    None,
                    TestCase::new(input, output),
                    metric_config,
                    Some((self.sink.as_ref(), persist)),
                )
                .await
            }
            MetricKind::ContextualRelevancy => {
                let retrieval_context = parse_retrieval_context(config.get("retrieval_context"));
                evaluate_with_contextual_relevancy(
                    judge,
                    Some(metric_name),
                    TestCase::new(input, output).with_retrieval_context(retrieval_context),
                    metric_config,
                    Some((self.sink.as_ref(), persist)),
                )
                .await
            }
            MetricKind::ContextualPrecision => {
                let retrieval_context = parse_retrieval_context(config.get("retrieval_context"));
                evaluate_with_contextual_precision(
                    judge,
                    Some(metric_name),
                    TestCase::new(input, output)
                        .with_expected_output("")
                        .with_retrieval_context(retrieval_context),
                    metric_config,
                    Some((self.sink.as_ref(), persist)),
                )
                .await
            }
        }
    }
}

fn metric_config_from(config: &Value) -> MetricConfig {
    MetricConfig {
        threshold: coerce_threshold(config.get("threshold")),
        strict_mode: coerce_bool(config.get("strict_mode")),
        async_mode: coerce_bool(config.get("async_mode")),
        include_reason: match config.get("include_reason") {
            Some(value) => coerce_bool(Some(value)),
            None => true,
        },
        verbose_mode: coerce_bool(config.get("verbose_mode")),
    }
}

/// Read a retrieval context that may be a JSON array or a string-encoded
/// one. Python-style single-quoted lists get a normalization retry;
/// anything unparseable degrades to an empty context with a warning.
pub(crate) fn parse_retrieval_context(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(raw)) => {
            if let Ok(parsed) = serde_json::from_str::<Vec<String>>(raw) {
                return parsed;
            }
            let normalized = raw.replace('\'', "\"");
            match serde_json::from_str::<Vec<String>>(&normalized) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, raw, "unparseable retrieval_context, using empty context");
                    Vec::new()
                }
            }
        }
        Some(other) => {
            warn!(?other, "unexpected retrieval_context shape, using empty context");
            Vec::new()
        }
    }
}
