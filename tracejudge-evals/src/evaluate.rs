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

//! One-shot evaluation helpers.
//!
//! Each helper builds an evaluator from plain arguments, measures a test
//! case, optionally forwards an [`EvaluationRecord`] to a sink, and folds
//! any failure into the returned [`EvalOutcome`] instead of propagating it.
//! This is the forgiving surface used by the dispatcher; library callers
//! who want typed errors use the [`Metric`] trait directly.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use tracejudge_core::{EvaluationRecord, TestCase, TestCaseField};

use crate::dispatcher::EvaluationSink;
use crate::evaluators::{ContextualPrecisionMetric, ContextualRelevancyMetric, GEval};
use crate::llm_client::JudgeClient;
use crate::{Metric, MetricConfig};

/// Where and how to record a measurement.
#[derive(Debug, Clone)]
pub struct PersistOptions {
    pub parent_id: String,
    pub parent_type: String,
    pub project_id: Option<String>,
    /// Origin of the evaluation, e.g. "manual" or "automatic".
    pub source: String,
    pub tags: Option<Vec<String>>,
    pub meta: Option<serde_json::Value>,
}

impl PersistOptions {
    pub fn for_span(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            parent_type: "span".to_string(),
            project_id: None,
            source: "manual".to_string(),
            tags: None,
            meta: None,
        }
    }
}

/// Flattened result of a one-shot evaluation.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub score: f64,
    pub reason: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub evaluation_cost: Option<f64>,
}

impl EvalOutcome {
    pub(crate) fn failed(detail: String) -> Self {
        Self {
            score: 0.0,
            reason: Some(format!("Evaluation failed: {detail}")),
            success: false,
            error: Some(detail),
            evaluation_cost: None,
        }
    }
}

fn merge_meta(base: serde_json::Value, extra: Option<&serde_json::Value>) -> serde_json::Value {
    let mut merged = base;
    if let (Some(serde_json::Value::Object(extra)), Some(target)) =
        (extra, merged.as_object_mut())
    {
        for (key, value) in extra {
            target.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Run a measured metric's result through the sink when persistence was
/// requested. Sink failures fail the whole helper, mirroring the metric
/// error path.
fn persist_outcome(
    metric: &dyn Metric,
    model: &str,
    eval_type: &str,
    base_meta: serde_json::Value,
    persist: Option<(&dyn EvaluationSink, &PersistOptions)>,
) -> Result<(), String> {
    let Some((sink, options)) = persist else {
        return Ok(());
    };
    let outcome = metric.outcome();
    let record = EvaluationRecord {
        metric_name: metric.name(),
        score: outcome.score.unwrap_or(0.0),
        reason: outcome.reason.clone(),
        parent_id: options.parent_id.clone(),
        parent_type: options.parent_type.clone(),
        project_id: options.project_id.clone(),
        source: options.source.clone(),
        model: model.to_string(),
        eval_type: eval_type.to_string(),
        tags: options.tags.clone(),
        meta: Some(merge_meta(base_meta, options.meta.as_ref())),
    };
    sink.insert_evaluation(&record)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn flatten(metric: &dyn Metric) -> EvalOutcome {
    let outcome = metric.outcome();
    EvalOutcome {
        score: outcome.score.unwrap_or(0.0),
        reason: outcome.reason.clone(),
        success: metric.is_successful(),
        error: outcome.error.clone(),
        evaluation_cost: outcome.evaluation_cost,
    }
}

/// Criteria-driven evaluation of one input/output pair.
///
/// Optional test case fields widen the fields shown to the judge: a test
/// case carrying `expected_output` or contexts gets them included in the
/// evaluation parameters automatically. Supplied evaluation steps take the
/// place of the criteria for the judge; the criteria is still recorded in
/// the persisted metadata.
pub async fn evaluate_with_g_eval(
    judge: Arc<dyn JudgeClient>,
    name: &str,
    criteria: &str,
    evaluation_steps: Option<Vec<String>>,
    test_case: TestCase,
    config: MetricConfig,
    persist: Option<(&dyn EvaluationSink, &PersistOptions)>,
) -> EvalOutcome {
    let mut params = vec![TestCaseField::Input, TestCaseField::ActualOutput];
    for field in [
        TestCaseField::ExpectedOutput,
        TestCaseField::Context,
        TestCaseField::RetrievalContext,
    ] {
        if test_case.has(field) {
            params.push(field);
        }
    }

    let mut builder = GEval::builder(name, Arc::clone(&judge))
        .evaluation_params(params)
        .include_suffix(false);
    builder = match evaluation_steps {
        Some(steps) if !steps.is_empty() => builder.evaluation_steps(steps),
        _ => builder.criteria(criteria),
    };
    builder = builder
        .threshold(config.threshold)
        .strict_mode(config.strict_mode)
        .async_mode(config.async_mode)
        .verbose_mode(config.verbose_mode);

    let mut metric = match builder.build() {
        Ok(metric) => metric,
        Err(e) => return EvalOutcome::failed(e.to_string()),
    };

    if let Err(e) = metric.a_measure(&test_case).await {
        return EvalOutcome::failed(e.to_string());
    }

    let base_meta = json!({
        "input": test_case.input,
        "output": test_case.actual_output,
        "criteria": criteria,
        "threshold": config.threshold,
    });
    if let Err(detail) = persist_outcome(&metric, judge.model_name(), "geval", base_meta, persist) {
        warn!(metric = %metric.name(), error = %detail, "failed to persist evaluation");
        return EvalOutcome::failed(detail);
    }
    flatten(&metric)
}

/// Relevance of the retrieval context to the input.
pub async fn evaluate_with_contextual_relevancy(
    judge: Arc<dyn JudgeClient>,
    name: Option<&str>,
    test_case: TestCase,
    config: MetricConfig,
    persist: Option<(&dyn EvaluationSink, &PersistOptions)>,
) -> EvalOutcome {
    let threshold = config.threshold;
    let mut metric = ContextualRelevancyMetric::with_config(Arc::clone(&judge), config);
    if let Some(name) = name {
        metric = metric.with_name(name);
    }

    if let Err(e) = metric.a_measure(&test_case).await {
        return EvalOutcome::failed(e.to_string());
    }

    let base_meta = json!({
        "input": test_case.input,
        "output": test_case.actual_output,
        "threshold": threshold,
    });
    if let Err(detail) = persist_outcome(
        &metric,
        judge.model_name(),
        "contextual_relevancy",
        base_meta,
        persist,
    ) {
        warn!(metric = %metric.name(), error = %detail, "failed to persist evaluation");
        return EvalOutcome::failed(detail);
    }
    flatten(&metric)
}

/// Ranking quality of the retrieval context against an expected output.
pub async fn evaluate_with_contextual_precision(
    judge: Arc<dyn JudgeClient>,
    name: Option<&str>,
    test_case: TestCase,
    config: MetricConfig,
    persist: Option<(&dyn EvaluationSink, &PersistOptions)>,
) -> EvalOutcome {
    let threshold = config.threshold;
    let mut metric = ContextualPrecisionMetric::with_config(Arc::clone(&judge), config);
    if let Some(name) = name {
        metric = metric.with_name(name);
    }

    if let Err(e) = metric.a_measure(&test_case).await {
        return EvalOutcome::failed(e.to_string());
    }

    let base_meta = json!({
        "input": test_case.input,
        "output": test_case.actual_output,
        "threshold": threshold,
    });
    if let Err(detail) = persist_outcome(
        &metric,
        judge.model_name(),
        "contextual_precision",
        base_meta,
        persist,
    ) {
        warn!(metric = %metric.name(), error = %detail, "failed to persist evaluation");
        return EvalOutcome::failed(detail);
    }
    flatten(&metric)
}
