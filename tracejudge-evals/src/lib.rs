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

//! # Tracejudge Evaluation Engine
//!
//! LLM-as-judge evaluation of generated text. A [`Metric`] measures one
//! [`TestCase`] by prompting a judge model for structured verdicts and
//! aggregating them with metric-specific arithmetic.
//!
//! ## Built-in metrics
//!
//! - [`GEval`](evaluators::GEval): free-form rubric-based judging with
//!   derived evaluation steps and optional logprob-weighted scoring
//! - [`ContextualPrecisionMetric`](evaluators::ContextualPrecisionMetric):
//!   ranking-aware weighted cumulative precision over retrieval context
//! - [`ContextualRelevancyMetric`](evaluators::ContextualRelevancyMetric):
//!   statement-level relevance ratio over retrieval context
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tracejudge_evals::{evaluators::GEval, llm_client::OpenAiJudge, Metric, TestCase};
//!
//! #[tokio::main]
//! async fn main() {
//!     let judge = Arc::new(OpenAiJudge::new(
//!         std::env::var("OPENAI_API_KEY").unwrap(),
//!         "gpt-4o-mini".to_string(),
//!     ));
//!
//!     let mut metric = GEval::builder("Correctness", judge)
//!         .criteria("Determine whether the actual output is factually correct.")
//!         .build()
//!         .unwrap();
//!
//!     let test_case = TestCase::new("Who wrote Dune?", "Frank Herbert wrote Dune.");
//!     let score = metric.a_measure(&test_case).await.unwrap();
//!     println!("score = {score}, reason = {:?}", metric.outcome().reason);
//! }
//! ```

use async_trait::async_trait;
use thiserror::Error;

pub mod coerce;
pub mod dispatcher;
pub mod evaluate;
pub mod evaluators;
pub mod executor;
pub mod llm_client;
pub mod orchestrator;
pub mod templates;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{EvaluationSink, JudgeFactory, MetricKind, SinkError, SpanMetricsDispatcher};
pub use evaluate::{
    evaluate_with_contextual_precision, evaluate_with_contextual_relevancy, evaluate_with_g_eval,
    EvalOutcome, PersistOptions,
};
pub use executor::ExecutorHandle;
pub use llm_client::{JudgeClient, JudgeError};
pub use orchestrator::{run_metrics, BatchOptions, MetricState, MetricStatus};
pub use tracejudge_core::{EvaluationRecord, TestCase, TestCaseField};

/// Errors that can occur while constructing or running a metric.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The test case lacks a field the metric declared as required.
    #[error("metric `{metric}` requires test case field `{field}`")]
    MissingRequiredParam {
        metric: String,
        field: TestCaseField,
    },

    /// The judge model produced output that does not match the expected
    /// structure.
    #[error("failed to parse judge output: {0}")]
    Parse(String),

    /// The metric was configured inconsistently. Raised at construction
    /// time, never during measurement.
    #[error("invalid metric configuration: {0}")]
    Configuration(String),

    /// The judge model call itself failed (network, provider, rate limit).
    #[error("judge model call failed: {0}")]
    Judge(#[from] JudgeError),

    /// A per-metric deadline elapsed before the measurement finished.
    #[error("evaluation timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Per-metric settings shared by all evaluators.
#[derive(Debug, Clone)]
pub struct MetricConfig {
    /// Minimum passing score. `success == (score >= threshold)`.
    pub threshold: f64,
    /// Clamp the final score to 0 whenever it falls below the threshold.
    pub strict_mode: bool,
    /// Whether the blocking entry point drives the suspension-capable path
    /// on a tokio runtime handle instead of a local executor.
    pub async_mode: bool,
    /// Whether a second judge call generates a natural-language
    /// justification.
    pub include_reason: bool,
    /// Whether a step trace of prompts, verdicts and scores is retained on
    /// the outcome.
    pub verbose_mode: bool,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            strict_mode: false,
            async_mode: false,
            include_reason: true,
            verbose_mode: false,
        }
    }
}

/// Result state accumulated on a metric instance by one measurement.
///
/// Every call to `measure`/`a_measure` overwrites these fields; an evaluator
/// instance is therefore not safe to reuse concurrently across different
/// test cases.
#[derive(Debug, Clone, Default)]
pub struct MetricOutcome {
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub success: Option<bool>,
    pub error: Option<String>,
    /// Accumulated judge cost in USD, present when the judge meters cost.
    pub evaluation_cost: Option<f64>,
    pub verbose_logs: Option<String>,
}

impl MetricOutcome {
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn add_cost(&mut self, cost: f64) {
        *self.evaluation_cost.get_or_insert(0.0) += cost;
    }
}

/// The polymorphic unit of evaluation work.
///
/// Both entry points validate required fields first, populate the
/// [`MetricOutcome`] as a side effect, and return the final score. The
/// blocking [`measure`](Metric::measure) drives the suspension-capable path
/// on an [`ExecutorHandle`] selected from [`MetricConfig::async_mode`];
/// [`measure_with`](Metric::measure_with) takes the executor explicitly.
#[async_trait]
pub trait Metric: Send + Sync {
    fn name(&self) -> String;

    fn config(&self) -> &MetricConfig;

    /// Fields of the test case this metric cannot measure without.
    fn required_fields(&self) -> &[TestCaseField];

    fn outcome(&self) -> &MetricOutcome;

    fn outcome_mut(&mut self) -> &mut MetricOutcome;

    /// Suspension-capable measurement. The only suspension points are judge
    /// model calls; aggregation arithmetic is synchronous.
    async fn a_measure(&mut self, test_case: &TestCase) -> Result<f64, EvalError>;

    /// Blocking measurement. With `async_mode` set the measurement runs on
    /// the surrounding tokio runtime when one exists; otherwise, and in
    /// every runtime-free context, it runs on a local executor.
    fn measure(&mut self, test_case: &TestCase) -> Result<f64, EvalError> {
        let executor = ExecutorHandle::for_mode(self.config().async_mode);
        self.measure_with(test_case, &executor)
    }

    /// Blocking measurement on an explicitly supplied executor: runs
    /// [`a_measure`](Metric::a_measure) to completion on it.
    fn measure_with(
        &mut self,
        test_case: &TestCase,
        executor: &ExecutorHandle,
    ) -> Result<f64, EvalError> {
        executor.block_on(self.a_measure(test_case))
    }

    /// `false` whenever an error is recorded or no score was ever computed,
    /// otherwise `score >= threshold`. Never panics.
    fn is_successful(&self) -> bool {
        let outcome = self.outcome();
        if outcome.error.is_some() {
            return false;
        }
        match outcome.score {
            Some(score) => score >= self.config().threshold,
            None => false,
        }
    }
}

/// Fail-fast required-parameter validation shared by all metrics.
pub(crate) fn check_required_fields(
    metric: &str,
    required: &[TestCaseField],
    test_case: &TestCase,
) -> Result<(), EvalError> {
    for field in required {
        if !test_case.has(*field) {
            return Err(EvalError::MissingRequiredParam {
                metric: metric.to_string(),
                field: *field,
            });
        }
    }
    Ok(())
}

/// Assemble the verbose step trace retained on the outcome when
/// `verbose_mode` is set.
pub(crate) fn construct_verbose_logs(metric_name: &str, steps: &[String]) -> String {
    let divider = "*".repeat(metric_name.len() + 13);
    let mut out = format!("{divider}\n{metric_name} Verbose Logs\n{divider}\n\n");
    out.push_str(&steps.join("\n\n"));
    out
}

/// Pretty-print a list of serializable items for verbose traces and reason
/// prompts.
pub(crate) fn prettify<T: serde::Serialize>(items: &[T]) -> String {
    serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string())
}
