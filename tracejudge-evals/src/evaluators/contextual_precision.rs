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

//! Ranking-aware retrieval precision.
//!
//! One judge call produces a relevance verdict per retrieval node, in the
//! retriever's ranking order. The score is the average precision-at-k over
//! the relevant positions, so relevant nodes ranked above irrelevant ones
//! score higher than the same nodes ranked below them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tracejudge_core::{TestCase, TestCaseField};

use crate::evaluators::generate_judged;
use crate::llm_client::JudgeClient;
use crate::templates::ContextualPrecisionTemplate;
use crate::{
    check_required_fields, construct_verbose_logs, prettify, EvalError, Metric, MetricConfig,
    MetricOutcome,
};

const REQUIRED_FIELDS: &[TestCaseField] = &[
    TestCaseField::Input,
    TestCaseField::ActualOutput,
    TestCaseField::ExpectedOutput,
    TestCaseField::RetrievalContext,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrecisionVerdict {
    pub verdict: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerdictsSchema {
    verdicts: Vec<PrecisionVerdict>,
}

#[derive(Debug, Deserialize)]
struct ReasonSchema {
    reason: String,
}

/// Whether relevant retrieval nodes are ranked above irrelevant ones.
pub struct ContextualPrecisionMetric {
    name: Option<String>,
    judge: Arc<dyn JudgeClient>,
    config: MetricConfig,
    /// Overrides the test case's retrieval context when set.
    retrieval_context: Option<Vec<String>>,
    verdicts: Vec<PrecisionVerdict>,
    outcome: MetricOutcome,
}

impl ContextualPrecisionMetric {
    pub fn new(judge: Arc<dyn JudgeClient>) -> Self {
        Self::with_config(judge, MetricConfig::default())
    }

    pub fn with_config(judge: Arc<dyn JudgeClient>, config: MetricConfig) -> Self {
        Self {
            name: None,
            judge,
            config,
            retrieval_context: None,
            verdicts: Vec::new(),
            outcome: MetricOutcome::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retrieval_context(mut self, retrieval_context: Vec<String>) -> Self {
        self.retrieval_context = Some(retrieval_context);
        self
    }

    /// The per-node verdicts from the last measurement, in ranking order.
    pub fn verdicts(&self) -> &[PrecisionVerdict] {
        &self.verdicts
    }

    async fn generate_verdicts(
        &mut self,
        input: &str,
        expected_output: &str,
        retrieval_context: &[String],
    ) -> Result<Vec<PrecisionVerdict>, EvalError> {
        let prompt =
            ContextualPrecisionTemplate::generate_verdicts(input, expected_output, retrieval_context);
        let (parsed, cost) = generate_judged::<VerdictsSchema>(self.judge.as_ref(), &prompt).await?;
        if let Some(cost) = cost {
            self.outcome.add_cost(cost);
        }
        Ok(parsed.verdicts)
    }

    async fn generate_reason(&mut self, input: &str, score: f64) -> Result<Option<String>, EvalError> {
        if !self.config.include_reason {
            return Ok(None);
        }
        let verdicts_json = prettify(&self.verdicts);
        let prompt =
            ContextualPrecisionTemplate::generate_reason(input, &verdicts_json, &format!("{score:.2}"));
        let (parsed, cost) = generate_judged::<ReasonSchema>(self.judge.as_ref(), &prompt).await?;
        if let Some(cost) = cost {
            self.outcome.add_cost(cost);
        }
        Ok(Some(parsed.reason))
    }

    fn calculate_score(&self) -> f64 {
        if self.verdicts.is_empty() {
            return 0.0;
        }

        let mut sum_precision_at_k = 0.0;
        let mut relevant_count = 0u32;
        for (k, verdict) in self.verdicts.iter().enumerate() {
            if verdict.verdict.trim().eq_ignore_ascii_case("yes") {
                relevant_count += 1;
                sum_precision_at_k += relevant_count as f64 / (k + 1) as f64;
            }
        }

        if relevant_count == 0 {
            return 0.0;
        }
        let score = sum_precision_at_k / relevant_count as f64;
        if self.config.strict_mode && score < self.config.threshold {
            0.0
        } else {
            score
        }
    }

    async fn run(&mut self, test_case: &TestCase) -> Result<f64, EvalError> {
        // The override substitutes the retrieval context before validation,
        // so a test case without one is still measurable.
        let substituted;
        let test_case = match &self.retrieval_context {
            Some(context) => {
                substituted = test_case.clone().with_retrieval_context(context.clone());
                &substituted
            }
            None => test_case,
        };
        check_required_fields(&self.name(), REQUIRED_FIELDS, test_case)?;

        let input = test_case.input.clone();
        let expected_output = test_case
            .expected_output
            .clone()
            .unwrap_or_default();
        let retrieval_context = test_case.retrieval_context.clone().unwrap_or_default();

        self.verdicts = self
            .generate_verdicts(&input, &expected_output, &retrieval_context)
            .await?;
        let score = self.calculate_score();
        let reason = self.generate_reason(&input, score).await?;

        self.outcome.score = Some(score);
        self.outcome.reason = reason;
        self.outcome.success = Some(score >= self.config.threshold);
        if self.config.verbose_mode {
            self.outcome.verbose_logs = Some(construct_verbose_logs(
                &self.name(),
                &[
                    format!("Verdicts:\n{}", prettify(&self.verdicts)),
                    format!(
                        "Score: {score}\nReason: {}",
                        self.outcome.reason.as_deref().unwrap_or("")
                    ),
                ],
            ));
        }
        Ok(score)
    }
}

#[async_trait::async_trait]
impl Metric for ContextualPrecisionMetric {
    fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| "Contextual Precision".to_string())
    }

    fn config(&self) -> &MetricConfig {
        &self.config
    }

    fn required_fields(&self) -> &[TestCaseField] {
        REQUIRED_FIELDS
    }

    fn outcome(&self) -> &MetricOutcome {
        &self.outcome
    }

    fn outcome_mut(&mut self) -> &mut MetricOutcome {
        &mut self.outcome
    }

    async fn a_measure(&mut self, test_case: &TestCase) -> Result<f64, EvalError> {
        self.outcome.reset();
        self.verdicts.clear();
        match self.run(test_case).await {
            Ok(score) => Ok(score),
            Err(e) => {
                self.outcome.error = Some(e.to_string());
                self.outcome.success = Some(false);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingJudge, StaticJudge};

    fn tc(nodes: &[&str]) -> TestCase {
        TestCase::new("Who won the Nobel Prize in 1968?", "Einstein won it.")
            .with_expected_output("Einstein won the Nobel Prize in 1968.")
            .with_retrieval_context(nodes.iter().map(|s| s.to_string()).collect())
    }

    fn verdicts_json(verdicts: &[&str]) -> String {
        let items = verdicts
            .iter()
            .map(|v| format!(r#"{{"verdict": "{v}", "reason": "because"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"verdicts": [{items}]}}"#)
    }

    #[tokio::test]
    async fn relevant_above_irrelevant_scores_high() {
        let judge = Arc::new(StaticJudge::new(vec![
            verdicts_json(&["yes", "no", "yes"]),
            r#"{"reason": "The score is 0.83 because the second node is irrelevant."}"#.to_string(),
        ]));
        let mut metric = ContextualPrecisionMetric::new(judge);

        let score = metric.a_measure(&tc(&["a", "b", "c"])).await.unwrap();
        // (1/1 + 2/3) / 2
        assert!((score - 0.8333333333).abs() < 1e-6);
        assert!(metric.outcome().reason.is_some());
        assert!(metric.is_successful());
    }

    #[tokio::test]
    async fn no_relevant_nodes_scores_zero() {
        let judge = Arc::new(StaticJudge::new(vec![
            verdicts_json(&["no", "no"]),
            r#"{"reason": "Nothing relevant was retrieved."}"#.to_string(),
        ]));
        let mut metric = ContextualPrecisionMetric::new(judge);

        let score = metric.a_measure(&tc(&["a", "b"])).await.unwrap();
        assert_eq!(score, 0.0);
        assert!(!metric.is_successful());
    }

    #[tokio::test]
    async fn strict_mode_clamps_below_threshold() {
        let judge = Arc::new(StaticJudge::new(vec![
            verdicts_json(&["no", "yes"]),
            r#"{"reason": "Relevant node ranked last."}"#.to_string(),
        ]));
        let mut metric = ContextualPrecisionMetric::with_config(
            judge,
            MetricConfig {
                strict_mode: true,
                threshold: 0.6,
                ..MetricConfig::default()
            },
        );

        // single relevant node at rank 2: raw score 0.5, clamped to 0
        let score = metric.a_measure(&tc(&["a", "b"])).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn include_reason_false_skips_second_call() {
        let judge = Arc::new(StaticJudge::new(vec![verdicts_json(&["yes"])]));
        let mut metric = ContextualPrecisionMetric::with_config(
            judge,
            MetricConfig {
                include_reason: false,
                ..MetricConfig::default()
            },
        );

        let score = metric.a_measure(&tc(&["a"])).await.unwrap();
        assert_eq!(score, 1.0);
        assert!(metric.outcome().reason.is_none());
    }

    #[tokio::test]
    async fn missing_retrieval_context_fails_fast() {
        let judge = Arc::new(StaticJudge::new(Vec::<String>::new()));
        let mut metric = ContextualPrecisionMetric::new(judge);
        let bare = TestCase::new("q", "a").with_expected_output("e");

        let err = metric.a_measure(&bare).await.unwrap_err();
        assert!(matches!(
            err,
            EvalError::MissingRequiredParam {
                field: TestCaseField::RetrievalContext,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn context_override_substitutes_before_validation() {
        let judge = Arc::new(StaticJudge::new(vec![
            verdicts_json(&["yes"]),
            r#"{"reason": "Great retrieval!"}"#.to_string(),
        ]));
        let mut metric = ContextualPrecisionMetric::new(judge)
            .with_retrieval_context(vec!["injected node".to_string()]);
        let bare = TestCase::new("q", "a").with_expected_output("e");

        let score = metric.a_measure(&bare).await.unwrap();
        assert_eq!(score, 1.0);
        // the caller's test case stays untouched
        assert!(bare.retrieval_context.is_none());
    }

    #[tokio::test]
    async fn judge_failure_records_error() {
        let mut metric = ContextualPrecisionMetric::new(Arc::new(FailingJudge));
        let err = metric.a_measure(&tc(&["a"])).await.unwrap_err();
        assert!(matches!(err, EvalError::Judge(_)));
        assert!(!metric.is_successful());
    }

    #[tokio::test]
    async fn empty_verdict_list_scores_zero() {
        let judge = Arc::new(StaticJudge::new(vec![
            r#"{"verdicts": []}"#,
            r#"{"reason": "No verdicts."}"#,
        ]));
        let mut metric = ContextualPrecisionMetric::new(judge);
        let score = metric.a_measure(&tc(&["a"])).await.unwrap();
        assert_eq!(score, 0.0);
    }
}
