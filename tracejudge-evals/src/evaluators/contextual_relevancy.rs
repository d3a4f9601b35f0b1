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

//! Statement-level retrieval relevancy.
//!
//! Each retrieval node is decomposed by the judge into statements, each
//! carrying a yes/no relevance verdict against the input. The score is the
//! fraction of relevant statements across all nodes; ranking does not
//! matter here, only signal density.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use tracejudge_core::{TestCase, TestCaseField};

use crate::evaluators::generate_judged;
use crate::llm_client::JudgeClient;
use crate::templates::ContextualRelevancyTemplate;
use crate::{
    check_required_fields, construct_verbose_logs, prettify, EvalError, Metric, MetricConfig,
    MetricOutcome,
};

const REQUIRED_FIELDS: &[TestCaseField] = &[
    TestCaseField::Input,
    TestCaseField::ActualOutput,
    TestCaseField::RetrievalContext,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevancyVerdict {
    pub statement: String,
    pub verdict: String,
    /// Justification, present for irrelevant statements.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerdictsSchema {
    verdicts: Vec<RelevancyVerdict>,
}

#[derive(Debug, Deserialize)]
struct ReasonSchema {
    reason: String,
}

/// How much of the retrieval context is relevant to the input.
pub struct ContextualRelevancyMetric {
    name: Option<String>,
    judge: Arc<dyn JudgeClient>,
    config: MetricConfig,
    /// Overrides the test case's retrieval context when set.
    retrieval_context: Option<Vec<String>>,
    /// One verdict list per retrieval node.
    verdicts_list: Vec<Vec<RelevancyVerdict>>,
    outcome: MetricOutcome,
}

impl ContextualRelevancyMetric {
    pub fn new(judge: Arc<dyn JudgeClient>) -> Self {
        Self::with_config(judge, MetricConfig::default())
    }

    pub fn with_config(judge: Arc<dyn JudgeClient>, config: MetricConfig) -> Self {
        Self {
            name: None,
            judge,
            config,
            retrieval_context: None,
            verdicts_list: Vec::new(),
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

    /// One judge call per retrieval node, issued concurrently.
    async fn generate_verdicts(
        &mut self,
        input: &str,
        retrieval_context: &[String],
    ) -> Result<Vec<Vec<RelevancyVerdict>>, EvalError> {
        let judge = Arc::clone(&self.judge);
        let calls = retrieval_context.iter().map(|node| {
            let prompt = ContextualRelevancyTemplate::generate_verdicts(input, node);
            let judge = Arc::clone(&judge);
            async move { generate_judged::<VerdictsSchema>(judge.as_ref(), &prompt).await }
        });

        let mut verdicts_list = Vec::with_capacity(retrieval_context.len());
        for result in join_all(calls).await {
            let (parsed, cost) = result?;
            if let Some(cost) = cost {
                self.outcome.add_cost(cost);
            }
            verdicts_list.push(parsed.verdicts);
        }
        Ok(verdicts_list)
    }

    async fn generate_reason(&mut self, input: &str, score: f64) -> Result<Option<String>, EvalError> {
        if !self.config.include_reason {
            return Ok(None);
        }

        let mut irrelevant = Vec::new();
        let mut relevant = Vec::new();
        for verdicts in &self.verdicts_list {
            for verdict in verdicts {
                if verdict.verdict.trim().eq_ignore_ascii_case("no") {
                    if let Some(reason) = &verdict.reason {
                        irrelevant.push(reason.clone());
                    }
                } else {
                    relevant.push(verdict.statement.clone());
                }
            }
        }

        let prompt = ContextualRelevancyTemplate::generate_reason(
            input,
            &prettify(&irrelevant),
            &prettify(&relevant),
            &format!("{score:.2}"),
        );
        let (parsed, cost) = generate_judged::<ReasonSchema>(self.judge.as_ref(), &prompt).await?;
        if let Some(cost) = cost {
            self.outcome.add_cost(cost);
        }
        Ok(Some(parsed.reason))
    }

    fn calculate_score(&self) -> f64 {
        let mut total = 0u32;
        let mut relevant = 0u32;
        for verdicts in &self.verdicts_list {
            for verdict in verdicts {
                total += 1;
                if verdict.verdict.trim().eq_ignore_ascii_case("yes") {
                    relevant += 1;
                }
            }
        }

        if total == 0 {
            return 0.0;
        }
        let score = relevant as f64 / total as f64;
        if self.config.strict_mode && score < self.config.threshold {
            0.0
        } else {
            score
        }
    }

    async fn run(&mut self, test_case: &TestCase) -> Result<f64, EvalError> {
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
        let retrieval_context = test_case.retrieval_context.clone().unwrap_or_default();

        self.verdicts_list = self.generate_verdicts(&input, &retrieval_context).await?;
        let score = self.calculate_score();
        let reason = self.generate_reason(&input, score).await?;

        self.outcome.score = Some(score);
        self.outcome.reason = reason;
        self.outcome.success = Some(score >= self.config.threshold);
        if self.config.verbose_mode {
            self.outcome.verbose_logs = Some(construct_verbose_logs(
                &self.name(),
                &[
                    format!("Verdicts:\n{}", prettify(&self.verdicts_list)),
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
impl Metric for ContextualRelevancyMetric {
    fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| "Contextual Relevancy".to_string())
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
        self.verdicts_list.clear();
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
        TestCase::new("What were Einstein's achievements?", "He won the Nobel Prize.")
            .with_retrieval_context(nodes.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn three_of_five_relevant_statements_score_point_six() {
        // two nodes: first yields 3 statements (2 yes), second yields 2 (1 yes)
        let judge = Arc::new(StaticJudge::new(vec![
            r#"{"verdicts": [
                {"statement": "won the Nobel Prize", "verdict": "yes"},
                {"statement": "discovered the photoelectric effect", "verdict": "yes"},
                {"statement": "there was a cat", "verdict": "no", "reason": "cats are off topic"}
            ]}"#
                .to_string(),
            r#"{"verdicts": [
                {"statement": "born in 1879", "verdict": "no", "reason": "birth year is not an achievement"},
                {"statement": "developed general relativity", "verdict": "yes"}
            ]}"#
                .to_string(),
            r#"{"reason": "The score is 0.60 because two statements are off topic."}"#.to_string(),
        ]));
        let mut metric = ContextualRelevancyMetric::new(judge);

        let score = metric.a_measure(&tc(&["node one", "node two"])).await.unwrap();
        assert!((score - 0.6).abs() < 1e-9);
        assert!(metric.is_successful());
        assert!(metric.outcome().reason.is_some());
    }

    #[tokio::test]
    async fn no_statements_anywhere_scores_zero() {
        let judge = Arc::new(StaticJudge::new(vec![
            r#"{"verdicts": []}"#,
            r#"{"reason": "The context contained no statements."}"#,
        ]));
        let mut metric = ContextualRelevancyMetric::new(judge);

        let score = metric.a_measure(&tc(&["empty node"])).await.unwrap();
        assert_eq!(score, 0.0);
        assert!(!metric.is_successful());
    }

    #[tokio::test]
    async fn strict_mode_clamps_below_threshold() {
        let judge = Arc::new(StaticJudge::new(vec![
            r#"{"verdicts": [
                {"statement": "relevant", "verdict": "yes"},
                {"statement": "irrelevant", "verdict": "no", "reason": "off topic"}
            ]}"#
                .to_string(),
            r#"{"reason": "Half the statements are noise."}"#.to_string(),
        ]));
        let mut metric = ContextualRelevancyMetric::with_config(
            judge,
            MetricConfig {
                strict_mode: true,
                threshold: 0.7,
                ..MetricConfig::default()
            },
        );

        let score = metric.a_measure(&tc(&["node"])).await.unwrap();
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn one_verdict_call_per_node() {
        // script holds exactly two verdict responses and one reason; a third
        // node would exhaust it and error
        let judge = Arc::new(StaticJudge::new(vec![
            r#"{"verdicts": [{"statement": "s1", "verdict": "yes"}]}"#,
            r#"{"verdicts": [{"statement": "s2", "verdict": "yes"}]}"#,
            r#"{"reason": "All relevant!"}"#,
        ]));
        let mut metric = ContextualRelevancyMetric::new(judge);

        let score = metric.a_measure(&tc(&["a", "b"])).await.unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn missing_retrieval_context_fails_fast() {
        let judge = Arc::new(StaticJudge::new(Vec::<String>::new()));
        let mut metric = ContextualRelevancyMetric::new(judge);
        let bare = TestCase::new("q", "a");

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
    async fn judge_failure_records_error() {
        let mut metric = ContextualRelevancyMetric::new(Arc::new(FailingJudge));
        let err = metric.a_measure(&tc(&["node"])).await.unwrap_err();
        assert!(matches!(err, EvalError::Judge(_)));
        assert!(metric.outcome().error.is_some());
    }

    #[tokio::test]
    async fn malformed_verdicts_surface_as_parse_errors() {
        let judge = Arc::new(StaticJudge::new(vec![r#"{"scores": [1, 2, 3]}"#]));
        let mut metric = ContextualRelevancyMetric::new(judge);
        let err = metric.a_measure(&tc(&["node"])).await.unwrap_err();
        assert!(matches!(err, EvalError::Parse(_)));
    }
}
