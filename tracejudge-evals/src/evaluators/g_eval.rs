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

//! Rubric-driven judge scoring based on the G-Eval framework
//! (<https://arxiv.org/pdf/2303.16634>).
//!
//! The metric derives concrete evaluation steps from free-form criteria
//! (one judge call, skipped when steps are supplied up front), then asks
//! the judge for a `score`/`reason` pair over the selected test case
//! fields. On logprob-capable judges the integer score is replaced by a
//! probability-weighted average over the alternatives the judge considered
//! for the score token, which smooths the coarse integer scale.

use std::sync::Arc;

use serde::Deserialize;

use tracejudge_core::{TestCase, TestCaseField};

use crate::evaluators::{generate_judged, parse_judge_response};
use crate::llm_client::{JudgeClient, TokenLogprob};
use crate::templates::{construct_test_case_string, numbered_steps, params_string, GEvalTemplate};
use crate::{
    check_required_fields, construct_verbose_logs, prettify, EvalError, Metric, MetricConfig,
    MetricOutcome,
};

const DEFAULT_SCORE_RANGE: (u32, u32) = (0, 10);

/// One band of a scoring rubric: an inclusive score range and the outcome
/// a score in that range represents.
#[derive(Debug, Clone)]
pub struct Rubric {
    pub score_range: (u32, u32),
    pub expected_outcome: String,
}

impl Rubric {
    pub fn new(score_range: (u32, u32), expected_outcome: impl Into<String>) -> Self {
        Self {
            score_range,
            expected_outcome: expected_outcome.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StepsSchema {
    steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReasonScoreSchema {
    score: f64,
    reason: String,
}

/// Criteria-driven evaluation metric.
pub struct GEval {
    name: String,
    include_suffix: bool,
    judge: Arc<dyn JudgeClient>,
    config: MetricConfig,
    evaluation_params: Vec<TestCaseField>,
    criteria: Option<String>,
    evaluation_steps: Vec<String>,
    rubric: Vec<Rubric>,
    top_logprobs: u32,
    outcome: MetricOutcome,
}

pub struct GEvalBuilder {
    name: String,
    include_suffix: bool,
    judge: Arc<dyn JudgeClient>,
    config: MetricConfig,
    evaluation_params: Vec<TestCaseField>,
    criteria: Option<String>,
    evaluation_steps: Vec<String>,
    rubric: Vec<Rubric>,
    top_logprobs: u32,
}

impl GEval {
    pub fn builder(name: impl Into<String>, judge: Arc<dyn JudgeClient>) -> GEvalBuilder {
        GEvalBuilder {
            name: name.into(),
            include_suffix: true,
            judge,
            config: MetricConfig::default(),
            evaluation_params: vec![TestCaseField::Input, TestCaseField::ActualOutput],
            criteria: None,
            evaluation_steps: Vec::new(),
            rubric: Vec::new(),
            top_logprobs: 20,
        }
    }

    /// The steps actually used by the last measurement, whether supplied or
    /// judge-derived.
    pub fn evaluation_steps(&self) -> &[String] {
        &self.evaluation_steps
    }

    fn score_range(&self) -> (u32, u32) {
        if self.rubric.is_empty() {
            DEFAULT_SCORE_RANGE
        } else {
            // validated sorted and non-overlapping at build time
            (
                self.rubric[0].score_range.0,
                self.rubric[self.rubric.len() - 1].score_range.1,
            )
        }
    }

    fn format_rubric(&self) -> String {
        self.rubric
            .iter()
            .map(|r| {
                format!(
                    "{}-{}: {}",
                    r.score_range.0, r.score_range.1, r.expected_outcome
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn resolve_evaluation_steps(&mut self) -> Result<(), EvalError> {
        if !self.evaluation_steps.is_empty() {
            return Ok(());
        }
        let criteria = self.criteria.as_deref().ok_or_else(|| {
            EvalError::Configuration("evaluation steps or criteria must be set".to_string())
        })?;
        let prompt = GEvalTemplate::generate_evaluation_steps(
            &params_string(&self.evaluation_params),
            criteria,
        );
        let (parsed, cost) = generate_judged::<StepsSchema>(self.judge.as_ref(), &prompt).await?;
        if let Some(cost) = cost {
            self.outcome.add_cost(cost);
        }
        self.evaluation_steps = parsed.steps;
        Ok(())
    }

    async fn evaluate(&mut self, test_case: &TestCase) -> Result<(f64, String), EvalError> {
        let content = construct_test_case_string(&self.evaluation_params, test_case);
        let params = params_string(&self.evaluation_params);
        let steps = numbered_steps(&self.evaluation_steps);

        let prompt = if self.config.strict_mode {
            GEvalTemplate::generate_strict_evaluation_results(&steps, &content, &params)
        } else {
            let rubric_text = if self.rubric.is_empty() {
                None
            } else {
                Some(self.format_rubric())
            };
            GEvalTemplate::generate_evaluation_results(
                &steps,
                &content,
                &params,
                rubric_text.as_deref(),
                self.score_range(),
            )
        };

        if self.judge.supports_logprobs() {
            let raw = self.judge.generate_raw(&prompt, self.top_logprobs).await?;
            if let Some(cost) = raw.cost {
                self.outcome.add_cost(cost);
            }
            let parsed: ReasonScoreSchema = parse_judge_response(&raw.text)?;
            if self.config.strict_mode {
                return Ok((parsed.score, parsed.reason));
            }
            let score = raw
                .logprobs
                .as_deref()
                .and_then(|lp| weighted_summed_score(parsed.score, self.score_range(), lp))
                .unwrap_or(parsed.score);
            Ok((score, parsed.reason))
        } else {
            let (parsed, cost) =
                generate_judged::<ReasonScoreSchema>(self.judge.as_ref(), &prompt).await?;
            if let Some(cost) = cost {
                self.outcome.add_cost(cost);
            }
            Ok((parsed.score, parsed.reason))
        }
    }

    async fn run(&mut self, test_case: &TestCase) -> Result<f64, EvalError> {
        check_required_fields(&self.name(), &self.evaluation_params, test_case)?;
        self.resolve_evaluation_steps().await?;
        let (raw_score, reason) = self.evaluate(test_case).await?;

        // Strict scores are already on the 0/1 scale; graded scores are
        // normalized from the prompt's integer range.
        let mut score = if self.config.strict_mode {
            raw_score
        } else {
            raw_score / 10.0
        };
        if self.config.strict_mode && score < self.config.threshold {
            score = 0.0;
        }

        self.outcome.score = Some(score);
        self.outcome.reason = Some(reason);
        self.outcome.success = Some(score >= self.config.threshold);
        if self.config.verbose_mode {
            let mut steps = vec![
                format!("Criteria:\n{}", self.criteria.as_deref().unwrap_or("")),
                format!(
                    "Evaluation Steps:\n{}",
                    prettify(&self.evaluation_steps)
                ),
            ];
            if !self.rubric.is_empty() {
                steps.push(format!("Rubric:\n{}", self.format_rubric()));
            }
            steps.push(format!(
                "Score: {score}\nReason: {}",
                self.outcome.reason.as_deref().unwrap_or("")
            ));
            self.outcome.verbose_logs = Some(construct_verbose_logs(&self.name(), &steps));
        }
        Ok(score)
    }
}

impl GEvalBuilder {
    pub fn criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = Some(criteria.into());
        self
    }

    pub fn evaluation_steps(mut self, steps: Vec<String>) -> Self {
        self.evaluation_steps = steps;
        self
    }

    pub fn evaluation_params(mut self, params: Vec<TestCaseField>) -> Self {
        self.evaluation_params = params;
        self
    }

    pub fn rubric(mut self, rubric: Vec<Rubric>) -> Self {
        self.rubric = rubric;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn strict_mode(mut self, strict_mode: bool) -> Self {
        self.config.strict_mode = strict_mode;
        self
    }

    pub fn async_mode(mut self, async_mode: bool) -> Self {
        self.config.async_mode = async_mode;
        self
    }

    pub fn verbose_mode(mut self, verbose_mode: bool) -> Self {
        self.config.verbose_mode = verbose_mode;
        self
    }

    pub fn top_logprobs(mut self, top_logprobs: u32) -> Self {
        self.top_logprobs = top_logprobs;
        self
    }

    pub fn include_suffix(mut self, include_suffix: bool) -> Self {
        self.include_suffix = include_suffix;
        self
    }

    pub fn build(mut self) -> Result<GEval, EvalError> {
        match (self.criteria.is_some(), self.evaluation_steps.is_empty()) {
            (false, true) => {
                return Err(EvalError::Configuration(
                    "either criteria or evaluation steps must be provided".to_string(),
                ));
            }
            (true, false) => {
                return Err(EvalError::Configuration(
                    "criteria and evaluation steps are mutually exclusive".to_string(),
                ));
            }
            _ => {}
        }
        if self.evaluation_params.is_empty() {
            return Err(EvalError::Configuration(
                "evaluation params must not be empty".to_string(),
            ));
        }

        self.rubric.sort_by_key(|r| r.score_range.0);
        for rubric in &self.rubric {
            let (low, high) = rubric.score_range;
            if low > high || high > DEFAULT_SCORE_RANGE.1 {
                return Err(EvalError::Configuration(format!(
                    "invalid rubric range {low}-{high}"
                )));
            }
        }
        for pair in self.rubric.windows(2) {
            if pair[1].score_range.0 <= pair[0].score_range.1 {
                return Err(EvalError::Configuration(format!(
                    "overlapping rubric ranges {}-{} and {}-{}",
                    pair[0].score_range.0,
                    pair[0].score_range.1,
                    pair[1].score_range.0,
                    pair[1].score_range.1
                )));
            }
        }

        Ok(GEval {
            name: self.name,
            include_suffix: self.include_suffix,
            judge: self.judge,
            config: self.config,
            evaluation_params: self.evaluation_params,
            criteria: self.criteria,
            evaluation_steps: self.evaluation_steps,
            rubric: self.rubric,
            top_logprobs: self.top_logprobs,
            outcome: MetricOutcome::default(),
        })
    }
}

/// Replace the judge's integer score with a probability-weighted average of
/// the in-range alternatives it considered for the score token. Returns
/// `None` when the score token cannot be located or no alternative parses
/// into the range, in which case the caller keeps the plain score.
fn weighted_summed_score(
    raw_score: f64,
    score_range: (u32, u32),
    logprobs: &[TokenLogprob],
) -> Option<f64> {
    let target = format!("{}", raw_score.round() as i64);
    let score_token = logprobs.iter().find(|t| t.token.trim() == target)?;

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for alternative in &score_token.top_logprobs {
        let Ok(candidate) = alternative.token.trim().parse::<i64>() else {
            continue;
        };
        if candidate < score_range.0 as i64 || candidate > score_range.1 as i64 {
            continue;
        }
        let weight = alternative.logprob.exp();
        weighted_sum += candidate as f64 * weight;
        total_weight += weight;
    }

    if total_weight > 0.0 {
        Some(weighted_sum / total_weight)
    } else {
        None
    }
}

#[async_trait::async_trait]
impl Metric for GEval {
    fn name(&self) -> String {
        if self.include_suffix {
            format!("{} (GEval)", self.name)
        } else {
            self.name.clone()
        }
    }

    fn config(&self) -> &MetricConfig {
        &self.config
    }

    fn required_fields(&self) -> &[TestCaseField] {
        &self.evaluation_params
    }

    fn outcome(&self) -> &MetricOutcome {
        &self.outcome
    }

    fn outcome_mut(&mut self) -> &mut MetricOutcome {
        &mut self.outcome
    }

    async fn a_measure(&mut self, test_case: &TestCase) -> Result<f64, EvalError> {
        self.outcome.reset();
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
