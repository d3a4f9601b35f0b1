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

//! Concurrent fan-out of many metrics over one test case.
//!
//! All metrics run to completion behind a single barrier; one metric's
//! failure never cancels its siblings. Error propagation, when configured,
//! happens only after the barrier.

use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, warn};

use tracejudge_core::TestCase;

use crate::{EvalError, Metric};

/// Failure policy for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Record metric errors in their statuses instead of failing the batch.
    pub ignore_errors: bool,
    /// Treat a missing required test case field as a skip rather than an
    /// error.
    pub skip_on_missing_params: bool,
    /// Per-metric deadline. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            ignore_errors: false,
            skip_on_missing_params: true,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricState {
    Measured,
    Skipped,
    Errored,
}

/// Per-metric outcome of a batch run.
#[derive(Debug, Clone)]
pub struct MetricStatus {
    pub name: String,
    pub state: MetricState,
    pub error: Option<String>,
}

async fn run_one(
    metric: &mut dyn Metric,
    test_case: &TestCase,
    options: &BatchOptions,
) -> (MetricStatus, Option<EvalError>) {
    let name = metric.name();
    let started = Instant::now();
    debug!(metric = %name, "measuring metric");

    let result = match options.timeout {
        Some(deadline) => match tokio::time::timeout(deadline, metric.a_measure(test_case)).await {
            Ok(result) => result,
            Err(_) => {
                let outcome = metric.outcome_mut();
                outcome.error = Some(EvalError::Timeout.to_string());
                outcome.success = Some(false);
                Err(EvalError::Timeout)
            }
        },
        None => metric.a_measure(test_case).await,
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(score) => {
            debug!(metric = %name, score, elapsed_ms, "metric measured");
            (
                MetricStatus {
                    name,
                    state: MetricState::Measured,
                    error: None,
                },
                None,
            )
        }
        Err(e @ EvalError::MissingRequiredParam { .. }) if options.skip_on_missing_params => {
            warn!(metric = %name, error = %e, "skipping metric: missing test case field");
            (
                MetricStatus {
                    name,
                    state: MetricState::Skipped,
                    error: None,
                },
                None,
            )
        }
        Err(e) => {
            warn!(metric = %name, error = %e, elapsed_ms, "metric failed");
            let status = MetricStatus {
                name,
                state: MetricState::Errored,
                error: Some(e.to_string()),
            };
            if options.ignore_errors {
                (status, None)
            } else {
                (status, Some(e))
            }
        }
    }
}

/// Measure every metric against the test case concurrently.
///
/// Each metric's result lands on its own [`MetricOutcome`] as usual; the
/// returned statuses summarize what happened per metric. When
/// `ignore_errors` is off, the first metric error is returned, but only
/// after every metric has finished.
///
/// [`MetricOutcome`]: crate::MetricOutcome
pub async fn run_metrics(
    metrics: &mut [Box<dyn Metric>],
    test_case: &TestCase,
    options: &BatchOptions,
) -> Result<Vec<MetricStatus>, EvalError> {
    let runs = metrics
        .iter_mut()
        .map(|metric| run_one(metric.as_mut(), test_case, options));
    let results = join_all(runs).await;

    let mut statuses = Vec::with_capacity(results.len());
    let mut deferred: Option<EvalError> = None;
    for (status, propagate) in results {
        if deferred.is_none() {
            deferred = propagate;
        }
        statuses.push(status);
    }

    match deferred {
        Some(e) => Err(e),
        None => Ok(statuses),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tracejudge_core::TestCaseField;

    use crate::evaluators::GEval;
    use crate::testing::{FailingJudge, StallingJudge, StaticJudge};
    use crate::Metric;

    fn scoring_metric(name: &str, score: u32) -> Box<dyn Metric> {
        let judge = Arc::new(StaticJudge::new(vec![format!(
            r#"{{"score": {score}, "reason": "scripted"}}"#
        )]));
        Box::new(
            GEval::builder(name, judge)
                .evaluation_steps(vec!["Check".to_string()])
                .build()
                .unwrap(),
        )
    }

    fn failing_metric(name: &str) -> Box<dyn Metric> {
        Box::new(
            GEval::builder(name, Arc::new(FailingJudge))
                .evaluation_steps(vec!["Check".to_string()])
                .build()
                .unwrap(),
        )
    }

    fn tc() -> TestCase {
        TestCase::new("q", "a")
    }

    #[tokio::test]
    async fn all_metrics_measure_concurrently() {
        let mut metrics = vec![scoring_metric("first", 8), scoring_metric("second", 4)];
        let statuses = run_metrics(&mut metrics, &tc(), &BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.state == MetricState::Measured));
        assert_eq!(metrics[0].outcome().score, Some(0.8));
        assert_eq!(metrics[1].outcome().score, Some(0.4));
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let mut metrics = vec![failing_metric("bad"), scoring_metric("good", 9)];
        let options = BatchOptions {
            ignore_errors: true,
            ..BatchOptions::default()
        };
        let statuses = run_metrics(&mut metrics, &tc(), &options).await.unwrap();

        assert_eq!(statuses[0].state, MetricState::Errored);
        assert!(statuses[0].error.is_some());
        assert_eq!(statuses[1].state, MetricState::Measured);
        assert_eq!(metrics[1].outcome().score, Some(0.9));
    }

    #[tokio::test]
    async fn propagation_waits_for_the_barrier() {
        let mut metrics = vec![failing_metric("bad"), scoring_metric("good", 9)];
        let err = run_metrics(&mut metrics, &tc(), &BatchOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EvalError::Judge(_)));
        // the sibling still ran to completion before the error surfaced
        assert_eq!(metrics[1].outcome().score, Some(0.9));
    }

    #[tokio::test]
    async fn missing_params_skip_instead_of_failing() {
        let needs_reference = Box::new(
            GEval::builder("needs reference", Arc::new(StaticJudge::new(Vec::<String>::new())))
                .evaluation_steps(vec!["Compare".to_string()])
                .evaluation_params(vec![
                    TestCaseField::Input,
                    TestCaseField::ActualOutput,
                    TestCaseField::ExpectedOutput,
                ])
                .build()
                .unwrap(),
        ) as Box<dyn Metric>;
        let mut metrics = vec![needs_reference, scoring_metric("plain", 7)];

        let statuses = run_metrics(&mut metrics, &tc(), &BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(statuses[0].state, MetricState::Skipped);
        assert!(statuses[0].error.is_none());
        assert_eq!(statuses[1].state, MetricState::Measured);
    }

    #[tokio::test]
    async fn missing_params_error_when_skipping_disabled() {
        let needs_reference = Box::new(
            GEval::builder("needs reference", Arc::new(StaticJudge::new(Vec::<String>::new())))
                .evaluation_steps(vec!["Compare".to_string()])
                .evaluation_params(vec![TestCaseField::Input, TestCaseField::ExpectedOutput])
                .build()
                .unwrap(),
        ) as Box<dyn Metric>;
        let mut metrics = vec![needs_reference];
        let options = BatchOptions {
            skip_on_missing_params: false,
            ..BatchOptions::default()
        };

        let err = run_metrics(&mut metrics, &tc(), &options).await.unwrap_err();
        assert!(matches!(err, EvalError::MissingRequiredParam { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_metric_times_out() {
        let stalled = Box::new(
            GEval::builder("stalled", Arc::new(StallingJudge))
                .evaluation_steps(vec!["Check".to_string()])
                .build()
                .unwrap(),
        ) as Box<dyn Metric>;
        let mut metrics = vec![stalled, scoring_metric("fast", 10)];
        let options = BatchOptions {
            ignore_errors: true,
            timeout: Some(Duration::from_millis(50)),
            ..BatchOptions::default()
        };

        let statuses = run_metrics(&mut metrics, &tc(), &options).await.unwrap();
        assert_eq!(statuses[0].state, MetricState::Errored);
        assert!(statuses[0].error.as_deref().unwrap().contains("timed out"));
        assert!(!metrics[0].is_successful());
        assert_eq!(statuses[1].state, MetricState::Measured);
    }
}
