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

//! Built-in judge-scored metrics.

mod contextual_precision;
mod contextual_relevancy;
mod g_eval;

pub use contextual_precision::{ContextualPrecisionMetric, PrecisionVerdict};
pub use contextual_relevancy::{ContextualRelevancyMetric, RelevancyVerdict};
pub use g_eval::{GEval, GEvalBuilder, Rubric};

use serde::de::DeserializeOwned;

use crate::llm_client::{extract_json, JudgeClient};
use crate::EvalError;

/// Parse a judge completion into a typed schema, tolerating surrounding
/// prose and markdown fences.
pub(crate) fn parse_judge_response<T: DeserializeOwned>(raw: &str) -> Result<T, EvalError> {
    let json = extract_json(raw)?;
    serde_json::from_str(json)
        .map_err(|e| EvalError::Parse(format!("judge JSON did not match expected shape: {e}")))
}

/// Run a prompt through the judge and parse the reply into a typed schema,
/// returning the parsed value and the metered call cost.
///
/// Schema-capable judges return bare JSON, so their replies are parsed
/// directly; a direct parse that fails anyway (a provider that wraps the
/// payload despite the flag) still goes through tolerant extraction, as
/// does every reply from a judge without schema support.
pub(crate) async fn generate_judged<T: DeserializeOwned>(
    judge: &dyn JudgeClient,
    prompt: &str,
) -> Result<(T, Option<f64>), EvalError> {
    let response = judge.generate(prompt).await?;
    let parsed = if judge.supports_schema() {
        match serde_json::from_str(&response.text) {
            Ok(value) => value,
            Err(_) => parse_judge_response(&response.text)?,
        }
    } else {
        parse_judge_response(&response.text)?
    };
    Ok((parsed, response.cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    use crate::testing::StaticJudge;

    #[derive(Debug, Deserialize)]
    struct ScoreReason {
        score: f64,
        reason: String,
    }

    #[test]
    fn parses_fenced_judge_output() {
        let raw = "Sure!\n```json\n{\"score\": 8, \"reason\": \"solid answer\"}\n```";
        let parsed: ScoreReason = parse_judge_response(raw).unwrap();
        assert_eq!(parsed.score, 8.0);
        assert_eq!(parsed.reason, "solid answer");
    }

    #[test]
    fn shape_mismatch_is_a_parse_error() {
        let raw = "{\"grade\": \"A\"}";
        let err = parse_judge_response::<ScoreReason>(raw).unwrap_err();
        assert!(matches!(err, EvalError::Parse(_)));
    }

    #[tokio::test]
    async fn schema_judge_replies_parse_directly() {
        let judge =
            StaticJudge::new(vec![r#"{"score": 3, "reason": "thin answer"}"#]).schema_capable();
        let (parsed, cost) = generate_judged::<ScoreReason>(&judge, "rate this")
            .await
            .unwrap();
        assert_eq!(parsed.score, 3.0);
        assert_eq!(parsed.reason, "thin answer");
        assert!(cost.is_some());
    }

    #[tokio::test]
    async fn schema_judge_falls_back_to_extraction_for_wrapped_replies() {
        let judge = StaticJudge::new(vec![
            "```json\n{\"score\": 4, \"reason\": \"decent\"}\n```",
        ])
        .schema_capable();
        let (parsed, _) = generate_judged::<ScoreReason>(&judge, "rate this")
            .await
            .unwrap();
        assert_eq!(parsed.score, 4.0);
    }

    #[tokio::test]
    async fn plain_judge_replies_go_through_extraction() {
        let judge = StaticJudge::new(vec![
            "Here you go:\n{\"score\": 7, \"reason\": \"good\"}",
        ]);
        let (parsed, _) = generate_judged::<ScoreReason>(&judge, "rate this")
            .await
            .unwrap();
        assert_eq!(parsed.score, 7.0);
    }
}
