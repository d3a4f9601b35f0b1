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

//! Prompt templates for the built-in metrics.
//!
//! Every prompt instructs the judge to answer in JSON and shows the exact
//! shape expected back. The parsers in `evaluators` are written against
//! these shapes.

use tracejudge_core::{TestCase, TestCaseField};

/// Human-readable name of a field as it appears inside prompts.
pub(crate) fn field_label(field: TestCaseField) -> &'static str {
    match field {
        TestCaseField::Input => "Input",
        TestCaseField::ActualOutput => "Actual Output",
        TestCaseField::ExpectedOutput => "Expected Output",
        TestCaseField::Context => "Context",
        TestCaseField::RetrievalContext => "Retrieval Context",
        TestCaseField::ToolsCalled => "Tools Called",
        TestCaseField::ExpectedTools => "Expected Tools",
    }
}

/// Comma-joined field labels, e.g. "Input, Actual Output".
pub(crate) fn params_string(fields: &[TestCaseField]) -> String {
    fields
        .iter()
        .map(|f| field_label(*f))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Labeled field values of a test case, in declaration order.
pub(crate) fn construct_test_case_string(fields: &[TestCaseField], tc: &TestCase) -> String {
    let mut sections = Vec::new();
    for field in fields {
        let value = match field {
            TestCaseField::Input => Some(tc.input.clone()),
            TestCaseField::ActualOutput => Some(tc.actual_output.clone()),
            TestCaseField::ExpectedOutput => tc.expected_output.clone(),
            TestCaseField::Context => tc.context.as_ref().map(|c| c.join("\n")),
            TestCaseField::RetrievalContext => tc.retrieval_context.as_ref().map(|c| c.join("\n")),
            TestCaseField::ToolsCalled => tc.tools_called.as_ref().map(|c| c.join(", ")),
            TestCaseField::ExpectedTools => tc.expected_tools.as_ref().map(|c| c.join(", ")),
        };
        if let Some(value) = value {
            sections.push(format!("{}:\n{}", field_label(*field), value));
        }
    }
    sections.join("\n\n")
}

pub(crate) fn numbered_steps(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {}", i + 1, step))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) struct GEvalTemplate;

impl GEvalTemplate {
    pub(crate) fn generate_evaluation_steps(parameters: &str, criteria: &str) -> String {
        format!(
            r#"Given an evaluation criteria which outlines how you should judge the {parameters}, generate 3-4 concise evaluation steps based on the criteria below. You MUST make it clear how to evaluate {parameters} in relation to one another.

Evaluation Criteria:
{criteria}

**
IMPORTANT: Please make sure to only return in JSON format, with the "steps" key as a list of strings. No words or explanation is needed.
Example JSON:
{{
    "steps": <list_of_strings>
}}
**

JSON:
"#
        )
    }

    pub(crate) fn generate_evaluation_results(
        evaluation_steps: &str,
        test_case_content: &str,
        parameters: &str,
        rubric: Option<&str>,
        score_range: (u32, u32),
    ) -> String {
        let (low, high) = score_range;
        let rubric_text = rubric
            .map(|r| format!("Rubric:\n{r}\n"))
            .unwrap_or_default();
        let dependencies = if rubric.is_some() {
            "evaluation steps and rubric"
        } else {
            "evaluation steps"
        };
        let score_explanation = if rubric.is_some() {
            "according to the rubric provided".to_string()
        } else {
            format!("with {high} being that it follows the criteria outlined in the steps and {low} being that it does not")
        };

        format!(
            r#"Given the {dependencies}, return a JSON with two keys: 1) a `score` key ranging from {low} to {high}, {score_explanation}, and 2) a `reason` key, a reason for the given score, but DO NOT QUOTE THE SCORE in your reason. Please mention specific information from {parameters} in your reason, but be very concise with it!

Evaluation Steps:
{evaluation_steps}

{rubric_text}
{test_case_content}

**
IMPORTANT: Please make sure to only return in JSON format, with the "score" and "reason" key. No words or explanation is needed.

Example JSON:
{{
    "score": {low},
    "reason": "The text does not follow the evaluation steps provided."
}}
**

JSON:
"#
        )
    }

    pub(crate) fn generate_strict_evaluation_results(
        evaluation_steps: &str,
        test_case_content: &str,
        parameters: &str,
    ) -> String {
        format!(
            r#"Given the evaluation steps, return a JSON with two keys: 1) a `score` key that is STRICTLY EITHER 1 (follows the criteria 100% outlined in the evaluation steps), OR 0 (does not follow the criteria), and 2) a `reason` key, a reason for the given score, but DO NOT QUOTE THE SCORE in your reason. Please mention specific information from {parameters} in your reason, but be very concise with it!

Evaluation Steps:
{evaluation_steps}

{test_case_content}

**
IMPORTANT: Please make sure to only return in JSON format, with the "score" and "reason" key. No words or explanation is needed.

Example JSON:
{{
    "score": 0,
    "reason": "The text does not follow the evaluation steps provided."
}}
**

JSON:
"#
        )
    }
}

pub(crate) struct ContextualPrecisionTemplate;

impl ContextualPrecisionTemplate {
    pub(crate) fn generate_verdicts(
        input: &str,
        expected_output: &str,
        retrieval_context: &[String],
    ) -> String {
        let document_count = retrieval_context.len();
        let plural = if document_count == 1 { "" } else { "s" };
        let annotated = retrieval_context
            .iter()
            .enumerate()
            .map(|(i, node)| format!("Node {}: {}", i + 1, node))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"Given the input, expected output, and retrieval context, please generate a list of JSON objects to determine whether each node in the retrieval context was remotely useful in arriving at the expected output.

**
IMPORTANT: Please make sure to only return in JSON format, with the 'verdicts' key as a list of JSON. These JSON only contain the `verdict` key that outputs only 'yes' or 'no', and a `reason` key to justify the verdict. In your reason, you should aim to quote parts of the context.
Example Retrieval Context: ["Einstein won the Nobel Prize for his discovery of the photoelectric effect", "He won the Nobel Prize in 1968.", "There was a cat."]
Example Input: "Who won the Nobel Prize in 1968 and for what?"
Example Expected Output: "Einstein won the Nobel Prize in 1968 for his discovery of the photoelectric effect."

Example:
{{
    "verdicts": [
        {{
            "verdict": "yes",
            "reason": "It clearly addresses the question by stating that 'Einstein won the Nobel Prize for his discovery of the photoelectric effect.'"
        }},
        {{
            "verdict": "yes",
            "reason": "The text verifies that the prize was indeed won in 1968."
        }},
        {{
            "verdict": "no",
            "reason": "'There was a cat' is not at all relevant to the topic of winning a Nobel Prize."
        }}
    ]
}}
Since you are going to generate a verdict for each context, the number of 'verdicts' SHOULD BE STRICTLY EQUAL to that of the contexts.
**

Input:
{input}

Expected output:
{expected_output}

Retrieval Context ({document_count} document{plural}):
{annotated}

JSON:
"#
        )
    }

    pub(crate) fn generate_reason(input: &str, verdicts: &str, score: &str) -> String {
        format!(
            r#"Given the input, retrieval contexts, and contextual precision score, provide a CONCISE summarize for the score. Explain why it is not higher, but also why it is at its current score.
The retrieval contexts is a list of JSON with three keys: `verdict`, `reason` (reason for the verdict) and `node`. `verdict` will be either 'yes' or 'no', which represents whether the corresponding 'node' in the retrieval context is relevant to the input.
Contextual precision represents if the relevant nodes are ranked higher than irrelevant nodes. Also note that retrieval contexts is given IN THE ORDER OF THEIR RANKINGS.

**
IMPORTANT: Please make sure to only return in JSON format, with the 'reason' key providing the reason.
Example JSON:
{{
    "reason": "The score is <contextual_precision_score> because <your_reason>."
}}

DO NOT mention 'verdict' in your reason, but instead phrase it as irrelevant nodes. The term 'verdict' are just here for you to understand the broader scope of things.
Also DO NOT mention there are `reason` fields in the retrieval contexts you are presented with, instead just use the information in the `reason` field.
In your reason, you MUST USE the `reason`, QUOTES in the 'reason', and the node RANK (starting from 1, eg. first node) to explain why the 'no' verdicts should be ranked lower than the 'yes' verdicts.
When addressing nodes, make it explicit that it is nodes in retrieval context.
If the score is 1, keep it short and say something positive with an upbeat tone (but don't overdo it otherwise it gets annoying).
**

Contextual Precision Score:
{score}

Input:
{input}

Retrieval Contexts:
{verdicts}

JSON:
"#
        )
    }
}

pub(crate) struct ContextualRelevancyTemplate;

impl ContextualRelevancyTemplate {
    pub(crate) fn generate_verdicts(input: &str, context: &str) -> String {
        format!(
            r#"Based on the input and context, please extract the statements made in the context, and generate a list of JSON objects to indicate whether each statement is relevant to the given input.

**
IMPORTANT: Please make sure to only return in JSON format, with the 'verdicts' key as a list of JSON. Each JSON contains a `statement` key with the extracted statement, a `verdict` key that outputs only 'yes' or 'no' on whether the statement is relevant to the input, and a `reason` key justifying the verdict ONLY when the verdict is 'no'.
Example Context: "Einstein won the Nobel Prize for his discovery of the photoelectric effect. He won the Nobel Prize in 1968. There was a cat."
Example Input: "What were some of Einstein's achievements?"

Example:
{{
    "verdicts": [
        {{
            "statement": "Einstein won the Nobel Prize for his discovery of the photoelectric effect in 1968",
            "verdict": "yes"
        }},
        {{
            "statement": "There was a cat",
            "verdict": "no",
            "reason": "The existence of a cat is not relevant to Einstein's achievements."
        }}
    ]
}}
**

Input:
{input}

Context:
{context}

JSON:
"#
        )
    }

    pub(crate) fn generate_reason(
        input: &str,
        irrelevant_statements: &str,
        relevant_statements: &str,
        score: &str,
    ) -> String {
        format!(
            r#"Given the contextual relevancy score, the list of reasons why statements in the retrieval context are irrelevant to the input, and the list of relevant statements, provide a CONCISE reason for the score. Explain why it is not higher, but also why it is at its current score.

**
IMPORTANT: Please make sure to only return in JSON format, with the 'reason' key providing the reason.
Example JSON:
{{
    "reason": "The score is <contextual_relevancy_score> because <your_reason>."
}}

If the score is 1, keep it short and say something positive with an upbeat tone (but don't overdo it otherwise it gets annoying).
**

Contextual Relevancy Score:
{score}

Input:
{input}

Reasons for irrelevancy:
{irrelevant_statements}

Relevant Statements:
{relevant_statements}

JSON:
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_string_skips_absent_fields() {
        let tc = TestCase::new("what is rust", "a language");
        let content = construct_test_case_string(
            &[
                TestCaseField::Input,
                TestCaseField::ActualOutput,
                TestCaseField::ExpectedOutput,
            ],
            &tc,
        );
        assert!(content.contains("Input:\nwhat is rust"));
        assert!(content.contains("Actual Output:\na language"));
        assert!(!content.contains("Expected Output"));
    }

    #[test]
    fn params_string_joins_labels() {
        let params = params_string(&[TestCaseField::Input, TestCaseField::ActualOutput]);
        assert_eq!(params, "Input, Actual Output");
    }

    #[test]
    fn steps_are_numbered_from_one() {
        let steps = numbered_steps(&["check facts".to_string(), "check tone".to_string()]);
        assert_eq!(steps, "1. check facts\n2. check tone");
    }

    #[test]
    fn precision_verdict_prompt_numbers_nodes() {
        let prompt = ContextualPrecisionTemplate::generate_verdicts(
            "who won",
            "Einstein won",
            &["first doc".to_string(), "second doc".to_string()],
        );
        assert!(prompt.contains("Node 1: first doc"));
        assert!(prompt.contains("Node 2: second doc"));
        assert!(prompt.contains("(2 documents)"));
    }

    #[test]
    fn geval_results_prompt_reflects_rubric() {
        let with_rubric = GEvalTemplate::generate_evaluation_results(
            "1. check",
            "Input:\nq",
            "Input",
            Some("0-3: poor"),
            (0, 10),
        );
        assert!(with_rubric.contains("Rubric:\n0-3: poor"));
        assert!(with_rubric.contains("according to the rubric provided"));

        let without = GEvalTemplate::generate_evaluation_results(
            "1. check",
            "Input:\nq",
            "Input",
            None,
            (0, 10),
        );
        assert!(without.contains("ranging from 0 to 10"));
        assert!(!without.contains("Rubric:"));
    }
}
