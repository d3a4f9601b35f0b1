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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fields of a [`TestCase`] that a metric may declare as required.
///
/// `Input` and `ActualOutput` are always present (they are plain strings);
/// the remaining fields are optional and a metric that requires one fails
/// fast when it is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseField {
    Input,
    ActualOutput,
    ExpectedOutput,
    Context,
    RetrievalContext,
    ToolsCalled,
    ExpectedTools,
}

impl TestCaseField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestCaseField::Input => "input",
            TestCaseField::ActualOutput => "actual_output",
            TestCaseField::ExpectedOutput => "expected_output",
            TestCaseField::Context => "context",
            TestCaseField::RetrievalContext => "retrieval_context",
            TestCaseField::ToolsCalled => "tools_called",
            TestCaseField::ExpectedTools => "expected_tools",
        }
    }
}

impl fmt::Display for TestCaseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of generated text under evaluation.
///
/// A test case is read-only to evaluators: metrics receive `&TestCase` and
/// never mutate it. Metric-specific overrides (e.g. contextual precision
/// substituting its own `expected_output`) are expressed by building a local
/// modified copy via the `with_*` builders.
///
/// `retrieval_context` is an ordered sequence; the order represents the
/// retriever's ranking and is semantically meaningful to ranking-aware
/// metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub actual_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_context: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_called: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_tools: Option<Vec<String>>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, actual_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            actual_output: actual_output.into(),
            expected_output: None,
            context: None,
            retrieval_context: None,
            tools_called: None,
            expected_tools: None,
        }
    }

    pub fn with_expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = Some(expected_output.into());
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_retrieval_context(mut self, retrieval_context: Vec<String>) -> Self {
        self.retrieval_context = Some(retrieval_context);
        self
    }

    pub fn with_tools_called(mut self, tools_called: Vec<String>) -> Self {
        self.tools_called = Some(tools_called);
        self
    }

    pub fn with_expected_tools(mut self, expected_tools: Vec<String>) -> Self {
        self.expected_tools = Some(expected_tools);
        self
    }

    /// Whether the given field carries a value on this test case.
    pub fn has(&self, field: TestCaseField) -> bool {
        match field {
            TestCaseField::Input | TestCaseField::ActualOutput => true,
            TestCaseField::ExpectedOutput => self.expected_output.is_some(),
            TestCaseField::Context => self.context.is_some(),
            TestCaseField::RetrievalContext => self.retrieval_context.is_some(),
            TestCaseField::ToolsCalled => self.tools_called.is_some(),
            TestCaseField::ExpectedTools => self.expected_tools.is_some(),
        }
    }
}
