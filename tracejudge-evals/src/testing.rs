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

//! Scripted judge doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm_client::{
    JudgeClient, JudgeError, JudgeResponse, RawChatResponse, TokenLogprob,
};

/// A judge that replays a fixed script of responses, in order. Calls past
/// the end of the script fail, so a test also asserts how many judge calls
/// a metric makes.
pub(crate) struct StaticJudge {
    script: Mutex<VecDeque<RawChatResponse>>,
    logprobs_supported: bool,
    schema_supported: bool,
}

impl StaticJudge {
    pub(crate) fn new<S: Into<String>>(responses: Vec<S>) -> Self {
        Self {
            script: Mutex::new(
                responses
                    .into_iter()
                    .map(|text| RawChatResponse {
                        text: text.into(),
                        cost: Some(0.001),
                        logprobs: None,
                    })
                    .collect(),
            ),
            logprobs_supported: false,
            schema_supported: false,
        }
    }

    /// A logprob-capable judge: each response carries token detail.
    pub(crate) fn with_logprobs(responses: Vec<(&str, Vec<TokenLogprob>)>) -> Self {
        Self {
            script: Mutex::new(
                responses
                    .into_iter()
                    .map(|(text, logprobs)| RawChatResponse {
                        text: text.to_string(),
                        cost: Some(0.001),
                        logprobs: Some(logprobs),
                    })
                    .collect(),
            ),
            logprobs_supported: true,
            schema_supported: false,
        }
    }

    /// Mark the judge as honoring structured-output requests.
    pub(crate) fn schema_capable(mut self) -> Self {
        self.schema_supported = true;
        self
    }

    fn next(&self) -> Result<RawChatResponse, JudgeError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| JudgeError::Api("scripted judge exhausted".to_string()))
    }
}

#[async_trait]
impl JudgeClient for StaticJudge {
    async fn generate(&self, _prompt: &str) -> Result<JudgeResponse, JudgeError> {
        let raw = self.next()?;
        Ok(JudgeResponse {
            text: raw.text,
            cost: raw.cost,
        })
    }

    async fn generate_raw(
        &self,
        _prompt: &str,
        _top_logprobs: u32,
    ) -> Result<RawChatResponse, JudgeError> {
        self.next()
    }

    fn model_name(&self) -> &str {
        "static-judge"
    }

    fn supports_schema(&self) -> bool {
        self.schema_supported
    }

    fn supports_logprobs(&self) -> bool {
        self.logprobs_supported
    }
}

/// A judge whose every call fails, for error-path tests.
pub(crate) struct FailingJudge;

#[async_trait]
impl JudgeClient for FailingJudge {
    async fn generate(&self, _prompt: &str) -> Result<JudgeResponse, JudgeError> {
        Err(JudgeError::Api("judge unavailable".to_string()))
    }

    async fn generate_raw(
        &self,
        _prompt: &str,
        _top_logprobs: u32,
    ) -> Result<RawChatResponse, JudgeError> {
        Err(JudgeError::Api("judge unavailable".to_string()))
    }

    fn model_name(&self) -> &str {
        "failing-judge"
    }
}

/// A judge that never answers within any reasonable deadline.
pub(crate) struct StallingJudge;

#[async_trait]
impl JudgeClient for StallingJudge {
    async fn generate(&self, _prompt: &str) -> Result<JudgeResponse, JudgeError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(JudgeError::Api("unreachable".to_string()))
    }

    async fn generate_raw(
        &self,
        _prompt: &str,
        _top_logprobs: u32,
    ) -> Result<RawChatResponse, JudgeError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Err(JudgeError::Api("unreachable".to_string()))
    }

    fn model_name(&self) -> &str {
        "stalling-judge"
    }
}
