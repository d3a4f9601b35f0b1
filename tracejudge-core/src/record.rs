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

/// Row shape forwarded to the persistence sink after a successful
/// measurement. The sink owns ID minting and storage layout; this crate only
/// defines the contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub metric_name: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub parent_id: String,
    pub parent_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Origin of the evaluation, e.g. "manual" or "automatic".
    pub source: String,
    pub model: String,
    /// Metric family tag, e.g. "geval" or "contextual_precision".
    pub eval_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_empty_optionals() {
        let record = EvaluationRecord {
            metric_name: "Answer Quality".to_string(),
            score: 0.8,
            reason: None,
            parent_id: "span-1".to_string(),
            parent_type: "span".to_string(),
            project_id: None,
            source: "automatic".to_string(),
            model: "gpt-4o-mini".to_string(),
            eval_type: "geval".to_string(),
            tags: None,
            meta: None,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["score"], 0.8);
        assert!(json.get("reason").is_none());
        assert!(json.get("project_id").is_none());
    }
}
