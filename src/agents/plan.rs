//! Workspace mutation plans parsed from agent replies.
//!
//! The plan is a JSON object; parsing is deliberately permissive about
//! surrounding prose (first strict, then the `{`…`}` substring). Semantic
//! checks — path sandboxing, file existence — belong to the workspace
//! mutator, not here.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::models::PlanSummary;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPlan {
    pub files: Vec<GeneratedFile>,
    pub mutations: Vec<FileMutation>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overwrite: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMutation {
    pub path: String,
    pub find: String,
    pub replace: String,
}

impl ActionPlan {
    pub fn has_changes(&self) -> bool {
        !self.files.is_empty() || !self.mutations.is_empty()
    }

    /// Paths the plan names, for message metadata. `None` when the plan
    /// touches nothing.
    pub fn summarize(&self) -> Option<PlanSummary> {
        let files: Vec<String> = self
            .files
            .iter()
            .filter(|f| !f.path.is_empty())
            .map(|f| f.path.clone())
            .collect();
        let mutations: Vec<String> = self
            .mutations
            .iter()
            .filter(|m| !m.path.is_empty())
            .map(|m| m.path.clone())
            .collect();

        if files.is_empty() && mutations.is_empty() {
            return None;
        }
        Some(PlanSummary { files, mutations })
    }
}

/// Parse an [`ActionPlan`] out of raw model output.
pub fn parse_action_plan(output: &str) -> Result<ActionPlan> {
    let clean = output.trim();
    if let Ok(plan) = serde_json::from_str::<ActionPlan>(clean) {
        return Ok(plan);
    }

    if let (Some(start), Some(end)) = (clean.find('{'), clean.rfind('}')) {
        if end > start {
            if let Ok(plan) = serde_json::from_str::<ActionPlan>(&clean[start..=end]) {
                return Ok(plan);
            }
        }
    }

    Err(anyhow!("unable to parse agent plan output"))
}
