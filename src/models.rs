use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::workspace::git::CommitResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<WorkspaceSettings>,
    pub created_at: String,
}

/// Per-project workspace record persisted as JSON on the project row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettings {
    pub workspace_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Dispatch rank: lower claims first.
    pub fn rank(&self) -> i32 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Map loose model output onto the four-value enum. Anything
    /// unrecognized lands on `medium`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "urgent" => Self::Urgent,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urgent" => Ok(Self::Urgent),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue lifecycle states. The wire strings keep the client's camelCase
/// convention (`inProgress`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueStatus {
    Proposed,
    Todo,
    InProgress,
    Review,
    Done,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Todo => "todo",
            Self::InProgress => "inProgress",
            Self::Review => "review",
            Self::Done => "done",
        }
    }
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::Proposed
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "todo" => Ok(Self::Todo),
            "inProgress" => Ok(Self::InProgress),
            "review" => Ok(Self::Review),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid issue status: {}", s)),
        }
    }
}

impl std::fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    User,
    Agent,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

impl Default for SenderType {
    fn default() -> Self {
        Self::User
    }
}

impl FromStr for SenderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid sender type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Chat,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::System => "system",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid message type: {}", s)),
        }
    }
}

/// The unit of work. One record type backs the store rows, the REST
/// responses, and every event payload so all consumers share the shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub status: IssueStatus,
    pub created_by: String,
    pub created_by_type: SenderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogStatus {
    Open,
    Resolved,
}

impl DialogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }
}

impl FromStr for DialogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("Invalid dialog status: {}", s)),
        }
    }
}

/// An agent-initiated multiple-choice decision request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialog {
    pub id: i64,
    pub project_id: i64,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<i64>,
    pub title: String,
    pub message: String,
    pub options: Vec<String>,
    pub default_option: String,
    pub status: DialogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<String>,
    pub created_at: String,
}

impl Dialog {
    /// Resolve the effective selection for this dialog.
    ///
    /// Blank input falls back to the default option, then to the first
    /// option. A non-blank selection must match one of the options
    /// case-insensitively (the stored casing wins); a mismatch falls back to
    /// the default when one exists.
    pub fn choose_option(&self, selected: &str) -> Result<String, crate::errors::CoreError> {
        use crate::errors::CoreError;

        let mut choice = selected.trim().to_string();
        if choice.is_empty() {
            choice = self.default_option.trim().to_string();
        }
        if choice.is_empty() {
            if let Some(first) = self.options.first() {
                choice = first.trim().to_string();
            }
        }
        if choice.is_empty() {
            return Err(CoreError::OptionRequired);
        }

        if self.options.is_empty() {
            return Ok(choice);
        }

        for option in &self.options {
            let trimmed = option.trim();
            if trimmed.eq_ignore_ascii_case(choice.trim()) {
                return Ok(trimmed.to_string());
            }
        }

        let fallback = self.default_option.trim();
        if !fallback.is_empty() {
            return Ok(fallback.to_string());
        }
        Err(CoreError::InvalidOption)
    }
}

/// Structured metadata attached to agent/system chat messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<CommitResult>,
}

impl MessageMetadata {
    pub fn is_empty(&self) -> bool {
        self.workspace_path.is_none()
            && self.notes.is_none()
            && self.plan.is_none()
            && self.git.is_none()
    }
}

/// Paths a mutation plan touched, for display alongside the agent's reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub files: Vec<String>,
    pub mutations: Vec<String>,
}

/// Append-only chat log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub project_id: i64,
    pub sender_id: String,
    pub sender_type: SenderType,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentActivity {
    Working,
    Queued,
    Idle,
}

/// Per-agent queue/status snapshot entry. Stays snake_case on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStat {
    pub project_id: i64,
    pub agent_id: String,
    pub queue_depth: i64,
    pub in_progress: i64,
    pub status: AgentActivity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_issue_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_issue_title: Option<String>,
}

impl QueueStat {
    pub fn idle(project_id: i64, agent_id: &str) -> Self {
        Self {
            project_id,
            agent_id: agent_id.to_string(),
            queue_depth: 0,
            in_progress: 0,
            status: AgentActivity::Idle,
            current_issue_id: None,
            current_issue_title: None,
        }
    }

    pub fn derive_status(&mut self) {
        self.status = if self.in_progress > 0 {
            AgentActivity::Working
        } else if self.queue_depth > 0 {
            AgentActivity::Queued
        } else {
            AgentActivity::Idle
        };
    }
}
