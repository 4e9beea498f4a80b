//! Real-time event schema shared by every emitter and consumer.
//!
//! Events serialize as `{"type": "<name>", "payload": {…}}`. Each §type is a
//! variant, so a payload field can't drift between the code that emits it
//! and the client that filters on `payload.projectId`.

use serde::{Deserialize, Serialize};

use crate::agents::AgentId;
use crate::models::{Dialog, Issue, Message, QueueStat};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "message.received")]
    MessageReceived { message: MessageView },

    #[serde(rename = "issue.created")]
    #[serde(rename_all = "camelCase")]
    IssueCreated {
        issue: Issue,
        requires_approval: bool,
    },

    #[serde(rename = "issue.updated")]
    IssueUpdated { issue: Issue },

    #[serde(rename = "agent.queue")]
    #[serde(rename_all = "camelCase")]
    AgentQueue {
        project_id: i64,
        queues: Vec<QueueStat>,
    },

    #[serde(rename = "agent.status")]
    #[serde(rename_all = "camelCase")]
    AgentStatus {
        project_id: i64,
        statuses: Vec<QueueStat>,
    },

    #[serde(rename = "dialog.requested")]
    #[serde(rename_all = "camelCase")]
    DialogRequested { dialog: Dialog, agent_id: String },

    #[serde(rename = "dialog.responded")]
    DialogResponded { dialog: DialogResolution },
}

/// Message payload: the stored record plus display fields the clients want
/// inline. The workspace/plan/git fields are mirrored from the metadata at
/// the top level, which is the shape the clients already consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<crate::models::PlanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<crate::workspace::git::CommitResult>,
}

impl MessageView {
    pub fn from_message(message: Message) -> Self {
        let sender_name = match message.sender_type {
            crate::models::SenderType::Agent => {
                Some(AgentId::display_name_for(&message.sender_id))
            }
            crate::models::SenderType::System => Some("System".to_string()),
            crate::models::SenderType::User => None,
        };
        Self::with_sender_name(message, sender_name)
    }

    pub fn with_sender_name(message: Message, sender_name: Option<String>) -> Self {
        let metadata = message.metadata.clone();
        let (workspace_path, notes, plan, git) = match metadata {
            Some(md) => (md.workspace_path, md.notes, md.plan, md.git),
            None => (None, None, None, None),
        };
        Self {
            message,
            sender_name,
            workspace_path,
            notes,
            plan,
            git,
        }
    }
}

/// Payload of `dialog.responded`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogResolution {
    pub id: i64,
    pub project_id: i64,
    pub agent_id: String,
    pub title: String,
    pub message: String,
    pub selected_option: String,
    pub responded_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_by_name: Option<String>,
    pub responded_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<i64>,
}
