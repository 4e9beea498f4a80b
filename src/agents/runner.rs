//! End-to-end execution of one agent turn.
//!
//! A run goes: workspace ready → model generate → structured-block side
//! effects → mutation plan apply → VCS commit → chat message → issue
//! completion. Every stage is a best-effort checkpoint: failures downgrade
//! to a logged note and the remaining stages still run. The only
//! short-circuit is a missing/errored model backend, which posts the
//! agent's canned fallback and skips plan processing entirely.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::agents::blocks::{StructuredBlock, extract_structured_blocks, split_csv};
use crate::agents::plan::parse_action_plan;
use crate::agents::{AgentId, prompts};
use crate::db::{DbHandle, NewDialog, NewIssue, NewMessage};
use crate::events::{Event, MessageView};
use crate::gateway::{GENERATE_DEADLINE, ModelGateway};
use crate::hub::Hub;
use crate::models::{
    IssueStatus, MessageMetadata, MessageType, PlanSummary, Priority, SenderType,
    WorkspaceSettings,
};
use crate::workspace;
use crate::workspace::git::{self, CommitOutcome, CommitResult};
use crate::workspace::mutator;

pub struct AgentRunner {
    db: DbHandle,
    hub: Arc<Hub>,
    gateway: Option<Arc<dyn ModelGateway>>,
    projects_root: PathBuf,
}

impl AgentRunner {
    pub fn new(
        db: DbHandle,
        hub: Arc<Hub>,
        gateway: Option<Arc<dyn ModelGateway>>,
        projects_root: PathBuf,
    ) -> Self {
        Self {
            db,
            hub,
            gateway,
            projects_root,
        }
    }

    /// Execute one agent turn. `issue_id` is set when the turn was claimed
    /// from the queue; the issue is completed once the reply is posted.
    pub async fn run(
        &self,
        project_id: i64,
        agent: AgentId,
        issue_id: Option<i64>,
        issue_title: Option<String>,
        user_message: String,
    ) {
        let mut response_text;
        let mut plan_notes: Vec<String> = Vec::new();
        let mut plan_summary: Option<PlanSummary> = None;
        let mut git_info: Option<CommitResult> = None;

        let workspace_path = match self.ensure_workspace(project_id).await {
            Ok(path) => Some(path),
            Err(e) => {
                eprintln!(
                    "[workspace] failed to prepare workspace for project {}: {:#}",
                    project_id, e
                );
                None
            }
        };

        match &self.gateway {
            None => {
                eprintln!("[agent] no model backend configured, using fallback");
                response_text = agent.fallback_response().to_string();
            }
            Some(gateway) => {
                let system_prompt = prompts::system_prompt(agent);
                let hint = workspace_path.as_ref().map(|_| prompts::WORKSPACE_HINT);
                let output = gateway
                    .generate(&system_prompt, hint, &user_message, GENERATE_DEADLINE)
                    .await;

                match output {
                    Err(e) => {
                        eprintln!("[agent] model request failed: {:#}", e);
                        response_text = agent.fallback_response().to_string();
                    }
                    Ok(output) if output.trim().is_empty() => {
                        response_text = agent.fallback_response().to_string();
                    }
                    Ok(output) => {
                        let (clean, blocks) = extract_structured_blocks(&output);
                        if !blocks.is_empty() {
                            let notes =
                                self.handle_structured_blocks(project_id, agent, &blocks).await;
                            plan_notes.extend(notes);
                        }

                        let mut processed = clean.trim().to_string();
                        if processed.is_empty() {
                            processed = "Structured actions processed.".to_string();
                        }
                        response_text = processed.clone();

                        if let Some(ws) = &workspace_path {
                            if let Ok(plan) = parse_action_plan(&processed) {
                                plan_summary = plan.summarize();
                                if plan.has_changes() {
                                    match mutator::apply_plan(ws, agent.display_name(), &plan) {
                                        Err(e) => {
                                            eprintln!(
                                                "[agent] failed to apply plan for project {}: {}",
                                                project_id, e
                                            );
                                            response_text = format!(
                                                "{} produced changes but hit an error: {}",
                                                agent.display_name(),
                                                e
                                            );
                                        }
                                        Ok(summary) => {
                                            response_text = summary;
                                            plan_notes.extend(plan.notes.iter().cloned());

                                            let commit_msg = build_commit_message(
                                                agent,
                                                issue_title.as_deref(),
                                                &response_text,
                                                &plan_notes,
                                            );
                                            match git::commit_workspace_changes(ws, &commit_msg)
                                                .await
                                            {
                                                Ok(CommitOutcome::Committed(result)) => {
                                                    plan_notes.push(git_note(&result));
                                                    git_info = Some(result);
                                                }
                                                Ok(CommitOutcome::NoChange) => {}
                                                Err(e) => {
                                                    eprintln!(
                                                        "[git] commit workflow failed for project {}: {:#}",
                                                        project_id, e
                                                    );
                                                    plan_notes
                                                        .push(format!("Git commit skipped: {}", e));
                                                }
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        self.send_agent_message(
            project_id,
            agent,
            &response_text,
            MessageType::Chat,
            plan_notes,
            workspace_path.as_deref(),
            plan_summary,
            git_info,
        )
        .await;

        if let Some(issue_id) = issue_id {
            if let Err(e) = self.complete_issue(issue_id).await {
                eprintln!("[agent] failed to complete issue {}: {:#}", issue_id, e);
            }
        }

        let lowered = user_message.to_lowercase();
        if lowered.contains("create task") || lowered.contains("add task") {
            self.propose_task(project_id, agent).await;
        }
    }

    /// Look up or create the project workspace directory, persisting default
    /// settings when the project had none.
    async fn ensure_workspace(&self, project_id: i64) -> Result<PathBuf> {
        let settings = self
            .db
            .call(move |db| db.load_settings(project_id))
            .await?;

        let path = match &settings {
            Some(s) if !s.workspace_path.is_empty() => PathBuf::from(&s.workspace_path),
            _ => workspace::workspace_path(&self.projects_root, project_id),
        };
        workspace::ensure_workspace(&path)?;

        if settings.is_none() {
            let defaults = WorkspaceSettings {
                workspace_path: path.to_string_lossy().into_owned(),
                repo_type: None,
                repo_url: None,
            };
            if let Err(e) = self
                .db
                .call(move |db| db.save_settings(project_id, &defaults))
                .await
            {
                eprintln!(
                    "[workspace] unable to save default settings for {}: {:#}",
                    project_id, e
                );
            }
        }

        Ok(path)
    }

    async fn handle_structured_blocks(
        &self,
        project_id: i64,
        agent: AgentId,
        blocks: &[StructuredBlock],
    ) -> Vec<String> {
        let mut notes = Vec::new();
        for block in blocks {
            match block.type_name.as_str() {
                "issue" => match self.handle_issue_block(project_id, agent, block).await {
                    Ok(Some(note)) => notes.push(note),
                    Ok(None) => {}
                    Err(e) => eprintln!("[agent] failed to create issue from block: {:#}", e),
                },
                "mention" => {
                    if let Some(note) = self.handle_mention_block(project_id, agent, block).await {
                        notes.push(note);
                    }
                }
                "dialog" => {
                    if let Some(note) = self.handle_dialog_block(project_id, agent, block).await {
                        notes.push(note);
                    }
                }
                _ => {}
            }
        }
        notes
    }

    /// `@issue` block: create a `todo` issue queued to the named assignee,
    /// defaulting to the creating agent.
    async fn handle_issue_block(
        &self,
        project_id: i64,
        agent: AgentId,
        block: &StructuredBlock,
    ) -> Result<Option<String>> {
        let title = block.field("title").to_string();
        if title.is_empty() {
            return Ok(None);
        }

        let description = block.field("description").to_string();
        let priority = Priority::normalize(block.field("priority"));
        let tags = split_csv(block.field("tags")).join(",");
        let assignee = AgentId::normalize_identifier(block.field("assignee")).unwrap_or(agent);

        let new_issue = NewIssue {
            project_id,
            title: title.clone(),
            description,
            priority,
            status: IssueStatus::Todo,
            created_by: agent.as_str().to_string(),
            created_by_type: SenderType::Agent,
            assigned_agent_id: Some(assignee.as_str().to_string()),
            queued_agent_id: Some(assignee.as_str().to_string()),
            tags: if tags.is_empty() { None } else { Some(tags) },
        };
        let issue = self.db.call(move |db| db.create_issue(&new_issue)).await?;

        self.hub.broadcast(&Event::IssueCreated {
            issue,
            requires_approval: false,
        });
        Ok(Some(format!("Created issue: {}", title)))
    }

    /// `@mention` block: persist a system message addressed to the target.
    async fn handle_mention_block(
        &self,
        project_id: i64,
        agent: AgentId,
        block: &StructuredBlock,
    ) -> Option<String> {
        let message = block.field("message");
        if message.is_empty() {
            return None;
        }
        let target = match block.field("agent") {
            "" => "team",
            other => other,
        };
        let content = format!("@mention to {}: {}", target, message);
        self.send_agent_message(
            project_id,
            agent,
            &content,
            MessageType::System,
            Vec::new(),
            None,
            None,
            None,
        )
        .await;
        Some(format!("Mentioned {}", target))
    }

    /// `@dialog` block: persist an open dialog and announce it.
    async fn handle_dialog_block(
        &self,
        project_id: i64,
        agent: AgentId,
        block: &StructuredBlock,
    ) -> Option<String> {
        let title = block.field("title").to_string();
        let new_dialog = NewDialog {
            project_id,
            agent_id: agent.as_str().to_string(),
            issue_id: block.field("issue").parse().ok(),
            title: title.clone(),
            message: block.field("message").to_string(),
            options: split_csv(block.field("options")),
            default_option: block.field("default").to_string(),
        };

        let dialog = match self.db.call(move |db| db.create_dialog(&new_dialog)).await {
            Ok(dialog) => dialog,
            Err(e) => {
                eprintln!("[dialog] failed to persist dialog: {:#}", e);
                return None;
            }
        };

        self.hub.broadcast(&Event::DialogRequested {
            dialog,
            agent_id: agent.as_str().to_string(),
        });

        if title.is_empty() {
            Some("Requested user decision".to_string())
        } else {
            Some(format!("Requested decision: {}", title))
        }
    }

    /// Persist an agent-authored message and fan it out.
    #[allow(clippy::too_many_arguments)]
    async fn send_agent_message(
        &self,
        project_id: i64,
        agent: AgentId,
        content: &str,
        message_type: MessageType,
        notes: Vec<String>,
        workspace_path: Option<&Path>,
        plan: Option<PlanSummary>,
        git_info: Option<CommitResult>,
    ) {
        let metadata = MessageMetadata {
            workspace_path: workspace_path.map(|p| p.to_string_lossy().into_owned()),
            notes: if notes.is_empty() { None } else { Some(notes) },
            plan,
            git: git_info,
        };

        let new_message = NewMessage {
            project_id,
            sender_id: agent.as_str().to_string(),
            sender_type: SenderType::Agent,
            content: content.to_string(),
            message_type,
            metadata: Some(metadata),
        };

        let message = match self.db.call(move |db| db.create_message(&new_message)).await {
            Ok(message) => message,
            Err(e) => {
                eprintln!("[agent] failed to save {} message: {:#}", message_type.as_str(), e);
                return;
            }
        };

        self.hub.broadcast(&Event::MessageReceived {
            message: MessageView::from_message(message),
        });
    }

    /// Transition the issue to done and announce the update, unless another
    /// actor already completed it.
    async fn complete_issue(&self, issue_id: i64) -> Result<()> {
        let updated = self.db.call(move |db| db.complete_issue(issue_id)).await?;
        if !updated {
            return Ok(());
        }
        if let Some(issue) = self.db.call(move |db| db.get_issue(issue_id)).await? {
            self.hub.broadcast(&Event::IssueUpdated { issue });
        }
        Ok(())
    }

    /// Chat heuristic: a user asking to "create task" gets a canned proposed
    /// issue from the responding agent, flagged for approval.
    async fn propose_task(&self, project_id: i64, agent: AgentId) {
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;

        let (title, description) = agent.proposed_task();
        let new_issue = NewIssue {
            project_id,
            title: title.to_string(),
            description: description.to_string(),
            priority: Priority::Medium,
            status: IssueStatus::Proposed,
            created_by: agent.as_str().to_string(),
            created_by_type: SenderType::Agent,
            assigned_agent_id: None,
            queued_agent_id: None,
            tags: None,
        };

        match self.db.call(move |db| db.create_issue(&new_issue)).await {
            Ok(issue) => {
                self.hub.broadcast(&Event::IssueCreated {
                    issue,
                    requires_approval: true,
                });
            }
            Err(e) => eprintln!("[agent] failed to create proposed task: {:#}", e),
        }
    }
}

/// Commit subject for a plan apply: the issue title when there is one, else
/// the first note, else the apply summary, prefixed with the agent name.
pub fn build_commit_message(
    agent: AgentId,
    issue_title: Option<&str>,
    summary: &str,
    notes: &[String],
) -> String {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(title) = issue_title {
        candidates.push(title);
    }
    if let Some(first) = notes.first() {
        candidates.push(first);
    }
    candidates.push(summary);

    let base = candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .unwrap_or("Workspace update");
    let base = base.lines().next().unwrap_or(base);

    format!("{}: {}", agent.display_name(), base)
}

/// Human-readable note describing a commit and its push outcome.
pub fn git_note(result: &CommitResult) -> String {
    let short = short_sha(&result.commit_id);
    let branch = match result.branch.trim() {
        "" => "HEAD",
        b => b,
    };

    let mut status = if result.pushed {
        format!("pushed to origin/{}", branch)
    } else if result.remote.as_deref().map(str::trim).unwrap_or("") != "" {
        format!("recorded on {} (push pending)", branch)
    } else {
        format!("recorded on {} (no remote)", branch)
    };

    if let Some(push_error) = &result.push_error {
        status.push_str(&format!("; push error: {}", push_error));
    }

    format!("Git commit {} {}", short, status)
}

fn short_sha(commit: &str) -> String {
    let commit = commit.trim();
    if commit.is_empty() {
        return "unknown".to_string();
    }
    commit.chars().take(7).collect()
}
