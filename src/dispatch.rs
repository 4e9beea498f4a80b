//! Background workers: the dispatcher that claims queued issues and the
//! periodic queue-snapshot broadcaster.
//!
//! The dispatcher claims at most one issue per tick. There is no per-agent
//! concurrency limit; the conditional claim update in the store is the only
//! guard, which also serializes workspace access per project within one
//! process. The snapshot worker rebroadcasts queue/status grids even when
//! nothing was claimed so clients observe drift caused by direct API edits.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::agents::AgentId;
use crate::agents::runner::AgentRunner;
use crate::db::{ClaimedIssue, DbHandle};
use crate::events::Event;
use crate::hub::Hub;

/// How often the dispatcher tries to claim work.
pub const DISPATCH_INTERVAL: Duration = Duration::from_secs(4);

/// How often queue/status snapshots are rebroadcast.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    db: DbHandle,
    hub: Arc<Hub>,
    runner: Arc<AgentRunner>,
}

impl Dispatcher {
    pub fn new(db: DbHandle, hub: Arc<Hub>, runner: Arc<AgentRunner>) -> Self {
        Self { db, hub, runner }
    }

    /// Claim-and-run loop. Exits when the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(DISPATCH_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    eprintln!("[dispatch] worker shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        let claimed = match self.db.call(|db| db.claim_next_queued_issue()).await {
            Ok(claimed) => claimed,
            Err(e) => {
                eprintln!("[dispatch] failed to claim issue: {:#}", e);
                return;
            }
        };
        let issue = match claimed {
            Some(issue) => issue,
            None => return,
        };

        let agent = match AgentId::from_str(&issue.agent_id) {
            Ok(agent) => agent,
            Err(_) => {
                eprintln!(
                    "[dispatch] issue {} queued to unknown agent '{}', skipping",
                    issue.id, issue.agent_id
                );
                return;
            }
        };

        let prompt = build_task_prompt(&issue);
        self.runner
            .run(
                issue.project_id,
                agent,
                Some(issue.id),
                Some(issue.title.clone()),
                prompt,
            )
            .await;

        let issue_id = issue.id;
        match self.db.call(move |db| db.get_issue(issue_id)).await {
            Ok(Some(fresh)) => self.hub.broadcast(&Event::IssueUpdated { issue: fresh }),
            Ok(None) => {}
            Err(e) => eprintln!("[dispatch] unable to broadcast update for {}: {:#}", issue_id, e),
        }
        push_agent_snapshots(&self.db, &self.hub, issue.project_id).await;
    }
}

/// Periodic snapshot loop covering every project.
pub async fn queue_snapshot_worker(db: DbHandle, hub: Arc<Hub>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(SNAPSHOT_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                eprintln!("[queue] worker shutting down");
                return;
            }
            _ = ticker.tick() => {
                let projects = match db.call(|db| db.project_ids()).await {
                    Ok(projects) => projects,
                    Err(e) => {
                        eprintln!("[queue] failed to list projects: {:#}", e);
                        continue;
                    }
                };
                for project_id in projects {
                    push_agent_snapshots(&db, &hub, project_id).await;
                }
            }
        }
    }
}

/// Broadcast both the `agent.queue` and `agent.status` snapshots for a
/// project.
pub async fn push_agent_snapshots(db: &DbHandle, hub: &Hub, project_id: i64) {
    let stats = match db.call(move |db| db.collect_queue_stats(project_id)).await {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!(
                "[queue] failed to collect stats for project {}: {:#}",
                project_id, e
            );
            return;
        }
    };

    hub.broadcast(&Event::AgentQueue {
        project_id,
        queues: stats.clone(),
    });
    hub.broadcast(&Event::AgentStatus {
        project_id,
        statuses: stats,
    });
}

/// The brief handed to an agent for a claimed queue task.
pub fn build_task_prompt(issue: &ClaimedIssue) -> String {
    let description = issue.description.trim();
    let description = if description.is_empty() {
        "No additional description provided."
    } else {
        description
    };

    format!(
        "You have been assigned a queued task.\n\n\
         Title: {}\n\
         Priority: {}\n\
         Description:\n{}\n\n\
         Begin work immediately, update the project workspace as needed, and summarize your \
         changes when you respond.",
        issue.title,
        issue.priority.as_str().to_uppercase(),
        description
    )
}
