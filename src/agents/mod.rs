//! The agent roster and per-role text assets.
//!
//! Agents are a closed set identified by stable snake_case strings. Each one
//! carries a display name, a mention token, a role system prompt, a canned
//! fallback reply for when the model backend is unavailable, and a proposed
//! task used by the "create task" chat heuristic.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod blocks;
pub mod detector;
pub mod plan;
pub mod prompts;
pub mod runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    ProductManager,
    BackendArchitect,
    FrontendDeveloper,
    QaTester,
    DevopsEngineer,
}

/// Every agent the queue/status grid must always include.
pub const DEFAULT_AGENTS: [AgentId; 5] = [
    AgentId::ProductManager,
    AgentId::BackendArchitect,
    AgentId::FrontendDeveloper,
    AgentId::QaTester,
    AgentId::DevopsEngineer,
];

impl AgentId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductManager => "product_manager",
            Self::BackendArchitect => "backend_architect",
            Self::FrontendDeveloper => "frontend_developer",
            Self::QaTester => "qa_tester",
            Self::DevopsEngineer => "devops_engineer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ProductManager => "Product Manager",
            Self::BackendArchitect => "Backend Architect",
            Self::FrontendDeveloper => "Frontend Developer",
            Self::QaTester => "QA Tester",
            Self::DevopsEngineer => "DevOps Engineer",
        }
    }

    /// Leading `@`-token that routes a chat message straight to this agent.
    pub fn mention_token(&self) -> &'static str {
        match self {
            Self::ProductManager => "@pm",
            Self::BackendArchitect => "@backend",
            Self::FrontendDeveloper => "@frontend",
            Self::QaTester => "@qa",
            Self::DevopsEngineer => "@devops",
        }
    }

    /// Role half of the system prompt. The runner appends the plan-format
    /// and structured-block contracts from [`prompts`].
    pub fn role_prompt(&self) -> &'static str {
        match self {
            Self::ProductManager => {
                "You are a Product Manager AI agent in a collaborative team workspace.\n\
                 Your role is to gather requirements, create user stories, and define project scope.\n\
                 Be concise and helpful. Ask clarifying questions when needed.\n\
                 Keep responses under 200 words."
            }
            Self::BackendArchitect => {
                "You are a Backend Architect AI agent in a collaborative team workspace.\n\
                 Your role is to design APIs, database schemas, and server architecture.\n\
                 Be technical but clear. Provide concrete suggestions.\n\
                 Keep responses under 200 words."
            }
            Self::FrontendDeveloper => {
                "You are a Frontend Developer AI agent in a collaborative team workspace.\n\
                 Your role is to build UI components, handle state management, and ensure responsive design.\n\
                 Be practical and focus on implementation. Share best practices.\n\
                 Keep responses under 200 words."
            }
            Self::QaTester => {
                "You are a QA Tester AI agent in a collaborative team workspace.\n\
                 Your role is to validate new functionality, design automated/manual tests, and report regressions.\n\
                 Describe the scenarios you verify, add or update test files, and share any defects you find.\n\
                 Keep responses under 200 words."
            }
            Self::DevopsEngineer => {
                "You are a DevOps Engineer AI agent in a collaborative team workspace.\n\
                 Your role is to manage infrastructure, CI/CD pipelines, deployment scripts, and operational tooling.\n\
                 Provide practical improvements, update configs/scripts, and verify commands.\n\
                 Keep responses under 200 words."
            }
        }
    }

    /// Canned reply used when the model backend is missing or errored.
    pub fn fallback_response(&self) -> &'static str {
        match self {
            Self::ProductManager => {
                "I understand you need help with requirements. Let me analyze what you're asking for.\n\n\
                 Based on your message, I can help break this down into actionable tasks. \
                 Would you like me to create some initial user stories and features?"
            }
            Self::BackendArchitect => {
                "I can help with the backend architecture for this feature.\n\n\
                 Here's what I'm thinking:\n\
                 - Design the database schema\n\
                 - Create REST API endpoints\n\
                 - Set up proper error handling and validation\n\n\
                 Should I create tasks for these items?"
            }
            Self::FrontendDeveloper => {
                "I can help build the frontend components for this.\n\n\
                 I'll focus on:\n\
                 - Creating reusable UI components\n\
                 - Implementing responsive design\n\
                 - Ensuring good UX patterns\n\n\
                 Let me know if you'd like me to start on any specific part."
            }
            Self::QaTester => {
                "I can validate the functionality we just discussed.\n\n\
                 I'll prepare or update test cases, run the relevant suites, and report any regressions I find.\n\
                 Let me know if there are specific scenarios or environments I should focus on."
            }
            Self::DevopsEngineer => {
                "I can help with the infrastructure and delivery pipeline for this work.\n\n\
                 I'm thinking:\n\
                 - Update CI/CD or deployment scripts\n\
                 - Adjust infrastructure-as-code templates\n\
                 - Verify monitoring or rollout steps\n\n\
                 Would you like me to start on any particular environment or pipeline stage?"
            }
        }
    }

    /// Title and description for the task this agent proposes when a user
    /// asks it to "create task" in chat.
    pub fn proposed_task(&self) -> (&'static str, &'static str) {
        match self {
            Self::ProductManager => (
                "Define user requirements and acceptance criteria",
                "Gather and document user requirements, create user stories with clear acceptance criteria",
            ),
            Self::BackendArchitect => (
                "Design API endpoints and database schema",
                "Design RESTful API structure and database schema with proper relationships",
            ),
            Self::FrontendDeveloper => (
                "Create responsive UI components",
                "Build reusable UI components with responsive design and accessibility",
            ),
            Self::QaTester => (
                "Validate latest feature and regression suite",
                "Design automated/manual tests for new features, run regression suites, and report issues",
            ),
            Self::DevopsEngineer => (
                "Improve deployment pipeline and infrastructure",
                "Update CI/CD configuration, infrastructure-as-code, or deployment scripts to support new changes",
            ),
        }
    }

    /// Resolve loose identifiers coming out of model replies (`assignee:
    /// Backend Architect`, `pm`, `ba`, …) onto a known agent.
    pub fn normalize_identifier(value: &str) -> Option<Self> {
        let v = value.trim().to_lowercase().replace(['-', ' '], "_");
        match v.as_str() {
            "pm" | "productmanager" | "product_manager" => Some(Self::ProductManager),
            "backend" | "backend_architect" | "backendarchitect" | "ba" => {
                Some(Self::BackendArchitect)
            }
            "frontend" | "frontend_developer" | "frontenddeveloper" | "fd" => {
                Some(Self::FrontendDeveloper)
            }
            "qa" | "tester" | "qa_tester" | "qatester" => Some(Self::QaTester),
            "devops" | "devops_engineer" | "devopsengineer" | "sre" => Some(Self::DevopsEngineer),
            _ => None,
        }
    }

    /// Display name for an arbitrary stored agent id, falling back to the
    /// raw string for ids that predate the current roster.
    pub fn display_name_for(id: &str) -> String {
        match AgentId::from_str(id) {
            Ok(agent) => agent.display_name().to_string(),
            Err(_) => id.to_string(),
        }
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_manager" => Ok(Self::ProductManager),
            "backend_architect" => Ok(Self::BackendArchitect),
            "frontend_developer" => Ok(Self::FrontendDeveloper),
            "qa_tester" => Ok(Self::QaTester),
            "devops_engineer" => Ok(Self::DevopsEngineer),
            _ => Err(format!("Unknown agent id: {}", s)),
        }
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
