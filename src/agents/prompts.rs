//! Prompt fragments shared by every agent turn.

/// Contract appended to every role prompt: the JSON plan schema plus the
/// structured-block syntax for issues, dialogs, and mentions.
pub const PLAN_FORMAT_INSTRUCTIONS: &str = r#"Always respond with a minified JSON object describing the work you performed.
Schema: {
  "files": [
    {"path": "relative/path.ext", "content": "full file contents", "overwrite": true}
  ],
  "mutations": [
    {"path": "relative/path.ext", "find": "exact substring to replace", "replace": "new text"}
  ],
  "notes": ["short status strings"]
}
Paths must stay inside the assigned project workspace. Do not wrap JSON in code fences or add commentary.

When you need to collaborate or create workflow artifacts, emit the following structured blocks verbatim (outside of the JSON plan):

@mention - Request collaboration
@mention
agent: Backend Architect
message: Please review the API design
---

@dialog - Request user decisions
@dialog
title: Authentication Method
message: Which method should we use?
options: JWT tokens, OAuth2, Magic links
default: JWT tokens
---

@issue - Create kanban tasks
@issue
title: Implement user authentication system
description: JWT-based auth with login/signup
priority: high
tags: backend, auth, security
assignee: Backend Architect
---"#;

/// Workspace framing sent as an extra system message so the model addresses
/// files relative to the project root and never leaks host paths.
pub const WORKSPACE_HINT: &str = "Workspace root alias: ./ (project root). Always reference files \
relative to this root (e.g. src/routes/index.ts). Never mention host-specific paths under \
data/projects/…";

/// Full system prompt for one agent turn.
pub fn system_prompt(agent: super::AgentId) -> String {
    format!("{}\n\n{}", agent.role_prompt(), PLAN_FORMAT_INSTRUCTIONS)
}
