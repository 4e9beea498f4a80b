//! Keyword/mention routing from free-form text to exactly one agent.
//!
//! Mentions win immediately. Otherwise a static rule table is scanned and the
//! highest-priority match is returned, so specific cues like "backend"
//! outrank generic verbs like "build". Detection is pure and
//! case-insensitive.

use super::AgentId;

struct KeywordRule {
    keyword: &'static str,
    agent: AgentId,
    priority: i32,
    word_only: bool,
}

const fn rule(keyword: &'static str, agent: AgentId, priority: i32) -> KeywordRule {
    KeywordRule {
        keyword,
        agent,
        priority,
        word_only: false,
    }
}

const fn word_rule(keyword: &'static str, agent: AgentId, priority: i32) -> KeywordRule {
    KeywordRule {
        keyword,
        agent,
        priority,
        word_only: true,
    }
}

static KEYWORD_RULES: &[KeywordRule] = &[
    // Backend cues carry the highest priority so they win over generic verbs.
    rule("backend", AgentId::BackendArchitect, 100),
    rule("back-end", AgentId::BackendArchitect, 100),
    word_rule("api", AgentId::BackendArchitect, 90),
    rule("database", AgentId::BackendArchitect, 90),
    rule("schema", AgentId::BackendArchitect, 80),
    rule("server", AgentId::BackendArchitect, 75),
    rule("architecture", AgentId::BackendArchitect, 70),
    rule("design", AgentId::BackendArchitect, 65),
    // Frontend cues are next in priority.
    rule("frontend", AgentId::FrontendDeveloper, 100),
    rule("front-end", AgentId::FrontendDeveloper, 100),
    word_rule("ui", AgentId::FrontendDeveloper, 90),
    rule("component", AgentId::FrontendDeveloper, 80),
    rule("interface", AgentId::FrontendDeveloper, 75),
    rule("implement", AgentId::FrontendDeveloper, 60),
    // QA tester cues.
    rule("test", AgentId::QaTester, 85),
    word_rule("qa", AgentId::QaTester, 85),
    rule("verify", AgentId::QaTester, 70),
    rule("bug", AgentId::QaTester, 65),
    rule("regression", AgentId::QaTester, 65),
    rule("automated", AgentId::QaTester, 60),
    // DevOps cues.
    rule("deploy", AgentId::DevopsEngineer, 90),
    rule("deployment", AgentId::DevopsEngineer, 90),
    rule("infrastructure", AgentId::DevopsEngineer, 85),
    rule("pipeline", AgentId::DevopsEngineer, 80),
    word_rule("ci", AgentId::DevopsEngineer, 75),
    word_rule("cd", AgentId::DevopsEngineer, 75),
    rule("docker", AgentId::DevopsEngineer, 70),
    // Product management keywords are intentionally lower priority.
    rule("requirement", AgentId::ProductManager, 60),
    rule("feature", AgentId::ProductManager, 55),
    rule("need", AgentId::ProductManager, 50),
    rule("want", AgentId::ProductManager, 45),
    rule("build", AgentId::ProductManager, 40),
    rule("create", AgentId::ProductManager, 35),
    rule("plan", AgentId::ProductManager, 30),
];

/// Pick the agent that should respond to `content`, if any.
pub fn detect(content: &str) -> Option<AgentId> {
    let content = content.to_lowercase();

    for agent in super::DEFAULT_AGENTS {
        if content.contains(agent.mention_token()) {
            return Some(agent);
        }
    }

    let mut selected = None;
    let mut max_priority = -1;
    for rule in KEYWORD_RULES {
        if rule.priority > max_priority && keyword_matches(&content, rule) {
            selected = Some(rule.agent);
            max_priority = rule.priority;
        }
    }
    selected
}

fn keyword_matches(content: &str, rule: &KeywordRule) -> bool {
    if rule.word_only {
        contains_whole_word(content, rule.keyword)
    } else {
        content.contains(rule.keyword)
    }
}

/// Substring search with alphanumeric boundary checks on both sides, so
/// "api" matches "the api layer" but not "rapid".
fn contains_whole_word(content: &str, keyword: &str) -> bool {
    let bytes = content.as_bytes();
    let mut from = 0;
    while let Some(offset) = content[from..].find(keyword) {
        let index = from + offset;
        let end = index + keyword.len();
        let start_ok = index == 0 || !is_alphanum(bytes[index - 1]);
        let end_ok = end == bytes.len() || !is_alphanum(bytes[end]);
        if start_ok && end_ok {
            return true;
        }
        from = index + 1;
    }
    false
}

fn is_alphanum(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// Assignment target for a new issue: an explicit request wins, otherwise
/// the title+description text is routed through [`detect`].
pub fn determine_issue_agent(
    requested: Option<&str>,
    title: &str,
    description: &str,
) -> Option<String> {
    if let Some(requested) = requested {
        if let Some(agent) = AgentId::normalize_identifier(requested) {
            return Some(agent.as_str().to_string());
        }
    }
    let content = format!("{} {}", title, description);
    let content = content.trim();
    if content.is_empty() {
        return None;
    }
    detect(content).map(|a| a.as_str().to_string())
}
