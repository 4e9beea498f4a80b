//! Structured-block extraction from agent replies.
//!
//! A block starts on a line whose trimmed content is `@<type>` and runs until
//! a line that is exactly `---`. Body lines are `key: value` pairs; a line
//! without a colon continues the previous key. Blocks that never terminate
//! are left embedded in the cleaned text so nothing the model said is lost.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredBlock {
    pub type_name: String,
    pub fields: HashMap<String, String>,
}

impl StructuredBlock {
    pub fn field(&self, key: &str) -> &str {
        self.fields.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Split `text` into prose and the ordered list of parsed blocks.
pub fn extract_structured_blocks(text: &str) -> (String, Vec<StructuredBlock>) {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut blocks = Vec::new();
    let mut output_lines: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        if let Some(type_name) = trimmed.strip_prefix('@') {
            let header = i;
            i += 1;
            let start = i;
            while i < lines.len() && lines[i].trim() != "---" {
                i += 1;
            }
            if i >= lines.len() {
                // Unterminated block: keep it verbatim, header included.
                output_lines.extend_from_slice(&lines[header..]);
                break;
            }
            blocks.push(StructuredBlock {
                type_name: type_name.trim().to_lowercase(),
                fields: parse_block_fields(&lines[start..i]),
            });
            i += 1; // skip ---
            continue;
        }
        output_lines.push(lines[i]);
        i += 1;
    }

    (output_lines.join("\n").trim().to_string(), blocks)
}

fn parse_block_fields(lines: &[&str]) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut current_key: Option<String> = None;

    for raw in lines {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once(':') {
            Some((key, value)) => {
                let key = key.trim().to_lowercase();
                fields.insert(key.clone(), value.trim().to_string());
                current_key = Some(key);
            }
            None => {
                if let Some(key) = &current_key {
                    let entry: &mut String = fields.entry(key.clone()).or_default();
                    if !entry.is_empty() {
                        entry.push(' ');
                    }
                    entry.push_str(line);
                }
            }
        }
    }
    fields
}

/// Split a comma-separated field value, dropping blanks.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_dialog_block_and_cleans_text() {
        let text = "Here is my take.\n\
                    @dialog\n\
                    title: Authentication Method\n\
                    message: Which method should we use?\n\
                    options: JWT tokens, OAuth2, Magic links\n\
                    default: JWT tokens\n\
                    ---\n\
                    Let me know.";
        let (clean, blocks) = extract_structured_blocks(text);

        assert_eq!(clean, "Here is my take.\nLet me know.");
        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.type_name, "dialog");
        assert_eq!(block.field("title"), "Authentication Method");
        assert_eq!(
            split_csv(block.field("options")),
            vec!["JWT tokens", "OAuth2", "Magic links"]
        );
        assert_eq!(block.field("default"), "JWT tokens");
    }

    #[test]
    fn continuation_lines_append_to_previous_key() {
        let text = "@issue\n\
                    title: Implement auth\n\
                    description: JWT-based auth\n\
                    with refresh tokens\n\
                    ---";
        let (_, blocks) = extract_structured_blocks(text);
        assert_eq!(
            blocks[0].field("description"),
            "JWT-based auth with refresh tokens"
        );
    }

    #[test]
    fn multiple_blocks_keep_declaration_order() {
        let text = "@mention\nagent: QA Tester\nmessage: please verify\n---\n\
                    prose in between\n\
                    @issue\ntitle: Add tests\n---";
        let (clean, blocks) = extract_structured_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].type_name, "mention");
        assert_eq!(blocks[1].type_name, "issue");
        assert_eq!(clean, "prose in between");
    }

    #[test]
    fn unterminated_block_stays_in_text() {
        let text = "intro\n@dialog\ntitle: Dangling";
        let (clean, blocks) = extract_structured_blocks(text);
        assert!(blocks.is_empty());
        assert!(clean.contains("@dialog"));
        assert!(clean.contains("title: Dangling"));
    }

    #[test]
    fn block_type_is_lowercased_and_trimmed() {
        let text = "@Issue \ntitle: X\n---";
        let (_, blocks) = extract_structured_blocks(text);
        assert_eq!(blocks[0].type_name, "issue");
    }

    #[test]
    fn field_values_survive_colons_in_value() {
        let text = "@mention\nmessage: see: the design doc\n---";
        let (_, blocks) = extract_structured_blocks(text);
        assert_eq!(blocks[0].field("message"), "see: the design doc");
    }

    #[test]
    fn cleaned_text_contains_no_parsed_fragments() {
        let text = "a\n@issue\ntitle: T\n---\nb";
        let (clean, blocks) = extract_structured_blocks(text);
        assert_eq!(blocks.len(), 1);
        assert!(!clean.contains("@issue"));
        assert!(!clean.contains("---"));
        assert!(!clean.contains("title: T"));
    }

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv("a, ,b,, c "), vec!["a", "b", "c"]);
        assert!(split_csv("").is_empty());
    }
}
