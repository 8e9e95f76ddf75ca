use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// "Agent: Market analyst", "**Role:** Risk reviewer", "## Task - Timeline"
static RE_LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:#+\s*)?\**\s*(?:agent|role|task|label)",
        r"\s*\**\s*[:\-]\s*\**\s*(.+?)\s*\**\s*$",
    ))
    .unwrap()
});

// "[Market analyst] ..."
static RE_LABEL_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\[([^\]]+)\]").unwrap());

const MAX_IDENTITY_CHARS: usize = 60;

/// One unit of planned work for the fan-out stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskDescriptor {
    pub task_text: String,
    pub relevant_content: String,
    #[serde(default)]
    pub tool_names: BTreeSet<String>,
}

impl SubtaskDescriptor {
    /// Structurally validates one raw plan entry.
    ///
    /// `relevant_content` may be given as a string or as any JSON structure,
    /// which is kept in its compact serialized form. Non-string tool names
    /// are ignored.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "descriptor is not an object".to_string())?;

        let task_text = obj
            .get("task_text")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if task_text.is_empty() {
            return Err("missing or empty 'task_text'".to_string());
        }

        let relevant_content = match obj.get("relevant_content") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        if relevant_content.is_empty() {
            return Err("missing or empty 'relevant_content'".to_string());
        }

        let tool_names = obj
            .get("tool_names")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            task_text: task_text.to_string(),
            relevant_content,
            tool_names,
        })
    }

    /// Display identity, parsed from a label on the first line of the task
    /// text. Falls back to `subtask-<n>` with `n` the 1-based position.
    pub fn identity(&self, index: usize) -> String {
        let first_line = self.task_text.lines().next().unwrap_or_default();

        let label = RE_LABEL_PREFIX
            .captures(first_line)
            .or_else(|| RE_LABEL_BRACKET.captures(first_line))
            .and_then(|caps| caps.get(1))
            .map(|m| collapse_whitespace(m.as_str().trim_matches('*')))
            .filter(|l| !l.is_empty());

        match label {
            Some(label) => truncate_chars(&label, MAX_IDENTITY_CHARS, ""),
            None => format!("subtask-{}", index + 1),
        }
    }

    /// Whitespace-collapsed prefix of the task text, at most `max_chars`
    /// characters plus an ellipsis marker when truncated.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&collapse_whitespace(&self.task_text), max_chars, "...")
    }
}

/// A successful sub-task, appended to `subtask_results`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    pub identity: String,
    pub task_preview: String,
    pub result_text: String,
}

/// An isolated sub-task failure. Never propagates to siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskFailure {
    pub identity: String,
    pub error: String,
}

impl SubtaskFailure {
    /// The diagnostic string merged into `errors`.
    pub fn diagnostic(&self) -> String {
        format!("sub-task '{}' failed: {}", self.identity, self.error)
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max_chars: usize, marker: &str) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", s[..byte_idx].trim_end(), marker),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(task_text: &str) -> SubtaskDescriptor {
        SubtaskDescriptor {
            task_text: task_text.to_string(),
            relevant_content: "payload".to_string(),
            tool_names: BTreeSet::new(),
        }
    }

    #[test]
    fn test_from_value_valid() {
        let value = json!({
            "task_text": "  Agent: Analyst\nReview revenue  ",
            "relevant_content": "Q3 revenue figures",
            "tool_names": ["search", " calculator ", "", 42]
        });
        let d = SubtaskDescriptor::from_value(&value).unwrap();
        assert_eq!(d.task_text, "Agent: Analyst\nReview revenue");
        assert_eq!(d.relevant_content, "Q3 revenue figures");
        let names: Vec<_> = d.tool_names.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["calculator", "search"]);
    }

    #[test]
    fn test_from_value_structured_content() {
        let value = json!({
            "task_text": "Check figures",
            "relevant_content": {"revenue": 10}
        });
        let d = SubtaskDescriptor::from_value(&value).unwrap();
        assert_eq!(d.relevant_content, r#"{"revenue":10}"#);
        assert!(d.tool_names.is_empty());
    }

    #[test]
    fn test_from_value_rejects_malformed() {
        assert!(SubtaskDescriptor::from_value(&json!("text")).is_err());
        assert!(SubtaskDescriptor::from_value(&json!({"relevant_content": "x"})).is_err());
        assert!(
            SubtaskDescriptor::from_value(&json!({"task_text": "  ", "relevant_content": "x"}))
                .is_err()
        );
        assert!(SubtaskDescriptor::from_value(&json!({"task_text": "x"})).is_err());
        assert!(
            SubtaskDescriptor::from_value(&json!({"task_text": "x", "relevant_content": null}))
                .is_err()
        );
    }

    #[test]
    fn test_identity_from_label_prefix() {
        assert_eq!(descriptor("Agent: Market Analyst\nDo it").identity(0), "Market Analyst");
        assert_eq!(descriptor("**Role:** Risk reviewer").identity(3), "Risk reviewer");
        assert_eq!(descriptor("## Task - Timeline").identity(1), "Timeline");
        assert_eq!(descriptor("label:   spaced    out ").identity(1), "spaced out");
    }

    #[test]
    fn test_identity_from_bracket() {
        assert_eq!(descriptor("[Legal] review clauses").identity(0), "Legal");
    }

    #[test]
    fn test_identity_falls_back_to_position() {
        assert_eq!(descriptor("Review the numbers").identity(0), "subtask-1");
        assert_eq!(descriptor("Agent:   ").identity(4), "subtask-5");
    }

    #[test]
    fn test_identity_is_truncated() {
        let long = format!("Agent: {}", "x".repeat(200));
        assert_eq!(descriptor(&long).identity(0).chars().count(), MAX_IDENTITY_CHARS);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        let d = descriptor("Überprüfe   die\nZahlen bitte");
        assert_eq!(d.preview(100), "Überprüfe die Zahlen bitte");
        assert_eq!(d.preview(9), "Überprüfe...");
    }

    #[test]
    fn test_failure_diagnostic() {
        let failure = SubtaskFailure {
            identity: "Analyst".to_string(),
            error: "rate limited".to_string(),
        };
        assert_eq!(failure.diagnostic(), "sub-task 'Analyst' failed: rate limited");
    }
}
