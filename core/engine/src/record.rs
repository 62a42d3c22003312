//! Transcript record data model.
//!
//! One record is one JSONL line of a session transcript. Only `user`,
//! `assistant`, and `system` lines carry signal; other line types
//! (`progress`, `summary`, ...) are valid JSON but irrelevant and parse to
//! `None`. Unknown fields are ignored everywhere so future transcript
//! additions do not break parsing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Metadata present (optionally) on every transcript line.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
}

/// One immutable transcript record, discriminated by author role.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    System(SystemRecord),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub message: UserMessage,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UserMessage {
    pub content: UserContent,
}

/// User content is either a free-text prompt or a list of blocks.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<UserBlock>),
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserBlock {
    Text { text: String },
    ToolResult { tool_use_id: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssistantRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<AssistantBlock>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SystemRecord {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl LogRecord {
    pub fn meta(&self) -> &RecordMeta {
        match self {
            LogRecord::User(record) => &record.meta,
            LogRecord::Assistant(record) => &record.meta,
            LogRecord::System(record) => &record.meta,
        }
    }

    /// Parsed record timestamp, if present and valid RFC 3339.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.meta().timestamp.as_deref().and_then(parse_rfc3339)
    }

    /// The originating prompt text, for user records that carry one.
    ///
    /// Block-list content yields the first text block only when no
    /// tool-result block is present (a tool-result line is a continuation,
    /// not a prompt).
    pub fn prompt_text(&self) -> Option<&str> {
        let LogRecord::User(record) = self else {
            return None;
        };
        match &record.message.content {
            UserContent::Text(text) => Some(text.as_str()),
            UserContent::Blocks(blocks) => {
                if blocks
                    .iter()
                    .any(|block| matches!(block, UserBlock::ToolResult { .. }))
                {
                    return None;
                }
                blocks.iter().find_map(|block| match block {
                    UserBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
            }
        }
    }
}

/// Parses one transcript line.
///
/// Returns `Ok(None)` for valid lines of an irrelevant type and `Err` for
/// lines that are not valid JSON or miss required structure.
pub fn parse_line(line: &str) -> serde_json::Result<Option<LogRecord>> {
    // Probe the discriminator first so unknown line types degrade to None
    // instead of an error.
    #[derive(Deserialize)]
    struct TypeProbe {
        #[serde(rename = "type")]
        kind: String,
    }

    let probe: TypeProbe = serde_json::from_str(line)?;
    let record = match probe.kind.as_str() {
        "user" => Some(LogRecord::User(serde_json::from_str(line)?)),
        "assistant" => Some(LogRecord::Assistant(serde_json::from_str(line)?)),
        "system" => Some(LogRecord::System(serde_json::from_str(line)?)),
        _ => None,
    };
    Ok(record)
}

pub(crate) fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
