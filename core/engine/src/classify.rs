//! Maps one transcript record to at most one status event.
//!
//! Classification is pure and deterministic. Tool-use blocks named "Task"
//! are sub-agent spawns; they run without user approval and are excluded
//! from approval-relevant tracking.

use std::collections::BTreeSet;

use crate::record::{AssistantBlock, LogRecord, UserBlock, UserContent};
use crate::status::StatusEvent;

const SUBAGENT_TOOL: &str = "Task";

/// Derives the status event carried by `record`, if any.
pub fn classify(record: &LogRecord) -> Option<StatusEvent> {
    let at = record.timestamp();
    match record {
        LogRecord::User(user) => match &user.message.content {
            UserContent::Text(_) => Some(StatusEvent::UserPrompt { at }),
            UserContent::Blocks(blocks) => {
                let tool_ids: BTreeSet<String> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        UserBlock::ToolResult { tool_use_id } => Some(tool_use_id.clone()),
                        _ => None,
                    })
                    .collect();
                if !tool_ids.is_empty() {
                    // Tool results take precedence even when text blocks
                    // are also present.
                    return Some(StatusEvent::ToolResult { at, ids: tool_ids });
                }
                blocks
                    .iter()
                    .any(|block| matches!(block, UserBlock::Text { .. }))
                    .then_some(StatusEvent::UserPrompt { at })
            }
        },
        LogRecord::Assistant(assistant) => {
            let tool_ids: BTreeSet<String> = assistant
                .message
                .content
                .iter()
                .filter_map(|block| match block {
                    AssistantBlock::ToolUse { id, name, .. } if name != SUBAGENT_TOOL => {
                        Some(id.clone())
                    }
                    _ => None,
                })
                .collect();
            if tool_ids.is_empty() {
                Some(StatusEvent::AssistantStreaming { at })
            } else {
                Some(StatusEvent::AssistantToolUse { at, ids: tool_ids })
            }
        }
        LogRecord::System(system) => match system.subtype.as_deref() {
            Some("turn_duration") | Some("stop_hook_summary") => {
                Some(StatusEvent::TurnEnd { at })
            }
            _ => None,
        },
    }
}
