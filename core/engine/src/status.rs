//! Status state machine.
//!
//! A pure transition table converts a stream of classified events, plus at
//! most one synthetic timeout injected at evaluation time, into one of four
//! states. Re-evaluation always replays the full record history so the same
//! transcript content always yields the same status.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classify::classify;
use crate::config::Thresholds;
use crate::record::LogRecord;

/// Internal machine state, one current value per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Idle,
    Working,
    WaitingForApproval,
    WaitingForInput,
}

/// External 3-valued projection of [`StatusState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Working,
    Waiting,
    Idle,
}

/// Mutable accumulator threaded through the replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusContext {
    pub last_activity_at: Option<DateTime<Utc>>,
    pub message_count: u32,
    pub has_pending_tool_use: bool,
    pub pending_tool_ids: BTreeSet<String>,
}

/// A classified or synthetic signal fed to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    UserPrompt {
        at: Option<DateTime<Utc>>,
    },
    ToolResult {
        at: Option<DateTime<Utc>>,
        ids: BTreeSet<String>,
    },
    AssistantStreaming {
        at: Option<DateTime<Utc>>,
    },
    AssistantToolUse {
        at: Option<DateTime<Utc>>,
        ids: BTreeSet<String>,
    },
    TurnEnd {
        at: Option<DateTime<Utc>>,
    },
    IdleTimeout,
    ApprovalTimeout,
    StaleTimeout,
}

/// Machine state plus context after a replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: StatusState,
    pub context: StatusContext,
}

impl StatusSnapshot {
    pub fn status(&self) -> Status {
        match self.state {
            StatusState::Working => Status::Working,
            StatusState::WaitingForApproval | StatusState::WaitingForInput => Status::Waiting,
            StatusState::Idle => Status::Idle,
        }
    }
}

fn touch(ctx: &mut StatusContext, at: Option<DateTime<Utc>>) {
    if at.is_some() {
        ctx.last_activity_at = at;
    }
}

/// Applies one event to the machine. Pairs not listed in the transition
/// table leave state and context untouched.
pub fn step(state: StatusState, ctx: &mut StatusContext, event: &StatusEvent) -> StatusState {
    use StatusEvent::*;
    use StatusState::*;

    match (state, event) {
        (Idle, UserPrompt { at }) | (WaitingForInput, UserPrompt { at }) => {
            touch(ctx, *at);
            ctx.message_count += 1;
            Working
        }
        (Working, UserPrompt { at }) => {
            touch(ctx, *at);
            ctx.message_count += 1;
            ctx.pending_tool_ids.clear();
            ctx.has_pending_tool_use = false;
            Working
        }
        (Working, AssistantStreaming { at }) => {
            touch(ctx, *at);
            Working
        }
        (Working, AssistantToolUse { at, ids }) => {
            touch(ctx, *at);
            ctx.message_count += 1;
            ctx.pending_tool_ids = ids.clone();
            ctx.has_pending_tool_use = true;
            Working
        }
        (Working, ToolResult { at, ids }) | (WaitingForApproval, ToolResult { at, ids }) => {
            touch(ctx, *at);
            ctx.message_count += 1;
            for id in ids {
                ctx.pending_tool_ids.remove(id);
            }
            ctx.has_pending_tool_use = !ctx.pending_tool_ids.is_empty();
            Working
        }
        (Working, TurnEnd { at }) => {
            touch(ctx, *at);
            ctx.pending_tool_ids.clear();
            ctx.has_pending_tool_use = false;
            WaitingForInput
        }
        (Working, ApprovalTimeout) => WaitingForApproval,
        (Working, StaleTimeout) => {
            ctx.pending_tool_ids.clear();
            ctx.has_pending_tool_use = false;
            WaitingForInput
        }
        (Working, IdleTimeout)
        | (WaitingForApproval, IdleTimeout)
        | (WaitingForInput, IdleTimeout) => Idle,
        _ => state,
    }
}

/// Chooses the single synthetic timeout to inject, if any.
///
/// Priority: idle first, then approval (working with pending tools), then
/// stale (working without). Sessions with no observed activity never time
/// out — there is nothing to age.
fn timeout_event(
    state: StatusState,
    ctx: &StatusContext,
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> Option<StatusEvent> {
    let last = ctx.last_activity_at?;
    let elapsed = now.signed_duration_since(last);
    let exceeds = |limit: std::time::Duration| {
        elapsed > chrono::Duration::from_std(limit).unwrap_or(chrono::Duration::MAX)
    };

    if exceeds(thresholds.idle) {
        return Some(StatusEvent::IdleTimeout);
    }
    if state == StatusState::Working {
        if ctx.has_pending_tool_use && exceeds(thresholds.approval) {
            return Some(StatusEvent::ApprovalTimeout);
        }
        if !ctx.has_pending_tool_use && exceeds(thresholds.stale) {
            return Some(StatusEvent::StaleTimeout);
        }
    }
    None
}

/// Replays the full record history and applies the timeout check once.
pub fn derive_status(
    records: &[LogRecord],
    now: DateTime<Utc>,
    thresholds: &Thresholds,
) -> StatusSnapshot {
    let mut state = StatusState::WaitingForInput;
    let mut ctx = StatusContext::default();

    for record in records {
        if let Some(event) = classify(record) {
            state = step(state, &mut ctx, &event);
        }
    }
    if let Some(timeout) = timeout_event(state, &ctx, now, thresholds) {
        state = step(state, &mut ctx, &timeout);
    }

    StatusSnapshot {
        state,
        context: ctx,
    }
}
