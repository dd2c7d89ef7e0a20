//! Frames exchanged with a worker process.
//!
//! One frame per line on the worker's stdin/stdout, written as
//! `@@seedpool <json>`. Lines without the prefix are ordinary program output
//! and are not part of the protocol. Output a task left without a trailing
//! newline may precede the prefix on the same line; it is skipped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::HookCall;
use crate::scheduler::task::{Task, TaskOutcome};
use crate::worker::affinity::AffinityLayout;
use crate::worker::executor::TaskPlan;

pub const FRAME_PREFIX: &str = "@@seedpool ";

/// Everything a worker needs to start: its slot, how to pin it, the init hook
/// and the plan every task will run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub slot: usize,
    pub layout: Option<AffinityLayout>,
    pub init: Option<HookCall>,
    pub plan: TaskPlan,
}

/// Parent to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Init(WorkerSpec),
    Run(Task),
    Shutdown,
}

/// Worker to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ready {
        pid: u32,
        affinity: Option<Vec<usize>>,
    },
    InitFailed {
        error: String,
    },
    Done(TaskOutcome),
    PostHookFailed {
        index: usize,
        error: String,
    },
}

/// Encode a frame, newline included.
pub fn encode<T: Serialize>(frame: &T) -> Result<String> {
    Ok(format!("{}{}\n", FRAME_PREFIX, serde_json::to_string(frame)?))
}

/// Decode a line. `None` if the line holds no frame at all.
pub fn decode<T: DeserializeOwned>(line: &str) -> Option<Result<T>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let start = line.find(FRAME_PREFIX)? + FRAME_PREFIX.len();
    Some(serde_json::from_str(&line[start..]).map_err(Into::into))
}

/// Text in front of the frame prefix, if the line carries both.
pub fn leading_output(line: &str) -> Option<&str> {
    match line.find(FRAME_PREFIX) {
        Some(0) | None => None,
        Some(pos) => Some(&line[..pos]),
    }
}
