use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};
use crate::registry::{BoxError, PostHook, PreHook, Registry, TaskFn};
use crate::scheduler::task::{Task, TaskOutcome};
use crate::worker::context::WorkerContext;

/// Which registered function and hooks every task of a batch runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub function: String,
    #[serde(default)]
    pub pre: Option<String>,
    #[serde(default)]
    pub post: Option<String>,
}

impl TaskPlan {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            pre: None,
            post: None,
        }
    }
}

/// Runs tasks on one worker.
///
/// Errors and panics from the pre-hook or the function become a failed
/// [`TaskOutcome`]; they never escape `execute`. The post-hook runs after every
/// task, and its failure is returned as [`PoolError::PostHook`].
pub struct TaskExecutor<'r> {
    function: &'r TaskFn,
    pre: Option<&'r PreHook>,
    post: Option<&'r PostHook>,
}

impl<'r> TaskExecutor<'r> {
    pub fn new(registry: &'r Registry, plan: &TaskPlan) -> Result<Self> {
        Ok(Self {
            function: registry.get_function(&plan.function)?,
            pre: plan
                .pre
                .as_deref()
                .map(|name| registry.get_pre_hook(name))
                .transpose()?,
            post: plan
                .post
                .as_deref()
                .map(|name| registry.get_post_hook(name))
                .transpose()?,
        })
    }

    pub fn execute(&self, ctx: &mut WorkerContext, task: Task) -> Result<TaskOutcome> {
        let index = task.index;
        let started = Instant::now();

        let body = guarded(|| {
            if let Some(pre) = self.pre {
                pre(&mut *ctx, &task.seed)?;
            }
            let kwargs = task.call_kwargs()?;
            (self.function)(&mut *ctx, &kwargs)
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let slot = ctx.slot();

        let outcome = match body {
            Ok(value) => {
                tracing::debug!(index, slot, elapsed_ms, "Task completed");
                TaskOutcome::completed(index, value)
            }
            Err(message) => {
                tracing::error!(index, slot, error = %message, "Task failed");
                TaskOutcome::failed(index, message)
            }
        }
        .on_slot(slot)
        .with_elapsed_ms(elapsed_ms);

        if let Some(post) = self.post {
            guarded(|| post(&mut *ctx))
                .map_err(|message| PoolError::PostHook { index, message })?;
        }

        Ok(outcome)
    }
}

/// Run `f`, turning both its error and any panic into a message.
pub(crate) fn guarded<T>(
    f: impl FnOnce() -> std::result::Result<T, BoxError>,
) -> std::result::Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_passes_values_through() {
        assert_eq!(guarded(|| Ok(5)), Ok(5));
    }

    #[test]
    fn guarded_reports_errors() {
        let out: std::result::Result<(), String> = guarded(|| Err("bad input".into()));
        assert_eq!(out, Err("bad input".to_string()));
    }

    #[test]
    fn guarded_catches_panics() {
        let out: std::result::Result<(), String> = guarded(|| panic!("exploded {}", 7));
        assert_eq!(out, Err("panicked: exploded 7".to_string()));

        let out: std::result::Result<(), String> = guarded(|| panic!("static"));
        assert_eq!(out, Err("panicked: static".to_string()));
    }

    #[test]
    fn plan_defaults_hooks_to_none() {
        let plan: TaskPlan = serde_json::from_str(r#"{"function":"square"}"#).unwrap();
        assert_eq!(plan, TaskPlan::new("square"));
    }
}
