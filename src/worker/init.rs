use crate::error::{PoolError, Result};
use crate::registry::{HookCall, Registry};
use crate::worker::affinity::{self, AffinityLayout};
use crate::worker::context::WorkerContext;
use crate::worker::executor::guarded;

/// One-time setup of a worker that already holds `slot`.
///
/// Pins the process to the slot's CPU set when a layout is given (best effort:
/// platforms without affinity control and rejected masks leave the worker
/// unpinned), then runs the init hook. A failing init hook is fatal for the
/// pool and is reported as [`PoolError::WorkerInit`].
pub fn initialize(
    registry: &Registry,
    slot: usize,
    layout: Option<&AffinityLayout>,
    init: Option<&HookCall>,
) -> Result<WorkerContext> {
    let pinned = layout.and_then(|layout| pin(slot, layout));
    let mut ctx = WorkerContext::new(slot, pinned);

    if let Some(call) = init {
        let hook = registry.get_init_hook(&call.name)?;
        guarded(|| hook(&mut ctx, &call.args))
            .map_err(|message| PoolError::WorkerInit { slot, message })?;
        tracing::debug!(slot, hook = %call.name, "Init hook completed");
    }

    Ok(ctx)
}

fn pin(slot: usize, layout: &AffinityLayout) -> Option<Vec<usize>> {
    let cpus = layout.cpu_set(slot);
    if cpus.is_empty() {
        return None;
    }
    match affinity::pin_current_process(&cpus) {
        Ok(true) => {
            tracing::debug!(slot, cpus = ?cpus, "Worker pinned");
            Some(cpus)
        }
        Ok(false) => None,
        Err(e) => {
            tracing::warn!(slot, cpus = ?cpus, error = %e, "Could not set CPU affinity, running unpinned");
            None
        }
    }
}
