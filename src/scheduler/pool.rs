use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::config::{PoolConfig, WorkerCommand};
use crate::error::{PoolError, Result};
use crate::registry::{HookCall, Registry};
use crate::scheduler::handle::WorkerHandle;
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::slots::SlotPool;
use crate::scheduler::task::{EvalOutput, Kwargs, Task, TaskOutcome};
use crate::seed;
use crate::worker::affinity;
use crate::worker::executor::{TaskExecutor, TaskPlan};
use crate::worker::init::initialize;
use crate::worker::protocol::WorkerSpec;

/// A batch to evaluate: one registered function called once per kwargs entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalRequest {
    pub function: String,
    pub kwargs_list: Vec<Kwargs>,
    pub init: Option<HookCall>,
    pub pre: Option<String>,
    pub post: Option<String>,
}

impl EvalRequest {
    pub fn new(function: impl Into<String>, kwargs_list: Vec<Kwargs>) -> Self {
        Self {
            function: function.into(),
            kwargs_list,
            init: None,
            pre: None,
            post: None,
        }
    }

    pub fn with_init(mut self, name: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        self.init = Some(HookCall::new(name, args));
        self
    }

    pub fn with_pre(mut self, name: impl Into<String>) -> Self {
        self.pre = Some(name.into());
        self
    }

    pub fn with_post(mut self, name: impl Into<String>) -> Self {
        self.post = Some(name.into());
        self
    }
}

/// Runs batches over a pool of worker processes.
#[derive(Debug, Clone)]
pub struct Pool {
    registry: Registry,
    config: PoolConfig,
}

impl Pool {
    pub fn new(registry: Registry, config: PoolConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Evaluate a batch and return its results in input order.
    ///
    /// 1. Checks every name in the request against the registry
    /// 2. Branches the master seed into one seed per task
    /// 3. With zero workers, runs every task here, in order
    /// 4. Otherwise starts the worker processes (each claims a slot, pins
    ///    itself and runs the init hook), lets them pull tasks until the
    ///    queue is drained, and collects outcomes as they arrive
    /// 5. Reassembles outcomes by task index
    ///
    /// # Errors
    ///
    /// Only pool-level failures are errors: a worker that cannot get a slot,
    /// spawn, or initialize, a failing post-task hook, or a worker that cannot
    /// be restarted. A failing task shows up as `false` in
    /// [`EvalOutput::completed`].
    pub async fn run(&self, request: EvalRequest) -> Result<EvalOutput> {
        let run_id = Uuid::new_v4();
        let EvalRequest {
            function,
            kwargs_list,
            init,
            pre,
            post,
        } = request;
        self.registry
            .resolve(&function, init.as_ref(), pre.as_deref(), post.as_deref())?;

        let n_tasks = kwargs_list.len();
        let tasks: Vec<Task> = kwargs_list
            .into_iter()
            .zip(seed::branch(self.config.seed, n_tasks))
            .enumerate()
            .map(|(index, (kwargs, seed))| Task::new(index, kwargs, seed))
            .collect();

        tracing::info!(
            run_id = %run_id,
            function = %function,
            tasks = n_tasks,
            workers = self.config.n_workers,
            "Starting evaluation"
        );

        let plan = TaskPlan {
            function,
            pre,
            post,
        };
        let outcomes = if self.config.is_inline() {
            run_inline(&self.registry, &plan, init.as_ref(), tasks)?
        } else if tasks.is_empty() {
            Vec::new()
        } else {
            self.run_parallel(run_id, tasks, plan, init).await?
        };

        let output = EvalOutput::from_outcomes(n_tasks, outcomes).map_err(|index| {
            PoolError::Internal(format!("no outcome recorded for task {}", index))
        })?;
        tracing::info!(
            run_id = %run_id,
            completed = output.completed.iter().filter(|&&c| c).count(),
            failed = output.failed_indices().len(),
            "Evaluation finished"
        );
        Ok(output)
    }

    async fn run_parallel(
        &self,
        run_id: Uuid,
        tasks: Vec<Task>,
        plan: TaskPlan,
        init: Option<HookCall>,
    ) -> Result<Vec<TaskOutcome>> {
        let layout = self.config.layout();
        let available = affinity::available_cpus();
        if layout.oversubscribes(available) {
            tracing::warn!(
                run_id = %run_id,
                required = layout.cpus_required(),
                available,
                "Affinity layout needs more CPUs than available, worker CPU sets will overlap"
            );
        }

        let command = match &self.config.worker {
            Some(command) => command.clone(),
            None => WorkerCommand::current_exe().map_err(PoolError::WorkerSpawn)?,
        };
        let spec = WorkerSpec {
            slot: 0,
            layout: Some(layout),
            init,
            plan,
        };

        let n_tasks = tasks.len();
        let n_spawn = self.config.n_workers.min(n_tasks);
        let slots = SlotPool::new(self.config.n_workers);
        let slot_timeout = self.config.slot_timeout();

        // Start every worker; the first failure aborts the rest.
        let mut starting = JoinSet::new();
        for _ in 0..n_spawn {
            let slots = slots.clone();
            let command = command.clone();
            let spec = spec.clone();
            starting.spawn(async move {
                let token = slots.acquire(slot_timeout).await?;
                WorkerHandle::start(token, command, spec).await
            });
        }

        let mut workers = Vec::with_capacity(n_spawn);
        while let Some(joined) = starting.join_next().await {
            match joined {
                Ok(Ok(worker)) => workers.push(worker),
                Ok(Err(e)) => {
                    tracing::error!(run_id = %run_id, error = %e, "Worker pool failed to start");
                    starting.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    starting.abort_all();
                    return Err(PoolError::Internal(format!("worker startup panicked: {}", e)));
                }
            }
        }
        tracing::info!(run_id = %run_id, workers = workers.len(), "Worker pool ready");

        let queue = Arc::new(Mutex::new(TaskQueue::from_tasks(tasks)));
        let (result_tx, mut result_rx) = mpsc::channel(n_tasks);
        let mut drivers = JoinSet::new();
        for worker in workers {
            drivers.spawn(worker.drive(queue.clone(), result_tx.clone()));
        }
        drop(result_tx);

        let mut outcomes = Vec::with_capacity(n_tasks);
        loop {
            tokio::select! {
                Some(outcome) = result_rx.recv() => {
                    tracing::debug!(
                        run_id = %run_id,
                        index = outcome.index,
                        status = %outcome.status,
                        slot = ?outcome.slot,
                        "Task finished"
                    );
                    outcomes.push(outcome);
                }
                joined = drivers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        tracing::error!(run_id = %run_id, error = %e, "Evaluation aborted");
                        drivers.abort_all();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        drivers.abort_all();
                        return Err(PoolError::Internal(format!("worker driver panicked: {}", e)));
                    }
                },
            }
        }

        // Drivers may finish before their last outcome was read.
        while let Some(outcome) = result_rx.recv().await {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Run every task in the calling thread, in input order.
///
/// Seeds, hooks and failure handling are the same as on a worker; the calling
/// process is never pinned.
pub fn run_inline(
    registry: &Registry,
    plan: &TaskPlan,
    init: Option<&HookCall>,
    tasks: Vec<Task>,
) -> Result<Vec<TaskOutcome>> {
    let executor = TaskExecutor::new(registry, plan)?;
    let mut ctx = initialize(registry, 0, None, init)?;
    tasks
        .into_iter()
        .map(|task| executor.execute(&mut ctx, task))
        .collect()
}

/// Evaluate `request` with a one-off [`Pool`].
pub async fn distributed_eval(
    registry: &Registry,
    request: EvalRequest,
    config: &PoolConfig,
) -> Result<EvalOutput> {
    Pool::new(registry.clone(), config.clone())
        .run(request)
        .await
}
