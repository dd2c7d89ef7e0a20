use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};

use crate::config::WorkerCommand;
use crate::error::{PoolError, Result};
use crate::scheduler::queue::TaskQueue;
use crate::scheduler::slots::SlotToken;
use crate::scheduler::task::{Task, TaskOutcome};
use crate::worker::protocol::{self, Request, Response, WorkerSpec};
use crate::worker::WORKER_ENV;

/// How long a worker gets to exit on its own before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// One running child process and its pipes.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    fn spawn(command: &WorkerCommand) -> Result<Self> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(PoolError::WorkerSpawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::Internal("worker stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::Internal("worker stdout was not captured".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    /// Wait briefly for the child to exit, killing it if it lingers.
    async fn reap(&mut self) -> String {
        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status.to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => {
                let _ = self.child.kill().await;
                "killed after closing its pipes".to_string()
            }
        }
    }
}

enum TaskRun {
    Finished(TaskOutcome),
    /// The process died; the outcome is a failure for the task it was running.
    WorkerLost(TaskOutcome),
}

/// The parent's handle on one worker process.
///
/// Owns the worker's slot for as long as the handle lives. If the process dies,
/// a replacement is started on the same slot.
pub struct WorkerHandle {
    token: SlotToken,
    spec: WorkerSpec,
    command: WorkerCommand,
    process: WorkerProcess,
    restarts: u32,
}

impl WorkerHandle {
    /// Spawn a worker on `token`'s slot and wait until it reports ready.
    pub async fn start(
        token: SlotToken,
        command: WorkerCommand,
        spec: WorkerSpec,
    ) -> Result<Self> {
        let spec = WorkerSpec {
            slot: token.slot(),
            ..spec
        };
        let process = WorkerProcess::spawn(&command)?;
        let mut handle = Self {
            token,
            spec,
            command,
            process,
            restarts: 0,
        };
        handle.handshake().await?;
        Ok(handle)
    }

    pub fn slot(&self) -> usize {
        self.token.slot()
    }

    async fn handshake(&mut self) -> Result<()> {
        let slot = self.slot();
        self.send(&Request::Init(self.spec.clone())).await?;
        match self.recv().await? {
            Response::Ready { pid, affinity } => {
                tracing::info!(slot, pid, affinity = ?affinity, "Worker started");
                Ok(())
            }
            Response::InitFailed { error } => Err(PoolError::WorkerInit {
                slot,
                message: error,
            }),
            other => Err(PoolError::Protocol(format!(
                "expected ready from worker {}, got {:?}",
                slot, other
            ))),
        }
    }

    async fn restart(&mut self) -> Result<()> {
        self.restarts += 1;
        tracing::warn!(slot = self.slot(), restarts = self.restarts, "Restarting worker");
        // Dropping the old process kills it if it is somehow still running.
        self.process = WorkerProcess::spawn(&self.command)?;
        self.handshake().await
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        let frame = protocol::encode(request)?;
        let written = async {
            self.process.stdin.write_all(frame.as_bytes()).await?;
            self.process.stdin.flush().await
        }
        .await;
        if written.is_err() {
            return Err(self.exited().await);
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Response> {
        let slot = self.slot();
        loop {
            let line = match self.process.stdout.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => return Err(self.exited().await),
            };
            if let Some(output) = protocol::leading_output(&line) {
                tracing::debug!(slot, output = %output, "Worker output");
            }
            match protocol::decode(&line) {
                Some(frame) => return frame,
                None if line.is_empty() => {}
                None => tracing::debug!(slot, output = %line, "Worker output"),
            }
        }
    }

    async fn exited(&mut self) -> PoolError {
        PoolError::WorkerExited {
            slot: self.slot(),
            status: self.process.reap().await,
        }
    }

    /// Run one task and wait for its outcome.
    async fn run_task(&mut self, task: Task) -> Result<TaskRun> {
        let index = task.index;
        let response = match self.send(&Request::Run(task)).await {
            Ok(()) => self.recv().await,
            Err(e) => Err(e),
        };

        match response {
            Ok(Response::Done(outcome)) if outcome.index == index => {
                Ok(TaskRun::Finished(outcome))
            }
            Ok(Response::PostHookFailed { index, error }) => Err(PoolError::PostHook {
                index,
                message: error,
            }),
            Ok(other) => Err(PoolError::Protocol(format!(
                "unexpected reply to task {}: {:?}",
                index, other
            ))),
            Err(PoolError::WorkerExited { slot, status }) => {
                tracing::error!(slot, index, status = %status, "Worker died while running task");
                let outcome = TaskOutcome::failed(index, format!("worker exited ({})", status));
                Ok(TaskRun::WorkerLost(outcome.on_slot(slot)))
            }
            Err(e) => Err(e),
        }
    }

    /// Pull tasks from `queue` until it is empty, sending each outcome to
    /// `results`. Returns only pool-level failures.
    ///
    /// A worker that dies mid-task yields a failed outcome for that task and is
    /// restarted before it takes another one.
    pub async fn drive(
        mut self,
        queue: Arc<Mutex<TaskQueue>>,
        results: mpsc::Sender<TaskOutcome>,
    ) -> Result<()> {
        let mut alive = true;
        loop {
            let next = queue.lock().await.next_task();
            let Some(task) = next else { break };

            if !alive {
                self.restart().await?;
                alive = true;
            }

            let outcome = match self.run_task(task).await? {
                TaskRun::Finished(outcome) => outcome,
                TaskRun::WorkerLost(outcome) => {
                    alive = false;
                    outcome
                }
            };
            results
                .send(outcome)
                .await
                .map_err(|_| PoolError::Internal("result channel closed".to_string()))?;
        }

        if alive {
            self.shutdown().await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        let slot = self.slot();
        let _ = self.send(&Request::Shutdown).await;
        let status = self.process.reap().await;
        tracing::debug!(slot, status = %status, "Worker stopped");
    }
}
