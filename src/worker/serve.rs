use std::io::{self, BufRead, Write};

use crate::error::{PoolError, Result};
use crate::registry::Registry;
use crate::worker::executor::TaskExecutor;
use crate::worker::init::initialize;
use crate::worker::protocol::{self, Request, Response};

/// Set in the environment of every process the pool spawns.
pub const WORKER_ENV: &str = "SEEDPOOL_WORKER";

pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Serve the worker protocol on stdin/stdout if this process was started by a
/// pool. Call it first thing in `main`; `None` means this is not a worker and
/// the program should carry on normally.
pub fn serve_if_worker(registry: &Registry) -> Option<Result<()>> {
    if !is_worker_process() {
        return None;
    }
    let stdin = io::stdin();
    Some(serve(registry, stdin.lock(), io::stdout()))
}

/// The worker loop: one `init`, then `run` frames until `shutdown` or EOF.
pub fn serve<R: BufRead, W: Write>(registry: &Registry, input: R, mut output: W) -> Result<()> {
    let mut lines = input.lines();

    let spec = match next_request(&mut lines)? {
        Some(Request::Init(spec)) => spec,
        Some(other) => {
            return Err(PoolError::Protocol(format!(
                "expected init frame, got {:?}",
                other
            )))
        }
        None => return Ok(()),
    };
    let slot = spec.slot;

    let started = TaskExecutor::new(registry, &spec.plan).and_then(|executor| {
        initialize(registry, slot, spec.layout.as_ref(), spec.init.as_ref())
            .map(|ctx| (executor, ctx))
    });
    let (executor, mut ctx) = match started {
        Ok(started) => started,
        Err(e) => {
            send(
                &mut output,
                &Response::InitFailed {
                    error: e.to_string(),
                },
            )?;
            return Err(e);
        }
    };
    send(
        &mut output,
        &Response::Ready {
            pid: ctx.pid(),
            affinity: ctx.affinity().map(<[usize]>::to_vec),
        },
    )?;
    tracing::debug!(slot, pid = ctx.pid(), "Worker ready");

    while let Some(request) = next_request(&mut lines)? {
        match request {
            Request::Run(task) => match executor.execute(&mut ctx, task) {
                Ok(outcome) => send(&mut output, &Response::Done(outcome))?,
                Err(PoolError::PostHook { index, message }) => {
                    send(
                        &mut output,
                        &Response::PostHookFailed {
                            index,
                            error: message.clone(),
                        },
                    )?;
                    return Err(PoolError::PostHook { index, message });
                }
                Err(e) => return Err(e),
            },
            Request::Shutdown => {
                tracing::debug!(slot, "Worker shutting down");
                return Ok(());
            }
            Request::Init(_) => {
                return Err(PoolError::Protocol("worker is already initialized".into()))
            }
        }
    }
    Ok(())
}

fn next_request<I>(lines: &mut I) -> Result<Option<Request>>
where
    I: Iterator<Item = io::Result<String>>,
{
    for line in lines {
        if let Some(frame) = protocol::decode(&line?) {
            return frame.map(Some);
        }
    }
    Ok(None)
}

fn send<W: Write>(output: &mut W, response: &Response) -> Result<()> {
    // One write per frame so concurrent prints cannot split it. The leading
    // newline ends any partial line a task printed.
    let frame = format!("\n{}", protocol::encode(response)?);
    output.write_all(frame.as_bytes())?;
    output.flush()?;
    Ok(())
}
