//! Everything that runs inside a worker process.
//!
//! - **Initialization**: [`init::initialize`] pins the process to its slot's
//!   CPUs and runs the user's init hook, producing a [`WorkerContext`]
//! - **Execution**: [`TaskExecutor`] runs one task with its pre/post hooks and
//!   turns failures into outcomes
//! - **Hosting**: [`serve`] speaks the [`protocol`] with the parent over
//!   stdin/stdout
//!
//! # Execution Flow
//!
//! 1. The parent spawns the worker program with [`WORKER_ENV`] set
//! 2. `main` calls [`serve_if_worker`], which reads the `init` frame
//! 3. The worker replies `ready` and then handles `run` frames one at a time
//! 4. `shutdown` (or EOF on stdin) ends the loop

pub mod affinity;
pub mod context;
pub mod executor;
pub mod init;
pub mod protocol;
pub mod serve;

pub use context::WorkerContext;
pub use executor::{TaskExecutor, TaskPlan};
pub use serve::{is_worker_process, serve, serve_if_worker, WORKER_ENV};
