pub mod builtin;
pub mod config;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod seed;
pub mod shutdown;
pub mod worker;

pub use config::{PoolConfig, WorkerCommand};
pub use error::{PoolError, Result};
pub use registry::{BoxError, HookCall, Registry};
pub use scheduler::{distributed_eval, EvalOutput, EvalRequest, Kwargs, Pool};
pub use seed::SeedSequence;
pub use worker::{serve_if_worker, WorkerContext};
