pub mod handle;
pub mod pool;
pub mod queue;
pub mod slots;
pub mod task;

pub use pool::{distributed_eval, EvalRequest, Pool};
pub use queue::TaskQueue;
pub use task::{EvalOutput, Kwargs, Task, TaskOutcome, TaskStatus};
