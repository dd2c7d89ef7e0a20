use std::path::PathBuf;
use std::time::Duration;

use crate::worker::affinity::AffinityLayout;

/// How long a starting worker waits for a free slot.
pub const DEFAULT_SLOT_TIMEOUT_MS: u64 = 5_000;

/// The program launched for each worker process.
///
/// The program must call [`serve_if_worker`](crate::worker::serve_if_worker)
/// with a registry that contains the functions the batch uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-launch the running executable.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

/// Pool sizing, CPU layout and seeding for one evaluation.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker processes. Zero runs every task in the calling thread.
    pub n_workers: usize,
    /// Logical CPUs reserved for each worker.
    pub n_proc_per_worker: usize,
    /// First logical CPU handed out.
    pub proc_start: usize,
    /// Master seed. `None` draws fresh entropy.
    pub seed: Option<u64>,
    pub slot_timeout_ms: u64,
    /// Worker program. `None` re-launches the current executable.
    pub worker: Option<WorkerCommand>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            n_workers: 30,
            n_proc_per_worker: 2,
            proc_start: 0,
            seed: None,
            slot_timeout_ms: DEFAULT_SLOT_TIMEOUT_MS,
            worker: None,
        }
    }
}

impl PoolConfig {
    pub fn new(n_workers: usize) -> Self {
        Self {
            n_workers,
            ..Default::default()
        }
    }

    pub fn with_proc_per_worker(mut self, n_proc_per_worker: usize) -> Self {
        self.n_proc_per_worker = n_proc_per_worker;
        self
    }

    pub fn with_proc_start(mut self, proc_start: usize) -> Self {
        self.proc_start = proc_start;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_slot_timeout_ms(mut self, slot_timeout_ms: u64) -> Self {
        self.slot_timeout_ms = slot_timeout_ms;
        self
    }

    pub fn with_worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker = Some(command);
        self
    }

    pub fn layout(&self) -> AffinityLayout {
        AffinityLayout::new(self.n_workers, self.n_proc_per_worker, self.proc_start)
    }

    pub fn slot_timeout(&self) -> Duration {
        Duration::from_millis(self.slot_timeout_ms)
    }

    pub fn is_inline(&self) -> bool {
        self.n_workers == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_default() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.n_workers, 30);
        assert_eq!(cfg.n_proc_per_worker, 2);
        assert_eq!(cfg.proc_start, 0);
        assert!(cfg.seed.is_none());
        assert_eq!(cfg.slot_timeout(), Duration::from_secs(5));
        assert!(cfg.worker.is_none());
        assert!(!cfg.is_inline());
    }

    #[test]
    fn pool_config_builders() {
        let cfg = PoolConfig::new(4)
            .with_proc_per_worker(1)
            .with_proc_start(8)
            .with_seed(42)
            .with_slot_timeout_ms(250)
            .with_worker_command(WorkerCommand::new("/bin/worker"));
        assert_eq!(cfg.n_workers, 4);
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.slot_timeout_ms, 250);
        assert_eq!(cfg.layout(), AffinityLayout::new(4, 1, 8));
        assert_eq!(
            cfg.worker.map(|w| w.program),
            Some(PathBuf::from("/bin/worker"))
        );
    }

    #[test]
    fn zero_workers_is_inline() {
        assert!(PoolConfig::new(0).is_inline());
    }

    #[test]
    fn worker_command_builder() {
        let cmd = WorkerCommand::new("prog")
            .arg("--quiet")
            .env("RUST_LOG", "warn");
        assert_eq!(cmd.args, vec!["--quiet".to_string()]);
        assert_eq!(cmd.envs, vec![("RUST_LOG".to_string(), "warn".to_string())]);
    }

    #[test]
    fn current_exe_points_at_a_file() {
        let cmd = WorkerCommand::current_exe().unwrap();
        assert!(cmd.program.exists());
    }
}
