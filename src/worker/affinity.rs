//! CPU affinity for worker processes.
//!
//! Worker `slot` of `W` workers, each owning `P` CPUs, is assigned
//! `{proc_start + (slot * P + i) mod (W * P) : i in 0..P}`. Distinct slots get
//! disjoint sets as long as `W * P` fits on the machine; beyond that the sets
//! wrap around and overlap.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityLayout {
    pub n_workers: usize,
    pub n_proc_per_worker: usize,
    pub proc_start: usize,
}

impl AffinityLayout {
    pub fn new(n_workers: usize, n_proc_per_worker: usize, proc_start: usize) -> Self {
        Self {
            n_workers,
            n_proc_per_worker,
            proc_start,
        }
    }

    /// Total CPUs the layout asks for, including the starting offset.
    pub fn cpus_required(&self) -> usize {
        self.proc_start + self.n_workers * self.n_proc_per_worker
    }

    /// True if the layout needs more logical CPUs than `available`.
    pub fn oversubscribes(&self, available: usize) -> bool {
        self.cpus_required() > available
    }

    pub fn cpu_set(&self, slot: usize) -> Vec<usize> {
        let total = self.n_workers * self.n_proc_per_worker;
        if total == 0 {
            return Vec::new();
        }
        (0..self.n_proc_per_worker)
            .map(|i| self.proc_start + (slot * self.n_proc_per_worker + i) % total)
            .collect()
    }
}

/// Logical CPUs visible to this process.
pub fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Pin the current process to `cpus`. Returns `Ok(false)` where the platform
/// has no affinity control.
#[cfg(target_os = "linux")]
pub fn pin_current_process(cpus: &[usize]) -> std::io::Result<bool> {
    use std::mem;

    let setsize = libc::CPU_SETSIZE as usize;
    // SAFETY: cpu_set_t is a plain bitmask; all-zero is the empty set.
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    for &cpu in cpus {
        if cpu >= setsize {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cpu {} exceeds CPU_SETSIZE", cpu),
            ));
        }
        // SAFETY: cpu is bounds-checked against CPU_SETSIZE above.
        unsafe { libc::CPU_SET(cpu, &mut set) };
    }

    // SAFETY: pid 0 targets the calling process; set is a valid cpu_set_t.
    let rc = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &set) };
    if rc == 0 {
        Ok(true)
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_process(_cpus: &[usize]) -> std::io::Result<bool> {
    Ok(false)
}

/// CPUs the current process may run on, where the platform can tell.
#[cfg(target_os = "linux")]
pub fn current_affinity() -> Option<Vec<usize>> {
    use std::mem;

    // SAFETY: see pin_current_process.
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    let rc = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
    if rc != 0 {
        return None;
    }
    let cpus = (0..libc::CPU_SETSIZE as usize)
        // SAFETY: index is below CPU_SETSIZE.
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) })
        .collect();
    Some(cpus)
}

#[cfg(not(target_os = "linux"))]
pub fn current_affinity() -> Option<Vec<usize>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn cpu_sets_are_disjoint_within_capacity() {
        let layout = AffinityLayout::new(4, 2, 0);
        let mut seen = HashSet::new();
        for slot in 0..4 {
            for cpu in layout.cpu_set(slot) {
                assert!(seen.insert(cpu), "cpu {} assigned twice", cpu);
            }
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn cpu_sets_start_at_offset() {
        let layout = AffinityLayout::new(2, 3, 4);
        assert_eq!(layout.cpu_set(0), vec![4, 5, 6]);
        assert_eq!(layout.cpu_set(1), vec![7, 8, 9]);
        assert_eq!(layout.cpus_required(), 10);
    }

    #[test]
    fn slots_beyond_worker_count_wrap() {
        let layout = AffinityLayout::new(2, 2, 0);
        assert_eq!(layout.cpu_set(2), layout.cpu_set(0));
    }

    #[test]
    fn oversubscription_is_detected() {
        let layout = AffinityLayout::new(30, 2, 0);
        assert!(layout.oversubscribes(16));
        assert!(!layout.oversubscribes(60));
    }

    #[test]
    fn empty_layout_has_no_cpus() {
        assert!(AffinityLayout::new(0, 2, 0).cpu_set(0).is_empty());
        assert!(AffinityLayout::new(2, 0, 0).cpu_set(1).is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn current_affinity_is_non_empty() {
        let cpus = current_affinity().unwrap();
        assert!(!cpus.is_empty());
    }
}
