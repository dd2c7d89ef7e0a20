use std::collections::VecDeque;

use crate::scheduler::task::Task;

/// Tasks not yet handed to a worker, in submission order.
///
/// Idle workers pull from the front; nothing is ever put back, so each task is
/// handed out exactly once.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: VecDeque<Task>,
    dispatched: usize,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            pending: tasks.into(),
            dispatched: 0,
        }
    }

    pub fn push(&mut self, task: Task) {
        self.pending.push_back(task);
    }

    /// Hand the next task to a worker.
    pub fn next_task(&mut self) -> Option<Task> {
        let task = self.pending.pop_front()?;
        self.dispatched += 1;
        Some(task)
    }

    /// Indices still waiting, in order.
    pub fn pending_indices(&self) -> Vec<usize> {
        self.pending.iter().map(|t| t.index).collect()
    }

    /// Number of tasks handed out so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::task::Kwargs;
    use crate::seed;

    fn tasks(n: usize) -> Vec<Task> {
        seed::branch(Some(0), n)
            .into_iter()
            .enumerate()
            .map(|(i, s)| Task::new(i, Kwargs::new().with("x", i), s))
            .collect()
    }

    #[test]
    fn hands_out_tasks_in_order_once() {
        let mut queue = TaskQueue::from_tasks(tasks(3));
        assert_eq!(queue.pending_indices(), vec![0, 1, 2]);
        assert_eq!(queue.next_task().map(|t| t.index), Some(0));
        assert_eq!(queue.next_task().map(|t| t.index), Some(1));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dispatched(), 2);
        assert_eq!(queue.next_task().map(|t| t.index), Some(2));
        assert!(queue.next_task().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.dispatched(), 3);
    }

    #[test]
    fn push_appends() {
        let mut queue = TaskQueue::new();
        for task in tasks(2) {
            queue.push(task);
        }
        assert_eq!(queue.pending_indices(), vec![0, 1]);
    }
}
