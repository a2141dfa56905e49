//! Transfer queue: ordered list of tasks, uploads serialized FIFO.
//!
//! Insertion order is arrival order. Statuses mutate in place; tasks that
//! reach a terminal state stay in the list for display and are never
//! requeued. A task can only be removed by explicit user action while it
//! is still `Waiting` — cancellation is the path for active tasks.

use uuid::Uuid;

use crate::core::task::{TaskStatus, TransferTask};

#[derive(Default)]
pub struct TransferQueue {
    tasks: Vec<TransferTask>,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Append a task at the tail.
    pub fn push(&mut self, task: TransferTask) {
        self.tasks.push(task);
    }

    /// Id of the first `Waiting` task in insertion order, if any.
    pub fn next_waiting(&self) -> Option<Uuid> {
        self.tasks
            .iter()
            .find(|t| t.status == TaskStatus::Waiting)
            .map(|t| t.id)
    }

    /// Remove a task, allowed only while it is `Waiting`.
    ///
    /// Returns `true` if the task was removed. Active and terminal tasks
    /// are left untouched.
    pub fn remove_waiting(&mut self, id: Uuid) -> bool {
        match self.tasks.iter().position(|t| t.id == id) {
            Some(idx) if self.tasks[idx].status == TaskStatus::Waiting => {
                self.tasks.remove(idx);
                true
            }
            _ => false,
        }
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut TransferTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Number of tasks currently `Active`. The engine keeps this ≤ 1.
    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Active)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::FileSource;
    use anyhow::Result;
    use bytes::Bytes;

    struct NoSource;

    #[async_trait::async_trait]
    impl FileSource for NoSource {
        async fn read_slice(&mut self, _offset: u64, _len: usize) -> Result<Bytes> {
            Ok(Bytes::new())
        }
    }

    fn upload(name: &str) -> TransferTask {
        TransferTask::upload(Uuid::new_v4(), name.into(), 100, Box::new(NoSource))
    }

    #[test]
    fn fifo_order_by_insertion() {
        let mut q = TransferQueue::new();
        let a = upload("a");
        let b = upload("b");
        let (ida, idb) = (a.id, b.id);
        q.push(a);
        q.push(b);

        assert_eq!(q.next_waiting(), Some(ida));
        q.get_mut(ida).unwrap().status = TaskStatus::Active;
        assert_eq!(q.next_waiting(), Some(idb));
        q.get_mut(ida).unwrap().status = TaskStatus::Done;
        assert_eq!(q.next_waiting(), Some(idb));
    }

    #[test]
    fn remove_only_while_waiting() {
        let mut q = TransferQueue::new();
        let t = upload("a");
        let id = t.id;
        q.push(t);

        q.get_mut(id).unwrap().status = TaskStatus::Active;
        assert!(!q.remove_waiting(id));
        q.get_mut(id).unwrap().status = TaskStatus::Done;
        assert!(!q.remove_waiting(id));
        assert!(q.get_mut(id).is_some(), "terminal tasks stay listed");

        let t2 = upload("b");
        let id2 = t2.id;
        q.push(t2);
        assert!(q.remove_waiting(id2));
        assert!(q.get_mut(id2).is_none());
    }

    #[test]
    fn active_count_tracks_status() {
        let mut q = TransferQueue::new();
        let a = upload("a");
        let ida = a.id;
        q.push(a);
        q.push(upload("b"));
        assert_eq!(q.active_count(), 0);
        q.get_mut(ida).unwrap().status = TaskStatus::Active;
        assert_eq!(q.active_count(), 1);
        q.get_mut(ida).unwrap().status = TaskStatus::Done;
        assert_eq!(q.active_count(), 0);
    }
}
