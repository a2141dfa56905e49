//! Presentation adapter seam.
//!
//! The engine reports lifecycle and progress through these callbacks and
//! never depends on render results — implementations must be cheap and
//! non-blocking (forward to a UI channel, update an atomic, etc.).

use uuid::Uuid;

use crate::core::task::{Direction, TaskStatus};

/// Fire-and-forget lifecycle callbacks invoked by the core.
pub trait Presenter: Send + Sync {
    /// A task entered the list (row created).
    fn task_created(&self, id: Uuid, name: &str, size: u64, direction: Direction);

    /// Overall percentage progress for a task (0..=100).
    fn progress(&self, id: Uuid, percent: u8);

    /// Instantaneous throughput of the active transfer, in MB/s.
    fn throughput(&self, mbps: f64);

    /// A task changed status.
    fn status_changed(&self, id: Uuid, status: TaskStatus);

    /// A waiting task was removed before activation.
    fn task_removed(&self, id: Uuid);
}

/// No-op presenter for headless embedding and tests.
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn task_created(&self, _id: Uuid, _name: &str, _size: u64, _direction: Direction) {}
    fn progress(&self, _id: Uuid, _percent: u8) {}
    fn throughput(&self, _mbps: f64) {}
    fn status_changed(&self, _id: Uuid, _status: TaskStatus) {}
    fn task_removed(&self, _id: Uuid) {}
}
