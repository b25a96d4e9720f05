//! FIFO queue between alert producers and the processor loop.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::cap::Alert;

/// Alerts waiting to be handled, oldest first.
///
/// The queue has its own lock so producers (feed connection, injection) never
/// wait on the processor state.
#[derive(Debug, Default)]
pub struct IntakeQueue {
    queue: Mutex<VecDeque<Alert>>,
}

impl IntakeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, alert: Alert) {
        self.queue().push_back(alert);
    }

    /// Removes the oldest alert.
    pub fn pop(&self) -> Option<Alert> {
        self.queue().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }
}
