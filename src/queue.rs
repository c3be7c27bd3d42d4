use std::collections::VecDeque;
use std::sync::Mutex;

/// A minimal thread-safe FIFO queue used to hand filesystem events from the
/// notify callback over to the watch loop.
pub struct FifoQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for FifoQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FifoQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, value: T) {
        let mut q = match self.inner.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        q.push_back(value);
    }

    pub fn pop(&self) -> Option<T> {
        let mut q = match self.inner.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        q.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        let q = match self.inner.lock() {
            Ok(q) => q,
            Err(poisoned) => poisoned.into_inner(),
        };
        q.is_empty()
    }
}
