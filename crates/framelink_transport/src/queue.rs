//! See [`DeliveryQueue`].

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex, MutexGuard},
};

/// Bounded blocking queue between the receive poll thread and the
/// application's delivery thread.
///
/// The poll thread pushes completed payload descriptors; pushing blocks
/// while the queue is full, which is how a slow application exerts
/// back-pressure on the ingest path (and, through it, on the adapter's
/// receive credits). The delivery thread blocks on [`pop`](Self::pop).
///
/// [`shutdown`](Self::shutdown) unblocks every waiter: pushes fail from
/// then on, pops drain whatever is queued and then return `None`.
///
/// Cloning shares the same queue.
#[derive(Debug)]
pub struct DeliveryQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Debug)]
struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
    shutdown: bool,
}

/// The queue was shut down; the item could not be enqueued and is handed
/// back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery queue shut down")]
pub struct QueueShutdown<T>(pub T);

impl<T> DeliveryQueue<T> {
    /// Creates a queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    capacity,
                    shutdown: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        #[allow(clippy::unwrap_used)]
        self.shared.state.lock().unwrap()
    }

    /// Number of items currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().items.len()
    }

    /// Whether no items are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().items.is_empty()
    }

    /// Enqueues an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Hands the item back if the queue has been shut down.
    #[allow(clippy::unwrap_used)] // lock poisoning propagates the panic
    pub fn push(&self, item: T) -> Result<(), QueueShutdown<T>> {
        let mut state = self.state();
        while state.items.len() == state.capacity && !state.shutdown {
            state = self.shared.not_full.wait(state).unwrap();
        }
        if state.shutdown {
            return Err(QueueShutdown(item));
        }
        state.items.push_back(item);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Enqueues an item without blocking. Hands the item back when the
    /// queue is full or shut down.
    ///
    /// # Errors
    ///
    /// [`QueueShutdown`] carrying the item; a full queue also reports as
    /// an error carrying the item.
    pub fn try_push(&self, item: T) -> Result<(), QueueShutdown<T>> {
        let mut state = self.state();
        if state.shutdown || state.items.len() == state.capacity {
            return Err(QueueShutdown(item));
        }
        state.items.push_back(item);
        drop(state);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` only after [`shutdown`](Self::shutdown), once every
    /// queued item has been drained.
    #[allow(clippy::unwrap_used)] // lock poisoning propagates the panic
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.shared.not_full.notify_one();
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            state = self.shared.not_empty.wait(state).unwrap();
        }
    }

    /// Dequeues the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.state().items.pop_front();
        if item.is_some() {
            self.shared.not_full.notify_one();
        }
        item
    }

    /// Shuts the queue down, unblocking every waiting push and pop.
    pub fn shutdown(&self) {
        self.state().shutdown = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn fifo_order() {
        let queue = DeliveryQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();
        assert_eq!(3, queue.len());

        assert_eq!(Some(1), queue.pop());
        assert_eq!(Some(2), queue.pop());
        assert_eq!(Some(3), queue.pop());
        assert!(queue.is_empty());
    }

    #[test]
    fn try_push_full() {
        let queue = DeliveryQueue::new(1);
        queue.try_push(1).unwrap();
        assert_matches!(queue.try_push(2), Err(QueueShutdown(2)));
    }

    #[test]
    fn shutdown_drains_then_ends() {
        let queue = DeliveryQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        queue.shutdown();

        assert_matches!(queue.push(3), Err(QueueShutdown(3)));
        assert_eq!(Some(1), queue.pop());
        assert_eq!(Some(2), queue.pop());
        assert_eq!(None, queue.pop());
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = DeliveryQueue::new(2);
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(42).unwrap();
        assert_eq!(Some(42), consumer.join().unwrap());
    }

    #[test]
    fn push_blocks_until_pop() {
        let queue = DeliveryQueue::new(1);
        queue.push(1).unwrap();
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(Some(1), queue.pop());
        producer.join().unwrap().unwrap();
        assert_eq!(Some(2), queue.pop());
    }

    #[test]
    fn shutdown_unblocks_waiters() {
        let queue = DeliveryQueue::<u32>::new(1);
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.shutdown();
        assert_eq!(None, consumer.join().unwrap());
    }
}
