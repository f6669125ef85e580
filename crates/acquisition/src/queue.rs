//! Bounded FIFO between the acquisition worker and the streaming task.
//!
//! A thin layer over [`embassy_sync::channel::Channel`]: the channel keeps
//! its ring behind one short-held lock and wakes an awaiting consumer on
//! push. What this type adds is the overflow policy. Producers never wait:
//! a full queue hands the item straight back so the caller can release it.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};

/// Bounded queue of `Q` items.
pub struct BoundedQueue<M: RawMutex, T, const Q: usize> {
    channel: Channel<M, T, Q>,
}

impl<M: RawMutex, T, const Q: usize> Default for BoundedQueue<M, T, Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, T, const Q: usize> BoundedQueue<M, T, Q> {
    /// Empty queue.
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Append without waiting. A full queue returns the item unchanged.
    pub fn push(&self, item: T) -> Result<(), T> {
        match self.channel.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => Err(item),
        }
    }

    /// Take the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Wait for the next item. Single consumer only.
    pub async fn pop(&self) -> T {
        self.channel.receive().await
    }

    /// Items queued.
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Whether the next push will be rejected.
    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }

    /// Maximum items.
    pub const fn capacity(&self) -> usize {
        Q
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};

    #[test]
    fn full_queue_hands_item_back() {
        let queue = BoundedQueue::<NoopRawMutex, u32, 2>::new();
        assert_eq!(queue.push(1), Ok(()));
        assert_eq!(queue.push(2), Ok(()));
        assert!(queue.is_full());
        assert_eq!(queue.push(3), Err(3), "newest item is rejected");
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn blocking_pop_waits_for_producer() {
        let queue = BoundedQueue::<CriticalSectionRawMutex, u32, 4>::new();
        let consumer = async { queue.pop().await };
        let producer = async {
            tokio::task::yield_now().await;
            queue.push(42).unwrap();
        };
        let (value, ()) = tokio::join!(consumer, producer);
        assert_eq!(value, 42);
        assert!(queue.is_empty());
    }
}
