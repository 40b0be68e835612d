use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Single-slot conflating queue.
///
/// `post` overwrites whatever is pending, so a consumer that falls behind only
/// ever sees the most recent value. Intended for exactly one consumer task.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the value that was superseded, if any
    pub fn post(&self, value: T) -> Option<T> {
        let previous = self.slot.lock().replace(value);
        self.notify.notify_one();
        previous
    }

    /// Wait for the next value; None once closed and drained
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(value) = self.slot.lock().take() {
                return Some(value);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_take(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_post_overwrites_pending() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.post(1), None);
        assert_eq!(mailbox.post(2), Some(1));
        assert_eq!(mailbox.try_take(), Some(2));
        assert_eq!(mailbox.try_take(), None);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_post() {
        let mailbox = Arc::new(Mailbox::new());
        let consumer = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.recv().await })
        };

        tokio::task::yield_now().await;
        mailbox.post("latest");
        assert_eq!(consumer.await.unwrap(), Some("latest"));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let mailbox = Mailbox::new();
        mailbox.post(7);
        mailbox.close();
        assert_eq!(mailbox.recv().await, Some(7));
        assert_eq!(mailbox.recv().await, None);
    }
}
