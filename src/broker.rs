//! Per-session message broker.
//!
//! The broker is the rendezvous point between the request layer and the
//! interview worker: answer handlers push patient messages into a FIFO
//! queue, and the worker's interactive stages pop them, suspending when the
//! queue is empty. The worker publishes its current outstanding question
//! through a watch channel so request handlers can wait for the next
//! question without polling.
//!
//! The asymmetry is deliberate: a session has at most one live question at
//! a time, so questions overwrite each other (last write wins), while
//! answers are queued so none are dropped if they arrive faster than the
//! worker consumes them.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify, watch};

/// Rendezvous primitive owned by exactly one session.
pub struct MessageBroker {
    queue: Mutex<VecDeque<String>>,
    available: Notify,
    question: watch::Sender<Option<String>>,
}

impl MessageBroker {
    pub fn new() -> Self {
        let (question, _) = watch::channel(None);
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            question,
        }
    }

    /// Append a message to the pending queue and wake one blocked waiter.
    pub async fn add_message(&self, text: impl Into<String>) {
        self.queue.lock().await.push_back(text.into());
        self.available.notify_one();
    }

    /// Pop the oldest pending message, suspending until one is available.
    ///
    /// There is no timeout at this layer: a worker parked here stays parked
    /// until a message arrives or the process ends (see the abandoned-worker
    /// behavior documented on `worker::spawn`).
    pub async fn get_message(&self) -> String {
        loop {
            // Register interest before checking the queue so a notify that
            // lands between the check and the await is not lost.
            let notified = self.available.notified();
            if let Some(msg) = self.queue.lock().await.pop_front() {
                return msg;
            }
            notified.await;
        }
    }

    /// Publish `text` as the current outstanding question, overwriting any
    /// previous value.
    pub fn set_question(&self, text: impl Into<String>) {
        self.question.send_replace(Some(text.into()));
    }

    /// Read the current outstanding question without consuming it.
    pub fn get_question(&self) -> Option<String> {
        self.question.borrow().clone()
    }

    /// Subscribe to question updates. The receiver sees only questions set
    /// after this call; a requester that subscribes too late may miss
    /// intermediate questions (only the latest is ever observable).
    pub fn question_watch(&self) -> watch::Receiver<Option<String>> {
        self.question.subscribe()
    }

    /// Number of messages queued but not yet consumed.
    pub async fn pending_messages(&self) -> usize {
        self.queue.lock().await.len()
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_messages_are_fifo() {
        let broker = MessageBroker::new();
        broker.add_message("first").await;
        broker.add_message("second").await;
        broker.add_message("third").await;

        assert_eq!(broker.get_message().await, "first");
        assert_eq!(broker.get_message().await, "second");
        assert_eq!(broker.get_message().await, "third");
    }

    #[tokio::test]
    async fn test_get_message_blocks_until_add() {
        let broker = Arc::new(MessageBroker::new());

        let waiter = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.get_message().await })
        };

        // Give the waiter a chance to park on the empty queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter must block on empty queue");

        broker.add_message("hello").await;
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must wake after add_message")
            .unwrap();
        assert_eq!(got, "hello");
    }

    #[tokio::test]
    async fn test_add_before_get_returns_immediately() {
        let broker = MessageBroker::new();
        broker.add_message("early").await;
        // Must not require a concurrent notify; the queued message is enough.
        let got = tokio::time::timeout(Duration::from_millis(100), broker.get_message())
            .await
            .expect("queued message must be returned without waiting");
        assert_eq!(got, "early");
    }

    #[tokio::test]
    async fn test_question_last_write_wins() {
        let broker = MessageBroker::new();
        assert_eq!(broker.get_question(), None);

        broker.set_question("How long have you had the symptoms?");
        broker.set_question("Any fever?");
        assert_eq!(broker.get_question(), Some("Any fever?".to_string()));

        // Reading does not consume.
        assert_eq!(broker.get_question(), Some("Any fever?".to_string()));
    }

    #[tokio::test]
    async fn test_question_watch_sees_updates_after_subscribe() {
        let broker = Arc::new(MessageBroker::new());
        broker.set_question("old question");

        let mut rx = broker.question_watch();
        // The value current at subscribe time is already marked seen.
        {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                broker.set_question("new question");
            });
        }

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("watch must observe the new question")
            .unwrap();
        assert_eq!(rx.borrow().clone(), Some("new question".to_string()));
    }

    #[tokio::test]
    async fn test_pending_messages_counts_queue() {
        let broker = MessageBroker::new();
        assert_eq!(broker.pending_messages().await, 0);
        broker.add_message("a").await;
        broker.add_message("b").await;
        assert_eq!(broker.pending_messages().await, 2);
        broker.get_message().await;
        assert_eq!(broker.pending_messages().await, 1);
    }
}
