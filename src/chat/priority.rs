use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::chat::message::Priority;
use crate::transport::ReliableConnection;

/// Where a queued message ultimately goes: one reliable connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync + 'static {
    async fn send_bytes(&self, payload: &[u8]) -> anyhow::Result<()>;
}

#[async_trait]
impl MessageSink for ReliableConnection {
    async fn send_bytes(&self, payload: &[u8]) -> anyhow::Result<()> {
        self.send(payload).await
    }
}

struct QueuedMessage {
    priority: Priority,
    index: u64,
    payload: Vec<u8>,
}

// BinaryHeap is a max-heap; invert the comparison so the smallest
// (priority, arrival index) pair pops first and FIFO holds within a
// priority level.
impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.index).cmp(&(self.priority, self.index))
    }
}
impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Eq for QueuedMessage {}
impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.index == other.index
    }
}

struct Inner {
    sink: Arc<dyn MessageSink>,
    queue: StdMutex<BinaryHeap<QueuedMessage>>,
    notify: Notify,
    next_index: AtomicU64,
}

/// Priority scheduler over one connection.
///
/// `enqueue` orders whole application messages by (priority, arrival index);
/// a single worker pops one message at a time and runs the blocking
/// Stop-and-Wait send. Small urgent messages therefore overtake a file that
/// has not started yet, but an in-flight message is never preempted.
pub struct PrioritySender {
    inner: Arc<Inner>,
    worker: JoinHandle<()>,
}

impl PrioritySender {
    pub fn start(sink: Arc<dyn MessageSink>) -> Arc<PrioritySender> {
        let inner = Arc::new(Inner {
            sink,
            queue: StdMutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            next_index: AtomicU64::new(0),
        });

        let worker = tokio::spawn({
            let inner = inner.clone();
            async move {
                loop {
                    // arm the wakeup before checking the queue, so an
                    // enqueue between check and await is not lost
                    let notified = inner.notify.notified();

                    let next = inner.queue.lock().expect("priority queue poisoned").pop();
                    match next {
                        Some(message) => {
                            if let Err(e) = inner.sink.send_bytes(&message.payload).await {
                                warn!("priority worker stopping, send failed: {}", e);
                                return;
                            }
                        }
                        None => notified.await,
                    }
                }
            }
        });

        Arc::new(PrioritySender { inner, worker })
    }

    /// Queues one whole message for delivery. Never blocks.
    pub fn enqueue(&self, payload: Vec<u8>, priority: Priority) {
        let index = self.inner.next_index.fetch_add(1, AtomicOrdering::SeqCst);
        debug!("queueing message (priority={:?}, index={})", priority, index);

        self.inner
            .queue
            .lock()
            .expect("priority queue poisoned")
            .push(QueuedMessage {
                priority,
                index,
                payload,
            });
        self.inner.notify.notify_one();
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().expect("priority queue poisoned").len()
    }
}

impl Drop for PrioritySender {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use super::*;

    /// Records the order in which sends start, then blocks each send until
    /// the test releases a permit.
    struct GatedSink {
        started: StdMutex<Vec<String>>,
        gate: Semaphore,
    }

    impl GatedSink {
        fn new() -> Arc<GatedSink> {
            Arc::new(GatedSink {
                started: StdMutex::new(Vec::new()),
                gate: Semaphore::new(0),
            })
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSink for GatedSink {
        async fn send_bytes(&self, payload: &[u8]) -> anyhow::Result<()> {
            self.started
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).into_owned());
            self.gate.acquire().await?.forget();
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn enqueue_str(sender: &PrioritySender, payload: &str, priority: Priority) {
        sender.enqueue(payload.as_bytes().to_vec(), priority);
    }

    #[tokio::test]
    async fn test_system_message_overtakes_a_queued_file() {
        let sink = GatedSink::new();
        let sender = PrioritySender::start(sink.clone());

        // occupy the worker so everything else stays queued
        enqueue_str(&sender, "in-flight", Priority::Text);
        wait_until(|| sink.started().len() == 1).await;

        enqueue_str(&sender, "file", Priority::File);
        enqueue_str(&sender, "system", Priority::System);

        sink.gate.add_permits(3);
        wait_until(|| sink.started().len() == 3).await;

        assert_eq!(sink.started(), vec!["in-flight", "system", "file"]);
    }

    #[tokio::test]
    async fn test_fifo_within_one_priority_level() {
        let sink = GatedSink::new();
        let sender = PrioritySender::start(sink.clone());

        enqueue_str(&sender, "blocker", Priority::System);
        wait_until(|| sink.started().len() == 1).await;

        enqueue_str(&sender, "first", Priority::Text);
        enqueue_str(&sender, "second", Priority::Text);
        enqueue_str(&sender, "third", Priority::Text);

        sink.gate.add_permits(4);
        wait_until(|| sink.started().len() == 4).await;

        assert_eq!(sink.started(), vec!["blocker", "first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_in_flight_message_is_not_preempted() {
        let sink = GatedSink::new();
        let sender = PrioritySender::start(sink.clone());

        enqueue_str(&sender, "big file", Priority::File);
        wait_until(|| sink.started().len() == 1).await;

        // arrives while the file transfer is running
        enqueue_str(&sender, "urgent", Priority::System);
        tokio::time::sleep(Duration::from_millis(20)).await;

        // the file send keeps running; the urgent message waits its turn
        assert_eq!(sink.started(), vec!["big file"]);
        assert_eq!(sender.queued(), 1);

        sink.gate.add_permits(2);
        wait_until(|| sink.started().len() == 2).await;
        assert_eq!(sink.started(), vec!["big file", "urgent"]);
    }

    #[tokio::test]
    async fn test_worker_stops_when_the_sink_fails() {
        let mut sink = MockMessageSink::new();
        sink.expect_send_bytes()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection is closed")));
        let sender = PrioritySender::start(Arc::new(sink));

        enqueue_str(&sender, "doomed", Priority::Text);
        enqueue_str(&sender, "never sent", Priority::Text);

        wait_until(|| sender.queued() <= 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        // the second message is still queued: the worker is gone
        assert_eq!(sender.queued(), 1);
    }
}
