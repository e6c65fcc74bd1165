// In-process mailbox broker: named FIFO queues with lease-based delivery.
//
// Queues are declared before use. A poll moves the head message into the
// queue's inflight map under a fresh lease; `ack` consumes the lease and
// `nack` returns the message to the front of the queue. Abandoning a queue
// drops it and fails any poller still waiting on it.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tracing::debug;
use vega_wire::Message;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("unknown queue: {0}")]
    UnknownQueue(String),
    #[error("unknown lease {lease} for queue {queue}")]
    UnknownLease { queue: String, lease: u64 },
}

#[derive(Debug)]
struct QueueState {
    inner: Mutex<QueueInner>,
    // Wakes one long-poller per enqueued message.
    notify: Notify,
    ephemeral: bool,
}

#[derive(Debug)]
struct QueueInner {
    ready: VecDeque<Message>,
    // Outstanding deliveries, keyed by lease.
    inflight: HashMap<u64, Message>,
    next_lease: u64,
    abandoned: bool,
}

impl QueueState {
    fn new(ephemeral: bool) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                ready: VecDeque::new(),
                inflight: HashMap::new(),
                next_lease: 0,
                abandoned: false,
            }),
            notify: Notify::new(),
            ephemeral,
        }
    }

    // Pop the head message into the inflight map. Errors once the queue has
    // been abandoned so blocked pollers fail instead of hanging.
    fn try_pop(&self, name: &str) -> Result<Option<(u64, Message)>> {
        let mut inner = self.inner.lock().expect("queue lock");
        if inner.abandoned {
            return Err(BrokerError::UnknownQueue(name.to_string()));
        }
        let Some(message) = inner.ready.pop_front() else {
            return Ok(None);
        };
        let lease = inner.next_lease;
        inner.next_lease += 1;
        inner.inflight.insert(lease, message.clone());
        Ok(Some((lease, message)))
    }
}

/// In-process broker hosting named mailboxes.
///
/// ```
/// use vega_broker::Broker;
/// use vega_wire::Message;
///
/// let broker = Broker::new();
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     broker.declare("orders").await.expect("declare");
///     broker
///         .push("orders", Message::data(b"job".as_slice()))
///         .await
///         .expect("push");
///     let (lease, message) = broker.poll("orders").await.expect("poll").expect("delivery");
///     assert_eq!(message.body.as_ref(), b"job");
///     broker.ack("orders", lease).await.expect("ack");
/// });
/// ```
#[derive(Debug, Default)]
pub struct Broker {
    // Map of queue name -> queue state.
    queues: RwLock<HashMap<String, Arc<QueueState>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a persistent queue. Redeclaring an existing queue is a no-op.
    pub async fn declare(&self, name: &str) -> Result<()> {
        self.declare_queue(name, false).await
    }

    /// Declare a broker-managed queue that is dropped once abandoned.
    pub async fn ephemeral_declare(&self, name: &str) -> Result<()> {
        self.declare_queue(name, true).await
    }

    async fn declare_queue(&self, name: &str, ephemeral: bool) -> Result<()> {
        let mut guard = self.queues.write().await;
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::new(ephemeral)));
        Ok(())
    }

    /// Append a message to a declared queue and wake one waiting poller.
    pub async fn push(&self, name: &str, message: Message) -> Result<()> {
        let queue = self.lookup(name).await?;
        {
            let mut inner = queue.inner.lock().expect("queue lock");
            if inner.abandoned {
                return Err(BrokerError::UnknownQueue(name.to_string()));
            }
            inner.ready.push_back(message);
        }
        queue.notify.notify_one();
        Ok(())
    }

    /// Non-blocking poll. A returned message stays outstanding under its
    /// lease until acked or nacked.
    pub async fn poll(&self, name: &str) -> Result<Option<(u64, Message)>> {
        let queue = self.lookup(name).await?;
        queue.try_pop(name)
    }

    /// Poll, blocking up to `window` for a message. Returns `None` when the
    /// window expires with the queue still empty.
    pub async fn long_poll(&self, name: &str, window: Duration) -> Result<Option<(u64, Message)>> {
        let queue = self.lookup(name).await?;
        let deadline = tokio::time::Instant::now() + window;
        loop {
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before the emptiness check so a push
            // between the check and the await cannot be missed.
            notified.as_mut().enable();
            if let Some(entry) = queue.try_pop(name)? {
                return Ok(Some(entry));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Consume an outstanding delivery.
    pub async fn ack(&self, name: &str, lease: u64) -> Result<()> {
        let queue = self.lookup(name).await?;
        let mut inner = queue.inner.lock().expect("queue lock");
        if inner.inflight.remove(&lease).is_none() {
            return Err(BrokerError::UnknownLease {
                queue: name.to_string(),
                lease,
            });
        }
        Ok(())
    }

    /// Return an outstanding delivery to the front of its queue.
    pub async fn nack(&self, name: &str, lease: u64) -> Result<()> {
        let queue = self.lookup(name).await?;
        {
            let mut inner = queue.inner.lock().expect("queue lock");
            let Some(message) = inner.inflight.remove(&lease) else {
                return Err(BrokerError::UnknownLease {
                    queue: name.to_string(),
                    lease,
                });
            };
            inner.ready.push_front(message);
        }
        queue.notify.notify_one();
        Ok(())
    }

    /// Drop a queue. Pollers blocked on it observe `UnknownQueue`.
    pub async fn abandon(&self, name: &str) -> Result<()> {
        let queue = {
            let mut guard = self.queues.write().await;
            guard
                .remove(name)
                .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))?
        };
        {
            let mut inner = queue.inner.lock().expect("queue lock");
            inner.abandoned = true;
            inner.ready.clear();
            inner.inflight.clear();
        }
        debug!(queue = name, "queue abandoned");
        queue.notify.notify_waiters();
        Ok(())
    }

    pub async fn queue_exists(&self, name: &str) -> bool {
        self.queues.read().await.contains_key(name)
    }

    /// Whether `name` was declared through the ephemeral path, if it exists.
    pub async fn is_ephemeral(&self, name: &str) -> Option<bool> {
        self.queues
            .read()
            .await
            .get(name)
            .map(|queue| queue.ephemeral)
    }

    async fn lookup(&self, name: &str) -> Result<Arc<QueueState>> {
        self.queues
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn push_and_poll_preserve_order() {
        let broker = Broker::new();
        broker.declare("q").await.expect("declare");
        broker
            .push("q", Message::data(b"one".as_slice()))
            .await
            .expect("push");
        broker
            .push("q", Message::data(b"two".as_slice()))
            .await
            .expect("push");
        let (_, first) = broker.poll("q").await.expect("poll").expect("delivery");
        let (_, second) = broker.poll("q").await.expect("poll").expect("delivery");
        assert_eq!(first.body, Bytes::from_static(b"one"));
        assert_eq!(second.body, Bytes::from_static(b"two"));
        assert!(broker.poll("q").await.expect("poll").is_none());
    }

    #[tokio::test]
    async fn push_to_undeclared_queue_fails() {
        let broker = Broker::new();
        let err = broker
            .push("missing", Message::data(b"x".as_slice()))
            .await
            .expect_err("push");
        assert!(matches!(err, BrokerError::UnknownQueue(name) if name == "missing"));
    }

    #[tokio::test]
    async fn declare_is_idempotent() {
        let broker = Broker::new();
        broker.declare("q").await.expect("declare");
        broker.declare("q").await.expect("redeclare");
        assert!(broker.queue_exists("q").await);
        assert_eq!(broker.is_ephemeral("q").await, Some(false));
    }

    #[tokio::test]
    async fn ephemeral_declare_marks_queue() {
        let broker = Broker::new();
        broker.ephemeral_declare("scratch").await.expect("declare");
        assert_eq!(broker.is_ephemeral("scratch").await, Some(true));
        assert_eq!(broker.is_ephemeral("missing").await, None);
    }

    #[tokio::test]
    async fn unacked_delivery_is_not_redelivered() {
        let broker = Broker::new();
        broker.declare("q").await.expect("declare");
        broker
            .push("q", Message::data(b"job".as_slice()))
            .await
            .expect("push");
        let (lease, _) = broker.poll("q").await.expect("poll").expect("delivery");
        // Outstanding lease keeps the message out of the ready queue.
        assert!(broker.poll("q").await.expect("poll").is_none());
        broker.nack("q", lease).await.expect("nack");
        let (_, message) = broker.poll("q").await.expect("poll").expect("redelivery");
        assert_eq!(message.body, Bytes::from_static(b"job"));
    }

    #[tokio::test]
    async fn ack_consumes_the_lease() {
        let broker = Broker::new();
        broker.declare("q").await.expect("declare");
        broker
            .push("q", Message::data(b"job".as_slice()))
            .await
            .expect("push");
        let (lease, _) = broker.poll("q").await.expect("poll").expect("delivery");
        broker.ack("q", lease).await.expect("ack");
        let err = broker.ack("q", lease).await.expect_err("double ack");
        assert!(matches!(err, BrokerError::UnknownLease { lease: l, .. } if l == lease));
    }

    #[tokio::test]
    async fn nack_requeues_at_the_front() {
        let broker = Broker::new();
        broker.declare("q").await.expect("declare");
        broker
            .push("q", Message::data(b"first".as_slice()))
            .await
            .expect("push");
        broker
            .push("q", Message::data(b"second".as_slice()))
            .await
            .expect("push");
        let (lease, _) = broker.poll("q").await.expect("poll").expect("delivery");
        broker.nack("q", lease).await.expect("nack");
        let (_, head) = broker.poll("q").await.expect("poll").expect("delivery");
        assert_eq!(head.body, Bytes::from_static(b"first"));
    }

    #[tokio::test]
    async fn long_poll_wakes_on_push() {
        let broker = Arc::new(Broker::new());
        broker.declare("q").await.expect("declare");
        let pusher = Arc::clone(&broker);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pusher
                .push("q", Message::data(b"late".as_slice()))
                .await
                .expect("push");
        });
        let entry = broker
            .long_poll("q", Duration::from_secs(5))
            .await
            .expect("long poll");
        let (_, message) = entry.expect("delivery");
        assert_eq!(message.body, Bytes::from_static(b"late"));
        handle.await.expect("pusher join");
    }

    #[tokio::test]
    async fn long_poll_times_out_empty() {
        let broker = Broker::new();
        broker.declare("q").await.expect("declare");
        let entry = broker
            .long_poll("q", Duration::from_millis(20))
            .await
            .expect("long poll");
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn abandon_fails_blocked_pollers() {
        let broker = Arc::new(Broker::new());
        broker.declare("q").await.expect("declare");
        let poller = Arc::clone(&broker);
        let handle =
            tokio::spawn(async move { poller.long_poll("q", Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.abandon("q").await.expect("abandon");
        let result = handle.await.expect("poller join");
        assert!(matches!(result, Err(BrokerError::UnknownQueue(_))));
        assert!(!broker.queue_exists("q").await);
    }

    #[tokio::test]
    async fn abandon_unknown_queue_fails() {
        let broker = Broker::new();
        let err = broker.abandon("missing").await.expect_err("abandon");
        assert!(matches!(err, BrokerError::UnknownQueue(_)));
    }
}
