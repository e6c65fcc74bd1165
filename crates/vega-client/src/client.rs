// Mailbox transport surface over an in-process broker.
use std::sync::Arc;
use std::time::Duration;
use vega_broker::Broker;
use vega_wire::Message;

use crate::Result;

/// Transport handle exposing the raw mailbox verbs.
///
/// Cloning is cheap; clones share the underlying broker and are safe to use
/// from concurrent tasks.
///
/// ```
/// use std::sync::Arc;
/// use vega_broker::Broker;
/// use vega_client::Client;
/// use vega_wire::Message;
///
/// let client = Client::in_process(Arc::new(Broker::new()));
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     client.declare("jobs").await.expect("declare");
///     client
///         .push("jobs", Message::data(b"payload".as_slice()))
///         .await
///         .expect("push");
///     let delivery = client.poll("jobs").await.expect("poll").expect("delivery");
///     assert_eq!(delivery.message.body.as_ref(), b"payload");
///     delivery.ack().await.expect("ack");
/// });
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    broker: Arc<Broker>,
}

impl Client {
    // Wrap the broker running in this process.
    pub fn in_process(broker: Arc<Broker>) -> Self {
        Self { broker }
    }

    pub async fn declare(&self, name: &str) -> Result<()> {
        Ok(self.broker.declare(name).await?)
    }

    pub async fn ephemeral_declare(&self, name: &str) -> Result<()> {
        Ok(self.broker.ephemeral_declare(name).await?)
    }

    pub async fn push(&self, queue: &str, message: Message) -> Result<()> {
        Ok(self.broker.push(queue, message).await?)
    }

    /// Non-blocking poll for the next delivery.
    pub async fn poll(&self, queue: &str) -> Result<Option<Delivery>> {
        let entry = self.broker.poll(queue).await?;
        Ok(entry.map(|(lease, message)| self.delivery(queue, lease, message)))
    }

    /// Poll, blocking up to `window`. `None` means the window expired.
    pub async fn long_poll(&self, queue: &str, window: Duration) -> Result<Option<Delivery>> {
        let entry = self.broker.long_poll(queue, window).await?;
        Ok(entry.map(|(lease, message)| self.delivery(queue, lease, message)))
    }

    pub async fn abandon(&self, queue: &str) -> Result<()> {
        Ok(self.broker.abandon(queue).await?)
    }

    /// Fresh broker-unique mailbox name for ephemeral use.
    pub fn random_queue(&self) -> String {
        vega_wire::random_queue_name()
    }

    fn delivery(&self, queue: &str, lease: u64, message: Message) -> Delivery {
        Delivery {
            message,
            queue: queue.to_string(),
            lease,
            broker: Arc::clone(&self.broker),
        }
    }
}

/// A dispensed message plus its acknowledgement capability. The broker keeps
/// the message outstanding until `ack` or `nack` settles the lease.
#[derive(Debug)]
pub struct Delivery {
    pub message: Message,
    queue: String,
    lease: u64,
    broker: Arc<Broker>,
}

impl Delivery {
    /// Tell the broker the delivery is consumed.
    pub async fn ack(&self) -> Result<()> {
        Ok(self.broker.ack(&self.queue, self.lease).await?)
    }

    /// Return the delivery to the front of its queue.
    pub async fn nack(&self) -> Result<()> {
        Ok(self.broker.nack(&self.queue, self.lease).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn client() -> Client {
        Client::in_process(Arc::new(Broker::new()))
    }

    #[tokio::test]
    async fn poll_returns_delivery_with_ack() {
        let client = client();
        client.declare("q").await.expect("declare");
        client
            .push("q", Message::data(b"payload".as_slice()))
            .await
            .expect("push");
        let delivery = client.poll("q").await.expect("poll").expect("delivery");
        assert_eq!(delivery.message.body, Bytes::from_static(b"payload"));
        delivery.ack().await.expect("ack");
        assert!(client.poll("q").await.expect("poll").is_none());
    }

    #[tokio::test]
    async fn nack_makes_delivery_visible_again() {
        let client = client();
        client.declare("q").await.expect("declare");
        client
            .push("q", Message::data(b"payload".as_slice()))
            .await
            .expect("push");
        let delivery = client.poll("q").await.expect("poll").expect("delivery");
        delivery.nack().await.expect("nack");
        assert!(client.poll("q").await.expect("poll").is_some());
    }

    #[tokio::test]
    async fn random_queue_names_do_not_collide() {
        let client = client();
        assert_ne!(client.random_queue(), client.random_queue());
    }
}
