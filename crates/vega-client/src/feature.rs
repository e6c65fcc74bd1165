// High-level behaviors built on the mailbox verbs: per-instance reply
// queues, request/reply, and server-side handler loops.
use tokio::sync::Mutex;
use tracing::debug;
use vega_wire::{Message, is_ephemeral_name};

use crate::Result;
use crate::client::{Client, Delivery};
use crate::config::ClientTuning;
use crate::receiver::Receiver;

/// Produces the reply for one inbound request message.
///
/// Handlers are expected to be pure functions of the inbound message;
/// panics are not caught by the loop. Closures of the matching shape
/// implement the trait directly.
pub trait Handler: Send + Sync {
    fn handle_message(&self, message: &Message) -> Message;
}

impl<F> Handler for F
where
    F: Fn(&Message) -> Message + Send + Sync,
{
    fn handle_message(&self, message: &Message) -> Message {
        self(message)
    }
}

/// Feature-layer wrapper around a mailbox transport.
///
/// A `FeatureClient` is single-user: one task drives it at a time. For
/// concurrent operations, `clone()` a new handle; clones share the
/// transport but each lazily creates its own reply mailbox.
pub struct FeatureClient {
    pub(crate) client: Client,
    pub(crate) tuning: ClientTuning,
    // Cached ephemeral reply mailbox, created on first use.
    local_queue: Mutex<Option<String>>,
}

impl Clone for FeatureClient {
    // Clones share the transport but get a fresh reply-mailbox slot.
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            tuning: self.tuning.clone(),
            local_queue: Mutex::new(None),
        }
    }
}

impl FeatureClient {
    /// Wrap an existing transport handle with default tuning.
    pub fn new(client: Client) -> Self {
        Self::with_tuning(client, ClientTuning::default())
    }

    pub fn with_tuning(client: Client, tuning: ClientTuning) -> Self {
        Self {
            client,
            tuning,
            local_queue: Mutex::new(None),
        }
    }

    /// Shrink or stretch the long-poll window. Mostly useful in tests and
    /// embedders that want faster shutdown at the cost of more poll churn.
    pub fn with_poll_window(mut self, window: std::time::Duration) -> Self {
        self.tuning.poll_window = window;
        self
    }

    /// Access to the raw transport verbs.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The ephemeral reply mailbox for this instance.
    ///
    /// Created and declared on first call; every later call returns the
    /// cached name. If the declare fails the error surfaces and nothing is
    /// cached: the instance has no reply address, so callers should treat
    /// that as fatal.
    pub async fn local_queue(&self) -> Result<String> {
        let mut slot = self.local_queue.lock().await;
        if let Some(name) = slot.as_ref() {
            return Ok(name.clone());
        }
        let name = self.client.random_queue();
        self.client.ephemeral_declare(&name).await?;
        *slot = Some(name.clone());
        Ok(name)
    }

    /// Declare `name`, routing to the ephemeral path when the name carries
    /// the `#ephemeral` suffix.
    pub async fn declare(&self, name: &str) -> Result<()> {
        if is_ephemeral_name(name) {
            return self.client.ephemeral_declare(name).await;
        }
        self.client.declare(name).await
    }

    /// Push `message` to `name` and wait for the single reply.
    ///
    /// The message's `reply_to` is overwritten with this instance's reply
    /// mailbox. The returned delivery is un-acked; the caller settles it.
    pub async fn request(&self, name: &str, mut message: Message) -> Result<Delivery> {
        let reply_to = self.local_queue().await?;
        message.reply_to = reply_to.clone();
        self.client.push(name, message).await?;

        loop {
            // A window expiry is not a failure; re-arm and keep waiting.
            let Some(delivery) = self
                .client
                .long_poll(&reply_to, self.tuning.poll_window)
                .await?
            else {
                continue;
            };
            return Ok(delivery);
        }
    }

    /// Consume `name`, answering each request with the handler's reply.
    ///
    /// Each delivery is acked before its reply is pushed: receipt is
    /// committed even if the reply push fails, trading possible reply loss
    /// for no redelivery storms. Reply-push failures are counted and
    /// dropped. Returns only when the transport fails.
    pub async fn handle_requests<H: Handler>(&self, name: &str, handler: H) -> Result<()> {
        loop {
            let Some(delivery) = self.client.long_poll(name, self.tuning.poll_window).await? else {
                continue;
            };

            let reply = handler.handle_message(&delivery.message);
            delivery.ack().await?;

            if let Err(err) = self.client.push(&delivery.message.reply_to, reply).await {
                metrics::counter!("vega_client_reply_push_failures_total").increment(1);
                debug!(queue = name, error = %err, "reply push failed; dropping reply");
            }
        }
    }

    /// Spawn a background pump that forwards deliveries from `name`.
    pub fn receive(&self, name: &str) -> Receiver {
        Receiver::spawn(self.client.clone(), name.to_string(), self.tuning.clone())
    }
}
