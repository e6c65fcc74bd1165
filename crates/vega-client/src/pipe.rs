// Byte-stream pipes tunneled over paired ephemeral mailboxes.
//
// A pipe endpoint writes whole frames to its peer's mailbox and reassembles
// a byte stream out of the frames arriving in its own. The rendezvous
// handshake runs over a well-known `pipe:<name>` queue; after setup each
// side owns a private ephemeral inbox and the rendezvous queue is not used
// again.
use bytes::{Buf, Bytes};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use vega_wire::{Message, PIPE_CLOSE, PIPE_INIT_CONNECT, PIPE_SETUP, rendezvous_queue};

use crate::client::Client;
use crate::feature::FeatureClient;
use crate::{ClientError, Result};

impl FeatureClient {
    /// Wait for one inbound pipe connection on `pipe:<name>`.
    ///
    /// Declares the rendezvous queue, waits for an `initconnect`, then
    /// answers with a `setup` carrying this side's fresh ephemeral inbox.
    /// A wrongly-typed rendezvous message fails with the protocol error and
    /// no endpoint is created.
    pub async fn listen_pipe(&self, name: &str) -> Result<Pipe> {
        let rendezvous = rendezvous_queue(name);
        self.declare(&rendezvous).await?;

        loop {
            let Some(delivery) = self
                .client
                .long_poll(&rendezvous, self.tuning.poll_window)
                .await?
            else {
                continue;
            };
            delivery.ack().await?;

            if delivery.message.kind != PIPE_INIT_CONNECT {
                return Err(ClientError::Protocol);
            }

            let own = self.client.random_queue();
            self.client.ephemeral_declare(&own).await?;

            let setup = Message::control(PIPE_SETUP).with_reply_to(&own);
            if let Err(err) = self.client.push(&delivery.message.reply_to, setup).await {
                let _ = self.client.abandon(&own).await;
                return Err(err);
            }

            debug!(own = %own, pair = %delivery.message.reply_to, "pipe accepted");
            return Ok(Pipe::new(
                self.client.clone(),
                own,
                delivery.message.reply_to.clone(),
                self.tuning.poll_window,
            ));
        }
    }

    /// Open a pipe to the listener on `pipe:<name>`.
    ///
    /// The private inbox is declared and polled only after it exists, so the
    /// listener's `setup` can never race past the connector.
    pub async fn connect_pipe(&self, name: &str) -> Result<Pipe> {
        let own = self.client.random_queue();
        self.client.ephemeral_declare(&own).await?;

        let init = Message::control(PIPE_INIT_CONNECT).with_reply_to(&own);
        if let Err(err) = self.client.push(&rendezvous_queue(name), init).await {
            let _ = self.client.abandon(&own).await;
            return Err(err);
        }

        loop {
            let Some(delivery) = self.client.long_poll(&own, self.tuning.poll_window).await?
            else {
                continue;
            };
            delivery.ack().await?;

            if delivery.message.kind != PIPE_SETUP {
                let _ = self.client.abandon(&own).await;
                return Err(ClientError::Protocol);
            }

            debug!(own = %own, pair = %delivery.message.reply_to, "pipe connected");
            return Ok(Pipe::new(
                self.client.clone(),
                own,
                delivery.message.reply_to.clone(),
                self.tuning.poll_window,
            ));
        }
    }
}

/// Opaque pipe endpoint address, `vega:<mailbox>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeAddr {
    queue: String,
}

impl PipeAddr {
    pub fn network(&self) -> &'static str {
        "vega"
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

impl fmt::Display for PipeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vega:{}", self.queue)
    }
}

/// One side of a bidirectional byte stream carried over two mailboxes.
///
/// One `write` produces one frame on the peer's mailbox; `read` reassembles
/// the stream, holding frame bytes that did not fit a short destination in
/// an internal residual buffer. `Ok(0)` from `read` is end-of-stream.
///
/// The endpoint is not internally synchronized: `&mut self` on `read`,
/// `write`, and `close` makes the caller serialize them.
#[derive(Debug)]
pub struct Pipe {
    client: Client,
    // Peer's mailbox, where this side writes.
    pair_queue: String,
    // This side's mailbox, where it reads.
    own_queue: String,
    poll_window: Duration,
    // Remote sent pipe/close, or a read observed end-of-stream.
    closed: bool,
    // Local close already ran; guards the close notification.
    abandoned: bool,
    // Residual bytes from the last frame that outgrew its read.
    buffer: Bytes,
}

impl Pipe {
    pub(crate) fn new(
        client: Client,
        own_queue: String,
        pair_queue: String,
        poll_window: Duration,
    ) -> Self {
        Self {
            client,
            pair_queue,
            own_queue,
            poll_window,
            closed: false,
            abandoned: false,
            buffer: Bytes::new(),
        }
    }

    /// Read into `buf`, returning the number of bytes copied. `Ok(0)` means
    /// the remote closed the stream (or `buf` is empty).
    ///
    /// Residual bytes from an earlier frame are drained first. When they
    /// run out mid-read, one non-blocking poll opportunistically tops the
    /// read up from the next queued frame; a `pipe/close` observed during
    /// that top-up is latched but the bytes already assembled are still
    /// returned, so a partial read never doubles as end-of-stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Ok(0);
        }

        if !self.buffer.is_empty() {
            let want = buf.len();
            let have = self.buffer.len();

            if want < have {
                buf.copy_from_slice(&self.buffer[..want]);
                self.buffer.advance(want);
                return Ok(want);
            }

            buf[..have].copy_from_slice(&self.buffer);
            self.buffer = Bytes::new();

            if want > have {
                let delivery = match self.client.poll(&self.own_queue).await {
                    Ok(Some(delivery)) => delivery,
                    // Nothing queued (or the poll failed): hand back what
                    // the residue already produced.
                    Ok(None) | Err(_) => return Ok(have),
                };
                if delivery.ack().await.is_err() {
                    return Ok(have);
                }
                if delivery.message.kind == PIPE_CLOSE {
                    self.closed = true;
                    return Ok(have);
                }

                let body = delivery.message.body;
                let rest = &mut buf[have..];
                if rest.len() < body.len() {
                    let taken = rest.len();
                    rest.copy_from_slice(&body[..taken]);
                    self.buffer = body.slice(taken..);
                    return Ok(have + taken);
                }
                rest[..body.len()].copy_from_slice(&body);
                return Ok(have + body.len());
            }

            return Ok(have);
        }

        loop {
            let Some(delivery) = self
                .client
                .long_poll(&self.own_queue, self.poll_window)
                .await?
            else {
                continue;
            };
            delivery.ack().await?;

            if delivery.message.kind == PIPE_CLOSE {
                self.closed = true;
                return Ok(0);
            }

            let body = delivery.message.body;
            if buf.len() < body.len() {
                let taken = buf.len();
                buf.copy_from_slice(&body[..taken]);
                self.buffer = body.slice(taken..);
                return Ok(taken);
            }
            buf[..body.len()].copy_from_slice(&body);
            return Ok(body.len());
        }
    }

    /// Send `buf` as a single frame. Returns `buf.len()` on success; a push
    /// failure reports nothing written.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(ClientError::PipeClosed);
        }
        self.client
            .push(&self.pair_queue, Message::data(Bytes::copy_from_slice(buf)))
            .await?;
        Ok(buf.len())
    }

    /// Tear down this side: release the inbox and notify the peer once.
    ///
    /// Idempotent; only the first call abandons the inbox and pushes the
    /// close notification. Reads after a local close are not supported.
    pub async fn close(&mut self) -> Result<()> {
        if self.abandoned {
            return Ok(());
        }
        self.abandoned = true;

        if let Err(err) = self.client.abandon(&self.own_queue).await {
            debug!(queue = %self.own_queue, error = %err, "abandon on close failed");
        }
        self.client
            .push(&self.pair_queue, Message::control(PIPE_CLOSE))
            .await
    }

    pub fn local_addr(&self) -> PipeAddr {
        PipeAddr {
            queue: self.own_queue.clone(),
        }
    }

    pub fn remote_addr(&self) -> PipeAddr {
        PipeAddr {
            queue: self.pair_queue.clone(),
        }
    }

    /// Accepted for interface parity; deadlines are not enforced.
    pub fn set_deadline(&mut self, _deadline: std::time::Instant) {}

    /// Accepted for interface parity; deadlines are not enforced.
    pub fn set_read_deadline(&mut self, _deadline: std::time::Instant) {}

    /// Accepted for interface parity; deadlines are not enforced.
    pub fn set_write_deadline(&mut self, _deadline: std::time::Instant) {}
}
