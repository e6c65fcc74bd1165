// Background pump turning long-polls into a stream of deliveries.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::{Client, Delivery};
use crate::config::ClientTuning;
use crate::{ClientError, Result};

enum PumpEvent {
    Delivery(Delivery),
    Error(ClientError),
}

/// Consumer handle for a subscribed queue.
///
/// Deliveries arrive un-acked; the consumer settles each one. `close()` is
/// cooperative: the pump only checks the flag between long polls, so the
/// in-flight poll is never cancelled and shutdown completes within one
/// poll window.
pub struct Receiver {
    events: mpsc::Receiver<PumpEvent>,
    shutdown: Arc<AtomicBool>,
}

impl Receiver {
    pub(crate) fn spawn(client: Client, queue: String, tuning: ClientTuning) -> Self {
        let (tx, rx) = mpsc::channel(tuning.receive_queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        tokio::spawn(async move {
            loop {
                if flag.load(Ordering::Relaxed) {
                    break;
                }
                match client.long_poll(&queue, tuning.poll_window).await {
                    Ok(None) => continue,
                    Ok(Some(delivery)) => {
                        // A close request that landed during the poll wins:
                        // put the delivery back instead of forwarding it.
                        if flag.load(Ordering::Relaxed) {
                            let _ = delivery.nack().await;
                            break;
                        }
                        if let Err(send_err) = tx.send(PumpEvent::Delivery(delivery)).await {
                            if let PumpEvent::Delivery(delivery) = send_err.0 {
                                let _ = delivery.nack().await;
                            }
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(PumpEvent::Error(err)).await;
                        break;
                    }
                }
            }
            debug!(queue = %queue, "receiver pump stopped");
        });

        Self {
            events: rx,
            shutdown,
        }
    }

    /// Next delivery. `Ok(None)` once the pump has shut down; a transport
    /// failure is yielded once, after which the stream ends.
    pub async fn recv(&mut self) -> Result<Option<Delivery>> {
        match self.events.recv().await {
            None => Ok(None),
            Some(PumpEvent::Delivery(delivery)) => Ok(Some(delivery)),
            Some(PumpEvent::Error(err)) => Err(err),
        }
    }

    /// Request shutdown. Takes effect at the next poll-window boundary.
    pub fn close(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        // Bound the pump's lifetime to one window past the handle's.
        self.close();
    }
}
