// Client-side feature layer over the mailbox transport: ephemeral reply
// queues, request/reply, handler loops, receivers, and byte-stream pipes.
pub mod client;
pub mod config;
pub mod feature;
pub mod pipe;
pub mod receiver;


pub use client::{Client, Delivery};
pub use config::ClientTuning;
pub use feature::{FeatureClient, Handler};
pub use pipe::{Pipe, PipeAddr};
pub use receiver::Receiver;

use vega_broker::BrokerError;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// A handshake peer sent a message with an unexpected type tag.
    #[error("protocol error")]
    Protocol,
    /// Write attempted on a pipe whose remote end has closed.
    #[error("pipe closed")]
    PipeClosed,
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
