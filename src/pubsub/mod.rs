//! Publish/subscribe relay.
//!
//! The [`Publisher`] owns a broadcast socket behind a hand-off queue: any
//! number of producers enqueue serialized messages, and a single consumer
//! loop performs the sends, so the socket never needs a lock. The
//! [`Subscriber`] owns a topic-filtered receive socket and routes every
//! decoded broadcast through the shared [`Dispatcher`](crate::Dispatcher);
//! this path is one-way, so handler replies are discarded.
//!
//! Each instance owns its queues and loop thread, so a process may run any
//! number of publishers and subscribers side by side.
mod publisher;
mod subscriber;

use thiserror::Error;

pub use publisher::Publisher;
pub use subscriber::Subscriber;

#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("transport unavailable: {0}")]
    Transport(#[from] zmq::Error),
    #[error("relay loop has halted")]
    Halted,
}
