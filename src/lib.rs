//! Lightweight messaging substrate.
//!
//! Courier combines four pieces behind one compact wire format and one
//! routing table:
//!
//! - [`Message`]: a binary codec for typed key/value payloads addressed by
//!   an action name.
//! - [`Client`] / [`Pool`]: pooled request connections per target with a
//!   reliable, bounded-retry request/reply call.
//! - [`Broker`]: a server front end that load-balances inbound requests
//!   across a supervised pool of worker threads.
//! - [`Publisher`] / [`Subscriber`]: a broadcast relay filtered by topic,
//!   feeding received messages into the same [`Dispatcher`] the broker
//!   uses.
//!
//! The network transport is ZeroMQ, treated as an opaque collaborator: the
//! crate drives request, router, dealer, publish, and subscribe sockets but
//! never re-frames or inspects their wire-level traffic. Components take a
//! shared `zmq::Context` by constructor injection, so several brokers,
//! clients, and relays can coexist in one process.
pub mod client;
pub mod dispatch;
pub mod message;
pub mod pubsub;
pub mod server;

pub use client::{Client, ClientError, Pool, PoolStats};
pub use dispatch::Dispatcher;
pub use message::{Message, MessageError, Value};
pub use pubsub::{PubSubError, Publisher, Subscriber};
pub use server::{Broker, ServerError};
