//! Point-to-point client side: per-target connection pools and the retrying
//! request/reply call.
//!
//! A [`Client`] owns one [`Pool`] per distinct target address, created
//! lazily on first use and kept for the lifetime of the client. Each pool
//! reserves and releases request connections, trims idle ones from a
//! maintenance thread, and implements the bounded-retry send underneath
//! [`Client::send`].
mod pool;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

use crate::message::{Message, MessageError};

pub use pool::{Pool, PoolStats};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport unavailable: {0}")]
    Transport(#[from] zmq::Error),
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Request/reply messaging client.
pub struct Client {
    ctx: zmq::Context,
    pools: Mutex<HashMap<String, Arc<Pool>>>,
}

impl Client {
    pub fn new(ctx: zmq::Context) -> Self {
        Self {
            ctx,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// The pool serving `target`, created on first use.
    pub fn pool(&self, target: &str) -> Arc<Pool> {
        let mut pools = self.pools.lock().unwrap();
        Arc::clone(
            pools
                .entry(target.to_string())
                .or_insert_with(|| Pool::new(target, self.ctx.clone())),
        )
    }

    /// Sends `msg` to `target` and decodes the reply. `Ok(None)` is the
    /// no-reply result: the retry budget ran out without the peer answering.
    pub fn send(&self, target: &str, msg: &Message) -> Result<Option<Message>, ClientError> {
        self.send_with_retry(target, msg, pool::DEFAULT_RETRIES, pool::DEFAULT_INTERVAL_MS)
    }

    /// [`send`](Self::send) with an explicit retry budget and poll interval.
    pub fn send_with_retry(
        &self,
        target: &str,
        msg: &Message,
        retries: u32,
        interval_ms: i64,
    ) -> Result<Option<Message>, ClientError> {
        let pool = self.pool(target);
        match pool.send_with_retry(&msg.encode(), retries, interval_ms)? {
            Some(reply) => Ok(Some(Message::decode(&reply)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::message::Value;

    #[test]
    fn send_round_trips_through_an_echo_peer() {
        let ctx = zmq::Context::new();
        let peer = ctx.socket(zmq::REP).unwrap();
        peer.bind("inproc://client-echo").unwrap();
        thread::spawn(move || {
            while let Ok(frame) = peer.recv_bytes(0) {
                if peer.send(frame, 0).is_err() {
                    break;
                }
            }
        });

        let client = Client::new(ctx);
        let msg = Message::with_param("echo", "payload", Value::Text("hi".to_string()));
        let reply = client
            .send_with_retry("inproc://client-echo", &msg, 10, 500)
            .unwrap();
        assert_eq!(reply, Some(msg));
    }

    #[test]
    fn pools_are_shared_per_target() {
        let client = Client::new(zmq::Context::new());
        let first = client.pool("inproc://client-shared");
        let second = client.pool("inproc://client-shared");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
