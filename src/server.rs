//! Request broker: an address-routing front end load-balanced across a
//! fixed pool of worker threads.
//!
//! The front end preserves each caller's routing frames alongside its
//! payload; a built-in proxy forwards envelopes untouched to an in-process
//! back end, which hands each one to whichever worker is idle. Workers
//! decode the payload, route it through the shared [`Dispatcher`], and send
//! the re-encoded reply back with the routing frames intact.
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{dispatch::Dispatcher, message::Message};

const DEFAULT_WORKERS: usize = 10;
const RESTART_BACKOFF: Duration = Duration::from_millis(100);
const MAX_RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Distinguishes the worker back ends of multiple brokers in one process.
static NEXT_BACKEND: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport unavailable: {0}")]
    Transport(#[from] zmq::Error),
}

pub struct Broker {
    ctx: zmq::Context,
    address: String,
    workers: usize,
    dispatcher: Arc<Dispatcher>,
}

impl Broker {
    pub fn new(ctx: zmq::Context, address: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            ctx,
            address: address.into(),
            workers: DEFAULT_WORKERS,
            dispatcher,
        }
    }

    /// Overrides the worker count. The precise number is a throughput knob,
    /// not a correctness one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        assert!(workers > 0);
        self.workers = workers;
        self
    }

    /// Binds the front and back ends, starts the workers, and proxies
    /// envelopes between the two until the context is torn down.
    pub fn serve(self) -> Result<(), ServerError> {
        info!("serving requests at {}", self.address);
        let frontend = self.ctx.socket(zmq::ROUTER)?;
        frontend.set_linger(0)?;
        frontend.bind(&self.address)?;

        let backend_endpoint = format!(
            "inproc://courier-backend-{}",
            NEXT_BACKEND.fetch_add(1, Ordering::Relaxed)
        );
        let backend = self.ctx.socket(zmq::DEALER)?;
        backend.set_linger(0)?;
        backend.bind(&backend_endpoint)?;

        for id in 0..self.workers {
            let ctx = self.ctx.clone();
            let endpoint = backend_endpoint.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            thread::spawn(move || supervise(id, &ctx, &endpoint, &dispatcher));
        }

        // Pure forwarding; the back end round-robins envelopes to whichever
        // worker is idle.
        zmq::proxy(&frontend, &backend)?;
        Ok(())
    }
}

/// Restarts a failed worker with exponential backoff instead of letting one
/// bad receive take the broker down.
fn supervise(id: usize, ctx: &zmq::Context, endpoint: &str, dispatcher: &Dispatcher) {
    let mut backoff = RESTART_BACKOFF;
    loop {
        if let Err(e) = work(id, ctx, endpoint, dispatcher) {
            error!("worker {id} failed: {e}; restarting in {backoff:?}");
            thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_RESTART_BACKOFF);
        }
    }
}

fn work(
    id: usize,
    ctx: &zmq::Context,
    endpoint: &str,
    dispatcher: &Dispatcher,
) -> Result<(), ServerError> {
    debug!("starting worker {id}");
    let socket = ctx.socket(zmq::DEALER)?;
    socket.set_linger(0)?;
    socket.connect(endpoint)?;

    loop {
        // Envelope: routing frames added by the front end, payload last.
        let mut frames = socket.recv_multipart(0)?;
        let Some(payload) = frames.pop() else {
            warn!("worker {id} received an empty envelope");
            continue;
        };

        let reply = match dispatcher.dispatch(&payload) {
            Ok(reply) => reply,
            Err(e) => {
                warn!("worker {id} could not decode request: {e}");
                Message::empty().encode()
            }
        };

        frames.push(reply);
        socket.send_multipart(frames, 0)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Pool;
    use crate::message::{EMPTY_ACTION, Value};

    fn spawn_echo_broker(ctx: &zmq::Context, address: &str) {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("echo", |msg| msg);
        let broker = Broker::new(ctx.clone(), address, Arc::new(dispatcher)).with_workers(2);
        thread::spawn(move || broker.serve());
        // Give the front end a moment to bind before callers connect.
        thread::sleep(Duration::from_millis(100));
    }

    #[test]
    fn echo_round_trips_through_the_broker() {
        let ctx = zmq::Context::new();
        spawn_echo_broker(&ctx, "inproc://broker-echo");

        let pool = Pool::new("inproc://broker-echo", ctx);
        let request = Message::with_param("echo", "n", Value::Int32(7));
        let reply = pool
            .send_with_retry(&request.encode(), 20, 500)
            .unwrap()
            .expect("broker never replied");
        assert_eq!(Message::decode(&reply).unwrap(), request);
    }

    #[test]
    fn unregistered_actions_answer_the_empty_message() {
        let ctx = zmq::Context::new();
        spawn_echo_broker(&ctx, "inproc://broker-miss");

        let pool = Pool::new("inproc://broker-miss", ctx);
        let reply = pool
            .send_with_retry(&Message::new("absent").encode(), 20, 500)
            .unwrap()
            .expect("broker never replied");
        let reply = Message::decode(&reply).unwrap();
        assert_eq!(reply.action(), EMPTY_ACTION);
        assert!(reply.params().is_empty());
    }

    #[test]
    fn undecodable_requests_answer_the_empty_message() {
        let ctx = zmq::Context::new();
        spawn_echo_broker(&ctx, "inproc://broker-junk");

        let pool = Pool::new("inproc://broker-junk", ctx);
        let reply = pool
            .send_with_retry(&[0xff, 0xff, 0xff, 0xff], 20, 500)
            .unwrap()
            .expect("broker never replied");
        let reply = Message::decode(&reply).unwrap();
        assert_eq!(reply.action(), EMPTY_ACTION);
    }
}
