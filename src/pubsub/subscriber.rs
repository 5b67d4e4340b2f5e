use std::{
    sync::{Arc, mpsc, mpsc::TryRecvError},
    thread,
    time::Duration,
};

use log::{info, warn};

use super::PubSubError;
use crate::{dispatch::Dispatcher, message::Message};

/// How long each readiness poll blocks before the loop services its control
/// queue again.
const POLL_INTERVAL_MS: i64 = 100;

enum Command {
    Connect(String),
    Halt,
}

/// Receive side of the relay. One loop owns the filtered socket; upstream
/// sources are added through the control queue, so callers never touch the
/// socket and never wait on an in-flight receive.
pub struct Subscriber {
    commands: mpsc::Sender<Command>,
    loop_handle: Option<thread::JoinHandle<()>>,
}

impl Subscriber {
    /// Starts a subscriber filtering broadcasts by the `topic` prefix and
    /// routing each received message through `dispatcher`. Handler replies
    /// are discarded; this path is one-way.
    pub fn start(
        ctx: &zmq::Context,
        topic: &str,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, PubSubError> {
        let socket = ctx.socket(zmq::SUB)?;
        socket.set_linger(0)?;
        socket.set_subscribe(topic.as_bytes())?;

        let (commands, inbox) = mpsc::channel();
        let loop_handle = thread::spawn(move || receive_loop(&socket, &inbox, &dispatcher));
        Ok(Self {
            commands,
            loop_handle: Some(loop_handle),
        })
    }

    /// Connects the subscriber to an upstream publisher. Takes effect at
    /// the loop's next control pass.
    pub fn connect(&self, endpoint: &str) -> Result<(), PubSubError> {
        self.commands
            .send(Command::Connect(endpoint.to_string()))
            .map_err(|_| PubSubError::Halted)
    }

    /// Signals the receive loop to close the socket, then waits for it to
    /// exit.
    pub fn close(mut self) {
        let _ = self.commands.send(Command::Halt);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Halt);
    }
}

fn receive_loop(socket: &zmq::Socket, inbox: &mpsc::Receiver<Command>, dispatcher: &Dispatcher) {
    loop {
        loop {
            match inbox.try_recv() {
                Ok(Command::Connect(endpoint)) => match socket.connect(&endpoint) {
                    Ok(()) => info!("subscribed to {endpoint}"),
                    Err(e) => warn!("could not subscribe to {endpoint}: {e}"),
                },
                Ok(Command::Halt) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.poll(zmq::POLLIN, POLL_INTERVAL_MS) {
            Ok(0) => {}
            Ok(_) => match socket.recv_bytes(0) {
                Ok(frame) => match Message::decode(&frame) {
                    Ok(msg) => {
                        dispatcher.dispatch_message(msg);
                    }
                    Err(e) => warn!("dropping undecodable broadcast: {e}"),
                },
                Err(e) => warn!("broadcast receive failed: {e}"),
            },
            Err(e) => {
                warn!("subscriber poll failed: {e}");
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}
