use std::{sync::mpsc, thread};

use log::{info, warn};

use super::PubSubError;
use crate::message::Message;

enum Command {
    Forward(Vec<u8>),
    Halt,
}

/// Broadcast side of the relay. The bound socket has a single owner, the
/// send loop; producers hand frames over through the command queue.
pub struct Publisher {
    commands: mpsc::Sender<Command>,
    loop_handle: Option<thread::JoinHandle<()>>,
}

impl Publisher {
    /// Binds a broadcast socket at `endpoint` and starts the send loop.
    /// Bind failures surface here, before the loop exists.
    pub fn bind(ctx: &zmq::Context, endpoint: &str) -> Result<Self, PubSubError> {
        let socket = ctx.socket(zmq::PUB)?;
        socket.set_linger(0)?;
        socket.bind(endpoint)?;
        info!("publishing at {endpoint}");

        let (commands, inbox) = mpsc::channel();
        let loop_handle = thread::spawn(move || forward_loop(&socket, &inbox));
        Ok(Self {
            commands,
            loop_handle: Some(loop_handle),
        })
    }

    /// Queues `msg` for broadcast. Frames go out in queue order.
    pub fn publish(&self, msg: &Message) -> Result<(), PubSubError> {
        self.commands
            .send(Command::Forward(msg.encode()))
            .map_err(|_| PubSubError::Halted)
    }

    /// Signals the send loop to close the socket, then waits for it to exit.
    pub fn close(mut self) {
        let _ = self.commands.send(Command::Halt);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Halt);
    }
}

fn forward_loop(socket: &zmq::Socket, inbox: &mpsc::Receiver<Command>) {
    loop {
        match inbox.recv() {
            Ok(Command::Forward(frame)) => {
                if let Err(e) = socket.send(frame, 0) {
                    warn!("broadcast failed: {e}");
                }
            }
            // A dropped handle halts the loop just like an explicit close.
            Ok(Command::Halt) | Err(_) => return,
        }
    }
}
