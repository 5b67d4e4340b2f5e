use std::collections::HashMap;

use log::warn;

use crate::message::{Message, MessageError};

/// A registered action handler: takes the decoded request, returns the reply.
pub type Handler = Box<dyn Fn(Message) -> Message + Send + Sync>;

/// Routing table from action names to handlers, shared by the request/reply
/// and subscription paths.
///
/// Registration happens while the dispatcher is still exclusively owned; the
/// serving components then share it behind an `Arc`, so lookups run without
/// locking. Registering after serving has started is unsupported.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Message + Send + Sync + 'static,
    {
        self.handlers.insert(action.into(), Box::new(handler));
    }

    /// Decodes a request frame, routes it, and encodes the reply. Decode
    /// failures are returned to the caller, which owns the reply policy.
    pub fn dispatch(&self, frame: &[u8]) -> Result<Vec<u8>, MessageError> {
        let msg = Message::decode(frame)?;
        Ok(self.dispatch_message(msg).encode())
    }

    /// Routes a decoded message. A request with no registered handler is
    /// answered with the canonical empty message so the caller always gets a
    /// well-formed reply.
    pub fn dispatch_message(&self, msg: Message) -> Message {
        match self.handlers.get(msg.action()) {
            Some(handler) => handler(msg),
            None => {
                warn!("no handler registered for action '{}'", msg.action());
                Message::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{EMPTY_ACTION, Value};

    fn echo_dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("echo", |msg| msg);
        dispatcher
    }

    #[test]
    fn routes_to_the_registered_handler() {
        let request = Message::with_param("echo", "n", Value::Int32(7));
        let reply = echo_dispatcher().dispatch(&request.encode()).unwrap();
        assert_eq!(Message::decode(&reply).unwrap(), request);
    }

    #[test]
    fn handlers_can_rewrite_the_reply() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("greet", |msg| {
            let name = match msg.param("name") {
                Some(Value::Text(name)) => name.clone(),
                _ => "stranger".to_string(),
            };
            Message::with_param("greeting", "text", format!("hello, {name}"))
        });

        let request = Message::with_param("greet", "name", "ada");
        let reply = dispatcher.dispatch(&request.encode()).unwrap();
        let reply = Message::decode(&reply).unwrap();
        assert_eq!(reply.action(), "greeting");
        assert_eq!(
            reply.param("text"),
            Some(&Value::Text("hello, ada".to_string()))
        );
    }

    #[test]
    fn missing_handler_answers_the_empty_message() {
        let reply = echo_dispatcher()
            .dispatch(&Message::new("absent").encode())
            .unwrap();
        let reply = Message::decode(&reply).unwrap();
        assert_eq!(reply.action(), EMPTY_ACTION);
        assert!(reply.params().is_empty());
    }

    #[test]
    fn malformed_frames_propagate_to_the_caller() {
        assert!(
            echo_dispatcher()
                .dispatch(&[0xff, 0xff, 0xff, 0xff])
                .is_err()
        );
    }
}
