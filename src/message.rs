//! Binary message codec.
//!
//! Messages are a very lightweight binary serialization of an action name
//! plus a typed key/value body:
//!
//! ```text
//! [ action len ][ action name ][  key len  ][  val len  ][  key  ][  val  ]   repeat key/val
//!    (4 bytes)        ?           (4 bytes)    (4 bytes)     ?        ?
//! ```
//!
//! All length fields are little-endian `u32`. Each value begins with a one
//! byte tag marking its type, counted by `val len`:
//!
//! - `1`: 32-bit integer, little-endian
//! - `2`: UTF-8 string
//! - `3`: single byte
//! - `4`: byte sequence
//! - `5`: 64-bit integer, little-endian
//!
//! The action doubles as a routing key: request/reply calls use it to select
//! a handler, and on the broadcast path it is the topic of the message.
//!
//! Decoding never trusts a length prefix. A frame whose prefixes would read
//! past the end of the buffer is rejected with
//! [`MessageError::MalformedFrame`], and a tag byte outside the table above
//! fails the decode with [`MessageError::UnknownValueTag`] rather than
//! silently dropping the pair.
//!
//! Frames carry no format-version marker; future additions extend the tag
//! space rather than the frame structure.
use std::collections::HashMap;

use thiserror::Error;

/// Action of the canonical reply sent when a request matched no handler.
pub const EMPTY_ACTION: &str = "empty";

const TAG_INT32: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_BYTE: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_INT64: u8 = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("malformed frame: field at offset {offset} overruns the buffer")]
    MalformedFrame { offset: usize },
    #[error("unknown value tag {tag} for key '{key}'")]
    UnknownValueTag { key: String, tag: u8 },
}

/// A parameter value. These five variants are the only payload types the
/// wire format can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int32(i32),
    Text(String),
    Byte(u8),
    Bytes(Vec<u8>),
    Int64(i64),
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Value::Byte(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

/// A routed key/value message. Keys are unique; insertion order carries no
/// meaning on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    action: String,
    params: HashMap<String, Value>,
}

impl Message {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: HashMap::new(),
        }
    }

    /// Shorthand for the common single-parameter message.
    pub fn with_param(
        action: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let mut msg = Self::new(action);
        msg.insert(key, value);
        msg
    }

    /// The canonical reply used when a request matched no handler.
    pub fn empty() -> Self {
        Self::new(EMPTY_ACTION)
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    /// Serializes the message into its wire frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(self.action.len() as u32).to_le_bytes());
        frame.extend_from_slice(self.action.as_bytes());

        for (key, value) in &self.params {
            let mut val = Vec::new();
            match value {
                Value::Int32(v) => {
                    val.push(TAG_INT32);
                    val.extend_from_slice(&v.to_le_bytes());
                }
                Value::Text(v) => {
                    val.push(TAG_TEXT);
                    val.extend_from_slice(v.as_bytes());
                }
                Value::Byte(v) => {
                    val.push(TAG_BYTE);
                    val.push(*v);
                }
                Value::Bytes(v) => {
                    val.push(TAG_BYTES);
                    val.extend_from_slice(v);
                }
                Value::Int64(v) => {
                    val.push(TAG_INT64);
                    val.extend_from_slice(&v.to_le_bytes());
                }
            }
            frame.extend_from_slice(&(key.len() as u32).to_le_bytes());
            frame.extend_from_slice(&(val.len() as u32).to_le_bytes());
            frame.extend_from_slice(key.as_bytes());
            frame.extend_from_slice(&val);
        }

        frame
    }

    /// Parses a wire frame back into a message. Every length prefix is
    /// checked against the remaining buffer before it is followed.
    pub fn decode(frame: &[u8]) -> Result<Self, MessageError> {
        let action_len = read_len(frame, 0)?;
        let action = read_bytes(frame, 4, action_len)?;
        let action = String::from_utf8_lossy(action).into_owned();

        let mut params = HashMap::new();
        let mut offset = 4 + action_len;
        while offset < frame.len() {
            let key_len = read_len(frame, offset)?;
            let val_len = read_len(frame, offset + 4)?;
            let key_off = offset + 8;
            let val_off = key_off
                .checked_add(key_len)
                .ok_or(MessageError::MalformedFrame { offset })?;
            let next = val_off
                .checked_add(val_len)
                .ok_or(MessageError::MalformedFrame { offset })?;

            let key = read_bytes(frame, key_off, key_len)?;
            let val = read_bytes(frame, val_off, val_len)?;
            let key = String::from_utf8_lossy(key).into_owned();
            let value = decode_value(&key, val, val_off)?;
            params.insert(key, value);

            offset = next;
        }

        Ok(Self { action, params })
    }
}

fn read_len(frame: &[u8], offset: usize) -> Result<usize, MessageError> {
    match frame.get(offset..offset + 4) {
        Some(&[a, b, c, d]) => Ok(u32::from_le_bytes([a, b, c, d]) as usize),
        _ => Err(MessageError::MalformedFrame { offset }),
    }
}

fn read_bytes(frame: &[u8], offset: usize, len: usize) -> Result<&[u8], MessageError> {
    let end = offset
        .checked_add(len)
        .ok_or(MessageError::MalformedFrame { offset })?;
    frame
        .get(offset..end)
        .ok_or(MessageError::MalformedFrame { offset })
}

fn decode_value(key: &str, val: &[u8], offset: usize) -> Result<Value, MessageError> {
    let (tag, payload) = match val.split_first() {
        Some((tag, payload)) => (*tag, payload),
        None => return Err(MessageError::MalformedFrame { offset }),
    };

    match tag {
        TAG_INT32 => match payload.try_into() {
            Ok(bytes) => Ok(Value::Int32(i32::from_le_bytes(bytes))),
            Err(_) => Err(MessageError::MalformedFrame { offset }),
        },
        TAG_TEXT => Ok(Value::Text(String::from_utf8_lossy(payload).into_owned())),
        TAG_BYTE => match payload {
            &[byte] => Ok(Value::Byte(byte)),
            _ => Err(MessageError::MalformedFrame { offset }),
        },
        TAG_BYTES => Ok(Value::Bytes(payload.to_vec())),
        TAG_INT64 => match payload.try_into() {
            Ok(bytes) => Ok(Value::Int64(i64::from_le_bytes(bytes))),
            Err(_) => Err(MessageError::MalformedFrame { offset }),
        },
        tag => Err(MessageError::UnknownValueTag {
            key: key.to_string(),
            tag,
        }),
    }
}
