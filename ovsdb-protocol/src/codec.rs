//! Encoder and decoder for a stream of JSON-RPC messages.
//!
//! OVSDB sends bare JSON texts back to back with no length prefix, so the
//! decoder finds message boundaries by parsing.

use crate::error::ProtocolError;
use crate::message::Message;
use crate::MAX_MESSAGE_SIZE;
use bytes::{Buf, BytesMut};
use serde_json::Value;

/// Encodes messages for the wire.
pub struct Encoder;

impl Encoder {
    /// Encodes any JSON-serializable message, newline terminated.
    pub fn encode<T: serde::Serialize>(message: &T) -> Result<BytesMut, ProtocolError> {
        let mut bytes = serde_json::to_vec(message)?;
        bytes.push(b'\n');
        Ok(BytesMut::from(&bytes[..]))
    }
}

/// Incremental decoder over bytes read from the socket.
pub struct Decoder {
    buffer: BytesMut,
    max_size: usize,
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_max_size(MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_size,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next JSON value from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A syntax error discards
    /// everything buffered, since the stream cannot be resynchronized.
    pub fn decode_value(&mut self) -> Result<Option<Value>, ProtocolError> {
        let (next, consumed) = {
            let mut stream = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            let next = stream.next();
            (next, stream.byte_offset())
        };

        match next {
            None => {
                // only whitespace left
                self.buffer.clear();
                Ok(None)
            }
            Some(Ok(value)) => {
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buffer.len() > self.max_size {
                    let size = self.buffer.len();
                    self.buffer.clear();
                    return Err(ProtocolError::MessageTooLarge {
                        size,
                        max: self.max_size,
                    });
                }
                Ok(None)
            }
            Some(Err(e)) => {
                self.buffer.clear();
                Err(e.into())
            }
        }
    }

    /// Attempts to decode and classify the next message.
    ///
    /// A well formed JSON text that is not a JSON-RPC envelope is consumed
    /// and reported as an error; the stream stays usable.
    pub fn decode(&mut self) -> Result<Option<Message>, ProtocolError> {
        match self.decode_value()? {
            Some(value) => Message::from_value(value).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
