use serde::{Deserialize, Serialize};

use crate::Status;

/// The record carried by every request and response of the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// free form text
    pub text: String,
    /// integer payload
    pub integer: i64,
    /// boolean payload
    pub boolean: bool,
    /// floating point payload
    pub floating: f64,
}

impl Message {
    /// create a new message
    pub fn new<S: Into<String>>(text: S, integer: i64, boolean: bool, floating: f64) -> Self {
        Message {
            text: text.into(),
            integer,
            boolean,
            floating,
        }
    }

    /// Derive the response for this request.
    ///
    /// The text is prefixed with `"response "`, the integer is incremented,
    /// the boolean negated and `0.5` added to the float.
    /// Fails with `Internal` if the integer would overflow.
    pub fn respond(&self) -> Result<Message, Status> {
        let integer = self
            .integer
            .checked_add(1)
            .ok_or_else(|| Status::internal("integer field overflow"))?;
        Ok(Message {
            text: format!("response {}", self.text),
            integer,
            boolean: !self.boolean,
            floating: self.floating + 0.5,
        })
    }

    /// Derive the `index`-th message of a response stream for this request.
    pub fn respond_at(&self, index: usize) -> Message {
        Message {
            text: format!("response {}", self.text),
            integer: index as i64,
            boolean: !self.boolean,
            floating: index as f64 + 0.5,
        }
    }
}

/// bincode helpers used at the wire boundary
pub mod codec {
    use std::io::Write;

    use serde::de::DeserializeOwned;
    use serde::Serialize;

    use crate::Error;

    /// serialize the value into the writer
    pub fn encode_into<W: Write, T: Serialize>(w: W, value: &T) -> Result<(), Error> {
        bincode::serialize_into(w, value).map_err(|e| Error::ClientSerialize(e.to_string()))
    }

    /// serialize the value into a fresh buffer
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
        bincode::serialize(value).map_err(|e| Error::ClientSerialize(e.to_string()))
    }

    /// deserialize a value from raw bytes
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
        bincode::deserialize(data).map_err(|e| Error::ClientDeserialize(e.to_string()))
    }
}
