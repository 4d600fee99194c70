use std::io;

use thiserror::Error;

use crate::Status;

/// All errors that can occur outside of a call's own status.
#[derive(Debug, Error)]
pub enum Error {
    /// Any IO error.
    #[error("IO err: {0}")]
    Io(#[from] io::Error),
    /// Error in serializing a message.
    ///
    /// Typically this indicates a faulty implementation of `serde::Serialize`.
    #[error("serializing a message err: {0}")]
    ClientSerialize(String),
    /// Error in deserializing a message.
    ///
    /// Typically this indicates a faulty implementation of `serde::Serialize` or
    /// `serde::Deserialize`, or a peer speaking another protocol.
    #[error("deserializing a message err: {0}")]
    ClientDeserialize(String),
    /// The peer sent something the protocol does not allow.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The server was unable to reply to the rpc client within some time.
    ///
    /// You can set the default timeout value in the client instance
    #[error("The server was unable to reply to the rpc client within some time")]
    Timeout,
    /// The connection went away before the call got its terminal status.
    #[error("connection closed")]
    ConnectionClosed,
    /// The call finished with a non ok status.
    #[error("call failed with status {0}")]
    Status(#[from] Status),
    /// A method name that can't be registered.
    #[error("invalid method name: {0:?}")]
    InvalidMethod(String),
    /// The method name is registered already.
    #[error("method {0:?} is registered more than once")]
    DuplicateMethod(String),
}

impl Error {
    /// the call status if this error is one
    pub fn status(&self) -> Option<&Status> {
        match self {
            Error::Status(s) => Some(s),
            _ => None,
        }
    }
}
