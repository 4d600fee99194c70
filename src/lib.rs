//! may_stream_rpc is a minimal streaming RPC framework for rust, based on coroutines.
//!
//! A service is a table of method names, each bound to a handler of one of
//! four interaction shapes:
//!
//! * unary: one request, one response
//! * server streaming: one request, a stream of responses
//! * client streaming: a stream of requests, one response
//! * bidirectional: a stream each way, interleaved as the handler likes
//!
//! Every call ends with exactly one [`Status`]. The [`Dispatcher`] routes a
//! [`Call`] to its handler, enforces the shape's cardinality, turns handler
//! panics into `Internal` and honors cancellation from the caller.
//!
//! Example usage:
//!
//! ```rust,no_run
//! use may_stream_rpc::service::{demo_table, SIMPLE_RPC};
//! use may_stream_rpc::{Dispatcher, Message, RpcClient, TcpServer};
//!
//! let server = Dispatcher::new(demo_table().unwrap()).start("127.0.0.1:0").unwrap();
//! let addr = server.local_addr().unwrap();
//!
//! let stream = may::net::TcpStream::connect(addr).unwrap();
//! let client = RpcClient::new(stream).unwrap();
//! let rsp = client.unary(SIMPLE_RPC, &Message::new("hi", 1, true, 1.0)).unwrap();
//! assert_eq!(rsp.text, "response hi");
//! ```
//!
//! Calls can also be driven in process, without any socket, through
//! [`call::channel`].

#![deny(missing_docs)]

#[macro_use]
extern crate log;

pub extern crate bincode;
#[doc(hidden)]
pub extern crate may;
pub extern crate serde;

/// One call and its stream handles
pub mod call;
/// Runtime knobs
mod config;
/// Routes calls to their handlers
mod dispatcher;
/// Provides a few different error types
mod errors;
mod handler;
mod message;
/// The demo service
pub mod service;
mod status;
/// Multiplexed transport
pub mod transport;

pub use call::{
    Call, CallEvent, CallState, CancelToken, Direction, Lifecycle, LocalPeer, Reply, ReplySink,
    RequestStream, ResponseSink,
};
pub use config::{Config, DEFAULT_CALL_STACK_SIZE, DEFAULT_MAX_FRAME_LEN};
pub use dispatcher::{Dispatcher, Server};
pub use errors::Error;
pub use handler::{
    BidiHandler, ClientStreamingHandler, Handler, ResponseIter, ServerStreamingHandler,
    ServiceTable, Shape, UnaryHandler,
};
pub use message::{codec, Message};
pub use status::{Code, Status};
pub use transport::{ClientCall, RpcClient, ServerInstance, StreamExt, TcpServer};

#[cfg(unix)]
pub use transport::UdsServer;
