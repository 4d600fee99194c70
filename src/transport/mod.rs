//! Multiplexed transport over a byte stream.
//!
//! Every call on a connection has its own id, so any number of calls of any
//! shape can run concurrently over one tcp or unix socket:
//!
//! 1. client sends an open frame with the method name
//! 2. client sends message frames, then a half close frame
//! 3. server sends message frames back as the handler produces them
//! 4. server ends the call with exactly one status frame
//!
//! a cancel frame from the client can arrive at any point before 4.
//!
pub use client::{ClientCall, RpcClient};
pub use frame::{Frame, FrameKind};
pub use server::{ServerInstance, TcpServer};
pub use stream_ext::StreamExt;

#[cfg(unix)]
pub use server::UdsServer;

mod client;
/// raw frame protocol
mod frame;
/// Provides server framework
mod server;
mod stream_ext;
mod writer;
