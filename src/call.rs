//! One RPC invocation and the stream handles a handler works with.
//!
//! A [`Call`] is what a transport hands to the [`Dispatcher`](crate::Dispatcher):
//! the method name, the receiving end of the inbound event channel, a
//! [`ReplySink`] for everything going back, and a [`CancelToken`] shared with
//! the transport. The dispatcher turns those into a [`RequestStream`] and a
//! [`ResponseSink`] and tracks the call's [`Lifecycle`].

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use may::sync::mpsc::{self, Receiver, Sender};

use crate::{Code, Message, Status};

/// Inbound event of a call, in arrival order.
#[derive(Debug)]
pub enum CallEvent {
    /// a request message
    Message(Message),
    /// the client half-closed its direction
    End,
    /// the call was cancelled
    Cancel,
    /// the transport failed to deliver the next event
    Abort(Status),
}

/// Outbound item of a call.
///
/// A `Status` is always the last reply: it ends the response stream and
/// carries the terminal status.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// a response message
    Message(Message),
    /// end of the response stream plus terminal status
    Status(Status),
}

/// Destination of a call's replies.
pub trait ReplySink: Send {
    /// push one reply towards the client
    fn deliver(&mut self, reply: Reply) -> io::Result<()>;
}

impl ReplySink for Sender<Reply> {
    fn deliver(&mut self, reply: Reply) -> io::Result<()> {
        self.send(reply)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "reply receiver dropped"))
    }
}

/// Shared cancellation flag of a call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// create a token that is not cancelled
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// mark the call cancelled
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// true once `cancel` has been called
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// An opened call, as handed over by a transport.
pub struct Call {
    id: u64,
    method: String,
    inbound: Receiver<CallEvent>,
    sink: Box<dyn ReplySink>,
    cancel: CancelToken,
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Call {
    /// create a new call
    pub fn new(
        id: u64,
        method: String,
        inbound: Receiver<CallEvent>,
        sink: Box<dyn ReplySink>,
        cancel: CancelToken,
    ) -> Self {
        Call {
            id,
            method,
            inbound,
            sink,
            cancel,
        }
    }

    /// the call id, unique per connection
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// the requested method name
    #[inline]
    pub fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn into_parts(self) -> (u64, String, RequestStream, ResponseSink) {
        let input = RequestStream::new(self.inbound, self.cancel.clone());
        let output = ResponseSink::new(self.sink, self.cancel);
        (self.id, self.method, input, output)
    }
}

/// The inbound half of a call.
///
/// Also an iterator of request messages that stops after end-of-stream or
/// the first error.
pub struct RequestStream {
    rx: Receiver<CallEvent>,
    cancel: CancelToken,
    ended: bool,
    failed: bool,
    received: usize,
}

impl RequestStream {
    fn new(rx: Receiver<CallEvent>, cancel: CancelToken) -> Self {
        RequestStream {
            rx,
            cancel,
            ended: false,
            failed: false,
            received: 0,
        }
    }

    /// Wait for the next request message.
    ///
    /// Returns `Ok(None)` once the client half-closed. Nothing is read after
    /// the call is cancelled.
    pub fn recv(&mut self) -> Result<Option<Message>, Status> {
        if self.cancel.is_cancelled() {
            self.failed = true;
            return Err(Status::cancelled("call cancelled"));
        }
        if self.ended {
            return Ok(None);
        }

        let event = self.rx.recv();
        // a cancel may have raced with the message we just got
        if self.cancel.is_cancelled() {
            self.failed = true;
            return Err(Status::cancelled("call cancelled"));
        }
        match event {
            Ok(CallEvent::Message(msg)) => {
                self.received += 1;
                Ok(Some(msg))
            }
            Ok(CallEvent::End) => {
                self.ended = true;
                debug!("request stream half-closed after {} messages", self.received);
                Ok(None)
            }
            Ok(CallEvent::Cancel) => {
                self.cancel.cancel();
                self.failed = true;
                Err(Status::cancelled("call cancelled"))
            }
            Ok(CallEvent::Abort(status)) => {
                self.failed = true;
                Err(status)
            }
            Err(_) => {
                // every sender is gone, the transport dropped the call
                self.cancel.cancel();
                self.failed = true;
                Err(Status::cancelled("transport closed"))
            }
        }
    }

    /// true once the client's end-of-stream has been observed
    #[inline]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// number of messages received so far
    #[inline]
    pub fn received(&self) -> usize {
        self.received
    }

    /// true once the call has been cancelled
    #[inline]
    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Iterator for RequestStream {
    type Item = Result<Message, Status>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.recv() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => None,
            Err(status) => Some(Err(status)),
        }
    }
}

/// The outbound half of a call.
pub struct ResponseSink {
    sink: Box<dyn ReplySink>,
    cancel: CancelToken,
    ended: bool,
    sent: usize,
}

impl ResponseSink {
    fn new(sink: Box<dyn ReplySink>, cancel: CancelToken) -> Self {
        ResponseSink {
            sink,
            cancel,
            ended: false,
            sent: 0,
        }
    }

    /// Write one response message.
    ///
    /// Refused once the call is cancelled or the stream has ended.
    pub fn send(&mut self, msg: Message) -> Result<(), Status> {
        if self.cancel.is_cancelled() {
            return Err(Status::cancelled("call cancelled"));
        }
        if self.ended {
            return Err(Status::internal("write after end of response stream"));
        }
        if let Err(e) = self.sink.deliver(Reply::Message(msg)) {
            error!("deliver response failed, err={}", e);
            self.cancel.cancel();
            return Err(Status::cancelled("transport closed"));
        }
        self.sent += 1;
        Ok(())
    }

    /// number of messages written so far
    #[inline]
    pub fn sent(&self) -> usize {
        self.sent
    }

    /// true once the stream has been ended
    #[inline]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub(crate) fn end(&mut self) {
        self.ended = true;
    }

    /// deliver the terminal status, consuming the sink
    pub(crate) fn finish(mut self, status: Status) -> io::Result<()> {
        self.ended = true;
        self.sink.deliver(Reply::Status(status))
    }
}

/// Direction of a call's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client to server
    Inbound,
    /// server to client
    Outbound,
}

/// Where a call is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// created, no handler yet
    Open,
    /// handler running
    Active,
    /// one direction has ended
    HalfClosed(Direction),
    /// both directions ended and the status has been handed out
    Closed(Code),
}

/// Enforces the call state machine, including the single terminal transition.
#[derive(Debug)]
pub struct Lifecycle {
    id: u64,
    state: CallState,
}

impl Lifecycle {
    /// start tracking a freshly opened call
    pub fn new(id: u64) -> Self {
        Lifecycle {
            id,
            state: CallState::Open,
        }
    }

    /// current state
    #[inline]
    pub fn state(&self) -> CallState {
        self.state
    }

    /// true once closed
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, CallState::Closed(_))
    }

    fn set(&mut self, next: CallState) {
        debug!("call {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// `Open -> Active`; false from any other state
    pub fn activate(&mut self) -> bool {
        if self.state != CallState::Open {
            return false;
        }
        self.set(CallState::Active);
        true
    }

    /// Record that one direction ended.
    ///
    /// The state stays `HalfClosed` once the second direction ends too; only
    /// `close` leaves it.
    pub fn half_close(&mut self, dir: Direction) -> bool {
        match self.state {
            CallState::Active => {
                self.set(CallState::HalfClosed(dir));
                true
            }
            CallState::HalfClosed(_) => true,
            CallState::Open | CallState::Closed(_) => false,
        }
    }

    /// Terminal transition. Fails with the current state if already closed.
    pub fn close(&mut self, code: Code) -> Result<(), CallState> {
        if self.is_closed() {
            warn!("call {}: second terminal status {:?} dropped", self.id, code);
            return Err(self.state);
        }
        self.set(CallState::Closed(code));
        Ok(())
    }
}

/// The client half of an in-process call.
pub struct LocalPeer {
    tx: Sender<CallEvent>,
    replies: Receiver<Reply>,
    cancel: CancelToken,
}

impl std::fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPeer")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl LocalPeer {
    /// send a request message; false if the call is gone
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(CallEvent::Message(msg)).is_ok()
    }

    /// half-close the request direction
    pub fn close_send(&self) -> bool {
        self.tx.send(CallEvent::End).is_ok()
    }

    /// cancel the call
    pub fn cancel(&self) {
        self.cancel.cancel();
        // wake a handler blocked on the next request
        self.tx.send(CallEvent::Cancel).ok();
    }

    /// wait for the next reply, `None` once the server side is gone
    pub fn recv(&self) -> Option<Reply> {
        self.replies.recv().ok()
    }

    /// wait for the next reply at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Reply> {
        self.replies.recv_timeout(timeout).ok()
    }

    /// Drain replies up to the terminal status.
    ///
    /// Returns the response messages and the status, or `None` for the status
    /// if the server side went away without one.
    pub fn collect(&self) -> (Vec<Message>, Option<Status>) {
        let mut msgs = Vec::new();
        while let Some(reply) = self.recv() {
            match reply {
                Reply::Message(m) => msgs.push(m),
                Reply::Status(s) => return (msgs, Some(s)),
            }
        }
        (msgs, None)
    }
}

/// Build an in-process call: the [`Call`] for the server side and the
/// [`LocalPeer`] that plays the client.
pub fn channel<S: Into<String>>(id: u64, method: S) -> (Call, LocalPeer) {
    let (tx, rx) = mpsc::channel();
    let (reply_tx, reply_rx) = mpsc::channel();
    let cancel = CancelToken::new();
    let call = Call::new(id, method.into(), rx, Box::new(reply_tx), cancel.clone());
    let peer = LocalPeer {
        tx,
        replies: reply_rx,
        cancel,
    };
    (call, peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(i: i64) -> Message {
        Message::new("m", i, false, 0.0)
    }

    #[test]
    fn request_stream_yields_in_order_then_ends() {
        let (call, peer) = channel(1, "m");
        let (_, _, mut input, _output) = call.into_parts();
        for i in 0..3 {
            assert!(peer.send(msg(i)));
        }
        assert!(peer.close_send());

        let got: Vec<_> = input.by_ref().map(|m| m.unwrap().integer).collect();
        assert_eq!(got, vec![0, 1, 2]);
        assert!(input.is_ended());
        assert_eq!(input.received(), 3);
        // stays ended
        assert_eq!(input.recv().unwrap(), None);
    }

    #[test]
    fn request_stream_stops_reading_after_cancel() {
        let (call, peer) = channel(1, "m");
        let (_, _, mut input, _output) = call.into_parts();
        peer.send(msg(1));
        peer.cancel();
        peer.send(msg(2));

        let err = input.recv().unwrap_err();
        assert_eq!(err.code(), Code::Cancelled);
        assert_eq!(input.received(), 0);
        // the iterator is fused after the error
        assert!(input.next().is_none());
    }

    #[test]
    fn request_stream_reports_abort() {
        let (call, peer) = channel(1, "m");
        let (_, _, mut input, _output) = call.into_parts();
        peer.tx
            .send(CallEvent::Abort(Status::internal("bad frame")))
            .unwrap();
        let err = input.recv().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn request_stream_treats_dropped_peer_as_cancel() {
        let (call, peer) = channel(1, "m");
        let (_, _, mut input, output) = call.into_parts();
        drop(peer);
        assert_eq!(input.recv().unwrap_err().code(), Code::Cancelled);
        drop(output);
    }

    #[test]
    fn response_sink_refuses_after_end_and_cancel() {
        let (call, peer) = channel(1, "m");
        let (_, _, _input, mut output) = call.into_parts();
        output.send(msg(1)).unwrap();
        output.end();
        assert_eq!(output.send(msg(2)).unwrap_err().code(), Code::Internal);
        assert_eq!(output.sent(), 1);

        output.finish(Status::ok()).unwrap();
        let (msgs, status) = peer.collect();
        assert_eq!(msgs, vec![msg(1)]);
        assert_eq!(status, Some(Status::ok()));
    }

    #[test]
    fn response_sink_drops_writes_after_cancel() {
        let (call, peer) = channel(1, "m");
        let (_, _, _input, mut output) = call.into_parts();
        peer.cancel();
        assert_eq!(output.send(msg(1)).unwrap_err().code(), Code::Cancelled);
        output.finish(Status::cancelled("call cancelled")).unwrap();
        let (msgs, status) = peer.collect();
        assert!(msgs.is_empty());
        assert_eq!(status.unwrap().code(), Code::Cancelled);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut life = Lifecycle::new(7);
        assert_eq!(life.state(), CallState::Open);
        assert!(!life.half_close(Direction::Inbound));
        assert!(life.activate());
        assert!(!life.activate());
        assert!(life.half_close(Direction::Inbound));
        assert_eq!(life.state(), CallState::HalfClosed(Direction::Inbound));
        assert!(life.half_close(Direction::Outbound));
        assert_eq!(life.state(), CallState::HalfClosed(Direction::Inbound));
        assert!(life.close(Code::Ok).is_ok());
        assert_eq!(life.state(), CallState::Closed(Code::Ok));
        // no way out of closed
        assert_eq!(life.close(Code::Internal), Err(CallState::Closed(Code::Ok)));
        assert!(!life.activate());
        assert!(!life.half_close(Direction::Outbound));
    }

    #[test]
    fn lifecycle_open_can_close_directly() {
        let mut life = Lifecycle::new(1);
        assert!(life.close(Code::Unimplemented).is_ok());
        assert!(life.is_closed());
    }
}
