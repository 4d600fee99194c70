use std::collections::HashMap;
use std::fmt;
use std::io::{self, BufReader};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use may::io::SplitWriter;
use may::sync::mpsc::{self, Receiver, Sender};
use may::sync::Mutex;
use may::{coroutine, go};

use super::frame::{Frame, FrameKind};
use super::stream_ext::StreamExt;
use super::writer::FrameWriter;
use crate::call::Reply;
use crate::{Config, Error, Message, Status};

type Routes = Arc<Mutex<HashMap<u64, Sender<Reply>>>>;

/// Client side of a multiplexed connection.
///
/// Every call gets its own id; replies are routed to the call by a listening
/// coroutine, so any number of calls can run over the one stream.
pub struct RpcClient<S: StreamExt> {
    // no timeout by default
    timeout: Option<Duration>,
    next_id: AtomicU64,
    // the write half of the connection
    sock: Arc<FrameWriter<SplitWriter<S>>>,
    routes: Routes,
    // set once the listener stopped reading
    closed: Arc<AtomicBool>,
    // the listening coroutine
    listener: Option<coroutine::JoinHandle<()>>,
}

impl<S: StreamExt> fmt::Debug for RpcClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("timeout", &self.timeout)
            .field("next_id", &self.next_id)
            .field("listener", &self.listener)
            .finish()
    }
}

impl<S: StreamExt> Drop for RpcClient<S> {
    fn drop(&mut self) {
        if let Some(h) = self.listener.take() {
            unsafe { h.coroutine().cancel() };
            h.join().ok();
        }
        self.closed.store(true, Ordering::Release);
        // nothing routes replies any more, calls still around see the
        // connection closed
        self.routes.lock().unwrap().clear();
    }
}

impl<S: StreamExt> RpcClient<S> {
    /// run the client over a connected stream
    pub fn new(stream: S) -> io::Result<Self> {
        RpcClient::with_config(stream, &Config::default())
    }

    /// run the client over a connected stream with the given config
    pub fn with_config(stream: S, config: &Config) -> io::Result<Self> {
        let peer = stream.peer();
        // here we must split the socket for read
        // we can't share it between coroutines
        let (reader, writer) = stream.split()?;
        let mut r_stream = BufReader::new(reader);
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let max_len = config.max_frame_len;
        let listen_routes = routes.clone();
        let closed = Arc::new(AtomicBool::new(false));
        let listen_closed = closed.clone();
        let listener = go!(
            coroutine::Builder::new().name("RpcClientListener".to_owned()),
            move || {
                let mut buf = BytesMut::with_capacity(1024 * 32);
                loop {
                    let frame = match Frame::decode_from(&mut r_stream, &mut buf, max_len) {
                        Ok(r) => r,
                        Err(ref e) => {
                            if e.kind() == io::ErrorKind::UnexpectedEof {
                                info!("client decode frame: connection closed, peer={}", peer);
                            } else {
                                error!("client decode frame: err = {:?}", e);
                            }
                            break;
                        }
                    };
                    route(&listen_routes, frame);
                }
                // pending calls see the connection closed
                listen_closed.store(true, Ordering::Release);
                listen_routes.lock().unwrap().clear();
            }
        )?;

        Ok(RpcClient {
            timeout: config.timeout,
            next_id: AtomicU64::new(0),
            sock: Arc::new(FrameWriter::new(writer)),
            routes,
            closed,
            listener: Some(listener),
        })
    }

    /// set the default timeout value
    /// there is no timeout initially
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// Open a call to `method`.
    ///
    /// Requests are sent with [`ClientCall::send`]; the call is half-closed
    /// with [`ClientCall::close_send`].
    pub fn open(&self, method: &str) -> Result<ClientCall<S>, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        // the route must be there before the server can answer
        self.routes.lock().unwrap().insert(id, tx);
        // the listener clears routes only once, after setting the flag
        if self.closed.load(Ordering::Acquire) {
            self.routes.lock().unwrap().remove(&id);
            return Err(Error::ConnectionClosed);
        }
        info!("open call: id={} method={}", id, method);
        if let Err(e) = self.sock.send(&Frame::open(id, method)) {
            self.routes.lock().unwrap().remove(&id);
            return Err(e.into());
        }
        Ok(ClientCall {
            id,
            sock: self.sock.clone(),
            routes: self.routes.clone(),
            replies: rx,
            timeout: self.timeout,
            send_closed: false,
            cancelled: false,
            status: None,
            done: false,
        })
    }

    /// one request, one response
    pub fn unary(&self, method: &str, request: &Message) -> Result<Message, Error> {
        let mut call = self.open(method)?;
        call.send(request)?;
        call.close_send()?;
        let response = call
            .recv()?
            .ok_or_else(|| Error::Protocol("unary call ended without a response".to_owned()))?;
        match call.recv()? {
            None => Ok(response),
            Some(_) => Err(Error::Protocol(
                "unary call got more than one response".to_owned(),
            )),
        }
    }

    /// one request, all responses of the stream
    pub fn server_streaming(&self, method: &str, request: &Message) -> Result<Vec<Message>, Error> {
        let mut call = self.open(method)?;
        call.send(request)?;
        call.close_send()?;
        call.collect()
    }

    /// a stream of requests, one response
    pub fn client_streaming<I>(&self, method: &str, requests: I) -> Result<Message, Error>
    where
        I: IntoIterator<Item = Message>,
    {
        let mut call = self.open(method)?;
        for request in requests {
            call.send(&request)?;
        }
        call.close_send()?;
        let response = call.recv()?.ok_or_else(|| {
            Error::Protocol("client streaming call ended without a response".to_owned())
        })?;
        match call.recv()? {
            None => Ok(response),
            Some(_) => Err(Error::Protocol(
                "client streaming call got more than one response".to_owned(),
            )),
        }
    }
}

fn route(routes: &Routes, frame: Frame) {
    let reply = match frame.kind {
        FrameKind::Message => match frame.decode_message() {
            Ok(msg) => Reply::Message(msg),
            Err(e) => {
                error!("call {}: bad response message, err={}", frame.id, e);
                Reply::Status(Status::internal(format!("failed to decode response: {e}")))
            }
        },
        FrameKind::Status => match frame.decode_status() {
            Ok(status) => Reply::Status(status),
            Err(e) => {
                error!("call {}: bad status, err={}", frame.id, e);
                Reply::Status(Status::internal(format!("failed to decode status: {e}")))
            }
        },
        kind => {
            warn!("server sent a {:?} frame for call {}, dropped", kind, frame.id);
            return;
        }
    };

    let mut routes = routes.lock().unwrap();
    match routes.get(&frame.id) {
        Some(tx) => {
            tx.send(reply).ok();
        }
        None => debug!("reply for unknown or finished call {}, dropped", frame.id),
    }
    if frame.kind == FrameKind::Status {
        routes.remove(&frame.id);
    }
}

/// One call opened by an [`RpcClient`].
///
/// Dropping a call that has not seen its terminal status cancels it.
pub struct ClientCall<S: StreamExt> {
    id: u64,
    sock: Arc<FrameWriter<SplitWriter<S>>>,
    routes: Routes,
    replies: Receiver<Reply>,
    timeout: Option<Duration>,
    send_closed: bool,
    cancelled: bool,
    status: Option<Status>,
    done: bool,
}

impl<S: StreamExt> fmt::Debug for ClientCall<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCall")
            .field("id", &self.id)
            .field("send_closed", &self.send_closed)
            .field("cancelled", &self.cancelled)
            .field("status", &self.status)
            .finish()
    }
}

impl<S: StreamExt> ClientCall<S> {
    /// the call id on this connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// the terminal status, once received
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// send one request
    pub fn send(&mut self, msg: &Message) -> Result<(), Error> {
        if self.send_closed || self.cancelled {
            return Err(Error::Protocol(format!(
                "call {} can't send after close or cancel",
                self.id
            )));
        }
        let frame = Frame::message(self.id, msg)?;
        self.sock.send(&frame)?;
        Ok(())
    }

    /// half-close: no more requests will follow
    pub fn close_send(&mut self) -> Result<(), Error> {
        if self.send_closed {
            return Ok(());
        }
        self.send_closed = true;
        self.sock.send(&Frame::half_close(self.id))?;
        Ok(())
    }

    /// Cancel the call.
    ///
    /// The server answers with a `Cancelled` status, which `recv` returns.
    pub fn cancel(&mut self) -> Result<(), Error> {
        if self.cancelled || self.status.is_some() {
            return Ok(());
        }
        self.cancelled = true;
        info!("cancel call: id={}", self.id);
        self.sock.send(&Frame::cancel(self.id))?;
        Ok(())
    }

    /// Wait for the next response.
    ///
    /// `Ok(None)` once the call finished with an ok status; a failure status
    /// is returned as `Error::Status`.
    pub fn recv(&mut self) -> Result<Option<Message>, Error> {
        if let Some(status) = &self.status {
            return if status.is_ok() {
                Ok(None)
            } else {
                Err(Error::Status(status.clone()))
            };
        }

        let reply = match self.timeout {
            Some(timeout) => self.replies.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::ConnectionClosed,
            })?,
            None => self.replies.recv().map_err(|_| Error::ConnectionClosed)?,
        };

        match reply {
            Reply::Message(msg) => Ok(Some(msg)),
            Reply::Status(status) => {
                debug!("call {} finished: {}", self.id, status);
                self.status = Some(status.clone());
                if status.is_ok() {
                    Ok(None)
                } else {
                    Err(Error::Status(status))
                }
            }
        }
    }
}

impl<S: StreamExt> Iterator for ClientCall<S> {
    type Item = Result<Message, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.recv() {
            Ok(Some(msg)) => Some(Ok(msg)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: StreamExt> Drop for ClientCall<S> {
    fn drop(&mut self) {
        if self.status.is_none() && !self.cancelled {
            debug!("drop unfinished call {}, cancel it", self.id);
            self.sock.send(&Frame::cancel(self.id)).ok();
        }
        self.routes.lock().unwrap().remove(&self.id);
    }
}
