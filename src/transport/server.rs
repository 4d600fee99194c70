use std::collections::HashMap;
use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, ToSocketAddrs};
#[cfg(unix)]
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::BytesMut;
use co_managed::Manager;
use may::net::TcpListener;
#[cfg(unix)]
use may::os::unix::net::UnixListener;
use may::sync::mpsc::{self, Sender};
use may::sync::Mutex;
use may::{coroutine, go};

use super::frame::{Frame, FrameKind};
use super::stream_ext::StreamExt;
use super::writer::FrameWriter;
use crate::call::{Call, CallEvent, CancelToken, Reply, ReplySink};
use crate::{Config, Server, Status};

macro_rules! t {
    ($e: expr) => {
        match $e {
            Ok(val) => val,
            Err(err) => {
                error!("call = {:?}\nerr = {:?}", stringify!($e), err);
                continue;
            }
        }
    };
}

type Closer = Box<dyn FnOnce() + Send>;

// live connections of one server, closed when the server stops
#[derive(Clone)]
struct Connections {
    next_id: Arc<AtomicU64>,
    open: Arc<Mutex<HashMap<u64, Closer>>>,
}

impl Connections {
    fn new() -> Self {
        Connections {
            next_id: Arc::new(AtomicU64::new(0)),
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn add<S: StreamExt>(&self, stream: &S) -> io::Result<u64> {
        let stream = stream.try_clone()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closer: Closer = Box::new(move || {
            if let Err(e) = stream.close() {
                debug!("close connection failed, err={}", e);
            }
        });
        self.open.lock().unwrap().insert(id, closer);
        Ok(id)
    }

    fn remove(&self, id: u64) {
        self.open.lock().unwrap().remove(&id);
    }

    fn is_empty(&self) -> bool {
        self.open.lock().unwrap().is_empty()
    }

    // shut every socket down, their readers see end of stream
    fn close_all(&self) {
        let open = std::mem::take(&mut *self.open.lock().unwrap());
        for (_, close) in open {
            close();
        }
    }
}

// how long a stopping server waits for its connections to wind down
const CLOSE_WAIT: Duration = Duration::from_secs(1);

/// service instance
pub struct ServerInstance {
    handle: Option<coroutine::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    connections: Connections,
}

impl ServerInstance {
    /// the bound address of a tcp server
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// join the service, this would wait until the service is stopped
    pub fn join(mut self) -> std::thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }

    /// stop the service; open connections and their calls are cancelled
    pub fn shutdown(self) {
        drop(self)
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        let Some(s) = self.handle.take() else {
            return;
        };
        // let the connections end on their own first, running their cleanup
        self.connections.close_all();
        let mut waited = Duration::ZERO;
        while !self.connections.is_empty() && waited < CLOSE_WAIT {
            coroutine::sleep(Duration::from_millis(10));
            waited += Duration::from_millis(10);
        }
        unsafe { s.coroutine().cancel() };
        s.join().ok();
    }
}

// writes the replies of one call as frames on the shared connection
struct FrameSink<W: Write> {
    id: u64,
    writer: Arc<FrameWriter<W>>,
}

impl<W: Write + Send> ReplySink for FrameSink<W> {
    fn deliver(&mut self, reply: Reply) -> io::Result<()> {
        let frame = match reply {
            Reply::Message(msg) => Frame::message(self.id, &msg)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?,
            Reply::Status(status) => Frame::status(self.id, &status),
        };
        debug!("send {:?} frame: id={}", frame.kind, self.id);
        self.writer.send(&frame)
    }
}

struct CallEntry {
    tx: Sender<CallEvent>,
    cancel: CancelToken,
}

impl CallEntry {
    fn cancel(&self) {
        self.cancel.cancel();
        // wake the handler if it's waiting for the next request
        self.tx.send(CallEvent::Cancel).ok();
    }
}

type CallMap = Arc<Mutex<HashMap<u64, CallEntry>>>;

// runs when a connection ends, by end of stream or by unwinding
struct ConnectionGuard {
    id: u64,
    peer: String,
    calls: CallMap,
    connections: Connections,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connections.remove(self.id);
        // nobody is left to talk to, cancel what is still running
        let pending = match self.calls.lock() {
            Ok(mut calls) => std::mem::take(&mut *calls),
            Err(_) => return,
        };
        for (id, entry) in pending {
            debug!("cancel call {} on connection close", id);
            entry.cancel();
        }
        info!("connection done: peer={}", self.peer);
    }
}

fn reject<W: Write + Send>(mut sink: FrameSink<W>, status: Status) {
    warn!("reject call {}: {}", sink.id, status);
    if let Err(e) = sink.deliver(Reply::Status(status)) {
        error!("send reject status failed, err={}", e);
    }
}

fn forward(calls: &CallMap, id: u64, event: CallEvent) {
    let calls = calls.lock().unwrap();
    match calls.get(&id) {
        Some(entry) => {
            if entry.tx.send(event).is_err() {
                debug!("call {} finished, frame dropped", id);
            }
        }
        None => debug!("frame for unknown or finished call {}, dropped", id),
    }
}

fn open_call<T: Server, W: Write + Send + 'static>(
    server: &Arc<T>,
    writer: &Arc<FrameWriter<W>>,
    calls: &CallMap,
    config: &Config,
    frame: Frame,
) {
    let id = frame.id;
    let sink = FrameSink {
        id,
        writer: writer.clone(),
    };
    let method = match frame.decode_method() {
        Ok(m) => m.to_owned(),
        Err(e) => return reject(sink, Status::internal(e.to_string())),
    };

    let (tx, rx) = mpsc::channel();
    let cancel = CancelToken::new();
    {
        let mut calls = calls.lock().unwrap();
        if calls.contains_key(&id) {
            drop(calls);
            return reject(sink, Status::internal(format!("call id {id} is in use")));
        }
        calls.insert(
            id,
            CallEntry {
                tx,
                cancel: cancel.clone(),
            },
        );
    }

    info!("open call: id={} method={}", id, method);
    let call = Call::new(id, method, rx, Box::new(sink), cancel);
    let server = server.clone();
    // the map owns the call's sender, the call coroutine must not keep it alive
    let done: Weak<_> = Arc::downgrade(calls);
    let builder = coroutine::Builder::new()
        .name(format!("call-{id}"))
        .stack_size(config.call_stack_size);
    let spawned = go!(builder, move || {
        server.serve(call);
        if let Some(calls) = done.upgrade() {
            calls.lock().unwrap().remove(&id);
        }
    });
    if let Err(e) = spawned {
        error!("spawn call coroutine failed, err={}", e);
        calls.lock().unwrap().remove(&id);
        let status = Frame::status(id, &Status::internal("server can't start the call"));
        writer.send(&status).ok();
    }
}

// demultiplex the frames of one connection into its calls
fn serve_connection<T: Server, S: StreamExt>(
    server: Arc<T>,
    stream: S,
    config: Arc<Config>,
    connections: Connections,
) {
    let peer = stream.peer();
    let id = match connections.add(&stream) {
        Ok(id) => id,
        Err(e) => {
            error!("register connection failed, err={}", e);
            return;
        }
    };
    let calls: CallMap = Arc::new(Mutex::new(HashMap::new()));
    let _guard = ConnectionGuard {
        id,
        peer: peer.clone(),
        calls: calls.clone(),
        connections,
    };
    let rs = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            error!("clone stream failed, err={}", e);
            return;
        }
    };
    // the read half of the stream
    let mut rs = BufReader::new(rs);
    // the write half of the stream, shared by all calls
    let ws = Arc::new(FrameWriter::new(stream));
    let mut buf = BytesMut::with_capacity(1024 * 32);
    info!("accept connection: peer={}", peer);

    loop {
        let frame = match Frame::decode_from(&mut rs, &mut buf, config.max_frame_len) {
            Ok(r) => r,
            Err(ref e) => {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    info!("server decode frame: connection closed, peer={}", peer);
                } else {
                    error!("server decode frame: err = {:?}", e);
                }
                break;
            }
        };

        match frame.kind {
            FrameKind::Open => open_call(&server, &ws, &calls, &config, frame),
            FrameKind::Message => {
                let event = match frame.decode_message() {
                    Ok(msg) => CallEvent::Message(msg),
                    Err(e) => {
                        warn!("call {}: bad request message, err={}", frame.id, e);
                        CallEvent::Abort(Status::internal(format!("failed to decode request: {e}")))
                    }
                };
                forward(&calls, frame.id, event);
            }
            FrameKind::HalfClose => forward(&calls, frame.id, CallEvent::End),
            FrameKind::Cancel => match calls.lock().unwrap().get(&frame.id) {
                Some(entry) => {
                    info!("cancel call: id={}", frame.id);
                    entry.cancel();
                }
                None => debug!("cancel for unknown or finished call {}", frame.id),
            },
            FrameKind::Status => {
                warn!("client sent a status frame for call {}, dropped", frame.id);
            }
        }
    }
}

/// Provides a function for starting the tcp service.
pub trait TcpServer: Server {
    /// Spawns the service with the default config, binding to the given address
    /// return a coroutine that you can cancel it when need to stop the service
    fn start<L: ToSocketAddrs>(self, addr: L) -> io::Result<ServerInstance> {
        self.start_with(addr, Config::default())
    }

    /// Spawns the service with the given config, binding to the given address
    fn start_with<L: ToSocketAddrs>(self, addr: L, config: Config) -> io::Result<ServerInstance> {
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let config = Arc::new(config);
        let connections = Connections::new();
        let conns = connections.clone();
        info!("tcp server listening on {}", local_addr);
        let instance = go!(
            coroutine::Builder::new().name("TcpServer".to_owned()),
            move || {
                let server = Arc::new(self);
                let manager = Manager::new();
                for stream in listener.incoming() {
                    let stream = t!(stream);
                    t!(stream.set_nodelay(true));
                    let server = server.clone();
                    let config = config.clone();
                    let conns = conns.clone();
                    manager.add(move || serve_connection(server, stream, config, conns));
                }
            }
        )?;
        Ok(ServerInstance {
            handle: Some(instance),
            local_addr: Some(local_addr),
            connections,
        })
    }
}

/// Provides a function for starting the unix domain socket service.
#[cfg(unix)]
pub trait UdsServer: Server {
    /// Spawns the service, binding to the given path
    /// return a coroutine that you can cancel it when need to stop the service
    fn start<P: AsRef<Path>>(self, path: P) -> io::Result<ServerInstance> {
        self.start_with(path, Config::default())
    }

    /// Spawns the service with the given config, binding to the given path
    fn start_with<P: AsRef<Path>>(self, path: P, config: Config) -> io::Result<ServerInstance> {
        struct AutoDrop(UnixListener, PathBuf);
        impl Drop for AutoDrop {
            fn drop(&mut self) {
                std::fs::remove_file(&self.1).ok();
            }
        }

        std::fs::remove_file(&path).ok();
        let listener = AutoDrop(UnixListener::bind(&path)?, path.as_ref().to_owned());
        let config = Arc::new(config);
        let connections = Connections::new();
        let conns = connections.clone();
        info!("unix socket server listening on {:?}", listener.1);
        let instance = go!(
            coroutine::Builder::new().name("Unix Socket Server".to_owned()),
            move || {
                let server = Arc::new(self);
                let manager = Manager::new();
                for stream in listener.0.incoming() {
                    let stream = t!(stream);
                    let server = server.clone();
                    let config = config.clone();
                    let conns = conns.clone();
                    manager.add(move || serve_connection(server, stream, config, conns));
                }
            }
        )?;
        Ok(ServerInstance {
            handle: Some(instance),
            local_addr: None,
            connections,
        })
    }
}

impl<T: Server> TcpServer for T {}
#[cfg(unix)]
impl<T: Server> UdsServer for T {}
