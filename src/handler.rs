//! Handler traits, one per interaction shape, and the table that maps method
//! names to them.
//!
//! ```rust
//! use may_stream_rpc::{Handler, Message, ServiceTable, Status};
//!
//! let mut table = ServiceTable::new();
//! table
//!     .register("echo", Handler::unary(|req: Message| -> Result<Message, Status> { Ok(req) }))
//!     .unwrap();
//! assert!(table.get("echo").is_some());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::call::{RequestStream, ResponseSink};
use crate::{Error, Message, Status};

/// Lazily produced response stream of a server-streaming handler.
pub type ResponseIter = Box<dyn Iterator<Item = Result<Message, Status>>>;

/// One request, one response.
pub trait UnaryHandler: Send + Sync + 'static {
    /// handle the request
    fn call(&self, request: Message) -> Result<Message, Status>;
}

/// One request, a finite stream of responses.
pub trait ServerStreamingHandler: Send + Sync + 'static {
    /// Return the response stream for the request.
    ///
    /// The dispatcher drains it in order and then ends the call.
    fn call(&self, request: Message) -> Result<ResponseIter, Status>;
}

/// A stream of requests, one response.
pub trait ClientStreamingHandler: Send + Sync + 'static {
    /// Consume the request stream and produce the single response.
    fn call(&self, requests: &mut RequestStream) -> Result<Message, Status>;
}

/// Requests and responses flowing independently.
pub trait BidiHandler: Send + Sync + 'static {
    /// Serve the call; the response stream is ended once this returns.
    fn call(&self, requests: &mut RequestStream, responses: &mut ResponseSink)
        -> Result<(), Status>;
}

impl<F> UnaryHandler for F
where
    F: Fn(Message) -> Result<Message, Status> + Send + Sync + 'static,
{
    fn call(&self, request: Message) -> Result<Message, Status> {
        self(request)
    }
}

impl<F> ServerStreamingHandler for F
where
    F: Fn(Message) -> Result<ResponseIter, Status> + Send + Sync + 'static,
{
    fn call(&self, request: Message) -> Result<ResponseIter, Status> {
        self(request)
    }
}

impl<F> ClientStreamingHandler for F
where
    F: Fn(&mut RequestStream) -> Result<Message, Status> + Send + Sync + 'static,
{
    fn call(&self, requests: &mut RequestStream) -> Result<Message, Status> {
        self(requests)
    }
}

impl<F> BidiHandler for F
where
    F: Fn(&mut RequestStream, &mut ResponseSink) -> Result<(), Status> + Send + Sync + 'static,
{
    fn call(
        &self,
        requests: &mut RequestStream,
        responses: &mut ResponseSink,
    ) -> Result<(), Status> {
        self(requests, responses)
    }
}

/// The four interaction shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// one request, one response
    Unary,
    /// one request, many responses
    ServerStreaming,
    /// many requests, one response
    ClientStreaming,
    /// many requests, many responses
    Bidirectional,
}

/// A registered handler, tagged with its shape.
#[derive(Clone)]
pub enum Handler {
    /// unary handler
    Unary(Arc<dyn UnaryHandler>),
    /// server-streaming handler
    ServerStreaming(Arc<dyn ServerStreamingHandler>),
    /// client-streaming handler
    ClientStreaming(Arc<dyn ClientStreamingHandler>),
    /// bidirectional-streaming handler
    Bidirectional(Arc<dyn BidiHandler>),
}

impl Handler {
    /// wrap a unary handler
    pub fn unary<H: UnaryHandler>(h: H) -> Self {
        Handler::Unary(Arc::new(h))
    }

    /// wrap a server-streaming handler
    pub fn server_streaming<H: ServerStreamingHandler>(h: H) -> Self {
        Handler::ServerStreaming(Arc::new(h))
    }

    /// wrap a client-streaming handler
    pub fn client_streaming<H: ClientStreamingHandler>(h: H) -> Self {
        Handler::ClientStreaming(Arc::new(h))
    }

    /// wrap a bidirectional-streaming handler
    pub fn bidirectional<H: BidiHandler>(h: H) -> Self {
        Handler::Bidirectional(Arc::new(h))
    }

    /// the interaction shape of this handler
    pub fn shape(&self) -> Shape {
        match self {
            Handler::Unary(_) => Shape::Unary,
            Handler::ServerStreaming(_) => Shape::ServerStreaming,
            Handler::ClientStreaming(_) => Shape::ClientStreaming,
            Handler::Bidirectional(_) => Shape::Bidirectional,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.shape()).finish()
    }
}

/// Method name to handler mapping served by a dispatcher.
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    methods: HashMap<String, Handler>,
}

impl ServiceTable {
    /// create an empty table
    pub fn new() -> Self {
        ServiceTable::default()
    }

    /// Register a handler under `name`.
    ///
    /// Empty names, names with whitespace or control characters and names
    /// that are already taken are rejected.
    pub fn register(&mut self, name: &str, handler: Handler) -> Result<&mut Self, Error> {
        if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidMethod(name.to_owned()));
        }
        if self.methods.contains_key(name) {
            return Err(Error::DuplicateMethod(name.to_owned()));
        }
        debug!("register method {} as {:?}", name, handler.shape());
        self.methods.insert(name.to_owned(), handler);
        Ok(self)
    }

    /// look up a handler
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.methods.get(name)
    }

    /// the shape of a registered method
    pub fn shape(&self, name: &str) -> Option<Shape> {
        self.get(name).map(Handler::shape)
    }

    /// number of registered methods
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// true if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// registered method names, in no particular order
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Handler {
        Handler::unary(|req: Message| -> Result<Message, Status> { Ok(req) })
    }

    #[test]
    fn register_and_lookup() {
        let mut table = ServiceTable::new();
        table
            .register("echo", echo())
            .unwrap()
            .register(
                "count",
                Handler::server_streaming(|req: Message| -> Result<ResponseIter, Status> {
                    Ok(Box::new((0..3).map(move |i| Ok(req.respond_at(i)))))
                }),
            )
            .unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.shape("echo"), Some(Shape::Unary));
        assert_eq!(table.shape("count"), Some(Shape::ServerStreaming));
        assert!(table.get("missing").is_none());

        let mut names: Vec<_> = table.methods().collect();
        names.sort();
        assert_eq!(names, vec!["count", "echo"]);
    }

    #[test]
    fn register_rejects_bad_names() {
        let mut table = ServiceTable::new();
        assert!(matches!(
            table.register("", echo()),
            Err(Error::InvalidMethod(_))
        ));
        assert!(matches!(
            table.register("two words", echo()),
            Err(Error::InvalidMethod(_))
        ));
        table.register("echo", echo()).unwrap();
        assert!(matches!(
            table.register("echo", echo()),
            Err(Error::DuplicateMethod(ref n)) if n == "echo"
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn handler_shapes() {
        let client = Handler::client_streaming(
            |reqs: &mut RequestStream| -> Result<Message, Status> {
                reqs.next()
                    .unwrap_or_else(|| Err(Status::invalid_argument("empty")))
            },
        );
        let bidi = Handler::bidirectional(
            |_reqs: &mut RequestStream, _rsps: &mut ResponseSink| -> Result<(), Status> { Ok(()) },
        );
        assert_eq!(client.shape(), Shape::ClientStreaming);
        assert_eq!(bidi.shape(), Shape::Bidirectional);
        assert_eq!(format!("{:?}", bidi), "Handler(Bidirectional)");
    }
}
