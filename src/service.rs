//! The demo service: one handler per interaction shape, each applying the
//! placeholder transform of [`Message::respond`].

use crate::call::{RequestStream, ResponseSink};
use crate::handler::{
    BidiHandler, ClientStreamingHandler, Handler, ResponseIter, ServerStreamingHandler,
    ServiceTable, UnaryHandler,
};
use crate::{Error, Message, Status};

/// unary method name
pub const SIMPLE_RPC: &str = "simpleRpc";
/// server-streaming method name
pub const SERVER_SIDE_STREAMING: &str = "serverSideRpcStreaming";
/// client-streaming method name
pub const CLIENT_SIDE_STREAMING: &str = "clientSideRpcStreaming";
/// bidirectional-streaming method name
pub const BIDIRECTIONAL_STREAMING: &str = "bidirectionalRpcStreaming";

/// number of responses the server-streaming method writes by default
pub const DEFAULT_STREAM_COUNT: usize = 2;

/// Responds to the single request with its transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleRpc;

impl UnaryHandler for SimpleRpc {
    fn call(&self, request: Message) -> Result<Message, Status> {
        info!("{:?}", request);
        request.respond()
    }
}

/// Responds to the single request with `count` indexed messages.
#[derive(Debug, Clone, Copy)]
pub struct ServerSideStreaming {
    count: usize,
}

impl ServerSideStreaming {
    /// stream `count` responses per request
    pub fn new(count: usize) -> Self {
        ServerSideStreaming { count }
    }
}

impl Default for ServerSideStreaming {
    fn default() -> Self {
        ServerSideStreaming::new(DEFAULT_STREAM_COUNT)
    }
}

impl ServerStreamingHandler for ServerSideStreaming {
    fn call(&self, request: Message) -> Result<ResponseIter, Status> {
        info!("{:?}", request);
        let responses = (0..self.count).map(move |i| Ok::<_, Status>(request.respond_at(i)));
        Ok(Box::new(responses))
    }
}

/// Picks the request a client-streaming response is derived from.
pub trait Aggregate: Send + Sync + 'static {
    /// `None` means there is nothing to respond to
    fn select<'a>(&self, batch: &'a [Message]) -> Option<&'a Message>;
}

/// Respond from the first request.
#[derive(Debug, Clone, Copy, Default)]
pub struct First;

impl Aggregate for First {
    fn select<'a>(&self, batch: &'a [Message]) -> Option<&'a Message> {
        batch.first()
    }
}

/// Respond from the last request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Last;

impl Aggregate for Last {
    fn select<'a>(&self, batch: &'a [Message]) -> Option<&'a Message> {
        batch.last()
    }
}

/// Collects the whole request stream, then responds once from the request
/// chosen by the aggregation policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientSideStreaming<P = First> {
    policy: P,
}

impl<P: Aggregate> ClientSideStreaming<P> {
    /// use the given aggregation policy
    pub fn with_policy(policy: P) -> Self {
        ClientSideStreaming { policy }
    }
}

impl<P: Aggregate> ClientStreamingHandler for ClientSideStreaming<P> {
    fn call(&self, requests: &mut RequestStream) -> Result<Message, Status> {
        // dropped with this invocation, on success, failure and cancel alike
        let mut batch = Vec::new();
        for request in requests {
            let request = request?;
            info!("{:?}", request);
            batch.push(request);
        }
        let chosen = self.policy.select(&batch).ok_or_else(|| {
            Status::invalid_argument("request stream ended without any message")
        })?;
        chosen.respond()
    }
}

/// Answers every request with its transform, in order, as it arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct BidirectionalStreaming;

impl BidiHandler for BidirectionalStreaming {
    fn call(
        &self,
        requests: &mut RequestStream,
        responses: &mut ResponseSink,
    ) -> Result<(), Status> {
        for request in requests {
            let request = request?;
            info!("{:?}", request);
            responses.send(request.respond()?)?;
        }
        Ok(())
    }
}

/// Register the four demo methods into `table`.
pub fn register_demo(table: &mut ServiceTable) -> Result<(), Error> {
    table
        .register(SIMPLE_RPC, Handler::unary(SimpleRpc))?
        .register(
            SERVER_SIDE_STREAMING,
            Handler::server_streaming(ServerSideStreaming::default()),
        )?
        .register(
            CLIENT_SIDE_STREAMING,
            Handler::client_streaming(ClientSideStreaming::<First>::default()),
        )?
        .register(
            BIDIRECTIONAL_STREAMING,
            Handler::bidirectional(BidirectionalStreaming),
        )?;
    Ok(())
}

/// A table holding only the four demo methods.
pub fn demo_table() -> Result<ServiceTable, Error> {
    let mut table = ServiceTable::new();
    register_demo(&mut table)?;
    Ok(table)
}
