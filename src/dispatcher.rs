use std::panic::{self, AssertUnwindSafe};

use crate::call::{Call, CallState, Direction, Lifecycle, RequestStream, ResponseSink};
use crate::handler::{Handler, ServiceTable};
use crate::{Message, Status};

/// must impl this trait for your server
pub trait Server: Send + Sync + Sized + 'static {
    /// Serve one opened call to completion.
    ///
    /// This runs in the call's own coroutine and must deliver exactly one
    /// terminal status through the call's reply sink.
    fn serve(&self, call: Call);
}

/// Routes calls to the handlers of a [`ServiceTable`] and owns each call's
/// lifecycle.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: ServiceTable,
}

impl Dispatcher {
    /// create a dispatcher serving the given table
    pub fn new(table: ServiceTable) -> Self {
        Dispatcher { table }
    }

    /// the served table
    pub fn table(&self) -> &ServiceTable {
        &self.table
    }

    /// Run one call to completion and return the status it was closed with.
    ///
    /// Unknown methods are closed with `Unimplemented` without reading the
    /// request stream. A handler panic becomes `Internal`; any outcome of a
    /// cancelled call becomes `Cancelled`.
    pub fn dispatch(&self, call: Call) -> Status {
        let (id, method, mut input, mut output) = call.into_parts();
        let mut life = Lifecycle::new(id);

        let status = match self.table.get(&method) {
            None => {
                warn!("call {}: unknown method {:?}", id, method);
                Status::unimplemented(format!("unknown method `{method}`"))
            }
            Some(handler) => {
                life.activate();
                info!("call {}: {} ({:?})", id, method, handler.shape());
                let ret = panic::catch_unwind(AssertUnwindSafe(|| {
                    run(handler, &mut input, &mut output)
                }));
                match ret {
                    Ok(Ok(())) => Status::ok(),
                    Ok(Err(status)) => status,
                    Err(_) => {
                        error!("call {}: handler for {} panicked", id, method);
                        Status::internal("rpc panicked in server!")
                    }
                }
            }
        };

        let status = if input.cancelled() {
            // no half-close for a cancelled call, straight to closed
            Status::cancelled(cancel_reason(&status))
        } else {
            if input.is_ended() {
                life.half_close(Direction::Inbound);
            } else if life.state() != CallState::Open {
                debug!("call {}: request stream abandoned", id);
            }
            output.end();
            life.half_close(Direction::Outbound);
            status
        };

        if life.close(status.code()).is_ok() {
            debug!(
                "call {}: closed with {} after {} in / {} out",
                id,
                status.code(),
                input.received(),
                output.sent()
            );
            if let Err(e) = output.finish(status.clone()) {
                debug!("call {}: status not delivered, err={}", id, e);
            }
        }
        status
    }
}

impl Server for Dispatcher {
    fn serve(&self, call: Call) {
        self.dispatch(call);
    }
}

fn cancel_reason(status: &Status) -> String {
    match status.code() {
        crate::Code::Cancelled => status.message().to_owned(),
        _ => "call cancelled".to_owned(),
    }
}

// read the one request of a unary or server-streaming call
fn read_single(input: &mut RequestStream) -> Result<Message, Status> {
    let request = input
        .recv()?
        .ok_or_else(|| Status::invalid_argument("expected exactly one request message, got none"))?;
    match input.recv()? {
        None => Ok(request),
        Some(_) => Err(Status::invalid_argument(
            "expected exactly one request message, got more",
        )),
    }
}

fn run(handler: &Handler, input: &mut RequestStream, output: &mut ResponseSink) -> Result<(), Status> {
    match handler {
        Handler::Unary(h) => {
            let request = read_single(input)?;
            let response = h.call(request)?;
            output.send(response)
        }
        Handler::ServerStreaming(h) => {
            let request = read_single(input)?;
            for response in h.call(request)? {
                output.send(response?)?;
            }
            Ok(())
        }
        Handler::ClientStreaming(h) => {
            let response = h.call(input)?;
            output.send(response)
        }
        Handler::Bidirectional(h) => h.call(input, output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{self, Reply};
    use crate::handler::ResponseIter;
    use crate::Code;

    fn table() -> ServiceTable {
        let mut table = ServiceTable::new();
        table
            .register(
                "echo",
                Handler::unary(|req: Message| -> Result<Message, Status> { Ok(req) }),
            )
            .unwrap()
            .register(
                "boom",
                Handler::unary(|_req: Message| -> Result<Message, Status> {
                    panic!("boom in handler")
                }),
            )
            .unwrap()
            .register(
                "half_then_fail",
                Handler::server_streaming(|req: Message| -> Result<ResponseIter, Status> {
                    let items: Vec<Result<Message, Status>> =
                        vec![Ok(req), Err(Status::internal("second item failed"))];
                    Ok(Box::new(items.into_iter()))
                }),
            )
            .unwrap()
            .register(
                "write_after_end",
                Handler::bidirectional(
                    |_reqs: &mut RequestStream, rsps: &mut ResponseSink| -> Result<(), Status> {
                        rsps.end();
                        rsps.send(Message::default())
                    },
                ),
            )
            .unwrap();
        table
    }

    #[test]
    fn unknown_method_is_unimplemented() {
        let dispatcher = Dispatcher::new(table());
        let (call, peer) = call::channel(1, "nope");
        peer.send(Message::default());
        peer.close_send();

        let status = dispatcher.dispatch(call);
        assert_eq!(status.code(), Code::Unimplemented);
        let (msgs, delivered) = peer.collect();
        assert!(msgs.is_empty());
        assert_eq!(delivered, Some(status));
    }

    #[test]
    fn unary_requires_exactly_one_request() {
        let dispatcher = Dispatcher::new(table());

        let (call, peer) = call::channel(1, "echo");
        peer.close_send();
        assert_eq!(dispatcher.dispatch(call).code(), Code::InvalidArgument);
        assert_eq!(peer.collect().0.len(), 0);

        let (call, peer) = call::channel(2, "echo");
        peer.send(Message::default());
        peer.send(Message::default());
        peer.close_send();
        assert_eq!(dispatcher.dispatch(call).code(), Code::InvalidArgument);
        assert_eq!(peer.collect().0.len(), 0);
    }

    #[test]
    fn panic_becomes_internal() {
        let dispatcher = Dispatcher::new(table());
        let (call, peer) = call::channel(1, "boom");
        peer.send(Message::default());
        peer.close_send();

        let status = dispatcher.dispatch(call);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(peer.collect(), (vec![], Some(status)));
    }

    #[test]
    fn partial_output_is_kept_on_failure() {
        let dispatcher = Dispatcher::new(table());
        let (call, peer) = call::channel(1, "half_then_fail");
        let req = Message::new("x", 1, true, 0.0);
        peer.send(req.clone());
        peer.close_send();

        let status = dispatcher.dispatch(call);
        assert_eq!(status.code(), Code::Internal);
        let (msgs, delivered) = peer.collect();
        assert_eq!(msgs, vec![req]);
        assert_eq!(delivered.unwrap().message(), "second item failed");
    }

    #[test]
    fn exactly_one_status_is_delivered() {
        let dispatcher = Dispatcher::new(table());
        let (call, peer) = call::channel(1, "write_after_end");
        peer.close_send();

        let status = dispatcher.dispatch(call);
        assert_eq!(status.code(), Code::Internal);

        let mut statuses = 0;
        while let Some(reply) = peer.recv() {
            match reply {
                Reply::Message(_) => panic!("no message after end"),
                Reply::Status(_) => statuses += 1,
            }
        }
        assert_eq!(statuses, 1);
    }

    #[test]
    fn cancel_before_dispatch() {
        let dispatcher = Dispatcher::new(table());
        let (call, peer) = call::channel(1, "echo");
        peer.send(Message::default());
        peer.cancel();

        let status = dispatcher.dispatch(call);
        assert_eq!(status.code(), Code::Cancelled);
        assert_eq!(peer.collect(), (vec![], Some(status)));
    }
}
