//! Routing of incoming channel payloads.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use metrics::counter;
use tether_channel::{MessageChannel, MessageSink};
use tether_core::{Action, ApplicationError, Call, CallError, DisconnectReason, NoSuchMethod, RequestId, Respond};
use tracing::{debug, error, info, trace, warn};

use crate::addressable::{CallArgs, CallOutcome, Callable};
use crate::session::{SessionCore, SessionState};

impl MessageSink for SessionCore {
    fn deliver(&mut self, channel: &mut MessageChannel, payload: Action) {
        if self.state != SessionState::Connected {
            trace!(action = payload.name(), "session not connected, payload ignored");
            return;
        }
        match payload {
            Action::Call(call) => self.dispatch_call(channel, call),
            Action::Respond(respond) => self.settle_call(respond),
            Action::Noop => trace!("heartbeat"),
            Action::Close => {
                info!("client closed the session");
                let _ = channel.close();
                self.disconnect(channel, DisconnectReason::ClosedByPeer);
            }
        }
    }
}

impl SessionCore {
    /// Run an incoming call. A result that is ready without suspending is
    /// queued right away so it shares the basket being assembled.
    fn dispatch_call(&mut self, channel: &mut MessageChannel, call: Call) {
        let Call {
            method,
            request_id,
            target,
            args,
            kwargs,
        } = call;

        let located = match self.objects.get(target) {
            Some(object) => object.locate_method(&method),
            None => Err(NoSuchMethod::new(method.as_str())),
        };
        let handler = match located {
            Ok(handler) => handler,
            Err(err) => {
                debug!(%request_id, %target, method, "no such method");
                self.respond(channel, request_id, CallOutcome::Failed(err.into()));
                return;
            }
        };

        let args = CallArgs {
            positional: args,
            named: kwargs,
            session: self.handle.upgrade(),
        };
        trace!(%request_id, %target, method, "dispatching call");
        let mut running = invoke(handler, args, method).boxed();
        match (&mut running).now_or_never() {
            Some(outcome) => self.respond(channel, request_id, outcome),
            None => self
                .in_flight
                .push(async move { (request_id, running.await) }.boxed()),
        }
    }

    fn settle_call(&mut self, respond: Respond) {
        let Respond {
            request_id,
            success,
            result,
        } = respond;
        let result = if success {
            Ok(result)
        } else {
            Err(CallError::Remote(ApplicationError::from_wire(&result)))
        };
        if !self.pending.resolve(&request_id, result) {
            warn!(%request_id, "respond for unknown request id");
        }
    }

    /// Queue the `respond` for a settled call.
    pub(crate) fn respond(&mut self, channel: &mut MessageChannel, request_id: RequestId, outcome: CallOutcome) {
        counter!("tether_calls_total", "outcome" => outcome.kind()).increment(1);
        if let CallOutcome::Failed(err) = &outcome {
            warn!(%request_id, class = %err.class, message = %err.message, "call failed");
        }
        let _ = channel.enqueue(Action::Respond(outcome.into_respond(request_id)));
    }
}

async fn invoke(handler: Callable, args: CallArgs, method: String) -> CallOutcome {
    match AssertUnwindSafe(handler.invoke(args)).catch_unwind().await {
        Ok(result) => CallOutcome::from(result),
        Err(panic) => {
            let msg = panic_message(&panic);
            error!(method, panic = %msg, "handler panicked");
            CallOutcome::Failed(ApplicationError::panicked(msg))
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_owned()
}
