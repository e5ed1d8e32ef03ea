//! The session actor and the handle used to talk to it.
//!
//! A session is created without a client id. [`SessionHandle::activate`]
//! assigns one and starts the channel timers; from then on the session is
//! connected until the channel reports a failure, the server closes it, or
//! the client sends `close`. Disconnection is terminal.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tether_channel::{
    ChannelError, ChannelEvent, ChannelTimeouts, MessageChannel, SlotReply, TransportSlot,
};
use tether_core::{Action, Basket, Call, CallError, ClientId, DisconnectReason, ObjectId, RequestId};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::addressable::{Addressable, CallOutcome};
use crate::error::SessionError;
use crate::objects::LocalObjectTable;
use crate::pending::PendingCallTable;

pub(crate) enum Command {
    Activate {
        location: String,
        reply: oneshot::Sender<Result<Activation, SessionError>>,
    },
    AddObject {
        id: ObjectId,
        object: Arc<dyn Addressable>,
    },
    RemoveObject {
        id: ObjectId,
    },
    CallRemote {
        method: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        reply: oneshot::Sender<Result<Value, CallError>>,
    },
    NotifyOnDisconnect {
        reply: oneshot::Sender<DisconnectReason>,
    },
    OfferSlot {
        slot: TransportSlot,
    },
    ReceiveBasket {
        basket: Basket,
        reply: oneshot::Sender<SlotReply>,
    },
    Close {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Lifecycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not yet activated.
    Initial,
    /// Activated and serving the client.
    Connected,
    /// Terminal.
    Disconnected(DisconnectReason),
}

/// What the client needs to reach its session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    /// The id the client presents on every transport request.
    pub client_id: ClientId,
    /// Where the client posts its baskets.
    pub input_url: String,
    /// Where the client parks its long-poll slot.
    pub output_url: String,
}

/// Point-in-time view of a session's internals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle state.
    pub state: SessionState,
    /// Assigned at activation.
    pub client_id: Option<ClientId>,
    /// Unacknowledged outgoing sequence numbers.
    pub queued: Vec<i64>,
    /// Open transport slots.
    pub open_slots: usize,
    /// Server-to-client calls awaiting a respond.
    pub pending_calls: usize,
    /// Client-to-server calls still running.
    pub in_flight: usize,
    /// Entries in the local object table.
    pub local_objects: usize,
}

/// Entry point for creating sessions.
pub struct Session;

impl Session {
    /// Spawn a session whose root object (id 0) is `root`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(root: Arc<dyn Addressable>, timeouts: ChannelTimeouts) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            tx,
            next_object: Arc::new(AtomicU64::new(1)),
            client_id: Arc::new(OnceLock::new()),
        };
        let actor = SessionActor {
            rx,
            channel: MessageChannel::new(timeouts),
            core: SessionCore::new(root, handle.downgrade()),
        };
        let span = info_span!("session", client_id = tracing::field::Empty);
        drop(tokio::spawn(actor.run().instrument(span)));
        handle
    }
}

/// Cloneable handle to a running session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    next_object: Arc<AtomicU64>,
    client_id: Arc<OnceLock<ClientId>>,
}

impl SessionHandle {
    /// The client id, once activated.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id.get().cloned()
    }

    /// Assign the client id, derive the transport URLs under `location` and
    /// start the channel timers. Allowed once.
    pub async fn activate(&self, location: &str) -> Result<Activation, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Activate {
            location: location.to_owned(),
            reply,
        })?;
        rx.await.map_err(|_| SessionError::Gone)?
    }

    /// Make `object` callable by the client and return its id.
    pub fn add_local_object(&self, object: Arc<dyn Addressable>) -> ObjectId {
        let id = ObjectId(self.next_object.fetch_add(1, Ordering::Relaxed));
        let _ = self.send(Command::AddObject { id, object });
        id
    }

    /// Forget a local object. The root cannot be removed.
    pub fn remove_local_object(&self, id: ObjectId) {
        let _ = self.send(Command::RemoveObject { id });
    }

    /// Call `method` on the client's root object with positional arguments.
    ///
    /// The call is queued before this returns; the future only waits for the
    /// response.
    pub fn call_remote(&self, method: &str, args: Vec<Value>) -> RemoteCall {
        self.call_remote_with(method, args, Map::new())
    }

    /// Like [`call_remote`](Self::call_remote), with named arguments too.
    pub fn call_remote_with(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> RemoteCall {
        let (reply, rx) = oneshot::channel();
        let sent = self.send(Command::CallRemote {
            method: method.to_owned(),
            args,
            kwargs,
            reply,
        });
        RemoteCall { rx: sent.ok().map(|()| rx) }
    }

    /// Resolves with the reason once the session disconnects. Never resolves
    /// for a session that is never activated.
    pub fn notify_on_disconnect(&self) -> DisconnectNotice {
        let (reply, rx) = oneshot::channel();
        let sent = self.send(Command::NotifyOnDisconnect { reply });
        DisconnectNotice { rx: sent.ok().map(|()| rx) }
    }

    /// Hand the session a bodiless long-poll request.
    pub fn offer_slot(&self) -> Result<SlotReply, SessionError> {
        let (slot, reply) = TransportSlot::open();
        self.send(Command::OfferSlot { slot })?;
        Ok(reply)
    }

    /// Hand the session a basket the client posted.
    pub async fn receive_basket(&self, basket: Basket) -> Result<SlotReply, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReceiveBasket { basket, reply })?;
        rx.await.map_err(|_| SessionError::Gone)
    }

    /// Close the channel and disconnect.
    pub async fn close(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { reply })?;
        rx.await.map_err(|_| SessionError::Gone)?
    }

    /// Inspect the session.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply })?;
        rx.await.map_err(|_| SessionError::Gone)
    }

    /// Resolves once the session task has exited, whatever the cause.
    pub async fn stopped(&self) {
        self.tx.closed().await;
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.tx.send(command).map_err(|_| SessionError::Gone)
    }

    fn downgrade(&self) -> WeakSessionHandle {
        WeakSessionHandle {
            tx: self.tx.downgrade(),
            next_object: Arc::clone(&self.next_object),
            client_id: Arc::clone(&self.client_id),
        }
    }
}

/// Handle that does not keep the session task alive.
pub(crate) struct WeakSessionHandle {
    tx: mpsc::WeakUnboundedSender<Command>,
    next_object: Arc<AtomicU64>,
    client_id: Arc<OnceLock<ClientId>>,
}

impl WeakSessionHandle {
    pub(crate) fn upgrade(&self) -> Option<SessionHandle> {
        Some(SessionHandle {
            tx: self.tx.upgrade()?,
            next_object: Arc::clone(&self.next_object),
            client_id: Arc::clone(&self.client_id),
        })
    }
}

/// Pending result of [`SessionHandle::call_remote`].
#[derive(Debug)]
pub struct RemoteCall {
    rx: Option<oneshot::Receiver<Result<Value, CallError>>>,
}

impl Future for RemoteCall {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Err(CallError::SessionGone));
        };
        Pin::new(rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(CallError::SessionGone)))
    }
}

/// Pending result of [`SessionHandle::notify_on_disconnect`].
#[derive(Debug)]
pub struct DisconnectNotice {
    rx: Option<oneshot::Receiver<DisconnectReason>>,
}

impl Future for DisconnectNotice {
    type Output = DisconnectReason;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(reason)) => Poll::Ready(reason),
            // Dropped without a reason: the session ended without ever
            // being activated.
            Poll::Ready(Err(_)) => {
                self.rx = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) type InFlight = FuturesUnordered<BoxFuture<'static, (RequestId, CallOutcome)>>;

/// Session state other than the channel. Kept apart from the channel so the
/// channel can lend itself to the dispatcher while delivering.
pub(crate) struct SessionCore {
    pub(crate) objects: LocalObjectTable,
    pub(crate) pending: PendingCallTable,
    pub(crate) in_flight: InFlight,
    pub(crate) state: SessionState,
    waiters: Vec<oneshot::Sender<DisconnectReason>>,
    pub(crate) handle: WeakSessionHandle,
}

impl SessionCore {
    fn new(root: Arc<dyn Addressable>, handle: WeakSessionHandle) -> Self {
        Self {
            objects: LocalObjectTable::with_root(root),
            pending: PendingCallTable::default(),
            in_flight: FuturesUnordered::new(),
            state: SessionState::Initial,
            waiters: Vec::new(),
            handle,
        }
    }

    fn was_activated(&self) -> bool {
        self.handle.client_id.get().is_some()
    }

    fn activate(
        &mut self,
        channel: &mut MessageChannel,
        location: &str,
    ) -> Result<Activation, SessionError> {
        match self.state {
            SessionState::Initial => {}
            SessionState::Connected => return Err(SessionError::AlreadyActivated),
            SessionState::Disconnected(_) if self.was_activated() => {
                return Err(SessionError::AlreadyActivated);
            }
            SessionState::Disconnected(_) => {
                return Err(SessionError::Channel(ChannelError::AlreadyClosed));
            }
        }

        let client_id = ClientId::generate();
        let _ = self.handle.client_id.set(client_id.clone());
        let _ = Span::current().record("client_id", client_id.as_str());
        self.state = SessionState::Connected;
        channel.start();

        let base = location.trim_end_matches('/');
        let activation = Activation {
            input_url: format!("{base}/{client_id}/input"),
            output_url: format!("{base}/{client_id}/output"),
            client_id,
        };
        info!(input_url = %activation.input_url, "session activated");
        Ok(activation)
    }

    fn call_remote(
        &mut self,
        channel: &mut MessageChannel,
        method: String,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        reply: oneshot::Sender<Result<Value, CallError>>,
    ) {
        if let SessionState::Disconnected(reason) = self.state {
            let _ = reply.send(Err(CallError::Disconnected(reason)));
            return;
        }
        let request_id = self.pending.register(reply);
        debug!(%request_id, method, "calling client");
        let _ = channel.enqueue(Action::Call(Call {
            method,
            request_id,
            target: ObjectId::ROOT,
            args,
            kwargs,
        }));
    }

    fn add_waiter(&mut self, reply: oneshot::Sender<DisconnectReason>) {
        match self.state {
            SessionState::Disconnected(reason) if self.was_activated() => {
                let _ = reply.send(reason);
            }
            // Never activated: drop the sender so the notice stays pending.
            SessionState::Disconnected(_) => {}
            SessionState::Initial | SessionState::Connected => self.waiters.push(reply),
        }
    }

    fn close(&mut self, channel: &mut MessageChannel) -> Result<(), SessionError> {
        channel.close()?;
        self.disconnect(channel, DisconnectReason::Closed);
        Ok(())
    }

    /// Enter the terminal state: fail pending calls, drop local objects and
    /// wake everyone waiting for the disconnect.
    pub(crate) fn disconnect(&mut self, channel: &mut MessageChannel, reason: DisconnectReason) {
        if matches!(self.state, SessionState::Disconnected(_)) {
            return;
        }
        self.state = SessionState::Disconnected(reason);

        let rejected = self.pending.reject_all(&CallError::Disconnected(reason));
        let abandoned = self.in_flight.len();
        self.in_flight = FuturesUnordered::new();
        self.objects.clear();
        if !channel.is_stopped() {
            let _ = channel.close();
        }

        let waiters = std::mem::take(&mut self.waiters);
        if self.was_activated() {
            for waiter in waiters {
                let _ = waiter.send(reason);
            }
        }
        info!(reason = reason.kind(), rejected, abandoned, "session disconnected");
    }

    fn handle_events(&mut self, channel: &mut MessageChannel) {
        for event in channel.drain_events() {
            match event {
                ChannelEvent::Connected => debug!("client connected"),
                ChannelEvent::ConnectFailed => {
                    self.disconnect(channel, DisconnectReason::ConnectFailed);
                }
                ChannelEvent::ConnectionLost => {
                    self.disconnect(channel, DisconnectReason::ConnectionLost);
                }
            }
        }
    }
}

struct SessionActor {
    rx: mpsc::UnboundedReceiver<Command>,
    channel: MessageChannel,
    core: SessionCore,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let deadline = self.channel.next_deadline();
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        if self.core.state == SessionState::Connected {
                            debug!("every handle dropped");
                            self.core.disconnect(&mut self.channel, DisconnectReason::Closed);
                        }
                        break;
                    }
                },
                Some((request_id, outcome)) = self.core.in_flight.next(), if !self.core.in_flight.is_empty() => {
                    self.core.respond(&mut self.channel, request_id, outcome);
                }
                () = wait_until(deadline) => {
                    self.channel.poll_timers(Instant::now());
                }
            }
            self.core.handle_events(&mut self.channel);
        }
        debug!("session task finished");
    }

    fn handle(&mut self, command: Command) {
        let Self { channel, core, .. } = self;
        match command {
            Command::Activate { location, reply } => {
                let _ = reply.send(core.activate(channel, &location));
            }
            Command::AddObject { id, object } => {
                if matches!(core.state, SessionState::Disconnected(_)) {
                    debug!(%id, "session disconnected, not adding object");
                } else {
                    core.objects.insert(id, object);
                }
            }
            Command::RemoveObject { id } => {
                if !core.objects.remove(id) {
                    debug!(%id, "no removable object with this id");
                }
            }
            Command::CallRemote {
                method,
                args,
                kwargs,
                reply,
            } => core.call_remote(channel, method, args, kwargs, reply),
            Command::NotifyOnDisconnect { reply } => core.add_waiter(reply),
            Command::OfferSlot { slot } => channel.offer_transport_slot(slot),
            Command::ReceiveBasket { basket, reply } => {
                let Basket { ack, messages } = basket;
                let slot = channel.receive_basket(ack, messages, core);
                let _ = reply.send(slot);
            }
            Command::Close { reply } => {
                let _ = reply.send(core.close(channel));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(SessionSnapshot {
                    state: core.state,
                    client_id: core.handle.client_id.get().cloned(),
                    queued: channel.queued(),
                    open_slots: channel.open_slots(),
                    pending_calls: core.pending.len(),
                    in_flight: core.in_flight.len(),
                    local_objects: core.objects.len(),
                });
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tether_core::{ApplicationError, Message, Respond};

    use crate::addressable::{CallArgs, ExposedMethods, MethodHandler, Reply};

    // ── Helpers ─────────────────────────────────────────────────────

    struct Exploder;

    #[async_trait]
    impl MethodHandler for Exploder {
        async fn invoke(&self, _args: CallArgs) -> Result<Reply, ApplicationError> {
            panic!("kaboom")
        }
    }

    fn root() -> Arc<dyn Addressable> {
        let mut obj = ExposedMethods::new();
        let _ = obj
            .expose_fn("add", |args: CallArgs| async move {
                let sum = args.require_f64(0)? + args.require_f64(1)?;
                Ok::<_, ApplicationError>(Reply::Value(json!(sum)))
            })
            .expose_fn("fail", |_args: CallArgs| async {
                Err::<Reply, _>(ApplicationError::new("ValueError", "negative"))
            })
            .expose_fn("slow", |_args: CallArgs| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ApplicationError>(Reply::Value(json!("done")))
            })
            .expose_fn("away", |_args: CallArgs| async {
                Ok::<_, ApplicationError>(Reply::Redirect("/bye".into()))
            })
            .expose_fn("whoami", |args: CallArgs| async move {
                let id = args.session.and_then(|s| s.client_id());
                Ok::<_, ApplicationError>(Reply::Value(json!(id.map(|c| c.to_string()))))
            })
            .expose("explode", Exploder);
        Arc::new(obj)
    }

    async fn activated() -> (SessionHandle, Activation) {
        let handle = Session::create(root(), ChannelTimeouts::default());
        let activation = handle.activate("/live").await.unwrap();
        (handle, activation)
    }

    fn call(seq: i64, method: &str, target: u64, args: Vec<Value>) -> Message {
        Message::sequenced(
            seq,
            Action::Call(Call {
                method: method.into(),
                request_id: RequestId::from_raw(format!("c2s{seq}")),
                target: ObjectId(target),
                args,
                kwargs: Map::new(),
            }),
        )
    }

    async fn exchange(handle: &SessionHandle, ack: i64, messages: Vec<Message>) -> Basket {
        let reply = handle
            .receive_basket(Basket { ack, messages })
            .await
            .unwrap();
        reply.await.unwrap()
    }

    fn responds(basket: &Basket) -> Vec<Respond> {
        basket
            .messages
            .iter()
            .filter_map(|m| match &m.payload {
                Action::Respond(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    // ── Activation ──────────────────────────────────────────────────

    #[tokio::test]
    async fn activate_assigns_client_id_and_urls() {
        let (handle, activation) = activated().await;
        let id = activation.client_id.clone();
        assert!(id.as_str().starts_with("client_"));
        assert_eq!(activation.input_url, format!("/live/{id}/input"));
        assert_eq!(activation.output_url, format!("/live/{id}/output"));
        assert_eq!(handle.client_id(), Some(id));

        let err = handle.activate("/live").await.unwrap_err();
        assert_eq!(err, SessionError::AlreadyActivated);
    }

    #[tokio::test]
    async fn activation_serializes_camel_case() {
        let (_handle, activation) = activated().await;
        let value = serde_json::to_value(&activation).unwrap();
        assert_eq!(value["clientId"], json!(activation.client_id.as_str()));
        assert!(value["inputUrl"].as_str().unwrap().ends_with("/input"));
    }

    // ── Server-to-client calls ──────────────────────────────────────

    #[tokio::test]
    async fn call_remote_resolves_with_respond() {
        let (handle, _) = activated().await;
        let output = handle.offer_slot().unwrap();
        let pending = handle.call_remote("foo", vec![json!(1), json!(2)]);

        let basket = output.await.unwrap();
        assert_eq!(
            basket.messages,
            vec![Message::sequenced(
                0,
                Action::Call(Call {
                    method: "foo".into(),
                    request_id: RequestId::from_raw("s2c0"),
                    target: ObjectId::ROOT,
                    args: vec![json!(1), json!(2)],
                    kwargs: Map::new(),
                })
            )]
        );

        let respond = Action::Respond(Respond {
            request_id: RequestId::from_raw("s2c0"),
            success: true,
            result: json!("ok"),
        });
        let _reply = handle
            .receive_basket(Basket {
                ack: 0,
                messages: vec![Message::sequenced(0, respond)],
            })
            .await
            .unwrap();
        assert_eq!(pending.await, Ok(json!("ok")));
    }

    #[tokio::test]
    async fn failed_respond_rejects_the_call() {
        let (handle, _) = activated().await;
        let pending = handle.call_remote("foo", vec![]);
        let respond = Action::Respond(Respond {
            request_id: RequestId::from_raw("s2c0"),
            success: false,
            result: json!(["ValueError", "bad"]),
        });
        let _reply = handle
            .receive_basket(Basket {
                ack: 0,
                messages: vec![Message::sequenced(0, respond)],
            })
            .await
            .unwrap();
        assert_eq!(
            pending.await,
            Err(CallError::Remote(ApplicationError::new("ValueError", "bad")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn respond_for_unknown_request_is_ignored() {
        let (handle, _) = activated().await;
        let respond = Action::Respond(Respond {
            request_id: RequestId::from_raw("s2c99"),
            success: true,
            result: json!(null),
        });
        // Nothing to send back, so the reply is held until the idle timeout.
        let basket = exchange(&handle, -1, vec![Message::sequenced(0, respond)]).await;
        assert_eq!(basket, Basket::empty(0));
    }

    // ── Client-to-server calls ──────────────────────────────────────

    #[tokio::test]
    async fn ready_result_rides_in_the_reply_basket() {
        let (handle, _) = activated().await;
        let basket = exchange(&handle, -1, vec![call(0, "add", 0, vec![json!(2), json!(3)])]).await;
        assert_eq!(basket.ack, 0);
        assert_eq!(
            responds(&basket),
            vec![Respond {
                request_id: RequestId::from_raw("c2s0"),
                success: true,
                result: json!(5.0),
            }]
        );
    }

    #[tokio::test]
    async fn unknown_method_or_target_fails_the_call() {
        let (handle, _) = activated().await;
        let basket = exchange(
            &handle,
            -1,
            vec![call(0, "nope", 0, vec![]), call(1, "add", 9, vec![])],
        )
        .await;
        let results = responds(&basket);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));
        assert_eq!(results[0].result, json!(["NoSuchMethod", "no such method: nope"]));
        assert_eq!(results[1].result, json!(["NoSuchMethod", "no such method: add"]));
    }

    #[tokio::test]
    async fn handler_errors_and_panics_fail_the_call() {
        let (handle, _) = activated().await;
        let basket = exchange(
            &handle,
            -1,
            vec![call(0, "fail", 0, vec![]), call(1, "explode", 0, vec![])],
        )
        .await;
        let results = responds(&basket);
        assert_eq!(results[0].result, json!(["ValueError", "negative"]));
        assert!(!results[1].success);
        assert_eq!(results[1].result[0], json!("Panic"));
        assert_eq!(results[1].result[1], json!("kaboom"));

        // The session survives.
        let basket = exchange(&handle, 1, vec![call(2, "add", 0, vec![json!(1), json!(1)])]).await;
        assert_eq!(responds(&basket)[0].result, json!(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn suspended_handler_answers_later() {
        let (handle, _) = activated().await;
        let reply = handle
            .receive_basket(Basket {
                ack: -1,
                messages: vec![call(0, "slow", 0, vec![])],
            })
            .await
            .unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.in_flight, 1);

        let basket = reply.await.unwrap();
        assert_eq!(responds(&basket)[0].result, json!("done"));
    }

    #[tokio::test]
    async fn redirect_is_encoded_as_success() {
        let (handle, _) = activated().await;
        let basket = exchange(&handle, -1, vec![call(0, "away", 0, vec![])]).await;
        let respond = &responds(&basket)[0];
        assert!(respond.success);
        assert_eq!(respond.result, json!({"redirect": "/bye"}));
    }

    #[tokio::test]
    async fn handlers_see_their_session() {
        let (handle, activation) = activated().await;
        let basket = exchange(&handle, -1, vec![call(0, "whoami", 0, vec![])]).await;
        assert_eq!(
            responds(&basket)[0].result,
            json!(activation.client_id.as_str())
        );
    }

    #[tokio::test]
    async fn replayed_call_runs_once() {
        let (handle, _) = activated().await;
        let runs = Arc::new(AtomicUsize::new(0));
        let mut counter = ExposedMethods::new();
        let seen = Arc::clone(&runs);
        let _ = counter.expose_fn("bump", move |_args: CallArgs| {
            let seen = Arc::clone(&seen);
            async move {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                Ok::<_, ApplicationError>(Reply::Value(json!(n)))
            }
        });
        let id = handle.add_local_object(Arc::new(counter));

        let first = exchange(&handle, -1, vec![call(0, "bump", id.0, vec![])]).await;
        let again = exchange(&handle, -1, vec![call(0, "bump", id.0, vec![])]).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        // The unacknowledged respond is retransmitted, not recomputed.
        assert_eq!(responds(&first), responds(&again));
    }

    #[tokio::test]
    async fn local_objects_come_and_go() {
        let (handle, _) = activated().await;
        let mut adder = ExposedMethods::new();
        let _ = adder.expose_fn("add", |_args: CallArgs| async {
            Ok::<_, ApplicationError>(Reply::Value(json!("child")))
        });
        let adder: Arc<dyn Addressable> = Arc::new(adder);

        let id = handle.add_local_object(Arc::clone(&adder));
        assert_eq!(id, ObjectId(1));
        let basket = exchange(&handle, -1, vec![call(0, "add", 1, vec![])]).await;
        assert_eq!(responds(&basket)[0].result, json!("child"));

        handle.remove_local_object(id);
        let basket = exchange(&handle, 0, vec![call(1, "add", 1, vec![])]).await;
        assert!(!responds(&basket)[0].success);

        // Ids are never reused.
        assert_eq!(handle.add_local_object(adder), ObjectId(2));
    }

    // ── Disconnection ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn notify_never_resolves_without_activation() {
        let handle = Session::create(root(), ChannelTimeouts::from_secs(1, 1, 1));
        let notice = handle.notify_on_disconnect();
        handle.close().await.unwrap();
        let waited = tokio::time::timeout(Duration::from_secs(3600), notice).await;
        assert!(waited.is_err());

        let late = handle.notify_on_disconnect();
        assert!(tokio::time::timeout(Duration::from_secs(60), late).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_disconnects_and_rejects_calls() {
        let handle = Session::create(root(), ChannelTimeouts::from_secs(1, 1, 10));
        let _ = handle.activate("/live").await.unwrap();
        let pending = handle.call_remote("foo", vec![]);
        let notice = handle.notify_on_disconnect();

        assert_eq!(notice.await, DisconnectReason::ConnectFailed);
        assert_eq!(
            pending.await,
            Err(CallError::Disconnected(DisconnectReason::ConnectFailed))
        );

        // Late subscribers resolve immediately.
        assert_eq!(handle.notify_on_disconnect().await, DisconnectReason::ConnectFailed);

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(
            snapshot.state,
            SessionState::Disconnected(DisconnectReason::ConnectFailed)
        );
        assert_eq!(snapshot.local_objects, 0);
        assert_eq!(snapshot.pending_calls, 0);

        let late = handle.call_remote("foo", vec![]).await;
        assert_eq!(late, Err(CallError::Disconnected(DisconnectReason::ConnectFailed)));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_transport_disconnects() {
        let handle = Session::create(root(), ChannelTimeouts::from_secs(2, 1, 10));
        let _ = handle.activate("/live").await.unwrap();
        let notice = handle.notify_on_disconnect();

        // Connect, then let the only slot go by answering it.
        let output = handle.offer_slot().unwrap();
        let _pending = handle.call_remote("foo", vec![]);
        let _ = output.await.unwrap();

        assert_eq!(notice.await, DisconnectReason::ConnectionLost);
    }

    #[tokio::test]
    async fn peer_close_tears_down_the_channel() {
        let (handle, _) = activated().await;
        let notice = handle.notify_on_disconnect();
        let output = handle.offer_slot().unwrap();

        let basket = exchange(&handle, -1, vec![Message::sequenced(0, Action::Close)]).await;
        assert_eq!(basket.messages, vec![Message::sequenced(0, Action::Close)]);
        assert_eq!(output.await.unwrap().messages, basket.messages);
        assert_eq!(notice.await, DisconnectReason::ClosedByPeer);

        // Later slots get the sentinel right away.
        let late = handle.offer_slot().unwrap().await.unwrap();
        assert_eq!(late.messages, vec![Message::sequenced(0, Action::Close)]);
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let (handle, _) = activated().await;
        let notice = handle.notify_on_disconnect();
        handle.close().await.unwrap();
        assert_eq!(notice.await, DisconnectReason::Closed);
        assert_eq!(
            handle.close().await,
            Err(SessionError::Channel(ChannelError::AlreadyClosed))
        );
        assert_eq!(
            handle.activate("/live").await,
            Err(SessionError::AlreadyActivated)
        );
    }

    #[tokio::test]
    async fn dropping_every_handle_closes_the_session() {
        let (handle, _) = activated().await;
        let notice = handle.notify_on_disconnect();
        drop(handle);
        assert_eq!(notice.await, DisconnectReason::Closed);
    }

    #[tokio::test]
    async fn unload_runs_before_anything_else() {
        let (handle, _) = activated().await;
        let notice = handle.notify_on_disconnect();
        let _ = exchange(
            &handle,
            -1,
            vec![
                Message::unload(Action::Close),
                call(0, "add", 0, vec![json!(1), json!(2)]),
            ],
        )
        .await;
        assert_eq!(notice.await, DisconnectReason::ClosedByPeer);
    }
}
