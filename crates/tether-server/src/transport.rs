//! Bootstrap and long-poll transport handlers.

use axum::{BoxError, Json};
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::stream;
use tether_channel::SlotReply;
use tether_core::{Basket, ClientId};
use tether_session::{Activation, Session, SessionHandle};
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::server::AppState;

const NO_CACHE: [(header::HeaderName, &str); 2] = [
    (header::CACHE_CONTROL, "no-store"),
    (header::PRAGMA, "no-cache"),
];

/// POST {mount}: create a session for a new page and activate it.
pub(crate) async fn bootstrap(State(state): State<AppState>) -> Result<impl IntoResponse, ServerError> {
    let handle = Session::create((state.root_factory)(), state.timeouts);
    let activation: Activation = state.sessions.activate(handle, &state.mount_path).await?;
    debug!(client_id = %activation.client_id, "session bootstrapped");
    Ok((NO_CACHE, Json(activation)))
}

/// POST {mount}/{client_id}/input: deliver a basket, reply with the next one.
pub(crate) async fn input(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    body: Bytes,
) -> Result<Response, ServerError> {
    let session = lookup(&state, client_id)?;
    let basket = Basket::from_slice(&body)?;
    debug!(ack = basket.ack, messages = basket.messages.len(), "basket received");
    let reply = session.receive_basket(basket).await?;
    Ok(streamed(reply))
}

/// GET|POST {mount}/{client_id}/output: park a bodiless long-poll slot.
pub(crate) async fn output(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Response, ServerError> {
    let session = lookup(&state, client_id)?;
    let reply = session.offer_slot()?;
    Ok(streamed(reply))
}

fn lookup(state: &AppState, client_id: String) -> Result<SessionHandle, ServerError> {
    let client_id = ClientId::from_raw(client_id);
    state
        .sessions
        .get(&client_id)
        .ok_or(ServerError::UnknownClient(client_id))
}

/// Respond at once with headers and stream the basket when the slot is answered.
fn streamed(reply: SlotReply) -> Response {
    let body = stream::once(async move {
        let basket = reply.await.map_err(|err| {
            debug!(error = %err, "slot dropped without an answer");
            BoxError::from(err)
        })?;
        basket.to_vec().map(Bytes::from).map_err(|err| {
            warn!(error = %err, "basket encoding failed");
            BoxError::from(err)
        })
    });
    (
        NO_CACHE,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(body),
    )
        .into_response()
}
