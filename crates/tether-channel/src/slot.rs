//! Transport slots: answer-pending client requests.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tether_core::Basket;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::ChannelError;

/// One open client request waiting for a basket.
///
/// Owned by the channel while open and answered exactly once: answering
/// consumes the slot.
#[derive(Debug)]
pub struct TransportSlot {
    tx: oneshot::Sender<Basket>,
    pub(crate) idle_deadline: Option<Instant>,
}

impl TransportSlot {
    /// Open a slot. The [`SlotReply`] resolves with whatever basket the slot
    /// is eventually answered with.
    pub fn open() -> (Self, SlotReply) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx,
                idle_deadline: None,
            },
            SlotReply { rx },
        )
    }

    /// Whether the requester has gone away (its [`SlotReply`] was dropped).
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Answer the slot. Returns `false` if nobody was listening anymore.
    pub(crate) fn answer(self, basket: Basket) -> bool {
        self.tx.send(basket).is_ok()
    }
}

/// The eventual answer to a [`TransportSlot`].
#[derive(Debug)]
pub struct SlotReply {
    rx: oneshot::Receiver<Basket>,
}

impl SlotReply {
    /// A reply that is already answered.
    pub fn ready(basket: Basket) -> Self {
        let (slot, reply) = TransportSlot::open();
        let _ = slot.answer(basket);
        reply
    }

    /// Take the answer if it has already been given.
    pub fn try_take(&mut self) -> Option<Basket> {
        self.rx.try_recv().ok()
    }
}

impl Future for SlotReply {
    type Output = Result<Basket, ChannelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| ChannelError::SlotAbandoned))
    }
}
