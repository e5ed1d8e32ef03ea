//! The message channel state machine.

use std::collections::VecDeque;

use metrics::counter;
use tether_core::protocol::NOTHING_ACKED;
use tether_core::{Action, Basket, Message, Seq, Sequence};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::ChannelTimeouts;
use crate::error::ChannelError;
use crate::slot::{SlotReply, TransportSlot};

/// Receiver of incoming payloads, normally the session that owns the channel.
///
/// The channel hands itself back so the sink can enqueue replies while the
/// channel is paused; those replies then leave in a single basket.
pub trait MessageSink {
    /// Process one accepted incoming payload.
    fn deliver(&mut self, channel: &mut MessageChannel, payload: Action);
}

/// Lifecycle notifications for the channel's owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The first transport slot ever arrived.
    Connected,
    /// No slot arrived within the connect timeout.
    ConnectFailed,
    /// The slot pool stayed empty for the no-transport timeout.
    ConnectionLost,
}

/// Reliable, ordered delivery over client-initiated transport slots.
#[derive(Debug)]
pub struct MessageChannel {
    timeouts: ChannelTimeouts,
    /// Sent but unacknowledged messages, ascending.
    outgoing: VecDeque<(Seq, Action)>,
    next_seq: Seq,
    /// Highest outgoing sequence the client has acknowledged.
    peer_ack: Seq,
    /// Highest incoming sequence accepted; this is the ack we send.
    last_accepted: Seq,
    /// Open slots, oldest first.
    slots: VecDeque<TransportSlot>,
    paused: u32,
    stopped: bool,
    connected: bool,
    connect_deadline: Option<Instant>,
    no_transport_deadline: Option<Instant>,
    events: Vec<ChannelEvent>,
}

impl MessageChannel {
    /// Create an idle channel. Timers do not run until [`start`](Self::start).
    pub fn new(timeouts: ChannelTimeouts) -> Self {
        Self {
            timeouts,
            outgoing: VecDeque::new(),
            next_seq: 0,
            peer_ack: NOTHING_ACKED,
            last_accepted: NOTHING_ACKED,
            slots: VecDeque::new(),
            paused: 0,
            stopped: false,
            connected: false,
            connect_deadline: None,
            no_transport_deadline: None,
            events: Vec::new(),
        }
    }

    /// Arm the connect timer.
    pub fn start(&mut self) {
        if !self.connected && !self.stopped {
            self.connect_deadline = Some(Instant::now() + self.timeouts.connect);
        }
    }

    /// Queue `payload` for delivery and return its sequence number.
    ///
    /// Sent at once to the oldest open slot unless paused. Dropped (returning
    /// `None`) once the channel is stopped.
    pub fn enqueue(&mut self, payload: Action) -> Option<Seq> {
        if self.stopped {
            trace!(action = payload.name(), "channel stopped, dropping outgoing message");
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outgoing.push_back((seq, payload));
        self.flush();
        Some(seq)
    }

    /// Hold back deliveries so a burst of enqueues leaves as one basket.
    pub fn pause(&mut self) {
        self.paused += 1;
    }

    /// Undo one [`pause`](Self::pause). At zero, flush queued messages and
    /// answer all but the newest idle slot.
    pub fn resume(&mut self) {
        debug_assert!(self.paused > 0, "resume without matching pause");
        self.paused = self.paused.saturating_sub(1);
        if self.paused == 0 {
            self.flush();
            self.trim_idle_slots();
        }
    }

    /// Register a newly opened transport slot.
    pub fn offer_transport_slot(&mut self, mut slot: TransportSlot) {
        if !self.connected {
            self.connected = true;
            self.connect_deadline = None;
            self.events.push(ChannelEvent::Connected);
            debug!("first transport slot offered");
        }
        self.prune_abandoned();
        self.no_transport_deadline = None;

        if self.stopped {
            self.answer(slot, self.current_basket());
            return;
        }

        if self.paused == 0 && !self.outgoing.is_empty() {
            self.answer(slot, self.current_basket());
            if self.slots.is_empty() {
                self.arm_no_transport();
            }
            return;
        }

        slot.idle_deadline = Some(Instant::now() + self.timeouts.idle_slot);
        self.slots.push_back(slot);
        if self.paused == 0 {
            self.trim_idle_slots();
        }
    }

    /// Process one incoming basket and return the future answer to the
    /// request that carried it.
    ///
    /// Acknowledged outgoing messages are discarded first. A leading unload
    /// message is delivered on its own. A basket that starts past the next
    /// expected sequence number is answered empty without dispatch. Otherwise
    /// every not-yet-seen message is delivered to `sink` with the channel
    /// paused, so anything the sink enqueues is coalesced.
    pub fn receive_basket<S>(&mut self, ack: Seq, incoming: Vec<Message>, sink: &mut S) -> SlotReply
    where
        S: MessageSink + ?Sized,
    {
        counter!("tether_baskets_total").increment(1);
        self.acknowledge(ack);

        let mut incoming = incoming.into_iter().peekable();
        let first = match incoming.peek() {
            None => return self.open_reply_slot(),
            Some(message) => message.seq,
        };

        match first {
            Sequence::Unload => {
                if let Some(unload) = incoming.next() {
                    debug!(action = unload.payload.name(), "delivering unload message");
                    sink.deliver(self, unload.payload);
                }
                let skipped = incoming.count();
                if skipped > 0 {
                    debug!(skipped, "ignoring messages trailing an unload");
                }
                return self.open_reply_slot();
            }
            Sequence::Number(first_seq) if first_seq.saturating_sub(1) > self.last_accepted => {
                counter!("tether_baskets_stale_total").increment(1);
                warn!(
                    first_seq,
                    last_accepted = self.last_accepted,
                    "basket skips ahead of the stream, answering without dispatch"
                );
                return SlotReply::ready(Basket::empty(self.last_accepted));
            }
            Sequence::Number(_) => {}
        }

        let messages: Vec<Message> = incoming.collect();
        let mut delivered = self.last_accepted;
        if let Some(highest) = messages.iter().filter_map(|m| m.seq.number()).max() {
            self.last_accepted = self.last_accepted.max(highest);
        }

        self.pause();
        for message in messages {
            match message.seq {
                Sequence::Number(seq) if seq > delivered => {
                    delivered = seq;
                    sink.deliver(self, message.payload);
                }
                Sequence::Number(seq) => {
                    counter!("tether_duplicates_total").increment(1);
                    debug!(seq, "duplicate message discarded");
                }
                Sequence::Unload => warn!("unload marker after the first message, discarded"),
            }
        }
        let reply = self.open_reply_slot();
        self.resume();
        reply
    }

    /// Queue the close sentinel, stop the channel and answer every open slot
    /// with the final queue.
    pub fn close(&mut self) -> Result<(), ChannelError> {
        if self.stopped {
            return Err(ChannelError::AlreadyClosed);
        }
        let _ = self.enqueue(Action::Close);
        self.stopped = true;
        self.connect_deadline = None;
        self.no_transport_deadline = None;

        let basket = self.current_basket();
        let open = self.slots.len();
        for slot in std::mem::take(&mut self.slots) {
            self.answer(slot, basket.clone());
        }
        debug!(open, "channel closed");
        Ok(())
    }

    /// Earliest pending timer deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slots
            .iter()
            .filter_map(|s| s.idle_deadline)
            .chain(self.connect_deadline)
            .chain(self.no_transport_deadline)
            .min()
    }

    /// Fire every timer whose deadline is at or before `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        self.prune_abandoned();

        if self.connect_deadline.is_some_and(|d| d <= now) {
            self.connect_deadline = None;
            warn!(timeout = ?self.timeouts.connect, "no transport slot within the connect timeout");
            self.events.push(ChannelEvent::ConnectFailed);
        }

        if self.no_transport_deadline.is_some_and(|d| d <= now) {
            self.no_transport_deadline = None;
            warn!(timeout = ?self.timeouts.no_transport, "transport lost");
            self.events.push(ChannelEvent::ConnectionLost);
        }

        let before = self.slots.len();
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut self.slots)
            .into_iter()
            .partition(|s| s.idle_deadline.is_some_and(|d| d <= now));
        self.slots = kept;
        for slot in expired {
            trace!("idle slot expired");
            self.answer(slot, Basket::empty(self.last_accepted));
        }
        if before > 0 && self.slots.is_empty() {
            self.arm_no_transport();
        }
    }

    /// Take the notifications accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<ChannelEvent> {
        std::mem::take(&mut self.events)
    }

    /// Whether the client has ever offered a slot.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether deliveries are currently held back.
    pub fn is_paused(&self) -> bool {
        self.paused > 0
    }

    /// Number of open slots.
    pub fn open_slots(&self) -> usize {
        self.slots.len()
    }

    /// Sequence numbers of unacknowledged outgoing messages.
    pub fn queued(&self) -> Vec<Seq> {
        self.outgoing.iter().map(|(seq, _)| *seq).collect()
    }

    /// Highest incoming sequence accepted so far.
    pub fn last_accepted(&self) -> Seq {
        self.last_accepted
    }

    /// Highest outgoing sequence acknowledged by the client.
    pub fn peer_ack(&self) -> Seq {
        self.peer_ack
    }

    fn acknowledge(&mut self, ack: Seq) {
        self.peer_ack = self.peer_ack.max(ack);
        let before = self.outgoing.len();
        while self.outgoing.front().is_some_and(|(seq, _)| *seq <= ack) {
            let _ = self.outgoing.pop_front();
        }
        let discarded = before - self.outgoing.len();
        if discarded > 0 {
            trace!(ack, discarded, "acknowledged outgoing messages");
        }
    }

    fn open_reply_slot(&mut self) -> SlotReply {
        let (slot, reply) = TransportSlot::open();
        self.offer_transport_slot(slot);
        reply
    }

    /// Send the whole queue to the oldest slot, if allowed and possible.
    fn flush(&mut self) {
        if self.paused > 0 || self.outgoing.is_empty() {
            return;
        }
        self.prune_abandoned();
        if let Some(slot) = self.slots.pop_front() {
            if self.slots.is_empty() {
                self.arm_no_transport();
            }
            self.answer(slot, self.current_basket());
        }
    }

    /// Keep only the newest idle slot; answer the rest empty.
    fn trim_idle_slots(&mut self) {
        while self.slots.len() > 1 {
            if let Some(slot) = self.slots.pop_front() {
                trace!("answering surplus idle slot");
                self.answer(slot, Basket::empty(self.last_accepted));
            }
        }
    }

    /// Drop slots whose requester has gone away.
    fn prune_abandoned(&mut self) {
        let before = self.slots.len();
        self.slots.retain(|s| !s.is_abandoned());
        let pruned = before - self.slots.len();
        if pruned > 0 {
            debug!(pruned, "pruned abandoned transport slots");
            if self.slots.is_empty() {
                self.arm_no_transport();
            }
        }
    }

    fn arm_no_transport(&mut self) {
        if !self.stopped {
            self.no_transport_deadline = Some(Instant::now() + self.timeouts.no_transport);
        }
    }

    fn current_basket(&self) -> Basket {
        Basket {
            ack: self.last_accepted,
            messages: self
                .outgoing
                .iter()
                .map(|(seq, action)| Message::sequenced(*seq, action.clone()))
                .collect(),
        }
    }

    fn answer(&self, slot: TransportSlot, basket: Basket) {
        let count = basket.messages.len();
        if !slot.answer(basket) {
            debug!(count, "slot requester went away before the answer");
        }
    }
}
