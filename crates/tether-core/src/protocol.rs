//! Wire format for the long-poll channel.
//!
//! Every transport exchange carries one [`Basket`], encoded as
//! `[ack, [[seq, payload], ...]]`. Payloads are `[action, args]` pairs:
//!
//! ```text
//! ["call",    [method, requestId, targetId, posArgs, namedArgs]]
//! ["respond", [requestId, success, result]]
//! ["noop",    []]
//! ["close",   []]
//! ```
//!
//! The client may put the string `"unload"` in place of a sequence number on
//! the first message of a basket to announce page teardown.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::errors::ProtocolError;
use crate::ids::{ObjectId, RequestId};

/// Per-direction message sequence number. `-1` means "nothing yet".
pub type Seq = i64;

/// Acknowledgement value before anything has been processed.
pub const NOTHING_ACKED: Seq = -1;

/// Marker used in place of a sequence number for the teardown message.
pub const UNLOAD: &str = "unload";

/// Sequence slot of a message: a number, or the teardown marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sequence {
    /// Regular, ordered message.
    Number(Seq),
    /// Page teardown; delivered ahead of any sequencing logic.
    Unload,
}

impl Sequence {
    /// The numeric sequence, if this is not the teardown marker.
    pub const fn number(self) -> Option<Seq> {
        match self {
            Self::Number(n) => Some(n),
            Self::Unload => None,
        }
    }
}

impl Serialize for Sequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::Unload => serializer.serialize_str(UNLOAD),
        }
    }
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(Seq),
            Tag(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Number(n)),
            Raw::Tag(tag) if tag == UNLOAD => Ok(Self::Unload),
            Raw::Tag(tag) => Err(D::Error::custom(format!("invalid sequence marker: {tag}"))),
        }
    }
}

/// One sequenced payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Sender-assigned position in the stream.
    pub seq: Sequence,
    /// What the receiver should do.
    pub payload: Action,
}

impl Message {
    /// A regular message at position `seq`.
    pub const fn sequenced(seq: Seq, payload: Action) -> Self {
        Self {
            seq: Sequence::Number(seq),
            payload,
        }
    }

    /// The teardown message.
    pub const fn unload(payload: Action) -> Self {
        Self {
            seq: Sequence::Unload,
            payload,
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.seq, &self.payload).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (seq, payload) = <(Sequence, Action)>::deserialize(deserializer)?;
        Ok(Self { seq, payload })
    }
}

/// The unit exchanged per transport request, in either direction.
#[derive(Clone, Debug, PartialEq)]
pub struct Basket {
    /// Highest sequence number the sender has fully processed from the peer.
    pub ack: Seq,
    /// Messages in ascending sequence order.
    pub messages: Vec<Message>,
}

impl Basket {
    /// A basket that carries only an acknowledgement.
    pub const fn empty(ack: Seq) -> Self {
        Self {
            ack,
            messages: Vec::new(),
        }
    }

    /// Decode a basket from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(ProtocolError::from)
    }

    /// Encode the basket as JSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(ProtocolError::from)
    }

    /// Numeric sequence numbers carried by this basket.
    pub fn sequence_numbers(&self) -> Vec<Seq> {
        self.messages.iter().filter_map(|m| m.seq.number()).collect()
    }
}

impl Serialize for Basket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.ack, &self.messages).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Basket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (ack, messages) = <(Seq, Vec<Message>)>::deserialize(deserializer)?;
        Ok(Self { ack, messages })
    }
}

/// Invoke `method` on the object `target` of the receiving side.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// Exposed method name.
    pub method: String,
    /// Correlation id echoed back in the `respond`.
    pub request_id: RequestId,
    /// Local object the call is addressed to.
    pub target: ObjectId,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Named arguments.
    pub kwargs: Map<String, Value>,
}

/// Result of an earlier [`Call`].
#[derive(Clone, Debug, PartialEq)]
pub struct Respond {
    /// Id of the call being answered.
    pub request_id: RequestId,
    /// Whether `result` is a value or an encoded failure.
    pub success: bool,
    /// The value, or `[errorClass, message]` when `success` is false.
    pub result: Value,
}

/// Decoded payload of a channel message.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Remote procedure call.
    Call(Call),
    /// Response to a remote procedure call.
    Respond(Respond),
    /// Keep-alive; has no effect.
    Noop,
    /// The sender is tearing the channel down.
    Close,
}

impl Action {
    /// Wire name of the action.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Call(_) => "call",
            Self::Respond(_) => "respond",
            Self::Noop => "noop",
            Self::Close => "close",
        }
    }
}

const NO_ARGS: [Value; 0] = [];

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Call(call) => (
                self.name(),
                (
                    &call.method,
                    &call.request_id,
                    call.target,
                    &call.args,
                    &call.kwargs,
                ),
            )
                .serialize(serializer),
            Self::Respond(respond) => (
                self.name(),
                (&respond.request_id, respond.success, &respond.result),
            )
                .serialize(serializer),
            Self::Noop | Self::Close => (self.name(), NO_ARGS).serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, args) = <(String, Value)>::deserialize(deserializer)?;
        match name.as_str() {
            "call" => {
                let (method, request_id, target, args, kwargs) =
                    serde_json::from_value::<(String, RequestId, ObjectId, Vec<Value>, Map<String, Value>)>(
                        args,
                    )
                    .map_err(D::Error::custom)?;
                Ok(Self::Call(Call {
                    method,
                    request_id,
                    target,
                    args,
                    kwargs,
                }))
            }
            "respond" => {
                let (request_id, success, result) =
                    serde_json::from_value::<(RequestId, bool, Value)>(args)
                        .map_err(D::Error::custom)?;
                Ok(Self::Respond(Respond {
                    request_id,
                    success,
                    result,
                }))
            }
            "noop" => Ok(Self::Noop),
            "close" => Ok(Self::Close),
            other => Err(D::Error::custom(format!("unknown action: {other}"))),
        }
    }
}
