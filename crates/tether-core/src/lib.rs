//! # tether-core
//!
//! Types shared by every layer of the long-poll session stack:
//!
//! - [`ids`]: client, request and local-object identifiers
//! - [`protocol`]: baskets, messages and the action payloads they carry
//! - [`errors`]: disconnect reasons and call failures

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::{ApplicationError, CallError, DisconnectReason, NoSuchMethod, ProtocolError};
pub use ids::{ClientId, ObjectId, RequestId};
pub use protocol::{Action, Basket, Call, Message, Respond, Seq, Sequence};
