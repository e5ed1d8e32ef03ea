//! # tether-session
//!
//! One [`Session`] per connected client. Each session runs as its own tokio
//! task that owns a [`MessageChannel`](tether_channel::MessageChannel), the
//! table of objects the client may call into, and the table of calls the
//! server is waiting on. Everything else talks to it through a cheap,
//! cloneable [`SessionHandle`].
//!
//! The [`SessionRegistry`] indexes activated sessions by client id for the
//! transport layer.

#![deny(unsafe_code)]

pub mod addressable;
mod dispatcher;
pub mod error;
mod objects;
mod pending;
pub mod registry;
pub mod session;

pub use addressable::{Addressable, CallArgs, CallOutcome, Callable, ExposedMethods, MethodHandler, Reply};
pub use error::SessionError;
pub use registry::SessionRegistry;
pub use session::{Activation, DisconnectNotice, RemoteCall, Session, SessionHandle, SessionSnapshot, SessionState};
