//! Identifier types.
//!
//! String identifiers are branded newtypes so a client id can never be passed
//! where a request id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Opaque id handed to the client when its session is activated. The
    /// client presents it on every transport request.
    ClientId
);

branded_id!(
    /// Correlates a `call` with its `respond`. Unique per session and
    /// direction; server-originated ids look like `s2c0`, `s2c1`, ...
    RequestId
);

impl ClientId {
    /// Generate a fresh, time-ordered client id.
    pub fn generate() -> Self {
        Self(format!("client_{}", Uuid::now_v7().simple()))
    }
}

impl RequestId {
    /// Prefix for requests the server sends to the client.
    pub const SERVER_PREFIX: &'static str = "s2c";

    /// Request id for the `counter`-th server-to-client call.
    pub fn server(counter: u64) -> Self {
        Self(format!("{}{counter}", Self::SERVER_PREFIX))
    }
}

/// Key into a session's local object table.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// The session's root object. Always present while the session lives.
    pub const ROOT: Self = Self(0);

    /// Whether this id addresses the root object.
    pub const fn is_root(self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
