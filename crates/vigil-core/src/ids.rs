use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
    ($name:ident, $prefix:expr) => {
        branded_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// Row keys are SQLite integer primary keys and travel as JSON integers.
macro_rules! numeric_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

numeric_id!(UserId);
numeric_id!(ConversationId);
numeric_id!(MessageId);

branded_id!(ConnectionId, "conn");
branded_id!(ThreadId);

impl ThreadId {
    /// Mint the upstream thread key for a new conversation owned by `user`.
    ///
    /// Keeps the `user_{id}_` shape the agent service logs by, with a UUIDv7
    /// suffix instead of a wall-clock second so two conversations minted in
    /// the same instant never collide.
    pub fn mint(user: UserId) -> Self {
        Self(format!("user_{}_{}", user, Uuid::now_v7().simple()))
    }

    /// Whether this key has the `user_{id}_{suffix}` shape `mint` produces.
    /// Threads of any other shape were written by someone else.
    pub fn is_minted(&self) -> bool {
        let Some(rest) = self.0.strip_prefix("user_") else {
            return false;
        };
        match rest.split_once('_') {
            Some((user, suffix)) => {
                !user.is_empty() && user.bytes().all(|b| b.is_ascii_digit()) && !suffix.is_empty()
            }
            None => false,
        }
    }
}
