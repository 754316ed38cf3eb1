//! Opaque identifiers for streams, records and authors.
//!
//! All three are snowflake-style `u64`s: ordered by creation time, so a larger
//! id is always newer. The record store hands them out; nothing in this crate
//! mints ids except the in-memory store.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake_id!(
    /// A stream of records (a channel, or a thread attached to a record)
    StreamId
);
snowflake_id!(
    /// One record within a stream
    RecordId
);
snowflake_id!(
    /// The author of a record, or the actor behind an interaction
    UserId
);

impl RecordId {
    /// The stream that a sub-stream started from this record would get.
    ///
    /// Threads created from a message share the message's snowflake.
    pub fn as_substream(self) -> StreamId {
        StreamId(self.0)
    }
}
