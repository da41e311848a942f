//! Twelve byte object identifiers.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use thiserror::Error;

/// Length of an object id rendered as hex.
pub const OBJECT_ID_HEX_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object id {value:?}: expected {OBJECT_ID_HEX_LEN} hex characters")]
pub struct ObjectIdError {
    pub value: String,
}

/// A 12 byte identifier: 4 byte big-endian timestamp (seconds), 5 bytes
/// unique to the process and a 3 byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

fn process_unique() -> &'static [u8; 5] {
    static UNIQUE: OnceLock<[u8; 5]> = OnceLock::new();
    UNIQUE.get_or_init(rand::random)
}

fn next_counter() -> u32 {
    static COUNTER: OnceLock<AtomicU32> = OnceLock::new();
    COUNTER
        .get_or_init(|| AtomicU32::new(rand::random::<u32>() & 0x00ff_ffff))
        .fetch_add(1, Ordering::SeqCst)
        & 0x00ff_ffff
}

impl ObjectId {
    /// Generate a new id for the current second.
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        let secs = Utc::now().timestamp() as u32;
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process_unique());
        bytes[9..].copy_from_slice(&next_counter().to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse a 24 character hex string.
    pub fn parse_str(s: &str) -> Result<Self, ObjectIdError> {
        let err = || ObjectIdError {
            value: s.to_string(),
        };
        if s.len() != OBJECT_ID_HEX_LEN {
            return Err(err());
        }
        let raw = hex::decode(s).map_err(|_| err())?;
        let bytes: [u8; 12] = raw.try_into().map_err(|_| err())?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}
