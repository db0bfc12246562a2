//! Identifier types shared across the Hearth layers.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Server-assigned identifier of a player session.
///
/// Allocated once per uid and stable for the lifetime of the process, so a
/// reconnecting client gets the same `PlayerId` back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// Identifier of a room, assigned monotonically by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// External, durable identity key returned by the authenticator.
///
/// Unlike [`PlayerId`], the uid comes from outside the server and survives
/// reconnects and restarts. Rooms key their member sets and ban lists by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub String);

impl Uid {
    /// Borrows the uid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Uid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display() {
        assert_eq!(PlayerId(42).to_string(), "P-42");
        assert_eq!(RoomId(7).to_string(), "R-7");
        assert_eq!(Uid::from("steam:1").to_string(), "steam:1");
    }

    #[test]
    fn test_ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&RoomId(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Uid::from("abc")).unwrap(), "\"abc\"");
        let back: PlayerId = serde_json::from_str("9").unwrap();
        assert_eq!(back, PlayerId(9));
    }
}
