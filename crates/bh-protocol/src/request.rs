//! Dial request identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier correlating a dial request with the reply stream that answers it.
///
/// Allocated per tunnel in strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Whether this is the reserved control ID
    pub fn is_control(&self) -> bool {
        *self == Self::CONTROL
    }

    /// Reserved ID for frames not bound to a dial (hello, keepalive, ...)
    pub const CONTROL: RequestId = RequestId(0);
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request-{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}
