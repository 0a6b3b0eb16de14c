use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle to a link or application face.
///
/// The core never looks behind the identifier; it is only used as a map key, as
/// the next hop of a FIB entry and as the face attached to every trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(pub u32);

impl FaceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u32 {
        self.0
    }
}

impl From<u32> for FaceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face={}", self.0)
    }
}
