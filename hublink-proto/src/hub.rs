//! Hub classes and their transport constraints.

use crate::CONSTRAINED_MTU_WRITE;

/// Hub class, as identified by its LWP3 system type id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HubKind {
    /// BOOST Move hub. Fixed 23-byte BLE MTU.
    Move,
    /// City hub.
    City,
    /// Technic medium hub.
    Technic,
    /// SPIKE Prime / MINDSTORMS Inventor hub.
    Prime,
    /// SPIKE Essential hub.
    Essential,
}

impl HubKind {
    /// Maps an LWP3 system type id to a hub class.
    pub const fn from_system_id(id: u8) -> Option<Self> {
        match id {
            0x40 => Some(Self::Move),
            0x41 => Some(Self::City),
            0x80 => Some(Self::Technic),
            0x81 => Some(Self::Prime),
            0x83 => Some(Self::Essential),
            _ => None,
        }
    }

    /// Largest single transport write, if the hub limits it.
    pub const fn max_write(self) -> Option<usize> {
        match self {
            Self::Move => Some(CONSTRAINED_MTU_WRITE),
            _ => None,
        }
    }
}
