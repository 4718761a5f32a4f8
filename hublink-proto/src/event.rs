//! Status notifications sent from the hub to the host.
//!
//! Layout: one header byte naming the [`Event`] kind, then a kind-specific
//! payload. A status report carries a 4-byte little-endian [`StatusFlags`]
//! bitmask.

use crate::ProtoError;

/// Notification kind, the first byte of every control notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum Event {
    /// Periodic or on-change hub status bitmask.
    StatusReport = 0x00,
    /// Bytes written by the user program to stdout.
    WriteStdout = 0x01,
}

impl TryFrom<u8> for Event {
    type Error = ProtoError;

    fn try_from(b: u8) -> Result<Self, ProtoError> {
        match b {
            0x00 => Ok(Self::StatusReport),
            0x01 => Ok(Self::WriteStdout),
            other => Err(ProtoError::UnknownEvent(other)),
        }
    }
}

/// Bit positions within a status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum Status {
    /// Battery voltage is low.
    BatteryLowVoltageWarning = 0,
    /// Battery voltage is critically low; the hub will shut down.
    BatteryLowVoltageShutdown = 1,
    /// Battery current is too high.
    BatteryHighCurrent = 2,
    /// BLE advertising is on.
    BleAdvertising = 3,
    /// BLE signal strength is low.
    BleLowSignal = 4,
    /// The power button is held.
    PowerButtonPressed = 5,
    /// A user program is running.
    UserProgramRunning = 6,
    /// The hub is shutting down.
    Shutdown = 7,
    /// A shutdown was requested.
    ShutdownRequested = 8,
}

impl Status {
    /// The single-bit mask for this status.
    pub const fn flag(self) -> u32 {
        1 << self as u8
    }
}

/// Decoded status bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    /// Returns `true` if `status` is set.
    pub const fn contains(self, status: Status) -> bool {
        self.0 & status.flag() != 0
    }

    /// Returns `true` if the hub reports a running user program.
    pub const fn program_running(self) -> bool {
        self.contains(Status::UserProgramRunning)
    }

    /// Builds a bitmask from a list of set statuses.
    pub fn from_statuses(statuses: &[Status]) -> Self {
        Self(statuses.iter().fold(0, |acc, s| acc | s.flag()))
    }
}

/// A decoded control notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceEvent {
    /// The hub's current status flags.
    StatusReport(StatusFlags),
    /// Program stdout delivered out of band.
    WriteStdout(Vec<u8>),
}

impl DeviceEvent {
    /// Decodes one notification.
    pub fn decode(data: &[u8]) -> Result<Self, ProtoError> {
        let (&header, payload) = data.split_first().ok_or(ProtoError::Empty)?;
        match Event::try_from(header)? {
            Event::StatusReport => {
                let raw: [u8; 4] =
                    payload
                        .get(..4)
                        .and_then(|b| b.try_into().ok())
                        .ok_or(ProtoError::Truncated {
                            what: "status report",
                            expected: 4,
                            got: payload.len(),
                        })?;
                Ok(Self::StatusReport(StatusFlags(u32::from_le_bytes(raw))))
            }
            Event::WriteStdout => Ok(Self::WriteStdout(payload.to_vec())),
        }
    }

    /// Encodes this event with its header byte.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::StatusReport(flags) => {
                let mut out = Vec::with_capacity(5);
                out.push(Event::StatusReport as u8);
                out.extend_from_slice(&flags.0.to_le_bytes());
                out
            }
            Self::WriteStdout(data) => {
                let mut out = Vec::with_capacity(data.len() + 1);
                out.push(Event::WriteStdout as u8);
                out.extend_from_slice(data);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_running_is_bit_six() {
        assert_eq!(Status::UserProgramRunning.flag(), 0x40);
        assert!(StatusFlags(0x40).program_running());
        assert!(!StatusFlags(0x08).program_running());
    }

    #[test]
    fn decodes_status_report() {
        let ev = DeviceEvent::decode(&[0x00, 0x48, 0x00, 0x00, 0x00]).unwrap();
        let DeviceEvent::StatusReport(flags) = ev else {
            panic!("expected status report");
        };
        assert!(flags.program_running());
        assert!(flags.contains(Status::BleAdvertising));
        assert!(!flags.contains(Status::Shutdown));
    }

    #[test]
    fn encode_matches_decode_layout() {
        let ev = DeviceEvent::StatusReport(StatusFlags::from_statuses(&[
            Status::UserProgramRunning,
            Status::ShutdownRequested,
        ]));
        let wire = ev.encode();
        assert_eq!(wire, vec![0x00, 0x40, 0x01, 0x00, 0x00]);
        assert_eq!(DeviceEvent::decode(&wire).unwrap(), ev);
    }

    #[test]
    fn decodes_stdout_payload() {
        let ev = DeviceEvent::decode(b"\x01hi\r\n").unwrap();
        assert_eq!(ev, DeviceEvent::WriteStdout(b"hi\r\n".to_vec()));
    }

    #[test]
    fn rejects_short_and_unknown_notifications() {
        assert_eq!(DeviceEvent::decode(&[]).unwrap_err(), ProtoError::Empty);
        assert_eq!(
            DeviceEvent::decode(&[0x00, 0x40]).unwrap_err(),
            ProtoError::Truncated {
                what: "status report",
                expected: 4,
                got: 1
            }
        );
        assert_eq!(
            DeviceEvent::decode(&[0x7f]).unwrap_err(),
            ProtoError::UnknownEvent(0x7f)
        );
    }
}
