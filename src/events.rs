// ECG Telemetry — Data Types & Link Events

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

/// One ECG conversion, bounded by the ADC resolution (0–4095 at 12 bits).
pub type Sample = u16;

/// Sample value reserved for "leads off" in the binary format.
pub const LEADS_OFF_SENTINEL: Sample = 0;

/// What the pipeline produced for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Value(Sample),
    LeadsOff,
}

impl Reading {
    /// Collapse to the binary representation (leads-off becomes the sentinel).
    pub fn sample(self) -> Sample {
        match self {
            Self::Value(v) => v,
            Self::LeadsOff => LEADS_OFF_SENTINEL,
        }
    }

    pub fn is_leads_off(self) -> bool {
        matches!(self, Self::LeadsOff)
    }
}

// ---------------------------------------------------------------------------
// Inertial data (raw MPU6050 accelerometer counts)
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InertialReading {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl InertialReading {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Stack-assigned connection handle.
pub type ConnectionId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Advertising,
    Connected,
}

/// Events raised by the wireless collaborator, in the order the stack
/// delivers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected(ConnectionId),
    ConnectFailed(u8),
    Disconnected { conn: ConnectionId, reason: u8 },
    /// Peer wrote the CCCD; `true` when notifications were enabled.
    Subscription(bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leads_off_collapses_to_sentinel() {
        assert_eq!(Reading::LeadsOff.sample(), LEADS_OFF_SENTINEL);
        assert_eq!(Reading::Value(512).sample(), 512);
        assert!(Reading::LeadsOff.is_leads_off());
        assert!(!Reading::Value(0).is_leads_off());
    }
}
