// ECG Telemetry — Acquisition Sources & Lead-Off Detection
//
// The hardware drivers implement these traits on the device; the simulator
// and the tests implement them on the host.

use crate::events::{InertialReading, Sample};

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Single blocking ECG conversion. Must finish well within one sample period.
pub trait AnalogChannel: Send {
    /// Bring the channel up. Calling it again on a ready channel is a no-op.
    fn begin(&mut self) -> anyhow::Result<()>;
    fn read(&mut self) -> anyhow::Result<Sample>;
}

/// Three-axis accelerometer.
pub trait InertialChannel: Send {
    /// Bring the sensor up. Calling it again on a ready sensor is a no-op.
    fn begin(&mut self) -> anyhow::Result<()>;
    fn read(&mut self) -> anyhow::Result<InertialReading>;
}

/// Raw levels of the two lead-contact comparator outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeadLevels {
    pub positive_high: bool,
    pub negative_high: bool,
}

pub trait LeadInputs: Send {
    fn levels(&mut self) -> LeadLevels;
}

// ---------------------------------------------------------------------------
// Lead-off detection
// ---------------------------------------------------------------------------

/// How the two contact inputs combine into the leads-off gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadPolicy {
    /// Either lead lifted counts as leads-off.
    #[default]
    Either,
    /// Only both leads lifted counts as leads-off.
    Both,
}

impl LeadPolicy {
    pub fn is_off(self, levels: LeadLevels) -> bool {
        match self {
            Self::Either => levels.positive_high || levels.negative_high,
            Self::Both => levels.positive_high && levels.negative_high,
        }
    }
}

/// Leads-off gate with an optional dwell-time debounce: the reported state
/// only changes after `dwell_ticks` consecutive raw evaluations disagree
/// with it.
pub struct LeadOffDetector<L> {
    inputs: L,
    policy: LeadPolicy,
    dwell_ticks: u8,
    state: Option<bool>,
    pending: u8,
}

impl<L: LeadInputs> LeadOffDetector<L> {
    pub fn new(inputs: L, policy: LeadPolicy, dwell_ticks: u8) -> Self {
        Self {
            inputs,
            policy,
            dwell_ticks: dwell_ticks.max(1),
            state: None,
            pending: 0,
        }
    }

    /// Sample both inputs and return the (debounced) gate.
    pub fn is_leads_off(&mut self) -> bool {
        let raw = self.policy.is_off(self.inputs.levels());

        let current = match self.state {
            // First evaluation adopts the raw state.
            None => {
                self.state = Some(raw);
                log::info!("Leads {}", if raw { "off" } else { "on" });
                return raw;
            }
            Some(s) => s,
        };

        if raw == current {
            self.pending = 0;
            return current;
        }

        self.pending += 1;
        if self.pending >= self.dwell_ticks {
            self.pending = 0;
            self.state = Some(raw);
            log::info!("Leads {}", if raw { "off" } else { "on" });
            return raw;
        }
        current
    }
}
