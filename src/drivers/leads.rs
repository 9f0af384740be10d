// ECG Telemetry — Lead-Off Inputs
//
// AD8232 LO+ / LO- comparator outputs. Pulled up, so a floating pin also
// reads as "lead off".

use esp_idf_hal::gpio::{AnyInputPin, Input, PinDriver};
use esp_idf_sys::esp;

use crate::acquisition::{LeadInputs, LeadLevels};
use crate::config::{PIN_LEAD_NEGATIVE, PIN_LEAD_POSITIVE};

pub struct LeadPins {
    positive: PinDriver<'static, AnyInputPin, Input>,
    negative: PinDriver<'static, AnyInputPin, Input>,
}

impl LeadPins {
    pub fn new(positive: AnyInputPin, negative: AnyInputPin) -> anyhow::Result<Self> {
        let positive = PinDriver::input(positive)?;
        let negative = PinDriver::input(negative)?;
        configure_pullup(PIN_LEAD_POSITIVE)?;
        configure_pullup(PIN_LEAD_NEGATIVE)?;
        Ok(Self { positive, negative })
    }
}

impl LeadInputs for LeadPins {
    fn levels(&mut self) -> LeadLevels {
        LeadLevels {
            positive_high: self.positive.is_high(),
            negative_high: self.negative.is_high(),
        }
    }
}

/// `PinDriver::set_pull` needs an input/output pin; the downgraded input pin
/// type does not qualify, so go through the raw API.
fn configure_pullup(gpio: i32) -> anyhow::Result<()> {
    esp!(unsafe {
        esp_idf_sys::gpio_set_pull_mode(gpio, esp_idf_sys::gpio_pull_mode_t_GPIO_PULLUP_ONLY)
    })?;
    Ok(())
}
