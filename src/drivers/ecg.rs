// ECG Telemetry — ECG ADC Channel
//
// AD8232 output on GPIO2 / ADC1 channel 2, oneshot mode via raw ESP-IDF
// calls. One conversion takes a few tens of µs, far inside the sample period.

use anyhow::Context;
use esp_idf_sys as sys;
use esp_idf_sys::esp;

use crate::acquisition::AnalogChannel;
use crate::config::ADC_FULL_SCALE;
use crate::events::Sample;

const ECG_ADC_UNIT: sys::adc_unit_t = sys::adc_unit_t_ADC_UNIT_1;
const ECG_ADC_CHANNEL: sys::adc_channel_t = sys::adc_channel_t_ADC_CHANNEL_2; // GPIO2

pub struct EcgAdc {
    handle: sys::adc_oneshot_unit_handle_t,
}

// SAFETY: the oneshot unit handle is only ever used by the thread that owns
// this struct; ESP-IDF does not tie it to the creating task.
unsafe impl Send for EcgAdc {}

impl EcgAdc {
    pub fn new() -> Self {
        Self {
            handle: core::ptr::null_mut(),
        }
    }
}

impl Default for EcgAdc {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalogChannel for EcgAdc {
    fn begin(&mut self) -> anyhow::Result<()> {
        if !self.handle.is_null() {
            return Ok(());
        }

        // 11 dB attenuation (0–3.3 V range), 12-bit.
        let mut handle: sys::adc_oneshot_unit_handle_t = core::ptr::null_mut();
        unsafe {
            let unit_cfg = sys::adc_oneshot_unit_init_cfg_t {
                unit_id: ECG_ADC_UNIT,
                ulp_mode: sys::adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
                ..core::mem::zeroed()
            };
            esp!(sys::adc_oneshot_new_unit(&unit_cfg, &mut handle)).context("ADC unit init failed")?;

            let chan_cfg = sys::adc_oneshot_chan_cfg_t {
                atten: sys::adc_atten_t_ADC_ATTEN_DB_11,
                bitwidth: sys::adc_bitwidth_t_ADC_BITWIDTH_12,
            };
            if let Err(e) = esp!(sys::adc_oneshot_config_channel(handle, ECG_ADC_CHANNEL, &chan_cfg)) {
                sys::adc_oneshot_del_unit(handle);
                return Err(e).context("ADC channel setup failed");
            }
        }

        self.handle = handle;
        log::info!("ECG ADC ready (ADC1 ch2, 12-bit)");
        Ok(())
    }

    fn read(&mut self) -> anyhow::Result<Sample> {
        if self.handle.is_null() {
            anyhow::bail!("ECG ADC read before begin()");
        }
        let mut raw: i32 = 0;
        esp!(unsafe { sys::adc_oneshot_read(self.handle, ECG_ADC_CHANNEL, &mut raw) })?;
        Ok(raw.clamp(0, ADC_FULL_SCALE as i32) as Sample)
    }
}

impl Drop for EcgAdc {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe {
                sys::adc_oneshot_del_unit(self.handle);
            }
        }
    }
}
