// ECG Telemetry — Hardware & System Configuration
// Target: Seeed Studio Xiao ESP32-C3 (RISC-V) + AD8232 ECG front end

use anyhow::bail;

use crate::acquisition::LeadPolicy;
use crate::scheduler::ScheduleMode;
use crate::wire::WireFormat;

// ---------------------------------------------------------------------------
// GPIO Pin Definitions (Xiao ESP32-C3 pinout)
// ---------------------------------------------------------------------------
// GPIO2  D0/A0 — AD8232 OUTPUT (ADC1 channel 2, see drivers/ecg.rs)
// GPIO3  D1/A1 — Battery sense (wired, not sampled)
// GPIO6  D4    — I2C SDA (MPU6050)
// GPIO7  D5    — I2C SCL (MPU6050)
pub const PIN_LEAD_NEGATIVE: i32 = 20; // D7    — AD8232 LO- (INPUT_PULLUP)
pub const PIN_LEAD_POSITIVE: i32 = 8;  // D8    — AD8232 LO+ (INPUT_PULLUP)

// ---------------------------------------------------------------------------
// I2C Bus
// ---------------------------------------------------------------------------
pub const I2C_ADDR_MPU6050: u8 = 0x68;
pub const I2C_TIMEOUT_TICKS: u32 = 1000; // FreeRTOS ticks
pub const I2C_BAUDRATE_KHZ: u32 = 400;

// ---------------------------------------------------------------------------
// ADC
// ---------------------------------------------------------------------------
pub const ADC_FULL_SCALE: u16 = 4095;   // 12-bit oneshot conversion
pub const CLIENT_FULL_SCALE: f32 = 1024.0; // plotting clients assume a 10-bit reading
pub const CLIENT_REFERENCE_V: f32 = 3.7;

// ---------------------------------------------------------------------------
// Task Stack Sizes (bytes)
// ---------------------------------------------------------------------------
pub const STACK_SAMPLER: usize = 6144;
pub const STACK_TICKER: usize = 2048;

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------
pub const SAMPLE_PERIOD_TEXT_US: u32 = 2778;   // ~360 Hz, per-sample text stream
pub const SAMPLE_PERIOD_BATCH_US: u32 = 2300;  // ~434 Hz, batched binary stream
pub const STATS_LOG_INTERVAL_TICKS: u32 = 2000; // ~5 s of samples between counter logs
pub const BOOT_SETTLE_MS: u64 = 500;

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------
pub const BATCH_CAPACITY: usize = 20;
pub const BATCH_CAPACITY_MOTION: usize = 10;
pub const MOTION_THRESHOLD: u32 = 20_000; // raw accel counts (±2 g → 16384 LSB/g)
pub const LEAD_OFF_DWELL_TICKS: u8 = 1;   // 1 = no debounce

// ---------------------------------------------------------------------------
// BLE identity
// ---------------------------------------------------------------------------
pub const DEVICE_NAME: &str = "ECG Data";
pub const MANUFACTURER_NAME: &str = "Embedded Jankineers";
pub const MODEL_NUMBER: &str = "ECG Device Model 1";
pub const MANUFACTURER_COMPANY_ID: [u8; 2] = [0xFF, 0xFF]; // reserved/test company id

pub const ECG_SERVICE_UUID: u16 = 0x180D;
pub const DEVICE_INFO_SERVICE_UUID: u16 = 0x180A;
pub const MANUFACTURER_NAME_CHAR_UUID: u16 = 0x2A29;
pub const MODEL_NUMBER_CHAR_UUID: u16 = 0x2A24;
pub const CCCD_UUID: u16 = 0x2902;

/// e2fd985e-ceb8-4ccb-9cd3-52563e4b5c62
pub const ECG_CHAR_UUID: u128 = 0xe2fd985e_ceb8_4ccb_9cd3_52563e4b5c62;

pub const GATT_APP_ID: u16 = 0;
pub const GATT_LOCAL_MTU: u16 = 517;
pub const MAX_ATTR_LEN: usize = 512;

// ---------------------------------------------------------------------------
// Pipeline variant
// ---------------------------------------------------------------------------

/// Everything that distinguishes one firmware variant from another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub period_us: u32,
    pub wire_format: WireFormat,
    /// Samples per notification. Must be 1 for the text format.
    pub capacity: usize,
    pub schedule: ScheduleMode,
    pub lead_policy: LeadPolicy,
    pub lead_dwell_ticks: u8,
    /// `None` disables the motion artifact filter.
    pub motion_threshold: Option<u32>,
}

impl PipelineConfig {
    /// One ASCII notify per sample, polled from a cooperative loop.
    pub fn text_stream() -> Self {
        Self {
            period_us: SAMPLE_PERIOD_TEXT_US,
            wire_format: WireFormat::Text,
            capacity: 1,
            schedule: ScheduleMode::Cooperative,
            lead_policy: LeadPolicy::Either,
            lead_dwell_ticks: LEAD_OFF_DWELL_TICKS,
            motion_threshold: None,
        }
    }

    /// 20 little-endian samples per notify, driven by a periodic timer.
    pub fn binary_batch() -> Self {
        Self {
            period_us: SAMPLE_PERIOD_BATCH_US,
            wire_format: WireFormat::BinaryBatch,
            capacity: BATCH_CAPACITY,
            schedule: ScheduleMode::Deferred,
            lead_policy: LeadPolicy::Either,
            lead_dwell_ticks: LEAD_OFF_DWELL_TICKS,
            motion_threshold: None,
        }
    }

    /// Accelerometer-assisted board: smaller batches, motion smoothing on.
    pub fn binary_batch_with_motion() -> Self {
        Self {
            period_us: SAMPLE_PERIOD_TEXT_US,
            capacity: BATCH_CAPACITY_MOTION,
            schedule: ScheduleMode::Cooperative,
            motion_threshold: Some(MOTION_THRESHOLD),
            ..Self::binary_batch()
        }
    }

    /// Variant selected by Cargo features for the device build.
    pub fn selected() -> Self {
        if cfg!(feature = "text-stream") {
            Self::text_stream()
        } else if cfg!(feature = "motion-filter") {
            Self::binary_batch_with_motion()
        } else {
            Self::binary_batch()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.period_us == 0 {
            bail!("sampling period must be non-zero");
        }
        if self.capacity == 0 {
            bail!("buffer capacity must be at least 1");
        }
        if self.wire_format == WireFormat::Text && self.capacity != 1 {
            bail!(
                "text format sends one sample per notify, capacity {} given",
                self.capacity
            );
        }
        let payload = self.wire_format.max_payload_len(self.capacity);
        if payload > MAX_ATTR_LEN {
            bail!(
                "{} samples need {} bytes, characteristic holds {}",
                self.capacity,
                payload,
                MAX_ATTR_LEN
            );
        }
        if self.lead_dwell_ticks == 0 {
            bail!("lead-off dwell must be at least one tick");
        }
        Ok(())
    }

    /// Sampling rate implied by the period, for logging.
    pub fn rate_hz(&self) -> f32 {
        1_000_000.0 / self.period_us as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        PipelineConfig::text_stream().validate().unwrap();
        PipelineConfig::binary_batch().validate().unwrap();
        PipelineConfig::binary_batch_with_motion().validate().unwrap();
    }

    #[test]
    fn text_format_rejects_batching() {
        let config = PipelineConfig {
            capacity: 20,
            ..PipelineConfig::text_stream()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let config = PipelineConfig {
            capacity: 300,
            ..PipelineConfig::binary_batch()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_period_is_rejected() {
        let config = PipelineConfig {
            period_us: 0,
            ..PipelineConfig::binary_batch()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn observed_rates() {
        let text = PipelineConfig::text_stream().rate_hz();
        let batch = PipelineConfig::binary_batch().rate_hz();
        assert!((359.0..361.0).contains(&text));
        assert!((434.0..436.0).contains(&batch));
    }
}
