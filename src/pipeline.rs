// ECG Telemetry — Acquisition Pipeline
//
// One tick: lead-off gate → ECG conversion (+ optional motion smoothing) →
// buffer push → dispatch when the buffer fills. The pipeline owns all of its
// per-tick state and is driven from exactly one context.

use anyhow::Context;

use crate::acquisition::{AnalogChannel, InertialChannel, LeadInputs, LeadOffDetector};
use crate::buffer::SampleBuffer;
use crate::config::PipelineConfig;
use crate::dispatch::{DispatchOutcome, DispatchStats, Notifier, TelemetryDispatcher};
use crate::events::{Reading, Sample};
use crate::filter::MotionArtifactFilter;
use crate::link::{Advertiser, ConnectionStateMachine, LinkStatus};

/// Accelerometer plus the filter it feeds.
pub struct MotionStage {
    imu: Box<dyn InertialChannel>,
    filter: MotionArtifactFilter,
    read_errors: u32,
}

impl MotionStage {
    fn apply(&mut self, raw: Sample) -> Sample {
        let motion = match self.imu.read() {
            Ok(reading) => Some(reading),
            Err(e) => {
                self.read_errors = self.read_errors.wrapping_add(1);
                log::debug!("IMU read error: {:?}", e);
                None
            }
        };
        self.filter.apply(raw, motion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub reading: Reading,
    /// Set when this tick completed a buffer.
    pub dispatched: Option<DispatchOutcome>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u32,
    pub ecg_errors: u32,
    pub imu_errors: u32,
    pub overflows: u32,
    pub dispatch: DispatchStats,
}

pub struct Pipeline<E, L, N> {
    leads: LeadOffDetector<L>,
    ecg: E,
    motion: Option<MotionStage>,
    motion_threshold: Option<u32>,
    buffer: SampleBuffer,
    dispatcher: TelemetryDispatcher<N>,
    ticks: u32,
    ecg_errors: u32,
}

impl<E, L, N> Pipeline<E, L, N>
where
    E: AnalogChannel,
    L: LeadInputs,
    N: Notifier,
{
    /// Validate the variant and bring the ECG channel up. Any failure here
    /// is fatal: sampling must not start.
    pub fn new(
        config: &PipelineConfig,
        mut ecg: E,
        leads: L,
        notifier: N,
        link: LinkStatus,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid pipeline configuration")?;
        ecg.begin().context("ECG channel not ready")?;

        Ok(Self {
            leads: LeadOffDetector::new(leads, config.lead_policy, config.lead_dwell_ticks),
            ecg,
            motion: None,
            motion_threshold: config.motion_threshold,
            buffer: SampleBuffer::new(config.capacity),
            dispatcher: TelemetryDispatcher::new(
                notifier,
                link,
                config.wire_format,
                config.capacity,
            ),
            ticks: 0,
            ecg_errors: 0,
        })
    }

    /// Boot order for a device: front end first, then the link. When the
    /// front end fails the device never becomes connectable.
    pub fn bring_up<A: Advertiser>(
        config: &PipelineConfig,
        ecg: E,
        leads: L,
        notifier: N,
        imu: Option<Box<dyn InertialChannel>>,
        machine: &ConnectionStateMachine<A>,
    ) -> anyhow::Result<Self> {
        let mut pipeline = Self::new(config, ecg, leads, notifier, machine.status())
            .context("ECG front end failed — halting")?;
        if let Some(imu) = imu {
            pipeline.attach_imu(imu);
        }

        if let Err(e) = machine.start_advertising() {
            log::error!("Advertising failed to start: {:?}", e);
        }
        Ok(pipeline)
    }

    /// Attach the accelerometer. A sensor that fails to come up is logged and
    /// the pipeline carries on unfiltered.
    pub fn attach_imu(&mut self, mut imu: Box<dyn InertialChannel>) -> bool {
        let Some(threshold) = self.motion_threshold else {
            log::info!("Motion filter disabled in this variant — IMU not used");
            return false;
        };

        match imu.begin() {
            Ok(()) => {
                log::info!("Motion filter enabled (threshold {})", threshold);
                self.motion = Some(MotionStage {
                    imu,
                    filter: MotionArtifactFilter::new(threshold),
                    read_errors: 0,
                });
                true
            }
            Err(e) => {
                log::warn!("IMU init failed, continuing without motion filter: {:?}", e);
                false
            }
        }
    }

    pub fn has_motion_filter(&self) -> bool {
        self.motion.is_some()
    }

    /// Run one acquisition step. An ECG conversion error loses only this
    /// tick; nothing is pushed.
    pub fn tick(&mut self) -> anyhow::Result<TickReport> {
        self.ticks = self.ticks.wrapping_add(1);

        let reading = if self.leads.is_leads_off() {
            Reading::LeadsOff
        } else {
            let raw = match self.ecg.read() {
                Ok(raw) => raw,
                Err(e) => {
                    self.ecg_errors = self.ecg_errors.wrapping_add(1);
                    return Err(e.context("ECG conversion failed"));
                }
            };
            let sample = match self.motion.as_mut() {
                Some(stage) => stage.apply(raw),
                None => raw,
            };
            Reading::Value(sample)
        };

        let dispatcher = &mut self.dispatcher;
        let mut dispatched = None;
        self.buffer
            .push(reading, |batch| dispatched = Some(dispatcher.flush(batch)));

        Ok(TickReport {
            reading,
            dispatched,
        })
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ticks: self.ticks,
            ecg_errors: self.ecg_errors,
            imu_errors: self.motion.as_ref().map_or(0, |m| m.read_errors),
            overflows: self.buffer.overflows(),
            dispatch: self.dispatcher.stats(),
        }
    }

    /// Samples waiting for the buffer to fill.
    pub fn pending(&self) -> usize {
        self.buffer.cursor()
    }
}
