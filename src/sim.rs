// ECG Telemetry — Host Simulator
//
// Synthetic stand-ins for the AD8232, the lead-off comparators, the MPU6050
// and the BLE peer, so the pipeline, scheduler and connection state machine
// run unchanged on a development machine.

use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;

use crate::acquisition::{AnalogChannel, InertialChannel, LeadInputs, LeadLevels};
use crate::config::*;
use crate::dispatch::Notifier;
use crate::events::{ConnectionId, InertialReading, LinkEvent, Reading, Sample, LEADS_OFF_SENTINEL};
use crate::link::{Advertiser, ConnectionStateMachine};
use crate::pipeline::{Pipeline, PipelineStats};
use crate::scheduler::{spawn_thread_ticker, tick_channel, ScheduleMode, SystemClock};
use crate::tasks::sampler;
use crate::wire::{self, WireFormat};

/// Threads that log need more headroom on the host than the FreeRTOS tasks
/// (formatting in the logger alone exceeds the device stack sizes). The
/// ticker never logs and keeps its device stack size.
const HOST_STACK: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ECG front end
// ---------------------------------------------------------------------------

/// (centre as fraction of the beat, amplitude in counts, width as fraction)
const PQRST: [(f64, f64, f64); 5] = [
    (0.20, 150.0, 0.025),  // P
    (0.36, -120.0, 0.010), // Q
    (0.40, 1400.0, 0.012), // R
    (0.44, -300.0, 0.012), // S
    (0.65, 350.0, 0.050),  // T
];
const BASELINE: f64 = 1800.0;

/// Sum-of-Gaussians PQRST waveform sampled at the pipeline period.
pub struct SyntheticEcg {
    sample_s: f64,
    beat_s: f64,
    n: u64,
}

impl SyntheticEcg {
    pub fn new(period_us: u32, heart_rate_bpm: u32) -> Self {
        Self {
            sample_s: period_us as f64 / 1e6,
            beat_s: 60.0 / heart_rate_bpm.max(1) as f64,
            n: 0,
        }
    }

    fn value_at(&self, t: f64) -> Sample {
        let phase = (t % self.beat_s) / self.beat_s;
        let v = PQRST.iter().fold(BASELINE, |acc, &(centre, amp, width)| {
            let d = (phase - centre) / width;
            acc + amp * (-0.5 * d * d).exp()
        });
        v.clamp(0.0, ADC_FULL_SCALE as f64) as Sample
    }
}

impl AnalogChannel for SyntheticEcg {
    fn begin(&mut self) -> anyhow::Result<()> {
        log::info!("Synthetic ECG ready ({:.0} bpm)", 60.0 / self.beat_s);
        Ok(())
    }

    fn read(&mut self) -> anyhow::Result<Sample> {
        let v = self.value_at(self.n as f64 * self.sample_s);
        self.n += 1;
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// Lead-off comparators
// ---------------------------------------------------------------------------

/// LO+ goes high during the given tick ranges.
pub struct ScriptedLeads {
    detached: Vec<Range<u32>>,
    tick: u32,
}

impl ScriptedLeads {
    pub fn new(detached: Vec<Range<u32>>) -> Self {
        Self { detached, tick: 0 }
    }
}

impl LeadInputs for ScriptedLeads {
    fn levels(&mut self) -> LeadLevels {
        let off = self.detached.iter().any(|r| r.contains(&self.tick));
        self.tick = self.tick.wrapping_add(1);
        LeadLevels {
            positive_high: off,
            negative_high: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Accelerometer
// ---------------------------------------------------------------------------

const AT_REST: InertialReading = InertialReading { x: 0, y: 0, z: 16_384 }; // 1 g
const SHAKING: InertialReading = InertialReading { x: 15_000, y: 20_000, z: 8_000 };

/// Resting on the chest except during the given read ranges.
pub struct SimulatedImu {
    bursts: Vec<Range<u32>>,
    reads: u32,
}

impl SimulatedImu {
    pub fn new(bursts: Vec<Range<u32>>) -> Self {
        Self { bursts, reads: 0 }
    }
}

impl InertialChannel for SimulatedImu {
    fn begin(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn read(&mut self) -> anyhow::Result<InertialReading> {
        let moving = self.bursts.iter().any(|r| r.contains(&self.reads));
        self.reads = self.reads.wrapping_add(1);
        Ok(if moving { SHAKING } else { AT_REST })
    }
}

// ---------------------------------------------------------------------------
// Radio
// ---------------------------------------------------------------------------

pub struct SimAdvertiser;

impl Advertiser for SimAdvertiser {
    fn start_advertising(&mut self) -> anyhow::Result<()> {
        log::debug!("(sim) advertising as \"{}\"", DEVICE_NAME);
        Ok(())
    }
}

/// Decodes each notification the way a plotting client would and logs it.
#[derive(Clone)]
pub struct LogNotifier {
    format: WireFormat,
    delivered: Arc<AtomicU32>,
}

impl LogNotifier {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            delivered: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn delivered(&self) -> u32 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Notifier for LogNotifier {
    fn notify(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let first = match self.format {
            WireFormat::BinaryBatch => wire::decode_batch(payload)?
                .first()
                .map(|&s| {
                    if s == LEADS_OFF_SENTINEL {
                        Reading::LeadsOff
                    } else {
                        Reading::Value(s)
                    }
                }),
            WireFormat::Text => Some(wire::decode_text(payload)?),
        };
        match first {
            Some(Reading::Value(v)) => log::debug!(
                "(peer) {} bytes, first {:.3} V",
                payload.len(),
                wire::counts_to_volts(v, CLIENT_FULL_SCALE, CLIENT_REFERENCE_V)
            ),
            Some(Reading::LeadsOff) => log::debug!("(peer) {} bytes, leads off", payload.len()),
            None => log::debug!("(peer) empty notification"),
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Peer behaviour
// ---------------------------------------------------------------------------

/// A link event and where in the session (0.0–1.0) it happens.
#[derive(Debug, Clone, Copy)]
pub struct PeerStep {
    pub at: f32,
    pub event: LinkEvent,
}

/// One failed attempt, a connect + subscribe, a drop, and a reconnect.
pub fn default_peer_script() -> Vec<PeerStep> {
    const FIRST: ConnectionId = 1;
    const SECOND: ConnectionId = 2;
    vec![
        PeerStep { at: 0.05, event: LinkEvent::ConnectFailed(0x3e) },
        PeerStep { at: 0.10, event: LinkEvent::Connected(FIRST) },
        PeerStep { at: 0.15, event: LinkEvent::Subscription(true) },
        PeerStep { at: 0.60, event: LinkEvent::Disconnected { conn: FIRST, reason: 0x13 } },
        PeerStep { at: 0.70, event: LinkEvent::Connected(SECOND) },
        PeerStep { at: 0.75, event: LinkEvent::Subscription(true) },
    ]
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SessionReport {
    pub stats: PipelineStats,
    pub delivered: u32,
    pub advertise_count: u32,
}

/// Run `ticks` real-time ticks of the pipeline described by `config` while
/// `script` plays the peer side.
pub fn run_session(
    config: &PipelineConfig,
    ticks: u32,
    script: &[PeerStep],
) -> anyhow::Result<SessionReport> {
    let machine = Arc::new(ConnectionStateMachine::new(SimAdvertiser));

    let notifier = LogNotifier::new(config.wire_format);
    let leads_off_at = ticks / 3;
    let burst_at = ticks / 2;
    let imu: Option<Box<dyn InertialChannel>> = config
        .motion_threshold
        .map(|_| Box::new(SimulatedImu::new(vec![burst_at..burst_at + ticks / 20])) as Box<dyn InertialChannel>);
    let mut pipeline = Pipeline::bring_up(
        config,
        SyntheticEcg::new(config.period_us, 72),
        ScriptedLeads::new(vec![leads_off_at..leads_off_at + ticks / 10]),
        notifier.clone(),
        imu,
        &machine,
    )?;

    log::info!(
        "Session: {:?} {:?} @ {:.0} Hz, {} ticks",
        config.schedule,
        config.wire_format,
        config.rate_hz(),
        ticks
    );

    let period_us = config.period_us;
    let sampler = match config.schedule {
        ScheduleMode::Cooperative => thread::Builder::new()
            .name("sampler".into())
            .stack_size(HOST_STACK)
            .spawn(move || {
                sampler::cooperative_task(&mut pipeline, &SystemClock::new(), period_us, Some(ticks));
                pipeline.stats()
            })?,
        ScheduleMode::Deferred => {
            let (producer, consumer) = tick_channel();
            spawn_thread_ticker(
                Duration::from_micros(period_us as u64),
                STACK_TICKER,
                producer,
                Some(ticks),
            )?;
            thread::Builder::new()
                .name("sampler".into())
                .stack_size(HOST_STACK)
                .spawn(move || sampler::deferred_task(pipeline, consumer))?
        }
    };

    let session = Duration::from_micros(period_us as u64 * ticks as u64);
    let mut elapsed = Duration::ZERO;
    for step in script {
        let at = session.mul_f32(step.at.clamp(0.0, 1.0));
        if at > elapsed {
            thread::sleep(at - elapsed);
            elapsed = at;
        }
        log::info!("(peer) {:?}", step.event);
        machine.handle(step.event);
    }

    let stats = sampler
        .join()
        .map_err(|_| anyhow!("sampler thread panicked"))?;

    Ok(SessionReport {
        stats,
        delivered: notifier.delivered(),
        advertise_count: machine.status().snapshot().advertise_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_ecg_has_an_r_peak_each_beat() {
        // 60 bpm at 1 kHz: one beat per 1000 samples.
        let mut ecg = SyntheticEcg::new(1000, 60);
        let beat: Vec<Sample> = (0..1000).map(|_| ecg.read().unwrap()).collect();
        let (peak_at, &peak) = beat.iter().enumerate().max_by_key(|(_, &v)| v).unwrap();
        assert!((395..=405).contains(&peak_at));
        assert!(peak > 3000);
        assert!(beat.iter().all(|&v| v > 0 && v <= ADC_FULL_SCALE));
    }

    #[test]
    fn scripted_leads_follow_ranges() {
        let mut leads = ScriptedLeads::new(vec![2..4]);
        let off: Vec<bool> = (0..5).map(|_| leads.levels().positive_high).collect();
        assert_eq!(off, [false, false, true, true, false]);
    }

    #[test]
    fn log_notifier_counts_decodable_payloads() {
        let mut n = LogNotifier::new(WireFormat::Text);
        n.notify(b"512").unwrap();
        n.notify(b"Leads Off").unwrap();
        assert!(n.notify(b"garbage").is_err());
        assert_eq!(n.delivered(), 2);
    }
}
