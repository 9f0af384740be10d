// ECG Telemetry — Sampler Task
//
// Drives the acquisition pipeline at the configured period, either by polling
// a clock (cooperative) or by consuming ticks posted by a timer (deferred).
// This is the only context that touches the pipeline state.

use crate::acquisition::{AnalogChannel, LeadInputs};
use crate::config::STATS_LOG_INTERVAL_TICKS;
use crate::dispatch::Notifier;
use crate::pipeline::{Pipeline, PipelineStats};
use crate::scheduler::{Clock, CooperativeScheduler, TickConsumer};

/// Consume timer ticks until the tick source goes away. Returns the final
/// counters.
pub fn deferred_task<E, L, N>(mut pipeline: Pipeline<E, L, N>, ticks: TickConsumer) -> PipelineStats
where
    E: AnalogChannel,
    L: LeadInputs,
    N: Notifier,
{
    log::info!("Sampler task started (timer driven)");

    while ticks.wait().is_some() {
        run_tick(&mut pipeline, ticks.dropped());
    }

    log::warn!("Tick source closed — exiting sampler task");
    pipeline.stats()
}

/// Poll `clock` and run one tick per elapsed period. Runs forever unless
/// `max_ticks` is given.
pub fn cooperative_task<E, L, N, C>(
    pipeline: &mut Pipeline<E, L, N>,
    clock: &C,
    period_us: u32,
    max_ticks: Option<u32>,
) where
    E: AnalogChannel,
    L: LeadInputs,
    N: Notifier,
    C: Clock,
{
    log::info!("Sampler task started (cooperative, {} µs)", period_us);

    let mut scheduler = CooperativeScheduler::new(period_us, clock.now_us());
    let mut fired: u32 = 0;

    loop {
        if max_ticks.is_some_and(|limit| fired >= limit) {
            return;
        }

        let now = clock.now_us();
        if scheduler.poll(now) {
            fired = fired.wrapping_add(1);
            run_tick(pipeline, 0);
        } else {
            clock.sleep_us(scheduler.until_next_us(now));
        }
    }
}

fn run_tick<E, L, N>(pipeline: &mut Pipeline<E, L, N>, dropped_ticks: u32)
where
    E: AnalogChannel,
    L: LeadInputs,
    N: Notifier,
{
    if let Err(e) = pipeline.tick() {
        log::warn!("Tick skipped: {:?}", e);
    }

    let stats = pipeline.stats();
    if stats.ticks % STATS_LOG_INTERVAL_TICKS == 0 {
        log::info!(
            "ticks={} sent={} discarded={} failed={} dropped_ticks={} ecg_err={} imu_err={} overflows={}",
            stats.ticks,
            stats.dispatch.sent,
            stats.dispatch.discarded,
            stats.dispatch.failed,
            dropped_ticks,
            stats.ecg_errors,
            stats.imu_errors,
            stats.overflows,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::LeadLevels;
    use crate::config::PipelineConfig;
    use crate::events::Sample;
    use crate::link::LinkStatus;
    use crate::scheduler::tick_channel;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    struct Ramp(Sample);

    impl AnalogChannel for Ramp {
        fn begin(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
        fn read(&mut self) -> anyhow::Result<Sample> {
            self.0 += 1;
            Ok(self.0)
        }
    }

    struct Attached;

    impl LeadInputs for Attached {
        fn levels(&mut self) -> LeadLevels {
            LeadLevels::default()
        }
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<Vec<u8>>>>);

    impl Notifier for Capture {
        fn notify(&mut self, payload: &[u8]) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    /// Time only moves when someone sleeps or polls.
    struct FakeClock {
        now: Cell<u64>,
        step_us: u64,
        slept_us: Cell<u64>,
    }

    impl Clock for FakeClock {
        fn now_us(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now + self.step_us);
            now
        }
        fn sleep_us(&self, us: u64) {
            self.slept_us.set(self.slept_us.get() + us);
            self.now.set(self.now.get() + us);
        }
    }

    #[test]
    fn cooperative_runs_requested_ticks() {
        let mut pipeline = Pipeline::new(
            &PipelineConfig::text_stream(),
            Ramp(0),
            Attached,
            Capture::default(),
            LinkStatus::new(),
        )
        .unwrap();
        let clock = FakeClock {
            now: Cell::new(0),
            step_us: 100,
            slept_us: Cell::new(0),
        };

        cooperative_task(&mut pipeline, &clock, 2778, Some(5));

        assert_eq!(pipeline.stats().ticks, 5);
        assert!(clock.slept_us.get() > 0);
        // Never more than five periods plus polling slack.
        assert!(clock.now.get() < 6 * 2778);
    }

    #[test]
    fn deferred_task_drains_until_closed() {
        let pipeline = Pipeline::new(
            &PipelineConfig::binary_batch(),
            Ramp(0),
            Attached,
            Capture::default(),
            LinkStatus::new(),
        )
        .unwrap();
        let (mut producer, consumer) = tick_channel();
        producer.fire();
        drop(producer);
        // Returns once the producer is gone instead of blocking forever.
        let stats = deferred_task(pipeline, consumer);
        assert_eq!(stats.ticks, 1);
    }
}
