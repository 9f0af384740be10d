// ECG Telemetry — Periodic Tick Timer
//
// esp_timer callbacks run in the esp_timer task, not in an ISR, but they
// share that task with every other timer in the system: the callback only
// posts a tick, the sampler thread does the work.

use std::time::Duration;

use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};

use crate::scheduler::{FireOutcome, TickProducer};

/// Keeps the timer armed for as long as it is alive.
pub struct TickTimer {
    _timer: EspTimer<'static>,
    _service: EspTaskTimerService,
}

pub fn start(period_us: u32, mut producer: TickProducer) -> anyhow::Result<TickTimer> {
    let service = EspTaskTimerService::new()?;
    let mut closed = false;
    let timer = service.timer(move || {
        if producer.fire() == FireOutcome::Closed && !closed {
            closed = true;
            log::error!("Sampler task gone — ticks are being discarded");
        }
    })?;
    timer.every(Duration::from_micros(period_us as u64))?;

    log::info!("Tick timer armed ({} µs)", period_us);
    Ok(TickTimer {
        _timer: timer,
        _service: service,
    })
}
