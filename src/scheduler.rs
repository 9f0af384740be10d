// ECG Telemetry — Sampling Scheduler
//
// Two ways to drive the pipeline at a fixed period:
//   * Cooperative — a loop polls a monotonic clock and fires when a full
//     period has elapsed, advancing its deadline by exactly one period so
//     jitter never accumulates into drift.
//   * Deferred — a periodic timer posts a tick into a one-slot handoff; a
//     worker thread consumes it and runs the pipeline (and the BLE notify)
//     outside the timer context. A tick that arrives while one is still
//     pending is dropped and counted; the timer never blocks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleMode {
    #[default]
    Cooperative,
    Deferred,
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock {
    /// Microseconds since an arbitrary, fixed origin.
    fn now_us(&self) -> u64;
    fn sleep_us(&self, us: u64);
}

/// Monotonic clock backed by `std::time::Instant` (esp_timer on the device).
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn sleep_us(&self, us: u64) {
        thread::sleep(Duration::from_micros(us));
    }
}

// ---------------------------------------------------------------------------
// Cooperative
// ---------------------------------------------------------------------------

pub struct CooperativeScheduler {
    period_us: u64,
    last_fire_us: u64,
}

impl CooperativeScheduler {
    pub fn new(period_us: u32, start_us: u64) -> Self {
        Self {
            period_us: period_us.max(1) as u64,
            last_fire_us: start_us,
        }
    }

    /// True when a tick is due. Each `true` consumes exactly one period.
    pub fn poll(&mut self, now_us: u64) -> bool {
        if now_us.wrapping_sub(self.last_fire_us) >= self.period_us {
            self.last_fire_us = self.last_fire_us.wrapping_add(self.period_us);
            true
        } else {
            false
        }
    }

    /// Time left before the next tick is due (0 when overdue).
    pub fn until_next_us(&self, now_us: u64) -> u64 {
        self.period_us
            .saturating_sub(now_us.wrapping_sub(self.last_fire_us))
    }

    pub fn period_us(&self) -> u64 {
        self.period_us
    }
}

// ---------------------------------------------------------------------------
// Deferred: one-slot tick handoff
// ---------------------------------------------------------------------------

/// Timer side. Cheap enough to call from a timer callback.
pub struct TickProducer {
    tx: SyncSender<u32>,
    seq: u32,
    dropped: Arc<AtomicU32>,
}

/// Worker side.
pub struct TickConsumer {
    rx: Receiver<u32>,
    dropped: Arc<AtomicU32>,
}

pub fn tick_channel() -> (TickProducer, TickConsumer) {
    let (tx, rx) = mpsc::sync_channel(1);
    let dropped = Arc::new(AtomicU32::new(0));
    (
        TickProducer {
            tx,
            seq: 0,
            dropped: Arc::clone(&dropped),
        },
        TickConsumer { rx, dropped },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Posted,
    /// Previous tick still pending; this one was dropped.
    Dropped,
    /// Worker has gone away.
    Closed,
}

impl TickProducer {
    /// Post one tick without ever blocking.
    pub fn fire(&mut self) -> FireOutcome {
        self.seq = self.seq.wrapping_add(1);
        match self.tx.try_send(self.seq) {
            Ok(()) => FireOutcome::Posted,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                FireOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => FireOutcome::Closed,
        }
    }
}

impl TickConsumer {
    /// Block until the next tick. `None` once the producer is gone.
    pub fn wait(&self) -> Option<u32> {
        self.rx.recv().ok()
    }

    /// Ticks dropped because the worker was still busy.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Thread-based periodic tick source, for hosts without a hardware timer.
/// Deadlines advance by whole periods, like the cooperative scheduler. The
/// thread exits once the consumer is dropped or after `limit` ticks, which
/// closes the channel for the consumer.
pub fn spawn_thread_ticker(
    period: Duration,
    stack_size: usize,
    mut producer: TickProducer,
    limit: Option<u32>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("ticker".into())
        .stack_size(stack_size)
        .spawn(move || {
            let mut next = Instant::now() + period;
            let mut fired: u32 = 0;
            loop {
                if limit.is_some_and(|limit| fired >= limit) {
                    return;
                }
                fired += 1;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                }
                next += period;
                if producer.fire() == FireOutcome::Closed {
                    return;
                }
            }
        })
}
