// ECG Telemetry — Sample Buffer
//
// Fixed-capacity accumulator. Capacity 1 is the single-sample mode: every
// push is immediately a full buffer.

use crate::events::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Sample stored, buffer not yet full.
    Stored,
    /// Sample completed the buffer; contents were flushed and the cursor reset.
    Flushed,
}

pub struct SampleBuffer {
    slots: Vec<Reading>,
    capacity: usize,
    overflows: u32,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            overflows: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write position, `0 ..= capacity`.
    pub fn cursor(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    pub fn contents(&self) -> &[Reading] {
        &self.slots
    }

    /// Times a push found the buffer already full.
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Append `reading`. When the buffer becomes full its contents are handed
    /// to `flush` and the cursor returns to 0, regardless of what `flush`
    /// did with them. A push into a buffer that is already full forces a
    /// flush of the stale contents first.
    pub fn push<F>(&mut self, reading: Reading, mut flush: F) -> PushOutcome
    where
        F: FnMut(&[Reading]),
    {
        if self.is_full() {
            self.overflows = self.overflows.wrapping_add(1);
            log::warn!("Sample buffer overflow — forcing flush of {} samples", self.slots.len());
            flush(&self.slots);
            self.slots.clear();
        }

        self.slots.push(reading);

        if self.is_full() {
            flush(&self.slots);
            self.slots.clear();
            PushOutcome::Flushed
        } else {
            PushOutcome::Stored
        }
    }

    /// Test hook for the overflow guard: fills the buffer without flushing.
    #[cfg(test)]
    fn fill_without_flush(&mut self, reading: Reading) {
        while self.slots.len() < self.capacity {
            self.slots.push(reading);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_pushes_flush_exactly_once() {
        let mut buffer = SampleBuffer::new(10);
        let mut flushes = Vec::new();
        for i in 0..10 {
            buffer.push(Reading::Value(i), |batch| flushes.push(batch.to_vec()));
        }
        assert_eq!(flushes.len(), 1);
        assert_eq!(buffer.cursor(), 0);
        let expected: Vec<Reading> = (0..10).map(Reading::Value).collect();
        assert_eq!(flushes[0], expected);
    }

    #[test]
    fn n_minus_one_pushes_do_not_flush() {
        let mut buffer = SampleBuffer::new(20);
        let mut flushes = 0;
        for i in 0..19 {
            let outcome = buffer.push(Reading::Value(i), |_| flushes += 1);
            assert_eq!(outcome, PushOutcome::Stored);
        }
        assert_eq!(flushes, 0);
        assert_eq!(buffer.cursor(), 19);
    }

    #[test]
    fn single_sample_mode_flushes_every_push() {
        let mut buffer = SampleBuffer::new(1);
        let mut seen = Vec::new();
        for v in [5, 6, 7] {
            let outcome = buffer.push(Reading::Value(v), |b| seen.extend_from_slice(b));
            assert_eq!(outcome, PushOutcome::Flushed);
        }
        assert_eq!(seen, [Reading::Value(5), Reading::Value(6), Reading::Value(7)]);
    }

    #[test]
    fn overflow_forces_flush_before_push() {
        let mut buffer = SampleBuffer::new(3);
        buffer.fill_without_flush(Reading::LeadsOff);
        let mut flushes = Vec::new();
        let outcome = buffer.push(Reading::Value(9), |b| flushes.push(b.to_vec()));
        assert_eq!(outcome, PushOutcome::Stored);
        assert_eq!(flushes, [vec![Reading::LeadsOff; 3]]);
        assert_eq!(buffer.contents(), [Reading::Value(9)]);
        assert_eq!(buffer.overflows(), 1);
    }

    #[test]
    fn cursor_never_exceeds_capacity() {
        let mut buffer = SampleBuffer::new(4);
        for i in 0..37 {
            buffer.push(Reading::Value(i), |_| {});
            assert!(buffer.cursor() < buffer.capacity());
        }
        assert_eq!(buffer.cursor(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(SampleBuffer::new(0).capacity(), 1);
    }
}
