// ECG Telemetry — Motion Artifact Filter
//
// Minimal heuristic: while the accelerometer magnitude exceeds a threshold,
// the emitted ECG sample is the mean of the raw sample and the previously
// emitted one. Consecutive motion ticks therefore compound the smoothing.

use crate::events::{InertialReading, Sample};

pub struct MotionArtifactFilter {
    threshold: u32,
    /// Last emitted sample; `None` until the first one.
    previous: Option<Sample>,
}

impl MotionArtifactFilter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            previous: None,
        }
    }

    /// Euclidean norm of the accelerometer vector, in raw counts (truncated).
    pub fn magnitude(reading: InertialReading) -> u32 {
        (Self::magnitude_squared(reading) as f64).sqrt() as u32
    }

    fn magnitude_squared(reading: InertialReading) -> u64 {
        let x = reading.x as i64;
        let y = reading.y as i64;
        let z = reading.z as i64;
        (x * x + y * y + z * z) as u64
    }

    /// Compared in squared counts so a fractional excess still counts.
    pub fn is_moving(&self, reading: InertialReading) -> bool {
        let threshold = self.threshold as u64;
        Self::magnitude_squared(reading) > threshold * threshold
    }

    /// Filter one sample. `motion` is `None` when the IMU read failed, in
    /// which case the raw sample passes through. With no history yet the
    /// raw sample is emitted even while moving.
    pub fn apply(&mut self, raw: Sample, motion: Option<InertialReading>) -> Sample {
        let emitted = match (motion, self.previous) {
            (Some(reading), Some(previous)) if self.is_moving(reading) => {
                ((raw as u32 + previous as u32) / 2) as Sample
            }
            _ => raw,
        };
        self.previous = Some(emitted);
        emitted
    }

    pub fn previous(&self) -> Option<Sample> {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3-4-5 triangles scaled to the magnitudes of interest.
    const STILL: InertialReading = InertialReading { x: 600, y: 800, z: 0 }; // 1000
    const SHAKING: InertialReading = InertialReading { x: 15_000, y: 20_000, z: 0 }; // 25000

    #[test]
    fn magnitude_is_euclidean() {
        assert_eq!(MotionArtifactFilter::magnitude(STILL), 1000);
        assert_eq!(MotionArtifactFilter::magnitude(SHAKING), 25_000);
        let extreme = InertialReading::new(i16::MIN, i16::MIN, i16::MIN);
        assert_eq!(MotionArtifactFilter::magnitude(extreme), 56_755);
    }

    #[test]
    fn smooths_while_moving() {
        let mut filter = MotionArtifactFilter::new(20_000);
        assert_eq!(filter.apply(400, Some(STILL)), 400);
        assert_eq!(filter.apply(600, Some(SHAKING)), 500);
        assert_eq!(filter.previous(), Some(500));
    }

    #[test]
    fn passes_through_when_still() {
        let mut filter = MotionArtifactFilter::new(20_000);
        filter.apply(400, Some(STILL));
        assert_eq!(filter.apply(600, Some(STILL)), 600);
    }

    #[test]
    fn consecutive_motion_compounds() {
        let mut filter = MotionArtifactFilter::new(20_000);
        filter.apply(0, None);
        assert_eq!(filter.apply(800, Some(SHAKING)), 400);
        assert_eq!(filter.apply(800, Some(SHAKING)), 600);
        assert_eq!(filter.apply(800, Some(SHAKING)), 700);
    }

    #[test]
    fn threshold_is_exclusive() {
        let filter = MotionArtifactFilter::new(1000);
        assert!(!filter.is_moving(STILL));
    }

    #[test]
    fn failed_imu_read_passes_raw_and_updates_history() {
        let mut filter = MotionArtifactFilter::new(20_000);
        filter.apply(100, None);
        assert_eq!(filter.apply(4095, None), 4095);
        assert_eq!(filter.apply(1, Some(SHAKING)), 2048);
    }

    #[test]
    fn fractional_excess_over_threshold_is_motion() {
        // |(20000, 200, 0)| is 20000.99; truncating first would call it still.
        let filter = MotionArtifactFilter::new(20_000);
        let reading = InertialReading::new(20_000, 200, 0);
        assert_eq!(MotionArtifactFilter::magnitude(reading), 20_000);
        assert!(filter.is_moving(reading));
        assert!(!filter.is_moving(InertialReading::new(20_000, 0, 0)));
    }

    #[test]
    fn first_sample_passes_through_while_moving() {
        let mut filter = MotionArtifactFilter::new(20_000);
        assert_eq!(filter.previous(), None);
        assert_eq!(filter.apply(400, Some(SHAKING)), 400);
        assert_eq!(filter.apply(600, Some(SHAKING)), 500);
    }
}
