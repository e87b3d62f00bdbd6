//! Audio level monitoring.

/// Computes short-window RMS levels without altering the signal.
///
/// Samples are accumulated into fixed-size windows; one dBFS reading is
/// produced per completed window. Silence (all-zero input) reports the
/// floor value rather than negative infinity.
#[derive(Debug)]
pub struct LevelMonitor {
    window_samples: usize,
    sum_squares: f64,
    count: usize,
}

/// Reported level for digital silence, in dBFS.
pub const LEVEL_FLOOR_DB: f32 = -96.0;

impl LevelMonitor {
    /// `window_ms` of audio at `sample_rate` form one measurement window.
    pub fn new(sample_rate: u32, window_ms: u32) -> Self {
        let window_samples = ((sample_rate as u64 * window_ms as u64) / 1000).max(1) as usize;
        Self {
            window_samples,
            sum_squares: 0.0,
            count: 0,
        }
    }

    /// Feeds samples in; returns one dBFS reading per completed window.
    pub fn process(&mut self, samples: &[i16]) -> Vec<f32> {
        let mut readings = Vec::new();
        for &sample in samples {
            let normalized = f64::from(sample) / f64::from(i16::MAX);
            self.sum_squares += normalized * normalized;
            self.count += 1;
            if self.count >= self.window_samples {
                readings.push(Self::to_dbfs(self.sum_squares, self.count));
                self.sum_squares = 0.0;
                self.count = 0;
            }
        }
        readings
    }

    fn to_dbfs(sum_squares: f64, count: usize) -> f32 {
        let rms = (sum_squares / count as f64).sqrt();
        if rms <= 0.0 {
            LEVEL_FLOOR_DB
        } else {
            ((20.0 * rms.log10()) as f32).max(LEVEL_FLOOR_DB)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_scale_sine_is_near_minus_three_dbfs() {
        let mut monitor = LevelMonitor::new(48_000, 10);
        let samples: Vec<i16> = (0..480)
            .map(|i| {
                let phase = i as f64 * 2.0 * std::f64::consts::PI / 48.0;
                (phase.sin() * f64::from(i16::MAX)) as i16
            })
            .collect();
        let readings = monitor.process(&samples);
        assert_eq!(readings.len(), 1);
        assert!((readings[0] - (-3.01)).abs() < 0.2, "got {}", readings[0]);
    }

    #[test]
    fn silence_reports_floor() {
        let mut monitor = LevelMonitor::new(48_000, 10);
        let readings = monitor.process(&[0i16; 480]);
        assert_eq!(readings, vec![LEVEL_FLOOR_DB]);
    }

    #[test]
    fn partial_window_produces_no_reading() {
        let mut monitor = LevelMonitor::new(48_000, 20);
        assert!(monitor.process(&[1000i16; 100]).is_empty());
        // Completing the window produces exactly one reading.
        assert_eq!(monitor.process(&[1000i16; 860]).len(), 1);
    }
}
