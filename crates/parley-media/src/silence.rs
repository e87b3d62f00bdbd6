//! Voice activity detection by amplitude threshold.

use std::time::{Duration, Instant};

/// Edge events produced by the silence detector.
///
/// `SilenceStart` fires once when speech has been below the threshold
/// for at least the minimum silence duration; `SilenceEnd` fires once
/// when speech resumes. No event is produced on steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceEdge {
    SilenceStart,
    SilenceEnd,
}

/// Tracks a rolling is-speaking flag over per-window level readings.
#[derive(Debug)]
pub struct SilenceDetector {
    threshold_db: f32,
    min_silence: Duration,
    speaking: bool,
    below_since: Option<Instant>,
}

impl SilenceDetector {
    pub fn new(threshold_db: f32, min_silence: Duration) -> Self {
        Self {
            threshold_db,
            min_silence,
            speaking: false,
            below_since: None,
        }
    }

    /// Whether the detector currently considers the user to be speaking.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Feeds one dBFS level reading taken at `now`.
    pub fn observe(&mut self, level_db: f32, now: Instant) -> Option<VoiceEdge> {
        if level_db >= self.threshold_db {
            self.below_since = None;
            if !self.speaking {
                self.speaking = true;
                return Some(VoiceEdge::SilenceEnd);
            }
            return None;
        }

        if !self.speaking {
            return None;
        }

        let since = *self.below_since.get_or_insert(now);
        if now.duration_since(since) >= self.min_silence {
            self.speaking = false;
            self.below_since = None;
            return Some(VoiceEdge::SilenceStart);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f32 = -40.0;

    #[test]
    fn first_loud_window_emits_silence_end_once() {
        let mut detector = SilenceDetector::new(THRESHOLD, Duration::from_millis(300));
        let now = Instant::now();
        assert_eq!(detector.observe(-20.0, now), Some(VoiceEdge::SilenceEnd));
        assert_eq!(detector.observe(-18.0, now), None);
        assert!(detector.is_speaking());
    }

    #[test]
    fn silence_start_requires_minimum_duration() {
        let mut detector = SilenceDetector::new(THRESHOLD, Duration::from_millis(300));
        let start = Instant::now();
        detector.observe(-20.0, start);

        // Quiet, but not for long enough yet.
        assert_eq!(detector.observe(-60.0, start + Duration::from_millis(100)), None);
        assert_eq!(detector.observe(-60.0, start + Duration::from_millis(200)), None);
        assert!(detector.is_speaking());

        // Past the minimum silence duration: exactly one edge.
        assert_eq!(
            detector.observe(-60.0, start + Duration::from_millis(450)),
            Some(VoiceEdge::SilenceStart)
        );
        assert_eq!(detector.observe(-60.0, start + Duration::from_millis(600)), None);
        assert!(!detector.is_speaking());
    }

    #[test]
    fn brief_dip_does_not_end_speech() {
        let mut detector = SilenceDetector::new(THRESHOLD, Duration::from_millis(300));
        let start = Instant::now();
        detector.observe(-20.0, start);
        assert_eq!(detector.observe(-60.0, start + Duration::from_millis(100)), None);
        // Speech resumes before min_silence elapses: no edges at all.
        assert_eq!(detector.observe(-22.0, start + Duration::from_millis(150)), None);
        assert_eq!(
            detector.observe(-60.0, start + Duration::from_millis(200)),
            None,
            "the below-threshold clock must restart after speech resumes"
        );
        assert!(detector.is_speaking());
    }

    #[test]
    fn no_events_while_never_speaking() {
        let mut detector = SilenceDetector::new(THRESHOLD, Duration::from_millis(300));
        let start = Instant::now();
        for i in 0..50 {
            assert_eq!(
                detector.observe(-80.0, start + Duration::from_millis(i * 20)),
                None
            );
        }
    }
}
