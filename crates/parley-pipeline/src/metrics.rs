//! Per-turn latency measurement.

use parley_types::{AverageLatencies, ConversationTurn, StageLatencies};
use std::time::Instant;

/// Mutable stage clocks for one in-flight turn.
///
/// Created when the first transcription fragment of an utterance
/// arrives, finalized into [`StageLatencies`] when the turn completes,
/// then discarded. Failed turns discard their metrics without
/// finalizing.
#[derive(Debug)]
pub struct TurnMetrics {
    utterance_start: Instant,
    stt_end: Option<Instant>,
    llm_start: Option<Instant>,
    llm_end: Option<Instant>,
    tts_start: Option<Instant>,
    tts_end: Option<Instant>,
}

impl TurnMetrics {
    pub fn start() -> Self {
        Self {
            utterance_start: Instant::now(),
            stt_end: None,
            llm_start: None,
            llm_end: None,
            tts_start: None,
            tts_end: None,
        }
    }

    /// Marks the transcript as complete (utterance handed to the LLM).
    pub fn stt_done(&mut self) {
        self.stt_end = Some(Instant::now());
    }

    pub fn llm_started(&mut self) {
        self.llm_start = Some(Instant::now());
    }

    pub fn llm_done(&mut self) {
        self.llm_end = Some(Instant::now());
    }

    pub fn tts_started(&mut self) {
        self.tts_start = Some(Instant::now());
    }

    /// Marks first synthesized byte received.
    pub fn tts_done(&mut self) {
        self.tts_end = Some(Instant::now());
    }

    /// Converts the clocks into per-stage durations.
    pub fn finalize(&self) -> StageLatencies {
        let span_ms = |start: Option<Instant>, end: Option<Instant>| -> u64 {
            match (start, end) {
                (Some(s), Some(e)) => e.duration_since(s).as_millis() as u64,
                _ => 0,
            }
        };
        let end = self
            .tts_end
            .or(self.llm_end)
            .unwrap_or(self.utterance_start);
        StageLatencies {
            stt_ms: span_ms(Some(self.utterance_start), self.stt_end),
            llm_ms: span_ms(self.llm_start, self.llm_end),
            tts_ms: span_ms(self.tts_start, self.tts_end),
            total_ms: end.duration_since(self.utterance_start).as_millis() as u64,
        }
    }
}

/// Mean stage latencies across recorded turns. Zero-valued when empty.
pub fn average_latencies(turns: &[ConversationTurn]) -> AverageLatencies {
    if turns.is_empty() {
        return AverageLatencies::default();
    }
    let n = turns.len() as f64;
    let sum = |f: fn(&StageLatencies) -> u64| -> f64 {
        turns.iter().map(|t| f(&t.latencies) as f64).sum::<f64>() / n
    };
    AverageLatencies {
        stt_ms: sum(|l| l.stt_ms),
        llm_ms: sum(|l| l.llm_ms),
        tts_ms: sum(|l| l.tts_ms),
        total_ms: sum(|l| l.total_ms),
        turns: turns.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn turn_with(stt: u64, llm: u64, tts: u64, total: u64) -> ConversationTurn {
        ConversationTurn {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_text: "u".to_string(),
            assistant_text: "a".to_string(),
            latencies: StageLatencies {
                stt_ms: stt,
                llm_ms: llm,
                tts_ms: tts,
                total_ms: total,
            },
        }
    }

    #[test]
    fn averages_over_empty_history_are_zero() {
        assert_eq!(average_latencies(&[]), AverageLatencies::default());
    }

    #[test]
    fn averages_are_per_stage_means() {
        let turns = vec![turn_with(100, 600, 200, 900), turn_with(300, 400, 400, 1100)];
        let avg = average_latencies(&turns);
        assert_eq!(avg.stt_ms, 200.0);
        assert_eq!(avg.llm_ms, 500.0);
        assert_eq!(avg.tts_ms, 300.0);
        assert_eq!(avg.total_ms, 1000.0);
        assert_eq!(avg.turns, 2);
    }

    #[test]
    fn unfinished_stages_finalize_to_zero() {
        let mut metrics = TurnMetrics::start();
        metrics.llm_started();
        // llm never finished, tts never started
        let latencies = metrics.finalize();
        assert_eq!(latencies.llm_ms, 0);
        assert_eq!(latencies.tts_ms, 0);
    }
}
