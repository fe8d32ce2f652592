//! Mining statistics.

use serde::{Deserialize, Serialize};

/// Counters for one mining run. Workers keep a local copy and merge it after
/// each segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MiningStats {
    /// Segments sieved.
    pub segments: u64,
    /// Multipliers that survived the sieve.
    pub sieve_survivors: u64,
    /// Candidates walked through the constellation check.
    pub candidates_tested: u64,
    /// Candidates sent to the accelerator.
    pub accelerator_tested: u64,
    /// Candidates the accelerator rejected.
    pub accelerator_rejections: u64,
    /// Batches that failed on the accelerator and were retested on the CPU.
    pub accelerator_failures: u64,
    /// Segments abandoned after a worker panic.
    pub worker_errors: u64,
    /// `tuple_counts[n]`: candidates whose first `n` members tested prime.
    pub tuple_counts: Vec<u64>,
    /// Wall time of the run in milliseconds.
    pub elapsed_ms: f64,
}

impl MiningStats {
    /// Create new empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a candidate that reached `tuple_length` members.
    pub fn record_tuple(&mut self, tuple_length: u32) {
        let index = tuple_length as usize;
        if self.tuple_counts.len() <= index {
            self.tuple_counts.resize(index + 1, 0);
        }
        self.tuple_counts[index] += 1;
    }

    /// Candidates that reached at least `length` members.
    pub fn tuples_at_least(&self, length: u32) -> u64 {
        self.tuple_counts.iter().skip(length as usize).sum()
    }

    /// Add another worker's counters. Elapsed time is left alone.
    pub fn merge(&mut self, other: &MiningStats) {
        self.segments += other.segments;
        self.sieve_survivors += other.sieve_survivors;
        self.candidates_tested += other.candidates_tested;
        self.accelerator_tested += other.accelerator_tested;
        self.accelerator_rejections += other.accelerator_rejections;
        self.accelerator_failures += other.accelerator_failures;
        self.worker_errors += other.worker_errors;
        if self.tuple_counts.len() < other.tuple_counts.len() {
            self.tuple_counts.resize(other.tuple_counts.len(), 0);
        }
        for (total, count) in self.tuple_counts.iter_mut().zip(&other.tuple_counts) {
            *total += count;
        }
    }

    /// Candidates tested per second.
    pub fn candidate_rate(&self) -> f64 {
        self.rate(self.candidates_tested)
    }

    /// Tuples of at least `length` members found per second.
    pub fn tuple_rate(&self, length: u32) -> f64 {
        self.rate(self.tuples_at_least(length))
    }

    fn rate(&self, count: u64) -> f64 {
        if self.elapsed_ms > 0.0 {
            count as f64 / (self.elapsed_ms / 1000.0)
        } else {
            0.0
        }
    }

    /// Format the candidate rate for display.
    pub fn format_candidate_rate(&self) -> String {
        format_rate(self.candidate_rate(), "c/s")
    }

    /// One `n-tuples: rate` entry per tuple length reached, starting at 1.
    pub fn format_tuple_rates(&self) -> String {
        (1..self.tuple_counts.len() as u32)
            .map(|length| format!("{}-tuples: {}", length, format_rate(self.tuple_rate(length), "/s")))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn format_rate(rate: f64, unit: &str) -> String {
    if rate >= 1_000_000_000.0 {
        format!("{:.2} G{}", rate / 1_000_000_000.0, unit)
    } else if rate >= 1_000_000.0 {
        format!("{:.2} M{}", rate / 1_000_000.0, unit)
    } else if rate >= 1_000.0 {
        format!("{:.2} K{}", rate / 1_000.0, unit)
    } else {
        format!("{:.2} {}", rate, unit)
    }
}
