//! The mining loop.
//!
//! A fixed pool of scoped worker threads pulls segment indices from a shared
//! cursor, sieves each segment, optionally pre-filters the survivors on the
//! accelerator and walks what remains through the constellation check. The
//! first worker with a self-checked proof publishes it to the result slot and
//! everybody stops. The calling thread supervises with bounded waits so that
//! cancellation is seen within one poll interval.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use num_bigint::BigUint;
use parking_lot::Mutex;
use primepow_core::block::{BlockHeader, PowNonce};
use primepow_core::constellation::{verify, AcceptedPattern, PatternError};
use primepow_core::merit::{achieved_difficulty, merit};
use primepow_core::network::ConsensusParams;
use primepow_core::primes::PrimeTable;
use primepow_core::validation::{check_proof_of_work, Proof};
use thiserror::Error;

use crate::accel::{select_backend, AcceleratorBackend, AcceleratorThread, SoftwareFermat};
use crate::config::{ConfigError, MinerConfig};
use crate::plan::{OffsetPlan, PlanError};
use crate::sieve::{sieve_segment, Segment, SieveSetup};
use crate::slot::{CancelToken, ResultSlot};
use crate::stats::MiningStats;

/// Longest the supervisor sleeps before re-checking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Candidates handled between stop checks when no accelerator is used.
const CPU_BATCH_SIZE: usize = 64;

/// Errors that prevent a mining run from starting.
#[derive(Debug, Error)]
pub enum MinerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot mine this header: {0}")]
    Plan(#[from] PlanError),

    #[error("invalid consensus pattern: {0}")]
    Pattern(#[from] PatternError),

    #[error("pattern index {index} out of range ({available} patterns active)")]
    PatternIndex { index: usize, available: usize },

    #[error("no worker thread could be started: {0}")]
    Spawn(String),
}

/// A header to mine at a given height.
#[derive(Debug, Clone)]
pub struct MiningJob {
    /// Header template; its nonce is replaced by the proof.
    pub header: BlockHeader,
    /// Height the block will have.
    pub height: u64,
    /// Chain the block belongs to.
    pub params: &'static ConsensusParams,
}

impl MiningJob {
    pub fn new(header: BlockHeader, height: u64, params: &'static ConsensusParams) -> Self {
        MiningJob {
            header,
            height,
            params,
        }
    }
}

/// A constellation that passed the same check block validation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundProof {
    /// First member.
    pub candidate: BigUint,
    /// Pattern satisfied.
    pub pattern: AcceptedPattern,
    /// Members verified.
    pub tuple_length: u32,
    /// Payload selecting the candidate.
    pub nonce: PowNonce,
    /// Merit of the constellation span, 2^48 fixed point.
    pub merit: u64,
    /// Merit plus the deterministic sub-merit fraction, 2^48 fixed point.
    pub difficulty: u64,
}

impl FoundProof {
    /// Write the proof into `header`.
    pub fn apply(&self, header: &mut BlockHeader) {
        header.nonce = self.nonce;
    }
}

/// How a mining run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiningOutcome {
    Found(FoundProof),
    /// Every segment was searched without success.
    Exhausted,
    Cancelled,
}

/// Mining pipeline with its configuration and optional accelerator.
pub struct Miner {
    config: MinerConfig,
    accelerator: Option<AcceleratorThread>,
    stats: MiningStats,
}

impl Miner {
    /// Miner using the built-in backends when an accelerator is configured.
    pub fn new(config: MinerConfig) -> Result<Self, MinerError> {
        Self::with_backends(config, vec![Box::new(SoftwareFermat::new())])
    }

    /// Miner probing `backends` in order when an accelerator is configured.
    ///
    /// An accelerator that cannot be started is logged and mining runs on the CPU.
    pub fn with_backends(
        config: MinerConfig,
        backends: Vec<Box<dyn AcceleratorBackend>>,
    ) -> Result<Self, MinerError> {
        config.validate()?;

        let accelerator = config.accelerator.as_ref().and_then(|settings| {
            let backend = select_backend(backends, settings.device)?;
            AcceleratorThread::spawn(backend, settings.deadline())
                .map_err(|e| {
                    log::warn!(target: "miner", "accelerator thread not started: {}", e);
                })
                .ok()
        });

        Ok(Miner {
            config,
            accelerator,
            stats: MiningStats::new(),
        })
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// The running accelerator, if one was started.
    pub fn accelerator(&self) -> Option<&AcceleratorThread> {
        self.accelerator.as_ref()
    }

    /// Statistics of the last run.
    pub fn stats(&self) -> &MiningStats {
        &self.stats
    }

    /// Search for a proof of work for `job` until one is found, the search
    /// space or segment budget runs out, or `cancel` fires.
    pub fn mine(
        &mut self,
        job: &MiningJob,
        cancel: &CancelToken,
    ) -> Result<MiningOutcome, MinerError> {
        let started = Instant::now();
        let table = PrimeTable::global();

        let active = job.params.patterns_at(job.height);
        let gaps = active
            .get(self.config.pattern_index)
            .ok_or(MinerError::PatternIndex {
                index: self.config.pattern_index,
                available: active.len(),
            })?;
        let pattern = AcceptedPattern::from_static(gaps)?;
        let version = job.params.pow_version_at(job.height);

        let plan = OffsetPlan::new(
            &job.header,
            version,
            job.params,
            pattern,
            self.config.primorial_number,
            table,
        )?;
        let setup = SieveSetup::new(&plan, table, self.config.sieve_primes);
        let threads = self.config.worker_threads();

        log::info!(
            target: "miner",
            "mining {} on {} at height {} with {} threads: primorial of {} primes, {} offset bits, {} sieve primes",
            plan.pattern,
            job.params.network.name(),
            job.height,
            threads,
            plan.primorial_number,
            plan.trailing_zero_bits,
            setup.prime_count()
        );

        let search = Search {
            job,
            plan: &plan,
            setup: &setup,
            config: &self.config,
            accelerator: self.accelerator.as_ref(),
            cancel,
            stop: AtomicBool::new(false),
            cursor: Mutex::new(0),
            slot: ResultSlot::new(),
            stats: Mutex::new(MiningStats::new()),
            active_workers: AtomicUsize::new(0),
        };

        let spawn_error = thread::scope(|scope| {
            let mut spawned = 0usize;
            let mut last_error = None;
            for id in 0..threads {
                let search = &search;
                search.active_workers.fetch_add(1, Ordering::AcqRel);
                let result = thread::Builder::new()
                    .name(format!("miner-{}", id))
                    .spawn_scoped(scope, move || search.run_worker(id));
                match result {
                    Ok(_) => spawned += 1,
                    Err(e) => {
                        search.active_workers.fetch_sub(1, Ordering::AcqRel);
                        log::warn!(target: "miner", "could not start worker {}: {}", id, e);
                        last_error = Some(e.to_string());
                    }
                }
            }
            if spawned == 0 {
                return last_error;
            }
            search.supervise();
            None
        });
        if let Some(e) = spawn_error {
            return Err(MinerError::Spawn(e));
        }

        let found = search.slot.take();
        let mut stats = search.stats.into_inner();
        stats.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match found {
            Some(proof) => MiningOutcome::Found(proof),
            None if cancel.is_cancelled() => MiningOutcome::Cancelled,
            None => MiningOutcome::Exhausted,
        };
        log::info!(
            target: "miner",
            "mining stopped ({}) after {} segments: {}, {}",
            match &outcome {
                MiningOutcome::Found(_) => "found",
                MiningOutcome::Exhausted => "exhausted",
                MiningOutcome::Cancelled => "cancelled",
            },
            stats.segments,
            stats.format_candidate_rate(),
            stats.format_tuple_rates()
        );

        self.stats = stats;
        Ok(outcome)
    }
}

/// State shared by the workers of one run.
struct Search<'a> {
    job: &'a MiningJob,
    plan: &'a OffsetPlan,
    setup: &'a SieveSetup,
    config: &'a MinerConfig,
    accelerator: Option<&'a AcceleratorThread>,
    cancel: &'a CancelToken,
    stop: AtomicBool,
    /// Next segment index to hand out.
    cursor: Mutex<u64>,
    slot: ResultSlot<FoundProof>,
    stats: Mutex<MiningStats>,
    active_workers: AtomicUsize,
}

impl Search<'_> {
    #[inline]
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.cancel.is_cancelled()
    }

    /// Wait for a proof, cancellation or the last worker to finish.
    fn supervise(&self) {
        loop {
            if self.slot.wait_timeout(POLL_INTERVAL)
                || self.cancel.is_cancelled()
                || self.active_workers.load(Ordering::Acquire) == 0
            {
                break;
            }
        }
        self.stop.store(true, Ordering::Release);
    }

    fn next_segment(&self) -> Option<u64> {
        let mut next = self.cursor.lock();
        if self.config.max_segments.is_some_and(|max| *next >= max) {
            return None;
        }
        let start = next.checked_mul(self.config.segment_size as u64)?;
        if start >= self.plan.multiplier_limit {
            return None;
        }
        let index = *next;
        *next += 1;
        Some(index)
    }

    fn run_worker(&self, id: usize) {
        self.worker_loop(id, |index, segment, stats| {
            self.search_segment(index, segment, stats)
        });
    }

    /// Pull segments until told to stop. A panic in `process` costs only the
    /// segment it was working on.
    fn worker_loop<F>(&self, id: usize, mut process: F)
    where
        F: FnMut(u64, &mut Segment, &mut MiningStats) -> Option<FoundProof>,
    {
        let mut segment = Segment::new(self.config.segment_size);
        let mut local = MiningStats::new();

        while !self.should_stop() {
            let Some(index) = self.next_segment() else {
                break;
            };
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| process(index, &mut segment, &mut local)));
            match result {
                Ok(Some(proof)) => {
                    let (bits, merit) = (proof.candidate.bits(), proof.merit);
                    if self.slot.publish(proof) {
                        log::info!(
                            target: "miner",
                            "worker {} found a {}-bit {} in segment {} (merit {:.6})",
                            id,
                            bits,
                            self.plan.pattern,
                            index,
                            primepow_core::fixed::to_f64(merit)
                        );
                    }
                    self.stop.store(true, Ordering::Release);
                }
                Ok(None) => {}
                Err(payload) => {
                    log::error!(
                        target: "miner",
                        "worker {} panicked in segment {}: {}",
                        id,
                        index,
                        panic_message(payload.as_ref())
                    );
                    local.worker_errors += 1;
                    segment = Segment::new(self.config.segment_size);
                }
            }
            self.stats.lock().merge(&local);
            local = MiningStats::new();
        }

        if self.active_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.slot.wake();
        }
    }

    fn search_segment(
        &self,
        index: u64,
        segment: &mut Segment,
        stats: &mut MiningStats,
    ) -> Option<FoundProof> {
        let size = self.config.segment_size as u64;
        let start = index * size;
        let len = (self.plan.multiplier_limit - start).min(size) as usize;

        sieve_segment(self.setup, segment, start, len);
        stats.segments += 1;
        stats.sieve_survivors += segment.survivor_count() as u64;
        log::trace!(
            target: "miner",
            "segment {}: {} of {} multipliers survive",
            index,
            segment.survivor_count(),
            len
        );

        let batch_size = match (self.accelerator, &self.config.accelerator) {
            (Some(_), Some(settings)) => settings.batch_size,
            _ => CPU_BATCH_SIZE,
        };
        let mut batch = Vec::with_capacity(batch_size);
        for multiplier in segment.survivors() {
            batch.push(multiplier);
            if batch.len() == batch_size {
                if let Some(proof) = self.test_batch(&batch, stats) {
                    return Some(proof);
                }
                batch.clear();
                if self.should_stop() {
                    return None;
                }
            }
        }
        self.test_batch(&batch, stats)
    }

    fn test_batch(&self, multipliers: &[u64], stats: &mut MiningStats) -> Option<FoundProof> {
        if multipliers.is_empty() {
            return None;
        }
        let candidates: Vec<BigUint> = multipliers.iter().map(|&k| self.plan.candidate(k)).collect();
        let hints = self.prefilter(&candidates, stats);

        for ((&multiplier, candidate), hint) in multipliers.iter().zip(&candidates).zip(hints) {
            if self.should_stop() {
                return None;
            }
            if !hint {
                continue;
            }
            stats.candidates_tested += 1;
            let result = verify(candidate, &self.plan.pattern);
            stats.record_tuple(result.tuple_length);
            if result.accepted {
                if let Some(proof) = self.confirm(multiplier, candidate) {
                    return Some(proof);
                }
            }
        }
        None
    }

    /// Accelerator verdicts for `candidates`; all `true` when it is absent, busy or failing.
    fn prefilter(&self, candidates: &[BigUint], stats: &mut MiningStats) -> Vec<bool> {
        let Some(accelerator) = self.accelerator.filter(|a| a.is_available()) else {
            return vec![true; candidates.len()];
        };
        stats.accelerator_tested += candidates.len() as u64;
        match accelerator.batch_test(candidates) {
            Ok(results) => {
                stats.accelerator_rejections += results.iter().filter(|&&r| !r).count() as u64;
                results
            }
            Err(_) => {
                stats.accelerator_failures += 1;
                vec![true; candidates.len()]
            }
        }
    }

    /// Encode the payload and run it through block validation before publishing.
    fn confirm(&self, multiplier: u64, candidate: &BigUint) -> Option<FoundProof> {
        let Some(nonce) = self.plan.encode(multiplier) else {
            log::warn!(target: "miner", "multiplier {} does not fit the payload", multiplier);
            return None;
        };
        let mut header = self.job.header.clone();
        header.nonce = nonce;

        match check_proof_of_work(&header, self.job.height, self.job.params) {
            Ok(Proof::Valid {
                candidate: checked,
                pattern,
                tuple_length,
            }) if &checked == candidate => {
                let end = &checked + pattern.span();
                Some(FoundProof {
                    merit: merit(&checked, &end),
                    difficulty: achieved_difficulty(&checked, &end),
                    candidate: checked,
                    pattern,
                    tuple_length,
                    nonce,
                })
            }
            Ok(other) => {
                log::error!(
                    target: "miner",
                    "self-check of multiplier {} disagrees with the search: {:?}",
                    multiplier,
                    other
                );
                None
            }
            Err(e) => {
                log::error!(target: "miner", "self-check of multiplier {} failed: {}", multiplier, e);
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
