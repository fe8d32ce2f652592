//! Dedicated thread owning the selected accelerator backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use num_bigint::BigUint;

use super::{limb_width, pack_limbs, AcceleratorBackend, AcceleratorError};

/// How long drop waits for the backend thread to finish its cleanup.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type Reply = Result<Vec<bool>, AcceleratorError>;

struct Request {
    limbs: Vec<u32>,
    count: usize,
    bit_width: u32,
    reply: mpsc::Sender<Reply>,
}

/// Busy bookkeeping shared with the backend thread.
#[derive(Default)]
struct Backlog {
    /// Requests sent and not yet answered.
    in_flight: AtomicUsize,
    /// Set when a caller gave up on a reply; cleared once the queue drains.
    stalled: AtomicBool,
}

impl Backlog {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.stalled.store(false, Ordering::SeqCst);
        }
    }

    fn mark_stalled(&self) {
        self.stalled.store(true, Ordering::SeqCst);
        // The late reply may already have been delivered.
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            self.stalled.store(false, Ordering::SeqCst);
        }
    }
}

/// Serves batch requests from any worker, each bounded by a deadline.
///
/// The backend lives on its own thread so a hung device can only cost a
/// caller its deadline. A failed batch is retested on the CPU by the caller.
/// After a timeout the accelerator reports itself busy until every queued
/// request has been answered. Only a dead backend thread takes it out of
/// service for good. Dropping the handle closes the request channel; the
/// backend thread then runs `cleanup` and exits.
pub struct AcceleratorThread {
    name: String,
    requests: Option<mpsc::Sender<Request>>,
    handle: Option<JoinHandle<()>>,
    deadline: Duration,
    backlog: Arc<Backlog>,
    disconnected: AtomicBool,
}

impl AcceleratorThread {
    /// Move an initialized backend onto a new thread.
    pub fn spawn(
        mut backend: Box<dyn AcceleratorBackend>,
        deadline: Duration,
    ) -> Result<Self, AcceleratorError> {
        let name = backend.name().to_string();
        let (requests, inbox) = mpsc::channel::<Request>();
        let backlog = Arc::new(Backlog::default());
        let served = backlog.clone();

        let handle = thread::Builder::new()
            .name(format!("accel-{}", name))
            .spawn(move || {
                while let Ok(request) = inbox.recv() {
                    let result =
                        backend.batch_test(&request.limbs, request.count, request.bit_width);
                    // The caller may have given up on this batch already.
                    let _ = request.reply.send(result);
                    served.finish_one();
                }
                backend.cleanup();
            })
            .map_err(|e| AcceleratorError::Init(e.to_string()))?;

        Ok(AcceleratorThread {
            name,
            requests: Some(requests),
            handle: Some(handle),
            deadline,
            backlog,
            disconnected: AtomicBool::new(false),
        })
    }

    /// Backend name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Per-batch deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// False while a timed-out batch is still draining, and for good once
    /// the backend thread has gone away.
    pub fn is_available(&self) -> bool {
        !self.disconnected.load(Ordering::Acquire) && !self.backlog.stalled.load(Ordering::SeqCst)
    }

    /// Fermat-test `candidates` on the accelerator.
    ///
    /// Blocks for at most the deadline. Every error is logged; the caller
    /// falls back to the CPU for this batch only.
    pub fn batch_test(&self, candidates: &[BigUint]) -> Result<Vec<bool>, AcceleratorError> {
        if self.disconnected.load(Ordering::Acquire) {
            return Err(AcceleratorError::Disconnected);
        }
        self.submit(candidates).inspect_err(|e| {
            match e {
                AcceleratorError::Disconnected => {
                    if !self.disconnected.swap(true, Ordering::AcqRel) {
                        log::warn!(
                            target: "miner",
                            "accelerator {} is gone, testing on the CPU from now on",
                            self.name
                        );
                    }
                    return;
                }
                AcceleratorError::Timeout(_) => self.backlog.mark_stalled(),
                _ => {}
            }
            log::warn!(
                target: "miner",
                "accelerator {} failed a batch of {} ({}), retesting it on the CPU",
                self.name,
                candidates.len(),
                e
            );
        })
    }

    fn submit(&self, candidates: &[BigUint]) -> Result<Vec<bool>, AcceleratorError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let bits = candidates.iter().map(BigUint::bits).max().unwrap_or(1);
        let bit_width = limb_width(bits);
        let limbs = pack_limbs(candidates, bit_width)
            .ok_or_else(|| AcceleratorError::Batch("candidate wider than its limbs".into()))?;

        let (reply, response) = mpsc::channel();
        let request = Request {
            limbs,
            count: candidates.len(),
            bit_width,
            reply,
        };
        let requests = self.requests.as_ref().ok_or(AcceleratorError::Disconnected)?;
        self.backlog.in_flight.fetch_add(1, Ordering::SeqCst);
        if requests.send(request).is_err() {
            self.backlog.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(AcceleratorError::Disconnected);
        }

        let results = match response.recv_timeout(self.deadline) {
            Ok(result) => result?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(AcceleratorError::Timeout(self.deadline))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(AcceleratorError::Disconnected),
        };

        if results.len() != candidates.len() {
            return Err(AcceleratorError::BadResults {
                expected: candidates.len(),
                found: results.len(),
            });
        }
        Ok(results)
    }
}

impl Drop for AcceleratorThread {
    fn drop(&mut self) {
        self.requests.take();
        let Some(handle) = self.handle.take() else {
            return;
        };

        let start = Instant::now();
        while !handle.is_finished() && start.elapsed() < SHUTDOWN_GRACE {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                log::error!(target: "miner", "accelerator {} thread panicked", self.name);
            }
        } else {
            log::warn!(
                target: "miner",
                "accelerator {} did not shut down within {:?}, detaching",
                self.name,
                SHUTDOWN_GRACE
            );
        }
    }
}
