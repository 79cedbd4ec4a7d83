//! Concurrent request throttling.
//!
//! Unlike rate limiting (requests per time period), the throttler caps
//! in-flight requests, queues the overflow by priority with deadlines, and
//! sheds low-priority work under sustained load. A slot is represented by
//! an RAII [`Permit`]: dropping it releases the slot on every exit path and
//! wakes the highest-priority waiter.

pub mod strategies;

pub use strategies::{priority_for_endpoint, LoadTracker, Priority, Shedding, StrategyKind};

use crate::metrics::OpsMetrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub max_concurrent: usize,
    pub max_queue: usize,
    /// The single deadline knob: how long a request may wait in the queue.
    pub queue_timeout: Duration,
    pub strategy: StrategyKind,
    /// Utilization above which Background and Low are shed (adaptive).
    pub shed_watermark: f64,
    /// Utilization above which Normal is also shed, once sustained.
    pub pressure_watermark: f64,
    /// Utilization below which shedding releases (hysteresis).
    pub recover_watermark: f64,
    /// Consecutive samples over a watermark before shedding engages.
    pub pressure_samples: u32,
    /// Cadence of the background load sampler.
    pub sample_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            max_queue: 50,
            queue_timeout: Duration::from_secs(30),
            strategy: StrategyKind::Adaptive,
            shed_watermark: 0.8,
            pressure_watermark: 0.9,
            recover_watermark: 0.6,
            pressure_samples: 3,
            sample_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// At the concurrency limit with no queue (or queue full).
    CapacityExceeded,
    /// Low priority rejected while critical or high requests wait.
    PriorityBypass,
    /// Shed by the adaptive strategy under load.
    Shed,
    /// Queue deadline expired before a slot freed up.
    QueueTimeout,
    /// Throttler shut down while the request waited.
    Shutdown,
}

/// Decision for one admission attempt. `Queue` hands back a waiter the
/// caller awaits; everything else resolves immediately.
pub enum AdmitDecision {
    Allow(Permit),
    Queue(QueuedWaiter),
    Reject {
        reason: RejectReason,
        retry_after: Duration,
    },
}

struct Waiter {
    id: Uuid,
    priority: Priority,
    seq: u64,
    tx: oneshot::Sender<Permit>,
}

struct State {
    active: usize,
    queue: Vec<Waiter>,
    seq: u64,
    tracker: LoadTracker,
}

struct Shared {
    config: ThrottleConfig,
    state: Mutex<State>,
    metrics: Arc<OpsMetrics>,
}

impl Shared {
    /// Hand the freed slot to the best waiter, or shrink `active`.
    fn release_slot(shared: &Arc<Shared>) {
        let mut st = shared.state.lock();
        loop {
            let Some(idx) = best_waiter_index(&st.queue) else {
                st.active = st.active.saturating_sub(1);
                shared.metrics.throttle_active.set(st.active as i64);
                break;
            };
            let waiter = st.queue.swap_remove(idx);
            shared.metrics.throttle_queued.set(st.queue.len() as i64);
            let permit = Permit {
                shared: Some(shared.clone()),
                request_id: waiter.id,
            };
            match waiter.tx.send(permit) {
                Ok(()) => break, // slot transferred, active unchanged
                Err(mut returned) => {
                    // Waiter already timed out; defuse (a live permit
                    // would re-enter this lock on drop) and try the next.
                    returned.defuse();
                }
            }
        }
    }
}

/// Highest priority first, FIFO within a priority class.
fn best_waiter_index(queue: &[Waiter]) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.seq.cmp(&a.seq))
        })
        .map(|(idx, _)| idx)
}

/// RAII slot guard. Dropping (or explicitly releasing) frees the slot
/// exactly once, on every exit path.
pub struct Permit {
    shared: Option<Arc<Shared>>,
    request_id: Uuid,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit")
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl Permit {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn release(self) {
        // Drop does the work.
    }

    fn defuse(&mut self) {
        self.shared.take();
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            Shared::release_slot(&shared);
        }
    }
}

/// A queued admission; await [`QueuedWaiter::wait`] for the outcome.
pub struct QueuedWaiter {
    rx: oneshot::Receiver<Permit>,
    id: Uuid,
    shared: Arc<Shared>,
    enqueued_at: Instant,
}

impl QueuedWaiter {
    /// Wait for a slot until the queue deadline.
    pub async fn wait(mut self) -> Result<Permit, RejectReason> {
        let deadline = self.shared.config.queue_timeout;
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(permit)) => {
                self.shared
                    .metrics
                    .throttle_wait_duration
                    .observe(self.enqueued_at.elapsed().as_secs_f64());
                Ok(permit)
            }
            Ok(Err(_)) => Err(RejectReason::Shutdown),
            Err(_elapsed) => {
                // Pull ourselves out of the queue; if the slot was handed
                // over in the race window, take it after all.
                let removed = {
                    let mut st = self.shared.state.lock();
                    let before = st.queue.len();
                    st.queue.retain(|w| w.id != self.id);
                    let removed = st.queue.len() != before;
                    self.shared
                        .metrics
                        .throttle_queued
                        .set(st.queue.len() as i64);
                    removed
                };
                if !removed {
                    if let Ok(permit) = self.rx.try_recv() {
                        return Ok(permit);
                    }
                }
                self.shared.metrics.throttle_timeout.inc();
                Err(RejectReason::QueueTimeout)
            }
        }
    }
}

pub struct Throttler {
    shared: Arc<Shared>,
}

impl Throttler {
    pub fn new(config: ThrottleConfig, metrics: Arc<OpsMetrics>) -> Self {
        let tracker = LoadTracker::new(
            config.shed_watermark,
            config.pressure_watermark,
            config.recover_watermark,
            config.pressure_samples,
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    active: 0,
                    queue: Vec::new(),
                    seq: 0,
                    tracker,
                }),
                config,
                metrics,
            }),
        }
    }

    /// Admission by endpoint class.
    pub fn admit(&self, endpoint: &str) -> AdmitDecision {
        self.admit_with_priority(priority_for_endpoint(endpoint))
    }

    pub fn admit_with_priority(&self, priority: Priority) -> AdmitDecision {
        let shared = &self.shared;
        let config = &shared.config;
        let mut st = shared.state.lock();

        let decision = decide(config, &st, priority);
        match decision {
            Decision::Allow => {
                st.active += 1;
                shared.metrics.throttle_active.set(st.active as i64);
                shared.metrics.throttle_allow.inc();
                AdmitDecision::Allow(Permit {
                    shared: Some(shared.clone()),
                    request_id: Uuid::new_v4(),
                })
            }
            Decision::Queue => {
                let (tx, rx) = oneshot::channel();
                let id = Uuid::new_v4();
                st.seq += 1;
                let seq = st.seq;
                st.queue.push(Waiter {
                    id,
                    priority,
                    seq,
                    tx,
                });
                shared.metrics.throttle_queued.set(st.queue.len() as i64);
                shared.metrics.throttle_queue.inc();
                AdmitDecision::Queue(QueuedWaiter {
                    rx,
                    id,
                    shared: shared.clone(),
                    enqueued_at: Instant::now(),
                })
            }
            Decision::Reject(reason) => {
                shared.metrics.throttle_reject.inc();
                AdmitDecision::Reject {
                    reason,
                    retry_after: config.queue_timeout,
                }
            }
        }
    }

    /// Record one utilization sample; drives adaptive shedding. Normally
    /// called by the sampler task, directly callable for tests and custom
    /// loops.
    pub fn sample_load(&self) -> Shedding {
        let mut st = self.shared.state.lock();
        let utilization = st.active as f64 / self.shared.config.max_concurrent.max(1) as f64;
        st.tracker.record(utilization)
    }

    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Spawn the background load sampler. The handle stops it on shutdown.
    pub fn start_sampler(&self) -> SamplerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let interval = self.shared.config.sample_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let mut st = shared.state.lock();
                        let utilization =
                            st.active as f64 / shared.config.max_concurrent.max(1) as f64;
                        st.tracker.record(utilization);
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        SamplerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

pub struct SamplerHandle {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl SamplerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}

enum Decision {
    Allow,
    Queue,
    Reject(RejectReason),
}

fn decide(config: &ThrottleConfig, st: &State, priority: Priority) -> Decision {
    match config.strategy {
        StrategyKind::Simple => {
            if st.active < config.max_concurrent {
                Decision::Allow
            } else {
                Decision::Reject(RejectReason::CapacityExceeded)
            }
        }
        StrategyKind::Queued => queued_decision(config, st),
        StrategyKind::Priority => {
            let urgent_waiting = st.queue.iter().any(|w| w.priority >= Priority::High);
            if urgent_waiting && priority <= Priority::Low {
                Decision::Reject(RejectReason::PriorityBypass)
            } else {
                queued_decision(config, st)
            }
        }
        StrategyKind::Adaptive => {
            if st.tracker.shedding().sheds(priority) {
                Decision::Reject(RejectReason::Shed)
            } else {
                queued_decision(config, st)
            }
        }
    }
}

fn queued_decision(config: &ThrottleConfig, st: &State) -> Decision {
    if st.active < config.max_concurrent {
        Decision::Allow
    } else if st.queue.len() < config.max_queue {
        Decision::Queue
    } else {
        Decision::Reject(RejectReason::CapacityExceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttler(strategy: StrategyKind, max_concurrent: usize, max_queue: usize) -> Throttler {
        let metrics = Arc::new(OpsMetrics::new().unwrap());
        Throttler::new(
            ThrottleConfig {
                max_concurrent,
                max_queue,
                queue_timeout: Duration::from_millis(200),
                strategy,
                ..ThrottleConfig::default()
            },
            metrics,
        )
    }

    fn expect_allow(decision: AdmitDecision) -> Permit {
        match decision {
            AdmitDecision::Allow(permit) => permit,
            AdmitDecision::Queue(_) => panic!("expected Allow, got Queue"),
            AdmitDecision::Reject { reason, .. } => {
                panic!("expected Allow, got Reject({:?})", reason)
            }
        }
    }

    fn expect_queue(decision: AdmitDecision) -> QueuedWaiter {
        match decision {
            AdmitDecision::Queue(waiter) => waiter,
            AdmitDecision::Allow(_) => panic!("expected Queue, got Allow"),
            AdmitDecision::Reject { reason, .. } => {
                panic!("expected Queue, got Reject({:?})", reason)
            }
        }
    }

    fn expect_reject(decision: AdmitDecision) -> RejectReason {
        match decision {
            AdmitDecision::Reject { reason, .. } => reason,
            AdmitDecision::Allow(_) => panic!("expected Reject, got Allow"),
            AdmitDecision::Queue(_) => panic!("expected Reject, got Queue"),
        }
    }

    #[tokio::test]
    async fn test_simple_strategy_allows_then_rejects() {
        let throttler = throttler(StrategyKind::Simple, 2, 0);
        let _p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        let _p2 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        assert_eq!(
            expect_reject(throttler.admit_with_priority(Priority::Normal)),
            RejectReason::CapacityExceeded
        );
    }

    #[tokio::test]
    async fn test_release_admits_next_request() {
        let throttler = throttler(StrategyKind::Simple, 1, 0);
        let p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        drop(p1);
        let _p2 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        assert_eq!(throttler.active(), 1);
    }

    #[tokio::test]
    async fn test_queued_strategy_hands_slot_to_waiter() {
        let throttler = throttler(StrategyKind::Queued, 1, 5);
        let p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        let waiter = expect_queue(throttler.admit_with_priority(Priority::Normal));
        assert_eq!(throttler.queued(), 1);

        drop(p1);
        let p2 = waiter.wait().await.expect("queued request gets the slot");
        assert_eq!(throttler.active(), 1);
        assert_eq!(throttler.queued(), 0);
        drop(p2);
        assert_eq!(throttler.active(), 0);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_lowest() {
        let throttler = throttler(StrategyKind::Queued, 1, 1);
        let _p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        let _w = expect_queue(throttler.admit_with_priority(Priority::Background));
        assert_eq!(
            expect_reject(throttler.admit_with_priority(Priority::Background)),
            RejectReason::CapacityExceeded
        );
    }

    #[tokio::test]
    async fn test_queue_timeout_rejects_with_metric() {
        let throttler = throttler(StrategyKind::Queued, 1, 5);
        let _p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        let waiter = expect_queue(throttler.admit_with_priority(Priority::Normal));
        let err = waiter.wait().await.unwrap_err();
        assert_eq!(err, RejectReason::QueueTimeout);
        assert_eq!(throttler.queued(), 0, "timed-out waiter left the queue");
    }

    #[tokio::test]
    async fn test_priority_bypass_rejects_low_while_high_waits() {
        let throttler = throttler(StrategyKind::Priority, 1, 5);
        let _p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        let _high = expect_queue(throttler.admit_with_priority(Priority::High));
        assert_eq!(
            expect_reject(throttler.admit_with_priority(Priority::Background)),
            RejectReason::PriorityBypass
        );
        // Normal is still allowed to queue.
        let _n = expect_queue(throttler.admit_with_priority(Priority::Normal));
    }

    /// The adaptive shedding scenario: saturate, observe sustained
    /// pressure, shed background, and still serve critical first.
    #[tokio::test]
    async fn test_adaptive_sheds_background_and_serves_critical_first() {
        let throttler = throttler(StrategyKind::Adaptive, 10, 20);

        let mut permits = Vec::new();
        for _ in 0..10 {
            permits.push(expect_allow(
                throttler.admit_with_priority(Priority::Normal),
            ));
        }

        // Queue capacity is open, so background requests queue.
        let mut background_waiters = Vec::new();
        for _ in 0..5 {
            background_waiters.push(expect_queue(
                throttler.admit_with_priority(Priority::Background),
            ));
        }

        // Three sustained full-utilization samples engage shedding.
        for _ in 0..3 {
            throttler.sample_load();
        }
        assert_eq!(
            expect_reject(throttler.admit_with_priority(Priority::Background)),
            RejectReason::Shed
        );

        // Critical still queues, and jumps the queued background work.
        let critical = expect_queue(throttler.admit_with_priority(Priority::Critical));
        drop(permits.pop());
        let permit = critical
            .wait()
            .await
            .expect("critical acquires the freed slot before background");
        drop(permit);
        drop(background_waiters);
        drop(permits);
    }

    #[tokio::test]
    async fn test_fifo_within_priority_class() {
        let throttler = throttler(StrategyKind::Queued, 1, 5);
        let p1 = expect_allow(throttler.admit_with_priority(Priority::Normal));
        let first = expect_queue(throttler.admit_with_priority(Priority::Normal));
        let second = expect_queue(throttler.admit_with_priority(Priority::Normal));

        drop(p1);
        // Only the first waiter gets the slot.
        let got = first.wait().await;
        assert!(got.is_ok());
        // Second still queued until the first permit drops.
        drop(got);
        let got2 = second.wait().await;
        assert!(got2.is_ok());
    }

    #[tokio::test]
    async fn test_active_never_exceeds_limit() {
        let throttler = throttler(StrategyKind::Queued, 3, 10);
        let mut permits = Vec::new();
        let mut waiters = Vec::new();
        for _ in 0..3 {
            permits.push(expect_allow(
                throttler.admit_with_priority(Priority::Normal),
            ));
        }
        for _ in 0..5 {
            waiters.push(expect_queue(
                throttler.admit_with_priority(Priority::Normal),
            ));
        }
        assert_eq!(throttler.active(), 3);
        permits.clear();
        // Slots hand off to waiters without overshooting.
        assert!(throttler.active() <= 3);
    }
}
