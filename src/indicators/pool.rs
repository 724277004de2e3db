/// Worker pool (§4.5.1).
///
/// Grounded on the teacher's `realtime.rs` command/spawn pattern
/// (`RealtimeManager::run_manager`): a background task owns shared state,
/// callers talk to it through channels rather than touching it directly.
/// Here the "shared state" is a pair of semaphores (queue admission,
/// worker concurrency) plus atomic counters, so no single actor loop is
/// needed — `Submit` drives its own task end-to-end.
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    Draining,
    Stopped,
}

fn state_from_u8(v: u8) -> PoolState {
    match v {
        1 => PoolState::Draining,
        2 => PoolState::Stopped,
        _ => PoolState::Running,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AdmissionMode {
    /// Block (with timeout) until queue space is available.
    BlockWithTimeout(Duration),
    /// Return `ErrQueueFull` immediately if the queue is full.
    RejectImmediately,
}

#[derive(Debug, Default)]
pub struct PoolMetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub avg_exec_time_ms: f64,
    pub queue_depth: u64,
    pub workers_busy: u64,
}

struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    total_exec_ms: AtomicU64,
    queue_depth: AtomicU64,
}

pub struct WorkerPool {
    state: Arc<AtomicU8>,
    queue_admission: Arc<Semaphore>,
    worker_permits: Arc<Semaphore>,
    admission_mode: AdmissionMode,
    counters: Arc<Counters>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize, queue_size: usize, admission_mode: AdmissionMode) -> Self {
        WorkerPool {
            state: Arc::new(AtomicU8::new(0)),
            queue_admission: Arc::new(Semaphore::new(queue_size.max(1))),
            worker_permits: Arc::new(Semaphore::new(max_workers.max(1))),
            admission_mode,
            counters: Arc::new(Counters {
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                total_exec_ms: AtomicU64::new(0),
                queue_depth: AtomicU64::new(0),
            }),
            max_workers,
        }
    }

    pub fn state(&self) -> PoolState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Running -> Draining. Further submissions fail with `ErrShutdown`
    /// once the queue has drained or `drain_timeout` elapses, whichever
    /// first — callers await that via `drain`.
    pub fn begin_shutdown(&self) {
        self.state.store(1, Ordering::SeqCst);
    }

    /// Waits until every in-flight task completes or `drain_timeout`
    /// elapses, then transitions to `Stopped`.
    pub async fn drain(&self, drain_timeout: Duration) {
        let deadline = Instant::now() + drain_timeout;
        while self.counters.queue_depth.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.state.store(2, Ordering::SeqCst);
    }

    pub fn metrics(&self) -> PoolMetricsSnapshot {
        let submitted = self.counters.submitted.load(Ordering::SeqCst);
        let completed = self.counters.completed.load(Ordering::SeqCst);
        let failed = self.counters.failed.load(Ordering::SeqCst);
        let total_ms = self.counters.total_exec_ms.load(Ordering::SeqCst);
        let avg = if completed > 0 {
            total_ms as f64 / completed as f64
        } else {
            0.0
        };
        let workers_busy = self.max_workers - self.worker_permits.available_permits();

        PoolMetricsSnapshot {
            submitted,
            completed,
            failed,
            avg_exec_time_ms: avg,
            queue_depth: self.counters.queue_depth.load(Ordering::SeqCst),
            workers_busy: workers_busy as u64,
        }
    }

    /// Runs `work` to completion or until `cancel` fires. Admission is
    /// bounded by `queue_size`; execution concurrency by `max_workers`.
    /// Cancellation promptly aborts waiting on admission; a task already
    /// executing may finish its computation but its result is discarded.
    pub async fn submit<F, T>(&self, cancel: &CancellationToken, work: F) -> EngineResult<T>
    where
        F: FnOnce() -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.state() == PoolState::Stopped {
            return Err(EngineError::Shutdown);
        }

        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        self.counters.queue_depth.fetch_add(1, Ordering::SeqCst);
        let _queue_guard = QueueDepthGuard(&self.counters);

        let admission = match self.admission_mode {
            AdmissionMode::BlockWithTimeout(timeout) => {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(EngineError::Internal("submission cancelled during admission".into())),
                    res = tokio::time::timeout(timeout, self.queue_admission.clone().acquire_owned()) => {
                        match res {
                            Ok(Ok(permit)) => permit,
                            Ok(Err(_)) => return Err(EngineError::Internal("queue semaphore closed".into())),
                            Err(_) => return Err(EngineError::Internal("queue admission timed out".into())),
                        }
                    }
                }
            }
            AdmissionMode::RejectImmediately => {
                match self.queue_admission.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => return Err(EngineError::Internal("ErrQueueFull".into())),
                }
            }
        };

        if self.state() == PoolState::Stopped {
            return Err(EngineError::Shutdown);
        }

        let worker_permits = Arc::clone(&self.worker_permits);
        let counters = Arc::clone(&self.counters);

        let run = async move {
            let _worker_permit = worker_permits
                .acquire_owned()
                .await
                .map_err(|_| EngineError::Internal("worker semaphore closed".into()))?;
            drop(admission);

            let started = Instant::now();
            let result = tokio::task::spawn_blocking(work)
                .await
                .map_err(|e| EngineError::Internal(format!("worker task panicked: {e}")))?;

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    counters.total_exec_ms.fetch_add(elapsed_ms, Ordering::SeqCst);
                }
                Err(_) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            result
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Internal("task execution cancelled".into())),
            result = run => result,
        }
    }
}

struct QueueDepthGuard<'a>(&'a Counters);

impl Drop for QueueDepthGuard<'_> {
    fn drop(&mut self) {
        self.0.queue_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_runs_to_completion_and_updates_metrics() {
        let pool = WorkerPool::new(2, 8, AdmissionMode::BlockWithTimeout(Duration::from_secs(1)));
        let cancel = CancellationToken::new();

        let result = pool.submit(&cancel, || Ok::<_, EngineError>(42)).await.unwrap();
        assert_eq!(result, 42);

        let metrics = pool.metrics();
        assert_eq!(metrics.submitted, 1);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn stopped_pool_rejects_new_submissions() {
        let pool = WorkerPool::new(2, 8, AdmissionMode::BlockWithTimeout(Duration::from_secs(1)));
        pool.begin_shutdown();
        pool.drain(Duration::from_millis(50)).await;

        let cancel = CancellationToken::new();
        let err = pool.submit(&cancel, || Ok::<_, EngineError>(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::Shutdown));
    }

    #[tokio::test]
    async fn cancellation_aborts_before_the_task_result_is_observed() {
        let pool = WorkerPool::new(1, 1, AdmissionMode::BlockWithTimeout(Duration::from_secs(5)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pool
            .submit(&cancel, || Ok::<_, EngineError>(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[tokio::test]
    async fn max_workers_bounds_concurrent_execution() {
        let pool = Arc::new(WorkerPool::new(
            1,
            8,
            AdmissionMode::BlockWithTimeout(Duration::from_secs(1)),
        ));
        let counter = Arc::new(AtomicU64::new(0));
        let max_seen = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            let counter = Arc::clone(&counter);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                pool.submit(&cancel, move || {
                    let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    counter.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, EngineError>(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
