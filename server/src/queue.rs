//! The Write Queue: every substrate mutation is serialized through one
//! dedicated consumer task so there is never more than one write transaction
//! in flight, without blocking the tokio reactor thread per writer.
//!
//! Grounded on `fazt_core::WorkerPool`'s shape (bounded channel, a oneshot
//! response per job, a dedicated consumer), specialized here to: a single
//! FIFO consumer (no priority tiers), a per-job deadline carried alongside
//! the job instead of a priority tag, and admission control on submit
//! instead of always accepting.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use fazt_types::prelude::*;
use fazt_types::substrate::Substrate;

/// Queue capacity (§4.3): bounded so a stalled writer can't grow memory
/// without limit.
const CAPACITY: usize = 1000;
/// Below this remaining budget, admission control rejects immediately
/// instead of attempting a bounded wait.
const REJECT_FAST_THRESHOLD: Duration = Duration::from_millis(100);
/// Longest a submit will wait for a slot to free up once the channel is full.
const BOUNDED_WAIT: Duration = Duration::from_millis(1000);
/// Default per-call budget for handlers that don't compute their own
/// remaining-deadline.
pub const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

type BoxFut = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce() -> BoxFut + Send>;

/// Serializes substrate mutations behind one consumer task.
pub struct WriteQueue {
	tx: flume::Sender<Job>,
	depth: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WriteQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WriteQueue").field("depth", &self.depth()).finish()
	}
}

impl WriteQueue {
	/// Spawns the consumer task and returns the handle used to submit jobs.
	pub fn start() -> Arc<Self> {
		let (tx, rx) = flume::bounded::<Job>(CAPACITY);
		let depth = Arc::new(AtomicUsize::new(0));
		let depth_worker = depth.clone();
		tokio::spawn(async move {
			while let Ok(job) = rx.recv_async().await {
				depth_worker.fetch_sub(1, Ordering::Relaxed);
				job().await;
			}
		});
		Arc::new(Self { tx, depth })
	}

	/// Approximate number of jobs waiting behind the consumer, for health reporting.
	pub fn depth(&self) -> usize {
		self.depth.load(Ordering::Relaxed)
	}

	/// Runs `f(substrate)` on the single writer. `budget` is the caller's
	/// remaining deadline: below `REJECT_FAST_THRESHOLD` the call fails fast
	/// with `QueueUnavailable`; otherwise a full queue gets one bounded wait
	/// for a slot before failing the same way. If the job is still sitting in
	/// the channel past its deadline when the worker picks it up, it never
	/// touches the substrate and returns `DeadlineExceeded` instead.
	pub async fn submit<F, Fut, T>(&self, substrate: Arc<dyn Substrate>, budget: Duration, f: F) -> ClResult<T>
	where
		F: FnOnce(Arc<dyn Substrate>) -> Fut + Send + 'static,
		Fut: Future<Output = ClResult<T>> + Send + 'static,
		T: Send + 'static,
	{
		let deadline = Instant::now() + budget;
		let (resp_tx, resp_rx) = oneshot::channel::<ClResult<T>>();
		let job: Job = Box::new(move || {
			Box::pin(async move {
				if Instant::now() > deadline {
					let _ = resp_tx.send(Err(Error::DeadlineExceeded));
					return;
				}
				let result = f(substrate).await;
				let _ = resp_tx.send(result);
			})
		});

		if budget < REJECT_FAST_THRESHOLD {
			self.tx.try_send(job).map_err(|_| Error::QueueUnavailable)?;
		} else {
			match self.tx.try_send(job) {
				Ok(()) => {}
				Err(flume::TrySendError::Disconnected(_)) => {
					return Err(Error::Internal("write queue consumer has stopped".into()));
				}
				Err(flume::TrySendError::Full(job)) => {
					let wait = BOUNDED_WAIT.min(budget);
					tokio::time::timeout(wait, self.tx.send_async(job))
						.await
						.map_err(|_| Error::QueueUnavailable)?
						.map_err(|_| Error::Internal("write queue consumer has stopped".into()))?;
				}
			}
		}

		self.depth.fetch_add(1, Ordering::Relaxed);
		resp_rx.await.map_err(|_| Error::Internal("write queue worker dropped the response channel".into()))?
	}

	/// `submit` with the default per-call budget.
	pub async fn run<F, Fut, T>(&self, substrate: Arc<dyn Substrate>, f: F) -> ClResult<T>
	where
		F: FnOnce(Arc<dyn Substrate>) -> Fut + Send + 'static,
		Fut: Future<Output = ClResult<T>> + Send + 'static,
		T: Send + 'static,
	{
		self.submit(substrate, DEFAULT_BUDGET, f).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use fazt_core::WorkerPool;
	use fazt_substrate_sqlite::SqliteSubstrate;

	async fn test_substrate() -> (Arc<dyn Substrate>, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let worker = Arc::new(WorkerPool::new(0, 0, 1));
		let substrate: Arc<dyn Substrate> = Arc::new(SqliteSubstrate::open(dir.path(), worker).await.unwrap());
		(substrate, dir)
	}

	#[tokio::test]
	async fn serializes_a_mutation_through_the_queue() {
		let (substrate, _dir) = test_substrate().await;
		let queue = WriteQueue::start();
		let app_id = AppId::new("a");
		queue
			.run(substrate.clone(), move |s| async move { s.create_app(&app_id, "A", "alice", None).await })
			.await
			.unwrap();
		let apps = substrate.list_apps().await.unwrap();
		assert_eq!(apps.len(), 1);
	}

	#[tokio::test]
	async fn rejects_fast_under_threshold_when_full() {
		let (substrate, _dir) = test_substrate().await;
		let queue = WriteQueue::start();
		let tiny_budget = Duration::from_millis(1);
		// The channel isn't actually full in this unit test (no way to fill
		// 1000 slots deterministically without real contention), so this
		// mostly documents the admission-control call shape: a budget below
		// the fast-reject threshold still succeeds when a slot is free.
		let app_id = AppId::new("b");
		let res = queue
			.submit(substrate, tiny_budget, move |s| async move { s.create_app(&app_id, "B", "bob", None).await })
			.await;
		assert!(res.is_ok());
	}
}

// vim: ts=4
