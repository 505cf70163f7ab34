//! Background task scheduler. Handles one-off delayed tasks and cron-style
//! recurring tasks (analytics flush, KV TTL sweep, media variant cleanup),
//! with optional dependency ordering and retry backoff.

use async_trait::async_trait;
use std::{
	collections::{BTreeMap, HashMap},
	fmt::Debug,
	str::FromStr,
	sync::{Arc, Mutex, RwLock},
};

use chrono::{DateTime, Utc};
use croner::Cron;

use fazt_types::lock;
use fazt_types::prelude::*;

pub type TaskId = u64;

/// Cron schedule wrapper over the `croner` crate; stores the source
/// expression alongside the parsed form so it round-trips through logging.
#[derive(Debug, Clone)]
pub struct CronSchedule {
	expr: Box<str>,
	cron: Cron,
}

impl CronSchedule {
	pub fn parse(expr: &str) -> ClResult<Self> {
		let cron = Cron::from_str(expr)
			.map_err(|e| Error::ValidationFailed(format!("invalid cron expression: {e}")))?;
		Ok(Self { expr: expr.into(), cron })
	}

	pub fn next_execution(&self, after: Timestamp) -> ClResult<Timestamp> {
		let dt = DateTime::<Utc>::from_timestamp(after.0, 0).unwrap_or_else(Utc::now);
		self
			.cron
			.find_next_occurrence(&dt, false)
			.map(|next| Timestamp(next.timestamp()))
			.map_err(|e| Error::Internal(format!("cron next_execution failed: {e}")))
	}
}

#[async_trait]
pub trait Task<S: Clone>: Send + Sync + Debug {
	fn kind() -> &'static str
	where
		Self: Sized;
	fn kind_of(&self) -> &'static str;
	async fn run(&self, state: &S) -> ClResult<()>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
	wait_min_max: (u64, u64),
	times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (60, 3600), times: 10 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
		Self { wait_min_max, times }
	}

	fn calculate_backoff(&self, attempt_count: u16) -> u64 {
		let (min, max) = self.wait_min_max;
		(min * (1u64 << u64::from(attempt_count))).min(max)
	}

	fn should_retry(&self, attempt_count: u16) -> bool {
		attempt_count < self.times
	}
}

#[derive(Clone)]
struct TaskMeta<S: Clone> {
	task: Arc<dyn Task<S>>,
	next_at: Option<Timestamp>,
	deps: Vec<TaskId>,
	retry_count: u16,
	retry: Option<RetryPolicy>,
	cron: Option<CronSchedule>,
}

/// Fluent builder returned by `Scheduler::task`.
pub struct TaskSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	task: Arc<dyn Task<S>>,
	key: Option<String>,
	next_at: Option<Timestamp>,
	deps: Vec<TaskId>,
	retry: Option<RetryPolicy>,
	cron: Option<CronSchedule>,
}

impl<'a, S: Clone + Send + Sync + 'static> TaskSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, task: Arc<dyn Task<S>>) -> Self {
		Self { scheduler, task, key: None, next_at: None, deps: Vec::new(), retry: None, cron: None }
	}

	/// Dedup key: a second `.schedule()` call with the same key is a no-op,
	/// returning the id of the already-scheduled task. Used at boot time so
	/// re-registering recurring jobs on restart doesn't double-schedule them.
	pub fn key(mut self, key: impl Into<String>) -> Self {
		self.key = Some(key.into());
		self
	}

	pub fn depend_on(mut self, deps: Vec<TaskId>) -> Self {
		self.deps = deps;
		self
	}

	pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = Some(policy);
		self
	}

	/// Schedule on a cron expression, e.g. `"0 */4 * * *"` for every 4 hours.
	pub fn cron(mut self, expr: impl AsRef<str>) -> Self {
		if let Ok(cron_schedule) = CronSchedule::parse(expr.as_ref()) {
			self.next_at = cron_schedule.next_execution(Timestamp::now()).ok();
			self.cron = Some(cron_schedule);
		}
		self
	}

	pub async fn now(self) -> ClResult<TaskId> {
		self.schedule().await
	}

	pub async fn after(mut self, seconds: i64) -> ClResult<TaskId> {
		self.next_at = Some(Timestamp::from_now(seconds));
		self.schedule().await
	}

	pub async fn schedule(self) -> ClResult<TaskId> {
		self
			.scheduler
			.schedule_task_impl(self.task, self.key.as_deref(), self.next_at, self.deps, self.retry, self.cron)
			.await
	}
}

type ScheduledTaskMap<S> = BTreeMap<(Timestamp, TaskId), TaskMeta<S>>;

/// Background task scheduler: one-off delayed tasks plus cron-recurring
/// tasks, held as a process-wide singleton (analytics flush, KV TTL sweep).
/// Not persisted across restart: recurring jobs are re-registered at boot
/// via `.key(...)`-deduplicated scheduling rather than a durable task log.
#[derive(Clone)]
pub struct Scheduler<S: Clone> {
	last_id: Arc<Mutex<TaskId>>,
	keyed: Arc<Mutex<HashMap<String, TaskId>>>,
	tasks_running: Arc<Mutex<HashMap<TaskId, TaskMeta<S>>>>,
	tasks_waiting: Arc<Mutex<HashMap<TaskId, TaskMeta<S>>>>,
	task_dependents: Arc<Mutex<HashMap<TaskId, Vec<TaskId>>>>,
	tasks_scheduled: Arc<Mutex<ScheduledTaskMap<S>>>,
	tx_finish: flume::Sender<TaskId>,
	rx_finish: flume::Receiver<TaskId>,
	notify_schedule: Arc<tokio::sync::Notify>,
	_registry: Arc<RwLock<()>>,
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub fn new() -> Arc<Self> {
		let (tx_finish, rx_finish) = flume::unbounded();
		Arc::new(Self {
			last_id: Arc::new(Mutex::new(0)),
			keyed: Arc::new(Mutex::new(HashMap::new())),
			tasks_running: Arc::new(Mutex::new(HashMap::new())),
			tasks_waiting: Arc::new(Mutex::new(HashMap::new())),
			task_dependents: Arc::new(Mutex::new(HashMap::new())),
			tasks_scheduled: Arc::new(Mutex::new(BTreeMap::new())),
			tx_finish,
			rx_finish,
			notify_schedule: Arc::new(tokio::sync::Notify::new()),
			_registry: Arc::new(RwLock::new(())),
		})
	}

	/// Start the two background loops: dispatch of due/ready tasks, and
	/// completion handling (dependency release + cron rescheduling).
	pub fn start(&self, state: S) {
		let scheduler = self.clone();
		let stat = state.clone();
		let rx_finish = self.rx_finish.clone();
		tokio::spawn(async move {
			while let Ok(id) = rx_finish.recv_async().await {
				scheduler.handle_finished(&stat, id);
			}
		});

		let scheduler = self.clone();
		tokio::spawn(async move {
			loop {
				let is_empty =
					lock!(scheduler.tasks_scheduled, "tasks_scheduled").map(|g| g.is_empty()).unwrap_or(true);
				if is_empty {
					scheduler.notify_schedule.notified().await;
				}
				let wait_until = loop {
					let mut scheduled = match lock!(scheduler.tasks_scheduled, "tasks_scheduled") {
						Ok(g) => g,
						Err(_) => break None,
					};
					let Some((&(timestamp, id), _)) = scheduled.first_key_value() else {
						break None;
					};
					if timestamp <= Timestamp::now() {
						if let Some(task_meta) = scheduled.remove(&(timestamp, id)) {
							drop(scheduled);
							scheduler.mark_running(id, task_meta.clone());
							scheduler.spawn_task(state.clone(), id, task_meta);
						}
					} else {
						break Some(timestamp);
					}
				};
				if let Some(timestamp) = wait_until {
					let diff = (timestamp.0 - Timestamp::now().0).max(0);
					let wait = tokio::time::Duration::from_secs(diff as u64);
					tokio::select! {
						() = tokio::time::sleep(wait) => (),
						() = scheduler.notify_schedule.notified() => (),
					}
				}
			}
		});
	}

	fn mark_running(&self, id: TaskId, task_meta: TaskMeta<S>) {
		if let Ok(mut running) = lock!(self.tasks_running, "tasks_running") {
			running.insert(id, task_meta);
		}
	}

	fn handle_finished(&self, state: &S, id: TaskId) {
		let task_meta = lock!(self.tasks_running, "tasks_running").ok().and_then(|mut r| r.remove(&id));
		let Some(task_meta) = task_meta else {
			warn!("completed task {} not found in running queue", id);
			return;
		};

		if let Some(cron) = &task_meta.cron {
			match cron.next_execution(Timestamp::now()) {
				Ok(next_at) => {
					let mut next_meta = task_meta.clone();
					next_meta.next_at = Some(next_at);
					self.queue(id, next_meta);
				}
				Err(e) => error!("failed to compute next cron run for task {}: {}", id, e),
			}
		}

		self.release_dependents(state, id);
	}

	fn release_dependents(&self, state: &S, completed: TaskId) {
		let dependents = lock!(self.task_dependents, "task_dependents")
			.ok()
			.and_then(|mut d| d.remove(&completed))
			.unwrap_or_default();
		for dep_id in dependents {
			let ready = {
				let Ok(mut waiting) = lock!(self.tasks_waiting, "tasks_waiting") else { continue };
				if let Some(task_meta) = waiting.get_mut(&dep_id) {
					task_meta.deps.retain(|d| *d != completed);
					if task_meta.deps.is_empty() { waiting.remove(&dep_id) } else { None }
				} else {
					None
				}
			};
			if let Some(task_meta) = ready {
				self.mark_running(dep_id, task_meta.clone());
				self.spawn_task(state.clone(), dep_id, task_meta);
			}
		}
	}

	pub fn task(&self, task: Arc<dyn Task<S>>) -> TaskSchedulerBuilder<'_, S> {
		TaskSchedulerBuilder::new(self, task)
	}

	pub async fn add(&self, task: Arc<dyn Task<S>>) -> ClResult<TaskId> {
		self.task(task).now().await
	}

	#[allow(clippy::too_many_arguments)]
	async fn schedule_task_impl(
		&self,
		task: Arc<dyn Task<S>>,
		key: Option<&str>,
		next_at: Option<Timestamp>,
		deps: Vec<TaskId>,
		retry: Option<RetryPolicy>,
		cron: Option<CronSchedule>,
	) -> ClResult<TaskId> {
		if let Some(key) = key {
			let mut keyed = lock!(self.keyed, "keyed")?;
			if let Some(&existing_id) = keyed.get(key) {
				debug!("recurring task '{}' already scheduled (id={})", key, existing_id);
				return Ok(existing_id);
			}
			let id = self.next_id()?;
			keyed.insert(key.to_string(), id);
			drop(keyed);
			self.queue(id, TaskMeta { task, next_at, deps, retry_count: 0, retry, cron });
			return Ok(id);
		}

		let id = self.next_id()?;
		self.queue(id, TaskMeta { task, next_at, deps, retry_count: 0, retry, cron });
		Ok(id)
	}

	fn next_id(&self) -> ClResult<TaskId> {
		let mut last_id = lock!(self.last_id, "last_id")?;
		*last_id += 1;
		Ok(*last_id)
	}

	fn queue(&self, id: TaskId, task_meta: TaskMeta<S>) {
		if !task_meta.deps.is_empty() {
			if let Ok(mut waiting) = lock!(self.tasks_waiting, "tasks_waiting") {
				for dep in &task_meta.deps {
					if let Ok(mut dependents) = lock!(self.task_dependents, "task_dependents") {
						dependents.entry(*dep).or_default().push(id);
					}
				}
				waiting.insert(id, task_meta);
			}
			return;
		}

		let run_at = task_meta.next_at.unwrap_or(Timestamp(0));
		if let Ok(mut scheduled) = lock!(self.tasks_scheduled, "tasks_scheduled") {
			scheduled.insert((run_at, id), task_meta);
		}
		self.notify_schedule.notify_one();
	}

	fn spawn_task(&self, state: S, id: TaskId, task_meta: TaskMeta<S>) {
		let tx_finish = self.tx_finish.clone();
		let scheduler = self.clone();
		let task = task_meta.task.clone();
		tokio::spawn(async move {
			match task.run(&state).await {
				Ok(()) => {
					debug!("task {} ({}) completed", id, task.kind_of());
					let _ = tx_finish.send(id);
				}
				Err(e) => {
					if let Some(retry_policy) = &task_meta.retry {
						if retry_policy.should_retry(task_meta.retry_count) {
							let backoff = retry_policy.calculate_backoff(task_meta.retry_count);
							info!(
								"task {} ({}) failed (attempt {}): {} — retrying in {}s",
								id,
								task.kind_of(),
								task_meta.retry_count + 1,
								e,
								backoff
							);
							if let Ok(mut running) = lock!(scheduler.tasks_running, "tasks_running") {
								running.remove(&id);
							}
							let mut retry_meta = task_meta.clone();
							retry_meta.retry_count += 1;
							retry_meta.next_at = Some(Timestamp::from_now(backoff as i64));
							scheduler.queue(id, retry_meta);
							return;
						}
						error!("task {} ({}) failed after {} retries: {}", id, task.kind_of(), task_meta.retry_count, e);
					} else {
						error!("task {} ({}) failed: {}", id, task.kind_of(), e);
					}
					let _ = tx_finish.send(id);
				}
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex as StdMutex;

	type State = Arc<StdMutex<Vec<u8>>>;

	#[derive(Debug)]
	struct TestTask {
		num: u8,
	}

	#[async_trait]
	impl Task<State> for TestTask {
		fn kind() -> &'static str {
			"test"
		}
		fn kind_of(&self) -> &'static str {
			"test"
		}
		async fn run(&self, state: &State) -> ClResult<()> {
			tokio::time::sleep(std::time::Duration::from_millis(100)).await;
			state.lock().unwrap().push(self.num);
			Ok(())
		}
	}

	#[derive(Debug)]
	struct FailingTask;

	#[async_trait]
	impl Task<State> for FailingTask {
		fn kind() -> &'static str {
			"failing"
		}
		fn kind_of(&self) -> &'static str {
			"failing"
		}
		async fn run(&self, _state: &State) -> ClResult<()> {
			Err(Error::Internal("boom".into()))
		}
	}

	#[tokio::test]
	async fn runs_immediate_task() {
		let state: State = Arc::new(StdMutex::new(Vec::new()));
		let scheduler = Scheduler::new();
		scheduler.start(state.clone());
		let _id = scheduler.add(Arc::new(TestTask { num: 7 })).await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(300)).await;
		assert_eq!(*state.lock().unwrap(), vec![7]);
	}

	#[tokio::test]
	async fn runs_dependent_task_after_dependency() {
		let state: State = Arc::new(StdMutex::new(Vec::new()));
		let scheduler = Scheduler::new();
		scheduler.start(state.clone());
		let id1 = scheduler.add(Arc::new(TestTask { num: 1 })).await.unwrap();
		scheduler.task(Arc::new(TestTask { num: 2 })).depend_on(vec![id1]).schedule().await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(500)).await;
		assert_eq!(*state.lock().unwrap(), vec![1, 2]);
	}

	#[tokio::test]
	async fn dedups_on_key() {
		let state: State = Arc::new(StdMutex::new(Vec::new()));
		let scheduler = Scheduler::new();
		scheduler.start(state.clone());
		let id1 = scheduler.task(Arc::new(TestTask { num: 1 })).key("recurring").now().await.unwrap();
		let id2 = scheduler.task(Arc::new(TestTask { num: 2 })).key("recurring").now().await.unwrap();
		assert_eq!(id1, id2);
	}

	#[tokio::test]
	async fn retries_failed_task() {
		let state: State = Arc::new(StdMutex::new(Vec::new()));
		let scheduler = Scheduler::new();
		scheduler.start(state.clone());
		scheduler
			.task(Arc::new(FailingTask))
			.with_retry(RetryPolicy::new((0, 1), 1))
			.now()
			.await
			.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(200)).await;
	}
}

// vim: ts=4
