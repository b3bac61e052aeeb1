//! Cooperative, priority-ordered task scheduling.
//!
//! Ready tasks live in a min-heap keyed by expiration time, delayed tasks in a second one keyed by start time.
//! Work runs in host macrotasks and yields back to the host whenever a time slice is used up,
//! except for tasks that have already expired, which always run to avoid starvation.
//!
//! At most one host timer is armed at any time. It always targets the earliest delayed task.

mod host_loop;
pub mod min_heap;

pub use host_loop::{HostLoop, Job, ManualLoop, TimeoutId};

use crate::config::SchedulerConfig;
use core::{
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use min_heap::{HeapNode, MinHeap};
use std::rc::{Rc, Weak};
use tracing::{error, instrument, trace, trace_span};

/// Urgency of a scheduled task.
///
/// Each level maps to an expiration offset (see [`SchedulerConfig`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityLevel {
	NoPriority = 0,
	Immediate = 1,
	UserBlocking = 2,
	Normal = 3,
	Low = 4,
	Idle = 5,
}

/// Work submitted to the [`Scheduler`].
///
/// The argument is `true` if the task had already expired when it was started.
/// Returning a continuation keeps the task queued at its current position with the new body.
pub struct Callback(Box<dyn FnOnce(bool) -> Option<Callback>>);

impl Callback {
	pub fn new(callback: impl FnOnce(bool) -> Option<Callback> + 'static) -> Self {
		Self(Box::new(callback))
	}

	/// A callback that never continues.
	pub fn once(callback: impl FnOnce() + 'static) -> Self {
		Self::new(move |_| {
			callback();
			None
		})
	}

	fn call(self, did_timeout: bool) -> Option<Callback> {
		(self.0)(did_timeout)
	}
}

impl Debug for Callback {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str("Callback")
	}
}

struct Task {
	id: u64,
	callback: RefCell<Option<Callback>>,
	priority_level: PriorityLevel,
	start_time: i64,
	expiration_time: i64,
	sort_index: Cell<i64>,
}

impl HeapNode for Rc<Task> {
	fn sort_index(&self) -> i64 {
		self.sort_index.get()
	}

	fn id(&self) -> u64 {
		self.id
	}
}

/// Refers to a scheduled task. Used for cancellation.
#[derive(Clone)]
pub struct TaskHandle(Rc<Task>);

impl TaskHandle {
	#[must_use]
	pub fn id(&self) -> u64 {
		self.0.id
	}

	#[must_use]
	pub fn priority_level(&self) -> PriorityLevel {
		self.0.priority_level
	}

	#[must_use]
	pub fn expiration_time(&self) -> i64 {
		self.0.expiration_time
	}

	/// Whether the task still has a body that will run.
	#[must_use]
	pub fn is_pending(&self) -> bool {
		self.0.callback.borrow().is_some()
	}
}

impl Debug for TaskHandle {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("TaskHandle")
			.field("id", &self.0.id)
			.field("priority_level", &self.0.priority_level)
			.field("start_time", &self.0.start_time)
			.field("expiration_time", &self.0.expiration_time)
			.finish()
	}
}

struct SchedulerState {
	task_queue: MinHeap<Rc<Task>>,
	timer_queue: MinHeap<Rc<Task>>,
	task_id_counter: u64,
	current_task: Option<Rc<Task>>,
	current_priority_level: PriorityLevel,
	is_performing_work: bool,
	is_host_callback_scheduled: bool,
	is_message_loop_running: bool,
	is_host_timeout_scheduled: bool,
	task_timeout_id: Option<TimeoutId>,
	start_time: i64,
}

/// A cooperative task scheduler driven by a [`HostLoop`].
///
/// No internal borrow is held while a task callback runs, so callbacks may freely schedule and cancel work.
pub struct Scheduler {
	this: Weak<Scheduler>,
	host: Rc<dyn HostLoop>,
	config: SchedulerConfig,
	state: RefCell<SchedulerState>,
}

impl Scheduler {
	#[must_use]
	pub fn new(host: Rc<dyn HostLoop>) -> Rc<Self> {
		Self::with_config(host, SchedulerConfig::default())
	}

	#[must_use]
	pub fn with_config(host: Rc<dyn HostLoop>, config: SchedulerConfig) -> Rc<Self> {
		Rc::new_cyclic(|this| Self {
			this: this.clone(),
			host,
			config,
			state: RefCell::new(SchedulerState {
				task_queue: MinHeap::new(),
				timer_queue: MinHeap::new(),
				task_id_counter: 1,
				current_task: None,
				current_priority_level: PriorityLevel::Normal,
				is_performing_work: false,
				is_host_callback_scheduled: false,
				is_message_loop_running: false,
				is_host_timeout_scheduled: false,
				task_timeout_id: None,
				start_time: -1,
			}),
		})
	}

	#[must_use]
	pub fn host(&self) -> &Rc<dyn HostLoop> {
		&self.host
	}

	#[must_use]
	pub fn config(&self) -> &SchedulerConfig {
		&self.config
	}

	#[must_use]
	pub fn now(&self) -> i64 {
		self.host.now()
	}

	/// Priority of the task that is currently running, or [`PriorityLevel::Normal`] outside of tasks.
	#[must_use]
	pub fn current_priority_level(&self) -> PriorityLevel {
		self.state.borrow().current_priority_level
	}

	/// Number of queued tasks (ready and delayed) that haven't been cancelled.
	#[must_use]
	pub fn pending_tasks(&self) -> usize {
		let state = self.state.borrow();
		state
			.task_queue
			.iter()
			.chain(state.timer_queue.iter())
			.filter(|task| task.callback.borrow().is_some())
			.count()
	}

	fn timeout_for(&self, priority_level: PriorityLevel) -> i64 {
		match priority_level {
			PriorityLevel::Immediate => -1,
			PriorityLevel::UserBlocking => self.config.user_blocking_timeout,
			PriorityLevel::Idle => self.config.idle_timeout,
			PriorityLevel::Low => self.config.low_timeout,
			PriorityLevel::NoPriority | PriorityLevel::Normal => self.config.normal_timeout,
		}
	}

	pub fn schedule_callback(&self, priority_level: PriorityLevel, callback: Callback) -> TaskHandle {
		self.schedule_callback_with_delay(priority_level, 0, callback)
	}

	/// Schedules `callback` to become ready `delay` milliseconds from now.
	///
	/// A `delay` of zero or less is the same as [`schedule_callback`](`Scheduler::schedule_callback`).
	#[instrument(skip(self, callback))]
	pub fn schedule_callback_with_delay(&self, priority_level: PriorityLevel, delay: i64, callback: Callback) -> TaskHandle {
		let current_time = self.host.now();
		let start_time = if delay > 0 { current_time + delay } else { current_time };
		let expiration_time = start_time + self.timeout_for(priority_level);

		let mut state = self.state.borrow_mut();
		let id = state.task_id_counter;
		state.task_id_counter += 1;

		let task = Rc::new(Task {
			id,
			callback: RefCell::new(Some(callback)),
			priority_level,
			start_time,
			expiration_time,
			sort_index: Cell::new(-1),
		});

		if start_time > current_time {
			task.sort_index.set(start_time);
			state.timer_queue.push(task.clone());
			trace!(id, start_time, "Delayed task.");

			let is_earliest_timer = state.task_queue.is_empty()
				&& state.timer_queue.peek().map_or(false, |first| Rc::ptr_eq(first, &task));
			if is_earliest_timer {
				state.is_host_timeout_scheduled = true;
				self.request_host_timeout(&mut state, start_time - current_time);
			}
		} else {
			task.sort_index.set(expiration_time);
			state.task_queue.push(task.clone());
			trace!(id, expiration_time, "Ready task.");

			if !state.is_host_callback_scheduled && !state.is_performing_work {
				state.is_host_callback_scheduled = true;
				self.request_host_callback(&mut state);
			}
		}

		TaskHandle(task)
	}

	/// Drops the task's body. The task itself is discarded once it reaches the front of its queue.
	pub fn cancel_callback(&self, handle: &TaskHandle) {
		if handle.0.callback.borrow_mut().take().is_some() {
			trace!(id = handle.0.id, "Cancelled task.");
		}
	}

	/// Whether the current time slice is used up.
	#[must_use]
	pub fn should_yield(&self) -> bool {
		self.host.now() - self.state.borrow().start_time >= self.config.frame_interval
	}

	fn advance_timers(state: &mut SchedulerState, current_time: i64) {
		loop {
			let (cancelled, ready) = match state.timer_queue.peek() {
				None => return,
				Some(timer) => (timer.callback.borrow().is_none(), timer.start_time <= current_time),
			};
			if cancelled {
				state.timer_queue.pop();
			} else if ready {
				if let Some(timer) = state.timer_queue.pop() {
					timer.sort_index.set(timer.expiration_time);
					trace!(id = timer.id, "Timer became ready.");
					state.task_queue.push(timer);
				}
			} else {
				return;
			}
		}
	}

	fn handle_timeout(&self) {
		let current_time = self.host.now();
		let mut state = self.state.borrow_mut();
		state.is_host_timeout_scheduled = false;
		state.task_timeout_id = None;
		Self::advance_timers(&mut state, current_time);

		if !state.is_host_callback_scheduled {
			if !state.task_queue.is_empty() {
				state.is_host_callback_scheduled = true;
				self.request_host_callback(&mut state);
			} else if let Some(start_time) = state.timer_queue.peek().map(|first| first.start_time) {
				state.is_host_timeout_scheduled = true;
				self.request_host_timeout(&mut state, start_time - current_time);
			}
		}
	}

	fn request_host_callback(&self, state: &mut SchedulerState) {
		if !state.is_message_loop_running {
			state.is_message_loop_running = true;
			self.schedule_perform_work_until_deadline();
		}
	}

	fn schedule_perform_work_until_deadline(&self) {
		let this = self.this.clone();
		self.host.post_macrotask(Box::new(move || {
			if let Some(this) = this.upgrade() {
				this.perform_work_until_deadline();
			}
		}));
	}

	/// Arms the host timer, replacing any that is already armed.
	fn request_host_timeout(&self, state: &mut SchedulerState, ms: i64) {
		Self::cancel_host_timeout(&*self.host, state);
		let this = self.this.clone();
		let id = self.host.set_timeout(
			Box::new(move || {
				if let Some(this) = this.upgrade() {
					this.handle_timeout();
				}
			}),
			ms,
		);
		trace!(ms, "Armed host timeout.");
		state.task_timeout_id = Some(id);
	}

	fn cancel_host_timeout(host: &dyn HostLoop, state: &mut SchedulerState) {
		if let Some(id) = state.task_timeout_id.take() {
			host.clear_timeout(id);
		}
	}

	fn perform_work_until_deadline(&self) {
		if !self.state.borrow().is_message_loop_running {
			return;
		}

		let current_time = self.host.now();
		self.state.borrow_mut().start_time = current_time;

		// If a task panics, the loop is continued in a fresh macrotask.
		let mut slice = SliceGuard {
			scheduler: self,
			has_more_work: true,
		};
		slice.has_more_work = self.flush_work(current_time);
	}

	fn flush_work(&self, initial_time: i64) -> bool {
		let previous_priority_level = {
			let mut state = self.state.borrow_mut();
			state.is_host_callback_scheduled = false;
			if state.is_host_timeout_scheduled {
				// The work loop re-arms it for whatever is still delayed afterwards.
				state.is_host_timeout_scheduled = false;
				Self::cancel_host_timeout(&*self.host, &mut state);
			}
			state.is_performing_work = true;
			state.current_priority_level
		};

		let _flush = FlushGuard {
			scheduler: self,
			previous_priority_level,
		};
		self.work_loop(initial_time)
	}

	fn work_loop(&self, initial_time: i64) -> bool {
		let mut current_time = initial_time;
		Self::advance_timers(&mut self.state.borrow_mut(), current_time);

		loop {
			let task = {
				let mut state = self.state.borrow_mut();
				let task = state.task_queue.peek().cloned();
				state.current_task = task.clone();
				task
			};
			let task = match task {
				Some(task) => task,
				None => break,
			};

			if task.expiration_time > current_time && self.should_yield() {
				// Out of time and nothing has expired yet.
				trace!(id = task.id, "Yielding to the host.");
				return true;
			}

			let callback = task.callback.borrow_mut().take();
			match callback {
				Some(callback) => {
					self.state.borrow_mut().current_priority_level = task.priority_level;
					let did_timeout = task.expiration_time <= current_time;

					let continuation = {
						let span = trace_span!("task", id = task.id, priority = ?task.priority_level, did_timeout);
						let _enter = span.enter();
						callback.call(did_timeout)
					};

					current_time = self.host.now();
					if let Some(continuation) = continuation {
						*task.callback.borrow_mut() = Some(continuation);
						Self::advance_timers(&mut self.state.borrow_mut(), current_time);
						return true;
					}

					let mut state = self.state.borrow_mut();
					if state.task_queue.peek().map_or(false, |head| Rc::ptr_eq(head, &task)) {
						state.task_queue.pop();
					}
					Self::advance_timers(&mut state, current_time);
				}
				None => {
					self.state.borrow_mut().task_queue.pop();
				}
			}
		}

		let mut state = self.state.borrow_mut();
		if let Some(start_time) = state.timer_queue.peek().map(|first| first.start_time) {
			state.is_host_timeout_scheduled = true;
			self.request_host_timeout(&mut state, start_time - current_time);
		}
		false
	}
}

/// Ends a time slice, also when a task unwinds out of it.
struct SliceGuard<'a> {
	scheduler: &'a Scheduler,
	has_more_work: bool,
}

impl Drop for SliceGuard<'_> {
	fn drop(&mut self) {
		if std::thread::panicking() {
			error!("A scheduled task panicked. Continuing with the remaining tasks in the next slice.");
		}
		if self.has_more_work {
			self.scheduler.schedule_perform_work_until_deadline();
		} else if let Ok(mut state) = self.scheduler.state.try_borrow_mut() {
			state.is_message_loop_running = false;
		}
	}
}

/// Restores the scheduler's state after a flush, also when a task unwinds out of it.
struct FlushGuard<'a> {
	scheduler: &'a Scheduler,
	previous_priority_level: PriorityLevel,
}

impl Drop for FlushGuard<'_> {
	fn drop(&mut self) {
		match self.scheduler.state.try_borrow_mut() {
			Ok(mut state) => {
				state.current_task = None;
				state.current_priority_level = self.previous_priority_level;
				state.is_performing_work = false;
			}
			Err(_) => error!("Scheduler state is still borrowed after a flush."),
		}
	}
}

impl Debug for Scheduler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let state = self.state.borrow();
		f.debug_struct("Scheduler")
			.field("config", &self.config)
			.field("ready", &state.task_queue.len())
			.field("delayed", &state.timer_queue.len())
			.field("current_priority_level", &state.current_priority_level)
			.finish()
	}
}
