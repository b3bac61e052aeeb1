//! The scheduler's view of the hosting event loop.

use core::cell::{Cell, RefCell};
use std::{collections::VecDeque, rc::Rc};
use tracing::{trace, warn};

/// A unit of work handed to the host loop.
pub type Job = Box<dyn FnOnce()>;

/// Identifies a timer armed through [`HostLoop::set_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(pub u64);

/// Clock and task sources of the hosting environment.
///
/// Implementations must never run a job synchronously from within one of these calls.
pub trait HostLoop {
	/// Monotonic time in milliseconds.
	fn now(&self) -> i64;
	/// Runs `job` in a later macrotask, after pending microtasks.
	fn post_macrotask(&self, job: Job);
	/// Runs `job` once the current macrotask (or microtask) has finished.
	fn queue_microtask(&self, job: Job);
	/// Runs `job` in a macrotask once at least `delay` milliseconds have passed.
	fn set_timeout(&self, job: Job, delay: i64) -> TimeoutId;
	/// Disarms a timer. Unknown or already fired ids are ignored.
	fn clear_timeout(&self, id: TimeoutId);
}

struct Timeout {
	id: TimeoutId,
	due: i64,
	job: Job,
}

/// A deterministic [`HostLoop`] with a virtual clock.
///
/// Nothing runs until the loop is pumped, so tests (and native embedders without an event loop)
/// decide exactly when macrotasks, microtasks and timers fire.
#[derive(Default)]
pub struct ManualLoop {
	clock: Cell<i64>,
	macrotasks: RefCell<VecDeque<Job>>,
	microtasks: RefCell<VecDeque<Job>>,
	timeouts: RefCell<Vec<Timeout>>,
	next_timeout_id: Cell<u64>,
}

impl ManualLoop {
	/// Upper bound for [`run_until_idle`](`ManualLoop::run_until_idle`) so that a self-rescheduling job can't hang a test.
	pub const MAX_ITERATIONS: usize = 100_000;

	#[must_use]
	pub fn new() -> Rc<Self> {
		Rc::new(Self::default())
	}

	/// Moves the clock forward without running anything.
	///
	/// Callbacks use this to simulate time spent working.
	pub fn advance_clock(&self, ms: i64) {
		self.clock.set(self.clock.get() + ms);
	}

	/// Moves the clock forward, firing due timers in order and draining the resulting work.
	pub fn advance(&self, ms: i64) {
		let target = self.clock.get() + ms;
		loop {
			self.flush();
			let next_due = self.timeouts.borrow().iter().map(|t| t.due).min();
			match next_due {
				Some(due) if due <= target => {
					if due > self.clock.get() {
						self.clock.set(due);
					}
					self.fire_due_timeouts();
				}
				_ => break,
			}
		}
		self.clock.set(target);
		self.flush();
	}

	/// Runs queued microtasks, including ones queued while running. Returns how many ran.
	pub fn run_microtasks(&self) -> usize {
		let mut count = 0;
		loop {
			let job = self.microtasks.borrow_mut().pop_front();
			match job {
				Some(job) => {
					job();
					count += 1;
				}
				None => return count,
			}
		}
	}

	/// Runs pending microtasks, then a single macrotask followed by its microtasks.
	///
	/// Returns `false` if there was no macrotask.
	pub fn run_macrotask(&self) -> bool {
		self.run_microtasks();
		let job = self.macrotasks.borrow_mut().pop_front();
		match job {
			Some(job) => {
				job();
				self.run_microtasks();
				true
			}
			None => false,
		}
	}

	/// Runs timers that are due at the current time. Returns how many fired.
	pub fn fire_due_timeouts(&self) -> usize {
		let mut count = 0;
		loop {
			let now = self.clock.get();
			let timeout = {
				let mut timeouts = self.timeouts.borrow_mut();
				let next = timeouts
					.iter()
					.enumerate()
					.filter(|(_, t)| t.due <= now)
					.min_by_key(|(_, t)| (t.due, t.id.0))
					.map(|(i, _)| i);
				next.map(|i| timeouts.remove(i))
			};
			match timeout {
				Some(timeout) => {
					trace!(id = timeout.id.0, "Firing timeout.");
					(timeout.job)();
					self.run_microtasks();
					count += 1;
				}
				None => return count,
			}
		}
	}

	/// Drains microtasks and macrotasks without moving the clock.
	pub fn flush(&self) {
		let mut iterations = 0;
		while self.run_macrotask() {
			iterations += 1;
			if iterations >= Self::MAX_ITERATIONS {
				warn!("`ManualLoop::flush` gave up after {} macrotasks.", iterations);
				return;
			}
		}
	}

	/// Drains all work, jumping the clock to each armed timer in turn.
	pub fn run_until_idle(&self) {
		for _ in 0..Self::MAX_ITERATIONS {
			self.flush();
			let next_due = self.timeouts.borrow().iter().map(|t| t.due).min();
			match next_due {
				Some(due) => {
					if due > self.clock.get() {
						self.clock.set(due);
					}
					self.fire_due_timeouts();
				}
				None => return,
			}
		}
		warn!("`ManualLoop::run_until_idle` gave up after {} rounds.", Self::MAX_ITERATIONS);
	}

	/// Number of timers that are currently armed.
	#[must_use]
	pub fn armed_timeouts(&self) -> usize {
		self.timeouts.borrow().len()
	}

	/// Due time of the earliest armed timer.
	#[must_use]
	pub fn next_timeout_due(&self) -> Option<i64> {
		self.timeouts.borrow().iter().map(|t| t.due).min()
	}

	#[must_use]
	pub fn pending_macrotasks(&self) -> usize {
		self.macrotasks.borrow().len()
	}

	#[must_use]
	pub fn pending_microtasks(&self) -> usize {
		self.microtasks.borrow().len()
	}
}

impl HostLoop for ManualLoop {
	fn now(&self) -> i64 {
		self.clock.get()
	}

	fn post_macrotask(&self, job: Job) {
		self.macrotasks.borrow_mut().push_back(job);
	}

	fn queue_microtask(&self, job: Job) {
		self.microtasks.borrow_mut().push_back(job);
	}

	fn set_timeout(&self, job: Job, delay: i64) -> TimeoutId {
		let id = TimeoutId(self.next_timeout_id.get());
		self.next_timeout_id.set(id.0 + 1);
		let due = self.clock.get() + delay.max(0);
		self.timeouts.borrow_mut().push(Timeout { id, due, job });
		id
	}

	fn clear_timeout(&self, id: TimeoutId) {
		self.timeouts.borrow_mut().retain(|t| t.id != id);
	}
}

#[cfg(test)]
mod tests {
	use super::{HostLoop, ManualLoop};
	use std::{cell::RefCell, rc::Rc};

	#[test]
	fn microtasks_run_before_the_next_macrotask() {
		let host = ManualLoop::new();
		let order = Rc::new(RefCell::new(Vec::new()));

		let o = order.clone();
		host.post_macrotask(Box::new(move || o.borrow_mut().push("macro")));
		let o = order.clone();
		host.queue_microtask(Box::new(move || o.borrow_mut().push("micro")));

		host.flush();
		assert_eq!(*order.borrow(), ["micro", "macro"]);
	}

	#[test]
	fn timers_fire_in_due_order_when_advancing() {
		let host = ManualLoop::new();
		let order = Rc::new(RefCell::new(Vec::new()));

		let o = order.clone();
		host.set_timeout(Box::new(move || o.borrow_mut().push(20)), 20);
		let o = order.clone();
		host.set_timeout(Box::new(move || o.borrow_mut().push(10)), 10);
		let o = order.clone();
		let cleared = host.set_timeout(Box::new(move || o.borrow_mut().push(15)), 15);
		host.clear_timeout(cleared);

		host.advance(12);
		assert_eq!(*order.borrow(), [10]);
		assert_eq!(host.now(), 12);

		host.advance(100);
		assert_eq!(*order.borrow(), [10, 20]);
		assert_eq!(host.armed_timeouts(), 0);
	}
}
