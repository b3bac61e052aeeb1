//! Tunables of the [`Scheduler`](`crate::scheduler::Scheduler`).

/// Largest signed 31-bit integer, used as the idle timeout so that idle work
/// effectively never expires without overflowing host timers.
pub const MAX_SIGNED_31_BIT_INT: i64 = 1_073_741_823;

/// Timing configuration of a [`Scheduler`](`crate::scheduler::Scheduler`).
///
/// All values are in milliseconds of the [`HostLoop`](`crate::scheduler::HostLoop`) clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
	/// Length of one time slice. The work loop yields to the host once a slice is used up,
	/// unless the task at the head of the queue has already expired.
	pub frame_interval: i64,
	/// Expiration offset of [`PriorityLevel::UserBlocking`](`crate::scheduler::PriorityLevel::UserBlocking`) tasks.
	pub user_blocking_timeout: i64,
	/// Expiration offset of [`PriorityLevel::Normal`](`crate::scheduler::PriorityLevel::Normal`) tasks.
	pub normal_timeout: i64,
	/// Expiration offset of [`PriorityLevel::Low`](`crate::scheduler::PriorityLevel::Low`) tasks.
	pub low_timeout: i64,
	/// Expiration offset of [`PriorityLevel::Idle`](`crate::scheduler::PriorityLevel::Idle`) tasks.
	pub idle_timeout: i64,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			frame_interval: 5,
			user_blocking_timeout: 250,
			normal_timeout: 5000,
			low_timeout: 10000,
			idle_timeout: MAX_SIGNED_31_BIT_INT,
		}
	}
}

impl SchedulerConfig {
	/// Overrides the time slice length.
	#[must_use]
	pub fn with_frame_interval(mut self, frame_interval: i64) -> Self {
		self.frame_interval = frame_interval;
		self
	}
}
