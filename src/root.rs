//! Render roots: the update entry point and the glue between the scheduler and the render/commit passes.

use crate::{
	element::Node,
	error::{DispatchError, RenderError},
	events::{event_priority, extract_events, process_dispatch_queue, EventPhase, SyntheticEvent},
	fiber::{FiberId, FiberStore},
	hooks::{catch_effect_panic, Destructor, PendingEffect, UpdateSink},
	host::HostConfig,
	lane::{EventPriority, Lane, Lanes},
	scheduler::{Callback, PriorityLevel, Scheduler, TaskHandle},
	work_loop::{CommitSummary, PendingPassive, RenderState},
};
use core::{
	any::Any,
	cell::{Cell, RefCell},
	fmt::{self, Debug, Formatter},
};
use std::rc::{Rc, Weak};
use tracing::{debug, error, instrument, trace, warn};

/// Updates that arrived since the last render pass started.
#[derive(Default)]
struct Mailbox {
	element: Option<Node>,
	updates: Vec<(FiberId, Lane)>,
	pending_lanes: Lanes,
}

/// The render task that is currently scheduled for a root.
struct ScheduledRender {
	lane: Lane,
	/// `None` for sync renders, which run from a microtask and can't be cancelled.
	task: Option<TaskHandle>,
}

pub(crate) struct RootShared<H: HostConfig> {
	this: Weak<Self>,
	scheduler: Rc<Scheduler>,
	state: RefCell<RenderState<H>>,
	mailbox: RefCell<Mailbox>,
	scheduled_render: RefCell<Option<ScheduledRender>>,
	passive_task: RefCell<Option<TaskHandle>>,
	update_priority: Cell<Option<EventPriority>>,
	error: RefCell<Option<RenderError>>,
	last_commit: Cell<Option<CommitSummary>>,
}

/// A tree rendered into one host container.
///
/// Dropping the last handle abandons all scheduled work for this root. The host tree is left as it is.
pub struct Root<H: HostConfig> {
	shared: Rc<RootShared<H>>,
}

/// A [`Root`] handle that doesn't keep it alive, for use inside listeners and effects.
pub struct WeakRoot<H: HostConfig> {
	shared: Weak<RootShared<H>>,
}

impl<H: HostConfig> Clone for WeakRoot<H> {
	fn clone(&self) -> Self {
		Self {
			shared: self.shared.clone(),
		}
	}
}

impl<H: HostConfig> WeakRoot<H> {
	#[must_use]
	pub fn upgrade(&self) -> Option<Root<H>> {
		self.shared.upgrade().map(|shared| Root { shared })
	}
}

/// Creates a root that renders into `container`. Nothing is rendered until [`Root::render`] is called.
pub fn create_root<H: HostConfig>(host: H, container: H::Instance, scheduler: Rc<Scheduler>) -> Root<H> {
	let shared = Rc::new_cyclic(|this: &Weak<RootShared<H>>| {
		let sink: Weak<dyn UpdateSink> = this.clone();
		RootShared {
			this: this.clone(),
			scheduler,
			state: RefCell::new(RenderState::new(host, container, sink)),
			mailbox: RefCell::default(),
			scheduled_render: RefCell::new(None),
			passive_task: RefCell::new(None),
			update_priority: Cell::new(None),
			error: RefCell::new(None),
			last_commit: Cell::new(None),
		}
	});
	debug!("Created root.");
	Root { shared }
}

impl<H: HostConfig> Root<H> {
	/// Requests `element` to be rendered, replacing whatever the root rendered before.
	///
	/// The render runs later, scheduled according to the current update priority.
	pub fn render(&self, element: impl Into<Node>) {
		let shared = &self.shared;
		let lane = shared.request_update_lane();
		{
			let mut mailbox = shared.mailbox.borrow_mut();
			mailbox.element = Some(element.into());
			mailbox.pending_lanes |= lane;
		}
		trace!(?lane, "Root update.");
		shared.ensure_root_is_scheduled();
	}

	/// Dispatches a native event of type `native_type` (like `"click"`) that occurred at `target`.
	///
	/// Listeners run synchronously. Updates they cause are scheduled at the event's priority.
	/// Returns the synthetic events that had listeners.
	///
	/// # Errors
	///
	/// Fails if `target` isn't part of this root, if a listener prop isn't a [`Listener`](`crate::events::Listener`),
	/// or with the first listener failure (after all listeners ran).
	#[instrument(skip(self, target, native))]
	pub fn dispatch_event(
		&self,
		native_type: &str,
		phase: EventPhase,
		target: &H::Instance,
		native: Option<Rc<dyn Any>>,
	) -> Result<Vec<SyntheticEvent>, DispatchError> {
		let shared = &self.shared;
		let queue = {
			let state = shared.state.try_borrow().map_err(|_| DispatchError::Busy)?;
			let target = state
				.host
				.closest_fiber(target)
				.filter(|&fiber| state.fibers.contains(fiber))
				.ok_or(DispatchError::UnknownTarget)?;
			extract_events(&state.fibers, &state.host, native_type, target, phase, native.as_ref())?
		};
		if queue.is_empty() {
			return Ok(Vec::new());
		}

		let priority = event_priority(native_type, shared.scheduler.current_priority_level());
		let _priority = UpdatePriorityScope {
			slot: &shared.update_priority,
			previous: shared.update_priority.replace(Some(priority)),
		};
		process_dispatch_queue(queue)
	}

	/// Runs pending passive effects now instead of waiting for their task.
	pub fn flush_passive_effects(&self) -> bool {
		self.shared.flush_passive_effects()
	}

	/// The error of the latest failed render pass or panicking effect, if it hasn't been taken yet.
	#[must_use]
	pub fn take_error(&self) -> Option<RenderError> {
		self.shared.error.borrow_mut().take()
	}

	/// What the latest commit did.
	#[must_use]
	pub fn last_commit(&self) -> Option<CommitSummary> {
		self.shared.last_commit.get()
	}

	pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> R {
		f(&self.shared.state.borrow().host)
	}

	pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
		f(&mut self.shared.state.borrow_mut().host)
	}

	/// Read access to the render nodes, for inspection.
	pub fn with_fibers<R>(&self, f: impl FnOnce(&FiberStore<H::Instance>) -> R) -> R {
		f(&self.shared.state.borrow().fibers)
	}

	/// The committed root render node.
	#[must_use]
	pub fn current(&self) -> FiberId {
		self.shared.state.borrow().current
	}

	#[must_use]
	pub fn container(&self) -> H::Instance {
		self.shared.state.borrow().container.clone()
	}

	#[must_use]
	pub fn scheduler(&self) -> &Rc<Scheduler> {
		&self.shared.scheduler
	}

	#[must_use]
	pub fn downgrade(&self) -> WeakRoot<H> {
		WeakRoot {
			shared: Rc::downgrade(&self.shared),
		}
	}
}

/// Restores the previous update priority when a dispatch ends, however it ends.
struct UpdatePriorityScope<'a> {
	slot: &'a Cell<Option<EventPriority>>,
	previous: Option<EventPriority>,
}

impl Drop for UpdatePriorityScope<'_> {
	fn drop(&mut self) {
		self.slot.set(self.previous);
	}
}

impl<H: HostConfig> Debug for Root<H> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Root")
			.field("pending_lanes", &self.shared.mailbox.borrow().pending_lanes)
			.field("last_commit", &self.shared.last_commit.get())
			.finish_non_exhaustive()
	}
}

impl<H: HostConfig> UpdateSink for RootShared<H> {
	fn schedule_update(&self, fiber: FiberId, lane: Lanes) {
		{
			let mut mailbox = self.mailbox.borrow_mut();
			mailbox.updates.push((fiber, lane));
			mailbox.pending_lanes |= lane;
		}
		self.ensure_root_is_scheduled();
	}
}

impl<H: HostConfig> RootShared<H> {
	fn request_update_lane(&self) -> Lane {
		self.update_priority.get().map_or(Lanes::DEFAULT, EventPriority::lane)
	}

	/// Makes sure exactly one render task is scheduled for the most urgent pending lane.
	fn ensure_root_is_scheduled(&self) {
		let pending_lanes = self.mailbox.borrow().pending_lanes;
		let mut scheduled = self.scheduled_render.borrow_mut();

		if pending_lanes.is_empty() {
			if let Some(ScheduledRender { task: Some(task), .. }) = scheduled.take() {
				self.scheduler.cancel_callback(&task);
			}
			return;
		}

		let lane = pending_lanes.highest_priority_lane();
		if let Some(existing) = &*scheduled {
			if existing.lane.bits() <= lane.bits() {
				trace!(?lane, "Render already scheduled.");
				return;
			}
			if let Some(task) = &existing.task {
				self.scheduler.cancel_callback(task);
			}
		}

		let this = self.this.clone();
		let task = if lane == Lanes::SYNC {
			self.scheduler.host().queue_microtask(Box::new(move || {
				if let Some(root) = this.upgrade() {
					root.perform_work_on_root();
				}
			}));
			None
		} else {
			let priority = EventPriority::from_lanes(lane).scheduler_priority();
			Some(self.scheduler.schedule_callback(
				priority,
				Callback::once(move || {
					if let Some(root) = this.upgrade() {
						root.perform_work_on_root();
					}
				}),
			))
		};
		trace!(?lane, "Scheduled render.");
		*scheduled = Some(ScheduledRender { lane, task });
	}

	#[instrument(skip(self))]
	fn perform_work_on_root(&self) {
		self.scheduled_render.borrow_mut().take();
		self.flush_passive_effects();

		let mut state = match self.state.try_borrow_mut() {
			Ok(state) => state,
			Err(_) => {
				error!("Render requested while the root is busy. Rescheduling.");
				let this = self.this.clone();
				self.scheduler.schedule_callback(
					PriorityLevel::Normal,
					Callback::once(move || {
						if let Some(root) = this.upgrade() {
							root.perform_work_on_root();
						}
					}),
				);
				return;
			}
		};

		let (element, updates, lanes) = {
			let mut mailbox = self.mailbox.borrow_mut();
			(
				mailbox.element.take(),
				core::mem::take(&mut mailbox.updates),
				core::mem::replace(&mut mailbox.pending_lanes, Lanes::NONE),
			)
		};
		if lanes.is_empty() {
			trace!("Nothing to render.");
			return;
		}

		state.apply_updates(element, updates);
		let result = state.render_root_sync(lanes).and_then(|finished| state.commit(finished));
		let has_passive = !state.pending_passive.is_empty();
		drop(state);

		match result {
			Ok(output) => {
				for destroy in output.layout_unmounts {
					destroy();
				}
				for effect in output.layout_mounts {
					effect.run();
				}
				debug!(summary = ?output.summary, "Commit complete.");
				self.last_commit.set(Some(output.summary));
				if has_passive {
					self.schedule_passive_flush();
				}
			}
			Err(render_error) => {
				error!("Render pass failed: {}", render_error);
				*self.error.borrow_mut() = Some(render_error);
			}
		}

		self.ensure_root_is_scheduled();
	}

	fn schedule_passive_flush(&self) {
		let mut passive_task = self.passive_task.borrow_mut();
		if passive_task.as_ref().map_or(false, TaskHandle::is_pending) {
			return;
		}
		let this = self.this.clone();
		*passive_task = Some(self.scheduler.schedule_callback(
			PriorityLevel::Normal,
			Callback::once(move || {
				if let Some(root) = this.upgrade() {
					root.flush_passive_effects();
				}
			}),
		));
	}

	/// Runs passive unmounts, then passive mounts. Returns whether there were any.
	#[instrument(skip(self))]
	fn flush_passive_effects(&self) -> bool {
		let pending = match self.state.try_borrow_mut() {
			Ok(mut state) => core::mem::take(&mut state.pending_passive),
			Err(_) => {
				warn!("Can't flush passive effects while the root is busy.");
				return false;
			}
		};
		if let Some(task) = self.passive_task.borrow_mut().take() {
			self.scheduler.cancel_callback(&task);
		}
		if pending.is_empty() {
			return false;
		}

		let PendingPassive { unmounts, mounts } = pending;
		trace!(unmounts = unmounts.len(), mounts = mounts.len(), "Flushing passive effects.");
		self.run_effects(unmounts, mounts);
		true
	}

	/// Runs cleanups, then effect bodies. A panic in one of them is logged and kept as the root's error,
	/// and the rest still run.
	fn run_effects(&self, unmounts: Vec<Destructor>, mounts: Vec<PendingEffect>) {
		let results = unmounts
			.into_iter()
			.map(|destroy| catch_effect_panic(destroy))
			.chain(mounts.into_iter().map(|effect| catch_effect_panic(|| effect.run())));
		for result in results {
			if let Err(effect_error) = result {
				error!("{}", effect_error);
				self.error.borrow_mut().get_or_insert(effect_error);
			}
		}
	}
}
