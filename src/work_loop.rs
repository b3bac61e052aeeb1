//! The render pass: a depth-first walk over the work-in-progress tree.
//!
//! Each node is first *begun* on the way down, which renders it and reconciles its children,
//! then *completed* on the way up, which prepares its host node.
//! The walk runs to completion once started. It never yields to the scheduler midway.

use crate::{
	begin_work::begin_work,
	commit_work::{commit_root, CommitOutput},
	complete_work::complete_work,
	context::ContextStack,
	element::Node,
	error::RenderError,
	fiber::{FiberId, FiberProps, FiberStore, MemoizedState},
	hooks::{Destructor, LedgerWrites, PendingEffect, UpdateSink},
	host::HostConfig,
	lane::Lanes,
};
use std::rc::Weak;
use tracing::{debug, instrument, trace_span, warn};

/// What one commit did to the host tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
	/// Inserted or moved subtrees.
	pub placements: usize,
	/// Host nodes whose properties or text changed.
	pub updates: usize,
	/// Removed subtrees.
	pub deletions: usize,
	pub layout_effects: usize,
	/// Passive effects queued for the next flush.
	pub passive_effects: usize,
	/// Render nodes freed along with removed subtrees, counting both buffers.
	pub freed: usize,
}

/// Passive effect work left over from commits.
#[derive(Default)]
pub(crate) struct PendingPassive {
	pub unmounts: Vec<Destructor>,
	pub mounts: Vec<PendingEffect>,
}

impl PendingPassive {
	pub fn is_empty(&self) -> bool {
		self.unmounts.is_empty() && self.mounts.is_empty()
	}
}

/// Everything one root's render and commit passes operate on.
pub(crate) struct RenderState<H: HostConfig> {
	pub host: H,
	pub container: H::Instance,
	pub fibers: FiberStore<H::Instance>,
	/// The committed root node.
	pub current: FiberId,
	pub context: ContextStack,
	pub work_in_progress: Option<FiberId>,
	pub render_lanes: Lanes,
	pub sink: Weak<dyn UpdateSink>,
	pub pending_passive: PendingPassive,
	/// Hook ledger changes of the pass in progress. Applied by a successful commit.
	pub hook_writes: Vec<LedgerWrites>,
}

impl<H: HostConfig> RenderState<H> {
	pub fn new(host: H, container: H::Instance, sink: Weak<dyn UpdateSink>) -> Self {
		let mut fibers = FiberStore::new();
		let current = fibers.create_host_root();
		fibers.settle();
		Self {
			host,
			container,
			fibers,
			current,
			context: ContextStack::new(),
			work_in_progress: None,
			render_lanes: Lanes::NONE,
			sink,
			pending_passive: PendingPassive::default(),
			hook_writes: Vec::new(),
		}
	}

	/// Records a new root element and marks updated nodes (and their ancestors) with their lanes.
	pub fn apply_updates(&mut self, element: Option<Node>, updates: Vec<(FiberId, Lanes)>) {
		if let Some(element) = element {
			self.fibers[self.current].memoized_state = MemoizedState::Root(element);
		}
		for (fiber, lane) in updates {
			self.mark_update_lane_from_fiber_to_root(fiber, lane);
		}
	}

	fn mark_update_lane_from_fiber_to_root(&mut self, fiber: FiberId, lane: Lanes) {
		let source = match self.fibers.get_mut(fiber) {
			Some(source) => source,
			None => return warn!("State update on an unmounted node was ignored."),
		};
		source.lanes |= lane;
		let (alternate, mut parent) = (source.alternate, source.return_fiber);
		if let Some(alternate) = alternate.and_then(|alternate| self.fibers.get_mut(alternate)) {
			alternate.lanes |= lane;
		}

		while let Some(id) = parent {
			let node = match self.fibers.get_mut(id) {
				Some(node) => node,
				None => return warn!("Update path leads through a freed node."),
			};
			node.child_lanes |= lane;
			let (alternate, next) = (node.alternate, node.return_fiber);
			if let Some(alternate) = alternate.and_then(|alternate| self.fibers.get_mut(alternate)) {
				alternate.child_lanes |= lane;
			}
			parent = next;
		}
	}

	/// Renders the whole tree for `lanes`, returning the finished work-in-progress root.
	///
	/// On failure, everything created during the pass is dropped and the committed tree stays as it was.
	#[instrument(skip(self))]
	pub fn render_root_sync(&mut self, lanes: Lanes) -> Result<FiberId, RenderError> {
		self.context.reset();
		self.hook_writes.clear();
		self.fibers.settle();
		self.render_lanes = lanes;
		let root = self.fibers.create_work_in_progress(self.current, FiberProps::None);
		self.work_in_progress = Some(root);

		while let Some(unit) = self.work_in_progress {
			if let Err(error) = self.perform_unit_of_work(unit) {
				self.work_in_progress = None;
				self.render_lanes = Lanes::NONE;
				self.context.reset();
				self.hook_writes.clear();
				for orphan in self.fibers.discard_created() {
					self.host.detach_instance(&orphan);
				}
				return Err(error);
			}
		}

		if self.context.depth() != 0 {
			warn!(depth = self.context.depth(), "Context stack not empty after render.");
			self.context.reset();
		}
		self.render_lanes = Lanes::NONE;
		self.fibers.settle();
		debug!(fibers = self.fibers.len(), "Render pass complete.");
		Ok(root)
	}

	fn perform_unit_of_work(&mut self, unit: FiberId) -> Result<(), RenderError> {
		let span = trace_span!("Unit of work", tag = ?self.fibers[unit].tag);
		let _enter = span.enter();

		let next = begin_work(self, unit)?;
		let fiber = &mut self.fibers[unit];
		fiber.memoized_props = fiber.pending_props.clone();

		match next {
			Some(next) => self.work_in_progress = Some(next),
			None => self.complete_unit_of_work(unit)?,
		}
		Ok(())
	}

	/// Completes `unit` and its ancestors until one of them has a sibling left to begin.
	fn complete_unit_of_work(&mut self, unit: FiberId) -> Result<(), RenderError> {
		let mut completed = unit;
		loop {
			complete_work(self, completed)?;

			let fiber = &self.fibers[completed];
			if let Some(sibling) = fiber.sibling {
				self.work_in_progress = Some(sibling);
				return Ok(());
			}
			match fiber.return_fiber {
				Some(parent) => completed = parent,
				None => {
					self.work_in_progress = None;
					return Ok(());
				}
			}
		}
	}

	pub fn commit(&mut self, finished: FiberId) -> Result<CommitOutput, RenderError> {
		let result = commit_root(self, finished);
		let writes = core::mem::take(&mut self.hook_writes);
		if result.is_ok() {
			for writes in writes {
				writes.apply();
			}
		}
		result
	}
}
