//! The commit pass: applies a finished render to the host tree.
//!
//! Unlike the render pass, this can't be abandoned halfway. Effects are only collected here.
//! They run once the caller has released the render state, so they may freely schedule updates.

use crate::{
	error::RenderError,
	fiber::{FiberId, Flags, MemoizedState, StateNode, WorkTag},
	hooks::{unmount_effects, Destructor, EffectKind, PendingEffect},
	host::{commit_update, HostConfig},
	work_loop::{CommitSummary, RenderState},
};
use tracing::{instrument, trace, trace_span, warn};

/// Layout work of one commit, to run right after it.
pub(crate) struct CommitOutput {
	/// Destructors of layout effects in removed subtrees. These run first.
	pub layout_unmounts: Vec<Destructor>,
	pub layout_mounts: Vec<PendingEffect>,
	pub summary: CommitSummary,
}

struct Commit {
	layout_unmounts: Vec<Destructor>,
	layout_mounts: Vec<PendingEffect>,
	deleted: Vec<FiberId>,
	summary: CommitSummary,
}

#[instrument(skip(state))]
pub(crate) fn commit_root<H: HostConfig>(state: &mut RenderState<H>, finished: FiberId) -> Result<CommitOutput, RenderError> {
	let mut commit = Commit {
		layout_unmounts: Vec::new(),
		layout_mounts: Vec::new(),
		deleted: Vec::new(),
		summary: CommitSummary::default(),
	};

	commit_mutation_effects(state, finished, &mut commit)?;

	// The finished tree is now what's on screen.
	state.current = finished;

	for deleted in commit.deleted {
		commit.summary.freed += state.fibers.free_subtree(deleted);
	}
	trace!(summary = ?commit.summary, "Committed.");

	Ok(CommitOutput {
		layout_unmounts: commit.layout_unmounts,
		layout_mounts: commit.layout_mounts,
		summary: commit.summary,
	})
}

/// Deletions first, then children, then the node's own placement and update.
fn commit_mutation_effects<H: HostConfig>(state: &mut RenderState<H>, fiber: FiberId, commit: &mut Commit) -> Result<(), RenderError> {
	let deletions = core::mem::take(&mut state.fibers[fiber].deletions);
	for deleted in deletions {
		commit_deletion(state, fiber, deleted, commit)?;
		commit.deleted.push(deleted);
		commit.summary.deletions += 1;
	}

	if !state.fibers[fiber].subtree_flags.is_empty() {
		let mut child = state.fibers[fiber].child;
		while let Some(id) = child {
			commit_mutation_effects(state, id, commit)?;
			child = state.fibers[id].sibling;
		}
	}

	let flags = state.fibers[fiber].flags;
	if flags.contains(Flags::PLACEMENT) {
		commit_placement(state, fiber)?;
		commit.summary.placements += 1;
	}

	let tag = state.fibers[fiber].tag;
	match tag {
		WorkTag::HostComponent => {
			if let StateNode::Host(instance) = state.fibers[fiber].state_node.clone() {
				if flags.contains(Flags::UPDATE) {
					if let Some(payload) = state.fibers[fiber].update_payload.take() {
						commit_update(&mut state.host, &instance, &payload);
					}
					if let Some(props) = state.fibers[fiber].pending_props.element().cloned() {
						state.host.update_props(&instance, props);
					}
					state.host.precache_fiber(&instance, fiber);
					commit.summary.updates += 1;
				}
				if state.fibers[fiber].flags.contains(Flags::CONTENT_RESET) {
					// No child was placed that could have cleared it already.
					state.host.set_text_content(&instance, "");
				}
			}
		}
		WorkTag::HostText => {
			if flags.contains(Flags::UPDATE) {
				let fiber_ref = &state.fibers[fiber];
				if let (StateNode::Host(instance), Some(text)) = (fiber_ref.state_node.clone(), fiber_ref.pending_props.text().cloned()) {
					state.host.commit_text_update(&instance, &text);
					state.host.precache_fiber(&instance, fiber);
					commit.summary.updates += 1;
				}
			}
		}
		WorkTag::FunctionComponent | WorkTag::MemoComponent => {
			if let Some(queue) = state.fibers[fiber].update_queue.as_mut() {
				if flags.contains(Flags::UPDATE) {
					let effects = queue.take(EffectKind::Layout);
					commit.summary.layout_effects += effects.len();
					commit.layout_mounts.extend(effects);
				}
				if flags.contains(Flags::PASSIVE) {
					let effects = queue.take(EffectKind::Passive);
					commit.summary.passive_effects += effects.len();
					state.pending_passive.mounts.extend(effects);
				}
			}
		}
		WorkTag::HostRoot | WorkTag::ClassComponent | WorkTag::Fragment | WorkTag::ContextProvider | WorkTag::ContextConsumer => {}
	}

	let fiber = &mut state.fibers[fiber];
	fiber.flags = Flags::NONE;
	fiber.subtree_flags = Flags::NONE;
	Ok(())
}

/// The nearest ancestor that owns a host node children can be inserted into.
fn get_host_parent_fiber<H: HostConfig>(state: &RenderState<H>, fiber: FiberId) -> Result<FiberId, RenderError> {
	let mut parent = state.fibers[fiber].return_fiber;
	while let Some(id) = parent {
		if state.fibers[id].tag.is_host_parent() {
			return Ok(id);
		}
		parent = state.fibers[id].return_fiber;
	}
	Err(RenderError::MissingHostParent { tag: state.fibers[fiber].tag })
}

fn host_parent_instance<H: HostConfig>(state: &RenderState<H>, parent_fiber: FiberId) -> Option<H::Instance> {
	let parent = &state.fibers[parent_fiber];
	match (parent.tag, &parent.state_node) {
		(WorkTag::HostRoot, _) => Some(state.container.clone()),
		(WorkTag::HostComponent, StateNode::Host(instance)) => Some(instance.clone()),
		_ => None,
	}
}

/// The host node that `fiber`'s host nodes must be inserted before, if any.
///
/// Siblings that are themselves about to be placed don't count, since they aren't in the host tree yet.
fn get_host_sibling<H: HostConfig>(state: &RenderState<H>, fiber: FiberId) -> Option<H::Instance> {
	let fibers = &state.fibers;
	let mut node = fiber;
	'siblings: loop {
		while fibers[node].sibling.is_none() {
			match fibers[node].return_fiber {
				Some(parent) if !fibers[parent].tag.is_host_parent() => node = parent,
				_ => return None,
			}
		}
		node = fibers[node].sibling?;

		while !fibers[node].tag.is_host() {
			if fibers[node].flags.contains(Flags::PLACEMENT) {
				continue 'siblings;
			}
			match fibers[node].child {
				Some(child) => node = child,
				None => continue 'siblings,
			}
		}

		if !fibers[node].flags.contains(Flags::PLACEMENT) {
			if let StateNode::Host(instance) = &fibers[node].state_node {
				return Some(instance.clone());
			}
		}
	}
}

fn commit_placement<H: HostConfig>(state: &mut RenderState<H>, fiber: FiberId) -> Result<(), RenderError> {
	let parent_fiber = get_host_parent_fiber(state, fiber)?;
	let parent = host_parent_instance(state, parent_fiber).ok_or(RenderError::MissingHostParent { tag: state.fibers[fiber].tag })?;

	if state.fibers[parent_fiber].flags.contains(Flags::CONTENT_RESET) {
		state.host.set_text_content(&parent, "");
		state.fibers[parent_fiber].flags.remove(Flags::CONTENT_RESET);
	}

	let before = get_host_sibling(state, fiber);
	trace!(tag = ?state.fibers[fiber].tag, insert = before.is_some(), "Placement.");
	insert_or_append_placement_node(state, fiber, before.as_ref(), &parent);
	Ok(())
}

fn insert_or_append_placement_node<H: HostConfig>(state: &mut RenderState<H>, node: FiberId, before: Option<&H::Instance>, parent: &H::Instance) {
	let fiber = &state.fibers[node];
	if let (true, StateNode::Host(instance)) = (fiber.tag.is_host(), &fiber.state_node) {
		let instance = instance.clone();
		match before {
			Some(before) => state.host.insert_before(parent, &instance, before),
			None => state.host.append_child(parent, &instance),
		}
		return;
	}

	let mut child = fiber.child;
	while let Some(id) = child {
		insert_or_append_placement_node(state, id, before, parent);
		child = state.fibers[id].sibling;
	}
}

/// Detaches a removed subtree: top-level host nodes leave the host tree, effects are torn down
/// and every host node's bookkeeping is dropped.
fn commit_deletion<H: HostConfig>(state: &mut RenderState<H>, parent_fiber: FiberId, deleted: FiberId, commit: &mut Commit) -> Result<(), RenderError> {
	let span = trace_span!("Deletion", tag = ?state.fibers[deleted].tag);
	let _enter = span.enter();

	let host_parent_fiber = if state.fibers[parent_fiber].tag.is_host_parent() {
		parent_fiber
	} else {
		get_host_parent_fiber(state, parent_fiber)?
	};
	let host_parent = host_parent_instance(state, host_parent_fiber);
	if host_parent.is_none() {
		warn!("Removed subtree has no host parent instance. Its host nodes stay attached.");
	}

	// (fiber, whether one of its ancestors within the subtree was already removed from the host tree)
	let mut stack = vec![(deleted, false)];
	while let Some((id, removed_above)) = stack.pop() {
		let fiber = &state.fibers[id];
		let mut removed = removed_above;

		match (&fiber.state_node, &fiber.memoized_state) {
			(StateNode::Host(instance), _) if fiber.tag.is_host() => {
				let instance = instance.clone();
				if !removed_above {
					if let Some(host_parent) = &host_parent {
						state.host.remove_child(host_parent, &instance);
					}
					removed = true;
				}
				state.host.detach_instance(&instance);
			}
			(_, MemoizedState::Hooks(list)) => {
				let (layout, passive) = unmount_effects(list);
				commit.layout_unmounts.extend(layout);
				state.pending_passive.unmounts.extend(passive);
			}
			_ => (),
		}

		let mut child = state.fibers[id].child;
		let mut children = Vec::new();
		while let Some(c) = child {
			children.push(c);
			child = state.fibers[c].sibling;
		}
		// Reversed so that the stack visits them in order.
		stack.extend(children.into_iter().rev().map(|c| (c, removed)));
	}
	Ok(())
}
