use crate::{
	element::ElementType,
	error::RenderError,
	fiber::{FiberId, FiberProps, Flags, StateNode, WorkTag},
	host::{diff_properties, set_initial_properties, HostConfig},
	lane::Lanes,
	work_loop::RenderState,
};
use tracing::trace;

/// Prepares the host side of `wip` once all of its children are complete.
///
/// New host nodes are created detached, with their children already appended.
/// Changes to existing ones are only recorded, for the commit pass to apply.
pub(crate) fn complete_work<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<(), RenderError> {
	let tag = state.fibers[wip].tag;
	match tag {
		WorkTag::HostComponent => complete_host_component(state, wip)?,
		WorkTag::HostText => complete_host_text(state, wip)?,
		WorkTag::ContextProvider => match &state.fibers[wip].element_type {
			Some(ElementType::Provider(context)) => state.context.pop(context),
			_ => {
				return Err(RenderError::UnknownTag {
					tag,
					expected: "context provider",
				})
			}
		},
		WorkTag::HostRoot
		| WorkTag::FunctionComponent
		| WorkTag::ClassComponent
		| WorkTag::Fragment
		| WorkTag::ContextConsumer
		| WorkTag::MemoComponent => (),
	}
	bubble_properties(state, wip);
	Ok(())
}

fn complete_host_component<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<(), RenderError> {
	let fiber = &state.fibers[wip];
	let (element_tag, props) = match (&fiber.element_type, &fiber.pending_props) {
		(Some(ElementType::Host(element_tag)), FiberProps::Element(props)) => (element_tag.clone(), props.clone()),
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::HostComponent,
				expected: "host component",
			})
		}
	};

	let existing = match (&fiber.state_node, fiber.alternate) {
		(StateNode::Host(_), Some(current)) => state.fibers[current].memoized_props.element().cloned(),
		_ => None,
	};

	match existing {
		Some(previous) => {
			if !std::rc::Rc::ptr_eq(&previous, &props) {
				// Listener changes need committing too, so even an empty payload is an update.
				let payload = diff_properties(&previous, &props);
				trace!(tag = %element_tag, changes = payload.len(), "Host update.");
				let fiber = &mut state.fibers[wip];
				fiber.update_payload = Some(payload);
				fiber.flags |= Flags::UPDATE;
			}
		}
		None => {
			let instance = state.host.create_element(&element_tag);
			append_all_children(state, &instance, wip);
			set_initial_properties(&mut state.host, &instance, &props);
			state.host.precache_fiber(&instance, wip);
			state.host.update_props(&instance, props);
			trace!(tag = %element_tag, "Created host element.");
			state.fibers[wip].state_node = StateNode::Host(instance);
		}
	}
	Ok(())
}

fn complete_host_text<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<(), RenderError> {
	let fiber = &state.fibers[wip];
	let text = match &fiber.pending_props {
		FiberProps::Text(text) => text.clone(),
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::HostText,
				expected: "text",
			})
		}
	};

	let previous = match (&fiber.state_node, fiber.alternate) {
		(StateNode::Host(_), Some(current)) => Some(state.fibers[current].memoized_props.text().cloned()),
		_ => None,
	};

	match previous {
		Some(previous) => {
			if previous.as_ref() != Some(&text) {
				state.fibers[wip].flags |= Flags::UPDATE;
			}
		}
		None => {
			let instance = state.host.create_text(&text);
			state.host.precache_fiber(&instance, wip);
			state.fibers[wip].state_node = StateNode::Host(instance);
		}
	}
	Ok(())
}

/// Appends the top-level host nodes below `wip` to `parent`.
fn append_all_children<H: HostConfig>(state: &mut RenderState<H>, parent: &H::Instance, wip: FiberId) {
	let mut node = match state.fibers[wip].child {
		Some(child) => child,
		None => return,
	};
	loop {
		let fiber = &state.fibers[node];
		let descend = match (&fiber.state_node, fiber.tag.is_host()) {
			(StateNode::Host(instance), true) => {
				let instance = instance.clone();
				state.host.append_child(parent, &instance);
				None
			}
			_ => fiber.child,
		};
		if let Some(child) = descend {
			node = child;
			continue;
		}

		loop {
			if node == wip {
				return;
			}
			let fiber = &state.fibers[node];
			if let Some(sibling) = fiber.sibling {
				node = sibling;
				break;
			}
			match fiber.return_fiber {
				Some(parent) if parent != wip => node = parent,
				_ => return,
			}
		}
	}
}

/// Collects the children's pending lanes and flags into `wip`.
fn bubble_properties<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) {
	let mut child_lanes = Lanes::NONE;
	let mut subtree_flags = Flags::NONE;
	let mut child = state.fibers[wip].child;
	while let Some(id) = child {
		let fiber = &state.fibers[id];
		child_lanes |= fiber.lanes | fiber.child_lanes;
		subtree_flags |= fiber.flags | fiber.subtree_flags;
		child = fiber.sibling;
	}
	let fiber = &mut state.fibers[wip];
	fiber.child_lanes = child_lanes;
	fiber.subtree_flags = subtree_flags;
}
