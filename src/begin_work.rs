use crate::{
	child_fiber::{mount_child_fibers, reconcile_child_fibers},
	element::{ClassInstance, ElementType, FunctionComponent, Node, PropValue, Props},
	error::RenderError,
	fiber::{FiberId, Flags, MemoizedState, StateNode, WorkTag},
	hooks::{catch_render_panic, render_with_hooks, HookList},
	host::{should_set_text_content, HostConfig},
	lane::Lanes,
	work_loop::RenderState,
};
use core::cell::RefCell;
use std::rc::Rc;
use tracing::{trace, warn};

fn element_props<H: HostConfig>(state: &RenderState<H>, wip: FiberId, expected: &'static str) -> Result<Rc<Props>, RenderError> {
	let fiber = &state.fibers[wip];
	fiber
		.pending_props
		.element()
		.cloned()
		.ok_or(RenderError::UnknownTag { tag: fiber.tag, expected })
}

fn element_type<H: HostConfig>(state: &RenderState<H>, wip: FiberId, expected: &'static str) -> Result<ElementType, RenderError> {
	let fiber = &state.fibers[wip];
	fiber
		.element_type
		.clone()
		.ok_or(RenderError::UnknownTag { tag: fiber.tag, expected })
}

fn reconcile_children<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId, next_children: &Node) -> Option<FiberId> {
	let child = match state.fibers[wip].alternate {
		Some(current) => {
			let current_child = state.fibers[current].child;
			reconcile_child_fibers(&mut state.fibers, wip, current_child, next_children)
		}
		None => mount_child_fibers(&mut state.fibers, wip, next_children),
	};
	state.fibers[wip].child = child;
	child
}

/// Renders `wip` and reconciles its children. Returns the first child to work on next.
pub(crate) fn begin_work<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let tag = state.fibers[wip].tag;
	let next = match tag {
		WorkTag::HostRoot => update_host_root(state, wip),
		WorkTag::FunctionComponent => {
			let component = match element_type(state, wip, "function component")? {
				ElementType::Function(component) => component,
				_ => {
					return Err(RenderError::UnknownTag {
						tag,
						expected: "function component",
					})
				}
			};
			let props = element_props(state, wip, "function component")?;
			update_function_component(state, wip, &component, &props)
		}
		WorkTag::MemoComponent => update_memo_component(state, wip),
		WorkTag::ClassComponent => update_class_component(state, wip),
		WorkTag::HostComponent => update_host_component(state, wip),
		WorkTag::HostText => Ok(None),
		WorkTag::Fragment => {
			let props = element_props(state, wip, "fragment")?;
			Ok(reconcile_children(state, wip, props.children()))
		}
		WorkTag::ContextProvider => update_context_provider(state, wip),
		WorkTag::ContextConsumer => update_context_consumer(state, wip),
	}?;
	state.fibers[wip].lanes = Lanes::NONE;
	Ok(next)
}

fn update_host_root<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let element = match &state.fibers[wip].memoized_state {
		MemoizedState::Root(element) => element.clone(),
		_ => Node::Empty,
	};
	Ok(reconcile_children(state, wip, &element))
}

fn update_function_component<H: HostConfig>(
	state: &mut RenderState<H>,
	wip: FiberId,
	component: &FunctionComponent,
	props: &Props,
) -> Result<Option<FiberId>, RenderError> {
	let is_mount = state.fibers[wip].alternate.is_none();
	let list: HookList = match &state.fibers[wip].memoized_state {
		MemoizedState::Hooks(list) => list.clone(),
		_ => HookList::default(),
	};

	let rendered = render_with_hooks(wip, &list, is_mount, component, props, &state.context, &state.sink)?;
	trace!(component = component.name(), is_mount, "Rendered.");

	if !rendered.writes.is_empty() {
		state.hook_writes.push(rendered.writes);
	}
	let fiber = &mut state.fibers[wip];
	fiber.memoized_state = MemoizedState::Hooks(list);
	fiber.flags |= rendered.flags;
	fiber.update_queue = if rendered.effects.is_empty() { None } else { Some(rendered.effects) };
	Ok(reconcile_children(state, wip, &rendered.children))
}

fn update_memo_component<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let memo = match element_type(state, wip, "memo component")? {
		ElementType::Memo(memo) => memo,
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::MemoComponent,
				expected: "memo component",
			})
		}
	};
	let props = element_props(state, wip, "memo component")?;

	let fiber = &state.fibers[wip];
	if let Some(current) = fiber.alternate {
		let has_scheduled_update = fiber.lanes.intersects(state.render_lanes);
		let previous = state.fibers[current].memoized_props.element().cloned();
		if let Some(previous) = previous {
			// A changed provider above may feed consumers anywhere below, so only bail out without one.
			if !has_scheduled_update && !state.context.has_changed_provider() && memo.props_are_equal(&previous, &props) {
				trace!(component = memo.inner().name(), "Memo bailout.");
				return Ok(bailout_on_already_finished_work(state, wip));
			}
		}
	}

	update_function_component(state, wip, memo.inner(), &props)
}

/// Keeps `wip`'s committed children. Descends into them only if some of them have pending work.
fn bailout_on_already_finished_work<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Option<FiberId> {
	if !state.fibers[wip].child_lanes.intersects(state.render_lanes) {
		return None;
	}
	clone_child_fibers(state, wip)
}

fn clone_child_fibers<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Option<FiberId> {
	let current_children = state.fibers.children(wip);
	let mut first = None;
	let mut previous: Option<FiberId> = None;
	for child in current_children {
		let pending_props = state.fibers[child].pending_props.clone();
		let clone = state.fibers.create_work_in_progress(child, pending_props);
		state.fibers[clone].return_fiber = Some(wip);
		state.fibers[clone].sibling = None;
		match previous {
			None => first = Some(clone),
			Some(previous) => state.fibers[previous].sibling = Some(clone),
		}
		previous = Some(clone);
	}
	state.fibers[wip].child = first;
	first
}

fn update_class_component<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let ty = match element_type(state, wip, "class component")? {
		ElementType::Class(ty) => ty,
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::ClassComponent,
				expected: "class component",
			})
		}
	};
	let props = element_props(state, wip, "class component")?;

	let instance = match &state.fibers[wip].state_node {
		StateNode::Class(instance) => instance.clone(),
		_ => {
			let instance = Rc::new(RefCell::new(catch_render_panic(|| ClassInstance::construct(&ty, &props))?));
			state.fibers[wip].state_node = StateNode::Class(instance.clone());
			instance
		}
	};

	let context = ty.context_type().map(|context| state.context.read(context));
	let children = catch_render_panic(|| instance.borrow_mut().render(&props, context))?;
	trace!(component = ty.name(), "Rendered.");
	Ok(reconcile_children(state, wip, &children))
}

fn update_host_component<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let tag = match element_type(state, wip, "host component")? {
		ElementType::Host(tag) => tag,
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::HostComponent,
				expected: "host component",
			})
		}
	};
	let props = element_props(state, wip, "host component")?;

	let next_children = if should_set_text_content(&tag, &props) {
		// Rendered as text content in complete_work.
		Node::Empty
	} else {
		let previous_was_text = state.fibers[wip]
			.alternate
			.and_then(|current| state.fibers[current].memoized_props.element().cloned())
			.map_or(false, |previous| should_set_text_content(&tag, &previous));
		if previous_was_text {
			state.fibers[wip].flags |= Flags::CONTENT_RESET;
		}
		props.children().clone()
	};

	Ok(reconcile_children(state, wip, &next_children))
}

fn update_context_provider<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let context = match element_type(state, wip, "context provider")? {
		ElementType::Provider(context) => context,
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::ContextProvider,
				expected: "context provider",
			})
		}
	};
	let props = element_props(state, wip, "context provider")?;

	let value = match props.get("value") {
		Some(PropValue::Any(value)) => value.clone(),
		_ => {
			warn!("Context provider without a value. Providing the default.");
			context.default_value().clone()
		}
	};
	let changed = state.fibers[wip]
		.alternate
		.and_then(|current| state.fibers[current].memoized_props.element().cloned())
		.map_or(false, |previous| match (previous.get("value"), props.get("value")) {
			(Some(previous), Some(next)) => !previous.is_same(next),
			(None, None) => false,
			_ => true,
		});
	if changed {
		trace!("Provided value changed.");
	}
	state.context.push_provider(&context, value, changed);
	Ok(reconcile_children(state, wip, props.children()))
}

fn update_context_consumer<H: HostConfig>(state: &mut RenderState<H>, wip: FiberId) -> Result<Option<FiberId>, RenderError> {
	let context = match element_type(state, wip, "context consumer")? {
		ElementType::Consumer(context) => context,
		_ => {
			return Err(RenderError::UnknownTag {
				tag: WorkTag::ContextConsumer,
				expected: "context consumer",
			})
		}
	};
	let props = element_props(state, wip, "context consumer")?;

	let children = match props.get("render") {
		Some(PropValue::Render(render)) => {
			let value = state.context.read(&context);
			catch_render_panic(|| render(&value))?
		}
		_ => Node::Empty,
	};
	Ok(reconcile_children(state, wip, &children))
}

#[cfg(test)]
mod tests {
	use crate::{
		element::{h, Element, ElementType, Node},
		error::RenderError,
		fiber::{FiberId, FiberProps, WorkTag},
		hooks::UpdateSink,
		lane::Lanes,
		memory::MemoryHost,
		work_loop::RenderState,
	};
	use std::rc::Weak;

	struct NoSink;
	impl UpdateSink for NoSink {
		fn schedule_update(&self, _: FiberId, _: Lanes) {}
	}

	fn state() -> RenderState<MemoryHost> {
		let mut host = MemoryHost::new();
		let container = host.create_container("root");
		RenderState::new(host, container, Weak::<NoSink>::new())
	}

	#[test]
	fn mismatched_element_type_is_an_error() {
		let mut state = state();
		let element = h("div");
		let fiber = state.fibers.create_fiber(WorkTag::FunctionComponent, FiberProps::Element(element.props().clone()), None);
		state.fibers[fiber].element_type = Some(ElementType::Host("div".into()));

		match super::begin_work(&mut state, fiber) {
			Err(RenderError::UnknownTag { tag, .. }) => assert_eq!(tag, WorkTag::FunctionComponent),
			other => panic!("unexpected {:?}", other.map(|_| ())),
		}
	}

	#[test]
	fn text_children_use_the_fast_path() {
		let mut state = state();
		let element = h("p").child("hello");
		let fiber = state.fibers.create_fiber_from_element(&element);
		assert_eq!(super::begin_work(&mut state, fiber).unwrap(), None);

		let element = h("p").child(Element::function(|_, _| Node::Empty));
		let fiber = state.fibers.create_fiber_from_element(&element);
		assert!(super::begin_work(&mut state, fiber).unwrap().is_some());
	}
}
