//! Render nodes and their arena.
//!
//! Every mounted element is backed by up to two nodes: the committed one and a work-in-progress copy.
//! The two point at each other through [`Fiber::alternate`] and swap roles on every commit.
//! Nodes refer to each other by [`FiberId`], a generational key that never aliases a freed node.

use crate::{
	element::{ClassInstance, Element, ElementType, Key, Node, Props},
	hooks::{EffectList, HookList},
	host::PropUpdate,
	lane::Lanes,
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
	ops::{BitOr, BitOrAssign, Index, IndexMut},
};
use slotmap::SlotMap;
use std::rc::Rc;

slotmap::new_key_type! {
	/// Identifies a render node.
	pub struct FiberId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
	FunctionComponent,
	ClassComponent,
	HostRoot,
	HostComponent,
	HostText,
	Fragment,
	ContextProvider,
	ContextConsumer,
	MemoComponent,
}

impl WorkTag {
	#[must_use]
	pub fn is_host(self) -> bool {
		matches!(self, Self::HostComponent | Self::HostText)
	}

	#[must_use]
	pub fn is_host_parent(self) -> bool {
		matches!(self, Self::HostComponent | Self::HostRoot)
	}
}

/// Side effects a node carries into the commit pass.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
	pub const NONE: Self = Self(0);
	/// Insert (or move) the node's host subtree.
	pub const PLACEMENT: Self = Self(0b0000_0000_0000_0010);
	/// Apply host property changes, or run layout effects.
	pub const UPDATE: Self = Self(0b0000_0000_0000_0100);
	/// Some children were removed. See [`Fiber::deletions`].
	pub const CHILD_DELETION: Self = Self(0b0000_0000_0001_0000);
	/// Clear text content before inserting children.
	pub const CONTENT_RESET: Self = Self(0b0000_0000_0010_0000);
	/// Passive effects are pending.
	pub const PASSIVE: Self = Self(0b0000_1000_0000_0000);

	#[must_use]
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}

	#[must_use]
	pub const fn intersects(self, other: Self) -> bool {
		self.0 & other.0 != 0
	}

	#[must_use]
	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn insert(&mut self, other: Self) {
		self.0 |= other.0;
	}

	pub fn remove(&mut self, other: Self) {
		self.0 &= !other.0;
	}
}

impl BitOr for Flags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

impl BitOrAssign for Flags {
	fn bitor_assign(&mut self, rhs: Self) {
		self.0 |= rhs.0;
	}
}

impl Debug for Flags {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		const NAMES: [(Flags, &str); 5] = [
			(Flags::PLACEMENT, "PLACEMENT"),
			(Flags::UPDATE, "UPDATE"),
			(Flags::CHILD_DELETION, "CHILD_DELETION"),
			(Flags::CONTENT_RESET, "CONTENT_RESET"),
			(Flags::PASSIVE, "PASSIVE"),
		];
		let mut set = f.debug_set();
		for (flag, name) in NAMES {
			if self.contains(flag) {
				set.entry(&format_args!("{}", name));
			}
		}
		set.finish()
	}
}

/// Input of a node's render.
#[derive(Debug, Clone)]
pub enum FiberProps {
	/// Roots take no props.
	None,
	Text(Rc<str>),
	Element(Rc<Props>),
}

impl FiberProps {
	#[must_use]
	pub fn element(&self) -> Option<&Rc<Props>> {
		match self {
			Self::Element(props) => Some(props),
			_ => None,
		}
	}

	#[must_use]
	pub fn text(&self) -> Option<&Rc<str>> {
		match self {
			Self::Text(text) => Some(text),
			_ => None,
		}
	}
}

/// Node-kind specific state that persists across renders.
#[derive(Clone)]
pub(crate) enum MemoizedState {
	None,
	/// What the root renders.
	Root(Node),
	Hooks(HookList),
}

/// The object a node stands for.
pub enum StateNode<I> {
	None,
	Host(I),
	Class(Rc<RefCell<ClassInstance>>),
}

impl<I: Clone> Clone for StateNode<I> {
	fn clone(&self) -> Self {
		match self {
			Self::None => Self::None,
			Self::Host(instance) => Self::Host(instance.clone()),
			Self::Class(instance) => Self::Class(instance.clone()),
		}
	}
}

impl<I: Debug> Debug for StateNode<I> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::None => f.write_str("None"),
			Self::Host(instance) => f.debug_tuple("Host").field(instance).finish(),
			Self::Class(_) => f.write_str("Class"),
		}
	}
}

/// A render node.
pub struct Fiber<I> {
	pub(crate) tag: WorkTag,
	pub(crate) key: Option<Key>,
	pub(crate) element_type: Option<ElementType>,
	pub(crate) pending_props: FiberProps,
	pub(crate) memoized_props: FiberProps,
	pub(crate) state_node: StateNode<I>,

	pub(crate) return_fiber: Option<FiberId>,
	pub(crate) child: Option<FiberId>,
	pub(crate) sibling: Option<FiberId>,
	pub(crate) index: usize,

	pub(crate) flags: Flags,
	/// Union of the flags of all descendants, so commit can skip untouched subtrees.
	pub(crate) subtree_flags: Flags,
	pub(crate) deletions: Vec<FiberId>,
	pub(crate) memoized_state: MemoizedState,
	pub(crate) update_queue: Option<EffectList>,
	pub(crate) update_payload: Option<Vec<PropUpdate>>,

	pub(crate) lanes: Lanes,
	pub(crate) child_lanes: Lanes,
	pub(crate) alternate: Option<FiberId>,
}

impl<I> Fiber<I> {
	fn new(tag: WorkTag, pending_props: FiberProps, key: Option<Key>) -> Self {
		Self {
			tag,
			key,
			element_type: None,
			pending_props,
			memoized_props: FiberProps::None,
			state_node: StateNode::None,
			return_fiber: None,
			child: None,
			sibling: None,
			index: 0,
			flags: Flags::NONE,
			subtree_flags: Flags::NONE,
			deletions: Vec::new(),
			memoized_state: MemoizedState::None,
			update_queue: None,
			update_payload: None,
			lanes: Lanes::NONE,
			child_lanes: Lanes::NONE,
			alternate: None,
		}
	}

	#[must_use]
	pub fn tag(&self) -> WorkTag {
		self.tag
	}

	#[must_use]
	pub fn key(&self) -> Option<&Key> {
		self.key.as_ref()
	}

	#[must_use]
	pub fn element_type(&self) -> Option<&ElementType> {
		self.element_type.as_ref()
	}

	#[must_use]
	pub fn memoized_props(&self) -> &FiberProps {
		&self.memoized_props
	}

	#[must_use]
	pub fn state_node(&self) -> &StateNode<I> {
		&self.state_node
	}

	/// The host node, for host components and text.
	#[must_use]
	pub fn host_instance(&self) -> Option<&I> {
		match &self.state_node {
			StateNode::Host(instance) => Some(instance),
			_ => None,
		}
	}

	#[must_use]
	pub fn return_fiber(&self) -> Option<FiberId> {
		self.return_fiber
	}

	#[must_use]
	pub fn child(&self) -> Option<FiberId> {
		self.child
	}

	#[must_use]
	pub fn sibling(&self) -> Option<FiberId> {
		self.sibling
	}

	/// Position among the siblings as of the render that produced this node.
	#[must_use]
	pub fn index(&self) -> usize {
		self.index
	}

	#[must_use]
	pub fn flags(&self) -> Flags {
		self.flags
	}

	#[must_use]
	pub fn alternate(&self) -> Option<FiberId> {
		self.alternate
	}
}

impl<I: Debug> Debug for Fiber<I> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Fiber")
			.field("tag", &self.tag)
			.field("key", &self.key)
			.field("element_type", &self.element_type)
			.field("state_node", &self.state_node)
			.field("index", &self.index)
			.field("flags", &self.flags)
			.field("lanes", &self.lanes)
			.field("child_lanes", &self.child_lanes)
			.finish_non_exhaustive()
	}
}

/// Owns all render nodes of one root.
pub struct FiberStore<I> {
	fibers: SlotMap<FiberId, Fiber<I>>,
	/// Nodes created from scratch since the last [`FiberStore::settle`].
	created: Vec<FiberId>,
}

impl<I> Default for FiberStore<I> {
	fn default() -> Self {
		Self {
			fibers: SlotMap::with_key(),
			created: Vec::new(),
		}
	}
}

impl<I> Index<FiberId> for FiberStore<I> {
	type Output = Fiber<I>;

	fn index(&self, id: FiberId) -> &Fiber<I> {
		&self.fibers[id]
	}
}

impl<I> IndexMut<FiberId> for FiberStore<I> {
	fn index_mut(&mut self, id: FiberId) -> &mut Fiber<I> {
		&mut self.fibers[id]
	}
}

impl<I: Clone> FiberStore<I> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn get(&self, id: FiberId) -> Option<&Fiber<I>> {
		self.fibers.get(id)
	}

	pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<I>> {
		self.fibers.get_mut(id)
	}

	#[must_use]
	pub fn contains(&self, id: FiberId) -> bool {
		self.fibers.contains_key(id)
	}

	/// Number of live nodes, counting both buffers.
	#[must_use]
	pub fn len(&self) -> usize {
		self.fibers.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.fibers.is_empty()
	}

	/// Direct children of `parent`, in order.
	#[must_use]
	pub fn children(&self, parent: FiberId) -> Vec<FiberId> {
		let mut children = Vec::new();
		let mut child = self[parent].child;
		while let Some(id) = child {
			children.push(id);
			child = self[id].sibling;
		}
		children
	}

	pub(crate) fn create_fiber(&mut self, tag: WorkTag, pending_props: FiberProps, key: Option<Key>) -> FiberId {
		let id = self.fibers.insert(Fiber::new(tag, pending_props, key));
		self.created.push(id);
		id
	}

	/// Accepts all nodes created so far.
	pub(crate) fn settle(&mut self) {
		self.created.clear();
	}

	/// Frees the nodes created since the last [`settle`](`FiberStore::settle`), undoing an abandoned render pass.
	/// Returns the host instances those nodes had already created.
	///
	/// Work-in-progress copies of committed nodes are kept. They are reset when they are reused.
	pub(crate) fn discard_created(&mut self) -> Vec<I> {
		let mut orphans = Vec::new();
		for id in core::mem::take(&mut self.created) {
			if let Some(Fiber {
				state_node: StateNode::Host(instance),
				..
			}) = self.fibers.remove(id)
			{
				orphans.push(instance);
			}
		}
		orphans
	}

	pub(crate) fn create_host_root(&mut self) -> FiberId {
		self.create_fiber(WorkTag::HostRoot, FiberProps::None, None)
	}

	pub(crate) fn create_fiber_from_element(&mut self, element: &Element) -> FiberId {
		let tag = match element.ty() {
			ElementType::Host(_) => WorkTag::HostComponent,
			ElementType::Function(_) => WorkTag::FunctionComponent,
			ElementType::Class(_) => WorkTag::ClassComponent,
			ElementType::Fragment => WorkTag::Fragment,
			ElementType::Provider(_) => WorkTag::ContextProvider,
			ElementType::Consumer(_) => WorkTag::ContextConsumer,
			ElementType::Memo(_) => WorkTag::MemoComponent,
		};
		let id = self.create_fiber(tag, FiberProps::Element(element.props().clone()), element.key().cloned());
		self[id].element_type = Some(element.ty().clone());
		id
	}

	pub(crate) fn create_fiber_from_text(&mut self, text: Rc<str>) -> FiberId {
		self.create_fiber(WorkTag::HostText, FiberProps::Text(text), None)
	}

	/// A fragment node whose children are `list`.
	pub(crate) fn create_fiber_from_fragment(&mut self, list: Rc<[Node]>, key: Option<Key>) -> FiberId {
		self.create_fiber(WorkTag::Fragment, fragment_props(list), key)
	}

	/// The work-in-progress counterpart of `current`, reusing its previous alternate if there is one.
	pub(crate) fn create_work_in_progress(&mut self, current: FiberId, pending_props: FiberProps) -> FiberId {
		let wip = match self[current].alternate.filter(|&alternate| self.contains(alternate)) {
			Some(wip) => {
				let fiber = &mut self[wip];
				fiber.pending_props = pending_props;
				fiber.flags = Flags::NONE;
				fiber.deletions = Vec::new();
				fiber.update_payload = None;
				wip
			}
			None => {
				let source = &self[current];
				let mut fiber = Fiber::new(source.tag, pending_props, source.key.clone());
				fiber.element_type = source.element_type.clone();
				fiber.state_node = source.state_node.clone();
				fiber.alternate = Some(current);
				let wip = self.fibers.insert(fiber);
				self[current].alternate = Some(wip);
				wip
			}
		};

		let source = &self[current];
		let (element_type, state_node, child, memoized_props, memoized_state, lanes, child_lanes, sibling, index) = (
			source.element_type.clone(),
			source.state_node.clone(),
			source.child,
			source.memoized_props.clone(),
			source.memoized_state.clone(),
			source.lanes,
			source.child_lanes,
			source.sibling,
			source.index,
		);
		let fiber = &mut self[wip];
		fiber.element_type = element_type;
		fiber.state_node = state_node;
		fiber.child = child;
		fiber.memoized_props = memoized_props;
		fiber.memoized_state = memoized_state;
		fiber.update_queue = None;
		fiber.lanes = lanes;
		fiber.child_lanes = child_lanes;
		fiber.sibling = sibling;
		fiber.index = index;
		fiber.return_fiber = None;
		fiber.alternate = Some(current);
		wip
	}

	/// Frees `id`, its descendants, and the alternates of all of them.
	pub(crate) fn free_subtree(&mut self, id: FiberId) -> usize {
		let mut freed = 0;
		let mut stack = vec![id];
		while let Some(next) = stack.pop() {
			if let Some(fiber) = self.fibers.remove(next) {
				freed += 1;
				let mut child = fiber.child;
				while let Some(c) = child {
					stack.push(c);
					child = self.fibers.get(c).and_then(|f| f.sibling);
				}
				if let Some(alternate) = fiber.alternate {
					if self.fibers.remove(alternate).is_some() {
						freed += 1;
					}
				}
			}
		}
		freed
	}
}

pub(crate) fn fragment_props(list: Rc<[Node]>) -> FiberProps {
	let mut props = Props::new();
	props.set_children(Node::List(list));
	FiberProps::Element(Rc::new(props))
}

#[cfg(test)]
mod tests {
	use super::{FiberProps, FiberStore, Flags, StateNode, WorkTag};
	use crate::element::h;

	#[test]
	fn work_in_progress_pairs_with_current() {
		let mut store = FiberStore::<u32>::new();
		let element = h("div").with_key("a");
		let current = store.create_fiber_from_element(&element);
		store[current].flags = Flags::PLACEMENT;

		let wip = store.create_work_in_progress(current, FiberProps::Element(element.props().clone()));
		assert_ne!(wip, current);
		assert_eq!(store[wip].alternate(), Some(current));
		assert_eq!(store[current].alternate(), Some(wip));
		assert_eq!(store[wip].tag(), WorkTag::HostComponent);
		assert_eq!(store[wip].flags(), Flags::NONE);
		assert_eq!(store[wip].key(), element.key());

		// The second call reuses the same alternate.
		assert_eq!(store.create_work_in_progress(current, FiberProps::None), wip);
		assert_eq!(store.len(), 2);
	}

	#[test]
	fn freed_ids_never_alias() {
		let mut store = FiberStore::<u32>::new();
		let parent = store.create_fiber_from_element(&h("ul"));
		let child = store.create_fiber_from_element(&h("li"));
		store[parent].child = Some(child);
		store[child].return_fiber = Some(parent);
		let _ = store.create_work_in_progress(child, FiberProps::None);

		assert_eq!(store.free_subtree(parent), 3);
		assert!(store.is_empty());

		let recreated = store.create_fiber_from_element(&h("li"));
		assert_ne!(recreated, child);
		assert!(store.get(child).is_none());
	}

	#[test]
	fn discarding_keeps_settled_nodes() {
		let mut store = FiberStore::<u32>::new();
		let root = store.create_host_root();
		store.settle();

		let wip = store.create_work_in_progress(root, FiberProps::None);
		let fresh = store.create_fiber_from_element(&h("p"));
		store[fresh].state_node = StateNode::Host(7);
		assert_eq!(store.discard_created(), [7]);
		assert!(store.contains(root));
		assert!(store.contains(wip));
		assert!(!store.contains(fresh));
	}

	#[test]
	fn flags_debug() {
		let flags = Flags::PLACEMENT | Flags::UPDATE;
		assert_eq!(format!("{:?}", flags), "{PLACEMENT, UPDATE}");
	}
}
