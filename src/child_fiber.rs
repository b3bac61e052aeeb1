//! Child reconciliation: matching a node's new children against its committed ones.
//!
//! Lists are diffed in three passes. The first walks both lists in lockstep while keys match,
//! the second appends or deletes the tail once either list runs out, and the third looks up
//! the remaining new children by key (or index, for keyless ones) among the remaining old ones.
//!
//! A reused child that ends up before a child that was already further right in the old list is flagged
//! for placement, which is how moves are detected with a single left-to-right pass.

use crate::{
	element::{Element, Key, Node},
	fiber::{FiberId, FiberProps, FiberStore, Flags, WorkTag},
};
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::trace;

/// Lookup key of a remaining old child in the third pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MapKey {
	Key(Key),
	Index(usize),
}

impl MapKey {
	fn of(key: Option<&Key>, index: usize) -> Self {
		match key {
			Some(key) => Self::Key(key.clone()),
			None => Self::Index(index),
		}
	}
}

struct ChildReconciler<'a, I> {
	fibers: &'a mut FiberStore<I>,
	should_track_side_effects: bool,
}

/// Reconciles against committed children, recording placements and deletions.
pub(crate) fn reconcile_child_fibers<I: Clone>(
	fibers: &mut FiberStore<I>,
	return_fiber: FiberId,
	current_first_child: Option<FiberId>,
	new_child: &Node,
) -> Option<FiberId> {
	ChildReconciler {
		fibers,
		should_track_side_effects: true,
	}
	.reconcile_child_fibers(return_fiber, current_first_child, new_child)
}

/// Builds children of a new subtree. Nothing is flagged, since the subtree is inserted as a whole.
pub(crate) fn mount_child_fibers<I: Clone>(fibers: &mut FiberStore<I>, return_fiber: FiberId, new_child: &Node) -> Option<FiberId> {
	ChildReconciler {
		fibers,
		should_track_side_effects: false,
	}
	.reconcile_child_fibers(return_fiber, None, new_child)
}

impl<'a, I: Clone> ChildReconciler<'a, I> {
	fn delete_child(&mut self, return_fiber: FiberId, child_to_delete: FiberId) {
		if !self.should_track_side_effects {
			return;
		}
		let parent = &mut self.fibers[return_fiber];
		parent.deletions.push(child_to_delete);
		parent.flags |= Flags::CHILD_DELETION;
	}

	fn delete_remaining_children(&mut self, return_fiber: FiberId, current_first_child: Option<FiberId>) {
		if !self.should_track_side_effects {
			return;
		}
		let mut child_to_delete = current_first_child;
		while let Some(child) = child_to_delete {
			self.delete_child(return_fiber, child);
			child_to_delete = self.fibers[child].sibling;
		}
	}

	/// A work-in-progress copy of `fiber` as an only child.
	fn use_fiber(&mut self, fiber: FiberId, pending_props: FiberProps) -> FiberId {
		let clone = self.fibers.create_work_in_progress(fiber, pending_props);
		self.fibers[clone].index = 0;
		self.fibers[clone].sibling = None;
		clone
	}

	fn set_return(&mut self, fiber: FiberId, return_fiber: FiberId) -> FiberId {
		self.fibers[fiber].return_fiber = Some(return_fiber);
		fiber
	}

	fn create_child(&mut self, return_fiber: FiberId, new_child: &Node) -> Option<FiberId> {
		let created = match new_child {
			Node::Text(text) if !text.is_empty() => self.fibers.create_fiber_from_text(text.clone()),
			Node::Element(element) => self.fibers.create_fiber_from_element(element),
			Node::List(list) => self.fibers.create_fiber_from_fragment(list.clone(), None),
			Node::Text(_) | Node::Empty => return None,
		};
		Some(self.set_return(created, return_fiber))
	}

	fn update_text_node(&mut self, return_fiber: FiberId, current: Option<FiberId>, text: &Rc<str>) -> FiberId {
		let fiber = match current {
			Some(current) if self.fibers[current].tag == WorkTag::HostText => {
				self.use_fiber(current, FiberProps::Text(text.clone()))
			}
			_ => self.fibers.create_fiber_from_text(text.clone()),
		};
		self.set_return(fiber, return_fiber)
	}

	fn update_element(&mut self, return_fiber: FiberId, current: Option<FiberId>, element: &Element) -> FiberId {
		let fiber = match current {
			Some(current) if self.fibers[current].element_type.as_ref() == Some(element.ty()) => {
				self.use_fiber(current, FiberProps::Element(element.props().clone()))
			}
			_ => self.fibers.create_fiber_from_element(element),
		};
		self.set_return(fiber, return_fiber)
	}

	fn update_fragment(&mut self, return_fiber: FiberId, current: Option<FiberId>, list: &Rc<[Node]>) -> FiberId {
		let fiber = match current {
			Some(current) if self.fibers[current].tag == WorkTag::Fragment => {
				self.use_fiber(current, crate::fiber::fragment_props(list.clone()))
			}
			_ => self.fibers.create_fiber_from_fragment(list.clone(), None),
		};
		self.set_return(fiber, return_fiber)
	}

	/// Updates `old_fiber`'s slot if `new_child` has the same key. Returns `None` on a key mismatch.
	fn update_slot(&mut self, return_fiber: FiberId, old_fiber: Option<FiberId>, new_child: &Node) -> Option<FiberId> {
		let key = old_fiber.and_then(|old| self.fibers[old].key.clone());
		match new_child {
			Node::Text(text) if !text.is_empty() => match key {
				Some(_) => None,
				None => Some(self.update_text_node(return_fiber, old_fiber, text)),
			},
			Node::Element(element) => {
				if element.key() == key.as_ref() {
					Some(self.update_element(return_fiber, old_fiber, element))
				} else {
					None
				}
			}
			Node::List(list) => match key {
				Some(_) => None,
				None => Some(self.update_fragment(return_fiber, old_fiber, list)),
			},
			Node::Text(_) | Node::Empty => None,
		}
	}

	/// Records the new position and flags moves. Returns the updated `last_placed_index`.
	fn place_child(&mut self, new_fiber: FiberId, last_placed_index: usize, new_index: usize) -> usize {
		self.fibers[new_fiber].index = new_index;
		if !self.should_track_side_effects {
			return last_placed_index;
		}
		match self.fibers[new_fiber].alternate {
			Some(current) => {
				let old_index = self.fibers[current].index;
				if old_index < last_placed_index {
					// This is a move.
					self.fibers[new_fiber].flags |= Flags::PLACEMENT;
					last_placed_index
				} else {
					old_index
				}
			}
			None => {
				self.fibers[new_fiber].flags |= Flags::PLACEMENT;
				last_placed_index
			}
		}
	}

	fn place_single_child(&mut self, new_fiber: FiberId) -> FiberId {
		if self.should_track_side_effects && self.fibers[new_fiber].alternate.is_none() {
			self.fibers[new_fiber].flags |= Flags::PLACEMENT;
		}
		new_fiber
	}

	fn map_remaining_children(&self, current_first_child: FiberId) -> HashMap<MapKey, FiberId> {
		let mut existing_children = HashMap::new();
		let mut existing_child = Some(current_first_child);
		while let Some(child) = existing_child {
			let fiber = &self.fibers[child];
			existing_children.insert(MapKey::of(fiber.key.as_ref(), fiber.index), child);
			existing_child = fiber.sibling;
		}
		existing_children
	}

	fn update_from_map(
		&mut self,
		existing_children: &HashMap<MapKey, FiberId>,
		return_fiber: FiberId,
		new_index: usize,
		new_child: &Node,
	) -> Option<FiberId> {
		match new_child {
			Node::Text(text) if !text.is_empty() => {
				let matched = existing_children.get(&MapKey::Index(new_index)).copied();
				Some(self.update_text_node(return_fiber, matched, text))
			}
			Node::Element(element) => {
				let matched = existing_children.get(&MapKey::of(element.key(), new_index)).copied();
				Some(self.update_element(return_fiber, matched, element))
			}
			Node::List(list) => {
				let matched = existing_children.get(&MapKey::Index(new_index)).copied();
				Some(self.update_fragment(return_fiber, matched, list))
			}
			Node::Text(_) | Node::Empty => None,
		}
	}

	fn reconcile_children_array(
		&mut self,
		return_fiber: FiberId,
		current_first_child: Option<FiberId>,
		new_children: &[Node],
	) -> Option<FiberId> {
		let mut result_first_child = None;
		let mut previous_new_fiber: Option<FiberId> = None;
		let mut link = |fibers: &mut FiberStore<I>, new_fiber: FiberId| {
			match previous_new_fiber {
				None => result_first_child = Some(new_fiber),
				Some(previous) => fibers[previous].sibling = Some(new_fiber),
			}
			previous_new_fiber = Some(new_fiber);
		};

		let mut old_fiber = current_first_child;
		let mut last_placed_index = 0;
		let mut new_index = 0;

		// Pass 1: lockstep while keys match.
		while let Some(old) = old_fiber {
			if new_index >= new_children.len() {
				break;
			}
			let (slot, next_old_fiber) = if self.fibers[old].index > new_index {
				// `old` belongs to a later position. Leave it for the map.
				(None, Some(old))
			} else {
				(Some(old), self.fibers[old].sibling)
			};

			let new_fiber = match self.update_slot(return_fiber, slot, &new_children[new_index]) {
				Some(new_fiber) => new_fiber,
				None => {
					if slot.is_none() {
						old_fiber = next_old_fiber;
					}
					break;
				}
			};

			if let Some(slot) = slot {
				if self.fibers[new_fiber].alternate.is_none() {
					// Same slot but not reusable.
					self.delete_child(return_fiber, slot);
				}
			}

			last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
			link(&mut *self.fibers, new_fiber);
			old_fiber = next_old_fiber;
			new_index += 1;
		}

		// Pass 2a: the new list ran out.
		if new_index == new_children.len() {
			self.delete_remaining_children(return_fiber, old_fiber);
			return result_first_child;
		}

		// Pass 2b: the old list ran out.
		let old = match old_fiber {
			Some(old) => old,
			None => {
				for (new_index, new_child) in new_children.iter().enumerate().skip(new_index) {
					if let Some(new_fiber) = self.create_child(return_fiber, new_child) {
						last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
						link(&mut *self.fibers, new_fiber);
					}
				}
				return result_first_child;
			}
		};

		// Pass 3: match the rest by key or index.
		let mut existing_children = self.map_remaining_children(old);
		for (new_index, new_child) in new_children.iter().enumerate().skip(new_index) {
			if let Some(new_fiber) = self.update_from_map(&existing_children, return_fiber, new_index, new_child) {
				if self.should_track_side_effects && self.fibers[new_fiber].alternate.is_some() {
					// Reused, so it must not be deleted below.
					let key = MapKey::of(self.fibers[new_fiber].key.as_ref(), new_index);
					existing_children.remove(&key);
				}
				last_placed_index = self.place_child(new_fiber, last_placed_index, new_index);
				link(&mut *self.fibers, new_fiber);
			}
		}

		if self.should_track_side_effects {
			let mut leftovers: Vec<_> = existing_children.into_iter().map(|(_, child)| child).collect();
			leftovers.sort_by_key(|&child| self.fibers[child].index);
			for child in leftovers {
				self.delete_child(return_fiber, child);
			}
		}

		result_first_child
	}

	fn reconcile_single_element(&mut self, return_fiber: FiberId, current_first_child: Option<FiberId>, element: &Element) -> FiberId {
		let mut child = current_first_child;
		while let Some(current) = child {
			if self.fibers[current].key.as_ref() == element.key() {
				if self.fibers[current].element_type.as_ref() == Some(element.ty()) {
					let sibling = self.fibers[current].sibling;
					self.delete_remaining_children(return_fiber, sibling);
					let existing = self.use_fiber(current, FiberProps::Element(element.props().clone()));
					return self.set_return(existing, return_fiber);
				}
				// Same key but different type: nothing after this can match either.
				self.delete_remaining_children(return_fiber, Some(current));
				break;
			}
			self.delete_child(return_fiber, current);
			child = self.fibers[current].sibling;
		}

		let created = self.fibers.create_fiber_from_element(element);
		self.set_return(created, return_fiber)
	}

	fn reconcile_single_text_node(&mut self, return_fiber: FiberId, current_first_child: Option<FiberId>, text: &Rc<str>) -> FiberId {
		if let Some(current) = current_first_child {
			if self.fibers[current].tag == WorkTag::HostText {
				let sibling = self.fibers[current].sibling;
				self.delete_remaining_children(return_fiber, sibling);
				let existing = self.use_fiber(current, FiberProps::Text(text.clone()));
				return self.set_return(existing, return_fiber);
			}
		}
		self.delete_remaining_children(return_fiber, current_first_child);
		let created = self.fibers.create_fiber_from_text(text.clone());
		self.set_return(created, return_fiber)
	}

	fn reconcile_child_fibers(&mut self, return_fiber: FiberId, current_first_child: Option<FiberId>, new_child: &Node) -> Option<FiberId> {
		let first = match new_child {
			Node::Text(text) if !text.is_empty() => {
				let fiber = self.reconcile_single_text_node(return_fiber, current_first_child, text);
				Some(self.place_single_child(fiber))
			}
			Node::Element(element) => {
				let fiber = self.reconcile_single_element(return_fiber, current_first_child, element);
				Some(self.place_single_child(fiber))
			}
			Node::List(list) => self.reconcile_children_array(return_fiber, current_first_child, list),
			Node::Text(_) | Node::Empty => {
				self.delete_remaining_children(return_fiber, current_first_child);
				None
			}
		};
		trace!(
			tracking = self.should_track_side_effects,
			deletions = self.fibers[return_fiber].deletions.len(),
			"Reconciled children."
		);
		first
	}
}

#[cfg(test)]
mod tests {
	use super::{mount_child_fibers, reconcile_child_fibers};
	use crate::{
		element::{h, Key, Node},
		fiber::{FiberId, FiberProps, FiberStore, Flags},
	};

	/// Clears what the commit pass would have consumed.
	fn commit(store: &mut FiberStore<()>, parent: FiberId) {
		store[parent].deletions.clear();
		store[parent].flags = Flags::NONE;
		for child in store.children(parent) {
			store[child].flags = Flags::NONE;
		}
	}

	fn keyed(keys: &[&str]) -> Node {
		keys.iter().map(|&k| Node::from(h("li").with_key(k))).collect::<Vec<_>>().into()
	}

	fn keys_of(store: &FiberStore<()>, parent: FiberId) -> Vec<Key> {
		store.children(parent).into_iter().filter_map(|c| store[c].key().cloned()).collect()
	}

	/// Mounts `first` under a fresh parent, then reconciles `second` against it.
	fn diff(first: &Node, second: &Node) -> (FiberStore<()>, FiberId, Vec<FiberId>) {
		let mut store = FiberStore::new();
		let parent = store.create_host_root();
		let child = mount_child_fibers(&mut store, parent, first);
		store[parent].child = child;
		commit(&mut store, parent);
		let old_children = store.children(parent);

		let wip = store.create_work_in_progress(parent, FiberProps::None);
		let first_child = store[parent].child;
		let child = reconcile_child_fibers(&mut store, wip, first_child, second);
		store[wip].child = child;
		(store, wip, old_children)
	}

	#[test]
	fn mounting_flags_nothing() {
		let mut store = FiberStore::<()>::new();
		let parent = store.create_host_root();
		let child = mount_child_fibers(&mut store, parent, &keyed(&["a", "b"]));
		store[parent].child = child;
		for child in store.children(parent) {
			assert_eq!(store[child].flags(), Flags::NONE);
			assert_eq!(store[child].return_fiber(), Some(parent));
		}
	}

	#[test]
	fn move_flags_only_the_moved_child() {
		let (store, wip, old) = diff(&keyed(&["a", "b", "c"]), &keyed(&["b", "a", "c"]));
		let new = store.children(wip);
		assert_eq!(new.len(), 3);
		assert!(store[wip].deletions.is_empty());

		// All three are reused.
		assert_eq!(store[new[0]].alternate(), Some(old[1]));
		assert_eq!(store[new[1]].alternate(), Some(old[0]));
		assert_eq!(store[new[2]].alternate(), Some(old[2]));

		assert_eq!(store[new[0]].flags(), Flags::NONE);
		assert_eq!(store[new[1]].flags(), Flags::PLACEMENT);
		assert_eq!(store[new[2]].flags(), Flags::NONE);
		assert_eq!(keys_of(&store, wip), ["b", "a", "c"].map(Key::from));
	}

	#[test]
	fn identical_lists_flag_nothing() {
		let (store, wip, _) = diff(&keyed(&["a", "b", "c"]), &keyed(&["a", "b", "c"]));
		assert!(store[wip].deletions.is_empty());
		for child in store.children(wip) {
			assert_eq!(store[child].flags(), Flags::NONE);
		}
	}

	#[test]
	fn removed_and_added_keys() {
		let (store, wip, old) = diff(&keyed(&["a", "b", "c"]), &keyed(&["a", "c", "d"]));
		assert_eq!(store[wip].deletions, [old[1]]);
		assert!(store[wip].flags().contains(Flags::CHILD_DELETION));

		let new = store.children(wip);
		assert_eq!(store[new[0]].flags(), Flags::NONE);
		assert_eq!(store[new[1]].flags(), Flags::NONE);
		assert_eq!(store[new[2]].flags(), Flags::PLACEMENT);
		assert!(store[new[2]].alternate().is_none());
	}

	#[test]
	fn type_change_in_same_slot_replaces_the_node() {
		let first: Node = vec![Node::from(h("p")), Node::from(h("span"))].into();
		let second: Node = vec![Node::from(h("div")), Node::from(h("span"))].into();
		let (store, wip, old) = diff(&first, &second);

		assert_eq!(store[wip].deletions, [old[0]]);
		let new = store.children(wip);
		assert_eq!(store[new[0]].flags(), Flags::PLACEMENT);
		assert_eq!(store[new[1]].alternate(), Some(old[1]));
	}

	#[test]
	fn single_child_deletes_the_others() {
		let (store, wip, old) = diff(&keyed(&["a", "b", "c"]), &Node::from(h("li").with_key("b")));
		assert_eq!(store[wip].deletions, [old[0], old[2]]);
		let new = store.children(wip);
		assert_eq!(new.len(), 1);
		assert_eq!(store[new[0]].alternate(), Some(old[1]));
	}

	#[test]
	fn text_child_is_reused() {
		let (store, wip, old) = diff(&Node::from("hello"), &Node::from("world"));
		let new = store.children(wip);
		assert_eq!(store[new[0]].alternate(), Some(old[0]));
		assert!(store[wip].deletions.is_empty());
		assert_eq!(store[new[0]].flags(), Flags::NONE);
	}

	#[test]
	fn nested_lists_become_fragments() {
		let nested: Node = vec![Node::from("x"), Node::from(vec![Node::from("y"), Node::from("z")])].into();
		let (store, wip, old) = diff(&nested, &nested);
		let new = store.children(wip);
		assert_eq!(new.len(), 2);
		assert_eq!(store[new[1]].tag(), crate::fiber::WorkTag::Fragment);
		assert_eq!(store[new[1]].alternate(), Some(old[1]));
	}

	#[test]
	fn empty_deletes_everything() {
		let (store, wip, old) = diff(&keyed(&["a", "b"]), &Node::Empty);
		assert_eq!(store[wip].deletions, old);
		assert!(store[wip].child().is_none());
	}

	#[test]
	fn keys_do_not_coerce() {
		let first: Node = vec![Node::from(h("li").with_key(1))].into();
		let second: Node = vec![Node::from(h("li").with_key("1"))].into();
		let (store, wip, old) = diff(&first, &second);
		assert_eq!(store[wip].deletions, old);
	}
}
