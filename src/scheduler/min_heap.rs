//! Array-backed binary min-heap ordered by `(sort_index, id)`.
//!
//! Unlike [`std::collections::BinaryHeap`], the sort key is read through [`HeapNode`] on every comparison,
//! so a node's key may change while it is *outside* of a heap (the scheduler re-keys delayed tasks when
//! moving them into the ready queue).

use core::cmp::Ordering;

/// An element that can be stored in a [`MinHeap`].
pub trait HeapNode {
	/// Primary sort key. Smaller sorts first.
	fn sort_index(&self) -> i64;
	/// Tie breaker. Ids are handed out monotonically, which makes equal keys FIFO.
	fn id(&self) -> u64;
}

fn compare<T: HeapNode>(a: &T, b: &T) -> Ordering {
	a.sort_index().cmp(&b.sort_index()).then_with(|| a.id().cmp(&b.id()))
}

#[derive(Debug)]
pub struct MinHeap<T> {
	nodes: Vec<T>,
}

impl<T> Default for MinHeap<T> {
	fn default() -> Self {
		Self { nodes: Vec::new() }
	}
}

impl<T: HeapNode> MinHeap<T> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	#[must_use]
	pub fn peek(&self) -> Option<&T> {
		self.nodes.first()
	}

	pub fn push(&mut self, node: T) {
		let index = self.nodes.len();
		self.nodes.push(node);
		self.sift_up(index);
	}

	pub fn pop(&mut self) -> Option<T> {
		if self.nodes.is_empty() {
			return None;
		}
		let first = self.nodes.swap_remove(0);
		if !self.nodes.is_empty() {
			self.sift_down(0);
		}
		Some(first)
	}

	/// Iterates in storage order, which is *not* sorted.
	pub fn iter(&self) -> impl Iterator<Item = &T> {
		self.nodes.iter()
	}

	fn sift_up(&mut self, mut index: usize) {
		while index > 0 {
			let parent_index = (index - 1) / 2;
			if compare(&self.nodes[parent_index], &self.nodes[index]) == Ordering::Greater {
				self.nodes.swap(parent_index, index);
				index = parent_index;
			} else {
				return;
			}
		}
	}

	fn sift_down(&mut self, mut index: usize) {
		let length = self.nodes.len();
		let half_length = length / 2;
		while index < half_length {
			let left_index = 2 * index + 1;
			let right_index = left_index + 1;

			let smallest = if right_index < length && compare(&self.nodes[right_index], &self.nodes[left_index]) == Ordering::Less {
				right_index
			} else {
				left_index
			};

			if compare(&self.nodes[smallest], &self.nodes[index]) == Ordering::Less {
				self.nodes.swap(index, smallest);
				index = smallest;
			} else {
				return;
			}
		}
	}

	/// Checks that every non-root element's key is at least its parent's.
	#[must_use]
	pub fn is_valid(&self) -> bool {
		(1..self.nodes.len()).all(|i| compare(&self.nodes[(i - 1) / 2], &self.nodes[i]) != Ordering::Greater)
	}
}

#[cfg(test)]
mod tests {
	use super::{HeapNode, MinHeap};
	use core::iter;

	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	struct Entry {
		sort_index: i64,
		id: u64,
	}

	impl HeapNode for Entry {
		fn sort_index(&self) -> i64 {
			self.sort_index
		}

		fn id(&self) -> u64 {
			self.id
		}
	}

	/// Small deterministic LCG so the interleavings below are reproducible.
	struct Lcg(u64);
	impl Lcg {
		fn next(&mut self) -> u64 {
			self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
			self.0 >> 33
		}
	}

	#[test]
	fn empty_heap() {
		let mut heap = MinHeap::<Entry>::new();
		assert!(heap.peek().is_none());
		assert!(heap.pop().is_none());
		assert!(heap.is_valid());
	}

	#[test]
	fn equal_keys_pop_in_insertion_order() {
		let mut heap = MinHeap::new();
		for id in 1..=5 {
			heap.push(Entry { sort_index: 7, id });
		}
		let ids: Vec<_> = iter::from_fn(|| heap.pop()).map(|e| e.id).collect();
		assert_eq!(ids, [1, 2, 3, 4, 5]);
	}

	#[test]
	fn interleaved_push_pop_always_yields_minimum() {
		let mut rng = Lcg(42);
		let mut heap = MinHeap::new();
		let mut shadow = Vec::<Entry>::new();
		let mut next_id = 1;

		for _ in 0..2000 {
			if rng.next() % 3 == 0 {
				let expected = shadow.iter().copied().min_by_key(|e| (e.sort_index, e.id));
				if let Some(expected) = expected {
					shadow.retain(|e| *e != expected);
				}
				assert_eq!(heap.pop(), expected);
			} else {
				#[allow(clippy::cast_possible_wrap)]
				let entry = Entry {
					sort_index: (rng.next() % 50) as i64 - 10,
					id: next_id,
				};
				next_id += 1;
				heap.push(entry);
				shadow.push(entry);
			}
			assert!(heap.is_valid());
			assert_eq!(heap.len(), shadow.len());
		}
	}
}
