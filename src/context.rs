//! Values provided to a subtree without threading them through props.

use crate::element::{Element, ElementType, Node, PropValue, RenderProp};
use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
	sync::atomic::{AtomicU64, Ordering},
};
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::error;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

/// A context object. Its [`provider`](`Context::provider`) elements supply values of type `T`
/// to everything rendered below them.
pub struct Context<T> {
	handle: AnyContext,
	default_value: Rc<T>,
}

impl<T> Clone for Context<T> {
	fn clone(&self) -> Self {
		Self {
			handle: self.handle.clone(),
			default_value: self.default_value.clone(),
		}
	}
}

impl<T> Debug for Context<T> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Context").field(&self.handle.id).finish()
	}
}

/// Type-erased identity and default value of a [`Context`].
#[derive(Clone)]
pub struct AnyContext {
	id: ContextId,
	default_value: Rc<dyn Any>,
}

impl AnyContext {
	#[must_use]
	pub fn id(&self) -> ContextId {
		self.id
	}

	#[must_use]
	pub fn default_value(&self) -> &Rc<dyn Any> {
		&self.default_value
	}
}

impl PartialEq for AnyContext {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for AnyContext {}

impl Debug for AnyContext {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("AnyContext").field(&self.id).finish()
	}
}

impl<T: 'static> Context<T> {
	/// Creates a new context whose consumers see `default_value` while no provider is above them.
	pub fn new(default_value: T) -> Self {
		let default_value = Rc::new(default_value);
		Self {
			handle: AnyContext {
				id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
				default_value: default_value.clone(),
			},
			default_value,
		}
	}

	#[must_use]
	pub fn handle(&self) -> &AnyContext {
		&self.handle
	}

	#[must_use]
	pub fn default_value(&self) -> Rc<T> {
		self.default_value.clone()
	}

	/// An element that provides `value` to its children.
	pub fn provider(&self, value: T) -> Element {
		self.provider_shared(Rc::new(value))
	}

	/// Like [`provider`](`Context::provider`), but keeps the identity of `value`.
	///
	/// Providers compare their value by identity, so passing the same `Rc` again doesn't re-render memoized
	/// components below.
	pub fn provider_shared(&self, value: Rc<T>) -> Element {
		Element::new(ElementType::Provider(self.handle.clone())).attr("value", PropValue::Any(value))
	}

	/// An element that renders `render(value)` with the nearest provided value.
	pub fn consumer(&self, render: impl Fn(&T) -> Node + 'static) -> Element {
		let default_value = self.default_value.clone();
		let render: RenderProp = Rc::new(move |value: &Rc<dyn Any>| match value.downcast_ref::<T>() {
			Some(value) => render(value),
			None => render(&default_value),
		});
		Element::new(ElementType::Consumer(self.handle.clone())).attr("render", PropValue::Render(render))
	}
}

/// The render pass's view of currently provided context values.
///
/// Providers push while their subtree renders and pop once it completes,
/// so a read always sees the innermost provider above the node being rendered.
#[derive(Default)]
pub struct ContextStack {
	current: HashMap<ContextId, Rc<dyn Any>>,
	value_stack: Vec<(ContextId, Option<Rc<dyn Any>>, bool)>,
	/// Providers on the stack whose value differs from their committed one.
	changed_providers: usize,
}

impl ContextStack {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, context: &AnyContext, value: Rc<dyn Any>) {
		self.push_provider(context, value, false);
	}

	/// Like [`push`](`ContextStack::push`), noting whether the provider's value changed since its last commit.
	pub(crate) fn push_provider(&mut self, context: &AnyContext, value: Rc<dyn Any>, changed: bool) {
		let previous = self.current.insert(context.id, value);
		self.value_stack.push((context.id, previous, changed));
		if changed {
			self.changed_providers += 1;
		}
	}

	/// Whether any provider above the node being rendered changed its value in this pass.
	pub(crate) fn has_changed_provider(&self) -> bool {
		self.changed_providers > 0
	}

	pub fn pop(&mut self, context: &AnyContext) {
		match self.value_stack.pop() {
			Some((id, previous, changed)) => {
				if changed {
					self.changed_providers -= 1;
				}
				if id != context.id {
					error!("Unbalanced context stack: popped {:?}, expected {:?}", id, context.id);
				}
				match previous {
					Some(previous) => self.current.insert(id, previous),
					None => self.current.remove(&id),
				};
			}
			None => error!("Unbalanced context stack: nothing to pop for {:?}", context.id),
		}
	}

	/// The innermost provided value, or the context's default.
	#[must_use]
	pub fn read(&self, context: &AnyContext) -> Rc<dyn Any> {
		self.current
			.get(&context.id)
			.cloned()
			.unwrap_or_else(|| context.default_value.clone())
	}

	#[must_use]
	pub fn depth(&self) -> usize {
		self.value_stack.len()
	}

	pub(crate) fn reset(&mut self) {
		self.current.clear();
		self.value_stack.clear();
		self.changed_providers = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::{Context, ContextStack};
	use std::rc::Rc;

	fn read(stack: &ContextStack, context: &Context<&'static str>) -> &'static str {
		*stack.read(context.handle()).downcast_ref::<&'static str>().unwrap()
	}

	#[test]
	fn nested_providers_restore_outer_values() {
		let theme = Context::new("default");
		let mut stack = ContextStack::new();
		assert_eq!(read(&stack, &theme), "default");

		stack.push(theme.handle(), Rc::new("V1"));
		assert_eq!(read(&stack, &theme), "V1");
		stack.push(theme.handle(), Rc::new("V2"));
		assert_eq!(read(&stack, &theme), "V2");

		stack.pop(theme.handle());
		assert_eq!(read(&stack, &theme), "V1");
		stack.pop(theme.handle());
		assert_eq!(read(&stack, &theme), "default");
		assert_eq!(stack.depth(), 0);
	}

	#[test]
	fn contexts_are_independent() {
		let a = Context::new("a");
		let b = Context::new("b");
		let mut stack = ContextStack::new();

		stack.push(a.handle(), Rc::new("A1"));
		assert_eq!(read(&stack, &a), "A1");
		assert_eq!(read(&stack, &b), "b");
		stack.pop(a.handle());
	}

	#[test]
	fn changed_providers_are_tracked_while_on_the_stack() {
		let theme = Context::new("default");
		let mut stack = ContextStack::new();

		stack.push(theme.handle(), Rc::new("same"));
		assert!(!stack.has_changed_provider());
		stack.push_provider(theme.handle(), Rc::new("new"), true);
		assert!(stack.has_changed_provider());
		stack.pop(theme.handle());
		assert!(!stack.has_changed_provider());
		stack.pop(theme.handle());
	}
}
