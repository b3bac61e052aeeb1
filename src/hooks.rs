//! Per-node state of function components.
//!
//! Hooks are identified by call order. Each node keeps a ledger of hook records that both of its buffers share,
//! so a render walks the records positionally and a mismatch in kind or count fails the render pass.
//! A render reads only the committed records. Changed dependencies and memoized values are staged as
//! ledger writes and applied once the pass commits, so a failed pass leaves the ledger as it was.
//!
//! Effects whose dependencies changed are queued on the node in a circular list and run after commit:
//! layout effects synchronously during the commit pass, passive effects in a later task.

use crate::{
	context::{Context, ContextStack},
	element::{FunctionComponent, Node, Props},
	error::RenderError,
	fiber::{FiberId, Flags},
	lane::Lanes,
};
use core::{
	any::Any,
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use std::{
	panic::{self, AssertUnwindSafe},
	rc::{Rc, Weak},
};
use tracing::{trace, warn};

/// Receives state updates raised by [`Dispatch`].
pub(crate) trait UpdateSink {
	fn schedule_update(&self, fiber: FiberId, lane: Lanes);
}

/// A dependency value for [`Hooks::use_memo`], [`Hooks::use_effect`] and friends.
///
/// Comparison follows `Object.is`: `NaN` equals itself, `0.0` and `-0.0` differ and pointers compare by identity.
#[derive(Clone)]
pub enum Dep {
	Unit,
	Bool(bool),
	Int(i64),
	Float(f64),
	Text(Rc<str>),
	Ptr(Rc<dyn Any>),
}

impl Dep {
	/// A dependency on the identity of `value`.
	pub fn ptr<T: 'static>(value: &Rc<T>) -> Self {
		Self::Ptr(value.clone())
	}
}

impl PartialEq for Dep {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Unit, Self::Unit) => true,
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Int(a), Self::Int(b)) => a == b,
			(Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()),
			(Self::Text(a), Self::Text(b)) => a == b,
			(Self::Ptr(a), Self::Ptr(b)) => Rc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl Debug for Dep {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Unit => f.write_str("()"),
			Self::Bool(bool) => Debug::fmt(bool, f),
			Self::Int(int) => Debug::fmt(int, f),
			Self::Float(float) => Debug::fmt(float, f),
			Self::Text(text) => Debug::fmt(text, f),
			Self::Ptr(ptr) => write!(f, "Ptr({:p})", Rc::as_ptr(ptr)),
		}
	}
}

impl From<()> for Dep {
	fn from((): ()) -> Self {
		Self::Unit
	}
}

impl From<bool> for Dep {
	fn from(bool: bool) -> Self {
		Self::Bool(bool)
	}
}

impl From<i32> for Dep {
	fn from(int: i32) -> Self {
		Self::Int(int.into())
	}
}

impl From<i64> for Dep {
	fn from(int: i64) -> Self {
		Self::Int(int)
	}
}

impl From<u32> for Dep {
	fn from(int: u32) -> Self {
		Self::Int(int.into())
	}
}

impl From<usize> for Dep {
	#[allow(clippy::cast_possible_wrap)]
	fn from(int: usize) -> Self {
		Self::Int(int as i64)
	}
}

impl From<f64> for Dep {
	fn from(float: f64) -> Self {
		Self::Float(float)
	}
}

impl From<&str> for Dep {
	fn from(text: &str) -> Self {
		Self::Text(text.into())
	}
}

impl From<String> for Dep {
	fn from(text: String) -> Self {
		Self::Text(text.into())
	}
}

impl From<Rc<str>> for Dep {
	fn from(text: Rc<str>) -> Self {
		Self::Text(text)
	}
}

impl<T: Into<Dep>> From<Option<T>> for Dep {
	fn from(value: Option<T>) -> Self {
		value.map_or(Self::Unit, Into::into)
	}
}

/// Builds a dependency list: `deps![a, b]` is `Some(vec![Dep::from(a), Dep::from(b)])`.
///
/// `deps![]` (no dependencies) runs an effect only once. Pass `None` instead to run it after every render.
#[macro_export]
macro_rules! deps {
	() => {
		::core::option::Option::Some(::std::vec::Vec::<$crate::hooks::Dep>::new())
	};
	($($dep:expr),+ $(,)?) => {
		::core::option::Option::Some(::std::vec![$($crate::hooks::Dep::from($dep)),+])
	};
}

/// Whether `next` matches `previous` element-wise.
///
/// A missing previous list or a length difference counts as changed.
#[must_use]
pub fn are_hook_inputs_equal(next: &[Dep], previous: Option<&[Dep]>) -> bool {
	match previous {
		Some(previous) => next.len() == previous.len() && next.iter().zip(previous).all(|(a, b)| a == b),
		None => false,
	}
}

/// Cleanup returned by an effect.
pub type Destructor = Box<dyn FnOnce()>;

type EffectCreate = Box<dyn FnOnce() -> Option<Destructor>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EffectKind {
	Layout,
	Passive,
}

/// State that outlives a single effect run: the destructor of the latest run.
#[derive(Default)]
pub(crate) struct EffectInstance {
	destroy: RefCell<Option<Destructor>>,
}

impl EffectInstance {
	pub fn take_destroy(&self) -> Option<Destructor> {
		self.destroy.borrow_mut().take()
	}

	/// Runs the previous destructor (if any), then `create`, keeping its destructor.
	pub fn run(&self, create: EffectCreate) {
		if let Some(destroy) = self.take_destroy() {
			destroy();
		}
		let destroy = create();
		*self.destroy.borrow_mut() = destroy;
	}
}

pub(crate) struct Effect {
	kind: EffectKind,
	create: Option<EffectCreate>,
	instance: Rc<EffectInstance>,
	next: usize,
}

/// An effect that is ready to run outside of any render state borrow.
pub(crate) struct PendingEffect {
	create: EffectCreate,
	instance: Rc<EffectInstance>,
}

impl PendingEffect {
	pub fn run(self) {
		self.instance.run(self.create);
	}
}

/// Effects queued by one render of a node, as a circular list threaded through `next` indices.
#[derive(Default)]
pub(crate) struct EffectList {
	effects: Vec<Effect>,
	last_effect: Option<usize>,
}

impl EffectList {
	fn push(&mut self, kind: EffectKind, create: EffectCreate, instance: Rc<EffectInstance>) {
		let index = self.effects.len();
		let next = match self.last_effect {
			None => index,
			Some(last) => {
				let first = self.effects[last].next;
				self.effects[last].next = index;
				first
			}
		};
		self.effects.push(Effect {
			kind,
			create: Some(create),
			instance,
			next,
		});
		self.last_effect = Some(index);
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.last_effect.is_none()
	}

	/// Indices in insertion order, following the ring from its first entry.
	fn ring(&self) -> Vec<usize> {
		let mut order = Vec::with_capacity(self.effects.len());
		if let Some(last) = self.last_effect {
			let first = self.effects[last].next;
			let mut index = first;
			loop {
				order.push(index);
				index = self.effects[index].next;
				if index == first {
					break;
				}
			}
		}
		order
	}

	/// Takes the not yet run effects of `kind`, in insertion order.
	pub fn take(&mut self, kind: EffectKind) -> Vec<PendingEffect> {
		self.ring()
			.into_iter()
			.filter_map(|index| {
				let effect = &mut self.effects[index];
				if effect.kind != kind {
					return None;
				}
				effect.create.take().map(|create| PendingEffect {
					create,
					instance: effect.instance.clone(),
				})
			})
			.collect()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookKind {
	State,
	Memo,
	Callback,
	Ref,
	LayoutEffect,
	PassiveEffect,
}

impl HookKind {
	fn name(self) -> &'static str {
		match self {
			Self::State => "use_state",
			Self::Memo => "use_memo",
			Self::Callback => "use_callback",
			Self::Ref => "use_ref",
			Self::LayoutEffect => "use_layout_effect",
			Self::PassiveEffect => "use_effect",
		}
	}
}

struct MemoState<T> {
	value: Rc<T>,
	deps: Option<Vec<Dep>>,
}

struct EffectHookState {
	deps: Option<Vec<Dep>>,
	instance: Rc<EffectInstance>,
}

pub(crate) struct HookRecord {
	kind: HookKind,
	state: Box<dyn Any>,
}

/// The hook ledger of one node, shared by both of its buffers.
pub(crate) type HookList = Rc<RefCell<Vec<HookRecord>>>;

/// Record states replaced by one render of a node, applied on commit.
pub(crate) struct LedgerWrites {
	list: HookList,
	writes: Vec<(usize, Box<dyn Any>)>,
}

impl LedgerWrites {
	pub fn is_empty(&self) -> bool {
		self.writes.is_empty()
	}

	pub fn apply(self) {
		let mut list = self.list.borrow_mut();
		for (index, state) in self.writes {
			match list.get_mut(index) {
				Some(record) => record.state = state,
				None => warn!(index, "Dropped a hook write past the end of the ledger."),
			}
		}
	}
}

/// Collects the destructors of all effects in a ledger, for unmounting.
pub(crate) fn unmount_effects(list: &HookList) -> (Vec<Destructor>, Vec<Destructor>) {
	let mut layout = Vec::new();
	let mut passive = Vec::new();
	for record in list.borrow().iter() {
		let target = match record.kind {
			HookKind::LayoutEffect => &mut layout,
			HookKind::PassiveEffect => &mut passive,
			_ => continue,
		};
		if let Some(state) = record.state.downcast_ref::<EffectHookState>() {
			target.extend(state.instance.take_destroy());
		}
	}
	(layout, passive)
}

/// Sets state of a node and schedules it to re-render.
///
/// The reducer is applied eagerly, so state read by the next render already includes the action.
pub struct Dispatch<A> {
	inner: Rc<dyn Fn(A)>,
}

impl<A> Clone for Dispatch<A> {
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<A> Debug for Dispatch<A> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str("Dispatch")
	}
}

impl<A: 'static> Dispatch<A> {
	fn new<S: 'static>(
		cell: Rc<RefCell<S>>,
		reducer: Rc<dyn Fn(&S, A) -> S>,
		fiber: FiberId,
		sink: Weak<dyn UpdateSink>,
	) -> Self {
		Self {
			inner: Rc::new(move |action| {
				let next = reducer(&cell.borrow(), action);
				*cell.borrow_mut() = next;
				match sink.upgrade() {
					Some(sink) => sink.schedule_update(fiber, Lanes::SYNC),
					None => warn!("State update for an unmounted root was ignored."),
				}
			}),
		}
	}

	pub fn dispatch(&self, action: A) {
		(self.inner)(action);
	}
}

enum Slot {
	Existing(usize),
	Fresh,
}

/// Hook access for one render of a function component.
pub struct Hooks<'a> {
	fiber: FiberId,
	list: &'a mut Vec<HookRecord>,
	is_mount: bool,
	cursor: usize,
	previous_len: usize,
	context: &'a ContextStack,
	sink: &'a Weak<dyn UpdateSink>,
	effects: EffectList,
	flags: Flags,
	writes: Vec<(usize, Box<dyn Any>)>,
	error: Option<RenderError>,
}

impl<'a> Hooks<'a> {
	fn slot(&mut self, kind: HookKind) -> Slot {
		let index = self.cursor;
		self.cursor += 1;
		if self.error.is_some() || self.is_mount {
			return Slot::Fresh;
		}
		match self.list.get(index) {
			Some(record) if record.kind == kind => Slot::Existing(index),
			Some(record) => {
				self.error = Some(RenderError::HookOrderChanged {
					index,
					expected: record.kind.name(),
					found: kind.name(),
				});
				Slot::Fresh
			}
			None => {
				self.error = Some(RenderError::HookCountChanged {
					expected: self.previous_len,
					found: index + 1,
				});
				Slot::Fresh
			}
		}
	}

	/// Records a new hook on mount. After a mismatch, records go nowhere.
	fn install(&mut self, kind: HookKind, state: Box<dyn Any>) {
		if self.is_mount && self.error.is_none() {
			self.list.push(HookRecord { kind, state });
		}
	}

	fn existing_state<T: 'static>(&mut self, index: usize) -> Option<&T> {
		if self.list[index].state.is::<T>() {
			self.list[index].state.downcast_ref()
		} else {
			self.error.get_or_insert(RenderError::HookTypeChanged { index });
			None
		}
	}

	/// Replaces the state of record `index` once this render commits.
	fn stage(&mut self, index: usize, state: Box<dyn Any>) {
		if self.error.is_none() {
			self.writes.push((index, state));
		}
	}

	/// State with a reducer. The dispatcher applies `reducer(&state, action)`.
	pub fn use_reducer<S, A>(&mut self, reducer: impl Fn(&S, A) -> S + 'static, initial: S) -> (S, Dispatch<A>)
	where
		S: Clone + 'static,
		A: 'static,
	{
		let cell = match self.slot(HookKind::State) {
			Slot::Existing(index) => self.existing_state::<Rc<RefCell<S>>>(index).map(|cell| cell.clone()),
			Slot::Fresh => None,
		};
		let cell = match cell {
			Some(cell) => cell,
			None => {
				let cell = Rc::new(RefCell::new(initial));
				self.install(HookKind::State, Box::new(cell.clone()));
				cell
			}
		};
		let state = cell.borrow().clone();
		(state, Dispatch::new(cell, Rc::new(reducer), self.fiber, self.sink.clone()))
	}

	/// State that's replaced wholesale by the dispatcher.
	pub fn use_state<S: Clone + 'static>(&mut self, initial: S) -> (S, Dispatch<S>) {
		self.use_reducer(|_, next| next, initial)
	}

	/// Like [`use_state`](`Hooks::use_state`), but computes the initial state only on mount.
	pub fn use_state_with<S: Clone + 'static>(&mut self, initial: impl FnOnce() -> S) -> (S, Dispatch<S>) {
		let index = self.cursor;
		let has_state = !self.is_mount && self.list.get(index).map_or(false, |r| r.kind == HookKind::State);
		if has_state {
			if let Some(state) = self.list[index].state.downcast_ref::<Rc<RefCell<S>>>() {
				let current = state.borrow().clone();
				return self.use_state(current);
			}
		}
		self.use_state(initial())
	}

	/// Recomputes `create()` only when `deps` changed. `None` recomputes on every render.
	pub fn use_memo<T: 'static>(&mut self, create: impl FnOnce() -> T, deps: Option<Vec<Dep>>) -> Rc<T> {
		self.memoized(HookKind::Memo, create, deps)
	}

	/// Keeps returning the first `callback` until `deps` change.
	pub fn use_callback<F: 'static>(&mut self, callback: F, deps: Option<Vec<Dep>>) -> Rc<F> {
		self.memoized(HookKind::Callback, || callback, deps)
	}

	fn memoized<T: 'static>(&mut self, kind: HookKind, create: impl FnOnce() -> T, deps: Option<Vec<Dep>>) -> Rc<T> {
		if let Slot::Existing(index) = self.slot(kind) {
			if let Some(state) = self.existing_state::<MemoState<T>>(index) {
				if let Some(next) = &deps {
					if are_hook_inputs_equal(next, state.deps.as_deref()) {
						return state.value.clone();
					}
				}
				let value = Rc::new(create());
				self.stage(
					index,
					Box::new(MemoState {
						value: value.clone(),
						deps,
					}),
				);
				return value;
			}
		}
		let value = Rc::new(create());
		self.install(
			kind,
			Box::new(MemoState {
				value: value.clone(),
				deps,
			}),
		);
		value
	}

	/// A mutable cell that lives as long as the node.
	pub fn use_ref<T: 'static>(&mut self, initial: T) -> Rc<RefCell<T>> {
		if let Slot::Existing(index) = self.slot(HookKind::Ref) {
			if let Some(cell) = self.existing_state::<Rc<RefCell<T>>>(index) {
				return cell.clone();
			}
		}
		let cell = Rc::new(RefCell::new(initial));
		self.install(HookKind::Ref, Box::new(cell.clone()));
		cell
	}

	/// The nearest provided value of `context`.
	///
	/// This doesn't occupy a hook slot.
	pub fn use_context<T: 'static>(&mut self, context: &Context<T>) -> Rc<T> {
		self.context
			.read(context.handle())
			.downcast::<T>()
			.unwrap_or_else(|_| context.default_value())
	}

	/// Runs `create` after the commit is on screen, once per change of `deps`.
	///
	/// The destructor it returns runs before the next run and on unmount.
	pub fn use_effect(&mut self, create: impl FnOnce() -> Option<Destructor> + 'static, deps: Option<Vec<Dep>>) {
		self.effect(HookKind::PassiveEffect, EffectKind::Passive, Flags::PASSIVE, Box::new(create), deps);
	}

	/// Like [`use_effect`](`Hooks::use_effect`), but runs synchronously during commit,
	/// after host mutations and before any other task.
	pub fn use_layout_effect(
		&mut self,
		create: impl FnOnce() -> Option<Destructor> + 'static,
		deps: Option<Vec<Dep>>,
	) {
		self.effect(HookKind::LayoutEffect, EffectKind::Layout, Flags::UPDATE, Box::new(create), deps);
	}

	fn effect(&mut self, kind: HookKind, effect_kind: EffectKind, flags: Flags, create: EffectCreate, deps: Option<Vec<Dep>>) {
		let existing = match self.slot(kind) {
			Slot::Existing(index) => self.existing_state::<EffectHookState>(index).map(|state| {
				let unchanged = deps
					.as_deref()
					.map_or(false, |next| are_hook_inputs_equal(next, state.deps.as_deref()));
				(index, state.instance.clone(), unchanged)
			}),
			Slot::Fresh => None,
		};

		let instance = match existing {
			Some((_, _, true)) => return,
			Some((index, instance, false)) => {
				self.stage(
					index,
					Box::new(EffectHookState {
						deps,
						instance: instance.clone(),
					}),
				);
				instance
			}
			None => {
				let instance = Rc::new(EffectInstance::default());
				self.install(
					kind,
					Box::new(EffectHookState {
						deps,
						instance: instance.clone(),
					}),
				);
				instance
			}
		};

		self.flags |= flags;
		self.effects.push(effect_kind, create, instance);
	}
}

/// Output of a successful function component render.
pub(crate) struct Rendered {
	pub children: Node,
	pub effects: EffectList,
	pub flags: Flags,
	pub writes: LedgerWrites,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(|message| (*message).to_owned())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "<non-string panic payload>".to_owned())
}

/// Runs `f`, turning a panic into [`RenderError::ComponentPanicked`].
pub(crate) fn catch_render_panic<T>(f: impl FnOnce() -> T) -> Result<T, RenderError> {
	panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| RenderError::ComponentPanicked(panic_message(&*payload)))
}

/// Runs an effect body or cleanup, turning a panic into [`RenderError::EffectPanicked`].
pub(crate) fn catch_effect_panic(f: impl FnOnce()) -> Result<(), RenderError> {
	panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| RenderError::EffectPanicked(panic_message(&*payload)))
}

/// Renders a function component against its hook ledger.
pub(crate) fn render_with_hooks(
	fiber: FiberId,
	list: &HookList,
	is_mount: bool,
	component: &FunctionComponent,
	props: &Props,
	context: &ContextStack,
	sink: &Weak<dyn UpdateSink>,
) -> Result<Rendered, RenderError> {
	let list_handle = list;
	let mut list = list.borrow_mut();
	let previous_len = list.len();
	let mut hooks = Hooks {
		fiber,
		list: &mut list,
		is_mount,
		cursor: 0,
		previous_len,
		context,
		sink,
		effects: EffectList::default(),
		flags: Flags::NONE,
		writes: Vec::new(),
		error: None,
	};

	let children = catch_render_panic(|| component.render(&mut hooks, props))?;

	if let Some(error) = hooks.error {
		return Err(error);
	}
	if !is_mount && hooks.cursor != previous_len {
		return Err(RenderError::HookCountChanged {
			expected: previous_len,
			found: hooks.cursor,
		});
	}

	trace!(hooks = hooks.cursor, effects = hooks.effects.effects.len(), "Rendered function component.");
	Ok(Rendered {
		children,
		effects: hooks.effects,
		flags: hooks.flags,
		writes: LedgerWrites {
			list: list_handle.clone(),
			writes: hooks.writes,
		},
	})
}

#[cfg(test)]
mod tests {
	use super::{are_hook_inputs_equal, Dep, Destructor, EffectInstance, EffectKind, EffectList};
	use std::{cell::RefCell, rc::Rc};

	#[test]
	fn deps_compare_like_object_is() {
		assert!(are_hook_inputs_equal(&[Dep::from(f64::NAN)], Some(&[Dep::from(f64::NAN)])));
		assert!(!are_hook_inputs_equal(&[Dep::from(0.0)], Some(&[Dep::from(-0.0)])));
		assert!(are_hook_inputs_equal(&[Dep::from(1), Dep::from("a")], Some(&[Dep::from(1), Dep::from("a")])));
		assert!(!are_hook_inputs_equal(&[Dep::from(1)], Some(&[Dep::from(1i64), Dep::from(2)])));
		assert!(!are_hook_inputs_equal(&[], None));
		assert!(!are_hook_inputs_equal(&[Dep::from(1)], Some(&[Dep::from(1.0)])));

		let a = Rc::new(5);
		let b = Rc::new(5);
		assert!(are_hook_inputs_equal(&[Dep::ptr(&a)], Some(&[Dep::ptr(&a)])));
		assert!(!are_hook_inputs_equal(&[Dep::ptr(&a)], Some(&[Dep::ptr(&b)])));
	}

	#[test]
	fn deps_macro() {
		assert_eq!(deps![], Some(Vec::new()));
		assert_eq!(deps![1, "x", true], Some(vec![Dep::Int(1), Dep::from("x"), Dep::Bool(true)]));
	}

	#[test]
	fn effect_ring_preserves_insertion_order() {
		let log = Rc::new(RefCell::new(Vec::new()));
		let mut list = EffectList::default();
		for (i, kind) in [EffectKind::Layout, EffectKind::Passive, EffectKind::Layout].into_iter().enumerate() {
			let log = log.clone();
			list.push(
				kind,
				Box::new(move || -> Option<Destructor> {
					log.borrow_mut().push(i);
					None
				}),
				Rc::new(EffectInstance::default()),
			);
		}

		for effect in list.take(EffectKind::Layout) {
			effect.run();
		}
		assert_eq!(*log.borrow(), [0, 2]);

		for effect in list.take(EffectKind::Passive) {
			effect.run();
		}
		assert_eq!(*log.borrow(), [0, 2, 1]);
		assert!(list.take(EffectKind::Passive).is_empty());
	}

	#[test]
	fn rerunning_an_effect_destroys_the_previous_run_first() {
		let log = Rc::new(RefCell::new(Vec::new()));
		let instance = EffectInstance::default();
		for run in 0..2 {
			let log = log.clone();
			instance.run(Box::new(move || -> Option<Destructor> {
				log.borrow_mut().push(format!("create {}", run));
				let log = log.clone();
				Some(Box::new(move || log.borrow_mut().push(format!("destroy {}", run))))
			}));
		}
		assert_eq!(*log.borrow(), ["create 0", "destroy 0", "create 1"]);
	}
}
