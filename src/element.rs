//! Immutable descriptions of what to render.
//!
//! A component returns a [`Node`], which the reconciler diffs against the committed tree.
//! Elements are cheap to clone: their props are reference-counted and never mutated after construction.

use crate::{context::AnyContext, events::Listener, hooks::Hooks};
use core::{
	any::{type_name, Any, TypeId},
	fmt::{self, Debug, Formatter},
	iter,
};
use std::{borrow::Cow, rc::Rc};

/// Distinguishes siblings across renders.
///
/// Keys compare strictly: `Key::Int(1)` and `Key::Str("1")` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
	Str(Rc<str>),
	Int(i64),
}

impl From<&str> for Key {
	fn from(key: &str) -> Self {
		Self::Str(key.into())
	}
}

impl From<String> for Key {
	fn from(key: String) -> Self {
		Self::Str(key.into())
	}
}

impl From<i64> for Key {
	fn from(key: i64) -> Self {
		Self::Int(key)
	}
}

impl From<i32> for Key {
	fn from(key: i32) -> Self {
		Self::Int(key.into())
	}
}

impl From<u32> for Key {
	fn from(key: u32) -> Self {
		Self::Int(key.into())
	}
}

/// Renders the value of a context consumer.
pub type RenderProp = Rc<dyn Fn(&Rc<dyn Any>) -> Node>;

/// A single property value.
#[derive(Clone)]
pub enum PropValue {
	Text(Rc<str>),
	Number(f64),
	Bool(bool),
	Listener(Listener),
	Render(RenderProp),
	/// Arbitrary data, compared by identity.
	Any(Rc<dyn Any>),
}

impl PropValue {
	/// Identity comparison. Numbers compare like `Object.is`, so `NaN` equals itself and `0.0` differs from `-0.0`.
	#[must_use]
	pub fn is_same(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Text(a), Self::Text(b)) => a == b,
			(Self::Number(a), Self::Number(b)) => a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()),
			(Self::Bool(a), Self::Bool(b)) => a == b,
			(Self::Listener(a), Self::Listener(b)) => a == b,
			(Self::Render(a), Self::Render(b)) => Rc::ptr_eq(a, b),
			(Self::Any(a), Self::Any(b)) => Rc::ptr_eq(a, b),
			_ => false,
		}
	}

	/// Short description of the value's kind, for diagnostics.
	#[must_use]
	pub fn type_name(&self) -> &'static str {
		match self {
			Self::Text(_) => "string",
			Self::Number(_) => "number",
			Self::Bool(_) => "boolean",
			Self::Listener(_) => "listener",
			Self::Render(_) => "render function",
			Self::Any(_) => "object",
		}
	}
}

impl Debug for PropValue {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Text(text) => Debug::fmt(text, f),
			Self::Number(number) => Debug::fmt(number, f),
			Self::Bool(bool) => Debug::fmt(bool, f),
			Self::Listener(_) => f.write_str("<listener>"),
			Self::Render(_) => f.write_str("<render>"),
			Self::Any(_) => f.write_str("<any>"),
		}
	}
}

impl From<&str> for PropValue {
	fn from(text: &str) -> Self {
		Self::Text(text.into())
	}
}

impl From<String> for PropValue {
	fn from(text: String) -> Self {
		Self::Text(text.into())
	}
}

impl From<Rc<str>> for PropValue {
	fn from(text: Rc<str>) -> Self {
		Self::Text(text)
	}
}

impl From<f64> for PropValue {
	fn from(number: f64) -> Self {
		Self::Number(number)
	}
}

impl From<i32> for PropValue {
	fn from(number: i32) -> Self {
		Self::Number(number.into())
	}
}

impl From<bool> for PropValue {
	fn from(bool: bool) -> Self {
		Self::Bool(bool)
	}
}

impl From<Listener> for PropValue {
	fn from(listener: Listener) -> Self {
		Self::Listener(listener)
	}
}

/// Named properties plus children.
#[derive(Clone, Default)]
pub struct Props {
	attributes: Vec<(Cow<'static, str>, PropValue)>,
	children: Node,
}

impl Props {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&PropValue> {
		self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
	}

	/// Attributes in insertion order.
	pub fn attributes(&self) -> impl Iterator<Item = (&str, &PropValue)> {
		self.attributes.iter().map(|(n, v)| (n.as_ref(), v))
	}

	#[must_use]
	pub fn children(&self) -> &Node {
		&self.children
	}

	#[must_use]
	pub fn text(&self, name: &str) -> Option<&str> {
		match self.get(name) {
			Some(PropValue::Text(text)) => Some(text),
			_ => None,
		}
	}

	#[must_use]
	pub fn number(&self, name: &str) -> Option<f64> {
		match self.get(name) {
			Some(PropValue::Number(number)) => Some(*number),
			_ => None,
		}
	}

	#[must_use]
	pub fn bool(&self, name: &str) -> Option<bool> {
		match self.get(name) {
			Some(PropValue::Bool(bool)) => Some(*bool),
			_ => None,
		}
	}

	#[must_use]
	pub fn any<T: 'static>(&self, name: &str) -> Option<&T> {
		match self.get(name) {
			Some(PropValue::Any(any)) => any.downcast_ref(),
			_ => None,
		}
	}

	pub fn set(&mut self, name: impl Into<Cow<'static, str>>, value: impl Into<PropValue>) {
		let name = name.into();
		let value = value.into();
		match self.attributes.iter_mut().find(|(n, _)| *n == name) {
			Some((_, existing)) => *existing = value,
			None => self.attributes.push((name, value)),
		}
	}

	pub fn remove(&mut self, name: &str) -> Option<PropValue> {
		let index = self.attributes.iter().position(|(n, _)| n == name)?;
		Some(self.attributes.remove(index).1)
	}

	pub fn set_children(&mut self, children: impl Into<Node>) {
		self.children = children.into();
	}

	/// Same attribute names with [identical](`PropValue::is_same`) values, and identical children.
	///
	/// Attribute order doesn't matter.
	#[must_use]
	pub fn shallow_equal(&self, other: &Self) -> bool {
		self.attributes.len() == other.attributes.len()
			&& self
				.attributes
				.iter()
				.all(|(name, value)| other.get(name).map_or(false, |other| value.is_same(other)))
			&& self.children.is_same(&other.children)
	}
}

impl Debug for Props {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let mut map = f.debug_map();
		for (name, value) in &self.attributes {
			map.entry(name, value);
		}
		if !matches!(self.children, Node::Empty) {
			map.entry(&"children", &self.children);
		}
		map.finish()
	}
}

/// Anything a component can render.
#[derive(Clone, Default)]
pub enum Node {
	#[default]
	Empty,
	/// Text content. An empty string renders like [`Node::Empty`].
	Text(Rc<str>),
	Element(Element),
	/// Siblings. A nested list is rendered as a fragment.
	List(Rc<[Node]>),
}

impl Node {
	#[must_use]
	pub fn text(text: impl Into<Rc<str>>) -> Self {
		let text = text.into();
		if text.is_empty() {
			Self::Empty
		} else {
			Self::Text(text)
		}
	}

	/// Non-empty text, if this is text.
	#[must_use]
	pub fn as_text(&self) -> Option<&Rc<str>> {
		match self {
			Self::Text(text) if !text.is_empty() => Some(text),
			_ => None,
		}
	}

	/// Identity comparison: equal text, or the very same element props or list.
	#[must_use]
	pub fn is_same(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::Empty, Self::Empty) => true,
			(Self::Text(a), Self::Text(b)) => a == b,
			(Self::Element(a), Self::Element(b)) => a.ty == b.ty && a.key == b.key && Rc::ptr_eq(&a.props, &b.props),
			(Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl Debug for Node {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Empty => f.write_str("Empty"),
			Self::Text(text) => Debug::fmt(text, f),
			Self::Element(element) => Debug::fmt(element, f),
			Self::List(list) => f.debug_list().entries(list.iter()).finish(),
		}
	}
}

impl From<&str> for Node {
	fn from(text: &str) -> Self {
		Self::text(text)
	}
}

impl From<String> for Node {
	fn from(text: String) -> Self {
		Self::text(text)
	}
}

impl From<Rc<str>> for Node {
	fn from(text: Rc<str>) -> Self {
		Self::text(text)
	}
}

impl From<i64> for Node {
	fn from(number: i64) -> Self {
		Self::Text(number.to_string().into())
	}
}

impl From<i32> for Node {
	fn from(number: i32) -> Self {
		Self::Text(number.to_string().into())
	}
}

impl From<u32> for Node {
	fn from(number: u32) -> Self {
		Self::Text(number.to_string().into())
	}
}

impl From<usize> for Node {
	fn from(number: usize) -> Self {
		Self::Text(number.to_string().into())
	}
}

/// Formats like JavaScript's `Number.prototype.toString` for the common cases.
impl From<f64> for Node {
	fn from(number: f64) -> Self {
		let text = if number == 0.0 {
			"0".to_owned()
		} else if number.is_infinite() {
			(if number > 0.0 { "Infinity" } else { "-Infinity" }).to_owned()
		} else {
			number.to_string()
		};
		Self::Text(text.into())
	}
}

/// Booleans render nothing, which allows `condition.then(...)`-style conditionals to be mixed in.
impl From<bool> for Node {
	fn from(_: bool) -> Self {
		Self::Empty
	}
}

impl From<Element> for Node {
	fn from(element: Element) -> Self {
		Self::Element(element)
	}
}

impl From<Vec<Node>> for Node {
	fn from(list: Vec<Node>) -> Self {
		Self::List(list.into())
	}
}

impl<T: Into<Node>> From<Option<T>> for Node {
	fn from(node: Option<T>) -> Self {
		node.map_or(Self::Empty, Into::into)
	}
}

/// Signature of function components.
pub type RenderFn = dyn Fn(&mut Hooks<'_>, &Props) -> Node;

/// A component implemented as a function of its props and hooks.
///
/// Identity is the Rust type of the function, so the same `fn` item (or closure expression)
/// is recognized as the same component across renders even though it's wrapped anew each time.
#[derive(Clone)]
pub struct FunctionComponent {
	type_id: TypeId,
	name: &'static str,
	render: Rc<RenderFn>,
}

impl FunctionComponent {
	pub fn new<F>(render: F) -> Self
	where
		F: Fn(&mut Hooks<'_>, &Props) -> Node + 'static,
	{
		Self {
			type_id: TypeId::of::<F>(),
			name: type_name::<F>(),
			render: Rc::new(render),
		}
	}

	#[must_use]
	pub fn name(&self) -> &'static str {
		self.name
	}

	pub(crate) fn render(&self, hooks: &mut Hooks<'_>, props: &Props) -> Node {
		(self.render)(hooks, props)
	}
}

impl PartialEq for FunctionComponent {
	fn eq(&self, other: &Self) -> bool {
		self.type_id == other.type_id
	}
}

/// A stateful component object.
///
/// Its instance is created once when the node mounts and kept until it unmounts.
pub trait ClassComponent: 'static {
	/// `context` is the value of the class's [context type](`ClassType::with_context_type`), if it has one.
	fn render(&mut self, props: &Props, context: Option<&Rc<dyn Any>>) -> Node;
}

/// Type information of a [`ClassComponent`], used as element type.
#[derive(Clone)]
pub struct ClassType {
	type_id: TypeId,
	name: &'static str,
	construct: Rc<dyn Fn(&Props) -> Box<dyn ClassComponent>>,
	context_type: Option<AnyContext>,
}

impl ClassType {
	pub fn new<C: ClassComponent>(construct: impl Fn(&Props) -> C + 'static) -> Self {
		Self {
			type_id: TypeId::of::<C>(),
			name: type_name::<C>(),
			construct: Rc::new(move |props| Box::new(construct(props))),
			context_type: None,
		}
	}

	/// Makes instances receive the nearest value of `context` when rendering.
	#[must_use]
	pub fn with_context_type(mut self, context: &AnyContext) -> Self {
		self.context_type = Some(context.clone());
		self
	}

	#[must_use]
	pub fn name(&self) -> &'static str {
		self.name
	}

	pub(crate) fn context_type(&self) -> Option<&AnyContext> {
		self.context_type.as_ref()
	}
}

impl PartialEq for ClassType {
	fn eq(&self, other: &Self) -> bool {
		self.type_id == other.type_id
	}
}

/// A mounted class component.
pub struct ClassInstance {
	component: Box<dyn ClassComponent>,
	context: Option<Rc<dyn Any>>,
}

impl ClassInstance {
	pub(crate) fn construct(ty: &ClassType, props: &Props) -> Self {
		Self {
			component: (ty.construct)(props),
			context: None,
		}
	}

	pub(crate) fn render(&mut self, props: &Props, context: Option<Rc<dyn Any>>) -> Node {
		self.context = context;
		self.component.render(props, self.context.as_ref())
	}

	/// The context value seen by the latest render.
	#[must_use]
	pub fn context(&self) -> Option<&Rc<dyn Any>> {
		self.context.as_ref()
	}
}

/// Decides whether a memoized component can skip rendering, given previous and next props.
pub type Comparator = Rc<dyn Fn(&Props, &Props) -> bool>;

/// A function component that re-renders only when its props change.
#[derive(Clone)]
pub struct MemoType {
	inner: FunctionComponent,
	compare: Option<(TypeId, Comparator)>,
}

impl MemoType {
	pub(crate) fn inner(&self) -> &FunctionComponent {
		&self.inner
	}

	/// Shallow props comparison unless a custom comparator was given.
	pub(crate) fn props_are_equal(&self, previous: &Props, next: &Props) -> bool {
		match &self.compare {
			Some((_, compare)) => compare(previous, next),
			None => previous.shallow_equal(next),
		}
	}
}

impl PartialEq for MemoType {
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner && self.compare.as_ref().map(|c| c.0) == other.compare.as_ref().map(|c| c.0)
	}
}

#[derive(Clone, PartialEq)]
pub enum ElementType {
	/// A host node such as `div`.
	Host(Cow<'static, str>),
	Function(FunctionComponent),
	Class(ClassType),
	Fragment,
	Provider(AnyContext),
	Consumer(AnyContext),
	Memo(MemoType),
}

impl Debug for ElementType {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Host(tag) => write!(f, "<{}>", tag),
			Self::Function(component) => write!(f, "Function({})", component.name),
			Self::Class(class) => write!(f, "Class({})", class.name),
			Self::Fragment => f.write_str("Fragment"),
			Self::Provider(context) => write!(f, "Provider({:?})", context.id()),
			Self::Consumer(context) => write!(f, "Consumer({:?})", context.id()),
			Self::Memo(memo) => write!(f, "Memo({})", memo.inner.name),
		}
	}
}

/// A typed element with optional key and props.
#[derive(Clone)]
pub struct Element {
	ty: ElementType,
	key: Option<Key>,
	props: Rc<Props>,
}

/// Shorthand for a host [`Element`].
pub fn h(tag: impl Into<Cow<'static, str>>) -> Element {
	Element::new(ElementType::Host(tag.into()))
}

/// Groups `children` without a host node of its own.
pub fn fragment<N: Into<Node>>(children: impl IntoIterator<Item = N>) -> Element {
	Element::new(ElementType::Fragment).children(children)
}

impl Element {
	#[must_use]
	pub fn new(ty: ElementType) -> Self {
		Self {
			ty,
			key: None,
			props: Rc::default(),
		}
	}

	pub fn function<F>(render: F) -> Self
	where
		F: Fn(&mut Hooks<'_>, &Props) -> Node + 'static,
	{
		Self::new(ElementType::Function(FunctionComponent::new(render)))
	}

	#[must_use]
	pub fn class(ty: ClassType) -> Self {
		Self::new(ElementType::Class(ty))
	}

	/// A function component that skips re-rendering while its props stay [shallowly equal](`Props::shallow_equal`).
	pub fn memo<F>(render: F) -> Self
	where
		F: Fn(&mut Hooks<'_>, &Props) -> Node + 'static,
	{
		Self::new(ElementType::Memo(MemoType {
			inner: FunctionComponent::new(render),
			compare: None,
		}))
	}

	/// Like [`memo`](`Element::memo`), but `compare(previous, next)` decides whether the props are equal.
	pub fn memo_with<F, C>(render: F, compare: C) -> Self
	where
		F: Fn(&mut Hooks<'_>, &Props) -> Node + 'static,
		C: Fn(&Props, &Props) -> bool + 'static,
	{
		Self::new(ElementType::Memo(MemoType {
			inner: FunctionComponent::new(render),
			compare: Some((TypeId::of::<C>(), Rc::new(compare))),
		}))
	}

	#[must_use]
	pub fn ty(&self) -> &ElementType {
		&self.ty
	}

	#[must_use]
	pub fn key(&self) -> Option<&Key> {
		self.key.as_ref()
	}

	#[must_use]
	pub fn props(&self) -> &Rc<Props> {
		&self.props
	}

	#[must_use]
	pub fn with_key(mut self, key: impl Into<Key>) -> Self {
		self.key = Some(key.into());
		self
	}

	#[must_use]
	pub fn attr(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<PropValue>) -> Self {
		Rc::make_mut(&mut self.props).set(name, value);
		self
	}

	/// Registers `listener` under a registration name like `"onClick"`.
	#[must_use]
	pub fn on(self, registration_name: impl Into<Cow<'static, str>>, listener: Listener) -> Self {
		self.attr(registration_name, PropValue::Listener(listener))
	}

	/// Appends one child. A single child stays unwrapped, which keeps the text-content fast path for lone text.
	#[must_use]
	pub fn child(mut self, child: impl Into<Node>) -> Self {
		let child = child.into();
		let props = Rc::make_mut(&mut self.props);
		props.children = match core::mem::take(&mut props.children) {
			Node::Empty => child,
			Node::List(list) => Node::List(list.iter().cloned().chain(iter::once(child)).collect()),
			single => Node::List(vec![single, child].into()),
		};
		self
	}

	/// Replaces the children with a list.
	#[must_use]
	pub fn children<N: Into<Node>>(mut self, children: impl IntoIterator<Item = N>) -> Self {
		Rc::make_mut(&mut self.props).children = Node::List(children.into_iter().map(Into::into).collect());
		self
	}
}

impl Debug for Element {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		let mut debug = f.debug_struct("Element");
		debug.field("ty", &self.ty);
		if let Some(key) = &self.key {
			debug.field("key", key);
		}
		debug.field("props", &self.props).finish()
	}
}
