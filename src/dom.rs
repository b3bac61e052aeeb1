//! The browser backend: a [`HostConfig`] over `web_sys` nodes, a [`HostLoop`] over the browser's event loop,
//! and delegated native event listeners.
//!
//! DOM operations that fail are logged and skipped. They never abort a commit.

use crate::{
	element::{Node, PropValue, Props},
	events::{registry, EventPhase, EventRegistry},
	fiber::FiberId,
	host::HostConfig,
	root::{Root, WeakRoot},
	scheduler::{HostLoop, Job, TimeoutId},
};
use core::{
	any::Any,
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use hashbrown::HashMap;
use js_sys::{Function, Reflect};
use std::{collections::VecDeque, rc::Rc};
use tracing::{error, instrument, level_filters::STATIC_MAX_LEVEL, trace, trace_span, warn, Level};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};

/// Name of the expando property that links a DOM node to its side table entry.
const NODE_KEY: &str = "__fiberDomKey";

#[derive(Default)]
struct SideTable {
	fiber: Option<FiberId>,
	props: Option<Rc<Props>>,
}

/// A [`HostConfig`] that renders into the browser DOM.
pub struct DomHost {
	document: web_sys::Document,
	side_tables: HashMap<u32, SideTable>,
	next_key: u32,
}

impl Debug for DomHost {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("DomHost").field("side_tables", &self.side_tables.len()).finish_non_exhaustive()
	}
}

impl DomHost {
	#[must_use]
	pub fn new(document: web_sys::Document) -> Self {
		Self {
			document,
			side_tables: HashMap::new(),
			next_key: 1,
		}
	}

	/// A host for the current window's document, if there is one.
	#[must_use]
	pub fn for_window() -> Option<Self> {
		Some(Self::new(web_sys::window()?.document()?))
	}

	fn key_of(node: &web_sys::Node) -> Option<u32> {
		let key = Reflect::get(node, &JsValue::from_str(NODE_KEY)).ok()?.as_f64()?;
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		Some(key as u32)
	}

	fn side_table(&mut self, node: &web_sys::Node) -> Option<&mut SideTable> {
		let key = match Self::key_of(node) {
			Some(key) => key,
			None => {
				let key = self.next_key;
				if let Err(error) = Reflect::set(node, &JsValue::from_str(NODE_KEY), &JsValue::from(key)) {
					error!("Failed to tag DOM node: {:?}", error);
					return None;
				}
				self.next_key += 1;
				key
			}
		};
		Some(self.side_tables.entry(key).or_default())
	}

	fn element(instance: &web_sys::Node) -> Option<&web_sys::Element> {
		let element = instance.dyn_ref::<web_sys::Element>();
		if element.is_none() {
			error!("Expected an element but found {:?}", instance);
		}
		element
	}
}

/// Properties that must be written as IDL properties, since their attributes only set the initial state.
fn is_live_property(name: &str) -> bool {
	matches!(name, "value" | "checked" | "selected")
}

fn attribute_name(name: &str) -> &str {
	match name {
		"className" => "class",
		"htmlFor" => "for",
		name => name,
	}
}

fn attribute_value(value: &PropValue) -> Option<String> {
	match value {
		PropValue::Text(text) => Some(text.to_string()),
		PropValue::Number(number) => match Node::from(*number) {
			Node::Text(text) => Some(text.to_string()),
			_ => None,
		},
		PropValue::Bool(true) => Some(String::new()),
		PropValue::Bool(false) | PropValue::Listener(_) | PropValue::Render(_) | PropValue::Any(_) => None,
	}
}

impl HostConfig for DomHost {
	type Instance = web_sys::Node;

	fn create_element(&mut self, tag: &str) -> web_sys::Node {
		match self.document.create_element(tag) {
			Ok(element) => element.into(),
			Err(error) => {
				error!("Failed to create <{}>: {:?}. Using a placeholder comment instead.", tag, error);
				self.document.create_comment(tag).into()
			}
		}
	}

	fn create_text(&mut self, text: &str) -> web_sys::Node {
		self.document.create_text_node(text).into()
	}

	fn set_property(&mut self, instance: &web_sys::Node, name: &str, value: &PropValue) {
		let element = match Self::element(instance) {
			Some(element) => element,
			None => return,
		};

		if is_live_property(name) {
			let js_value = match value {
				PropValue::Text(text) => JsValue::from_str(text),
				PropValue::Number(number) => JsValue::from_f64(*number),
				PropValue::Bool(bool) => JsValue::from_bool(*bool),
				_ => return trace!(name, "Skipped non-primitive property."),
			};
			if let Err(error) = Reflect::set(element, &JsValue::from_str(name), &js_value) {
				error!("Failed to set property {}: {:?}", name, error);
			}
			return;
		}

		let result = match attribute_value(value) {
			Some(attribute) => element.set_attribute(attribute_name(name), &attribute),
			None if matches!(value, PropValue::Bool(false)) => element.remove_attribute(attribute_name(name)),
			None => return trace!(name, kind = value.type_name(), "Skipped non-primitive property."),
		};
		if let Err(error) = result {
			if cfg!(feature = "dangerous-logging") {
				error!("Failed to set attribute {}={:?}: {:?}", name, value, error);
			} else {
				error!("Failed to set attribute {}: {:?}", name, error);
			}
		}
	}

	fn remove_property(&mut self, instance: &web_sys::Node, name: &str) {
		let element = match Self::element(instance) {
			Some(element) => element,
			None => return,
		};
		if is_live_property(name) {
			if let Err(error) = Reflect::set(element, &JsValue::from_str(name), &JsValue::UNDEFINED) {
				error!("Failed to reset property {}: {:?}", name, error);
			}
		}
		if let Err(error) = element.remove_attribute(attribute_name(name)) {
			error!("Failed to remove attribute {}: {:?}", name, error);
		}
	}

	fn set_text_content(&mut self, instance: &web_sys::Node, text: &str) {
		instance.set_text_content(if text.is_empty() { None } else { Some(text) });
	}

	fn commit_text_update(&mut self, text_instance: &web_sys::Node, text: &str) {
		if STATIC_MAX_LEVEL >= Level::WARN && text_instance.node_type() != web_sys::Node::TEXT_NODE {
			warn!("Updating the text of a non-text node: {:?}", text_instance);
		}
		text_instance.set_node_value(Some(text));
	}

	fn append_child(&mut self, parent: &web_sys::Node, child: &web_sys::Node) {
		if let Err(error) = parent.append_child(child) {
			error!("Failed to append child: {:?}", error);
		}
	}

	fn insert_before(&mut self, parent: &web_sys::Node, child: &web_sys::Node, before: &web_sys::Node) {
		if let Err(error) = parent.insert_before(child, Some(before)) {
			error!("Failed to insert child: {:?}", error);
		}
	}

	fn remove_child(&mut self, parent: &web_sys::Node, child: &web_sys::Node) {
		if let Err(error) = parent.remove_child(child) {
			error!("Failed to remove child: {:?}", error);
		}
	}

	fn precache_fiber(&mut self, instance: &web_sys::Node, fiber: FiberId) {
		if let Some(table) = self.side_table(instance) {
			table.fiber = Some(fiber);
		}
	}

	fn update_props(&mut self, instance: &web_sys::Node, props: Rc<Props>) {
		if let Some(table) = self.side_table(instance) {
			table.props = Some(props);
		}
	}

	fn closest_fiber(&self, instance: &web_sys::Node) -> Option<FiberId> {
		let mut next = Some(instance.clone());
		while let Some(node) = next {
			if let Some(fiber) = Self::key_of(&node).and_then(|key| self.side_tables.get(&key)?.fiber) {
				return Some(fiber);
			}
			next = node.parent_node();
		}
		None
	}

	fn current_props(&self, instance: &web_sys::Node) -> Option<Rc<Props>> {
		self.side_tables.get(&Self::key_of(instance)?)?.props.clone()
	}

	fn detach_instance(&mut self, instance: &web_sys::Node) {
		if let Some(key) = Self::key_of(instance) {
			self.side_tables.remove(&key);
		}
	}

	fn input_value(&self, instance: &web_sys::Node) -> Option<String> {
		Reflect::get(instance, &JsValue::from_str("value")).ok()?.as_string()
	}
}

/// A [`HostLoop`] on the browser's event loop.
///
/// Macrotasks are posted through a `MessageChannel`, which (unlike `setTimeout(…, 0)`) isn't clamped.
pub struct WebLoop {
	window: web_sys::Window,
	performance: Option<web_sys::Performance>,
	port: web_sys::MessagePort,
	macrotasks: Rc<RefCell<VecDeque<Job>>>,
	queue_microtask: Function,
	_channel: web_sys::MessageChannel,
	_on_message: Closure<dyn FnMut()>,
}

impl Debug for WebLoop {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("WebLoop")
			.field("pending_macrotasks", &self.macrotasks.borrow().len())
			.finish_non_exhaustive()
	}
}

impl WebLoop {
	/// # Errors
	///
	/// Fails outside of a window context, or if `MessageChannel` or `queueMicrotask` are unavailable.
	#[instrument]
	pub fn new() -> Result<Rc<Self>, JsValue> {
		let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
		let channel = web_sys::MessageChannel::new()?;
		let queue_microtask = Reflect::get(&js_sys::global(), &JsValue::from_str("queueMicrotask"))?.dyn_into::<Function>()?;

		let macrotasks: Rc<RefCell<VecDeque<Job>>> = Rc::default();
		let on_message = Closure::wrap(Box::new({
			let macrotasks = macrotasks.clone();
			move || {
				let job = macrotasks.borrow_mut().pop_front();
				if let Some(job) = job {
					let span = trace_span!("Macrotask");
					let _enter = span.enter();
					job();
				}
			}
		}) as Box<dyn FnMut()>);
		channel.port1().set_onmessage(Some(on_message.as_ref().unchecked_ref()));

		Ok(Rc::new(Self {
			performance: window.performance(),
			window,
			port: channel.port2(),
			macrotasks,
			queue_microtask,
			_channel: channel,
			_on_message: on_message,
		}))
	}
}

impl HostLoop for WebLoop {
	#[allow(clippy::cast_possible_truncation)]
	fn now(&self) -> i64 {
		self.performance.as_ref().map_or_else(js_sys::Date::now, web_sys::Performance::now) as i64
	}

	fn post_macrotask(&self, job: Job) {
		self.macrotasks.borrow_mut().push_back(job);
		if let Err(error) = self.port.post_message(&JsValue::UNDEFINED) {
			error!("Failed to post macrotask: {:?}", error);
		}
	}

	fn queue_microtask(&self, job: Job) {
		if let Err(error) = self.queue_microtask.call1(&JsValue::UNDEFINED, &Closure::once_into_js(move || job())) {
			error!("Failed to queue microtask: {:?}", error);
		}
	}

	fn set_timeout(&self, job: Job, delay: i64) -> TimeoutId {
		let callback = Closure::once_into_js(move || job());
		#[allow(clippy::cast_possible_truncation)]
		let delay = delay.clamp(0, i64::from(i32::MAX)) as i32;
		match self
			.window
			.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), delay)
		{
			#[allow(clippy::cast_sign_loss)]
			Ok(handle) => TimeoutId(handle as u64),
			Err(error) => {
				error!("Failed to set timeout: {:?}", error);
				TimeoutId(0)
			}
		}
	}

	#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
	fn clear_timeout(&self, id: TimeoutId) {
		// A cleared timer's closure is never called and so never freed.
		self.window.clear_timeout_with_handle(id.0 as i32);
	}
}

/// Native listeners registered by [`listen_to_all_supported_events`]. Dropping this removes them.
pub struct EventListeners {
	container: web_sys::EventTarget,
	listeners: Vec<(String, bool, Closure<dyn Fn(web_sys::Event)>)>,
}

impl Debug for EventListeners {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventListeners").field("count", &self.listeners.len()).finish_non_exhaustive()
	}
}

impl Drop for EventListeners {
	fn drop(&mut self) {
		for (event_type, capture, listener) in &self.listeners {
			if let Err(error) = self.container.remove_event_listener_with_callback_and_bool(
				event_type,
				listener.as_ref().unchecked_ref(),
				*capture,
			) {
				error!("Failed to remove {} listener: {:?}", event_type, error);
			}
		}
	}
}

fn is_passive(event_type: &str) -> bool {
	matches!(event_type, "touchstart" | "touchmove" | "wheel")
}

fn dispatch(root: &WeakRoot<DomHost>, event: &web_sys::Event, phase: EventPhase) {
	let root = match root.upgrade() {
		Some(root) => root,
		None => return,
	};
	let target = match event.target().and_then(|target| target.dyn_into::<web_sys::Node>().ok()) {
		Some(target) => target,
		None => return,
	};
	let event_type = event.type_();
	let native: Rc<dyn Any> = Rc::new(event.clone());
	if let Err(error) = root.dispatch_event(&event_type, phase, &target, Some(native)) {
		error!("Dispatching {} failed: {}", event_type, error);
	}
}

/// Listens for every event the registry knows at the root's container and forwards them to [`Root::dispatch_event`].
///
/// Events that bubble are delegated in both phases. The others are only seen while capturing,
/// so both phases are dispatched from the capture listener.
///
/// # Errors
///
/// Fails if the container isn't an event target or a listener can't be added.
#[instrument(skip(root))]
pub fn listen_to_all_supported_events(root: &Root<DomHost>) -> Result<EventListeners, JsValue> {
	let container: web_sys::EventTarget = root.container().dyn_into()?;
	let mut listeners = EventListeners {
		container,
		listeners: Vec::new(),
	};

	for event_type in registry().all_native_events() {
		let non_delegated = EventRegistry::is_non_delegated(event_type);
		for capture in [true, false] {
			if non_delegated && !capture {
				continue;
			}
			let weak = root.downgrade();
			let listener = Closure::wrap(Box::new(move |event: web_sys::Event| {
				if capture {
					dispatch(&weak, &event, EventPhase::Capture);
					if non_delegated {
						dispatch(&weak, &event, EventPhase::Bubble);
					}
				} else {
					dispatch(&weak, &event, EventPhase::Bubble);
				}
			}) as Box<dyn Fn(web_sys::Event)>);

			let mut options = web_sys::AddEventListenerOptions::new();
			options.capture(capture);
			if is_passive(event_type) {
				options.passive(true);
			}
			listeners.container.add_event_listener_with_callback_and_add_event_listener_options(
				event_type,
				listener.as_ref().unchecked_ref(),
				&options,
			)?;
			listeners.listeners.push((event_type.to_owned(), capture, listener));
		}
	}

	trace!(count = listeners.listeners.len(), "Listening.");
	Ok(listeners)
}

/// Rendering is otherwise driven entirely through [`Root`]. This is a convenience for the common setup.
///
/// # Errors
///
/// See [`WebLoop::new`] and [`listen_to_all_supported_events`].
pub fn create_dom_root(container: web_sys::Element) -> Result<(Root<DomHost>, EventListeners), JsValue> {
	let host = DomHost::for_window().ok_or_else(|| JsValue::from_str("No document"))?;
	let host_loop: Rc<dyn HostLoop> = WebLoop::new()?;
	let scheduler = crate::scheduler::Scheduler::new(host_loop);
	let root = crate::root::create_root(host, container.into(), scheduler);
	let listeners = listen_to_all_supported_events(&root)?;
	Ok((root, listeners))
}
