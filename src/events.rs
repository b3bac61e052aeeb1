//! Synthetic events: native event names, listener lookup and dispatch order.
//!
//! A native event arriving at the root container is mapped to a registration name such as `onClick`
//! (or `onClickCapture` in the capture phase). Listeners are then collected from the target node up to the root,
//! reading each host node's *committed* props, and run in propagation order.

use crate::{
	element::{ElementType, PropValue, Props},
	error::{DispatchError, ListenerError},
	fiber::{FiberId, FiberStore, StateNode, WorkTag},
	hooks::panic_message,
	host::HostConfig,
	lane::EventPriority,
	scheduler::PriorityLevel,
};
use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
};
use hashbrown::{HashMap, HashSet};
use std::{
	panic::{self, AssertUnwindSafe},
	rc::Rc,
	sync::OnceLock,
};
use tracing::{trace, warn};

type ListenerFn = dyn Fn(&mut SyntheticEvent) -> Result<(), ListenerError>;

/// An event handler attached through a prop like `onClick`.
///
/// Listeners compare by identity.
#[derive(Clone)]
pub struct Listener(Rc<ListenerFn>);

impl Listener {
	pub fn new(listener: impl Fn(&mut SyntheticEvent) -> Result<(), ListenerError> + 'static) -> Self {
		Self(Rc::new(listener))
	}

	/// A listener that can't fail.
	pub fn infallible(listener: impl Fn(&mut SyntheticEvent) + 'static) -> Self {
		Self::new(move |event| {
			listener(event);
			Ok(())
		})
	}

	pub fn call(&self, event: &mut SyntheticEvent) -> Result<(), ListenerError> {
		(self.0)(event)
	}
}

impl PartialEq for Listener {
	fn eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}

impl Debug for Listener {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str("Listener")
	}
}

/// Propagation phase of a native event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
	Capture,
	Bubble,
}

/// The event object listeners receive.
pub struct SyntheticEvent {
	registration_name: String,
	event_type: String,
	native: Option<Rc<dyn Any>>,
	target: Option<FiberId>,
	current_target: Option<FiberId>,
	propagation_stopped: bool,
	default_prevented: bool,
}

impl SyntheticEvent {
	#[must_use]
	pub fn new(registration_name: impl Into<String>, event_type: impl Into<String>, native: Option<Rc<dyn Any>>) -> Self {
		Self {
			registration_name: registration_name.into(),
			event_type: event_type.into(),
			native,
			target: None,
			current_target: None,
			propagation_stopped: false,
			default_prevented: false,
		}
	}

	/// Base registration name, for example `onClick` (also for capture listeners).
	#[must_use]
	pub fn registration_name(&self) -> &str {
		&self.registration_name
	}

	/// Native event type, for example `click`.
	#[must_use]
	pub fn event_type(&self) -> &str {
		&self.event_type
	}

	/// The native event object, if the host supplied one.
	#[must_use]
	pub fn native<T: 'static>(&self) -> Option<&T> {
		self.native.as_ref().and_then(|native| native.downcast_ref())
	}

	/// Node the event was dispatched to.
	#[must_use]
	pub fn target(&self) -> Option<FiberId> {
		self.target
	}

	/// Node whose listener is currently running.
	#[must_use]
	pub fn current_target(&self) -> Option<FiberId> {
		self.current_target
	}

	/// Skips all listeners on nodes further along the propagation path.
	pub fn stop_propagation(&mut self) {
		self.propagation_stopped = true;
	}

	#[must_use]
	pub fn is_propagation_stopped(&self) -> bool {
		self.propagation_stopped
	}

	/// Records the request. Hosts apply it to the native event after dispatch.
	pub fn prevent_default(&mut self) {
		self.default_prevented = true;
	}

	#[must_use]
	pub fn is_default_prevented(&self) -> bool {
		self.default_prevented
	}
}

impl Debug for SyntheticEvent {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyntheticEvent")
			.field("registration_name", &self.registration_name)
			.field("event_type", &self.event_type)
			.field("target", &self.target)
			.field("current_target", &self.current_target)
			.field("propagation_stopped", &self.propagation_stopped)
			.field("default_prevented", &self.default_prevented)
			.finish()
	}
}

const SIMPLE_EVENTS: &[&str] = &[
	"abort",
	"auxClick",
	"cancel",
	"canPlay",
	"canPlayThrough",
	"click",
	"close",
	"contextMenu",
	"copy",
	"cut",
	"drag",
	"dragEnd",
	"dragEnter",
	"dragExit",
	"dragLeave",
	"dragOver",
	"dragStart",
	"drop",
	"durationChange",
	"emptied",
	"encrypted",
	"ended",
	"error",
	"gotPointerCapture",
	"input",
	"invalid",
	"keyDown",
	"keyPress",
	"keyUp",
	"load",
	"loadedData",
	"loadedMetadata",
	"loadStart",
	"lostPointerCapture",
	"mouseDown",
	"mouseMove",
	"mouseOut",
	"mouseOver",
	"mouseUp",
	"paste",
	"pause",
	"play",
	"playing",
	"pointerCancel",
	"pointerDown",
	"pointerMove",
	"pointerOut",
	"pointerOver",
	"pointerUp",
	"progress",
	"rateChange",
	"reset",
	"resize",
	"seeked",
	"seeking",
	"stalled",
	"submit",
	"suspend",
	"timeUpdate",
	"touchCancel",
	"touchEnd",
	"touchStart",
	"volumeChange",
	"scroll",
	"scrollEnd",
	"toggle",
	"touchMove",
	"waiting",
	"wheel",
];

const CHANGE_EVENT_DEPENDENCIES: &[&str] = &[
	"change",
	"click",
	"focusin",
	"focusout",
	"input",
	"keydown",
	"keyup",
	"selectionchange",
];

const MEDIA_EVENTS: &[&str] = &[
	"abort",
	"canplay",
	"canplaythrough",
	"durationchange",
	"emptied",
	"encrypted",
	"ended",
	"error",
	"loadeddata",
	"loadedmetadata",
	"loadstart",
	"pause",
	"play",
	"playing",
	"progress",
	"ratechange",
	"resize",
	"seeked",
	"seeking",
	"stalled",
	"suspend",
	"timeupdate",
	"volumechange",
	"waiting",
];

/// Native event names and the registration names they map to.
#[derive(Debug)]
pub struct EventRegistry {
	top_level_events_to_react_names: HashMap<String, String>,
	registration_name_dependencies: HashMap<String, Vec<String>>,
	all_native_events: HashSet<String>,
}

impl EventRegistry {
	fn new() -> Self {
		let mut registry = Self {
			top_level_events_to_react_names: HashMap::new(),
			registration_name_dependencies: HashMap::new(),
			all_native_events: HashSet::new(),
		};

		for event in SIMPLE_EVENTS {
			let mut chars = event.chars();
			let capitalized: String = chars.next().into_iter().flat_map(char::to_uppercase).chain(chars).collect();
			registry.register_simple_event(&event.to_lowercase(), &format!("on{}", capitalized));
		}
		registry.register_simple_event("dblclick", "onDoubleClick");
		registry.register_simple_event("focusin", "onFocus");
		registry.register_simple_event("focusout", "onBlur");

		registry.register_two_phase_event("onChange", CHANGE_EVENT_DEPENDENCIES);
		registry
	}

	fn register_simple_event(&mut self, native: &str, registration_name: &str) {
		self.top_level_events_to_react_names
			.insert(native.to_owned(), registration_name.to_owned());
		self.register_two_phase_event(registration_name, &[native]);
	}

	fn register_two_phase_event(&mut self, registration_name: &str, dependencies: &[&str]) {
		self.register_direct_event(registration_name, dependencies);
		self.register_direct_event(&format!("{}Capture", registration_name), dependencies);
	}

	fn register_direct_event(&mut self, registration_name: &str, dependencies: &[&str]) {
		self.registration_name_dependencies.insert(
			registration_name.to_owned(),
			dependencies.iter().map(|&d| d.to_owned()).collect(),
		);
		self.all_native_events.extend(dependencies.iter().map(|&d| d.to_owned()));
	}

	/// The bubble-phase registration name of a native event, like `onClick` for `click`.
	#[must_use]
	pub fn react_name(&self, native: &str) -> Option<&str> {
		self.top_level_events_to_react_names.get(native).map(String::as_str)
	}

	/// Whether a prop name refers to an event listener rather than a host property.
	#[must_use]
	pub fn is_registration_name(&self, name: &str) -> bool {
		self.registration_name_dependencies.contains_key(name)
	}

	#[must_use]
	pub fn dependencies(&self, registration_name: &str) -> Option<&[String]> {
		self.registration_name_dependencies.get(registration_name).map(Vec::as_slice)
	}

	/// Every native event some registration name depends on.
	pub fn all_native_events(&self) -> impl Iterator<Item = &str> {
		self.all_native_events.iter().map(String::as_str)
	}

	/// Events that don't bubble consistently and are therefore only observed in the capture phase at the root.
	#[must_use]
	pub fn is_non_delegated(native: &str) -> bool {
		matches!(native, "cancel" | "close" | "invalid" | "load" | "scroll" | "scrollend" | "toggle")
			|| MEDIA_EVENTS.contains(&native)
	}
}

/// The process-wide event registry.
pub fn registry() -> &'static EventRegistry {
	static REGISTRY: OnceLock<EventRegistry> = OnceLock::new();
	REGISTRY.get_or_init(EventRegistry::new)
}

/// Urgency of updates caused by a native event.
///
/// `scheduler_priority` only matters for `message` events, which inherit the priority of the running task.
#[must_use]
pub fn event_priority(native: &str, scheduler_priority: PriorityLevel) -> EventPriority {
	match native {
		"cancel" | "click" | "close" | "contextmenu" | "copy" | "cut" | "auxclick" | "dblclick" | "dragend"
		| "dragstart" | "drop" | "focusin" | "focusout" | "input" | "invalid" | "keydown" | "keypress" | "keyup"
		| "mousedown" | "mouseup" | "paste" | "pause" | "play" | "pointercancel" | "pointerdown" | "pointerup"
		| "ratechange" | "reset" | "resize" | "seeked" | "submit" | "touchcancel" | "touchend" | "touchstart"
		| "volumechange" | "change" | "selectionchange" | "textInput" | "compositionstart" | "compositionend"
		| "compositionupdate" | "beforeblur" | "afterblur" | "beforeinput" | "blur" | "fullscreenchange" | "focus"
		| "hashchange" | "popstate" | "select" | "selectstart" => EventPriority::Discrete,

		"drag" | "dragenter" | "dragexit" | "dragleave" | "dragover" | "mousemove" | "mouseout" | "mouseover"
		| "pointermove" | "pointerout" | "pointerover" | "scroll" | "toggle" | "touchmove" | "wheel" | "mouseenter"
		| "mouseleave" | "pointerenter" | "pointerleave" => EventPriority::Continuous,

		"message" => match scheduler_priority {
			PriorityLevel::Immediate => EventPriority::Discrete,
			PriorityLevel::UserBlocking => EventPriority::Continuous,
			PriorityLevel::Idle => EventPriority::Idle,
			PriorityLevel::Normal | PriorityLevel::Low | PriorityLevel::NoPriority => EventPriority::Default,
		},

		_ => EventPriority::Default,
	}
}

/// A listener together with the node it was found on.
#[derive(Debug, Clone)]
pub(crate) struct DispatchListener {
	pub fiber: FiberId,
	pub listener: Listener,
}

/// One synthetic event and the listeners it runs, in call order.
#[derive(Debug)]
pub(crate) struct DispatchEntry {
	pub event: SyntheticEvent,
	pub listeners: Vec<DispatchListener>,
}

fn is_interactive(tag: &str) -> bool {
	matches!(tag, "button" | "input" | "select" | "textarea")
}

fn should_prevent_mouse_event(registration_name: &str, tag: &str, props: &Props) -> bool {
	match registration_name {
		"onClick" | "onClickCapture" | "onDoubleClick" | "onDoubleClickCapture" | "onMouseDown"
		| "onMouseDownCapture" | "onMouseMove" | "onMouseMoveCapture" | "onMouseUp" | "onMouseUpCapture"
		| "onMouseEnter" => props.bool("disabled").unwrap_or(false) && is_interactive(tag),
		_ => false,
	}
}

/// The listener registered under `registration_name` in a host node's current props.
fn get_listener(props: &Props, tag: &str, registration_name: &str) -> Result<Option<Listener>, DispatchError> {
	if should_prevent_mouse_event(registration_name, tag, props) {
		return Ok(None);
	}
	match props.get(registration_name) {
		None => Ok(None),
		Some(PropValue::Listener(listener)) => Ok(Some(listener.clone())),
		Some(other) => Err(DispatchError::InvalidListener {
			registration_name: registration_name.to_owned(),
			found: other.type_name(),
		}),
	}
}

/// Host nodes from `target` up to the root, with their tag and committed props.
fn host_ancestors<'a, H: HostConfig>(
	fibers: &'a FiberStore<H::Instance>,
	host: &'a H,
	target: FiberId,
) -> impl Iterator<Item = (FiberId, &'a str, Rc<Props>)> + 'a {
	let mut next = Some(target);
	core::iter::from_fn(move || loop {
		let id = next?;
		let fiber = fibers.get(id)?;
		next = fiber.return_fiber;
		if let (WorkTag::HostComponent, StateNode::Host(instance), Some(ElementType::Host(tag))) =
			(fiber.tag, &fiber.state_node, &fiber.element_type)
		{
			if let Some(props) = host.current_props(instance) {
				return Some((id, tag.as_ref(), props));
			}
		}
	})
}

/// Collects the listeners of one phase, in the order they should run.
pub(crate) fn accumulate_single_phase_listeners<H: HostConfig>(
	fibers: &FiberStore<H::Instance>,
	host: &H,
	target: FiberId,
	react_name: &str,
	phase: EventPhase,
	accumulate_target_only: bool,
) -> Result<Vec<DispatchListener>, DispatchError> {
	let registration_name = match phase {
		EventPhase::Capture => format!("{}Capture", react_name),
		EventPhase::Bubble => react_name.to_owned(),
	};

	let mut listeners = Vec::new();
	for (fiber, tag, props) in host_ancestors(fibers, host, target) {
		if let Some(listener) = get_listener(&props, tag, &registration_name)? {
			listeners.push(DispatchListener { fiber, listener });
		}
		if accumulate_target_only {
			break;
		}
	}

	if phase == EventPhase::Capture {
		// Capture runs from the root down.
		listeners.reverse();
	}
	Ok(listeners)
}

/// Collects capture listeners (root first) followed by bubble listeners (target first).
pub(crate) fn accumulate_two_phase_listeners<H: HostConfig>(
	fibers: &FiberStore<H::Instance>,
	host: &H,
	target: FiberId,
	react_name: &str,
) -> Result<Vec<DispatchListener>, DispatchError> {
	let capture_name = format!("{}Capture", react_name);
	let mut captures = Vec::new();
	let mut bubbles = Vec::new();
	for (fiber, tag, props) in host_ancestors(fibers, host, target) {
		if let Some(listener) = get_listener(&props, tag, &capture_name)? {
			captures.push(DispatchListener { fiber, listener });
		}
		if let Some(listener) = get_listener(&props, tag, react_name)? {
			bubbles.push(DispatchListener { fiber, listener });
		}
	}
	captures.reverse();
	captures.extend(bubbles);
	Ok(captures)
}

fn is_text_input(tag: &str, props: &Props) -> bool {
	match tag {
		"textarea" => true,
		"input" => matches!(
			props.text("type"),
			None | Some(
				"color" | "date" | "datetime" | "datetime-local" | "email" | "month" | "number" | "password"
					| "range" | "search" | "tel" | "text" | "time" | "url" | "week"
			)
		),
		_ => false,
	}
}

/// Runs both plugins for one native event.
pub(crate) fn extract_events<H: HostConfig>(
	fibers: &FiberStore<H::Instance>,
	host: &H,
	native_type: &str,
	target: FiberId,
	phase: EventPhase,
	native: Option<&Rc<dyn Any>>,
) -> Result<Vec<DispatchEntry>, DispatchError> {
	let mut queue = Vec::new();

	if let Some(react_name) = registry().react_name(native_type) {
		let accumulate_target_only = phase == EventPhase::Bubble && matches!(native_type, "scroll" | "scrollend");
		let listeners =
			accumulate_single_phase_listeners(fibers, host, target, react_name, phase, accumulate_target_only)?;
		if !listeners.is_empty() {
			let mut event = SyntheticEvent::new(react_name, native_type, native.cloned());
			event.target = Some(target);
			queue.push(DispatchEntry { event, listeners });
		}
	}

	// The change plugin accumulates both phases at once, so it only runs for one of them.
	if phase == EventPhase::Bubble && matches!(native_type, "input" | "change") {
		let target_fiber = fibers.get(target);
		if let Some((StateNode::Host(instance), Some(ElementType::Host(tag)))) =
			target_fiber.map(|f| (&f.state_node, &f.element_type))
		{
			let props = host.current_props(instance);
			let is_text_input = props.as_deref().map_or(false, |props| is_text_input(tag, props));
			let value_changed = match (host.input_value(instance), props.as_deref().and_then(|p| p.text("value"))) {
				(Some(current), Some(rendered)) => current != rendered,
				_ => true,
			};
			if is_text_input && value_changed {
				let listeners = accumulate_two_phase_listeners(fibers, host, target, "onChange")?;
				if !listeners.is_empty() {
					let mut event = SyntheticEvent::new("onChange", "change", native.cloned());
					event.target = Some(target);
					queue.push(DispatchEntry { event, listeners });
				}
			} else {
				trace!(is_text_input, value_changed, "Not dispatching onChange.");
			}
		}
	}

	Ok(queue)
}

/// Runs every entry's listeners in order, honoring [`SyntheticEvent::stop_propagation`].
///
/// Listener failures don't stop other listeners. The first one is returned.
pub(crate) fn process_dispatch_queue(queue: Vec<DispatchEntry>) -> Result<Vec<SyntheticEvent>, DispatchError> {
	let mut first_error = None;
	let mut events = Vec::with_capacity(queue.len());

	for DispatchEntry { mut event, listeners } in queue {
		let mut previous_fiber = None;
		for DispatchListener { fiber, listener } in listeners {
			if event.propagation_stopped && previous_fiber != Some(fiber) {
				break;
			}
			event.current_target = Some(fiber);
			let result = panic::catch_unwind(AssertUnwindSafe(|| listener.call(&mut event))).unwrap_or_else(|payload| {
				Err(ListenerError::from(format!("listener panicked: {}", panic_message(&*payload))))
			});
			if let Err(error) = result {
				warn!("Event listener for {} failed: {}", event.registration_name, error);
				first_error.get_or_insert(error);
			}
			previous_fiber = Some(fiber);
		}
		event.current_target = None;
		events.push(event);
	}

	match first_error {
		Some(error) => Err(DispatchError::Listener(error)),
		None => Ok(events),
	}
}
