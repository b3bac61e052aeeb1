//! The rendering target.
//!
//! The reconciler never touches host nodes directly. It creates and mutates them only through [`HostConfig`],
//! and only during the commit pass (plus creating detached nodes while completing new work).

use crate::{
	element::{PropValue, Props},
	events::registry,
	fiber::FiberId,
};
use core::fmt::Debug;
use std::rc::Rc;

pub trait HostConfig: 'static {
	/// A handle to a host node. Cloning must not copy the node itself.
	type Instance: Clone + Debug + 'static;

	fn create_element(&mut self, tag: &str) -> Self::Instance;
	fn create_text(&mut self, text: &str) -> Self::Instance;

	fn set_property(&mut self, instance: &Self::Instance, name: &str, value: &PropValue);
	fn remove_property(&mut self, instance: &Self::Instance, name: &str);

	/// Replaces all content of an element with a single text. An empty string clears the element.
	fn set_text_content(&mut self, instance: &Self::Instance, text: &str);
	/// Changes the text of a text node.
	fn commit_text_update(&mut self, text_instance: &Self::Instance, text: &str);

	/// Appends `child`, moving it if it's already attached somewhere.
	fn append_child(&mut self, parent: &Self::Instance, child: &Self::Instance);
	/// Inserts `child` before `before`, which must be a child of `parent`. Moves `child` if it's already attached.
	fn insert_before(&mut self, parent: &Self::Instance, child: &Self::Instance, before: &Self::Instance);
	fn remove_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

	/// Records which node `instance` was committed for. Event dispatch starts from there.
	fn precache_fiber(&mut self, instance: &Self::Instance, fiber: FiberId);
	/// Records the committed props of `instance`. Listener lookup reads these.
	fn update_props(&mut self, instance: &Self::Instance, props: Rc<Props>);
	fn closest_fiber(&self, instance: &Self::Instance) -> Option<FiberId>;
	fn current_props(&self, instance: &Self::Instance) -> Option<Rc<Props>>;

	/// Drops the bookkeeping of a removed node.
	fn detach_instance(&mut self, _instance: &Self::Instance) {}

	/// Current value of a form control, if the host can tell. Used to suppress redundant `onChange` events.
	fn input_value(&self, _instance: &Self::Instance) -> Option<String> {
		None
	}
}

/// One property change computed while completing an update.
#[derive(Debug, Clone)]
pub enum PropUpdate {
	Set(Rc<str>, PropValue),
	Remove(Rc<str>),
	TextContent(Rc<str>),
}

/// Props that are not plain host properties.
fn is_reserved(name: &str) -> bool {
	matches!(name, "children" | "key") || registry().is_registration_name(name)
}

/// Whether `children` is rendered as the element's text content instead of child nodes.
pub(crate) fn should_set_text_content(tag: &str, props: &Props) -> bool {
	matches!(tag, "textarea" | "noscript") || props.children().as_text().is_some()
}

pub(crate) fn set_initial_properties<H: HostConfig>(host: &mut H, instance: &H::Instance, props: &Props) {
	for (name, value) in props.attributes() {
		if !is_reserved(name) {
			host.set_property(instance, name, value);
		}
	}
	if let Some(text) = props.children().as_text() {
		host.set_text_content(instance, text);
	}
}

/// Changes needed to go from `previous` to `next`.
pub(crate) fn diff_properties(previous: &Props, next: &Props) -> Vec<PropUpdate> {
	let mut updates = Vec::new();

	for (name, _) in previous.attributes() {
		if !is_reserved(name) && next.get(name).is_none() {
			updates.push(PropUpdate::Remove(name.into()));
		}
	}
	for (name, value) in next.attributes() {
		if is_reserved(name) {
			continue;
		}
		match previous.get(name) {
			Some(previous) if previous.is_same(value) => (),
			_ => updates.push(PropUpdate::Set(name.into(), value.clone())),
		}
	}

	if let Some(text) = next.children().as_text() {
		if previous.children().as_text() != Some(text) {
			updates.push(PropUpdate::TextContent(text.clone()));
		}
	}

	updates
}

pub(crate) fn commit_update<H: HostConfig>(host: &mut H, instance: &H::Instance, updates: &[PropUpdate]) {
	for update in updates {
		match update {
			PropUpdate::Set(name, value) => host.set_property(instance, name, value),
			PropUpdate::Remove(name) => host.remove_property(instance, name),
			PropUpdate::TextContent(text) => host.set_text_content(instance, text),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::{diff_properties, should_set_text_content, PropUpdate};
	use crate::{element::h, events::Listener};

	#[test]
	fn diff_skips_listeners_and_unchanged_values() {
		let listener = Listener::infallible(|_| ());
		let previous = h("div").attr("id", "a").attr("title", "t").on("onClick", listener.clone()).child("hello");
		let next = h("div").attr("id", "b").on("onClick", Listener::infallible(|_| ())).child("world");

		let updates = diff_properties(previous.props(), next.props());
		let summary: Vec<_> = updates
			.iter()
			.map(|u| match u {
				PropUpdate::Set(name, _) => format!("set {}", name),
				PropUpdate::Remove(name) => format!("remove {}", name),
				PropUpdate::TextContent(text) => format!("text {}", text),
			})
			.collect();
		assert_eq!(summary, ["remove title", "set id", "text world"]);
	}

	#[test]
	fn text_content_fast_path() {
		assert!(should_set_text_content("p", h("p").child("x").props()));
		assert!(should_set_text_content("textarea", h("textarea").props()));
		assert!(!should_set_text_content("p", h("p").child(h("b")).props()));
	}
}
