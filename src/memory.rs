//! A host tree that lives in memory and logs every mutation it receives.
//!
//! Used to run the reconciler natively, and to assert on exactly which host operations a commit performed.

use crate::{
	element::{Node, PropValue, Props},
	fiber::FiberId,
	host::HostConfig,
};
use core::fmt::Write;
use slotmap::SlotMap;
use std::rc::Rc;
use tracing::warn;

slotmap::new_key_type! {
	/// Identifies a node of a [`MemoryHost`].
	pub struct HostNodeId;
}

#[derive(Debug, Clone)]
enum HostNodeKind {
	Element { tag: String, properties: Vec<(String, PropValue)> },
	Text(String),
}

#[derive(Debug)]
struct HostNode {
	kind: HostNodeKind,
	parent: Option<HostNodeId>,
	children: Vec<HostNodeId>,
	fiber: Option<FiberId>,
	props: Option<Rc<Props>>,
}

/// One host operation, as recorded by [`MemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
	CreateElement { node: HostNodeId, tag: String },
	CreateText { node: HostNodeId, text: String },
	SetProperty { node: HostNodeId, name: String, value: String },
	RemoveProperty { node: HostNodeId, name: String },
	SetTextContent { node: HostNodeId, text: String },
	CommitTextUpdate { node: HostNodeId, text: String },
	AppendChild { parent: HostNodeId, child: HostNodeId },
	InsertBefore { parent: HostNodeId, child: HostNodeId, before: HostNodeId },
	RemoveChild { parent: HostNodeId, child: HostNodeId },
}

impl Mutation {
	/// Whether this changes which nodes are attached where.
	#[must_use]
	pub fn is_structural(&self) -> bool {
		matches!(self, Self::AppendChild { .. } | Self::InsertBefore { .. } | Self::RemoveChild { .. })
	}
}

/// An in-memory [`HostConfig`].
#[derive(Debug, Default)]
pub struct MemoryHost {
	nodes: SlotMap<HostNodeId, HostNode>,
	log: Vec<Mutation>,
	/// Simulated user input, as returned by [`HostConfig::input_value`].
	input_values: Vec<(HostNodeId, String)>,
}

fn display_value(value: &PropValue) -> String {
	match value {
		PropValue::Text(text) => text.to_string(),
		PropValue::Number(number) => match Node::from(*number) {
			Node::Text(text) => text.to_string(),
			_ => String::new(),
		},
		PropValue::Bool(bool) => bool.to_string(),
		other => format!("{:?}", other),
	}
}

fn escape(text: &str, out: &mut String) {
	for c in text.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			c => out.push(c),
		}
	}
}

impl MemoryHost {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	fn insert(&mut self, kind: HostNodeKind) -> HostNodeId {
		self.nodes.insert(HostNode {
			kind,
			parent: None,
			children: Vec::new(),
			fiber: None,
			props: None,
		})
	}

	/// Creates a detached element to render into. This isn't logged.
	pub fn create_container(&mut self, tag: &str) -> HostNodeId {
		self.insert(HostNodeKind::Element {
			tag: tag.to_owned(),
			properties: Vec::new(),
		})
	}

	/// Takes the mutations recorded so far.
	pub fn take_log(&mut self) -> Vec<Mutation> {
		core::mem::take(&mut self.log)
	}

	#[must_use]
	pub fn log(&self) -> &[Mutation] {
		&self.log
	}

	#[must_use]
	pub fn contains(&self, node: HostNodeId) -> bool {
		self.nodes.contains_key(node)
	}

	#[must_use]
	pub fn children(&self, node: HostNodeId) -> &[HostNodeId] {
		self.nodes.get(node).map_or(&[][..], |node| node.children.as_slice())
	}

	#[must_use]
	pub fn parent(&self, node: HostNodeId) -> Option<HostNodeId> {
		self.nodes.get(node)?.parent
	}

	#[must_use]
	pub fn tag(&self, node: HostNodeId) -> Option<&str> {
		match &self.nodes.get(node)?.kind {
			HostNodeKind::Element { tag, .. } => Some(tag),
			HostNodeKind::Text(_) => None,
		}
	}

	/// The text of a text node.
	#[must_use]
	pub fn text(&self, node: HostNodeId) -> Option<&str> {
		match &self.nodes.get(node)?.kind {
			HostNodeKind::Text(text) => Some(text),
			HostNodeKind::Element { .. } => None,
		}
	}

	#[must_use]
	pub fn property(&self, node: HostNodeId, name: &str) -> Option<&PropValue> {
		match &self.nodes.get(node)?.kind {
			HostNodeKind::Element { properties, .. } => properties.iter().find(|(n, _)| n == name).map(|(_, v)| v),
			HostNodeKind::Text(_) => None,
		}
	}

	/// Depth-first search for the first element with `tag` below (and including) `root`.
	#[must_use]
	pub fn find(&self, root: HostNodeId, tag: &str) -> Option<HostNodeId> {
		if self.tag(root) == Some(tag) {
			return Some(root);
		}
		self.children(root).iter().find_map(|&child| self.find(child, tag))
	}

	/// Simulates the user typing `value` into a form control.
	pub fn set_input_value(&mut self, node: HostNodeId, value: impl Into<String>) {
		let value = value.into();
		match self.input_values.iter_mut().find(|(n, _)| *n == node) {
			Some((_, existing)) => *existing = value,
			None => self.input_values.push((node, value)),
		}
	}

	/// Serializes the children of `node` as HTML.
	#[must_use]
	pub fn inner_html(&self, node: HostNodeId) -> String {
		let mut html = String::new();
		for &child in self.children(node) {
			self.write_html(child, &mut html);
		}
		html
	}

	/// Serializes `node` itself as HTML.
	#[must_use]
	pub fn to_html(&self, node: HostNodeId) -> String {
		let mut html = String::new();
		self.write_html(node, &mut html);
		html
	}

	fn write_html(&self, id: HostNodeId, html: &mut String) {
		let node = match self.nodes.get(id) {
			Some(node) => node,
			None => return,
		};
		match &node.kind {
			HostNodeKind::Text(text) => escape(text, html),
			HostNodeKind::Element { tag, properties } => {
				html.push('<');
				html.push_str(tag);
				for (name, value) in properties {
					match value {
						PropValue::Bool(false) | PropValue::Listener(_) | PropValue::Render(_) | PropValue::Any(_) => (),
						PropValue::Bool(true) => {
							let _ = write!(html, " {}", name);
						}
						value => {
							let _ = write!(html, " {}=\"", name);
							escape(&display_value(value), html);
							html.push('"');
						}
					}
				}
				html.push('>');
				for &child in &node.children {
					self.write_html(child, html);
				}
				let _ = write!(html, "</{}>", tag);
			}
		}
	}

	fn detach(&mut self, child: HostNodeId) {
		if let Some(parent) = self.nodes.get_mut(child).and_then(|node| node.parent.take()) {
			if let Some(parent) = self.nodes.get_mut(parent) {
				parent.children.retain(|&c| c != child);
			}
		}
	}

	fn attach(&mut self, parent: HostNodeId, child: HostNodeId, index: usize) {
		self.detach(child);
		match self.nodes.get_mut(parent) {
			Some(node) => {
				let index = index.min(node.children.len());
				node.children.insert(index, child);
			}
			None => return warn!("Attaching to an unknown node."),
		}
		if let Some(node) = self.nodes.get_mut(child) {
			node.parent = Some(parent);
		}
	}
}

impl HostConfig for MemoryHost {
	type Instance = HostNodeId;

	fn create_element(&mut self, tag: &str) -> HostNodeId {
		let node = self.create_container(tag);
		self.log.push(Mutation::CreateElement { node, tag: tag.to_owned() });
		node
	}

	fn create_text(&mut self, text: &str) -> HostNodeId {
		let node = self.insert(HostNodeKind::Text(text.to_owned()));
		self.log.push(Mutation::CreateText { node, text: text.to_owned() });
		node
	}

	fn set_property(&mut self, instance: &HostNodeId, name: &str, value: &PropValue) {
		if let Some(HostNode {
			kind: HostNodeKind::Element { properties, .. },
			..
		}) = self.nodes.get_mut(*instance)
		{
			match properties.iter_mut().find(|(n, _)| n == name) {
				Some((_, existing)) => *existing = value.clone(),
				None => properties.push((name.to_owned(), value.clone())),
			}
		}
		self.log.push(Mutation::SetProperty {
			node: *instance,
			name: name.to_owned(),
			value: display_value(value),
		});
	}

	fn remove_property(&mut self, instance: &HostNodeId, name: &str) {
		if let Some(HostNode {
			kind: HostNodeKind::Element { properties, .. },
			..
		}) = self.nodes.get_mut(*instance)
		{
			properties.retain(|(n, _)| n != name);
		}
		self.log.push(Mutation::RemoveProperty {
			node: *instance,
			name: name.to_owned(),
		});
	}

	fn set_text_content(&mut self, instance: &HostNodeId, text: &str) {
		let children = self.children(*instance).to_vec();
		for child in children {
			self.detach(child);
		}
		if !text.is_empty() {
			let text_node = self.insert(HostNodeKind::Text(text.to_owned()));
			self.attach(*instance, text_node, 0);
		}
		self.log.push(Mutation::SetTextContent {
			node: *instance,
			text: text.to_owned(),
		});
	}

	fn commit_text_update(&mut self, text_instance: &HostNodeId, text: &str) {
		if let Some(HostNode {
			kind: HostNodeKind::Text(existing),
			..
		}) = self.nodes.get_mut(*text_instance)
		{
			*existing = text.to_owned();
		}
		self.log.push(Mutation::CommitTextUpdate {
			node: *text_instance,
			text: text.to_owned(),
		});
	}

	fn append_child(&mut self, parent: &HostNodeId, child: &HostNodeId) {
		self.attach(*parent, *child, usize::MAX);
		self.log.push(Mutation::AppendChild {
			parent: *parent,
			child: *child,
		});
	}

	fn insert_before(&mut self, parent: &HostNodeId, child: &HostNodeId, before: &HostNodeId) {
		self.detach(*child);
		match self.children(*parent).iter().position(|c| c == before) {
			Some(index) => self.attach(*parent, *child, index),
			None => {
				warn!("Reference node of insert_before is not a child of the parent. Appending.");
				self.attach(*parent, *child, usize::MAX);
			}
		}
		self.log.push(Mutation::InsertBefore {
			parent: *parent,
			child: *child,
			before: *before,
		});
	}

	fn remove_child(&mut self, parent: &HostNodeId, child: &HostNodeId) {
		if self.parent(*child) == Some(*parent) {
			self.detach(*child);
		} else {
			warn!("Removing a node from a parent it isn't attached to.");
		}
		self.log.push(Mutation::RemoveChild {
			parent: *parent,
			child: *child,
		});
	}

	fn precache_fiber(&mut self, instance: &HostNodeId, fiber: FiberId) {
		if let Some(node) = self.nodes.get_mut(*instance) {
			node.fiber = Some(fiber);
		}
	}

	fn update_props(&mut self, instance: &HostNodeId, props: Rc<Props>) {
		if let Some(node) = self.nodes.get_mut(*instance) {
			node.props = Some(props);
		}
	}

	fn closest_fiber(&self, instance: &HostNodeId) -> Option<FiberId> {
		let mut next = Some(*instance);
		while let Some(id) = next {
			let node = self.nodes.get(id)?;
			if node.fiber.is_some() {
				return node.fiber;
			}
			next = node.parent;
		}
		None
	}

	fn current_props(&self, instance: &HostNodeId) -> Option<Rc<Props>> {
		self.nodes.get(*instance)?.props.clone()
	}

	fn detach_instance(&mut self, instance: &HostNodeId) {
		if let Some(node) = self.nodes.get_mut(*instance) {
			node.fiber = None;
			node.props = None;
		}
		self.input_values.retain(|(n, _)| n != instance);
	}

	fn input_value(&self, instance: &HostNodeId) -> Option<String> {
		self.input_values.iter().find(|(n, _)| n == instance).map(|(_, v)| v.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::{MemoryHost, Mutation};
	use crate::host::HostConfig;

	#[test]
	fn insert_before_moves_existing_children() {
		let mut host = MemoryHost::new();
		let root = host.create_container("ul");
		let a = host.create_element("li");
		let b = host.create_element("li");
		host.append_child(&root, &a);
		host.append_child(&root, &b);
		host.insert_before(&root, &b, &a);
		assert_eq!(host.children(root), [b, a]);
		assert_eq!(host.log().iter().filter(|m| m.is_structural()).count(), 3);
	}

	#[test]
	fn text_content_replaces_children() {
		let mut host = MemoryHost::new();
		let root = host.create_container("p");
		let b = host.create_element("b");
		host.append_child(&root, &b);
		host.set_text_content(&root, "hi & bye");
		assert_eq!(host.to_html(root), "<p>hi &amp; bye</p>");
		assert_eq!(host.parent(b), None);

		host.set_text_content(&root, "");
		assert_eq!(host.to_html(root), "<p></p>");
		assert!(matches!(host.take_log().last(), Some(Mutation::SetTextContent { text, .. }) if text.is_empty()));
	}

	#[test]
	fn properties_serialize() {
		let mut host = MemoryHost::new();
		let input = host.create_element("input");
		host.set_property(&input, "type", &"text".into());
		host.set_property(&input, "disabled", &true.into());
		host.set_property(&input, "hidden", &false.into());
		host.set_property(&input, "size", &3.0.into());
		assert_eq!(host.to_html(input), r#"<input type="text" disabled size="3"></input>"#);
		host.remove_property(&input, "type");
		assert!(host.property(input, "type").is_none());
	}
}
