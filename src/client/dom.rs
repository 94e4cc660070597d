//! The DOM operations the client engine needs, and generic helpers over them.

use core::{fmt::Debug, hash::Hash};

/// Elements that never have children or a closing tag.
pub const VOID_ELEMENTS: &[&str] = &["area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr"];

/// Elements whose content is not markup.
pub const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Element,
	Text,
	/// Comments, processing instructions and the like. Ignored by the engine.
	Other,
}

/// A mutable document tree.
///
/// Handles are cheap to clone and compare equal iff they refer to the same node.
/// Mutations never fail: implementations log what they cannot do and carry on.
pub trait Dom {
	type Node: Clone + Eq + Hash + Debug;

	fn kind(&self, node: &Self::Node) -> NodeKind;
	/// Lowercase tag name, or an empty string for non-elements.
	fn tag(&self, node: &Self::Node) -> String;
	/// Character data of a text node.
	fn text(&self, node: &Self::Node) -> String;
	fn set_text(&mut self, node: &Self::Node, text: &str);

	fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
	fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

	/// All attributes in document order.
	fn attributes(&self, node: &Self::Node) -> Vec<(String, String)>;
	fn get_attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
	fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str);
	fn remove_attribute(&mut self, node: &Self::Node, name: &str);

	fn create_element(&mut self, tag: &str) -> Self::Node;
	fn create_text(&mut self, text: &str) -> Self::Node;
	/// Inserts (or moves) `child` before `reference`, or last if there is none.
	fn insert_before(&mut self, parent: &Self::Node, child: &Self::Node, reference: Option<&Self::Node>);
	fn remove_child(&mut self, parent: &Self::Node, child: &Self::Node);

	/// Parses markup into detached top-level nodes. Scripts in them are inert.
	fn parse_fragment(&mut self, html: &str) -> Vec<Self::Node>;

	/// Current value of a form control.
	fn value(&self, node: &Self::Node) -> String;
	fn set_value(&mut self, node: &Self::Node, value: &str);
	fn checked(&self, node: &Self::Node) -> bool;
	fn set_checked(&mut self, node: &Self::Node, checked: bool);

	fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) {
		self.insert_before(parent, child, None);
	}

	fn replace_child(&mut self, parent: &Self::Node, new: &Self::Node, old: &Self::Node) {
		self.insert_before(parent, new, Some(old));
		self.remove_child(parent, old);
	}
}

/// `root` and everything below it, in document order.
pub fn descendants<D: Dom>(dom: &D, root: &D::Node) -> Vec<D::Node> {
	let mut found = vec![];
	let mut stack = vec![root.clone()];
	while let Some(node) = stack.pop() {
		stack.extend(dom.children(&node).into_iter().rev());
		found.push(node);
	}
	found
}

/// Like [`descendants`], but doesn't enter (or yield) elements for which `stop` holds, except `root`.
pub fn descendants_until<D: Dom>(dom: &D, root: &D::Node, stop: impl Fn(&D, &D::Node) -> bool) -> Vec<D::Node> {
	let mut found = vec![];
	let mut stack = vec![root.clone()];
	while let Some(node) = stack.pop() {
		if &node != root && stop(dom, &node) {
			continue;
		}
		stack.extend(dom.children(&node).into_iter().rev());
		found.push(node);
	}
	found
}

/// The first element at or below `root` with `name="value"`.
pub fn find_by_attribute<D: Dom>(dom: &D, root: &D::Node, name: &str, value: &str) -> Option<D::Node> {
	descendants(dom, root).into_iter().find(|node| dom.get_attribute(node, name).as_deref() == Some(value))
}

/// Whether `node` is `ancestor` or below it.
pub fn is_within<D: Dom>(dom: &D, node: &D::Node, ancestor: &D::Node) -> bool {
	let mut current = Some(node.clone());
	while let Some(node) = current {
		if &node == ancestor {
			return true;
		}
		current = dom.parent(&node);
	}
	false
}

/// Deep structural equality: same kind, tag, attribute set, text and children.
pub fn structurally_equal<D: Dom>(dom: &D, a: &D::Node, b: &D::Node) -> bool {
	match (dom.kind(a), dom.kind(b)) {
		(NodeKind::Text, NodeKind::Text) => dom.text(a) == dom.text(b),
		(NodeKind::Element, NodeKind::Element) => {
			if dom.tag(a) != dom.tag(b) {
				return false;
			}
			let (mut attributes_a, mut attributes_b) = (dom.attributes(a), dom.attributes(b));
			attributes_a.sort();
			attributes_b.sort();
			if attributes_a != attributes_b {
				return false;
			}
			let (children_a, children_b) = (dom.children(a), dom.children(b));
			children_a.len() == children_b.len() && children_a.iter().zip(&children_b).all(|(a, b)| structurally_equal(dom, a, b))
		}
		(NodeKind::Other, NodeKind::Other) => true,
		_ => false,
	}
}

/// Serializes `node` the way it would appear in markup.
pub fn outer_html<D: Dom>(dom: &D, node: &D::Node) -> String {
	let mut html = String::new();
	write_node(dom, node, false, &mut html);
	html
}

/// Serializes the children of `node`.
pub fn inner_html<D: Dom>(dom: &D, node: &D::Node) -> String {
	let raw = RAW_TEXT_ELEMENTS.contains(&dom.tag(node).as_str());
	let mut html = String::new();
	for child in dom.children(node) {
		write_node(dom, &child, raw, &mut html);
	}
	html
}

fn write_node<D: Dom>(dom: &D, node: &D::Node, raw: bool, html: &mut String) {
	match dom.kind(node) {
		NodeKind::Text if raw => html.push_str(&dom.text(node)),
		NodeKind::Text => html.push_str(&escape(&dom.text(node), false)),
		NodeKind::Other => (),
		NodeKind::Element => {
			let tag = dom.tag(node);
			html.push('<');
			html.push_str(&tag);
			for (name, value) in dom.attributes(node) {
				html.push(' ');
				html.push_str(&name);
				if !value.is_empty() {
					html.push_str("=\"");
					html.push_str(&escape(&value, true));
					html.push('"');
				}
			}
			html.push('>');
			if VOID_ELEMENTS.contains(&tag.as_str()) {
				return;
			}
			html.push_str(&inner_html(dom, node));
			html.push_str("</");
			html.push_str(&tag);
			html.push('>');
		}
	}
}

fn escape(text: &str, attribute: bool) -> String {
	let mut escaped = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'"' if attribute => escaped.push_str("&quot;"),
			'<' if !attribute => escaped.push_str("&lt;"),
			'>' if !attribute => escaped.push_str("&gt;"),
			c => escaped.push(c),
		}
	}
	escaped
}
