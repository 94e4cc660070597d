//! An in-memory [`Dom`] with a small, tolerant HTML parser.
//!
//! Used natively wherever no browser is available. Nodes are never freed, so handles stay unique.

use super::dom::{Dom, NodeKind, RAW_TEXT_ELEMENTS, VOID_ELEMENTS};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum Content {
	Element {
		tag: String,
		attributes: Vec<(String, String)>,
		value: Option<String>,
		checked: Option<bool>,
	},
	Text(String),
}

#[derive(Debug, Clone)]
struct NodeData {
	content: Content,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MemoryDom {
	nodes: Vec<NodeData>,
	body: NodeId,
}

impl Default for MemoryDom {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryDom {
	/// An empty document consisting of a `<body>`.
	#[must_use]
	pub fn new() -> Self {
		let mut dom = Self { nodes: vec![], body: NodeId(0) };
		dom.body = dom.alloc(Content::Element {
			tag: "body".to_owned(),
			attributes: vec![],
			value: None,
			checked: None,
		});
		dom
	}

	/// A document whose `<body>` contains `html`.
	#[must_use]
	pub fn parse(html: &str) -> Self {
		let mut dom = Self::new();
		let body = dom.body;
		for node in dom.parse_fragment(html) {
			dom.append_child(&body, &node);
		}
		dom
	}

	#[must_use]
	pub fn body(&self) -> NodeId {
		self.body
	}

	fn alloc(&mut self, content: Content) -> NodeId {
		self.nodes.push(NodeData {
			content,
			parent: None,
			children: vec![],
		});
		NodeId(self.nodes.len() - 1)
	}

	fn data(&self, node: NodeId) -> &NodeData {
		&self.nodes[node.0]
	}

	fn data_mut(&mut self, node: NodeId) -> &mut NodeData {
		&mut self.nodes[node.0]
	}

	fn attributes_mut(&mut self, node: NodeId) -> Option<&mut Vec<(String, String)>> {
		match &mut self.data_mut(node).content {
			Content::Element { attributes, .. } => Some(attributes),
			Content::Text(_) => None,
		}
	}

	fn detach(&mut self, node: NodeId) {
		if let Some(parent) = self.data_mut(node).parent.take() {
			self.data_mut(parent).children.retain(|&child| child != node);
		}
	}

	fn parse_nodes(&mut self, html: &str) -> Vec<NodeId> {
		let mut roots = vec![];
		let mut open: Vec<NodeId> = vec![];
		let mut rest = html;

		while !rest.is_empty() {
			if let Some(after) = rest.strip_prefix("<!--") {
				rest = after.find("-->").map_or("", |end| &after[end + 3..]);
			} else if let Some(after) = rest.strip_prefix("</") {
				let end = after.find('>').unwrap_or(after.len());
				let tag = after[..end].trim().to_ascii_lowercase();
				rest = after.get(end + 1..).unwrap_or("");
				match open.iter().rposition(|&node| self.tag(&node) == tag) {
					Some(position) => open.truncate(position),
					None => warn!(tag = %tag, "Ignoring unmatched closing tag."),
				}
			} else if let Some(after) = rest.strip_prefix("<!") {
				rest = after.find('>').map_or("", |end| &after[end + 1..]);
			} else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
				let (tag, attributes, self_closing, after) = parse_tag(&rest[1..]);
				rest = after;
				let node = self.alloc(Content::Element {
					tag: tag.clone(),
					attributes,
					value: None,
					checked: None,
				});
				self.attach(node, open.last().copied(), &mut roots);

				if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) {
					let close = format!("</{}", tag);
					let end = rest.to_ascii_lowercase().find(&close).unwrap_or(rest.len());
					if end > 0 {
						let text = self.alloc(Content::Text(rest[..end].to_owned()));
						self.attach(text, Some(node), &mut roots);
					}
					rest = &rest[end..];
					rest = rest.find('>').map_or("", |end| &rest[end + 1..]);
				} else if !self_closing && !VOID_ELEMENTS.contains(&tag.as_str()) {
					open.push(node);
				}
			} else {
				let first = rest.chars().next().map_or(1, char::len_utf8);
				let end = rest[first..].find('<').map_or(rest.len(), |end| end + first);
				let text = self.alloc(Content::Text(decode_entities(&rest[..end])));
				self.attach(text, open.last().copied(), &mut roots);
				rest = &rest[end..];
			}
		}
		roots
	}

	fn attach(&mut self, node: NodeId, parent: Option<NodeId>, roots: &mut Vec<NodeId>) {
		match parent {
			Some(parent) => {
				self.data_mut(node).parent = Some(parent);
				self.data_mut(parent).children.push(node);
			}
			None => roots.push(node),
		}
	}
}

impl Dom for MemoryDom {
	type Node = NodeId;

	fn kind(&self, node: &NodeId) -> NodeKind {
		match self.data(*node).content {
			Content::Element { .. } => NodeKind::Element,
			Content::Text(_) => NodeKind::Text,
		}
	}

	fn tag(&self, node: &NodeId) -> String {
		match &self.data(*node).content {
			Content::Element { tag, .. } => tag.clone(),
			Content::Text(_) => String::new(),
		}
	}

	fn text(&self, node: &NodeId) -> String {
		match &self.data(*node).content {
			Content::Text(text) => text.clone(),
			Content::Element { .. } => String::new(),
		}
	}

	fn set_text(&mut self, node: &NodeId, text: &str) {
		match &mut self.data_mut(*node).content {
			Content::Text(data) => text.clone_into(data),
			Content::Element { .. } => error!(?node, "Tried to set text data of an element."),
		}
	}

	fn parent(&self, node: &NodeId) -> Option<NodeId> {
		self.data(*node).parent
	}

	fn children(&self, node: &NodeId) -> Vec<NodeId> {
		self.data(*node).children.clone()
	}

	fn attributes(&self, node: &NodeId) -> Vec<(String, String)> {
		match &self.data(*node).content {
			Content::Element { attributes, .. } => attributes.clone(),
			Content::Text(_) => vec![],
		}
	}

	fn get_attribute(&self, node: &NodeId, name: &str) -> Option<String> {
		match &self.data(*node).content {
			Content::Element { attributes, .. } => attributes.iter().find(|(n, _)| n == name).map(|(_, value)| value.clone()),
			Content::Text(_) => None,
		}
	}

	fn set_attribute(&mut self, node: &NodeId, name: &str, value: &str) {
		match self.attributes_mut(*node) {
			Some(attributes) => match attributes.iter_mut().find(|(n, _)| n == name) {
				Some((_, existing)) => value.clone_into(existing),
				None => attributes.push((name.to_owned(), value.to_owned())),
			},
			None => error!(?node, name, "Tried to set an attribute on a text node."),
		}
	}

	fn remove_attribute(&mut self, node: &NodeId, name: &str) {
		if let Some(attributes) = self.attributes_mut(*node) {
			attributes.retain(|(n, _)| n != name);
		}
	}

	fn create_element(&mut self, tag: &str) -> NodeId {
		self.alloc(Content::Element {
			tag: tag.to_ascii_lowercase(),
			attributes: vec![],
			value: None,
			checked: None,
		})
	}

	fn create_text(&mut self, text: &str) -> NodeId {
		self.alloc(Content::Text(text.to_owned()))
	}

	fn insert_before(&mut self, parent: &NodeId, child: &NodeId, reference: Option<&NodeId>) {
		if parent == child {
			return error!(?parent, "Tried to insert a node into itself.");
		}
		if reference == Some(child) {
			return;
		}
		self.detach(*child);
		let position = match reference {
			Some(reference) => match self.data(*parent).children.iter().position(|node| node == reference) {
				Some(position) => position,
				None => {
					error!(?parent, ?reference, "Reference node is not a child of the parent. Appending instead.");
					self.data(*parent).children.len()
				}
			},
			None => self.data(*parent).children.len(),
		};
		self.data_mut(*parent).children.insert(position, *child);
		self.data_mut(*child).parent = Some(*parent);
	}

	fn remove_child(&mut self, parent: &NodeId, child: &NodeId) {
		if self.data(*child).parent == Some(*parent) {
			self.detach(*child);
		} else {
			error!(?parent, ?child, "Tried to remove a node that is not a child of the parent.");
		}
	}

	fn parse_fragment(&mut self, html: &str) -> Vec<NodeId> {
		self.parse_nodes(html)
	}

	fn value(&self, node: &NodeId) -> String {
		match &self.data(*node).content {
			Content::Element { value: Some(value), .. } => value.clone(),
			Content::Element { tag, .. } if tag == "textarea" => self.children(node).iter().map(|child| self.text(child)).collect(),
			Content::Element { .. } => self.get_attribute(node, "value").unwrap_or_default(),
			Content::Text(_) => String::new(),
		}
	}

	fn set_value(&mut self, node: &NodeId, new: &str) {
		match &mut self.data_mut(*node).content {
			Content::Element { value, .. } => *value = Some(new.to_owned()),
			Content::Text(_) => error!(?node, "Tried to set the value of a text node."),
		}
	}

	fn checked(&self, node: &NodeId) -> bool {
		match &self.data(*node).content {
			Content::Element { checked: Some(checked), .. } => *checked,
			Content::Element { attributes, .. } => attributes.iter().any(|(name, _)| name == "checked"),
			Content::Text(_) => false,
		}
	}

	fn set_checked(&mut self, node: &NodeId, new: bool) {
		match &mut self.data_mut(*node).content {
			Content::Element { checked, .. } => *checked = Some(new),
			Content::Text(_) => error!(?node, "Tried to check a text node."),
		}
	}
}

/// Splits `name attr="value"…>` after the `<`. Returns the rest after the tag.
fn parse_tag(source: &str) -> (String, Vec<(String, String)>, bool, &str) {
	let name_end = source.find(|c: char| c.is_whitespace() || c == '>' || c == '/').unwrap_or(source.len());
	let tag = source[..name_end].to_ascii_lowercase();
	let mut attributes: Vec<(String, String)> = vec![];
	let mut rest = &source[name_end..];

	loop {
		rest = rest.trim_start();
		if let Some(after) = rest.strip_prefix("/>") {
			return (tag, attributes, true, after);
		}
		if let Some(after) = rest.strip_prefix('>') {
			return (tag, attributes, false, after);
		}
		if rest.is_empty() {
			return (tag, attributes, false, rest);
		}

		let name_end = rest.find(|c: char| c.is_whitespace() || matches!(c, '=' | '>' | '/')).unwrap_or(rest.len());
		if name_end == 0 {
			rest = &rest[rest.chars().next().map_or(0, char::len_utf8)..];
			continue;
		}
		let name = rest[..name_end].to_ascii_lowercase();
		rest = rest[name_end..].trim_start();

		let value = match rest.strip_prefix('=').map(str::trim_start) {
			Some(after) => match after.chars().next() {
				Some(quote @ ('"' | '\'')) => {
					let body = &after[1..];
					let end = body.find(quote).unwrap_or(body.len());
					rest = body.get(end + 1..).unwrap_or("");
					decode_entities(&body[..end])
				}
				_ => {
					let end = after.find(|c: char| c.is_whitespace() || c == '>').unwrap_or(after.len());
					rest = &after[end..];
					decode_entities(&after[..end])
				}
			},
			None => String::new(),
		};

		if attributes.iter().all(|(existing, _)| *existing != name) {
			attributes.push((name, value));
		}
	}
}

fn decode_entities(text: &str) -> String {
	let mut decoded = String::with_capacity(text.len());
	let mut rest = text;
	while let Some(start) = rest.find('&') {
		decoded.push_str(&rest[..start]);
		rest = &rest[start..];
		let entity = rest[1..].find(';').filter(|&end| end <= 10).map(|end| &rest[1..=end]);
		let character = entity.and_then(|entity| match entity {
			"amp" => Some('&'),
			"lt" => Some('<'),
			"gt" => Some('>'),
			"quot" => Some('"'),
			"apos" => Some('\''),
			"nbsp" => Some('\u{A0}'),
			numeric => numeric
				.strip_prefix("#x")
				.or_else(|| numeric.strip_prefix("#X"))
				.map(|hex| u32::from_str_radix(hex, 16))
				.or_else(|| numeric.strip_prefix('#').map(str::parse::<u32>))
				.and_then(Result::ok)
				.and_then(char::from_u32),
		});
		match (entity, character) {
			(Some(entity), Some(character)) => {
				decoded.push(character);
				rest = &rest[entity.len() + 2..];
			}
			_ => {
				decoded.push('&');
				rest = &rest[1..];
			}
		}
	}
	decoded.push_str(rest);
	decoded
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::dom::{inner_html, outer_html};
	use rstest::rstest;

	#[rstest]
	#[case("<p>Hello <b>world</b></p>")]
	#[case(r#"<div live:id="abc" live:click.prevent="go('x')"><input name="q"><span></span></div>"#)]
	#[case("<ul><li>1</li><li>2</li></ul>text")]
	#[case(r#"<script type="module">if (a < b && c) {}</script>"#)]
	fn markup_survives_a_round_trip(#[case] html: &str) {
		let dom = MemoryDom::parse(html);
		assert_eq!(inner_html(&dom, &dom.body()), html);
	}

	#[test]
	fn sloppy_markup_is_tolerated() {
		let dom = MemoryDom::parse("<!DOCTYPE html><!-- c --><DIV Class=a>x &amp; y &#39;z&#x27;<br/></span></div><p>open");
		assert_eq!(inner_html(&dom, &dom.body()), r#"<div class="a">x &amp; y 'z'<br></div><p>open</p>"#);
	}

	#[test]
	fn values_shadow_attributes() {
		let mut dom = MemoryDom::parse(r#"<input value="a" checked><textarea>t</textarea>"#);
		let children = dom.children(&dom.body());
		assert_eq!(dom.value(&children[0]), "a");
		assert!(dom.checked(&children[0]));
		assert_eq!(dom.value(&children[1]), "t");

		dom.set_value(&children[0], "b");
		dom.set_checked(&children[0], false);
		assert_eq!(dom.value(&children[0]), "b");
		assert!(!dom.checked(&children[0]));
		assert_eq!(outer_html(&dom, &children[0]), r#"<input value="a" checked>"#);
	}

	#[test]
	fn insertion_moves_nodes() {
		let mut dom = MemoryDom::parse("<a></a><b></b>");
		let body = dom.body();
		let children = dom.children(&body);
		dom.insert_before(&body, &children[1], Some(&children[0]));
		assert_eq!(inner_html(&dom, &body), "<b></b><a></a>");
		assert_eq!(dom.parent(&children[1]), Some(body));
	}
}
