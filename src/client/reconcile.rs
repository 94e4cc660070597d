//! Key-aware patching of a component's live DOM toward freshly rendered markup.

use super::{
	dom::{structurally_equal, Dom, NodeKind},
	ClientError,
};
use crate::protocol::attr;
use hashbrown::{HashMap, HashSet};
use tracing::{error, instrument, trace, trace_span};

/// How a content response is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
	/// Swap the whole component root.
	Replace,
	/// Minimal in-place update, then reactivate scripts in changed regions.
	Patch,
	/// Like [`Patch`](Self::Patch), but scripts directly below the root are left alone.
	PatchKeepScripts,
}

/// A region a patch touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<N> {
	/// A node (with its subtree) that was inserted.
	Inserted(N),
	/// A node whose own attributes or text were rewritten.
	Updated(N),
}

#[derive(Debug)]
pub struct Reconciled<N> {
	/// The component root afterwards. Differs from the old root only after a replacement.
	pub root: N,
	pub changes: Vec<Change<N>>,
}

/// Reconciliation key: `live:key`, else `live:id`, else `id`.
pub fn key_of<D: Dom>(dom: &D, node: &D::Node) -> Option<String> {
	if dom.kind(node) != NodeKind::Element {
		return None;
	}
	[attr::KEY, attr::ID, "id"].iter().find_map(|name| dom.get_attribute(node, name))
}

/// Applies `html` (a whole rendered fragment) to the component rooted at `root`.
#[instrument(skip(dom, html))]
pub fn reconcile<D: Dom>(dom: &mut D, root: &D::Node, html: &str, mode: ReconcileMode) -> Result<Reconciled<D::Node>, ClientError> {
	let parsed = dom.parse_fragment(html);
	let incoming = parsed
		.into_iter()
		.find(|node| dom.kind(node) == NodeKind::Element)
		.ok_or_else(|| ClientError::Decode("content has no root element".to_owned()))?;

	if mode == ReconcileMode::Replace || dom.tag(root) != dom.tag(&incoming) {
		if let Some(parent) = dom.parent(root) {
			trace!("Replacing component root.");
			dom.replace_child(&parent, &incoming, root);
			return Ok(Reconciled {
				root: incoming.clone(),
				changes: vec![Change::Inserted(incoming)],
			});
		}
		error!("Component root is detached and can't be replaced. Patching instead.");
	}

	let mut changes = vec![];
	patch_element(dom, root, &incoming, &mut changes);
	trace!(changes = changes.len(), "Patched component.");
	Ok(Reconciled { root: root.clone(), changes })
}

fn compatible<D: Dom>(dom: &D, a: &D::Node, b: &D::Node) -> bool {
	let kind = dom.kind(a);
	kind == dom.kind(b) && (kind != NodeKind::Element || dom.tag(a) == dom.tag(b))
}

fn patch_node<D: Dom>(dom: &mut D, existing: &D::Node, incoming: &D::Node, changes: &mut Vec<Change<D::Node>>) {
	match dom.kind(existing) {
		NodeKind::Text => {
			let text = dom.text(incoming);
			if dom.text(existing) != text {
				dom.set_text(existing, &text);
				changes.push(Change::Updated(existing.clone()));
			}
		}
		NodeKind::Element if !structurally_equal(dom, existing, incoming) => patch_element(dom, existing, incoming, changes),
		NodeKind::Element | NodeKind::Other => (),
	}
}

fn patch_element<D: Dom>(dom: &mut D, existing: &D::Node, incoming: &D::Node, changes: &mut Vec<Change<D::Node>>) {
	if sync_attributes(dom, existing, incoming) {
		changes.push(Change::Updated(existing.clone()));
	}
	patch_children(dom, existing, incoming, changes);
}

fn sync_attributes<D: Dom>(dom: &mut D, existing: &D::Node, incoming: &D::Node) -> bool {
	let wanted = dom.attributes(incoming);
	let mut changed = false;
	for (name, _) in dom.attributes(existing) {
		if wanted.iter().all(|(wanted, _)| *wanted != name) {
			dom.remove_attribute(existing, &name);
			changed = true;
		}
	}
	for (name, value) in &wanted {
		if dom.get_attribute(existing, name).as_ref() != Some(value) {
			dom.set_attribute(existing, name, value);
			changed = true;
		}
	}
	changed
}

fn patch_children<D: Dom>(dom: &mut D, parent: &D::Node, source: &D::Node, changes: &mut Vec<Change<D::Node>>) {
	let span = trace_span!("patch_children", ?parent);
	let _enter = span.enter();

	let old = dom.children(parent);
	let mut keyed: HashMap<String, D::Node> = HashMap::new();
	let mut unkeyed = vec![];
	for node in &old {
		match key_of(dom, node) {
			Some(key) => {
				keyed.entry(key).or_insert_with(|| node.clone());
			}
			None => unkeyed.push(node.clone()),
		}
	}

	let mut kept = HashSet::new();
	for (index, incoming) in dom.children(source).into_iter().enumerate() {
		let candidate = match key_of(dom, &incoming) {
			Some(key) => keyed.remove(&key).filter(|candidate| compatible(dom, candidate, &incoming)),
			None => unkeyed.iter().position(|candidate| compatible(dom, candidate, &incoming)).map(|position| unkeyed.remove(position)),
		};

		// Everything before `index` is final, so whatever sits there now is the insertion point.
		let reference = dom.children(parent).get(index).cloned();
		match candidate {
			Some(existing) => {
				patch_node(dom, &existing, &incoming, changes);
				if reference.as_ref() != Some(&existing) {
					dom.insert_before(parent, &existing, reference.as_ref());
				}
				kept.insert(existing);
			}
			None => {
				dom.insert_before(parent, &incoming, reference.as_ref());
				changes.push(Change::Inserted(incoming.clone()));
				kept.insert(incoming);
			}
		}
	}

	for node in old {
		if !kept.contains(&node) {
			dom.remove_child(parent, &node);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::{
		dom::{find_by_attribute, inner_html, outer_html},
		memory::MemoryDom,
	};

	fn mounted(html: &str) -> (MemoryDom, <MemoryDom as Dom>::Node) {
		let dom = MemoryDom::parse(html);
		let root = dom.children(&dom.body())[0];
		(dom, root)
	}

	#[test]
	fn one_changed_text_leaves_siblings_alone() {
		let (mut dom, root) = mounted(r#"<div live:id="c"><ul><li>a</li><li>b</li><li>c</li></ul></div>"#);
		let list = dom.children(&root)[0];
		let before = dom.children(&list);
		let texts: Vec<_> = before.iter().map(|item| dom.children(item)[0]).collect();

		let result = reconcile(&mut dom, &root, r#"<div live:id="c"><ul><li>a</li><li>B</li><li>c</li></ul></div>"#, ReconcileMode::Patch).unwrap();

		assert_eq!(dom.children(&list), before);
		assert_eq!(before.iter().map(|item| dom.children(item)[0]).collect::<Vec<_>>(), texts);
		assert_eq!(dom.text(&texts[1]), "B");
		assert_eq!(result.changes, vec![Change::Updated(texts[1])]);
		assert_eq!(result.root, root);
	}

	#[test]
	fn keyed_children_move_instead_of_rerendering() {
		let (mut dom, root) = mounted(r#"<div><p live:key="1">one</p><p live:key="2">two</p><p live:key="3">three</p></div>"#);
		let one = find_by_attribute(&dom, &root, attr::KEY, "1").unwrap();
		let three = find_by_attribute(&dom, &root, attr::KEY, "3").unwrap();

		let result = reconcile(&mut dom, &root, r#"<div><p live:key="3">three</p><p live:key="1">one</p><p live:key="4">four</p></div>"#, ReconcileMode::Patch).unwrap();

		assert_eq!(inner_html(&dom, &root), r#"<p live:key="3">three</p><p live:key="1">one</p><p live:key="4">four</p>"#);
		assert_eq!(dom.children(&root)[..2], [three, one]);
		assert_eq!(result.changes.len(), 1);
		assert!(matches!(result.changes[0], Change::Inserted(_)));
	}

	#[test]
	fn attributes_and_tags_are_synced() {
		let (mut dom, root) = mounted(r#"<div live:id="c" live:props="old"><span class="a" hidden>x</span><b>y</b></div>"#);
		reconcile(&mut dom, &root, r#"<div live:id="c" live:props="new"><span class="b">x</span><i>y</i></div>"#, ReconcileMode::Patch).unwrap();
		assert_eq!(outer_html(&dom, &root), r#"<div live:id="c" live:props="new"><span class="b">x</span><i>y</i></div>"#);
	}

	#[test]
	fn replace_swaps_the_root() {
		let (mut dom, root) = mounted(r#"<div live:id="c"><p>x</p></div>"#);
		let result = reconcile(&mut dom, &root, r#"<div live:id="c"><p>x</p></div>"#, ReconcileMode::Replace).unwrap();
		assert_ne!(result.root, root);
		assert_eq!(dom.children(&dom.body()), vec![result.root]);
		assert_eq!(dom.parent(&root), None);
	}

	#[test]
	fn content_without_elements_is_rejected() {
		let (mut dom, root) = mounted("<div></div>");
		assert!(matches!(reconcile(&mut dom, &root, "just text", ReconcileMode::Patch), Err(ClientError::Decode(_))));
	}
}
