//! Re-running scripts that arrived through a patch.
//!
//! Browsers don't execute `<script>` elements inserted as parsed markup, so every script in a
//! changed region is swapped for a freshly created copy.

use super::{
	dom::{descendants, Dom, NodeKind},
	reconcile::Change,
};
use hashbrown::HashSet;
use tracing::{debug, instrument};

/// Recreates each script touched by `changes` once. Returns how many were recreated.
///
/// With `keep_top_level`, scripts that are direct children of `root` are skipped.
#[instrument(skip(dom, changes))]
pub fn reactivate<D: Dom>(dom: &mut D, root: &D::Node, changes: &[Change<D::Node>], keep_top_level: bool) -> usize {
	let mut scripts = vec![];
	let mut seen = HashSet::new();
	let mut consider = |script: D::Node, scripts: &mut Vec<D::Node>| {
		if seen.insert(script.clone()) {
			scripts.push(script);
		}
	};

	for change in changes {
		match change {
			Change::Inserted(region) => {
				for node in descendants(dom, region) {
					if is_script(dom, &node) {
						consider(node, &mut scripts);
					}
				}
			}
			Change::Updated(node) if is_script(dom, node) => consider(node.clone(), &mut scripts),
			Change::Updated(node) => {
				if let Some(parent) = dom.parent(node).filter(|parent| dom.kind(node) == NodeKind::Text && is_script(dom, parent)) {
					consider(parent, &mut scripts);
				}
			}
		}
	}

	let mut count = 0;
	for script in scripts {
		let Some(parent) = dom.parent(&script) else { continue };
		if keep_top_level && &parent == root {
			continue;
		}
		let fresh = dom.create_element("script");
		for (name, value) in dom.attributes(&script) {
			dom.set_attribute(&fresh, &name, &value);
		}
		let source: String = dom.children(&script).iter().map(|child| dom.text(child)).collect();
		if !source.is_empty() {
			let text = dom.create_text(&source);
			dom.append_child(&fresh, &text);
		}
		dom.replace_child(&parent, &fresh, &script);
		count += 1;
	}
	debug!(count, "Reactivated scripts.");
	count
}

fn is_script<D: Dom>(dom: &D, node: &D::Node) -> bool {
	dom.kind(node) == NodeKind::Element && dom.tag(node) == "script"
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::{
		dom::{inner_html, Dom},
		memory::MemoryDom,
		reconcile::{reconcile, ReconcileMode},
	};

	const BEFORE: &str = r#"<div live:id="c"><script>top()</script><section><p>0</p><script type="module">nested()</script></section><aside><script>quiet()</script></aside></div>"#;
	const AFTER: &str = r#"<div live:id="c"><script>top()</script><section><p>1</p><script type="module">nested(2)</script></section><aside><script>quiet()</script></aside></div>"#;

	fn scripts(dom: &MemoryDom) -> Vec<<MemoryDom as Dom>::Node> {
		descendants(dom, &dom.body()).into_iter().filter(|node| is_script(dom, node)).collect()
	}

	#[test]
	fn only_changed_scripts_are_recreated() {
		let mut dom = MemoryDom::parse(BEFORE);
		let root = dom.children(&dom.body())[0];
		let before = scripts(&dom);

		let result = reconcile(&mut dom, &root, AFTER, ReconcileMode::Patch).unwrap();
		assert_eq!(reactivate(&mut dom, &root, &result.changes, false), 1);

		let after = scripts(&dom);
		assert_eq!((after[0], after[2]), (before[0], before[2]));
		assert_ne!(after[1], before[1]);
		assert_eq!(inner_html(&dom, &dom.body()), AFTER);
	}

	#[test]
	fn a_replaced_root_reactivates_everything_unless_kept() {
		let mut dom = MemoryDom::parse(BEFORE);
		let root = dom.children(&dom.body())[0];
		let result = reconcile(&mut dom, &root, AFTER, ReconcileMode::Replace).unwrap();
		assert_eq!(reactivate(&mut dom, &result.root, &result.changes, true), 2);
		assert_eq!(reactivate(&mut dom, &result.root, &[], false), 0);
	}
}
