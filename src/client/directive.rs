//! `live:*` directive attributes, parsed into typed bindings.

use super::dom::{descendants_until, Dom, NodeKind};
use crate::protocol::attr;
use hashbrown::HashSet;
use tracing::{trace, warn};

/// Debounce delays a directive may request.
pub const DEBOUNCE_STEPS_MS: &[u32] = &[50, 100, 150, 250, 300, 500, 750, 1000];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Directive {
	Click,
	Submit,
	KeyDown,
	KeyUp,
	Change,
	Input,
	/// Two-way binding of a form control to a component property.
	Model,
	/// Visual feedback while the component has a request in flight.
	Loading,
	/// An action issued once, right after binding.
	Init,
}

impl Directive {
	#[must_use]
	pub fn from_name(name: &str) -> Option<Self> {
		Some(match name {
			"click" => Self::Click,
			"submit" => Self::Submit,
			"keydown" => Self::KeyDown,
			"keyup" => Self::KeyUp,
			"change" => Self::Change,
			"input" => Self::Input,
			"model" => Self::Model,
			"loading" => Self::Loading,
			"init" => Self::Init,
			_ => return None,
		})
	}
}

/// DOM events the engine listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Click,
	Submit,
	KeyDown,
	KeyUp,
	Change,
	Input,
}

impl EventKind {
	pub const ALL: [Self; 6] = [Self::Click, Self::Submit, Self::KeyDown, Self::KeyUp, Self::Change, Self::Input];

	#[must_use]
	pub fn name(self) -> &'static str {
		match self {
			Self::Click => "click",
			Self::Submit => "submit",
			Self::KeyDown => "keydown",
			Self::KeyUp => "keyup",
			Self::Change => "change",
			Self::Input => "input",
		}
	}
}

/// Key filter modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
	Enter,
	Escape,
	Tab,
	Space,
	Up,
	Down,
}

impl Key {
	#[must_use]
	pub fn from_name(name: &str) -> Option<Self> {
		Some(match name {
			"enter" => Self::Enter,
			"escape" => Self::Escape,
			"tab" => Self::Tab,
			"space" => Self::Space,
			"up" => Self::Up,
			"down" => Self::Down,
			_ => return None,
		})
	}

	/// Whether a `KeyboardEvent.key` value is this key.
	#[must_use]
	pub fn matches(self, key: &str) -> bool {
		match self {
			Self::Enter => key == "Enter",
			Self::Escape => matches!(key, "Escape" | "Esc"),
			Self::Tab => key == "Tab",
			Self::Space => matches!(key, " " | "Spacebar"),
			Self::Up => matches!(key, "ArrowUp" | "Up"),
			Self::Down => matches!(key, "ArrowDown" | "Down"),
		}
	}
}

/// What `live:loading` does to its element while a request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingEffect {
	/// Unhide: the `hidden` attribute is removed.
	#[default]
	Show,
	/// Hide: the `hidden` attribute is set.
	Remove,
	/// The classes in the attribute value are added.
	Class,
	/// The attribute named by the value (default `disabled`) is set.
	Attr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
	pub prevent: bool,
	/// Replace the component instead of patching it.
	pub refresh: bool,
	pub debounce_ms: Option<u32>,
	/// Reset the component's model controls after a successful response.
	pub clear: bool,
	/// Models update on `change` instead of `input`.
	pub lazy: bool,
	/// Models don't send on their own; their value rides along with the next action.
	pub defer: bool,
	pub keys: Vec<Key>,
	pub loading: LoadingEffect,
}

/// One parsed `live:*` attribute on one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveBinding<N> {
	pub node: N,
	/// The full attribute name, modifiers included.
	pub attribute: String,
	pub directive: Directive,
	/// The attribute value: an action expression, a model name or loading argument.
	pub argument: String,
	/// `live:target` of the element, if any.
	pub target: Option<String>,
	pub modifiers: Modifiers,
}

impl<N> DirectiveBinding<N> {
	/// The event this binding reacts to, if any.
	#[must_use]
	pub fn event(&self) -> Option<EventKind> {
		Some(match self.directive {
			Directive::Click => EventKind::Click,
			Directive::Submit => EventKind::Submit,
			Directive::KeyDown => EventKind::KeyDown,
			Directive::KeyUp => EventKind::KeyUp,
			Directive::Change => EventKind::Change,
			Directive::Input => EventKind::Input,
			Directive::Model if self.modifiers.lazy => EventKind::Change,
			Directive::Model => EventKind::Input,
			Directive::Loading | Directive::Init => return None,
		})
	}

	/// Whether a key event passes this binding's key filters.
	#[must_use]
	pub fn accepts_key(&self, key: Option<&str>) -> bool {
		self.modifiers.keys.is_empty() || key.map_or(false, |key| self.modifiers.keys.iter().any(|filter| filter.matches(key)))
	}
}

/// Parses `live:directive[.modifier…]`. Returns [`None`] for anything that isn't a directive.
///
/// Unknown modifiers are logged and ignored.
#[must_use]
pub fn parse_attribute(name: &str) -> Option<(Directive, Modifiers)> {
	let rest = name.strip_prefix(attr::NAMESPACE)?.strip_prefix(':')?;
	let mut parts = rest.split('.');
	let directive = Directive::from_name(parts.next()?)?;

	let mut modifiers = Modifiers::default();
	for modifier in parts {
		match modifier {
			"prevent" => modifiers.prevent = true,
			"refresh" => modifiers.refresh = true,
			"clear" => modifiers.clear = true,
			"lazy" => modifiers.lazy = true,
			"defer" => modifiers.defer = true,
			"remove" if directive == Directive::Loading => modifiers.loading = LoadingEffect::Remove,
			"class" if directive == Directive::Loading => modifiers.loading = LoadingEffect::Class,
			"attr" if directive == Directive::Loading => modifiers.loading = LoadingEffect::Attr,
			other => {
				if let Some(key) = Key::from_name(other).filter(|_| matches!(directive, Directive::KeyDown | Directive::KeyUp)) {
					modifiers.keys.push(key);
				} else if let Some(ms) = other.strip_suffix("ms").and_then(|ms| ms.parse::<u32>().ok()).filter(|ms| DEBOUNCE_STEPS_MS.contains(ms)) {
					modifiers.debounce_ms = Some(ms);
				} else {
					warn!(attribute = name, modifier = other, "Ignoring unknown directive modifier.");
				}
			}
		}
	}
	Some((directive, modifiers))
}

/// Tracks which `(element, attribute)` pairs have been bound, so rescans only yield new ones.
#[derive(Debug)]
pub struct Binder<N> {
	bound: HashSet<(N, String)>,
}

impl<N> Default for Binder<N> {
	fn default() -> Self {
		Self { bound: HashSet::new() }
	}
}

impl<N: Clone + Eq + core::hash::Hash> Binder<N> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Scans the component rooted at `root` and returns the bindings not seen before.
	///
	/// Nested component roots and their content belong to their own component and are skipped.
	pub fn bind<D: Dom<Node = N>>(&mut self, dom: &D, root: &N) -> Vec<DirectiveBinding<N>> {
		let mut fresh = vec![];
		let nodes = descendants_until(dom, root, |dom, node| dom.get_attribute(node, attr::ID).is_some());
		for node in nodes {
			if dom.kind(&node) != NodeKind::Element {
				continue;
			}
			let attributes = dom.attributes(&node);
			let target = attributes.iter().find(|(name, _)| name == attr::TARGET).map(|(_, value)| value.clone());
			for (name, value) in &attributes {
				let Some((directive, modifiers)) = parse_attribute(name) else { continue };
				if !self.bound.insert((node.clone(), name.clone())) {
					continue;
				}
				trace!(attribute = %name, "Bound directive.");
				fresh.push(DirectiveBinding {
					node: node.clone(),
					attribute: name.clone(),
					directive,
					argument: value.clone(),
					target: target.clone(),
					modifiers,
				});
			}
		}
		fresh
	}

	/// Forgets the `(node, attribute)` pairs for which `keep` is false, so they bind afresh.
	pub fn retain(&mut self, mut keep: impl FnMut(&N, &str) -> bool) {
		self.bound.retain(|(node, attribute)| keep(node, attribute));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::memory::MemoryDom;
	use rstest::rstest;

	#[rstest]
	#[case("live:click", Directive::Click, Modifiers::default())]
	#[case("live:submit.prevent.clear", Directive::Submit, Modifiers { prevent: true, clear: true, ..Modifiers::default() })]
	#[case("live:model.lazy", Directive::Model, Modifiers { lazy: true, ..Modifiers::default() })]
	#[case("live:model.300ms", Directive::Model, Modifiers { debounce_ms: Some(300), ..Modifiers::default() })]
	#[case("live:keyup.enter.escape", Directive::KeyUp, Modifiers { keys: vec![Key::Enter, Key::Escape], ..Modifiers::default() })]
	#[case("live:loading.class", Directive::Loading, Modifiers { loading: LoadingEffect::Class, ..Modifiers::default() })]
	#[case("live:click.refresh.sparkle.42ms", Directive::Click, Modifiers { refresh: true, ..Modifiers::default() })]
	fn attributes_parse(#[case] name: &str, #[case] directive: Directive, #[case] modifiers: Modifiers) {
		assert_eq!(parse_attribute(name), Some((directive, modifiers)));
	}

	#[rstest]
	#[case("live:id")]
	#[case("live:props")]
	#[case("live:target")]
	#[case("class")]
	#[case("live:hover")]
	fn other_attributes_are_not_directives(#[case] name: &str) {
		assert_eq!(parse_attribute(name), None);
	}

	#[test]
	fn binding_is_idempotent_and_stops_at_nested_components() {
		let dom = MemoryDom::parse(
			r#"<div live:id="outer" live:init="$refresh">
				<button live:click="save" live:target="other">Save</button>
				<div live:id="inner"><button live:click="nope"></button></div>
			</div>"#,
		);
		let root = dom.children(&dom.body())[0];
		let mut binder = Binder::new();

		let bindings = binder.bind(&dom, &root);
		assert_eq!(bindings.iter().map(|binding| binding.directive).collect::<Vec<_>>(), [Directive::Init, Directive::Click]);
		assert_eq!(bindings[1].target.as_deref(), Some("other"));
		assert_eq!(bindings[1].event(), Some(EventKind::Click));
		assert!(binder.bind(&dom, &root).is_empty());
	}

	#[test]
	fn key_filters() {
		let (directive, modifiers) = parse_attribute("live:keydown.enter").unwrap();
		let binding = DirectiveBinding {
			node: (),
			attribute: "live:keydown.enter".to_owned(),
			directive,
			argument: "go".to_owned(),
			target: None,
			modifiers,
		};
		assert!(binding.accepts_key(Some("Enter")));
		assert!(!binding.accepts_key(Some("a")));
		assert!(!binding.accepts_key(None));
	}
}
