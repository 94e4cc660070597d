//! All live components of one document, and the glue between their bindings, requests and patches.

use super::{
	directive::{parse_attribute, Binder, Directive, DirectiveBinding, EventKind, LoadingEffect},
	dispatch::{DispatchState, Dispatcher, Pending, RequestId, Transport},
	dom::{descendants, descendants_until, is_within, outer_html, Dom, NodeKind},
	reconcile::{reconcile, ReconcileMode},
	scripts::reactivate,
	ClientError, PageConfig,
};
use crate::{
	action::REFRESH,
	extension::ExtensionCall,
	identity::base_of,
	logging::redact,
	protocol::{attr, WireRequest, WireResponse},
};
use hashbrown::HashMap;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, trace, warn};

/// The parts of a DOM event the engine looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
	/// `KeyboardEvent.key`, for key events.
	pub key: Option<String>,
}

impl Event {
	#[must_use]
	pub fn key(key: impl Into<String>) -> Self {
		Self { key: Some(key.into()) }
	}
}

/// How a completion was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
	/// Superseded, or for a component that is gone. Nothing changed.
	Stale,
	Aborted,
	/// The server skipped rendering. Extensions still ran.
	Skipped { extensions: usize },
	Patched { changes: usize, scripts: usize, extensions: usize },
	/// The host should navigate to `url`.
	Redirect { url: String, flash: Option<Map<String, Value>> },
	Failed(ClientError),
}

struct Mounted<N> {
	token: String,
	root: N,
	dispatcher: Dispatcher<N>,
}

struct Timer<N> {
	due_ms: u64,
	binding: DirectiveBinding<N>,
}

pub struct Page<D: Dom, T: Transport> {
	dom: D,
	root: D::Node,
	transport: T,
	config: PageConfig,
	components: Vec<Mounted<D::Node>>,
	binder: Binder<D::Node>,
	bindings: Vec<DirectiveBinding<D::Node>>,
	timers: HashMap<D::Node, Timer<D::Node>>,
	requests: HashMap<RequestId, String>,
	now_ms: u64,
}

impl<D: Dom, T: Transport> Page<D, T> {
	/// Manages the components below `root`. Call [`scan`](Self::scan) to mount them.
	pub fn new(dom: D, root: D::Node, transport: T, config: PageConfig) -> Self {
		Self {
			dom,
			root,
			transport,
			config,
			components: vec![],
			binder: Binder::new(),
			bindings: vec![],
			timers: HashMap::new(),
			requests: HashMap::new(),
			now_ms: 0,
		}
	}

	pub fn dom(&self) -> &D {
		&self.dom
	}

	pub fn dom_mut(&mut self) -> &mut D {
		&mut self.dom
	}

	pub fn transport(&self) -> &T {
		&self.transport
	}

	pub fn transport_mut(&mut self) -> &mut T {
		&mut self.transport
	}

	/// Identity tokens of the mounted components, in document order of mounting.
	pub fn components(&self) -> Vec<&str> {
		self.components.iter().map(|component| component.token.as_str()).collect()
	}

	pub fn component_root(&self, token: &str) -> Option<&D::Node> {
		self.components.iter().find(|component| component.token == token).map(|component| &component.root)
	}

	pub fn state(&self, token: &str) -> Option<DispatchState> {
		self.components.iter().find(|component| component.token == token).map(|component| component.dispatcher.state())
	}

	/// Mounts new component roots below the page root and binds their directives.
	///
	/// Idempotent. `live:init` actions of newly bound elements are sent right away.
	/// Returns the number of newly mounted components.
	#[instrument(skip(self))]
	pub fn scan(&mut self) -> usize {
		let mut mounted = 0;
		for node in descendants(&self.dom, &self.root) {
			let Some(token) = self.dom.get_attribute(&node, attr::ID) else { continue };
			if self.components.iter().any(|component| component.root == node) {
				continue;
			}
			debug!(component = %token, "Mounted component.");
			self.components.push(Mounted {
				token,
				root: node,
				dispatcher: Dispatcher::new(),
			});
			mounted += 1;
		}

		let roots: Vec<D::Node> = self.components.iter().map(|component| component.root.clone()).collect();
		let mut inits = vec![];
		for root in roots {
			for binding in self.binder.bind(&self.dom, &root) {
				if binding.directive == Directive::Init {
					inits.push(binding);
				} else {
					self.bindings.push(binding);
				}
			}
		}
		for binding in inits {
			if let Err(error) = self.fire(&binding) {
				warn!(%error, "`live:init` failed to dispatch.");
			}
		}
		mounted
	}

	/// Feeds a DOM event into the engine. Returns whether the default action should be prevented.
	///
	/// Bindings are looked up from `target` up to its component root, like a bubbling event.
	#[instrument(skip(self, event))]
	pub fn dispatch_event(&mut self, target: &D::Node, kind: EventKind, event: &Event) -> bool {
		let mut matched = vec![];
		let mut current = Some(target.clone());
		while let Some(node) = current {
			matched.extend(self.bindings.iter().filter(|binding| binding.node == node && binding.event() == Some(kind)).cloned());
			if self.dom.get_attribute(&node, attr::ID).is_some() {
				break;
			}
			current = self.dom.parent(&node);
		}

		let mut prevent = false;
		for binding in matched {
			if matches!(kind, EventKind::KeyDown | EventKind::KeyUp) && !binding.accepts_key(event.key.as_deref()) {
				continue;
			}
			prevent |= binding.modifiers.prevent || kind == EventKind::Submit;
			if binding.directive == Directive::Model && binding.modifiers.defer {
				trace!(model = %binding.argument, "Deferred model change.");
				continue;
			}
			match binding.modifiers.debounce_ms {
				Some(delay_ms) => {
					trace!(delay_ms, "Debouncing.");
					self.timers.insert(
						binding.node.clone(),
						Timer {
							due_ms: self.now_ms + u64::from(delay_ms),
							binding,
						},
					);
				}
				None => {
					if let Err(error) = self.fire(&binding) {
						warn!(%error, "Directive failed to dispatch.");
					}
				}
			}
		}
		prevent
	}

	/// Moves the clock to `now_ms` and fires debounce timers that came due. Returns how many fired.
	pub fn advance(&mut self, now_ms: u64) -> usize {
		self.now_ms = self.now_ms.max(now_ms);
		let mut due: Vec<Timer<D::Node>> = vec![];
		let keys: Vec<D::Node> = self.timers.iter().filter(|(_, timer)| timer.due_ms <= self.now_ms).map(|(node, _)| node.clone()).collect();
		for key in keys {
			due.extend(self.timers.remove(&key));
		}
		due.sort_by_key(|timer| timer.due_ms);

		let fired = due.len();
		for timer in due {
			if let Err(error) = self.fire(&timer.binding) {
				warn!(%error, "Debounced directive failed to dispatch.");
			}
		}
		fired
	}

	/// Sends the action of `binding`, reading its current attribute value.
	fn fire(&mut self, binding: &DirectiveBinding<D::Node>) -> Result<RequestId, ClientError> {
		let Some(argument) = self.dom.get_attribute(&binding.node, &binding.attribute) else {
			return Err(ClientError::MissingComponent(binding.attribute.clone()));
		};
		let method = match binding.directive {
			Directive::Model => REFRESH.to_owned(),
			_ if argument.trim().is_empty() => REFRESH.to_owned(),
			_ => argument,
		};

		let owner = self.owner_of(&binding.node).ok_or_else(|| ClientError::MissingComponent(binding.attribute.clone()))?;
		let token = match self.dom.get_attribute(&binding.node, attr::TARGET) {
			Some(target) if target != owner => self.resolve_target(&target)?,
			_ => owner,
		};
		let mode = if binding.modifiers.refresh { ReconcileMode::Replace } else { ReconcileMode::Patch };
		self.submit(&token, &method, mode, binding.modifiers.clear)
	}

	fn owner_of(&self, node: &D::Node) -> Option<String> {
		let mut current = Some(node.clone());
		while let Some(node) = current {
			if let Some(component) = self.components.iter().find(|component| component.root == node) {
				return Some(component.token.clone());
			}
			current = self.dom.parent(&node);
		}
		None
	}

	/// Exact token first, then any instance sharing its base token.
	fn resolve_target(&self, target: &str) -> Result<String, ClientError> {
		self.components
			.iter()
			.find(|component| component.token == target)
			.or_else(|| self.components.iter().find(|component| base_of(&component.token) == base_of(target)))
			.map(|component| component.token.clone())
			.ok_or_else(|| ClientError::MissingComponent(target.to_owned()))
	}

	/// Calls `method` on the component `token`, superseding its in-flight call.
	#[instrument(skip(self))]
	pub fn submit(&mut self, token: &str, method: &str, mode: ReconcileMode, clear: bool) -> Result<RequestId, ClientError> {
		let index = self
			.components
			.iter()
			.position(|component| component.token == token)
			.ok_or_else(|| ClientError::MissingComponent(token.to_owned()))?;

		if let Some(superseded) = self.components[index].dispatcher.abort() {
			debug!(component = token, aborted = superseded.id.0, "Aborting superseded call.");
			self.transport.abort(superseded.id);
			self.requests.remove(&superseded.id);
			self.restore(superseded.loading);
		}

		let root = self.components[index].root.clone();
		let request = WireRequest {
			component: token.to_owned(),
			properties: self.dom.get_attribute(&root, attr::PROPS).unwrap_or_default(),
			method: method.to_owned(),
			models: self.models(&root),
			compiled: self.compiled(&root),
			token: self.config.csrf_token.clone(),
		};
		debug!(component = token, method, models = %redact(&serde_json::Value::Object(request.models.clone())), "Sending component call.");

		let id = self.transport.send(request);
		let loading = self.start_loading(&root);
		self.components[index].dispatcher.begin(Pending { id, mode, clear, loading });
		self.requests.insert(id, token.to_owned());
		Ok(id)
	}

	fn own_nodes(&self, root: &D::Node) -> Vec<D::Node> {
		descendants_until(&self.dom, root, |dom, node| dom.get_attribute(node, attr::ID).is_some())
	}

	fn model_controls(&self, root: &D::Node) -> Vec<(D::Node, String)> {
		let mut controls = vec![];
		for node in self.own_nodes(root) {
			if self.dom.kind(&node) != NodeKind::Element {
				continue;
			}
			let name = self
				.dom
				.attributes(&node)
				.into_iter()
				.find(|(attribute, _)| matches!(parse_attribute(attribute), Some((Directive::Model, _))))
				.map(|(_, name)| name);
			if let Some(name) = name {
				controls.push((node, name));
			}
		}
		controls
	}

	fn models(&self, root: &D::Node) -> Map<String, Value> {
		let mut models = Map::new();
		for (node, name) in self.model_controls(root) {
			let kind = self.dom.get_attribute(&node, "type").unwrap_or_default().to_ascii_lowercase();
			let value = match kind.as_str() {
				"checkbox" => Value::Bool(self.dom.checked(&node)),
				"radio" if !self.dom.checked(&node) => continue,
				_ => Value::String(self.dom.value(&node)),
			};
			models.insert(name, value);
		}
		models
	}

	fn clear_models(&mut self, root: &D::Node) {
		for (node, _) in self.model_controls(root) {
			if matches!(self.dom.get_attribute(&node, "type").as_deref(), Some("checkbox" | "radio")) {
				self.dom.set_checked(&node, false);
			} else {
				self.dom.set_value(&node, "");
			}
		}
	}

	/// Nested component roots directly inside `root`, with their current markup.
	fn compiled(&self, root: &D::Node) -> Map<String, Value> {
		let mut compiled = Map::new();
		let mut stack = self.dom.children(root);
		while let Some(node) = stack.pop() {
			match self.dom.get_attribute(&node, attr::ID) {
				Some(token) => {
					compiled.insert(token, Value::String(outer_html(&self.dom, &node)));
				}
				None => stack.extend(self.dom.children(&node)),
			}
		}
		compiled
	}

	fn start_loading(&mut self, root: &D::Node) -> Vec<(D::Node, String, Option<String>)> {
		let targets: Vec<DirectiveBinding<D::Node>> = self
			.bindings
			.iter()
			.filter(|binding| binding.directive == Directive::Loading && self.owner_root(&binding.node).as_ref() == Some(root))
			.cloned()
			.collect();

		let mut previous = vec![];
		for binding in targets {
			let node = binding.node;
			let argument = self.dom.get_attribute(&node, &binding.attribute).unwrap_or_default();
			let (name, value) = match binding.modifiers.loading {
				LoadingEffect::Show => ("hidden".to_owned(), None),
				LoadingEffect::Remove => ("hidden".to_owned(), Some(String::new())),
				LoadingEffect::Class => {
					let classes = self.dom.get_attribute(&node, "class").unwrap_or_default();
					("class".to_owned(), Some(format!("{} {}", classes, argument.trim()).trim().to_owned()))
				}
				LoadingEffect::Attr if argument.trim().is_empty() => ("disabled".to_owned(), Some(String::new())),
				LoadingEffect::Attr => (argument.trim().to_owned(), Some(String::new())),
			};
			previous.push((node.clone(), name.clone(), self.dom.get_attribute(&node, &name)));
			match value {
				Some(value) => self.dom.set_attribute(&node, &name, &value),
				None => self.dom.remove_attribute(&node, &name),
			}
		}
		previous
	}

	fn restore(&mut self, loading: Vec<(D::Node, String, Option<String>)>) {
		for (node, name, previous) in loading.into_iter().rev() {
			match previous {
				Some(value) => self.dom.set_attribute(&node, &name, &value),
				None => self.dom.remove_attribute(&node, &name),
			}
		}
	}

	fn owner_root(&self, node: &D::Node) -> Option<D::Node> {
		let mut current = Some(node.clone());
		while let Some(node) = current {
			if self.components.iter().any(|component| component.root == node) {
				return Some(node);
			}
			current = self.dom.parent(&node);
		}
		None
	}

	/// Applies the outcome of request `id`.
	#[instrument(skip(self, result))]
	pub fn complete(&mut self, id: RequestId, result: Result<WireResponse, ClientError>) -> Settled {
		let Some(token) = self.requests.remove(&id) else {
			trace!("Completion of an unknown or superseded request.");
			return Settled::Stale;
		};
		let Some(index) = self.components.iter().position(|component| component.token == token) else {
			return Settled::Stale;
		};
		let Some(pending) = self.components[index].dispatcher.resolve(id) else {
			return Settled::Stale;
		};
		self.restore(pending.loading.clone());

		match result {
			Err(ClientError::Aborted) => {
				self.components[index].dispatcher.settle();
				Settled::Aborted
			}
			Err(error) => {
				self.components[index].dispatcher.settle();
				self.show_error(index, &error);
				Settled::Failed(error)
			}
			Ok(WireResponse::Redirect { redirect, flash }) => {
				self.components[index].dispatcher.settle();
				info!(url = %redirect, "Redirecting.");
				Settled::Redirect { url: redirect, flash }
			}
			Ok(WireResponse::Content { content, extender }) if content.is_empty() => {
				self.components[index].dispatcher.settle();
				let extensions = self.dispatch_extensions(extender);
				Settled::Skipped { extensions }
			}
			Ok(WireResponse::Content { content, extender }) => {
				let root = self.components[index].root.clone();
				let reconciled = match reconcile(&mut self.dom, &root, &content, pending.mode) {
					Ok(reconciled) => reconciled,
					Err(error) => {
						self.components[index].dispatcher.settle();
						self.show_error(index, &error);
						return Settled::Failed(error);
					}
				};
				let scripts = reactivate(&mut self.dom, &reconciled.root, &reconciled.changes, pending.mode == ReconcileMode::PatchKeepScripts);
				if pending.clear {
					self.clear_models(&reconciled.root);
				}

				let component = &mut self.components[index];
				if let Some(token) = self.dom.get_attribute(&reconciled.root, attr::ID) {
					component.token = token;
				}
				component.root = reconciled.root;
				component.dispatcher.settle();

				self.prune();
				self.scan();
				let extensions = self.dispatch_extensions(extender);
				Settled::Patched {
					changes: reconciled.changes.len(),
					scripts,
					extensions,
				}
			}
		}
	}

	/// Feeds queued transport completions into [`complete`](Self::complete).
	pub fn pump(&mut self) -> Vec<Settled> {
		let completions = self.transport.poll();
		completions.into_iter().map(|(id, result)| self.complete(id, result)).collect()
	}

	fn show_error(&mut self, index: usize, error: &ClientError) {
		warn!(component = %self.components[index].token, %error, "Component call failed.");
		if !self.config.show_errors {
			return;
		}
		let root = self.components[index].root.clone();
		let message = self.dom.create_element("div");
		self.dom.set_attribute(&message, attr::ERROR, "");
		let text = self.dom.create_text(&error.to_string());
		self.dom.append_child(&message, &text);
		self.dom.append_child(&root, &message);
	}

	/// Sends extension calls to every mounted instance sharing the target's base token.
	fn dispatch_extensions(&mut self, extender: Vec<ExtensionCall>) -> usize {
		let mut sent = 0;
		for call in extender {
			let targets: Vec<String> = self
				.components
				.iter()
				.filter(|component| base_of(&component.token) == call.target)
				.map(|component| component.token.clone())
				.collect();
			if targets.is_empty() {
				warn!(method = %call.method, "Extension target isn't mounted.");
			}
			for token in targets {
				match self.submit(&token, &call.method, ReconcileMode::PatchKeepScripts, false) {
					Ok(_) => sent += 1,
					Err(error) => warn!(%error, "Extension call failed to dispatch."),
				}
			}
		}
		sent
	}

	/// Forgets components, bindings and timers whose nodes left the page.
	fn prune(&mut self) {
		let (dom, page) = (&self.dom, &self.root);
		let mut gone = vec![];
		self.components.retain_mut(|component| {
			let attached = is_within(dom, &component.root, page);
			if !attached {
				debug!(component = %component.token, "Unmounted component.");
				gone.extend(component.dispatcher.abort().map(|pending| pending.id));
			}
			attached
		});
		for id in gone {
			self.transport.abort(id);
			self.requests.remove(&id);
		}
		// A surviving node may have lost the directive in a patch.
		let live = |node: &D::Node, attribute: &str| is_within(dom, node, page) && dom.get_attribute(node, attribute).is_some();
		self.bindings.retain(|binding| live(&binding.node, &binding.attribute));
		self.binder.retain(|node, attribute| live(node, attribute));
		self.timers.retain(|_, timer| live(&timer.binding.node, &timer.binding.attribute));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::client::memory::MemoryDom;

	#[derive(Default)]
	struct Outbox {
		sent: Vec<WireRequest>,
		aborted: Vec<RequestId>,
	}

	impl Transport for Outbox {
		fn send(&mut self, request: WireRequest) -> RequestId {
			self.sent.push(request);
			RequestId(self.sent.len() as u64)
		}

		fn abort(&mut self, id: RequestId) {
			self.aborted.push(id);
		}
	}

	fn page(html: &str) -> Page<MemoryDom, Outbox> {
		let dom = MemoryDom::parse(html);
		let body = dom.body();
		let mut page = Page::new(dom, body, Outbox::default(), PageConfig::default());
		page.scan();
		page
	}

	#[test]
	fn loading_effects_are_undone() {
		let mut page = page(r#"<div live:id="c"><button live:click="go">Go</button><i live:loading hidden>…</i><b live:loading.class="busy" class="x"></b><input live:loading.attr></div>"#);
		let button = crate::client::dom::find_by_attribute(page.dom(), &page.dom().body(), "live:click", "go").unwrap();
		page.dispatch_event(&button, EventKind::Click, &Event::default());

		let root = *page.component_root("c").unwrap();
		let html = outer_html(page.dom(), &root);
		assert!(html.contains("<i live:loading>"));
		assert!(html.contains(r#"class="x busy""#));
		assert!(html.contains("<input live:loading.attr disabled>"));

		page.complete(RequestId(1), Err(ClientError::Aborted));
		assert_eq!(
			outer_html(page.dom(), &root),
			r#"<div live:id="c"><button live:click="go">Go</button><i live:loading hidden>…</i><b live:loading.class="busy" class="x"></b><input live:loading.attr></div>"#
		);
	}

	#[test]
	fn deferred_models_ride_along() {
		let mut page = page(r#"<div live:id="c"><input live:model.defer="q"><input type="checkbox" live:model="on" checked><button live:click="search">Go</button></div>"#);
		let dom = page.dom();
		let inputs: Vec<_> = descendants(dom, &dom.body()).into_iter().filter(|node| dom.tag(node) == "input").collect();
		page.dom_mut().set_value(&inputs[0], "rust");
		assert!(!page.dispatch_event(&inputs[0], EventKind::Input, &Event::default()));
		assert!(page.transport().sent.is_empty());

		let button = crate::client::dom::find_by_attribute(page.dom(), &page.dom().body(), "live:click", "search").unwrap();
		page.dispatch_event(&button, EventKind::Click, &Event::default());
		let sent = &page.transport().sent;
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].method, "search");
		assert_eq!(Value::Object(sent[0].models.clone()), serde_json::json!({ "q": "rust", "on": true }));
	}
}
