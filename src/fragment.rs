//! Fragment rendering: wraps a component's own markup in the reconciliation anchor.

use crate::{
	action::REFRESH,
	auth::AuthGate,
	collaborators::TemplateRenderer,
	component::{AnyComponent, Component, Markup, Registry},
	config::Config,
	error::Result,
	extension::ExtensionCall,
	identity::{nonce_for, ComponentIdentity, MountCounter, OpaqueCodec},
	properties::PropertySnapshot,
	protocol::attr,
};
use core::fmt::Write as _;
use hashbrown::HashMap;
use http::request::Parts;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, instrument, trace};

/// The unit returned to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFragment {
	pub html: String,
	pub duration_ms: u64,
	pub properties: PropertySnapshot,
	pub extensions: Vec<ExtensionCall>,
}

/// How a root component is first put on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
	/// Render real content right away.
	Eager,
	/// Render the placeholder and let the client fetch real content with a background refresh.
	Skeleton,
}

/// State shared by every fragment rendered in one pass (one request or one page render).
///
/// The counter numbers repeated top-level mounts only.
#[derive(Debug, Default)]
pub struct RenderPass {
	counter: MountCounter,
	compiled: Map<String, Value>,
}

impl RenderPass {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// A pass that reuses the HTML of components the page has already rendered.
	#[must_use]
	pub fn with_compiled(compiled: Map<String, Value>) -> Self {
		Self {
			counter: MountCounter::new(),
			compiled,
		}
	}
}

/// Borrowed server state needed to render fragments.
#[derive(Clone, Copy)]
pub struct Renderer<'a> {
	pub(crate) registry: &'a Registry,
	pub(crate) codec: &'a OpaqueCodec,
	pub(crate) templates: &'a dyn TemplateRenderer,
	pub(crate) gate: &'a AuthGate,
	pub(crate) config: &'a Config,
}

impl<'a> Renderer<'a> {
	fn resolve(&self, markup: Markup) -> Result<String> {
		match markup {
			Markup::Html(html) => Ok(html),
			Markup::Template { path, data } => {
				trace!(path = %path, "Rendering template.");
				self.templates.render(&path, &data)
			}
		}
	}

	fn wrap(&self, identity: &ComponentIdentity, type_ref: &str, started_at: Instant, properties: &PropertySnapshot, body: &str, init: Option<&str>) -> (String, u64) {
		let duration_ms = u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);
		let mut html = String::with_capacity(body.len() + 128);
		let _ = write!(
			html,
			r#"<div {}="{}" {}="{}" {}="{}""#,
			attr::ID,
			escape(&identity.token(self.codec)),
			attr::MS,
			duration_ms,
			attr::PROPS,
			escape(&properties.encode(self.codec)),
		);
		if self.config.debug {
			let _ = write!(html, r#" {}="{}""#, attr::CLASS, escape(type_ref));
		}
		if let Some(init) = init {
			let _ = write!(html, r#" {}="{}""#, attr::INIT, escape(init));
		}
		html.push('>');
		html.push_str(body);
		html.push_str(attr::BOOT_MARKER);
		html.push_str("</div>");
		(html, duration_ms)
	}

	/// Renders `component` into its container.
	#[instrument(skip(self, component, identity, started_at, pass, request), fields(identity = %identity))]
	pub fn render(&self, component: &dyn AnyComponent, identity: &ComponentIdentity, started_at: Instant, pass: &mut RenderPass, request: &Parts) -> Result<RenderedFragment> {
		let properties = component.capture()?;
		let markup = {
			let mut context = RenderContext {
				renderer: *self,
				pass,
				request,
				identity,
				occurrences: HashMap::new(),
			};
			component.render(&mut context)?
		};
		let body = self.resolve(markup)?;
		let (html, duration_ms) = self.wrap(identity, component.type_ref(), started_at, &properties, &body, None);
		Ok(RenderedFragment {
			html,
			duration_ms,
			properties,
			extensions: vec![],
		})
	}

	/// Renders the placeholder of `component`, marked for a background refresh.
	pub fn render_skeleton(&self, component: &dyn AnyComponent, identity: &ComponentIdentity, started_at: Instant) -> Result<RenderedFragment> {
		let properties = component.capture()?;
		let body = self.resolve(component.skeleton())?;
		let (html, duration_ms) = self.wrap(identity, component.type_ref(), started_at, &properties, &body, Some(REFRESH));
		Ok(RenderedFragment {
			html,
			duration_ms,
			properties,
			extensions: vec![],
		})
	}

	/// Mounts, gates and renders a component by type reference.
	pub fn mount(&self, type_ref: &str, args: &[Value], mode: MountMode, pass: &mut RenderPass, request: &Parts) -> Result<RenderedFragment> {
		let started_at = Instant::now();
		let registration = self.registry.get(type_ref)?;
		let identity = pass.counter.next(type_ref, &nonce_for(args));
		let component = registration.mount(args)?;
		self.gate.verify(component.as_ref(), request)?;
		match mode {
			MountMode::Eager => self.render(component.as_ref(), &identity, started_at, pass, request),
			MountMode::Skeleton => self.render_skeleton(component.as_ref(), &identity, started_at),
		}
	}
}

/// Handed to [`Component::render`].
pub struct RenderContext<'a> {
	renderer: Renderer<'a>,
	pass: &'a mut RenderPass,
	request: &'a Parts,
	identity: &'a ComponentIdentity,
	occurrences: HashMap<(String, String), u32>,
}

impl RenderContext<'_> {
	/// Mounts and renders a nested component, returning its fragment HTML.
	///
	/// The child's identity is derived from this component's own, so it survives a re-render.
	/// A child the page has already rendered (listed in `_compiled`) is not rendered again.
	pub fn child(&mut self, type_ref: &str, args: &[Value]) -> Result<String> {
		let nonce = nonce_for(args);
		let occurrence = self.occurrences.entry((type_ref.to_owned(), nonce.clone())).or_insert(0);
		let identity = ComponentIdentity::nested(type_ref, nonce, self.identity, *occurrence);
		*occurrence += 1;
		let token = identity.token(self.renderer.codec);
		if let Some(Value::String(html)) = self.pass.compiled.get(&token) {
			debug!(child = %identity, "Reusing compiled child.");
			return Ok(html.clone());
		}

		let started_at = Instant::now();
		let component = self.renderer.registry.get(type_ref)?.mount(args)?;
		self.renderer.gate.verify(component.as_ref(), self.request)?;
		let renderer = self.renderer;
		Ok(renderer.render(component.as_ref(), &identity, started_at, self.pass, self.request)?.html)
	}

	/// Typed [`child`](Self::child).
	pub fn child_of<C: Component>(&mut self, args: &[Value]) -> Result<String> {
		self.child(C::TYPE_REF, args)
	}

	/// Renders a template through the host's renderer.
	pub fn template(&self, path: &str, data: &Value) -> Result<String> {
		self.renderer.templates.render(path, data)
	}
}

/// Inserts the client script at the first boot marker of `page` and drops the others.
#[must_use]
pub fn bootstrap(page: &str, client_script: &str) -> String {
	let script = format!(r#"<script src="{}" defer></script>"#, escape(client_script));
	match page.find(attr::BOOT_MARKER) {
		Some(first) => {
			let (head, tail) = page.split_at(first);
			format!("{}{}{}", head, script, tail[attr::BOOT_MARKER.len()..].replace(attr::BOOT_MARKER, ""))
		}
		None => page.to_owned(),
	}
}

/// Escapes text for use inside a double-quoted attribute value.
#[must_use]
pub fn escape(text: &str) -> String {
	let mut escaped = String::with_capacity(text.len());
	for c in text.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&quot;"),
			'\'' => escaped.push_str("&#39;"),
			c => escaped.push(c),
		}
	}
	escaped
}
