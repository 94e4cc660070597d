//! Browser bindings: [`WebDom`] over `web-sys`, [`XhrTransport`] over `XMLHttpRequest`, and a
//! [`Runtime`] that wires DOM events, a clock and completions into a [`Page`].

use crate::{
	client::{
		dispatch::{RequestId, Transport},
		dom::{Dom, NodeKind},
		page::{Event, Page, Settled},
		ClientError, EventKind, PageConfig,
	},
	protocol::{ErrorBody, WireRequest, WireResponse, CSRF_HEADER, PROTOCOL_HEADER},
};
use core::{
	cell::{Cell, RefCell},
	hash::{Hash, Hasher},
};
use hashbrown::{HashMap, HashSet};
use js_sys::Reflect;
use std::{collections::VecDeque, rc::Rc};
use tracing::{debug, error, instrument, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue, UnwrapThrowExt};
use web_sys::{
	CharacterData, Document, Element, HtmlInputElement, HtmlSelectElement, HtmlTemplateElement, HtmlTextAreaElement, KeyboardEvent, Node, XmlHttpRequest,
};

const NODE_ID_KEY: &str = "__liveDomId";

/// Ticker period of the debounce clock.
const TICK_MS: i32 = 25;

thread_local! {
	static NEXT_NODE_ID: Cell<u32> = const { Cell::new(1) };
}

/// A [`web_sys::Node`] with a stable identity, so it can be hashed.
#[derive(Debug, Clone)]
pub struct WebNode {
	id: u32,
	node: Node,
}

impl WebNode {
	#[must_use]
	pub fn node(&self) -> &Node {
		&self.node
	}
}

impl PartialEq for WebNode {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}
impl Eq for WebNode {}

impl Hash for WebNode {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

#[derive(Debug, Clone)]
pub struct WebDom {
	document: Document,
}

impl WebDom {
	#[must_use]
	pub fn new(document: Document) -> Self {
		Self { document }
	}

	/// Tags `node` with an expando id on first sight.
	pub fn wrap(&self, node: Node) -> WebNode {
		let key = JsValue::from_str(NODE_ID_KEY);
		let existing = Reflect::get(&node, &key).ok().and_then(|id| id.as_f64());
		#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
		let id = match existing {
			Some(id) => id as u32,
			None => {
				let id = NEXT_NODE_ID.with(|next| {
					let id = next.get();
					next.set(id.wrapping_add(1));
					id
				});
				if Reflect::set(&node, &key, &JsValue::from(id)).is_err() {
					error!(?node, "Failed to tag node.");
				}
				id
			}
		};
		WebNode { id, node }
	}

	fn element(node: &WebNode) -> Option<&Element> {
		node.node.dyn_ref::<Element>()
	}

	fn list(&self, nodes: &web_sys::NodeList) -> Vec<WebNode> {
		(0..nodes.length()).filter_map(|i| nodes.get(i)).map(|node| self.wrap(node)).collect()
	}
}

impl Dom for WebDom {
	type Node = WebNode;

	fn kind(&self, node: &WebNode) -> NodeKind {
		match node.node.node_type() {
			Node::ELEMENT_NODE => NodeKind::Element,
			Node::TEXT_NODE => NodeKind::Text,
			_ => NodeKind::Other,
		}
	}

	fn tag(&self, node: &WebNode) -> String {
		Self::element(node).map(|element| element.local_name().to_ascii_lowercase()).unwrap_or_default()
	}

	fn text(&self, node: &WebNode) -> String {
		node.node.dyn_ref::<CharacterData>().map(CharacterData::data).unwrap_or_default()
	}

	fn set_text(&mut self, node: &WebNode, text: &str) {
		match node.node.dyn_ref::<CharacterData>() {
			Some(data) => data.set_data(text),
			None => error!(node = ?node.node, "Tried to set text data of a non-text node."),
		}
	}

	fn parent(&self, node: &WebNode) -> Option<WebNode> {
		node.node.parent_node().map(|parent| self.wrap(parent))
	}

	fn children(&self, node: &WebNode) -> Vec<WebNode> {
		self.list(&node.node.child_nodes())
	}

	fn attributes(&self, node: &WebNode) -> Vec<(String, String)> {
		let Some(element) = Self::element(node) else { return vec![] };
		let attributes = element.attributes();
		(0..attributes.length()).filter_map(|i| attributes.item(i)).map(|attribute| (attribute.name(), attribute.value())).collect()
	}

	fn get_attribute(&self, node: &WebNode, name: &str) -> Option<String> {
		Self::element(node).and_then(|element| element.get_attribute(name))
	}

	fn set_attribute(&mut self, node: &WebNode, name: &str, value: &str) {
		match Self::element(node).map(|element| element.set_attribute(name, value)) {
			Some(Ok(())) => (),
			Some(Err(error)) => error!(?error, name, "Failed to set attribute."),
			None => error!(node = ?node.node, name, "Tried to set an attribute on a non-element."),
		}
	}

	fn remove_attribute(&mut self, node: &WebNode, name: &str) {
		if let Some(Err(error)) = Self::element(node).map(|element| element.remove_attribute(name)) {
			error!(?error, name, "Failed to remove attribute.");
		}
	}

	fn create_element(&mut self, tag: &str) -> WebNode {
		let element = self.document.create_element(tag).expect_throw("live-dom: Failed to create element.");
		self.wrap(element.into())
	}

	fn create_text(&mut self, text: &str) -> WebNode {
		self.wrap(self.document.create_text_node(text).into())
	}

	fn insert_before(&mut self, parent: &WebNode, child: &WebNode, reference: Option<&WebNode>) {
		if let Err(error) = parent.node.insert_before(&child.node, reference.map(|reference| &reference.node)) {
			error!(?error, "Failed to insert node.");
		}
	}

	fn remove_child(&mut self, parent: &WebNode, child: &WebNode) {
		if let Err(error) = parent.node.remove_child(&child.node) {
			error!(?error, "Failed to remove node.");
		}
	}

	fn parse_fragment(&mut self, html: &str) -> Vec<WebNode> {
		let template: HtmlTemplateElement = self
			.document
			.create_element("template")
			.expect_throw("live-dom: Failed to create <template>.")
			.unchecked_into();
		template.set_inner_html(html);
		let content: Node = template.content().into();
		self.list(&content.child_nodes())
	}

	fn value(&self, node: &WebNode) -> String {
		if let Some(input) = node.node.dyn_ref::<HtmlInputElement>() {
			input.value()
		} else if let Some(text_area) = node.node.dyn_ref::<HtmlTextAreaElement>() {
			text_area.value()
		} else if let Some(select) = node.node.dyn_ref::<HtmlSelectElement>() {
			select.value()
		} else {
			self.get_attribute(node, "value").unwrap_or_default()
		}
	}

	fn set_value(&mut self, node: &WebNode, value: &str) {
		if let Some(input) = node.node.dyn_ref::<HtmlInputElement>() {
			input.set_value(value);
		} else if let Some(text_area) = node.node.dyn_ref::<HtmlTextAreaElement>() {
			text_area.set_value(value);
		} else if let Some(select) = node.node.dyn_ref::<HtmlSelectElement>() {
			select.set_value(value);
		} else {
			self.set_attribute(node, "value", value);
		}
	}

	fn checked(&self, node: &WebNode) -> bool {
		node.node.dyn_ref::<HtmlInputElement>().map_or(false, HtmlInputElement::checked)
	}

	fn set_checked(&mut self, node: &WebNode, checked: bool) {
		if let Some(input) = node.node.dyn_ref::<HtmlInputElement>() {
			input.set_checked(checked);
		}
	}
}

type Completion = (RequestId, Result<WireResponse, ClientError>);

/// POSTs component calls to one endpoint. Completions queue up until [`Transport::poll`].
pub struct XhrTransport {
	endpoint: String,
	next_id: u64,
	in_flight: HashMap<RequestId, XmlHttpRequest>,
	/// Requests whose `abort` event fired, whether the page or the browser cancelled them.
	aborted: Rc<RefCell<HashSet<RequestId>>>,
	completions: Rc<RefCell<VecDeque<Completion>>>,
	wake: Rc<RefCell<Option<Box<dyn Fn()>>>>,
}

impl XhrTransport {
	#[must_use]
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self {
			endpoint: endpoint.into(),
			next_id: 0,
			in_flight: HashMap::new(),
			aborted: Rc::default(),
			completions: Rc::default(),
			wake: Rc::default(),
		}
	}

	/// Called after each queued completion.
	pub fn set_waker(&mut self, wake: impl Fn() + 'static) {
		*self.wake.borrow_mut() = Some(Box::new(wake));
	}

	fn open(&self, id: RequestId, request: &WireRequest) -> Result<XmlHttpRequest, JsValue> {
		let xhr = XmlHttpRequest::new()?;
		xhr.open_with_async("POST", &self.endpoint, true)?;
		xhr.set_request_header("Content-Type", "application/x-www-form-urlencoded")?;
		xhr.set_request_header(PROTOCOL_HEADER, "true")?;
		if let Some(token) = &request.token {
			xhr.set_request_header(CSRF_HEADER, token)?;
		}

		let aborted = Rc::clone(&self.aborted);
		let on_abort = Closure::once_into_js(move || {
			aborted.borrow_mut().insert(id);
		});
		xhr.set_onabort(Some(on_abort.unchecked_ref()));

		let aborted = Rc::clone(&self.aborted);
		let completions = Rc::clone(&self.completions);
		let wake = Rc::clone(&self.wake);
		let handle = xhr.clone();
		let on_load_end = Closure::once_into_js(move || {
			let result = if aborted.borrow_mut().remove(&id) {
				Err(ClientError::Aborted)
			} else {
				read_response(&handle)
			};
			completions.borrow_mut().push_back((id, result));
			if let Some(wake) = wake.borrow().as_ref() {
				wake();
			}
		});
		xhr.set_onloadend(Some(on_load_end.unchecked_ref()));
		xhr.send_with_opt_str(Some(&request.to_form()))?;
		Ok(xhr)
	}
}

impl Transport for XhrTransport {
	#[instrument(skip(self, request), fields(component = %request.component))]
	fn send(&mut self, request: WireRequest) -> RequestId {
		self.next_id += 1;
		let id = RequestId(self.next_id);
		match self.open(id, &request) {
			Ok(xhr) => {
				self.in_flight.insert(id, xhr);
			}
			Err(error) => {
				error!(?error, "Failed to send component call.");
				self.completions.borrow_mut().push_back((id, Err(ClientError::Network(format!("{:?}", error)))));
			}
		}
		id
	}

	fn abort(&mut self, id: RequestId) {
		if let Some(xhr) = self.in_flight.remove(&id) {
			self.aborted.borrow_mut().insert(id);
			if let Err(error) = xhr.abort() {
				warn!(?error, "Failed to abort request.");
			}
		}
	}

	fn poll(&mut self) -> Vec<Completion> {
		let completions: Vec<Completion> = self.completions.borrow_mut().drain(..).collect();
		for (id, _) in &completions {
			self.in_flight.remove(id);
		}
		completions
	}
}

fn read_response(xhr: &XmlHttpRequest) -> Result<WireResponse, ClientError> {
	let status = xhr.status().map_err(|error| ClientError::Network(format!("{:?}", error)))?;
	classify(status, &xhr.response_text().ok().flatten().unwrap_or_default())
}

fn classify(status: u16, body: &str) -> Result<WireResponse, ClientError> {
	match status {
		0 => Err(ClientError::Network("no response".to_owned())),
		200..=299 => serde_json::from_str(body).map_err(|error| ClientError::Decode(error.to_string())),
		status => Err(ClientError::Http {
			status,
			message: serde_json::from_str::<ErrorBody>(body).map_or_else(|_| format!("HTTP {}", status), |body| body.message),
		}),
	}
}

pub type WebPage = Page<WebDom, XhrTransport>;

/// Keeps a [`WebPage`] running: delegated event listeners, the debounce clock and completion handling.
///
/// Dropping the runtime detaches it.
pub struct Runtime {
	page: Rc<RefCell<WebPage>>,
	document: Document,
	listeners: Vec<(EventKind, Closure<dyn FnMut(web_sys::Event)>)>,
	ticker: Option<(i32, Closure<dyn FnMut()>)>,
}

impl Runtime {
	/// Mounts every live component in `document` and starts listening.
	#[instrument(skip(document, config))]
	pub fn start(document: Document, endpoint: &str, config: PageConfig) -> Result<Self, JsValue> {
		let dom = WebDom::new(document.clone());
		let body: Node = document.body().ok_or_else(|| JsValue::from_str("live-dom: The document has no body."))?.into();
		let root = dom.wrap(body);
		let page = Rc::new(RefCell::new(Page::new(dom, root, XhrTransport::new(endpoint), config)));

		let weak = Rc::downgrade(&page);
		page.borrow_mut().transport_mut().set_waker(move || {
			if let Some(page) = weak.upgrade() {
				match page.try_borrow_mut() {
					Ok(mut page) => settle(&mut page),
					Err(_) => debug!("Page busy. Completion stays queued."),
				}
			}
		});

		let mut runtime = Self {
			page: Rc::clone(&page),
			document: document.clone(),
			listeners: vec![],
			ticker: None,
		};

		for kind in EventKind::ALL {
			let weak = Rc::downgrade(&page);
			let listener = Closure::wrap(Box::new(move |event: web_sys::Event| {
				let Some(page) = weak.upgrade() else { return };
				let Some(target) = event.target().and_then(|target| target.dyn_into::<Node>().ok()) else { return };
				let Ok(mut page) = page.try_borrow_mut() else {
					return warn!(event = kind.name(), "Re-entrant event ignored.");
				};
				let target = page.dom().wrap(target);
				let key = event.dyn_ref::<KeyboardEvent>().map(KeyboardEvent::key);
				page.advance(now_ms());
				if page.dispatch_event(&target, kind, &Event { key }) {
					event.prevent_default();
				}
				settle(&mut page);
			}) as Box<dyn FnMut(web_sys::Event)>);
			document.add_event_listener_with_callback(kind.name(), listener.as_ref().unchecked_ref())?;
			runtime.listeners.push((kind, listener));
		}

		let weak = Rc::downgrade(&page);
		let tick = Closure::wrap(Box::new(move || {
			if let Some(Ok(mut page)) = weak.upgrade().as_ref().map(|page| page.try_borrow_mut()) {
				if page.advance(now_ms()) > 0 {
					settle(&mut page);
				}
			}
		}) as Box<dyn FnMut()>);
		let window = web_sys::window().ok_or_else(|| JsValue::from_str("live-dom: No window."))?;
		let handle = window.set_interval_with_callback_and_timeout_and_arguments_0(tick.as_ref().unchecked_ref(), TICK_MS)?;
		runtime.ticker = Some((handle, tick));

		{
			let mut page = page.borrow_mut();
			let mounted = page.scan();
			debug!(mounted, "Started.");
			settle(&mut page);
		}
		Ok(runtime)
	}

	#[must_use]
	pub fn page(&self) -> &Rc<RefCell<WebPage>> {
		&self.page
	}
}

impl Drop for Runtime {
	fn drop(&mut self) {
		for (kind, listener) in self.listeners.drain(..) {
			if let Err(error) = self.document.remove_event_listener_with_callback(kind.name(), listener.as_ref().unchecked_ref()) {
				error!(?error, "Failed to remove event listener.");
			}
		}
		if let (Some((handle, _)), Some(window)) = (self.ticker.take(), web_sys::window()) {
			window.clear_interval_with_handle(handle);
		}
	}
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn now_ms() -> u64 {
	js_sys::Date::now() as u64
}

/// Applies queued completions and follows redirects.
fn settle(page: &mut WebPage) {
	for settled in page.pump() {
		if let Settled::Redirect { url, .. } = settled {
			match web_sys::window().map(|window| window.location().set_href(&url)) {
				Some(Ok(())) => (),
				Some(Err(error)) => error!(?error, "Failed to navigate."),
				None => error!("No window to navigate."),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(0, "", ClientError::Network("no response".to_owned()))]
	#[case(500, r#"{"message":"Server error"}"#, ClientError::Http { status: 500, message: "Server error".to_owned() })]
	#[case(502, "<html>bad gateway</html>", ClientError::Http { status: 502, message: "HTTP 502".to_owned() })]
	fn failed_statuses_are_classified(#[case] status: u16, #[case] body: &str, #[case] expected: ClientError) {
		assert_eq!(classify(status, body), Err(expected));
	}

	#[test]
	fn success_bodies_are_decoded() {
		assert!(matches!(classify(200, r#"{"content":"<p>1</p>","extender":[]}"#), Ok(WireResponse::Content { .. })));
		assert!(matches!(classify(204, "not json"), Err(ClientError::Decode(_))));
	}
}
