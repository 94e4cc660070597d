use core::mem;
use http::Request;
use live_dom::{
	client::{
		dom::{find_by_attribute, inner_html, outer_html},
		memory::NodeId,
		page::Event,
		ClientError, DispatchState, Dom, EventKind, MemoryDom, Page, PageConfig, ReconcileMode, RequestId, Settled, Transport,
	},
	collaborators::{MemoryFlash, StaticToken},
	extension::ExtensionCall,
	protocol::{ErrorBody, WireRequest, WireResponse},
	Component, Config, Field, FieldKind, Invocation, Markup, Method, MountMode, Param, Registry, RenderContext, RenderPass, Result, Server,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

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

fn page_with(html: &str, config: PageConfig) -> Page<MemoryDom, Outbox> {
	let dom = MemoryDom::parse(html);
	let body = dom.body();
	let mut page = Page::new(dom, body, Outbox::default(), config);
	page.scan();
	page
}

fn page(html: &str) -> Page<MemoryDom, Outbox> {
	page_with(html, PageConfig::default())
}

fn element<T: Transport>(page: &Page<MemoryDom, T>, name: &str, value: &str) -> NodeId {
	find_by_attribute(page.dom(), &page.dom().body(), name, value).unwrap()
}

fn body<T: Transport>(page: &Page<MemoryDom, T>) -> String {
	inner_html(page.dom(), &page.dom().body())
}

fn content(html: &str) -> Result<WireResponse, ClientError> {
	Ok(WireResponse::Content {
		content: html.to_owned(),
		extender: vec![],
	})
}

#[test]
fn debounce_sends_the_last_value_once() {
	let mut page = page(r#"<div live:id="c" live:props="p"><input live:model.300ms="q"></div>"#);
	let input = element(&page, "live:model.300ms", "q");

	for (now_ms, value) in [(0, "r"), (50, "ru"), (100, "rus")] {
		page.advance(now_ms);
		page.dom_mut().set_value(&input, value);
		page.dispatch_event(&input, EventKind::Input, &Event::default());
	}

	assert_eq!(page.advance(399), 0);
	assert!(page.transport().sent.is_empty());
	assert_eq!(page.advance(400), 1);

	let sent = &page.transport().sent;
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].component, "c");
	assert_eq!(sent[0].properties, "p");
	assert_eq!(sent[0].method, "$refresh");
	assert_eq!(Value::Object(sent[0].models.clone()), json!({ "q": "rus" }));
}

#[test]
fn last_write_wins() {
	let mut page = page(r#"<div live:id="c"><button live:click="a">A</button><button live:click="b">B</button></div>"#);
	let (a, b) = (element(&page, "live:click", "a"), element(&page, "live:click", "b"));

	page.dispatch_event(&a, EventKind::Click, &Event::default());
	page.dispatch_event(&b, EventKind::Click, &Event::default());
	assert_eq!(page.transport().aborted, [RequestId(1)]);
	assert_eq!(page.state("c"), Some(DispatchState::Pending));

	assert_eq!(page.complete(RequestId(1), content(r#"<div live:id="c"><p>from a</p></div>"#)), Settled::Stale);
	assert!(body(&page).contains("<button"));

	assert!(matches!(page.complete(RequestId(2), content(r#"<div live:id="c"><p>from b</p></div>"#)), Settled::Patched { .. }));
	assert_eq!(body(&page), r#"<div live:id="c"><p>from b</p></div>"#);
	assert_eq!(page.state("c"), Some(DispatchState::Idle));
}

#[test]
fn redirects_are_handed_to_the_host() {
	let mut page = page(r#"<div live:id="c"><button live:click="save">Save</button></div>"#);
	let button = element(&page, "live:click", "save");
	page.dispatch_event(&button, EventKind::Click, &Event::default());

	let settled = page.complete(
		RequestId(1),
		Ok(WireResponse::Redirect {
			redirect: "/done".to_owned(),
			flash: None,
		}),
	);
	assert_eq!(
		settled,
		Settled::Redirect {
			url: "/done".to_owned(),
			flash: None
		}
	);
}

#[test]
fn failures_are_shown_in_the_component() {
	let markup = r#"<div live:id="c"><button live:click="go">Go</button></div>"#;
	let failure = || -> Result<WireResponse, ClientError> {
		Err(ClientError::Http {
			status: 500,
			message: "Server error".to_owned(),
		})
	};

	let mut page = page(markup);
	let button = element(&page, "live:click", "go");
	page.dispatch_event(&button, EventKind::Click, &Event::default());
	assert!(matches!(page.complete(RequestId(1), failure()), Settled::Failed(ClientError::Http { status: 500, .. })));
	assert_eq!(
		body(&page),
		r#"<div live:id="c"><button live:click="go">Go</button><div live:error>Server error (HTTP 500)</div></div>"#
	);

	let mut quiet = page_with(
		markup,
		PageConfig {
			show_errors: false,
			..PageConfig::default()
		},
	);
	let button = element(&quiet, "live:click", "go");
	quiet.dispatch_event(&button, EventKind::Click, &Event::default());
	quiet.complete(RequestId(1), failure());
	assert_eq!(body(&quiet), markup);
}

#[test]
fn extensions_reach_every_instance_of_the_base_token() {
	let mut page = page(r#"<div live:id="A"><button live:click="notify">!</button></div><div live:id="B"></div><div live:id="B.1"></div><div live:id="C"></div>"#);
	let button = element(&page, "live:click", "notify");
	page.dispatch_event(&button, EventKind::Click, &Event::default());

	let settled = page.complete(
		RequestId(1),
		Ok(WireResponse::Content {
			content: String::new(),
			extender: vec![ExtensionCall {
				target: "B".to_owned(),
				method: "reload()".to_owned(),
			}],
		}),
	);
	assert_eq!(settled, Settled::Skipped { extensions: 2 });

	let calls: Vec<(&str, &str)> = page.transport().sent[1..].iter().map(|call| (call.component.as_str(), call.method.as_str())).collect();
	assert_eq!(calls, [("B", "reload()"), ("B.1", "reload()")]);
	assert!(body(&page).contains("<button"));
}

#[test]
fn target_overrides_the_owner() {
	let mut page = page(r#"<div live:id="A"><button live:click="open" live:target="B.1">1</button><button live:click="open" live:target="B.7">7</button></div><div live:id="B"></div><div live:id="B.1"></div>"#);
	let exact = element(&page, "live:target", "B.1");
	let by_base = element(&page, "live:target", "B.7");

	page.dispatch_event(&exact, EventKind::Click, &Event::default());
	page.dispatch_event(&by_base, EventKind::Click, &Event::default());

	let targets: Vec<&str> = page.transport().sent.iter().map(|call| call.component.as_str()).collect();
	assert_eq!(targets, ["B.1", "B"]);
}

#[test]
fn init_fires_once() {
	let mut page = page(r#"<div live:id="s" live:init="$refresh"></div>"#);
	assert_eq!(page.transport().sent.len(), 1);
	assert_eq!(page.transport().sent[0].method, "$refresh");

	assert_eq!(page.scan(), 0);
	assert_eq!(page.transport().sent.len(), 1);

	page.complete(RequestId(1), content(r#"<div live:id="s" live:init="$refresh"><p>loaded</p></div>"#));
	assert_eq!(page.transport().sent.len(), 1);
	assert!(body(&page).contains("<p>loaded</p>"));
}

#[test]
fn patched_scripts_run_once() {
	let mut page = page(r#"<div live:id="c"><button live:click="go">Go</button></div>"#);
	let response = r#"<div live:id="c"><script>ping()</script></div>"#;

	page.submit("c", "go", ReconcileMode::Patch, false).unwrap();
	assert!(matches!(page.complete(RequestId(1), content(response)), Settled::Patched { scripts: 1, .. }));

	page.submit("c", "go", ReconcileMode::Patch, false).unwrap();
	assert!(matches!(page.complete(RequestId(2), content(response)), Settled::Patched { scripts: 0, .. }));
}

#[test]
fn key_filters() {
	let mut page = page(r#"<div live:id="c"><input live:keydown.enter="search"></div>"#);
	let input = element(&page, "live:keydown.enter", "search");

	page.dispatch_event(&input, EventKind::KeyDown, &Event::key("a"));
	assert!(page.transport().sent.is_empty());

	page.dispatch_event(&input, EventKind::KeyDown, &Event::key("Enter"));
	assert_eq!(page.transport().sent.len(), 1);
}

#[test]
fn submissions_are_prevented_and_cleared() {
	let mut page = page(r#"<div live:id="c"><form live:submit.clear="save"><input live:model.defer="title"></form></div>"#);
	let form = element(&page, "live:submit.clear", "save");
	let input = element(&page, "live:model.defer", "title");
	page.dom_mut().set_value(&input, "draft");

	assert!(page.dispatch_event(&form, EventKind::Submit, &Event::default()));
	assert_eq!(Value::Object(page.transport().sent[0].models.clone()), json!({ "title": "draft" }));

	page.complete(RequestId(1), content(r#"<div live:id="c"><form live:submit.clear="save"><input live:model.defer="title"></form></div>"#));
	let input = element(&page, "live:model.defer", "title");
	assert_eq!(page.dom().value(&input), "");
}

#[test]
fn removed_components_are_forgotten() {
	let mut page = page(r#"<div live:id="list"><div live:id="row"><button live:click="go">Go</button></div></div>"#);
	assert_eq!(page.components(), ["list", "row"]);

	page.submit("list", "$refresh", ReconcileMode::Patch, false).unwrap();
	page.complete(RequestId(1), content(r#"<div live:id="list"><p>empty</p></div>"#));
	assert_eq!(page.components(), ["list"]);
	assert_eq!(page.submit("row", "go", ReconcileMode::Patch, false), Err(ClientError::MissingComponent("row".to_owned())));
}

#[test]
fn patched_away_directives_stop_matching() {
	let mut page = page(r#"<div live:id="c"><a id="l" live:click.prevent="go">Go</a></div>"#);
	let link = element(&page, "id", "l");
	assert!(page.dispatch_event(&link, EventKind::Click, &Event::default()));
	assert_eq!(page.transport().sent.len(), 1);

	page.complete(RequestId(1), content(r#"<div live:id="c"><a id="l" href="/next">Go</a></div>"#));
	assert_eq!(element(&page, "id", "l"), link);

	assert!(!page.dispatch_event(&link, EventKind::Click, &Event::default()));
	assert_eq!(page.transport().sent.len(), 1);
}

/// Answers calls with a real [`Server`], queueing completions like a browser would.
struct Loopback {
	server: Server,
	next: u64,
	done: Vec<(RequestId, Result<WireResponse, ClientError>)>,
}

impl Transport for Loopback {
	fn send(&mut self, request: WireRequest) -> RequestId {
		self.next += 1;
		let id = RequestId(self.next);
		let http = Request::builder().method("POST").uri("/live").header("x-live", "true").body(request.to_form()).unwrap();
		let response = self.server.handle(http, &mut MemoryFlash::default());
		let result = if response.status().is_success() {
			serde_json::from_str(response.body()).map_err(|error| ClientError::Decode(error.to_string()))
		} else {
			Err(ClientError::Http {
				status: response.status().as_u16(),
				message: serde_json::from_str::<ErrorBody>(response.body()).map(|body| body.message).unwrap_or_default(),
			})
		};
		self.done.push((id, result));
		id
	}

	fn abort(&mut self, id: RequestId) {
		self.done.retain(|(done, _)| *done != id);
	}

	fn poll(&mut self) -> Vec<(RequestId, Result<WireResponse, ClientError>)> {
		mem::take(&mut self.done)
	}
}

#[derive(Serialize, Deserialize)]
struct Tally {
	count: i64,
}

impl Tally {
	fn add(&mut self, invocation: &mut Invocation<'_, '_>) -> Result<()> {
		self.count += invocation.optional::<i64>(0)?.unwrap_or(1);
		Ok(())
	}
}

impl Component for Tally {
	const TYPE_REF: &'static str = "page::Tally";
	const SCHEMA: &'static [Field] = &[Field::new("count", FieldKind::Number)];
	const METHODS: &'static [Method<Self>] = &[Method {
		name: "add",
		params: &[Param::Optional("amount")],
		handler: Self::add,
	}];

	fn mount(_: &[Value]) -> Result<Self> {
		Ok(Self { count: 0 })
	}

	fn render(&self, _: &mut RenderContext<'_>) -> Result<Markup> {
		Ok(format!(r#"<p>{}</p><button live:click="add">+1</button><button live:click="add(10)">+10</button>"#, self.count).into())
	}
}

#[test]
fn round_trip_through_a_server() {
	let mut registry = Registry::new();
	registry.register::<Tally>();
	let server = Server::new(Config::default(), registry, StaticToken("csrf".to_owned()));
	let request = Request::builder().body(()).unwrap().into_parts().0;
	let fragment = server.mount(Tally::TYPE_REF, &[], MountMode::Eager, &mut RenderPass::new(), &request).unwrap();

	let dom = MemoryDom::parse(&fragment.html);
	let root = dom.body();
	let transport = Loopback { server, next: 0, done: vec![] };
	let mut page = Page::new(
		dom,
		root,
		transport,
		PageConfig {
			csrf_token: Some("csrf".to_owned()),
			..PageConfig::default()
		},
	);
	assert_eq!(page.scan(), 1);

	let plus_ten = element(&page, "live:click", "add(10)");
	page.dispatch_event(&plus_ten, EventKind::Click, &Event::default());
	assert!(matches!(page.pump().as_slice(), [Settled::Patched { .. }]));
	assert!(body(&page).contains("<p>10</p>"), "{}", body(&page));

	let plus_one = element(&page, "live:click", "add");
	page.dispatch_event(&plus_one, EventKind::Click, &Event::default());
	assert!(matches!(page.pump().as_slice(), [Settled::Patched { .. }]));
	assert!(body(&page).contains("<p>11</p>"), "{}", body(&page));

	let token = page.components()[0].to_owned();
	let root = *page.component_root(&token).unwrap();
	assert!(outer_html(page.dom(), &root).starts_with(&format!(r#"<div live:id="{}""#, token)));
}
