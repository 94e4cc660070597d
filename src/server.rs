//! The dispatch boundary: one self-contained invocation per request.

use crate::{
	action::ActionExpression,
	auth::AuthGate,
	collaborators::{CsrfTokens, FlashStore, NoTemplates, TemplateRenderer},
	component::Registry,
	config::Config,
	error::{Error, Result},
	extension::ExtensionQueue,
	fragment::{bootstrap, MountMode, RenderPass, RenderedFragment, Renderer},
	identity::OpaqueCodec,
	invoke::Services,
	properties::PropertySnapshot,
	protocol::{ErrorBody, WireRequest, WireResponse, CSRF_HEADER, PROTOCOL_HEADER},
};
use http::{
	header::{HeaderValue, CONTENT_TYPE},
	request::Parts,
	Request, Response, StatusCode,
};
use serde_json::{Map, Value};
use std::{
	error::Error as _,
	panic::{self, AssertUnwindSafe},
	time::Instant,
};
use tracing::{debug, error, info, instrument, warn};

/// Serves live component calls.
///
/// Holds only registration data, so one instance can serve concurrent requests.
pub struct Server {
	config: Config,
	codec: OpaqueCodec,
	registry: Registry,
	gate: AuthGate,
	templates: Box<dyn TemplateRenderer>,
	csrf: Box<dyn CsrfTokens>,
}

impl core::fmt::Debug for Server {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Server").field("config", &self.config).field("registry", &self.registry).field("gate", &self.gate).finish_non_exhaustive()
	}
}

impl Server {
	#[must_use]
	pub fn new(config: Config, registry: Registry, csrf: impl CsrfTokens + 'static) -> Self {
		Self {
			codec: OpaqueCodec::new(&config.codec_key),
			config,
			registry,
			gate: AuthGate::new(),
			templates: Box::new(NoTemplates),
			csrf: Box::new(csrf),
		}
	}

	#[must_use]
	pub fn with_templates(mut self, templates: impl TemplateRenderer + 'static) -> Self {
		self.templates = Box::new(templates);
		self
	}

	#[must_use]
	pub fn with_authenticator(mut self, authenticator: impl Fn(&Parts) -> bool + Send + Sync + 'static) -> Self {
		self.gate = AuthGate::with_authenticator(authenticator);
		self
	}

	#[must_use]
	pub fn codec(&self) -> &OpaqueCodec {
		&self.codec
	}

	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	fn renderer(&self) -> Renderer<'_> {
		Renderer {
			registry: &self.registry,
			codec: &self.codec,
			templates: self.templates.as_ref(),
			gate: &self.gate,
			config: &self.config,
		}
	}

	/// Mounts a root component while rendering a page.
	///
	/// Use one [`RenderPass`] per page, so repeated mounts get distinct identities.
	pub fn mount(&self, type_ref: &str, args: &[Value], mode: MountMode, pass: &mut RenderPass, request: &Parts) -> Result<RenderedFragment> {
		self.renderer().mount(type_ref, args, mode, pass, request)
	}

	/// Inserts the client bootstrap script into a rendered page.
	#[must_use]
	pub fn bootstrap(&self, page: &str) -> String {
		bootstrap(page, &self.config.client_script)
	}

	/// Handles one protocol call. Never fails: errors become error responses.
	#[instrument(skip(self, request, flash), fields(uri = %request.uri()))]
	pub fn handle(&self, request: Request<String>, flash: &mut dyn FlashStore) -> Response<String> {
		let (parts, body) = request.into_parts();
		let outcome = self.check(&parts, &body).and_then(|wire| {
			panic::catch_unwind(AssertUnwindSafe(|| self.call(&parts, &wire, flash))).unwrap_or_else(|payload| {
				let message = payload
					.downcast_ref::<&str>()
					.map(|message| (*message).to_owned())
					.or_else(|| payload.downcast_ref::<String>().cloned())
					.unwrap_or_else(|| "unknown panic payload".to_owned());
				Err(Error::Panic(message))
			})
		});

		match outcome.and_then(|response| Ok(serde_json::to_string(&response)?)) {
			Ok(json) => json_response(StatusCode::OK, json),
			Err(error) => self.error_response(&error),
		}
	}

	fn check(&self, parts: &Parts, body: &str) -> Result<WireRequest> {
		if !parts.headers.contains_key(PROTOCOL_HEADER) {
			return Err(Error::MalformedRequest(format!("missing `{}` header", PROTOCOL_HEADER)));
		}

		let wire = WireRequest::from_form(body)?;
		let presented = parts.headers.get(CSRF_HEADER).and_then(|value| value.to_str().ok()).map(str::to_owned).or_else(|| wire.token.clone());
		match presented {
			Some(token) if token == self.csrf.current() => Ok(wire),
			Some(_) => {
				warn!("CSRF token mismatch.");
				Err(Error::Unauthorized)
			}
			None => {
				warn!("CSRF token missing.");
				Err(Error::Unauthorized)
			}
		}
	}

	/// Runs a decoded call: rebuild, gate, invoke, render.
	#[instrument(skip(self, parts, wire, flash), fields(method = %wire.method))]
	pub fn call(&self, parts: &Parts, wire: &WireRequest, flash: &mut dyn FlashStore) -> Result<WireResponse> {
		let started_at = Instant::now();
		let identity = self.codec.decode_identity(&wire.component)?;
		let registration = self.registry.get(&identity.type_ref).map_err(|error| {
			error!(component = %identity, "Identity resolves to an unregistered component. Client and server are out of sync.");
			error
		})?;

		let submitted = PropertySnapshot::restrict(&PropertySnapshot::decode(&wire.properties, &self.codec)?, registration.schema());
		let merged = submitted.merge(registration.schema(), &wire.models);
		let (properties, models): (Vec<&str>, Vec<&String>) = (merged.keys().collect(), wire.models.keys().collect());
		debug!(component = %identity, ?properties, ?models, "Rebuilding component.");
		let mut component = registration
			.hydrate(&merged)
			.map_err(|error| Error::MalformedRequest(format!("`_properties` do not describe a `{}`: {}", identity.type_ref, error)))?;

		self.gate.verify(component.as_ref(), parts)?;

		let expression = ActionExpression::parse(&wire.method)?;
		let mut services = Services::new(ExtensionQueue::new(&self.registry, &self.codec), flash);
		component.invoke(&expression, &mut services)?;

		let redirect = services.redirect.take();
		let skip_render = services.skip_render;
		let extender = services.extensions.drain();
		drop(services);

		if let Some(redirect) = redirect {
			info!(component = %identity, "Redirecting.");
			let flashed: Map<String, Value> = flash.flashed().into_iter().collect();
			return Ok(WireResponse::Redirect {
				redirect,
				flash: if flashed.is_empty() { None } else { Some(flashed) },
			});
		}

		if skip_render {
			debug!(component = %identity, extensions = extender.len(), "Render skipped.");
			return Ok(WireResponse::Content { content: String::new(), extender });
		}

		let mut pass = RenderPass::with_compiled(wire.compiled.clone());
		let fragment = RenderedFragment {
			extensions: extender,
			..self.renderer().render(component.as_ref(), &identity, started_at, &mut pass, parts)?
		};
		debug!(component = %identity, duration_ms = fragment.duration_ms, extensions = fragment.extensions.len(), "Rendered.");
		Ok(WireResponse::Content {
			content: fragment.html,
			extender: fragment.extensions,
		})
	}

	fn error_response(&self, error: &Error) -> Response<String> {
		let status = error.status();
		match error {
			Error::MalformedRequest(_) => warn!(%error, "Rejected malformed call."),
			Error::Unauthorized => info!("Rejected unauthorized call."),
			_ => error!(%error, kind = error.kind(), "Component call failed."),
		}

		let body = if self.config.debug {
			let mut trace = vec![];
			let mut source = error.source();
			while let Some(cause) = source {
				trace.push(cause.to_string());
				source = cause.source();
			}
			ErrorBody {
				message: error.to_string(),
				kind: Some(error.kind().to_owned()),
				file: error.location().map(|location| location.file().to_owned()),
				line: error.location().map(|location| location.line()),
				trace,
			}
		} else {
			ErrorBody {
				message: error.public_message(),
				..ErrorBody::default()
			}
		};

		let json = serde_json::to_string(&body).unwrap_or_else(|_| r#"{"message":"Server error"}"#.to_owned());
		json_response(status, json)
	}
}

fn json_response(status: StatusCode, json: String) -> Response<String> {
	let mut response = Response::new(json);
	*response.status_mut() = status;
	response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
	response
}
