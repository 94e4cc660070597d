//! Action invocation against a component's method table.

use crate::{
	action::ActionExpression,
	collaborators::FlashStore,
	error::{Error, Result},
	extension::ExtensionQueue,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};

/// Hooks that belong to the renderer and lifecycle, never callable from the client.
pub const RESERVED: &[&str] = &["render", "mount", "skeleton", "authorize", "hydrate", "requires_authentication"];

#[must_use]
pub fn is_reserved(name: &str) -> bool {
	RESERVED.contains(&name)
}

/// A collaborator a method receives instead of a positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
	Extensions,
	Flash,
	Redirect,
}

/// One declared method parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
	Required(&'static str),
	Optional(&'static str),
	Inject(Collaborator),
}

impl Param {
	fn is_positional(self) -> bool {
		!matches!(self, Self::Inject(_))
	}
}

/// A client-callable action.
pub struct Method<C> {
	pub name: &'static str,
	pub params: &'static [Param],
	pub handler: fn(&mut C, &mut Invocation<'_, '_>) -> Result<()>,
}

impl<C> Method<C> {
	/// `(required, total)` positional parameter counts.
	#[must_use]
	pub fn arity(&self) -> (usize, usize) {
		let required = self.params.iter().filter(|param| matches!(param, Param::Required(_))).count();
		let total = self.params.iter().filter(|param| param.is_positional()).count();
		(required, total)
	}
}

/// Per-request side channels an action may write to.
pub struct Services<'r> {
	pub(crate) extensions: ExtensionQueue<'r>,
	pub(crate) flash: &'r mut dyn FlashStore,
	pub(crate) redirect: Option<String>,
	pub(crate) skip_render: bool,
}

impl<'r> Services<'r> {
	pub fn new(extensions: ExtensionQueue<'r>, flash: &'r mut dyn FlashStore) -> Self {
		Self {
			extensions,
			flash,
			redirect: None,
			skip_render: false,
		}
	}

	#[must_use]
	pub fn redirect(&self) -> Option<&str> {
		self.redirect.as_deref()
	}

	#[must_use]
	pub fn skips_render(&self) -> bool {
		self.skip_render
	}

	pub fn extensions(&mut self) -> &mut ExtensionQueue<'r> {
		&mut self.extensions
	}
}

/// Arguments and collaborators of one method call.
pub struct Invocation<'s, 'r> {
	method: &'static str,
	args: Vec<Option<Value>>,
	injected: Vec<Collaborator>,
	services: &'s mut Services<'r>,
}

impl<'s, 'r> Invocation<'s, 'r> {
	/// The `index`th positional argument, if supplied.
	#[must_use]
	pub fn arg(&self, index: usize) -> Option<&Value> {
		self.args.get(index).and_then(Option::as_ref)
	}

	pub fn required<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
		match self.arg(index) {
			Some(value) => serde_json::from_value(value.clone()).map_err(|error| Error::invalid_action(self.method, format!("argument {}: {}", index, error))),
			None => Err(Error::invalid_action(self.method, format!("argument {} missing", index))),
		}
	}

	pub fn optional<T: DeserializeOwned>(&self, index: usize) -> Result<Option<T>> {
		self.arg(index).map(|_| self.required(index)).transpose()
	}

	fn collaborator(&self, collaborator: Collaborator) -> Result<()> {
		if self.injected.contains(&collaborator) {
			Ok(())
		} else {
			Err(Error::action(format!("`{}` does not declare `Param::Inject(Collaborator::{:?})`", self.method, collaborator)))
		}
	}

	pub fn extensions(&mut self) -> Result<&mut ExtensionQueue<'r>> {
		self.collaborator(Collaborator::Extensions)?;
		Ok(&mut self.services.extensions)
	}

	pub fn flash(&mut self) -> Result<&mut dyn FlashStore> {
		self.collaborator(Collaborator::Flash)?;
		Ok(&mut *self.services.flash)
	}

	/// Ends the call with a redirect instead of a re-render.
	pub fn redirect(&mut self, url: impl Into<String>) -> Result<()> {
		self.collaborator(Collaborator::Redirect)?;
		self.services.redirect = Some(url.into());
		Ok(())
	}

	/// Responds with an empty body, so only queued extensions take effect.
	pub fn skip_render(&mut self) {
		self.services.skip_render = true;
	}
}

/// Resolves `expression` against `methods` and calls it on `component`.
#[instrument(skip(component, methods, expression, services), fields(expression = %expression))]
pub fn invoke<C>(component: &mut C, methods: &'static [Method<C>], expression: &ActionExpression, services: &mut Services<'_>) -> Result<()> {
	if expression.is_refresh() {
		debug!("Refresh only.");
		return Ok(());
	}

	if is_reserved(&expression.name) {
		return Err(Error::invalid_action(expression.to_string(), format!("`{}` is reserved", expression.name)));
	}

	let method = methods
		.iter()
		.find(|method| method.name == expression.name)
		.ok_or_else(|| Error::invalid_action(expression.to_string(), format!("unknown method `{}`", expression.name)))?;

	let (required, total) = method.arity();
	let supplied = expression.args.len();
	if supplied < required || supplied > total {
		return Err(Error::invalid_action(
			expression.to_string(),
			format!("`{}` takes {}..={} arguments but {} were supplied", method.name, required, total, supplied),
		));
	}

	let mut supplied_args = expression.args.iter();
	let mut args = Vec::with_capacity(total);
	let mut injected = vec![];
	for param in method.params {
		match param {
			Param::Inject(collaborator) => injected.push(*collaborator),
			Param::Required(_) | Param::Optional(_) => args.push(supplied_args.next().map(|arg| arg.to_value())),
		}
	}

	let mut invocation = Invocation {
		method: method.name,
		args,
		injected,
		services,
	};
	(method.handler)(component, &mut invocation)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{collaborators::MemoryFlash, component::Registry, identity::OpaqueCodec};
	use rstest::rstest;
	use serde_json::json;

	#[derive(Default)]
	struct Tally {
		total: i64,
		last_label: Option<String>,
	}

	impl Tally {
		fn add(&mut self, invocation: &mut Invocation<'_, '_>) -> Result<()> {
			self.total += invocation.required::<i64>(0)?;
			self.last_label = invocation.optional(1)?;
			invocation.flash()?.set("added", json!(true));
			Ok(())
		}

		fn leave(&mut self, invocation: &mut Invocation<'_, '_>) -> Result<()> {
			invocation.redirect("/elsewhere")
		}
	}

	const METHODS: &[Method<Tally>] = &[
		Method {
			name: "add",
			params: &[Param::Inject(Collaborator::Flash), Param::Required("amount"), Param::Optional("label")],
			handler: Tally::add,
		},
		Method {
			name: "leave",
			params: &[],
			handler: Tally::leave,
		},
		Method {
			name: "render",
			params: &[],
			handler: Tally::leave,
		},
	];

	fn call(tally: &mut Tally, expression: &str) -> Result<(Option<String>, Option<Value>)> {
		let registry = Registry::new();
		let codec = OpaqueCodec::new("test");
		let mut flash = MemoryFlash::default();
		let mut services = Services::new(ExtensionQueue::new(&registry, &codec), &mut flash);
		invoke(tally, METHODS, &ActionExpression::parse(expression)?, &mut services)?;
		let redirect = services.redirect.clone();
		drop(services);
		Ok((redirect, flash.get("added").cloned()))
	}

	#[test]
	fn injected_collaborators_take_no_position() {
		let mut tally = Tally::default();
		let (_, flashed) = call(&mut tally, "add(5, 'five')").unwrap();
		assert_eq!(tally.total, 5);
		assert_eq!(tally.last_label.as_deref(), Some("five"));
		assert_eq!(flashed, Some(json!(true)));
	}

	#[rstest]
	#[case("add()")]
	#[case("add(1, 'a', 'b')")]
	#[case("missing()")]
	#[case("render()")]
	fn rejected(#[case] expression: &str) {
		let mut tally = Tally::default();
		assert!(matches!(call(&mut tally, expression), Err(Error::InvalidActionExpression { .. })));
		assert_eq!(tally.total, 0);
	}

	#[test]
	fn undeclared_collaborators_are_refused() {
		let mut tally = Tally::default();
		assert!(matches!(call(&mut tally, "leave()"), Err(Error::Action { .. })));
	}

	#[test]
	fn refresh_calls_nothing() {
		let mut tally = Tally::default();
		assert_eq!(call(&mut tally, "$refresh()").unwrap(), (None, None));
	}
}
