use crate::{
	action::ActionExpression,
	error::{Error, Result},
	fragment::RenderContext,
	invoke::{self, Method, Services},
	properties::{Field, PropertySnapshot},
};
use hashbrown::HashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// What a component renders to.
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
	Html(String),
	/// Rendered through the host's [`TemplateRenderer`](crate::collaborators::TemplateRenderer).
	Template { path: String, data: Value },
}

impl Markup {
	#[must_use]
	pub fn template(path: impl Into<String>, data: Value) -> Self {
		Self::Template { path: path.into(), data }
	}
}

impl From<String> for Markup {
	fn from(html: String) -> Self {
		Self::Html(html)
	}
}

impl From<&str> for Markup {
	fn from(html: &str) -> Self {
		Self::Html(html.to_owned())
	}
}

/// A server-side stateful unit whose rendered HTML can be refreshed independently.
///
/// Instances live for one request. Between requests, only the fields declared in
/// [`SCHEMA`](Component::SCHEMA) survive, round-tripped through the client. Serialized fields that
/// are not declared there must carry `#[serde(default)]` (or `#[serde(skip)]`), since they are
/// absent when the component is rebuilt.
pub trait Component: Serialize + DeserializeOwned + 'static {
	/// Stable type reference encoded into identities.
	const TYPE_REF: &'static str;

	/// Externally visible state, in declaration order.
	const SCHEMA: &'static [Field];

	/// Client-callable actions.
	const METHODS: &'static [Method<Self>] = &[];

	/// Creates a root instance from mount arguments.
	fn mount(args: &[Value]) -> Result<Self>;

	fn render(&self, context: &mut RenderContext<'_>) -> Result<Markup>;

	/// Lightweight placeholder shown while a skeleton-mounted component loads.
	fn skeleton(&self) -> Markup {
		Markup::Html(String::new())
	}

	/// Instance-level authorization check.
	fn authorize(&self) -> bool {
		true
	}

	/// Capability marker: the host's authenticator must approve the request as well.
	fn requires_authentication(&self) -> bool {
		false
	}
}

/// Type-erased [`Component`], as resolved from an identity at runtime.
pub trait AnyComponent {
	fn type_ref(&self) -> &'static str;
	fn capture(&self) -> Result<PropertySnapshot>;
	fn invoke(&mut self, expression: &ActionExpression, services: &mut Services<'_>) -> Result<()>;
	fn render(&self, context: &mut RenderContext<'_>) -> Result<Markup>;
	fn skeleton(&self) -> Markup;
	fn authorize(&self) -> bool;
	fn requires_authentication(&self) -> bool;
}

impl<C: Component> AnyComponent for C {
	fn type_ref(&self) -> &'static str {
		C::TYPE_REF
	}

	fn capture(&self) -> Result<PropertySnapshot> {
		PropertySnapshot::capture(self, C::SCHEMA)
	}

	fn invoke(&mut self, expression: &ActionExpression, services: &mut Services<'_>) -> Result<()> {
		invoke::invoke(self, C::METHODS, expression, services)
	}

	fn render(&self, context: &mut RenderContext<'_>) -> Result<Markup> {
		Component::render(self, context)
	}

	fn skeleton(&self) -> Markup {
		Component::skeleton(self)
	}

	fn authorize(&self) -> bool {
		Component::authorize(self)
	}

	fn requires_authentication(&self) -> bool {
		Component::requires_authentication(self)
	}
}

/// How to build and inspect one registered component type.
#[derive(Clone, Copy)]
pub struct Registration {
	type_ref: &'static str,
	schema: &'static [Field],
	mount: fn(&[Value]) -> Result<Box<dyn AnyComponent>>,
	hydrate: fn(&PropertySnapshot) -> Result<Box<dyn AnyComponent>>,
	has_method: fn(&str) -> bool,
}

fn mount_erased<C: Component>(args: &[Value]) -> Result<Box<dyn AnyComponent>> {
	Ok(Box::new(C::mount(args)?))
}

fn hydrate_erased<C: Component>(snapshot: &PropertySnapshot) -> Result<Box<dyn AnyComponent>> {
	Ok(Box::new(snapshot.hydrate::<C>()?))
}

fn has_method<C: Component>(name: &str) -> bool {
	!invoke::is_reserved(name) && C::METHODS.iter().any(|method| method.name == name)
}

impl Registration {
	#[must_use]
	pub fn of<C: Component>() -> Self {
		Self {
			type_ref: C::TYPE_REF,
			schema: C::SCHEMA,
			mount: mount_erased::<C>,
			hydrate: hydrate_erased::<C>,
			has_method: has_method::<C>,
		}
	}

	#[must_use]
	pub fn type_ref(&self) -> &'static str {
		self.type_ref
	}

	#[must_use]
	pub fn schema(&self) -> &'static [Field] {
		self.schema
	}

	pub fn mount(&self, args: &[Value]) -> Result<Box<dyn AnyComponent>> {
		(self.mount)(args)
	}

	pub fn hydrate(&self, snapshot: &PropertySnapshot) -> Result<Box<dyn AnyComponent>> {
		(self.hydrate)(snapshot)
	}

	/// Whether `name` is a client-callable action of this type. [`REFRESH`](crate::action::REFRESH) always is.
	#[must_use]
	pub fn has_method(&self, name: &str) -> bool {
		name == crate::action::REFRESH || (self.has_method)(name)
	}
}

impl core::fmt::Debug for Registration {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Registration").field("type_ref", &self.type_ref).field("schema", &self.schema).finish_non_exhaustive()
	}
}

/// All component types a server can resolve identities to.
///
/// Populated once at startup and read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct Registry {
	entries: HashMap<&'static str, Registration>,
}

impl Registry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register<C: Component>(&mut self) -> &mut Self {
		self.entries.insert(C::TYPE_REF, Registration::of::<C>());
		self
	}

	/// Looks up a type reference. Unknown types are a deployment error, not a client error.
	pub fn get(&self, type_ref: &str) -> Result<&Registration> {
		self.entries.get(type_ref).ok_or_else(|| Error::MissingComponent(type_ref.to_owned()))
	}

	#[must_use]
	pub fn contains(&self, type_ref: &str) -> bool {
		self.entries.contains_key(type_ref)
	}
}
