//! Deferred calls on *other* mounted components.
//!
//! The client resolves these after applying the primary update, against every mounted instance
//! whose identity shares the target's base token.

use crate::{
	action::{ActionExpression, Argument},
	component::{Component, Registry},
	error::{Error, Result},
	identity::{nonce_for, ComponentIdentity, OpaqueCodec},
};
use core::mem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A deferred action on another component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionCall {
	/// Base identity token of the target.
	#[serde(rename = "component")]
	pub target: String,
	/// Action expression to call on the target.
	pub method: String,
}

/// Collects [`ExtensionCall`]s during one invocation.
pub struct ExtensionQueue<'r> {
	registry: &'r Registry,
	codec: &'r OpaqueCodec,
	queue: Vec<ExtensionCall>,
}

impl<'r> ExtensionQueue<'r> {
	#[must_use]
	pub fn new(registry: &'r Registry, codec: &'r OpaqueCodec) -> Self {
		Self { registry, codec, queue: vec![] }
	}

	/// Queues `method(args…)` for the component(s) addressed by `target`.
	///
	/// Fails if the target type isn't registered or has no such action.
	pub fn enqueue(&mut self, target: &ComponentIdentity, method: &str, args: &[Value]) -> Result<()> {
		let registration = self.registry.get(&target.type_ref)?;
		let expression = ActionExpression::new(method, args.iter().map(Argument::from).collect());
		if !registration.has_method(method) {
			return Err(Error::invalid_action(expression.to_string(), format!("`{}` has no action `{}`", target.type_ref, method)));
		}

		debug!(target = %target, method, "Queued extension call.");
		self.queue.push(ExtensionCall {
			target: target.base_token(self.codec),
			method: expression.to_string(),
		});
		Ok(())
	}

	/// Queues a call on the instance(s) of `C` mounted with `mount_args`.
	pub fn extend<C: Component>(&mut self, mount_args: &[Value], method: &str, args: &[Value]) -> Result<()> {
		self.enqueue(&ComponentIdentity::new(C::TYPE_REF, nonce_for(mount_args)), method, args)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.queue.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.queue.is_empty()
	}

	/// Empties the queue. Called once per rendered fragment.
	pub fn drain(&mut self) -> Vec<ExtensionCall> {
		mem::take(&mut self.queue)
	}
}
