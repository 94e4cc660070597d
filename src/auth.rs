use crate::{
	component::AnyComponent,
	error::{Error, Result},
};
use core::fmt::{self, Debug, Formatter};
use http::request::Parts;
use tracing::{debug, error};

/// Host callback deciding whether the current request is authenticated.
pub type Authenticator = dyn Fn(&Parts) -> bool + Send + Sync;

/// Consulted before any action runs and before anything renders.
///
/// Two layers, both of which must pass:
/// the component's own [`authorize`](crate::Component::authorize) check, and, for components
/// declaring [`requires_authentication`](crate::Component::requires_authentication), the
/// registered [`Authenticator`]. A component requiring authentication on a server without an
/// authenticator is always rejected.
#[derive(Default)]
pub struct AuthGate {
	authenticator: Option<Box<Authenticator>>,
}

impl Debug for AuthGate {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuthGate").field("authenticator", &self.authenticator.is_some()).finish()
	}
}

impl AuthGate {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_authenticator(authenticator: impl Fn(&Parts) -> bool + Send + Sync + 'static) -> Self {
		Self {
			authenticator: Some(Box::new(authenticator)),
		}
	}

	pub fn verify(&self, component: &dyn AnyComponent, request: &Parts) -> Result<()> {
		if !component.authorize() {
			debug!(component = component.type_ref(), "Instance authorization check failed.");
			return Err(Error::Unauthorized);
		}

		if component.requires_authentication() {
			match &self.authenticator {
				Some(authenticator) => {
					if !authenticator(request) {
						debug!(component = component.type_ref(), "Authenticator rejected the request.");
						return Err(Error::Unauthorized);
					}
				}
				None => {
					error!(component = component.type_ref(), "Component requires authentication but no authenticator is registered. Rejecting.");
					return Err(Error::Unauthorized);
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		component::{Component, Markup},
		fragment::RenderContext,
		properties::Field,
	};
	use rstest::rstest;
	use serde::{Deserialize, Serialize};
	use serde_json::Value;

	#[derive(Serialize, Deserialize)]
	struct Panel {
		owner: bool,
		guarded: bool,
	}

	impl Component for Panel {
		const TYPE_REF: &'static str = "admin::Panel";
		const SCHEMA: &'static [Field] = &[];

		fn mount(_: &[Value]) -> Result<Self> {
			Ok(Self { owner: true, guarded: true })
		}

		fn render(&self, _: &mut RenderContext<'_>) -> Result<Markup> {
			Ok("".into())
		}

		fn authorize(&self) -> bool {
			self.owner
		}

		fn requires_authentication(&self) -> bool {
			self.guarded
		}
	}

	fn parts(logged_in: bool) -> Parts {
		let builder = http::Request::builder();
		let builder = if logged_in { builder.header("x-user", "1") } else { builder };
		builder.body(()).unwrap().into_parts().0
	}

	fn gate() -> AuthGate {
		AuthGate::with_authenticator(|parts| parts.headers.contains_key("x-user"))
	}

	#[rstest]
	#[case(true, true, true, true)]
	#[case(false, true, true, false)]
	#[case(true, true, false, false)]
	#[case(true, false, false, true)]
	fn layers_compose(#[case] owner: bool, #[case] guarded: bool, #[case] logged_in: bool, #[case] allowed: bool) {
		let panel = Panel { owner, guarded };
		assert_eq!(gate().verify(&panel, &parts(logged_in)).is_ok(), allowed);
	}

	#[test]
	fn missing_authenticator_fails_closed() {
		let panel = Panel { owner: true, guarded: true };
		assert!(matches!(AuthGate::new().verify(&panel, &parts(true)), Err(Error::Unauthorized)));
	}
}
