//! The browser half: binds directives, sends component calls and patches responses in.
//!
//! Everything here is written against the [`Dom`] and [`Transport`] seams and driven by explicit
//! calls ([`Page::dispatch_event`], [`Page::advance`], [`Page::complete`]), so it runs the same
//! natively over [`MemoryDom`] as it does in a browser over [`crate::web`].

pub mod directive;
pub mod dispatch;
pub mod dom;
pub mod memory;
pub mod page;
pub mod reconcile;
pub mod scripts;

pub use directive::{Directive, EventKind};
pub use dispatch::{DispatchState, RequestId, Transport};
pub use dom::Dom;
pub use memory::MemoryDom;
pub use page::{Event, Page, Settled};
pub use reconcile::ReconcileMode;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
	/// The server answered with an error status.
	#[error("{message} (HTTP {status})")]
	Http { status: u16, message: String },

	#[error("network failure: {0}")]
	Network(String),

	/// Superseded or cancelled. Not a failure.
	#[error("request aborted")]
	Aborted,

	/// No mounted component matches an identity or target.
	#[error("no mounted component matches `{0}`")]
	MissingComponent(String),

	#[error("undecodable response: {0}")]
	Decode(String),
}

/// Client settings, usually embedded into the page by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
	/// Sent as `_token` with every call.
	pub csrf_token: Option<String>,
	/// Append failed calls' messages to the component as `<div live:error>`.
	pub show_errors: bool,
}

impl Default for PageConfig {
	fn default() -> Self {
		Self {
			csrf_token: None,
			show_errors: true,
		}
	}
}
