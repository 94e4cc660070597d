//! Live components: server-rendered HTML fragments that survive round trips to the server
//! and are patched in place on the client.
//!
//! The server half ([`Server`], [`Component`]) decodes a call, rebuilds the addressed component
//! from its client-held state, runs one action and renders a fresh fragment.
//! The client half ([`client`], [`web`]) binds `live:*` directives, sends calls and reconciles
//! the response into the live DOM.

#![doc(html_root_url = "https://docs.rs/live-dom/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod action;
pub mod auth;
pub mod client;
pub mod collaborators;
pub mod component;
pub mod config;
pub mod error;
pub mod extension;
pub mod fragment;
pub mod identity;
pub mod invoke;
pub mod logging;
pub mod properties;
pub mod protocol;
pub mod server;
pub mod web;

pub use action::ActionExpression;
pub use component::{Component, Markup, Registry};
pub use config::Config;
pub use error::{Error, Result};
pub use fragment::{MountMode, RenderContext, RenderPass, RenderedFragment};
pub use identity::{ComponentIdentity, OpaqueCodec};
pub use invoke::{Collaborator, Invocation, Method, Param};
pub use properties::{Field, FieldKind, PropertySnapshot};
pub use server::Server;
