//! Narrow interfaces to the host application.

use crate::error::{Error, Result};
use hashbrown::HashMap;
use serde_json::Value;

/// Renders a template path with data. Template compilation is the host's business.
pub trait TemplateRenderer: Send + Sync {
	fn render(&self, path: &str, data: &Value) -> Result<String>;
}

/// Provides the CSRF token every protocol call must echo.
pub trait CsrfTokens: Send + Sync {
	fn current(&self) -> String;
}

/// Session-scoped flash storage, persisted by the host across the redirect that follows.
pub trait FlashStore {
	fn set(&mut self, key: &str, value: Value);
	fn get(&self, key: &str) -> Option<&Value>;
	/// All values flashed during the current request.
	fn flashed(&self) -> Vec<(String, Value)>;
}

/// A [`FlashStore`] that lives for one request, for hosts without sessions and for tests.
#[derive(Debug, Default)]
pub struct MemoryFlash {
	values: HashMap<String, Value>,
	order: Vec<String>,
}

impl FlashStore for MemoryFlash {
	fn set(&mut self, key: &str, value: Value) {
		if self.values.insert(key.to_owned(), value).is_none() {
			self.order.push(key.to_owned());
		}
	}

	fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	fn flashed(&self) -> Vec<(String, Value)> {
		self.order.iter().filter_map(|key| self.values.get(key).map(|value| (key.clone(), value.clone()))).collect()
	}
}

/// A fixed CSRF token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl CsrfTokens for StaticToken {
	fn current(&self) -> String {
		self.0.clone()
	}
}

/// Refuses every template; for hosts whose components only return [`Markup::Html`](crate::component::Markup::Html).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTemplates;

impl TemplateRenderer for NoTemplates {
	fn render(&self, path: &str, _data: &Value) -> Result<String> {
		Err(Error::Template {
			path: path.to_owned(),
			message: "no template renderer configured".to_owned(),
		})
	}
}
