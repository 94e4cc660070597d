//! Wire format shared by server and client.

use crate::{
	error::{Error, Result},
	extension::ExtensionCall,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::form_urlencoded;

/// Marks a request as a live component call rather than an ordinary form submit.
pub const PROTOCOL_HEADER: &str = "x-live";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Attribute and element names of the HTML contract.
pub mod attr {
	/// Prefix of every directive attribute.
	pub const NAMESPACE: &str = "live";
	/// Component identity token on a fragment root.
	pub const ID: &str = "live:id";
	/// Render duration in milliseconds on a fragment root.
	pub const MS: &str = "live:ms";
	/// Opaque property snapshot on a fragment root.
	pub const PROPS: &str = "live:props";
	/// Plain type reference on a fragment root, debug mode only.
	pub const CLASS: &str = "live:class";
	/// Action issued right after binding; set on skeleton roots.
	pub const INIT: &str = "live:init";
	/// Explicit reconciliation key.
	pub const KEY: &str = "live:key";
	/// Routes an element's directives to another component.
	pub const TARGET: &str = "live:target";
	/// Marks an error message appended by the client.
	pub const ERROR: &str = "live:error";
	/// Marker attribute of the bootstrap placeholder element.
	pub const BOOT: &str = "live:boot";
	/// The bootstrap placeholder as rendered.
	pub const BOOT_MARKER: &str = "<template live:boot></template>";
}

/// Form fields of a component call.
pub mod field {
	pub const COMPONENT: &str = "_component";
	pub const PROPERTIES: &str = "_properties";
	pub const METHOD: &str = "_method";
	pub const MODELS: &str = "_models";
	pub const COMPILED: &str = "_compiled";
	pub const TOKEN: &str = "_token";
}

/// A decoded component call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireRequest {
	/// Identity token.
	pub component: String,
	/// Opaque property snapshot.
	pub properties: String,
	/// Action expression.
	pub method: String,
	/// Client-held model values.
	pub models: Map<String, Value>,
	/// Identity token → HTML of components already rendered on the page.
	pub compiled: Map<String, Value>,
	pub token: Option<String>,
}

impl WireRequest {
	/// Parses a form-encoded body. `_component` is required, everything else defaults to empty.
	pub fn from_form(body: &str) -> Result<Self> {
		let mut request = Self::default();
		let mut component = None;
		for (key, value) in form_urlencoded::parse(body.as_bytes()) {
			match key.as_ref() {
				field::COMPONENT => component = Some(value.into_owned()),
				field::PROPERTIES => request.properties = value.into_owned(),
				field::METHOD => request.method = value.into_owned(),
				field::MODELS => request.models = json_object(field::MODELS, &value)?,
				field::COMPILED => request.compiled = json_object(field::COMPILED, &value)?,
				field::TOKEN => request.token = Some(value.into_owned()),
				_ => (),
			}
		}
		request.component = component.filter(|component| !component.is_empty()).ok_or_else(|| Error::MalformedRequest(format!("missing `{}`", field::COMPONENT)))?;
		Ok(request)
	}

	#[must_use]
	pub fn to_form(&self) -> String {
		let mut form = form_urlencoded::Serializer::new(String::new());
		form.append_pair(field::COMPONENT, &self.component)
			.append_pair(field::PROPERTIES, &self.properties)
			.append_pair(field::METHOD, &self.method)
			.append_pair(field::MODELS, &Value::Object(self.models.clone()).to_string())
			.append_pair(field::COMPILED, &Value::Object(self.compiled.clone()).to_string());
		if let Some(token) = &self.token {
			form.append_pair(field::TOKEN, token);
		}
		form.finish()
	}
}

fn json_object(name: &str, value: &str) -> Result<Map<String, Value>> {
	if value.is_empty() {
		return Ok(Map::new());
	}
	match serde_json::from_str::<Value>(value) {
		Ok(Value::Object(map)) => Ok(map),
		_ => Err(Error::MalformedRequest(format!("`{}` is not a JSON object", name))),
	}
}

/// Successful response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireResponse {
	Redirect {
		redirect: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		flash: Option<Map<String, Value>>,
	},
	Content {
		content: String,
		#[serde(default)]
		extender: Vec<ExtensionCall>,
	},
}

/// Error response body.
///
/// Production bodies carry only `message`; debug bodies add the diagnostic fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	pub message: String,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub file: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line: Option<u32>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub trace: Vec<String>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn form_round_trip() {
		let request = WireRequest {
			component: "abc.2".to_owned(),
			properties: "xyz".to_owned(),
			method: "save('a&b=c', 1)".to_owned(),
			models: json!({ "title": "Hi" }).as_object().unwrap().clone(),
			compiled: Map::new(),
			token: Some("t0k".to_owned()),
		};
		assert_eq!(WireRequest::from_form(&request.to_form()).unwrap(), request);
	}

	#[test]
	fn component_is_required() {
		assert!(matches!(WireRequest::from_form("_method=go"), Err(Error::MalformedRequest(_))));
		assert!(matches!(WireRequest::from_form("_component=a&_models=%5B%5D"), Err(Error::MalformedRequest(_))));
	}

	#[test]
	fn responses_are_distinguished_by_shape() {
		let redirect: WireResponse = serde_json::from_str(r#"{ "redirect": "/done" }"#).unwrap();
		assert_eq!(redirect, WireResponse::Redirect { redirect: "/done".to_owned(), flash: None });

		let content: WireResponse = serde_json::from_str(r#"{ "content": "<p></p>", "extender": [{ "component": "t", "method": "m()" }] }"#).unwrap();
		match content {
			WireResponse::Content { extender, .. } => assert_eq!(extender[0].method, "m()"),
			WireResponse::Redirect { .. } => panic!("expected content"),
		}
	}
}
