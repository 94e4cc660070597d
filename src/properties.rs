//! Component state snapshots.
//!
//! A component declares its externally visible state as a [`Field`] list. Only those fields are
//! ever captured, sent to the client, or accepted back from it.

use crate::{
	error::{Error, Result},
	identity::OpaqueCodec,
	logging::redact,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

/// Declared type of a state field, used for the cast-compatibility check on client submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
	Any,
	Bool,
	Number,
	String,
	Array,
	Object,
}

impl FieldKind {
	/// Converts `value` to this kind if it is cast-compatible.
	///
	/// Form controls submit text, so numeric strings are accepted for numbers and the usual
	/// checkbox spellings for booleans. Anything else is rejected.
	#[must_use]
	pub fn coerce(self, value: &Value) -> Option<Value> {
		match (self, value) {
			(Self::Any, v) => Some(v.clone()),
			(Self::Bool, Value::Bool(_)) | (Self::Number, Value::Number(_)) | (Self::String, Value::String(_)) | (Self::Array, Value::Array(_)) | (Self::Object, Value::Object(_)) => {
				Some(value.clone())
			}
			(Self::Bool, Value::String(s)) => match s.as_str() {
				"true" | "1" | "on" => Some(Value::Bool(true)),
				"false" | "0" | "off" | "" => Some(Value::Bool(false)),
				_ => None,
			},
			(Self::Number, Value::String(s)) => {
				let s = s.trim();
				if let Ok(integer) = s.parse::<i64>() {
					Some(Value::Number(integer.into()))
				} else {
					s.parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number)
				}
			}
			_ => None,
		}
	}
}

/// One declared state field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
	pub name: &'static str,
	pub kind: FieldKind,
}

impl Field {
	#[must_use]
	pub const fn new(name: &'static str, kind: FieldKind) -> Self {
		Self { name, kind }
	}
}

/// Ordered mapping of declared field name to plain value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySnapshot(Map<String, Value>);

impl PropertySnapshot {
	/// Captures the declared fields of `instance`, in declaration order.
	pub fn capture<C: Serialize>(instance: &C, schema: &[Field]) -> Result<Self> {
		let mut state = match serde_json::to_value(instance)? {
			Value::Object(state) => state,
			other => return Err(Error::action(format!("component state must serialize to an object, not {}", redact(&other)))),
		};

		let mut snapshot = Map::new();
		for field in schema {
			let value = state.remove(field.name).unwrap_or_else(|| {
				warn!(field = field.name, "Declared field is missing from the serialized state. Capturing `null`.");
				Value::Null
			});
			snapshot.insert(field.name.to_owned(), value);
		}
		Ok(Self(snapshot))
	}

	/// Builds a snapshot from untrusted values, keeping only declared, cast-compatible entries.
	#[must_use]
	pub fn restrict(values: &Map<String, Value>, schema: &[Field]) -> Self {
		let mut snapshot = Map::new();
		for field in schema {
			if let Some(value) = values.get(field.name) {
				match field.kind.coerce(value) {
					Some(value) => {
						snapshot.insert(field.name.to_owned(), value);
					}
					None => debug!(field = field.name, value = %redact(value), "Dropping incompatible property."),
				}
			}
		}
		Self(snapshot)
	}

	/// Overlays client-held model values onto this snapshot.
	///
	/// Every key of `self` survives. A same-named client value wins iff it is cast-compatible
	/// with the declared kind. Client keys unknown to `self` or the schema are ignored.
	#[must_use]
	pub fn merge(&self, schema: &[Field], client: &Map<String, Value>) -> Self {
		let mut merged = self.0.clone();
		for (name, value) in &mut merged {
			let submitted = match client.get(name) {
				Some(submitted) => submitted,
				None => continue,
			};
			let kind = schema.iter().find(|field| field.name == name.as_str()).map_or(FieldKind::Any, |field| field.kind);
			match kind.coerce(submitted) {
				Some(submitted) => *value = submitted,
				None => debug!(field = %name, submitted = %redact(submitted), "Ignoring incompatible model value."),
			}
		}
		for name in client.keys().filter(|name| !self.0.contains_key(name.as_str())) {
			debug!(field = %name, "Ignoring model value for an undeclared field.");
		}
		Self(merged)
	}

	/// Rebuilds a component from this snapshot. Fields outside the snapshot must have serde defaults.
	pub fn hydrate<C: DeserializeOwned>(&self) -> Result<C> {
		Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
	}

	#[must_use]
	pub fn encode(&self, codec: &OpaqueCodec) -> String {
		codec.encode(Value::Object(self.0.clone()).to_string().as_bytes())
	}

	pub fn decode(token: &str, codec: &OpaqueCodec) -> Result<Map<String, Value>> {
		if token.is_empty() {
			return Ok(Map::new());
		}
		match serde_json::from_slice::<Value>(&codec.decode(token)?) {
			Ok(Value::Object(values)) => Ok(values),
			Ok(_) | Err(_) => Err(Error::MalformedRequest("`_properties` is not an encoded object".to_owned())),
		}
	}

	#[must_use]
	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	#[must_use]
	pub fn as_map(&self) -> &Map<String, Value> {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde::Deserialize;
	use serde_json::json;

	#[derive(Serialize, Deserialize)]
	struct Form {
		name: String,
		age: i64,
		subscribed: bool,
		#[serde(skip)]
		secret: String,
	}

	const SCHEMA: &[Field] = &[Field::new("age", FieldKind::Number), Field::new("name", FieldKind::String), Field::new("subscribed", FieldKind::Bool)];

	fn form() -> Form {
		Form {
			name: "Ada".to_owned(),
			age: 36,
			subscribed: false,
			secret: "hunter2".to_owned(),
		}
	}

	#[test]
	fn capture_follows_declaration_order() {
		let snapshot = PropertySnapshot::capture(&form(), SCHEMA).unwrap();
		assert_eq!(snapshot.keys().collect::<Vec<_>>(), ["age", "name", "subscribed"]);
		assert!(snapshot.get("secret").is_none());
	}

	#[rstest]
	#[case(json!({ "name": "Grace" }), "name", json!("Grace"))]
	#[case(json!({ "age": "41" }), "age", json!(41))]
	#[case(json!({ "age": "forty" }), "age", json!(36))]
	#[case(json!({ "name": 5 }), "name", json!("Ada"))]
	#[case(json!({ "subscribed": "on" }), "subscribed", json!(true))]
	#[case(json!({ "subscribed": [true] }), "subscribed", json!(false))]
	fn client_wins_only_when_compatible(#[case] client: Value, #[case] key: &str, #[case] expected: Value) {
		let server = PropertySnapshot::capture(&form(), SCHEMA).unwrap();
		let merged = server.merge(SCHEMA, client.as_object().unwrap());
		assert_eq!(merged.get(key), Some(&expected));
		assert_eq!(merged.len(), server.len());
	}

	#[test]
	fn unknown_keys_are_not_injected() {
		let server = PropertySnapshot::capture(&form(), SCHEMA).unwrap();
		let merged = server.merge(SCHEMA, json!({ "secret": "x", "admin": true }).as_object().unwrap());
		assert_eq!(merged, server);
	}

	#[test]
	fn encoded_snapshots_round_trip_and_hydrate() {
		let codec = OpaqueCodec::new("k");
		let snapshot = PropertySnapshot::capture(&form(), SCHEMA).unwrap();
		let decoded = PropertySnapshot::decode(&snapshot.encode(&codec), &codec).unwrap();
		let restored = PropertySnapshot::restrict(&decoded, SCHEMA);
		assert_eq!(restored, snapshot);

		let form: Form = restored.hydrate().unwrap();
		assert_eq!((form.name.as_str(), form.age, form.secret.as_str()), ("Ada", 36, ""));
	}
}
