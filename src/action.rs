//! Method-call expressions as sent by the client, e.g. `save('draft, final', 2)`.

use crate::error::{Error, Result};
use core::fmt::{self, Display, Formatter, Write as _};
use serde_json::{Number, Value};

/// The built-in action that only re-renders.
pub const REFRESH: &str = "$refresh";

/// One positional argument of an [`ActionExpression`].
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
	Number(Number),
	/// A quoted argument, quotes stripped.
	String(String),
	/// An unquoted, non-numeric token, taken verbatim.
	Raw(String),
}

impl Argument {
	fn coerce(token: &str) -> Option<Self> {
		let token = token.trim();
		if token.is_empty() {
			return None;
		}

		let bytes = token.as_bytes();
		if bytes.len() >= 2 && (bytes[0] == b'\'' || bytes[0] == b'"') && bytes[bytes.len() - 1] == bytes[0] {
			return Some(Self::String(token[1..token.len() - 1].to_owned()));
		}

		if let Some(number) = parse_number(token) {
			return Some(Self::Number(number));
		}

		Some(Self::Raw(token.to_owned()))
	}

	#[must_use]
	pub fn to_value(&self) -> Value {
		match self {
			Self::Number(number) => Value::Number(number.clone()),
			Self::String(string) | Self::Raw(string) => Value::String(string.clone()),
		}
	}
}

impl From<&Value> for Argument {
	fn from(value: &Value) -> Self {
		match value {
			Value::Number(number) => Self::Number(number.clone()),
			Value::String(string) => Self::String(string.clone()),
			other => Self::Raw(other.to_string()),
		}
	}
}

impl Display for Argument {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Self::Number(number) => write!(f, "{}", number),
			Self::String(string) if string.contains('\'') => write!(f, "\"{}\"", string),
			Self::String(string) => write!(f, "'{}'", string),
			Self::Raw(raw) => f.write_str(raw),
		}
	}
}

fn parse_number(token: &str) -> Option<Number> {
	if !token.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+' || c == '.') {
		return None;
	}
	if let Ok(integer) = token.parse::<i64>() {
		return Some(integer.into());
	}
	token.parse::<f64>().ok().filter(|float| float.is_finite()).and_then(Number::from_f64)
}

/// A parsed `name(arg, …)` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionExpression {
	pub name: String,
	pub args: Vec<Argument>,
}

impl ActionExpression {
	#[must_use]
	pub fn new(name: impl Into<String>, args: Vec<Argument>) -> Self {
		Self { name: name.into(), args }
	}

	#[must_use]
	pub fn refresh() -> Self {
		Self::new(REFRESH, vec![])
	}

	#[must_use]
	pub fn is_refresh(&self) -> bool {
		self.name == REFRESH
	}

	/// Parses `name "(" args? ")"`, where commas inside matching quotes don't separate arguments.
	///
	/// A bare `name` is a call without arguments. An empty expression means [`REFRESH`].
	pub fn parse(expression: &str) -> Result<Self> {
		let trimmed = expression.trim();
		if trimmed.is_empty() {
			return Ok(Self::refresh());
		}

		let (name, arguments) = match trimmed.find('(') {
			Some(open) => {
				let inner = trimmed[open + 1..].strip_suffix(')').ok_or_else(|| Error::invalid_action(expression, "missing closing parenthesis"))?;
				(trimmed[..open].trim_end(), Some(inner))
			}
			None => (trimmed, None),
		};

		if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '$') || name.starts_with(|c: char| c.is_ascii_digit()) {
			return Err(Error::invalid_action(expression, format!("invalid method name {:?}", name)));
		}

		let args = match arguments {
			Some(inner) => split_arguments(inner).map_err(|reason| Error::invalid_action(expression, reason))?.into_iter().filter_map(Argument::coerce).collect(),
			None => vec![],
		};
		Ok(Self::new(name, args))
	}
}

fn split_arguments(inner: &str) -> Result<Vec<&str>, &'static str> {
	let mut tokens = vec![];
	let mut quote = None;
	let mut start = 0;
	for (i, c) in inner.char_indices() {
		match (quote, c) {
			(None, '\'' | '"') => quote = Some(c),
			(Some(open), c) if c == open => quote = None,
			(None, ',') => {
				tokens.push(&inner[start..i]);
				start = i + 1;
			}
			_ => (),
		}
	}
	if quote.is_some() {
		return Err("unterminated quote");
	}
	tokens.push(&inner[start..]);
	Ok(tokens)
}

impl Display for ActionExpression {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name)?;
		f.write_char('(')?;
		for (i, arg) in self.args.iter().enumerate() {
			if i > 0 {
				f.write_str(", ")?;
			}
			write!(f, "{}", arg)?;
		}
		f.write_char(')')
	}
}
