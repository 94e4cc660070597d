use core::panic::Location;
use http::StatusCode;

/// Result type for server-side component operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can occur while handling a live component call.
///
/// Every variant maps to exactly one HTTP status through [`Error::status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// A required wire field is missing or could not be decoded.
	#[error("malformed request: {0}")]
	MalformedRequest(String),

	/// The authentication gate rejected the component, or the CSRF token did not match.
	#[error("unauthorized")]
	Unauthorized,

	/// The action expression failed to parse, names an unknown or reserved method, or has the wrong arity.
	#[error("invalid action expression `{expression}`: {reason}")]
	InvalidActionExpression { expression: String, reason: String },

	/// The identity resolved to a type that is not registered.
	///
	/// This indicates a version mismatch between the page a client holds and the server code.
	#[error("missing component `{0}`")]
	MissingComponent(String),

	/// An action handler or a render hook failed.
	#[error("{message}")]
	Action { message: String, location: &'static Location<'static> },

	/// The template collaborator failed.
	#[error("template `{path}` failed to render: {message}")]
	Template { path: String, message: String },

	#[error("serialization failed: {0}")]
	Serialization(#[from] serde_json::Error),

	/// An action handler panicked; caught at the dispatch boundary.
	#[error("panicked: {0}")]
	Panic(String),
}

impl Error {
	/// Creates an [`Error::Action`] that records the caller's location for debug diagnostics.
	#[track_caller]
	pub fn action(message: impl Into<String>) -> Self {
		Self::Action {
			message: message.into(),
			location: Location::caller(),
		}
	}

	pub fn invalid_action(expression: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::InvalidActionExpression {
			expression: expression.into(),
			reason: reason.into(),
		}
	}

	#[must_use]
	pub fn status(&self) -> StatusCode {
		match self {
			Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
			Self::Unauthorized => StatusCode::UNAUTHORIZED,
			Self::InvalidActionExpression { .. } | Self::MissingComponent(_) | Self::Action { .. } | Self::Template { .. } | Self::Serialization(_) | Self::Panic(_) => {
				StatusCode::INTERNAL_SERVER_ERROR
			}
		}
	}

	/// Short variant name, used as `type` in debug diagnostics.
	#[must_use]
	pub fn kind(&self) -> &'static str {
		match self {
			Self::MalformedRequest(_) => "MalformedRequest",
			Self::Unauthorized => "Unauthorized",
			Self::InvalidActionExpression { .. } => "InvalidActionExpression",
			Self::MissingComponent(_) => "MissingComponent",
			Self::Action { .. } => "Action",
			Self::Template { .. } => "Template",
			Self::Serialization(_) => "Serialization",
			Self::Panic(_) => "Panic",
		}
	}

	/// The message shown to end users when debug output is disabled.
	#[must_use]
	pub fn public_message(&self) -> String {
		match self {
			Self::MalformedRequest(_) | Self::Unauthorized => self.to_string(),
			_ => "Server error".to_owned(),
		}
	}

	#[must_use]
	pub fn location(&self) -> Option<&'static Location<'static>> {
		match self {
			Self::Action { location, .. } => Some(location),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(Error::MalformedRequest("no _component".into()), 400)]
	#[case(Error::Unauthorized, 401)]
	#[case(Error::invalid_action("x(", "unterminated"), 500)]
	#[case(Error::MissingComponent("app::Gone".into()), 500)]
	#[case(Error::Panic("boom".into()), 500)]
	fn statuses(#[case] error: Error, #[case] status: u16) {
		assert_eq!(error.status().as_u16(), status);
	}

	#[test]
	fn action_errors_record_their_origin() {
		let error = Error::action("nope");
		assert_eq!(error.location().map(Location::file), Some(file!()));
		assert_eq!(error.public_message(), "Server error");
	}
}
