//! Opaque component addressing.
//!
//! Tokens produced here are **not** a security boundary. The encoding is a keyed character
//! substitution over URL-safe base64: it keeps type names and state out of plain sight in the
//! page source and nothing more. Authorization is re-checked server-side on every call.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use core::fmt::{self, Display, Formatter};
use hashbrown::HashMap;
use sha2::{Digest, Sha256};
use tracing::trace;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
const INVALID: u8 = 0xFF;
const FIELD_SEPARATOR: char = '\u{1F}';
const SEQUENCE_SEPARATOR: char = '.';

/// Reversible, keyed, non-cryptographic string scrambler.
#[derive(Clone)]
pub struct OpaqueCodec {
	forward: [u8; 64],
	reverse: [u8; 128],
	index: [u8; 128],
}

impl fmt::Debug for OpaqueCodec {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("OpaqueCodec").finish_non_exhaustive()
	}
}

impl OpaqueCodec {
	#[must_use]
	pub fn new(key: &str) -> Self {
		let seed = Sha256::digest(key.as_bytes());
		let mut forward = *ALPHABET;
		for i in (1..forward.len()).rev() {
			let j = (seed[i % seed.len()] as usize + i * 7) % (i + 1);
			forward.swap(i, j);
		}

		let mut reverse = [INVALID; 128];
		let mut index = [INVALID; 128];
		for (i, (&plain, &scrambled)) in ALPHABET.iter().zip(forward.iter()).enumerate() {
			reverse[scrambled as usize] = plain;
			index[plain as usize] = i as u8;
		}
		Self { forward, reverse, index }
	}

	#[must_use]
	pub fn encode(&self, bytes: &[u8]) -> String {
		URL_SAFE_NO_PAD.encode(bytes).bytes().map(|b| self.forward[self.index[b as usize] as usize] as char).collect()
	}

	pub fn decode(&self, token: &str) -> Result<Vec<u8>> {
		let plain = token
			.bytes()
			.map(|b| match self.reverse.get(b as usize) {
				Some(&p) if p != INVALID => Ok(p),
				_ => Err(Error::MalformedRequest(format!("unexpected byte {:#04x} in opaque token", b))),
			})
			.collect::<Result<Vec<u8>>>()?;
		URL_SAFE_NO_PAD.decode(plain).map_err(|error| Error::MalformedRequest(format!("opaque token: {}", error)))
	}

	/// Encodes a `(type_ref, nonce)` pair into a token without sequence suffix.
	#[must_use]
	pub fn encode_identity(&self, type_ref: &str, nonce: &str) -> String {
		self.encode(format!("{}{}{}", type_ref, FIELD_SEPARATOR, nonce).as_bytes())
	}

	pub fn decode_identity(&self, token: &str) -> Result<ComponentIdentity> {
		let (base, sequence) = match token.rsplit_once(SEQUENCE_SEPARATOR) {
			Some((base, sequence)) => (base, sequence.parse::<u32>().map_err(|_| Error::MalformedRequest(format!("invalid identity sequence {:?}", sequence)))?),
			None => (token, 0),
		};
		let payload = String::from_utf8(self.decode(base)?).map_err(|_| Error::MalformedRequest("identity is not UTF-8".to_owned()))?;
		let (type_ref, nonce) = payload.split_once(FIELD_SEPARATOR).ok_or_else(|| Error::MalformedRequest("identity lacks a nonce".to_owned()))?;
		if type_ref.is_empty() {
			return Err(Error::MalformedRequest("identity lacks a type".to_owned()));
		}
		Ok(ComponentIdentity {
			type_ref: type_ref.to_owned(),
			nonce: nonce.to_owned(),
			sequence,
		})
	}
}

/// Addresses one mounted component instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentIdentity {
	pub type_ref: String,
	pub nonce: String,
	/// `0` for the first top-level mount of a `(type_ref, nonce)` pair within a render pass.
	/// Nested mounts derive theirs from their parent, see [`ComponentIdentity::nested`].
	pub sequence: u32,
}

impl ComponentIdentity {
	#[must_use]
	pub fn new(type_ref: impl Into<String>, nonce: impl Into<String>) -> Self {
		Self {
			type_ref: type_ref.into(),
			nonce: nonce.into(),
			sequence: 0,
		}
	}

	/// The token shared by all instances of this `(type_ref, nonce)` pair.
	///
	/// Extension calls target this, so they reach every repeated mount.
	#[must_use]
	pub fn base_token(&self, codec: &OpaqueCodec) -> String {
		codec.encode_identity(&self.type_ref, &self.nonce)
	}

	/// Identity of the `occurrence`th nested mount of `(type_ref, nonce)` inside `parent`.
	///
	/// Depends on the parent's identity alone, so re-rendering the parent reproduces it.
	/// The sequence is never `0`, which belongs to the first top-level mount.
	#[must_use]
	pub fn nested(type_ref: impl Into<String>, nonce: impl Into<String>, parent: &ComponentIdentity, occurrence: u32) -> Self {
		let mut hasher = Sha256::new();
		hasher.update(parent.to_string().as_bytes());
		hasher.update([0]);
		hasher.update(occurrence.to_be_bytes());
		let digest = hasher.finalize();
		let bits = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
		Self {
			type_ref: type_ref.into(),
			nonce: nonce.into(),
			sequence: bits % (u32::MAX - 1) + 1,
		}
	}

	#[must_use]
	pub fn token(&self, codec: &OpaqueCodec) -> String {
		let base = self.base_token(codec);
		if self.sequence == 0 {
			base
		} else {
			format!("{}{}{}", base, SEQUENCE_SEPARATOR, self.sequence)
		}
	}
}

impl Display for ComponentIdentity {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.type_ref, self.nonce)?;
		if self.sequence != 0 {
			write!(f, ".{}", self.sequence)?;
		}
		Ok(())
	}
}

/// Strips a sequence suffix from a token, yielding its base token.
#[must_use]
pub fn base_of(token: &str) -> &str {
	match token.rsplit_once(SEQUENCE_SEPARATOR) {
		Some((base, sequence)) if sequence.bytes().all(|b| b.is_ascii_digit()) => base,
		_ => token,
	}
}

/// Derives a nonce from mount arguments: equal arguments give equal nonces.
#[must_use]
pub fn nonce_for(args: &[serde_json::Value]) -> String {
	let mut hasher = Sha256::new();
	for arg in args {
		hasher.update(arg.to_string().as_bytes());
		hasher.update([0]);
	}
	hex::encode(&hasher.finalize()[..8])
}

/// Request-scoped sequence counter for repeated mounts of the same `(type_ref, nonce)` pair.
#[derive(Debug, Default)]
pub struct MountCounter {
	highest: HashMap<(String, String), u32>,
}

impl MountCounter {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates the next identity for `(type_ref, nonce)`.
	pub fn next(&mut self, type_ref: &str, nonce: &str) -> ComponentIdentity {
		let sequence = match self.highest.get_mut(&(type_ref.to_owned(), nonce.to_owned())) {
			Some(highest) => {
				*highest = highest.saturating_add(1);
				*highest
			}
			None => {
				self.highest.insert((type_ref.to_owned(), nonce.to_owned()), 0);
				0
			}
		};
		trace!(type_ref, nonce, sequence, "Allocated component identity.");
		ComponentIdentity {
			type_ref: type_ref.to_owned(),
			nonce: nonce.to_owned(),
			sequence,
		}
	}
}
