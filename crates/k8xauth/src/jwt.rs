//! Helpers for identity tokens we receive but never verify.
//!
//! Source tokens are issued by the platform we are running on and are verified
//! by the target cloud when it redeems them. Here we only read claims out of
//! them, so nothing in this module checks a signature.
use std::io::Write;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("the token is invalid or malformed: {0}")]
	Invalid(#[from] jsonwebtoken::errors::Error),
	#[error("the token must have three parts, found {0}")]
	Parts(usize),
	#[error("failed to decode token segment: {0}")]
	Decode(#[from] base64::DecodeError),
	#[error("token segment is not JSON: {0}")]
	Json(#[from] serde_json::Error),
	#[error("token expiry {0} is out of range")]
	ExpiryOutOfRange(f64),
	#[error("failed to write token: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(serde::Deserialize)]
struct ExpiryClaim {
	exp: f64,
}

/// Reads the `exp` claim without verifying the token signature. The header
/// algorithm is irrelevant here, so RS256, ES256 and HS256 tokens all parse.
pub fn unverified_expiry(token: &str) -> Result<DateTime<Utc>, Error> {
	let data = jsonwebtoken::dangerous::insecure_decode::<ExpiryClaim>(token.trim())?;
	let exp = data.claims.exp;
	DateTime::from_timestamp(exp.trunc() as i64, 0).ok_or(Error::ExpiryOutOfRange(exp))
}

/// Decodes a compact JWT into `{header, payload, signature}` for display.
pub fn decode_for_display(token: &str) -> Result<Value, Error> {
	let parts: Vec<&str> = token.trim().split('.').collect();
	let [header, payload, signature] = parts.as_slice() else {
		return Err(Error::Parts(parts.len()));
	};
	let header: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header)?)?;
	let payload: Value = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload)?)?;
	Ok(json!({
		"header": header,
		"payload": payload,
		"signature": signature,
	}))
}

/// Writes the decoded form of `token`. This exposes every claim in the token;
/// it exists for debugging only.
pub fn pretty_print(token: &str, mut w: impl Write) -> Result<(), Error> {
	let decoded = decode_for_display(token)?;
	serde_json::to_writer_pretty(&mut w, &decoded)?;
	writeln!(w)?;
	Ok(())
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;
