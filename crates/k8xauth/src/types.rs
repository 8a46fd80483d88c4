use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use crate::*;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Platform {
	Aws,
	Gcp,
	Azure,
}

impl Platform {
	pub fn as_str(&self) -> &'static str {
		match self {
			Platform::Aws => "aws",
			Platform::Gcp => "gcp",
			Platform::Azure => "azure",
		}
	}
}

impl std::fmt::Display for Platform {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// An opaque bearer token and the instant it stops being valid.
///
/// Tokens are values: nothing mutates one after creation. Callers that need a
/// token past its expiry go back to the [`TokenSource`] that produced it.
#[derive(Clone)]
pub struct IdentityToken {
	access_token: SecretString,
	expiry: DateTime<Utc>,
}

impl IdentityToken {
	pub fn new(access_token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
		IdentityToken {
			access_token: SecretString::from(access_token.into()),
			expiry,
		}
	}

	pub fn access_token(&self) -> &str {
		self.access_token.expose_secret()
	}

	pub fn expiry(&self) -> DateTime<Utc> {
		self.expiry
	}

	/// True when the token expires within `window` of `now` (or already has).
	pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
		match chrono::Duration::from_std(window) {
			Ok(window) => self.expiry - window <= now,
			Err(_) => true,
		}
	}
}

impl Debug for IdentityToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("IdentityToken")
			.field("expiry", &self.expiry)
			.finish_non_exhaustive()
	}
}

/// A refreshable source of identity tokens.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync + Debug {
	async fn token(&self) -> anyhow::Result<IdentityToken>;
}

/// Maximum length of a session identifier. AWS role session names are the
/// tightest consumer of this value.
pub const MAX_SESSION_IDENTIFIER_LEN: usize = 32;

/// The native cloud identity found by source discovery.
pub struct WorkloadIdentity {
	platform: Platform,
	session_identifier: String,
	token_source: Box<dyn TokenSource>,
	raw_identity_token: SecretString,
}

impl WorkloadIdentity {
	pub fn new(
		platform: Platform,
		session_identifier: impl AsRef<str>,
		token_source: Box<dyn TokenSource>,
		raw_identity_token: impl Into<String>,
	) -> Self {
		WorkloadIdentity {
			platform,
			session_identifier: truncate_session_identifier(session_identifier.as_ref()),
			token_source,
			raw_identity_token: SecretString::from(raw_identity_token.into()),
		}
	}

	pub fn platform(&self) -> Platform {
		self.platform
	}

	pub fn session_identifier(&self) -> &str {
		&self.session_identifier
	}

	/// The token captured when the identity was discovered. This is what the
	/// target exchanges present as their proof of identity.
	pub fn raw_identity_token(&self) -> &str {
		self.raw_identity_token.expose_secret()
	}

	/// A fresh token from the underlying source.
	pub async fn token(&self) -> anyhow::Result<IdentityToken> {
		self.token_source.token().await
	}
}

impl Debug for WorkloadIdentity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkloadIdentity")
			.field("platform", &self.platform)
			.field("session_identifier", &self.session_identifier)
			.field("token_source", &self.token_source)
			.finish_non_exhaustive()
	}
}

fn truncate_session_identifier(id: &str) -> String {
	id.chars().take(MAX_SESSION_IDENTIFIER_LEN).collect()
}

/// Joins two platform identifiers into a session identifier, falling back to
/// a generated one when either half is missing.
pub fn session_identifier(first: Option<&str>, second: Option<&str>) -> String {
	match (first, second) {
		(Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
			truncate_session_identifier(&format!("{a}-{b}"))
		},
		_ => generated_session_identifier(),
	}
}

/// `k8xauth-<unix nanos>`, for platforms without a natural session identifier.
pub fn generated_session_identifier() -> String {
	let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
	truncate_session_identifier(&format!("{PROGRAM_NAME}-{nanos}"))
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
