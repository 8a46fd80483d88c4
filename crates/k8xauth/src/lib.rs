pub(crate) use std::fmt::Debug;
pub(crate) use std::sync::Arc;
pub(crate) use std::time::Duration;

pub(crate) use tracing::{debug, info, trace, warn};

pub mod app;
pub mod credential;
pub mod jwt;
pub mod source;
pub mod target;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use types::{IdentityToken, Platform, TokenSource, WorkloadIdentity};

/// Name used wherever a generated session identifier or provider name needs a
/// stable prefix.
pub const PROGRAM_NAME: &str = "k8xauth";

/// Status reported to the process supervisor for most fatal conditions.
pub const EXIT_FAILURE: i32 = 1;
/// Status reported when a GKE service account impersonation was rejected.
pub const EXIT_IMPERSONATION_FAILURE: i32 = 2;

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error(transparent)]
	Source(#[from] source::Error),
	#[error(transparent)]
	Target(#[from] target::Error),
	#[error(transparent)]
	Credential(#[from] credential::Error),
}

impl Error {
	pub fn exit_code(&self) -> i32 {
		match self {
			Error::Target(target::Error::Impersonation(_)) => EXIT_IMPERSONATION_FAILURE,
			_ => EXIT_FAILURE,
		}
	}
}

/// A plain HTTP client for the token endpoints this crate talks to directly.
/// Cloud SDK clients bring their own transport.
pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
	use anyhow::Context;
	reqwest::Client::builder()
		.timeout(Duration::from_secs(30))
		.build()
		.context("failed to build HTTP client")
}
