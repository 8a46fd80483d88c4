//! The `ExecCredential` document kubectl reads from an exec plugin's stdout.
use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::*;

/// kubectl describes the invocation through this variable, including the
/// `apiVersion` it expects back.
pub const EXEC_INFO_ENV: &str = "KUBERNETES_EXEC_INFO";

const KIND: &str = "ExecCredential";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("cannot parse {EXEC_INFO_ENV}: {0}")]
	ExecInfo(#[from] serde_json::Error),
	#[error("api version: {0} is not supported")]
	UnsupportedVersion(String),
	#[error("could not write the ExecCredential: {0}")]
	Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ApiVersion {
	#[serde(rename = "client.authentication.k8s.io/v1")]
	V1,
	#[default]
	#[serde(rename = "client.authentication.k8s.io/v1beta1")]
	V1Beta1,
}

impl ApiVersion {
	pub fn as_str(&self) -> &'static str {
		match self {
			ApiVersion::V1 => "client.authentication.k8s.io/v1",
			ApiVersion::V1Beta1 => "client.authentication.k8s.io/v1beta1",
		}
	}

	/// Picks the version requested by kubectl. A missing or empty variable,
	/// or one without an `apiVersion`, selects v1beta1.
	pub fn from_exec_info(exec_info: Option<&str>) -> Result<Self, Error> {
		#[derive(Deserialize)]
		#[serde(rename_all = "camelCase")]
		struct ExecInfo {
			#[serde(default)]
			api_version: String,
		}

		let Some(raw) = exec_info.filter(|s| !s.trim().is_empty()) else {
			return Ok(ApiVersion::default());
		};
		let info: ExecInfo = serde_json::from_str(raw)?;
		match info.api_version.as_str() {
			"" => Ok(ApiVersion::default()),
			v if v == ApiVersion::V1.as_str() => Ok(ApiVersion::V1),
			v if v == ApiVersion::V1Beta1.as_str() => Ok(ApiVersion::V1Beta1),
			other => Err(Error::UnsupportedVersion(other.to_string())),
		}
	}

	pub fn from_env() -> Result<Self, Error> {
		Self::from_exec_info(std::env::var(EXEC_INFO_ENV).ok().as_deref())
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredential {
	pub api_version: ApiVersion,
	pub kind: String,
	pub status: ExecCredentialStatus,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialStatus {
	pub token: String,
	#[serde(with = "rfc3339_seconds")]
	pub expiration_timestamp: DateTime<Utc>,
}

impl ExecCredential {
	pub fn new(version: ApiVersion, token: &IdentityToken) -> Self {
		ExecCredential {
			api_version: version,
			kind: KIND.to_string(),
			status: ExecCredentialStatus {
				token: token.access_token().to_string(),
				expiration_timestamp: token.expiry(),
			},
		}
	}

	/// Writes the document as a single JSON line.
	pub fn write(&self, mut w: impl Write) -> Result<(), Error> {
		serde_json::to_writer(&mut w, self).map_err(std::io::Error::from)?;
		w.write_all(b"\n")?;
		w.flush()?;
		Ok(())
	}
}

/// Kubernetes timestamps are RFC 3339 in UTC with second precision.
mod rfc3339_seconds {
	use chrono::{DateTime, SecondsFormat, Utc};
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Secs, true))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
		let s = String::deserialize(d)?;
		DateTime::parse_from_rfc3339(&s)
			.map(|t| t.with_timezone(&Utc))
			.map_err(serde::de::Error::custom)
	}
}

/// Renders `token` in the version kubectl asked for and writes it to `w`.
pub fn write_exec_credential(token: &IdentityToken, w: impl Write) -> Result<(), Error> {
	let version = ApiVersion::from_env()?;
	trace!(
		api_version = version.as_str(),
		expiration = %token.expiry().to_rfc3339_opts(SecondsFormat::Secs, true),
		"writing exec credential"
	);
	ExecCredential::new(version, token).write(w)
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
