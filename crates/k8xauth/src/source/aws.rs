use std::path::PathBuf;

use aws_config::imds;
use chrono::Utc;
use parking_lot::Mutex;

use crate::source::{IdentityProbe, ProbeKind};
use crate::types::session_identifier;
use crate::*;

pub const REGION_ENV: &str = "AWS_REGION";
pub const ROLE_ARN_ENV: &str = "AWS_ROLE_ARN";
pub const TOKEN_FILE_ENV: &str = "AWS_WEB_IDENTITY_TOKEN_FILE";

/// A cached token is re-read from disk once it is this close to expiring.
const EARLY_EXPIRY: Duration = Duration::from_secs(60);

const INSTANCE_IDENTITY_DOCUMENT: &str = "/latest/dynamic/instance-identity/document";

/// The environment the EKS pod identity webhook injects for IRSA.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IrsaEnv {
	pub region: String,
	pub role_arn: String,
	pub token_file: PathBuf,
}

impl IrsaEnv {
	pub fn from_env() -> Option<Self> {
		Self::lookup(|key| std::env::var(key).ok())
	}

	/// All three variables must be present and non-empty.
	pub fn lookup(get: impl Fn(&str) -> Option<String>) -> Option<Self> {
		let get = |key: &str| get(key).filter(|v| !v.is_empty());
		Some(IrsaEnv {
			region: get(REGION_ENV)?,
			role_arn: get(ROLE_ARN_ENV)?,
			token_file: PathBuf::from(get(TOKEN_FILE_ENV)?),
		})
	}
}

/// The projected service account token. Kubelet rotates the file in place,
/// so a token close to expiry is re-read rather than reused.
#[derive(Debug)]
pub struct WebIdentityTokenFile {
	path: PathBuf,
	cached: Mutex<Option<IdentityToken>>,
}

impl WebIdentityTokenFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		WebIdentityTokenFile {
			path: path.into(),
			cached: Mutex::new(None),
		}
	}
}

#[async_trait::async_trait]
impl TokenSource for WebIdentityTokenFile {
	async fn token(&self) -> anyhow::Result<IdentityToken> {
		let cached = self.cached.lock().clone();
		if let Some(token) = cached
			&& !token.expires_within(Utc::now(), EARLY_EXPIRY)
		{
			return Ok(token);
		}

		let contents = fs_err::tokio::read_to_string(&self.path).await?;
		let raw = contents.trim();
		if raw.is_empty() {
			anyhow::bail!("web identity token file {} is empty", self.path.display());
		}
		// Signature verification is STS's job when the token is redeemed.
		let expiry = jwt::unverified_expiry(raw)?;
		if expiry <= Utc::now() {
			anyhow::bail!(
				"web identity token in {} expired at {expiry}",
				self.path.display()
			);
		}
		let token = IdentityToken::new(raw, expiry);
		*self.cached.lock() = Some(token.clone());
		Ok(token)
	}
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceIdentity {
	account_id: String,
	instance_id: String,
}

async fn instance_identity(client: &imds::Client) -> anyhow::Result<InstanceIdentity> {
	let document = client.get(INSTANCE_IDENTITY_DOCUMENT).await?;
	Ok(serde_json::from_str(document.as_ref())?)
}

/// Probes for EKS IAM roles for service accounts.
pub struct AwsProbe {
	env: Option<IrsaEnv>,
	imds: Option<imds::Client>,
}

impl AwsProbe {
	pub fn from_env() -> Self {
		AwsProbe::new(IrsaEnv::from_env(), Some(imds::Client::builder().build()))
	}

	/// `imds` is only used for the session identifier; without it a generated
	/// identifier is used.
	pub fn new(env: Option<IrsaEnv>, imds: Option<imds::Client>) -> Self {
		AwsProbe { env, imds }
	}

	async fn session_identifier(&self) -> String {
		let Some(client) = &self.imds else {
			return session_identifier(None, None);
		};
		match instance_identity(client).await {
			Ok(doc) => session_identifier(Some(&doc.account_id), Some(&doc.instance_id)),
			Err(e) => {
				debug!("couldn't fetch instance identity from AWS instance metadata: {e}");
				session_identifier(None, None)
			},
		}
	}
}

#[async_trait::async_trait]
impl IdentityProbe for AwsProbe {
	fn kind(&self) -> ProbeKind {
		ProbeKind::Eks
	}

	async fn probe(&self) -> anyhow::Result<WorkloadIdentity> {
		let Some(env) = &self.env else {
			anyhow::bail!("IRSA environment variables not set ({REGION_ENV}, {ROLE_ARN_ENV}, {TOKEN_FILE_ENV})");
		};
		trace!(region = %env.region, role_arn = %env.role_arn, "found IRSA environment");
		let source = WebIdentityTokenFile::new(&env.token_file);
		let token = source.token().await?;
		let session = self.session_identifier().await;
		Ok(WorkloadIdentity::new(
			Platform::Aws,
			session,
			Box::new(source),
			token.access_token(),
		))
	}
}

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;
