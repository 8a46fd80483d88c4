use chrono::Utc;
use google_cloud_auth::credentials::idtoken;

use crate::source::{IdentityProbe, ProbeKind};
use crate::types::session_identifier;
use crate::*;

/// Audience requested for the GKE identity token.
pub const TOKEN_AUDIENCE: &str = "gcp";

const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");

/// Identity tokens minted from the application default credentials.
pub struct IdTokenSource {
	creds: idtoken::IDTokenCredentials,
}

impl Debug for IdTokenSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("IdTokenSource")
	}
}

#[async_trait::async_trait]
impl TokenSource for IdTokenSource {
	async fn token(&self) -> anyhow::Result<IdentityToken> {
		// The credentials cache and refresh internally.
		let token = self.creds.id_token().await?;
		let expiry = jwt::unverified_expiry(&token)?;
		if expiry <= Utc::now() {
			anyhow::bail!("GCP identity token already expired at {expiry}");
		}
		Ok(IdentityToken::new(token, expiry))
	}
}

/// Reads instance attributes from the GCE metadata server.
#[derive(Debug, Clone)]
pub struct MetadataClient {
	base_url: String,
}

impl Default for MetadataClient {
	fn default() -> Self {
		let host = std::env::var(METADATA_HOST_ENV)
			.ok()
			.filter(|h| !h.is_empty())
			.unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
		MetadataClient::new(format!("http://{host}"))
	}
}

impl MetadataClient {
	pub fn new(base_url: impl Into<String>) -> Self {
		MetadataClient {
			base_url: base_url.into().trim_end_matches('/').to_string(),
		}
	}

	async fn get(&self, path: &str) -> anyhow::Result<String> {
		let url = format!("{}/computeMetadata/v1/{path}", self.base_url);
		let value = http_client()?
			.get(&url)
			.header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
			.send()
			.await?
			.error_for_status()?
			.text()
			.await?;
		Ok(value.trim().to_string())
	}

	pub async fn project_id(&self) -> anyhow::Result<String> {
		self.get("project/project-id").await
	}

	pub async fn hostname(&self) -> anyhow::Result<String> {
		self.get("instance/hostname").await
	}
}

/// Probes for GKE workload identity.
#[derive(Debug, Clone, Default)]
pub struct GcpProbe {
	metadata: MetadataClient,
}

impl GcpProbe {
	pub fn new(metadata: MetadataClient) -> Self {
		GcpProbe { metadata }
	}

	/// Project and hostname only feed the session identifier, so failing to
	/// read them never fails the probe.
	async fn session_identifier(&self) -> String {
		let project = self
			.metadata
			.project_id()
			.await
			.inspect_err(|e| debug!("couldn't fetch project id from GCP metadata server: {e}"))
			.ok();
		let hostname = self
			.metadata
			.hostname()
			.await
			.inspect_err(|e| debug!("couldn't fetch hostname from GCP metadata server: {e}"))
			.ok();
		session_identifier(project.as_deref(), hostname.as_deref())
	}
}

#[async_trait::async_trait]
impl IdentityProbe for GcpProbe {
	fn kind(&self) -> ProbeKind {
		ProbeKind::Gke
	}

	async fn probe(&self) -> anyhow::Result<WorkloadIdentity> {
		let creds = idtoken::Builder::new(TOKEN_AUDIENCE).build()?;
		let source = IdTokenSource { creds };
		let token = source.token().await?;
		let session = self.session_identifier().await;
		Ok(WorkloadIdentity::new(
			Platform::Gcp,
			session,
			Box::new(source),
			token.access_token(),
		))
	}
}
