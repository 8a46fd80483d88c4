use azure_core::credentials::TokenCredential;
use chrono::{DateTime, Utc};

use crate::source::{IdentityProbe, ProbeKind};
use crate::types::generated_session_identifier;
use crate::*;

/// Scope for tokens that are meant to be exchanged with another identity
/// provider rather than used against Azure resources.
pub const TOKEN_EXCHANGE_SCOPE: &str = "api://AzureADTokenExchange/.default";

pub(crate) fn expiry_from(expires_on: time::OffsetDateTime) -> anyhow::Result<DateTime<Utc>> {
	DateTime::from_timestamp(expires_on.unix_timestamp(), expires_on.nanosecond())
		.ok_or_else(|| anyhow::anyhow!("token expiry {expires_on} is out of range"))
}

/// Adapts an Azure [`TokenCredential`] for a single scope.
pub struct CredentialTokenSource {
	credential: Arc<dyn TokenCredential>,
	scope: String,
}

impl CredentialTokenSource {
	pub fn new(credential: Arc<dyn TokenCredential>, scope: impl Into<String>) -> Self {
		CredentialTokenSource {
			credential,
			scope: scope.into(),
		}
	}
}

impl Debug for CredentialTokenSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CredentialTokenSource")
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}

#[async_trait::async_trait]
impl TokenSource for CredentialTokenSource {
	async fn token(&self) -> anyhow::Result<IdentityToken> {
		let token = self
			.credential
			.get_token(&[self.scope.as_str()], None)
			.await?;
		Ok(IdentityToken::new(
			token.token.secret(),
			expiry_from(token.expires_on)?,
		))
	}
}

/// Probes for AKS workload identity federation. The credential reads
/// `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and `AZURE_FEDERATED_TOKEN_FILE`.
#[derive(Default)]
pub struct AzureProbe {
	credential: Option<Arc<dyn TokenCredential>>,
}

impl AzureProbe {
	pub fn with_credential(credential: Arc<dyn TokenCredential>) -> Self {
		AzureProbe {
			credential: Some(credential),
		}
	}

	fn credential(&self) -> anyhow::Result<Arc<dyn TokenCredential>> {
		match &self.credential {
			Some(c) => Ok(c.clone()),
			None => Ok(azure_identity::WorkloadIdentityCredential::new(None)?),
		}
	}
}

#[async_trait::async_trait]
impl IdentityProbe for AzureProbe {
	fn kind(&self) -> ProbeKind {
		ProbeKind::Aks
	}

	async fn probe(&self) -> anyhow::Result<WorkloadIdentity> {
		let source = CredentialTokenSource::new(self.credential()?, TOKEN_EXCHANGE_SCOPE);
		let token = source.token().await?;
		// There is no natural session identifier for a pod identity.
		Ok(WorkloadIdentity::new(
			Platform::Azure,
			generated_session_identifier(),
			Box::new(source),
			token.access_token(),
		))
	}
}
