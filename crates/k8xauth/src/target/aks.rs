use azure_core::credentials::{AccessToken, Secret, TokenCredential, TokenRequestOptions};
use azure_identity::UserAssignedId;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;

use crate::source::azure::expiry_from;
use crate::target::{Error, TargetKind};
use crate::*;

/// The Entra server application behind every AKS AAD-enabled API server.
/// See https://azure.github.io/kubelogin/concepts/aks.html
pub const DEFAULT_SERVER_APPLICATION_ID: &str = "6dae42f8-4368-4678-94ff-3960e28e3630";

pub const AUTHORITY_HOST_ENV: &str = "AZURE_AUTHORITY_HOST";
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug, Clone)]
pub struct AksParams {
	pub tenant_id: String,
	pub client_id: String,
	pub server_id: String,
}

impl AksParams {
	pub fn scope(&self) -> String {
		format!("{}/.default", self.server_id)
	}
}

fn credential_error(name: &'static str, msg: impl std::fmt::Display) -> azure_core::Error {
	azure_core::Error::with_message_fn(azure_core::error::ErrorKind::Credential, move || {
		format!("{name}: {msg}")
	})
}

/// Client credentials flow where the client assertion is a token issued by
/// another cloud. The Entra app must trust that issuer through a federated
/// identity credential.
pub struct FederatedCredential {
	client: reqwest::Client,
	token_endpoint: String,
	client_id: String,
	assertion: SecretString,
}

impl Debug for FederatedCredential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FederatedCredential")
			.field("token_endpoint", &self.token_endpoint)
			.field("client_id", &self.client_id)
			.finish_non_exhaustive()
	}
}

#[derive(serde::Deserialize)]
struct TokenResponse {
	access_token: String,
	expires_in: i64,
}

#[derive(serde::Deserialize)]
struct ErrorResponse {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

impl FederatedCredential {
	pub fn new(
		authority_host: &str,
		tenant_id: &str,
		client_id: &str,
		assertion: &str,
	) -> anyhow::Result<Self> {
		let valid_tenant = |t: &str| {
			!t.is_empty()
				&& t
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
		};
		if !valid_tenant(tenant_id) {
			anyhow::bail!("invalid tenant id {tenant_id:?}");
		}
		if client_id.is_empty() {
			anyhow::bail!("client id must not be empty");
		}
		if assertion.is_empty() {
			anyhow::bail!("federated token must not be empty");
		}
		let authority_host = authority_host.trim_end_matches('/');
		if !authority_host.starts_with("https://") && !authority_host.starts_with("http://") {
			anyhow::bail!("invalid authority host {authority_host:?}");
		}
		Ok(FederatedCredential {
			client: http_client()?,
			token_endpoint: format!("{authority_host}/{tenant_id}/oauth2/v2.0/token"),
			client_id: client_id.to_string(),
			assertion: SecretString::from(assertion.to_string()),
		})
	}
}

#[async_trait::async_trait]
impl TokenCredential for FederatedCredential {
	async fn get_token(
		&self,
		scopes: &[&str],
		_options: Option<TokenRequestOptions<'_>>,
	) -> azure_core::Result<AccessToken> {
		const NAME: &str = "FederatedCredential";
		let scope = scopes.join(" ");
		let form = [
			("client_id", self.client_id.as_str()),
			("scope", scope.as_str()),
			("grant_type", "client_credentials"),
			("client_assertion_type", CLIENT_ASSERTION_TYPE),
			("client_assertion", self.assertion.expose_secret()),
		];
		let resp = self
			.client
			.post(&self.token_endpoint)
			.form(&form)
			.send()
			.await
			.map_err(|e| credential_error(NAME, e))?;
		let status = resp.status();
		let body = resp.bytes().await.map_err(|e| credential_error(NAME, e))?;
		if !status.is_success() {
			let detail = match serde_json::from_slice::<ErrorResponse>(&body) {
				Ok(ErrorResponse {
					error,
					error_description: Some(description),
				}) => format!("{error}: {description}"),
				Ok(ErrorResponse { error, .. }) => error,
				Err(_) => String::from_utf8_lossy(&body).into_owned(),
			};
			return Err(credential_error(
				NAME,
				format!("token request failed with {status}: {detail}"),
			));
		}
		let token: TokenResponse =
			serde_json::from_slice(&body).map_err(|e| credential_error(NAME, e))?;
		trace!("{NAME}: obtained token");
		Ok(AccessToken::new(
			Secret::new(token.access_token),
			time::OffsetDateTime::now_utc() + time::Duration::seconds(token.expires_in),
		))
	}
}

/// Tries each credential in order and returns the first token obtained.
/// Later credentials are only asked once every earlier one has failed.
pub struct ChainedCredential {
	sources: Vec<(&'static str, Arc<dyn TokenCredential>)>,
}

impl ChainedCredential {
	pub fn new(sources: Vec<(&'static str, Arc<dyn TokenCredential>)>) -> Self {
		ChainedCredential { sources }
	}
}

impl Debug for ChainedCredential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_list()
			.entries(self.sources.iter().map(|(name, _)| name))
			.finish()
	}
}

#[async_trait::async_trait]
impl TokenCredential for ChainedCredential {
	async fn get_token(
		&self,
		scopes: &[&str],
		options: Option<TokenRequestOptions<'_>>,
	) -> azure_core::Result<AccessToken> {
		let mut errors = Vec::new();
		for (name, source) in &self.sources {
			match source.get_token(scopes, options.clone()).await {
				Ok(token) => {
					debug!("ChainedCredential: authenticated with {name}");
					return Ok(token);
				},
				Err(error) => {
					debug!("ChainedCredential: {name} failed: {error}");
					errors.push((*name, error));
				},
			}
		}
		Err(azure_core::Error::with_message_fn(
			azure_core::error::ErrorKind::Credential,
			|| {
				if errors.is_empty() {
					"ChainedCredential: no credentials configured".to_string()
				} else {
					format!(
						"ChainedCredential: all credentials failed:\n{}",
						format_credential_errors(&errors)
					)
				}
			},
		))
	}
}

fn format_credential_errors(errors: &[(&'static str, azure_core::Error)]) -> String {
	use std::error::Error;
	errors
		.iter()
		.map(|(name, e)| {
			let mut current: Option<&dyn Error> = Some(e);
			let mut stack = vec![];
			while let Some(err) = current.take() {
				stack.push(err.to_string());
				current = err.source();
			}
			format!("{name}: {}", stack.join(" - "))
		})
		.collect::<Vec<String>>()
		.join("\n")
}

/// The IMDS endpoint used by ManagedIdentityCredential when no other
/// managed-identity source is detected via environment variables.
const IMDS_ADDR: &str = "169.254.169.254:80";

/// Without this the SDK retries an unreachable IMDS for well over a minute.
const IMDS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

async fn imds_is_reachable() -> bool {
	tokio::time::timeout(
		IMDS_PROBE_TIMEOUT,
		tokio::net::TcpStream::connect(IMDS_ADDR),
	)
	.await
	.map(|r| r.is_ok())
	.unwrap_or(false)
}

fn has_managed_identity_env_vars() -> bool {
	std::env::var_os("IDENTITY_ENDPOINT").is_some() || std::env::var_os("MSI_ENDPOINT").is_some()
}

fn environment_client_secret() -> Option<(String, String, String)> {
	let get = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
	Some((
		get("AZURE_TENANT_ID")?,
		get("AZURE_CLIENT_ID")?,
		get("AZURE_CLIENT_SECRET")?,
	))
}

pub(crate) fn workload_identity_options(
	tenant_id: &str,
) -> azure_identity::WorkloadIdentityCredentialOptions {
	azure_identity::WorkloadIdentityCredentialOptions {
		tenant_id: Some(tenant_id.to_string()),
		..Default::default()
	}
}

pub(crate) fn azure_cli_options(tenant_id: &str) -> azure_identity::AzureCliCredentialOptions {
	azure_identity::AzureCliCredentialOptions {
		tenant_id: Some(tenant_id.to_string()),
		..Default::default()
	}
}

pub(crate) fn azure_developer_cli_options(
	tenant_id: &str,
) -> azure_identity::AzureDeveloperCliCredentialOptions {
	azure_identity::AzureDeveloperCliCredentialOptions {
		tenant_id: Some(tenant_id.to_string()),
		..Default::default()
	}
}

/// Native Azure identities available to the process, in the order Azure's
/// default credential uses them: environment service principal, workload
/// identity, managed identity, then the Azure CLI and Azure Developer CLI.
/// Workload identity and the CLIs authenticate against `tenant_id`, the
/// tenant of the target cluster. Credentials that cannot be constructed are
/// skipped.
pub async fn ambient_credentials(tenant_id: &str) -> Vec<(&'static str, Arc<dyn TokenCredential>)> {
	let mut sources: Vec<(&'static str, Arc<dyn TokenCredential>)> = Vec::new();

	// The service principal in the environment carries its own tenant.
	if let Some((env_tenant, client_id, client_secret)) = environment_client_secret() {
		match azure_identity::ClientSecretCredential::new(
			&env_tenant,
			client_id,
			Secret::new(client_secret),
			None,
		) {
			Ok(cred) => sources.push(("EnvironmentCredential", cred)),
			Err(e) => debug!("ambient Azure credentials: EnvironmentCredential not available: {e}"),
		}
	}

	match azure_identity::WorkloadIdentityCredential::new(Some(workload_identity_options(tenant_id))) {
		Ok(cred) => sources.push(("WorkloadIdentityCredential", cred)),
		Err(e) => debug!("ambient Azure credentials: WorkloadIdentityCredential not available: {e}"),
	}

	let try_managed_identity = if has_managed_identity_env_vars() {
		true
	} else {
		let reachable = imds_is_reachable().await;
		if !reachable {
			debug!(
				"ambient Azure credentials: IMDS not reachable within {IMDS_PROBE_TIMEOUT:?}, skipping ManagedIdentityCredential"
			);
		}
		reachable
	};
	if try_managed_identity {
		let options = azure_identity::ManagedIdentityCredentialOptions {
			user_assigned_id: std::env::var("AZURE_CLIENT_ID")
				.ok()
				.map(UserAssignedId::ClientId),
			..Default::default()
		};
		match azure_identity::ManagedIdentityCredential::new(Some(options)) {
			Ok(cred) => sources.push(("ManagedIdentityCredential", cred)),
			Err(e) => debug!("ambient Azure credentials: ManagedIdentityCredential not available: {e}"),
		}
	}

	match azure_identity::AzureCliCredential::new(Some(azure_cli_options(tenant_id))) {
		Ok(cred) => sources.push(("AzureCliCredential", cred)),
		Err(e) => debug!("ambient Azure credentials: AzureCliCredential not available: {e}"),
	}
	match azure_identity::AzureDeveloperCliCredential::new(Some(azure_developer_cli_options(
		tenant_id,
	))) {
		Ok(cred) => sources.push(("AzureDeveloperCliCredential", cred)),
		Err(e) => debug!("ambient Azure credentials: AzureDeveloperCliCredential not available: {e}"),
	}

	sources
}

/// The ambient chain for one tenant, assembled the first time a token is
/// requested so that a successful federated exchange never pays for IMDS
/// detection.
pub struct AmbientCredential {
	tenant_id: String,
	chain: OnceCell<ChainedCredential>,
}

impl AmbientCredential {
	pub fn new(tenant_id: impl Into<String>) -> Self {
		AmbientCredential {
			tenant_id: tenant_id.into(),
			chain: OnceCell::new(),
		}
	}
}

impl Debug for AmbientCredential {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AmbientCredential")
			.field("tenant_id", &self.tenant_id)
			.finish_non_exhaustive()
	}
}

#[async_trait::async_trait]
impl TokenCredential for AmbientCredential {
	async fn get_token(
		&self,
		scopes: &[&str],
		options: Option<TokenRequestOptions<'_>>,
	) -> azure_core::Result<AccessToken> {
		let chain = self
			.chain
			.get_or_init(|| async { ChainedCredential::new(ambient_credentials(&self.tenant_id).await) })
			.await;
		chain.get_token(scopes, options).await
	}
}

/// Builds the fallback credential for a target tenant.
pub type AmbientFactory = Arc<dyn Fn(&str) -> Arc<dyn TokenCredential> + Send + Sync>;

pub struct AksExchange {
	authority_host: String,
	ambient: AmbientFactory,
}

impl Default for AksExchange {
	fn default() -> Self {
		let authority_host = std::env::var(AUTHORITY_HOST_ENV)
			.ok()
			.filter(|h| !h.is_empty())
			.unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string());
		AksExchange::new(authority_host, |tenant_id: &str| {
			Arc::new(AmbientCredential::new(tenant_id)) as Arc<dyn TokenCredential>
		})
	}
}

impl AksExchange {
	/// `ambient` builds the fallback used when the federated exchange fails.
	/// It is handed the target tenant.
	pub fn new(
		authority_host: impl Into<String>,
		ambient: impl Fn(&str) -> Arc<dyn TokenCredential> + Send + Sync + 'static,
	) -> Self {
		AksExchange {
			authority_host: authority_host.into(),
			ambient: Arc::new(ambient),
		}
	}

	pub async fn exchange(
		&self,
		identity: &WorkloadIdentity,
		params: &AksParams,
	) -> Result<IdentityToken, Error> {
		let federated = FederatedCredential::new(
			&self.authority_host,
			&params.tenant_id,
			&params.client_id,
			identity.raw_identity_token(),
		)
		.map_err(|e| Error::Configuration(TargetKind::Aks, e))?;

		let federated: Arc<dyn TokenCredential> = Arc::new(federated);
		let chain = ChainedCredential::new(vec![
			("FederatedCredential", federated),
			("AmbientCredential", (self.ambient)(&params.tenant_id)),
		]);
		let scope = params.scope();
		let token = chain
			.get_token(&[scope.as_str()], None)
			.await
			.map_err(|e| Error::Exchange(TargetKind::Aks, e.into()))?;
		let expiry = expiry_from(token.expires_on).map_err(|e| Error::Exchange(TargetKind::Aks, e))?;
		info!(tenant_id = %params.tenant_id, client_id = %params.client_id, "obtained AKS token");
		Ok(IdentityToken::new(token.token.secret(), expiry))
	}
}

#[cfg(test)]
#[path = "aks_tests.rs"]
mod tests;
