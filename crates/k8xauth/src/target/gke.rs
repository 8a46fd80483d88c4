use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::target::{Clock, Error, TargetKind};
use crate::*;

pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.googleapis.com/v1/token";
pub const DEFAULT_IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const REQUESTED_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
const SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const IMPERSONATION_LIFETIME: &str = "3600s";

#[derive(Debug, Clone)]
pub struct GkeParams {
	/// Numeric project ID owning the workload identity pool.
	pub project_id: String,
	pub pool_id: String,
	pub provider_id: String,
	/// When set, the federated token is traded for this service account's token.
	pub service_account: Option<String>,
}

impl GkeParams {
	/// Full resource name of the workload identity pool provider.
	pub fn audience(&self) -> String {
		format!(
			"//iam.googleapis.com/projects/{}/locations/global/workloadIdentityPools/{}/providers/{}",
			self.project_id, self.pool_id, self.provider_id
		)
	}
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct StsExchangeRequest<'a> {
	grant_type: &'a str,
	requested_token_type: &'a str,
	subject_token_type: &'a str,
	audience: &'a str,
	scope: &'a str,
	subject_token: &'a str,
}

#[derive(serde::Deserialize)]
struct StsExchangeResponse {
	access_token: String,
	expires_in: i64,
}

#[derive(serde::Serialize)]
struct GenerateAccessTokenRequest<'a> {
	scope: [&'a str; 1],
	lifetime: &'a str,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateAccessTokenResponse {
	access_token: String,
	#[serde(default)]
	expire_time: Option<String>,
}

pub struct GkeExchange {
	sts_endpoint: String,
	iam_endpoint: String,
	clock: Clock,
}

impl Default for GkeExchange {
	fn default() -> Self {
		GkeExchange::new(DEFAULT_STS_ENDPOINT, DEFAULT_IAM_CREDENTIALS_ENDPOINT, Utc::now)
	}
}

impl GkeExchange {
	pub fn new(sts_endpoint: impl Into<String>, iam_endpoint: impl Into<String>, clock: Clock) -> Self {
		GkeExchange {
			sts_endpoint: sts_endpoint.into(),
			iam_endpoint: iam_endpoint.into().trim_end_matches('/').to_string(),
			clock,
		}
	}

	pub async fn exchange(
		&self,
		identity: &WorkloadIdentity,
		params: &GkeParams,
	) -> Result<IdentityToken, Error> {
		if params.project_id.is_empty() || params.pool_id.is_empty() || params.provider_id.is_empty() {
			return Err(Error::Configuration(
				TargetKind::Gke,
				anyhow::anyhow!("project, pool and provider IDs are required"),
			));
		}
		let client = http_client().map_err(|e| Error::Configuration(TargetKind::Gke, e))?;
		let subject = identity
			.token()
			.await
			.map_err(|e| Error::Exchange(TargetKind::Gke, e.context("failed to obtain source token")))?;
		let federated = self
			.sts_exchange(&client, subject.access_token(), &params.audience())
			.await
			.map_err(|e| Error::Exchange(TargetKind::Gke, e))?;

		let Some(service_account) = params.service_account.as_deref().filter(|s| !s.is_empty())
		else {
			info!(project_id = %params.project_id, "obtained federated GKE token");
			return Ok(federated);
		};
		let token = self
			.impersonate(&client, &federated, service_account)
			.await
			.map_err(Error::Impersonation)?;
		info!(service_account, "obtained GKE token by impersonation");
		Ok(token)
	}

	async fn sts_exchange(
		&self,
		client: &reqwest::Client,
		subject_token: &str,
		audience: &str,
	) -> anyhow::Result<IdentityToken> {
		let now = (self.clock)();
		let resp = client
			.post(&self.sts_endpoint)
			.json(&StsExchangeRequest {
				grant_type: GRANT_TYPE,
				requested_token_type: REQUESTED_TOKEN_TYPE,
				subject_token_type: SUBJECT_TOKEN_TYPE,
				audience,
				scope: SCOPE,
				subject_token,
			})
			.send()
			.await?;
		let sts: StsExchangeResponse = read_json(resp, "STS token exchange").await?;
		if sts.expires_in <= 0 {
			anyhow::bail!("STS token exchange returned a non-positive expires_in ({})", sts.expires_in);
		}
		debug!(audience, expires_in = sts.expires_in, "exchanged token with GCP STS");
		Ok(IdentityToken::new(
			sts.access_token,
			now + chrono::Duration::seconds(sts.expires_in),
		))
	}

	async fn impersonate(
		&self,
		client: &reqwest::Client,
		federated: &IdentityToken,
		service_account: &str,
	) -> anyhow::Result<IdentityToken> {
		let url = format!(
			"{}/v1/projects/-/serviceAccounts/{service_account}:generateAccessToken",
			self.iam_endpoint
		);
		let resp = client
			.post(url)
			.bearer_auth(federated.access_token())
			.json(&GenerateAccessTokenRequest {
				scope: [SCOPE],
				lifetime: IMPERSONATION_LIFETIME,
			})
			.send()
			.await?;
		let generated: GenerateAccessTokenResponse = read_json(resp, "generateAccessToken").await?;
		let expiry = generated
			.expire_time
			.as_deref()
			.and_then(|t| match DateTime::parse_from_rfc3339(t) {
				Ok(t) => Some(t.with_timezone(&Utc)),
				Err(e) => {
					debug!("ignoring unparseable expireTime {t:?}: {e}");
					None
				},
			})
			.unwrap_or_else(|| federated.expiry());
		Ok(IdentityToken::new(generated.access_token, expiry))
	}
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, what: &str) -> anyhow::Result<T> {
	let status = resp.status();
	if !status.is_success() {
		let body = resp.text().await.unwrap_or_default();
		anyhow::bail!("{what} failed with {status}: {body}");
	}
	Ok(resp.json().await?)
}

#[cfg(test)]
#[path = "gke_tests.rs"]
mod tests;
