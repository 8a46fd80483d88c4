use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sigv4::http_request::{
	SignableBody, SignableRequest, SignatureLocation, SigningSettings, sign,
};
use aws_sigv4::sign::v4::SigningParams;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

use crate::target::{Clock, Error, TargetKind};
use crate::*;

pub const DEFAULT_STS_REGION: &str = "us-east-1";

/// Prefix the aws-iam-authenticator expects in front of the encoded URL.
const TOKEN_PREFIX: &str = "k8s-aws-v1.";
/// Header binding a presigned request to a single cluster.
const CLUSTER_ID_HEADER: &str = "x-k8s-aws-id";
/// Lifetime of the presigned URL. The authenticator rejects anything older
/// than 15 minutes regardless.
const PRESIGN_EXPIRES_IN: Duration = Duration::from_secs(60);
/// Reported token lifetime, one minute short of the authenticator's limit.
const TOKEN_LIFETIME: chrono::Duration = chrono::Duration::minutes(14);

#[derive(Debug, Clone)]
pub struct EksParams {
	pub role_arn: String,
	pub cluster: String,
	pub sts_region: String,
}

pub struct EksExchange {
	/// Overrides the STS endpoint used for AssumeRoleWithWebIdentity.
	sts_endpoint: Option<String>,
	clock: Clock,
}

impl Default for EksExchange {
	fn default() -> Self {
		EksExchange {
			sts_endpoint: None,
			clock: Utc::now,
		}
	}
}

impl EksExchange {
	pub fn new(sts_endpoint: Option<String>, clock: Clock) -> Self {
		EksExchange {
			sts_endpoint,
			clock,
		}
	}

	pub async fn exchange(
		&self,
		identity: &WorkloadIdentity,
		params: &EksParams,
	) -> Result<IdentityToken, Error> {
		if params.role_arn.is_empty() || params.cluster.is_empty() {
			return Err(Error::Configuration(
				TargetKind::Eks,
				anyhow::anyhow!("role ARN and cluster name are required"),
			));
		}
		let credentials = self
			.assume_role(identity, params)
			.await
			.map_err(|e| Error::Exchange(TargetKind::Eks, e))?;
		let token = presigned_token(&credentials, params, (self.clock)())
			.map_err(|e| {
				Error::Exchange(
					TargetKind::Eks,
					e.context("failed to presign GetCallerIdentity"),
				)
			})?;
		info!(role_arn = %params.role_arn, cluster = %params.cluster, "obtained EKS token");
		Ok(token)
	}

	async fn assume_role(
		&self,
		identity: &WorkloadIdentity,
		params: &EksParams,
	) -> anyhow::Result<Credentials> {
		let mut loader = aws_config::defaults(BehaviorVersion::v2026_01_12())
			.region(Region::new(params.sts_region.clone()))
			.no_credentials();
		if let Some(endpoint) = &self.sts_endpoint {
			loader = loader.endpoint_url(endpoint);
		}
		let client = aws_sdk_sts::Client::new(&loader.load().await);

		let resp = client
			.assume_role_with_web_identity()
			.role_arn(&params.role_arn)
			.role_session_name(identity.session_identifier())
			.web_identity_token(identity.raw_identity_token())
			.send()
			.await
			.map_err(|e| anyhow::anyhow!("{}", aws_sdk_sts::error::DisplayErrorContext(&e)))?;
		let creds = resp
			.credentials()
			.ok_or_else(|| anyhow::anyhow!("AssumeRoleWithWebIdentity returned no credentials"))?;
		debug!(
			role_arn = %params.role_arn,
			expiration = %creds.expiration(),
			"assumed role with web identity"
		);
		Ok(Credentials::new(
			creds.access_key_id(),
			creds.secret_access_key(),
			Some(creds.session_token().to_string()),
			std::time::SystemTime::try_from(*creds.expiration()).ok(),
			"AssumeRoleWithWebIdentity",
		))
	}
}

/// DNS suffix of the regional STS endpoint for the partition `region` lives in.
fn sts_domain(region: &str) -> &'static str {
	if region.starts_with("cn-") {
		"amazonaws.com.cn"
	} else if region.starts_with("us-isob-") {
		"sc2s.sgov.gov"
	} else if region.starts_with("us-iso-") {
		"c2s.ic.gov"
	} else {
		"amazonaws.com"
	}
}

/// Builds a bearer token for the EKS API server: a presigned STS
/// GetCallerIdentity URL carrying the cluster name as a signed header.
pub fn presigned_token(
	credentials: &Credentials,
	params: &EksParams,
	now: DateTime<Utc>,
) -> anyhow::Result<IdentityToken> {
	let url = format!(
		"https://sts.{}.{}/?Action=GetCallerIdentity&Version=2011-06-15",
		params.sts_region,
		sts_domain(&params.sts_region)
	);
	let mut req = http::Request::builder()
		.method(http::Method::GET)
		.uri(&url)
		.header(CLUSTER_ID_HEADER, &params.cluster)
		.body(())?;

	let mut settings = SigningSettings::default();
	settings.signature_location = SignatureLocation::QueryParams;
	settings.expires_in = Some(PRESIGN_EXPIRES_IN);

	let identity = credentials.clone().into();
	let signing_params = SigningParams::builder()
		.identity(&identity)
		.region(&params.sts_region)
		.name("sts")
		.time(now.into())
		.settings(settings)
		.build()?
		.into();

	let signable_request = SignableRequest::new(
		req.method().as_str(),
		url.as_str(),
		req
			.headers()
			.iter()
			.filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v))),
		SignableBody::Bytes(&[]),
	)?;
	let (instructions, _sig) = sign(signable_request, &signing_params)?.into_parts();
	instructions.apply_to_request_http1x(&mut req);

	trace!("presigned GetCallerIdentity for cluster {}", params.cluster);
	Ok(IdentityToken::new(
		format!(
			"{TOKEN_PREFIX}{}",
			URL_SAFE_NO_PAD.encode(req.uri().to_string())
		),
		now + TOKEN_LIFETIME,
	))
}

#[cfg(test)]
#[path = "eks_tests.rs"]
mod tests;
