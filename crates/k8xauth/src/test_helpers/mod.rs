use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::*;

/// Builds a compact JWT with a junk signature. Nothing in this crate verifies
/// source token signatures, so this is enough to exercise claim parsing.
pub fn unsigned_token(claims: serde_json::Value) -> String {
	let header = json!({"alg": "RS256", "typ": "JWT", "kid": "test"});
	format!(
		"{}.{}.c2lnbmF0dXJl",
		URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
		URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
	)
}

/// A token source that always hands back the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(pub IdentityToken);

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
	async fn token(&self) -> anyhow::Result<IdentityToken> {
		Ok(self.0.clone())
	}
}

pub fn workload_identity(platform: Platform, session: &str, raw: &str) -> WorkloadIdentity {
	let expiry: DateTime<Utc> = Utc::now() + chrono::Duration::hours(1);
	WorkloadIdentity::new(
		platform,
		session,
		Box::new(StaticTokenSource(IdentityToken::new(raw, expiry))),
		raw,
	)
}
