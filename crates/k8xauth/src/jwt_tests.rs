use assert_matches::assert_matches;
use serde_json::json;

use super::*;
use crate::test_helpers::unsigned_token;

#[test]
fn expiry_is_read_without_verification() {
	let token = unsigned_token(json!({
		"iss": "https://oidc.eks.us-east-1.amazonaws.com/id/EXAMPLE",
		"aud": "sts.amazonaws.com",
		"sub": "system:serviceaccount:argocd:argocd-server",
		"exp": 1893456000,
	}));
	let exp = unverified_expiry(&token).unwrap();
	assert_eq!(exp.timestamp(), 1893456000);
}

#[test]
fn expiry_is_read_whatever_the_algorithm() {
	let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"system:serviceaccount:default:app","exp":1893456000}"#);
	for alg in ["RS256", "ES256", "PS256", "HS256"] {
		let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{alg}","typ":"JWT","kid":"k1"}}"#));
		let token = format!("{header}.{payload}.bm90LWEtcmVhbC1zaWduYXR1cmU");
		let exp = unverified_expiry(&token).unwrap_or_else(|e| panic!("{alg}: {e}"));
		assert_eq!(exp.timestamp(), 1893456000, "{alg}");
	}
}

#[test]
fn expired_tokens_still_parse() {
	let token = unsigned_token(json!({"exp": 1000}));
	assert_eq!(unverified_expiry(&token).unwrap().timestamp(), 1000);
}

#[test]
fn missing_expiry_is_rejected() {
	let token = unsigned_token(json!({"sub": "nobody"}));
	assert_matches!(unverified_expiry(&token), Err(Error::Invalid(_)));
}

#[test]
fn garbage_is_rejected() {
	assert_matches!(unverified_expiry("not-a-jwt"), Err(Error::Invalid(_)));
}

#[test]
fn decode_for_display_splits_the_token() {
	let token = unsigned_token(json!({"sub": "me", "exp": 10}));
	let decoded = decode_for_display(&token).unwrap();
	assert_eq!(decoded["header"]["alg"], "RS256");
	assert_eq!(decoded["payload"]["sub"], "me");
	assert_eq!(decoded["signature"], "c2lnbmF0dXJl");
}

#[test]
fn decode_for_display_requires_three_parts() {
	assert_matches!(decode_for_display("a.b"), Err(Error::Parts(2)));
}

#[test]
fn pretty_print_writes_json() {
	let token = unsigned_token(json!({"sub": "me", "exp": 10}));
	let mut out = Vec::new();
	pretty_print(&token, &mut out).unwrap();
	let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
	assert_eq!(parsed["payload"]["exp"], 10);
	assert!(out.ends_with(b"\n"));
}
