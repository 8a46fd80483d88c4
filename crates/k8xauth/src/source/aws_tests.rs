use std::collections::HashMap;
use std::io::Write;

use assert_matches::assert_matches;
use serde_json::json;

use super::*;
use crate::test_helpers::unsigned_token;

fn token_file(exp: i64) -> (tempfile::NamedTempFile, String) {
	let token = unsigned_token(json!({
		"aud": ["sts.amazonaws.com"],
		"sub": "system:serviceaccount:argocd:argocd-application-controller",
		"exp": exp,
	}));
	let mut file = tempfile::NamedTempFile::new().unwrap();
	writeln!(file, "{token}").unwrap();
	(file, token)
}

fn in_one_hour() -> i64 {
	(Utc::now() + chrono::Duration::hours(1)).timestamp()
}

#[test]
fn irsa_env_requires_all_variables() {
	let full: HashMap<&str, &str> = HashMap::from([
		(REGION_ENV, "us-east-2"),
		(ROLE_ARN_ENV, "arn:aws:iam::123456789012:role/argocd"),
		(TOKEN_FILE_ENV, "/var/run/secrets/eks.amazonaws.com/serviceaccount/token"),
	]);
	let env = IrsaEnv::lookup(|k| full.get(k).map(|v| v.to_string())).unwrap();
	assert_eq!(env.region, "us-east-2");
	assert_eq!(
		env.token_file,
		PathBuf::from("/var/run/secrets/eks.amazonaws.com/serviceaccount/token")
	);

	for missing in [REGION_ENV, ROLE_ARN_ENV, TOKEN_FILE_ENV] {
		let partial = |k: &str| {
			if k == missing {
				None
			} else {
				full.get(k).map(|v| v.to_string())
			}
		};
		assert_eq!(IrsaEnv::lookup(partial), None, "{missing} should be required");
	}

	let empty = |k: &str| {
		if k == ROLE_ARN_ENV {
			Some(String::new())
		} else {
			full.get(k).map(|v| v.to_string())
		}
	};
	assert_eq!(IrsaEnv::lookup(empty), None);
}

#[tokio::test]
async fn token_file_is_read_and_cached() {
	let (file, token) = token_file(in_one_hour());
	let source = WebIdentityTokenFile::new(file.path());
	let first = source.token().await.unwrap();
	assert_eq!(first.access_token(), token);
	assert!((first.expiry().timestamp() - in_one_hour()).abs() <= 1);

	// Rewriting the file is not observed while the cached token is fresh.
	let (replacement, _) = token_file(in_one_hour() + 60);
	fs_err::copy(replacement.path(), file.path()).unwrap();
	let second = source.token().await.unwrap();
	assert_eq!(second.access_token(), token);
}

#[tokio::test]
async fn token_close_to_expiry_is_reread() {
	let soon = (Utc::now() + chrono::Duration::seconds(30)).timestamp();
	let (file, old) = token_file(soon);
	let source = WebIdentityTokenFile::new(file.path());
	assert_eq!(source.token().await.unwrap().access_token(), old);

	let (rotated, new) = token_file(in_one_hour());
	fs_err::copy(rotated.path(), file.path()).unwrap();
	assert_eq!(source.token().await.unwrap().access_token(), new);
}

#[tokio::test]
async fn expired_token_is_rejected() {
	let (file, _) = token_file(1000);
	let source = WebIdentityTokenFile::new(file.path());
	assert!(source.token().await.is_err());
}

#[tokio::test]
async fn probe_without_environment_fails() {
	let probe = AwsProbe::new(None, None);
	let err = probe.probe().await.unwrap_err();
	assert!(err.to_string().contains("IRSA environment variables not set"));
}

#[tokio::test]
async fn probe_with_missing_token_file_fails() {
	let probe = AwsProbe::new(
		Some(IrsaEnv {
			region: "us-east-1".to_string(),
			role_arn: "arn:aws:iam::123456789012:role/argocd".to_string(),
			token_file: PathBuf::from("/nonexistent/token"),
		}),
		None,
	);
	assert_matches!(probe.probe().await, Err(_));
}

#[tokio::test]
async fn probe_builds_identity() {
	let (file, token) = token_file(in_one_hour());
	let probe = AwsProbe::new(
		Some(IrsaEnv {
			region: "us-east-1".to_string(),
			role_arn: "arn:aws:iam::123456789012:role/argocd".to_string(),
			token_file: file.path().to_path_buf(),
		}),
		None,
	);
	let identity = probe.probe().await.unwrap();
	assert_eq!(identity.platform(), Platform::Aws);
	assert_eq!(identity.raw_identity_token(), token);
	assert!(identity.session_identifier().starts_with("k8xauth-"));
	assert!(identity.session_identifier().len() <= 32);
}
