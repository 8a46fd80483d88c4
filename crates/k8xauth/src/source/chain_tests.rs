use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;

use super::*;
use crate::test_helpers::workload_identity;

struct FakeProbe {
	kind: ProbeKind,
	platform: Platform,
	succeed: bool,
	calls: Arc<AtomicUsize>,
}

impl FakeProbe {
	fn new(kind: ProbeKind, platform: Platform, succeed: bool) -> (Box<dyn IdentityProbe>, Arc<AtomicUsize>) {
		let calls = Arc::new(AtomicUsize::new(0));
		let probe = FakeProbe {
			kind,
			platform,
			succeed,
			calls: calls.clone(),
		};
		(Box::new(probe), calls)
	}
}

#[async_trait::async_trait]
impl IdentityProbe for FakeProbe {
	fn kind(&self) -> ProbeKind {
		self.kind
	}

	async fn probe(&self) -> anyhow::Result<WorkloadIdentity> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if self.succeed {
			Ok(workload_identity(self.platform, self.kind.as_str(), "token"))
		} else {
			anyhow::bail!("{} environment not present", self.kind.as_str())
		}
	}
}

#[tokio::test]
async fn first_successful_probe_wins() {
	k8xauth_core::telemetry::testing::setup_test_logging();
	let (gke, gke_calls) = FakeProbe::new(ProbeKind::Gke, Platform::Gcp, true);
	let (eks, eks_calls) = FakeProbe::new(ProbeKind::Eks, Platform::Aws, true);
	let (aks, aks_calls) = FakeProbe::new(ProbeKind::Aks, Platform::Azure, true);
	let chain = DiscoveryChain::new(vec![gke, eks, aks]);

	let identity = chain.discover(SourceFilter::All).await.unwrap();
	assert_eq!(identity.platform(), Platform::Gcp);
	assert_eq!(gke_calls.load(Ordering::SeqCst), 1);
	// Later probes are never attempted once one succeeds.
	assert_eq!(eks_calls.load(Ordering::SeqCst), 0);
	assert_eq!(aks_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failures_fall_through_in_order() {
	let (gke, gke_calls) = FakeProbe::new(ProbeKind::Gke, Platform::Gcp, false);
	let (eks, eks_calls) = FakeProbe::new(ProbeKind::Eks, Platform::Aws, false);
	let (aks, aks_calls) = FakeProbe::new(ProbeKind::Aks, Platform::Azure, true);
	let chain = DiscoveryChain::new(vec![gke, eks, aks]);

	let identity = chain.discover(SourceFilter::All).await.unwrap();
	assert_eq!(identity.platform(), Platform::Azure);
	assert_eq!(gke_calls.load(Ordering::SeqCst), 1);
	assert_eq!(eks_calls.load(Ordering::SeqCst), 1);
	assert_eq!(aks_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn filter_skips_other_probes() {
	let (gke, gke_calls) = FakeProbe::new(ProbeKind::Gke, Platform::Gcp, true);
	let (eks, eks_calls) = FakeProbe::new(ProbeKind::Eks, Platform::Aws, true);
	let (aks, _) = FakeProbe::new(ProbeKind::Aks, Platform::Azure, true);
	let chain = DiscoveryChain::new(vec![gke, eks, aks]);

	let identity = chain.discover(SourceFilter::Eks).await.unwrap();
	assert_eq!(identity.platform(), Platform::Aws);
	assert_eq!(gke_calls.load(Ordering::SeqCst), 0);
	assert_eq!(eks_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhaustion_is_an_error() {
	let (gke, _) = FakeProbe::new(ProbeKind::Gke, Platform::Gcp, false);
	let (eks, _) = FakeProbe::new(ProbeKind::Eks, Platform::Aws, false);
	let (aks, _) = FakeProbe::new(ProbeKind::Aks, Platform::Azure, false);
	let chain = DiscoveryChain::new(vec![gke, eks, aks]);

	let err = chain.discover(SourceFilter::All).await.unwrap_err();
	assert_matches!(err, Error::NoIdentitySourceFound { ref tried } if tried == "gke, eks, aks");
}

#[tokio::test]
async fn filter_with_failing_probe_does_not_fall_back() {
	let (gke, _) = FakeProbe::new(ProbeKind::Gke, Platform::Gcp, true);
	let (aks, aks_calls) = FakeProbe::new(ProbeKind::Aks, Platform::Azure, false);
	let chain = DiscoveryChain::new(vec![gke, aks]);

	let err = chain.discover(SourceFilter::Aks).await.unwrap_err();
	assert_matches!(err, Error::NoIdentitySourceFound { .. });
	assert_eq!(aks_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn source_filter_parsing() {
	assert_eq!("all".parse::<SourceFilter>().unwrap(), SourceFilter::All);
	assert_eq!("GKE".parse::<SourceFilter>().unwrap(), SourceFilter::Gke);
	assert_eq!("eks".parse::<SourceFilter>().unwrap(), SourceFilter::Eks);
	assert_eq!("aks".parse::<SourceFilter>().unwrap(), SourceFilter::Aks);
	assert_matches!("gcp".parse::<SourceFilter>(), Err(Error::UnknownSource(_)));
}
