//! Source identity discovery.
//!
//! Each probe checks for one native cloud identity mechanism. Probes run in a
//! fixed priority order and the first one that produces a usable token wins.
//! A probe failing is the normal case when we are not running on its cloud,
//! so failures are only logged at debug level.
use std::str::FromStr;

use crate::*;

pub mod aws;
pub mod azure;
pub mod gcp;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("no valid authentication source found (tried: {tried})")]
	NoIdentitySourceFound { tried: String },
	#[error("unknown authentication source {0:?}, expected one of gke, eks, aks, all")]
	UnknownSource(String),
}

/// The native identity mechanisms, named after the cluster flavour that
/// provides them.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProbeKind {
	/// GKE workload identity via the GCP metadata server.
	Gke,
	/// EKS IAM roles for service accounts.
	Eks,
	/// AKS workload identity federation.
	Aks,
}

impl ProbeKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProbeKind::Gke => "gke",
			ProbeKind::Eks => "eks",
			ProbeKind::Aks => "aks",
		}
	}
}

/// Which probes the caller allows to run.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum SourceFilter {
	Gke,
	Eks,
	Aks,
	#[default]
	All,
}

impl SourceFilter {
	pub fn allows(&self, kind: ProbeKind) -> bool {
		match self {
			SourceFilter::All => true,
			SourceFilter::Gke => kind == ProbeKind::Gke,
			SourceFilter::Eks => kind == ProbeKind::Eks,
			SourceFilter::Aks => kind == ProbeKind::Aks,
		}
	}
}

impl FromStr for SourceFilter {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"gke" => Ok(SourceFilter::Gke),
			"eks" => Ok(SourceFilter::Eks),
			"aks" => Ok(SourceFilter::Aks),
			"all" => Ok(SourceFilter::All),
			_ => Err(Error::UnknownSource(s.to_string())),
		}
	}
}

#[async_trait::async_trait]
pub trait IdentityProbe: Send + Sync {
	fn kind(&self) -> ProbeKind;

	/// Returns an identity only once a token has actually been fetched from it.
	async fn probe(&self) -> anyhow::Result<WorkloadIdentity>;
}

pub struct DiscoveryChain {
	probes: Vec<Box<dyn IdentityProbe>>,
}

impl DiscoveryChain {
	/// Probes are tried in the order given.
	pub fn new(probes: Vec<Box<dyn IdentityProbe>>) -> Self {
		DiscoveryChain { probes }
	}

	/// The production chain, in priority order gke, eks, aks.
	pub fn ambient() -> Self {
		DiscoveryChain::new(vec![
			Box::new(gcp::GcpProbe::default()),
			Box::new(aws::AwsProbe::from_env()),
			Box::new(azure::AzureProbe::default()),
		])
	}

	pub async fn discover(&self, filter: SourceFilter) -> Result<WorkloadIdentity, Error> {
		let mut tried = Vec::new();
		for probe in self.probes.iter().filter(|p| filter.allows(p.kind())) {
			let kind = probe.kind().as_str();
			tried.push(kind);
			debug!(source = kind, "source authentication: trying");
			match probe.probe().await {
				Ok(identity) => {
					info!(
						source = kind,
						platform = %identity.platform(),
						"source authentication: retrieved identity token"
					);
					return Ok(identity);
				},
				Err(e) => {
					debug!(source = kind, "source authentication: unavailable: {e:#}");
				},
			}
		}
		Err(Error::NoIdentitySourceFound {
			tried: if tried.is_empty() {
				"none".to_string()
			} else {
				tried.join(", ")
			},
		})
	}
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
