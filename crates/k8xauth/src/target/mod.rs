//! Target exchanges: each one turns a source identity into a token for the
//! control plane of a cluster on another cloud.
use crate::*;

pub mod aks;
pub mod eks;
pub mod gke;

/// Wall clock used to stamp signatures and compute expiries.
pub type Clock = fn() -> chrono::DateTime<chrono::Utc>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TargetKind {
	Aks,
	Eks,
	Gke,
}

impl std::fmt::Display for TargetKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			TargetKind::Aks => "AKS",
			TargetKind::Eks => "EKS",
			TargetKind::Gke => "GKE",
		})
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid {0} exchange configuration: {1:#}")]
	Configuration(TargetKind, anyhow::Error),
	#[error("{0} token exchange failed: {1:#}")]
	Exchange(TargetKind, anyhow::Error),
	#[error("GCP service account impersonation failed: {0:#}")]
	Impersonation(anyhow::Error),
}

/// The cluster to fetch credentials for, with its cloud-specific parameters.
#[derive(Debug, Clone)]
pub enum Target {
	Aks(aks::AksParams),
	Eks(eks::EksParams),
	Gke(gke::GkeParams),
}

impl Target {
	pub fn kind(&self) -> TargetKind {
		match self {
			Target::Aks(_) => TargetKind::Aks,
			Target::Eks(_) => TargetKind::Eks,
			Target::Gke(_) => TargetKind::Gke,
		}
	}
}

/// One configured exchange per target cloud.
#[derive(Default)]
pub struct Exchanges {
	pub aks: aks::AksExchange,
	pub eks: eks::EksExchange,
	pub gke: gke::GkeExchange,
}

impl Exchanges {
	pub async fn exchange(
		&self,
		identity: &WorkloadIdentity,
		target: &Target,
	) -> Result<IdentityToken, Error> {
		debug!(
			target = %target.kind(),
			source = %identity.platform(),
			"exchanging source identity"
		);
		match target {
			Target::Aks(params) => self.aks.exchange(identity, params).await,
			Target::Eks(params) => self.eks.exchange(identity, params).await,
			Target::Gke(params) => self.gke.exchange(identity, params).await,
		}
	}
}
