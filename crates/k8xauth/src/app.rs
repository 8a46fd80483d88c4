use std::io::Write;

use crate::source::{DiscoveryChain, SourceFilter};
use crate::target::{Exchanges, Target};
use crate::*;

/// Settings shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct Options {
	/// Restricts discovery to a single platform.
	pub source: SourceFilter,
	/// Dump the decoded source identity token before exchanging it.
	pub print_source_token: bool,
}

/// Discovers the local workload identity and trades it for cluster credentials.
pub struct Engine {
	chain: DiscoveryChain,
	exchanges: Exchanges,
}

impl Engine {
	pub fn new(chain: DiscoveryChain, exchanges: Exchanges) -> Self {
		Engine { chain, exchanges }
	}

	/// The production wiring: real probes and real cloud endpoints.
	pub fn ambient() -> Self {
		Engine::new(DiscoveryChain::ambient(), Exchanges::default())
	}

	pub async fn fetch(
		&self,
		options: &Options,
		target: &Target,
		debug_out: impl Write,
	) -> Result<IdentityToken, Error> {
		let identity = self.chain.discover(options.source).await?;
		if options.print_source_token {
			print_source_token(&identity, debug_out);
		}
		Ok(self.exchanges.exchange(&identity, target).await?)
	}

	/// Runs the whole flow and writes the exec credential to `out`. Nothing is
	/// written to `out` unless every step succeeded.
	pub async fn run(
		&self,
		options: &Options,
		target: &Target,
		debug_out: impl Write,
		out: impl Write,
	) -> Result<(), Error> {
		let token = self.fetch(options, target, debug_out).await?;
		credential::write_exec_credential(&token, out)?;
		Ok(())
	}
}

fn print_source_token(identity: &WorkloadIdentity, mut w: impl Write) {
	if let Err(e) = jwt::pretty_print(identity.raw_identity_token(), &mut w) {
		warn!(platform = %identity.platform(), "cannot print source token: {e}");
	}
}
