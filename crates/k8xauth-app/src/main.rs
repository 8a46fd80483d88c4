//! kubectl exec credential plugin that fetches credentials for AKS, EKS and
//! GKE clusters using the workload identity of the environment it runs in.
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use k8xauth::app::{Engine, Options};
use k8xauth::source::SourceFilter;
use k8xauth::target::Target;
use k8xauth::target::aks::{AksParams, DEFAULT_SERVER_APPLICATION_ID};
use k8xauth::target::eks::{DEFAULT_STS_REGION, EksParams};
use k8xauth::target::gke::GkeParams;
use k8xauth_core::telemetry::{self, LogConfig, LogFormat};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = k8xauth::PROGRAM_NAME)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
	#[command(flatten)]
	global: GlobalArgs,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
	/// Authentication source to use [gke|eks|aks|all]
	#[arg(long = "authsource", global = true, default_value = "all")]
	auth_source: SourceFilter,

	/// Print the decoded source authentication token to stderr. May expose sensitive data
	#[arg(long = "printsourceauthtoken", global = true)]
	print_source_auth_token: bool,

	/// Log level [debug|info|warn|error]
	#[arg(long = "loglevel", global = true, default_value = "info")]
	log_level: String,

	/// Log format [text|json]
	#[arg(long = "logformat", global = true, default_value = "text")]
	log_format: LogFormat,

	/// Append logs to this file instead of stderr
	#[arg(long = "logfile", global = true)]
	log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Fetches Azure AKS cluster credentials from GKE Workload Identity or EKS IRSA
	#[command(
		after_help = "Example:\n  k8xauth aks --tenantid 00000000-0000-0000-0000-000000000000 --clientid 00000000-0000-0000-0000-000000000000"
	)]
	Aks(AksArgs),
	/// Fetches AWS EKS cluster credentials from AKS or GKE Workload Identity
	#[command(
		after_help = "Example:\n  k8xauth eks --rolearn arn:aws:iam::111122223333:role/eks-admin --cluster prod-cluster"
	)]
	Eks(EksArgs),
	/// Fetches Google Cloud GKE cluster credentials from AKS Workload Identity or EKS IRSA
	#[command(
		after_help = "Example:\n  k8xauth gke --projectid 12345678901 --poolid gcp-fed-pool-id --providerid gcp-fed-provider-id"
	)]
	Gke(GkeArgs),
}

#[derive(Args, Debug)]
struct AksArgs {
	/// Azure Entra Directory tenant ID
	#[arg(short = 't', long = "tenantid")]
	tenant_id: String,
	/// Azure Managed Principal/App client ID
	#[arg(short = 'c', long = "clientid")]
	client_id: String,
	/// Azure Entra (AAD) server app ID
	#[arg(short = 's', long = "serverid", default_value = DEFAULT_SERVER_APPLICATION_ID)]
	server_id: String,
}

#[derive(Args, Debug)]
struct EksArgs {
	/// AWS role ARN to assume
	#[arg(short = 'r', long = "rolearn")]
	role_arn: String,
	/// AWS EKS cluster name for which credentials are fetched
	#[arg(short = 'c', long = "cluster")]
	cluster: String,
	/// AWS STS region to which requests are made
	#[arg(short = 's', long = "stsregion", default_value = DEFAULT_STS_REGION)]
	sts_region: String,
}

#[derive(Args, Debug)]
struct GkeArgs {
	/// Numerical GCP project ID
	#[arg(short = 'p', long = "projectid")]
	project_id: String,
	/// GCP Workload Identity Federation pool ID
	#[arg(long = "poolid")]
	pool_id: String,
	/// GCP Workload Identity Federation provider ID
	#[arg(long = "providerid")]
	provider_id: String,
	/// GCP service account to generate an access token for
	#[arg(short = 's', long = "serviceaccount")]
	service_account: Option<String>,
}

impl From<Commands> for Target {
	fn from(command: Commands) -> Self {
		match command {
			Commands::Aks(a) => Target::Aks(AksParams {
				tenant_id: a.tenant_id,
				client_id: a.client_id,
				server_id: a.server_id,
			}),
			Commands::Eks(e) => Target::Eks(EksParams {
				role_arn: e.role_arn,
				cluster: e.cluster,
				sts_region: e.sts_region,
			}),
			Commands::Gke(g) => Target::Gke(GkeParams {
				project_id: g.project_id,
				pool_id: g.pool_id,
				provider_id: g.provider_id,
				service_account: g.service_account,
			}),
		}
	}
}

fn main() {
	let code = match Cli::try_parse() {
		Ok(cli) => run(cli),
		Err(e) => {
			let _ = e.print();
			usage_exit_code(&e)
		},
	};
	std::process::exit(code);
}

// clap's own exit status for usage errors is 2, which is reserved for a
// rejected service account impersonation.
fn usage_exit_code(e: &clap::Error) -> i32 {
	match e.kind() {
		ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
		_ => k8xauth::EXIT_FAILURE,
	}
}

// Returns the exit status; the log guard is dropped here so buffered lines
// are flushed before the process exits.
fn run(cli: Cli) -> i32 {
	let _log_guard = match telemetry::setup_logging(&LogConfig {
		level: cli.global.log_level,
		format: cli.global.log_format,
		file: cli.global.log_file,
	}) {
		Ok(guard) => guard,
		Err(e) => {
			eprintln!("{}: failed to set up logging: {e:#}", k8xauth::PROGRAM_NAME);
			return k8xauth::EXIT_FAILURE;
		},
	};

	let runtime = match tokio::runtime::Builder::new_current_thread()
		.enable_all()
		.build()
	{
		Ok(rt) => rt,
		Err(e) => {
			error!("failed to start runtime: {e}");
			return k8xauth::EXIT_FAILURE;
		},
	};

	let options = Options {
		source: cli.global.auth_source,
		print_source_token: cli.global.print_source_auth_token,
	};
	let target = Target::from(cli.command);
	let result = runtime.block_on(async {
		Engine::ambient()
			.run(&options, &target, std::io::stderr(), std::io::stdout().lock())
			.await
	});
	match result {
		Ok(()) => 0,
		Err(e) => {
			error!("{e}");
			e.exit_code()
		},
	}
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn cli_is_well_formed() {
		Cli::command().debug_assert();
	}

	#[test]
	fn global_flags_follow_the_subcommand() {
		let cli = Cli::try_parse_from([
			"k8xauth",
			"eks",
			"-r",
			"arn:aws:iam::111122223333:role/eks-admin",
			"-c",
			"prod",
			"--authsource",
			"gke",
			"--logformat",
			"json",
		])
		.unwrap();
		assert_eq!(cli.global.auth_source, SourceFilter::Gke);
		assert_eq!(cli.global.log_format, LogFormat::Json);
		let Target::Eks(params) = Target::from(cli.command) else {
			panic!("expected eks target");
		};
		assert_eq!(params.sts_region, "us-east-1");
		assert_eq!(params.cluster, "prod");
	}

	#[test]
	fn aks_server_id_defaults() {
		let cli = Cli::try_parse_from(["k8xauth", "aks", "-t", "tenant", "-c", "client"]).unwrap();
		let Target::Aks(params) = Target::from(cli.command) else {
			panic!("expected aks target");
		};
		assert_eq!(params.server_id, DEFAULT_SERVER_APPLICATION_ID);
		assert!(!cli.global.print_source_auth_token);
	}

	#[test]
	fn usage_errors_never_share_the_impersonation_status() {
		for args in [
			vec!["k8xauth"],
			vec!["k8xauth", "gke", "-p", "1"],
			vec!["k8xauth", "eks", "--cluster", "prod"],
			vec!["k8xauth", "--authsource", "nope", "aks", "-t", "t", "-c", "c"],
			vec!["k8xauth", "frobnicate"],
		] {
			let err = Cli::try_parse_from(args.clone()).unwrap_err();
			assert_eq!(usage_exit_code(&err), k8xauth::EXIT_FAILURE, "{args:?}");
			assert_ne!(usage_exit_code(&err), k8xauth::EXIT_IMPERSONATION_FAILURE);
		}
	}

	#[test]
	fn help_and_version_exit_cleanly() {
		for args in [["k8xauth", "--help"], ["k8xauth", "--version"]] {
			let err = Cli::try_parse_from(args).unwrap_err();
			assert_eq!(usage_exit_code(&err), 0, "{args:?}");
		}
	}

	#[test]
	fn gke_requires_pool_and_provider() {
		assert!(Cli::try_parse_from(["k8xauth", "gke", "-p", "123"]).is_err());
		assert!(Cli::try_parse_from(["k8xauth", "--authsource", "nope", "gke"]).is_err());
	}
}
