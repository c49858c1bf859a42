//! Guest agent — converges local OS state to the instance metadata.
//!
//! One process per daemon type, each a single sequential watch loop:
//! `accounts` manages users and SSH keys, `network` manages interface
//! activation and forwarded-IP routes, `clock-skew` re-syncs the clock
//! after live migration.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use metadata_client::MetadataClient;
use tracing::warn;

use guest_agent::accounts::AccountsReconciler;
use guest_agent::clock::ClockSkewHandler;
use guest_agent::config::{self, AccountsConfig, CommandTemplates, NetworkConfig};
use guest_agent::daemon;
use guest_agent::hostops::LinuxHostOps;
use guest_agent::network::NetworkReconciler;
use guest_agent::network::routes::IprouteTable;

#[derive(Parser)]
#[command(name = "guest-agent", version)]
struct Cli {
    /// Metadata service base URL
    #[arg(long, env = "METADATA_URL", default_value = metadata_client::DEFAULT_METADATA_URL)]
    metadata_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage user accounts and SSH keys from metadata
    Accounts(AccountsArgs),
    /// Manage network interfaces and forwarded-IP routes
    Network(NetworkArgs),
    /// Re-sync the system clock when the drift token changes
    ClockSkew,
}

#[derive(Args)]
struct AccountsArgs {
    /// Comma-separated supplementary groups for provisioned users
    #[arg(long, default_value = "")]
    groups: String,
    /// Delete the OS account on deprovision instead of retaining it
    #[arg(long)]
    remove: bool,
}

#[derive(Args)]
struct NetworkArgs {
    /// Routing protocol identifier tagging agent-managed routes
    #[arg(long, default_value = "66")]
    proto_id: String,
    /// Do not configure IP alias routes
    #[arg(long)]
    no_ip_aliases: bool,
    /// Do not configure load-balancer target routes
    #[arg(long)]
    no_target_instance_ips: bool,
    /// Do not enable additional ethernet interfaces
    #[arg(long)]
    no_network_setup: bool,
    /// Command run to enable ethernet interfaces (default: detect a DHCP client)
    #[arg(long, default_value = "")]
    dhcp_command: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt().init();

    if !nix::unistd::getuid().is_root() {
        warn!("not running as root; most host mutations will fail");
    }

    let cli = Cli::parse();
    let shutdown = daemon::shutdown_token();
    let mut client = MetadataClient::new(
        cli.metadata_url,
        daemon::jittered_wait(metadata_client::DEFAULT_WAIT_SECS),
    );

    match cli.command {
        Command::Accounts(args) => {
            let config = AccountsConfig {
                groups: args
                    .groups
                    .split(',')
                    .filter(|group| !group.is_empty())
                    .map(String::from)
                    .collect(),
                remove: args.remove,
                ..AccountsConfig::default()
            };
            let lock_path = config.lock_file.clone();
            let ops = Arc::new(LinuxHostOps::new(CommandTemplates::default()));
            let mut reconciler = AccountsReconciler::new(config, ops);
            reconciler.setup().await;
            daemon::run(
                "accounts",
                &lock_path,
                &mut client,
                "",
                true,
                &mut reconciler,
                &shutdown,
            )
            .await;
        }
        Command::Network(args) => {
            let config = NetworkConfig {
                proto_id: args.proto_id,
                ip_aliases: !args.no_ip_aliases,
                target_instance_ips: !args.no_target_instance_ips,
                network_setup: !args.no_network_setup,
                ..NetworkConfig::default()
            };
            let lock_path = config.lock_file.clone();
            let templates = CommandTemplates {
                dhcp: args.dhcp_command,
                ..CommandTemplates::default()
            };
            let ops = Arc::new(LinuxHostOps::new(templates));
            let routes = Arc::new(IprouteTable::new(config.proto_id.clone()));
            let mut reconciler = NetworkReconciler::new(config, ops, routes);
            daemon::run(
                "network",
                &lock_path,
                &mut client,
                "instance/network-interfaces",
                true,
                &mut reconciler,
                &shutdown,
            )
            .await;
        }
        Command::ClockSkew => {
            let ops = Arc::new(LinuxHostOps::new(CommandTemplates::default()));
            let mut handler = ClockSkewHandler::new(ops);
            daemon::run(
                "clock-skew",
                std::path::Path::new(config::CLOCK_SKEW_LOCK),
                &mut client,
                "instance/virtual-clock/drift-token",
                false,
                &mut handler,
                &shutdown,
            )
            .await;
        }
    }

    ExitCode::SUCCESS
}
