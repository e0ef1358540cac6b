//! Dual-role task runner: one binary, boot-time role selection picks
//! whether it runs the Server or Client task set.

mod client;
mod context;
mod error;
mod ota;
mod role;
mod server;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use role::{FixedRoleSelector, Role, RoleSelector};

#[derive(Parser, Debug)]
#[command(name = "pum-node", about = "Milk-metering RS-485 bus node")]
struct Cli {
    /// Path to the node's JSON configuration document.
    #[arg(long, default_value = "pum-node.json")]
    config: String,

    /// Overrides the boot-time role pin read. A real node reads this from
    /// GPIO; this flag stands in for it on a host build.
    #[arg(long, value_enum)]
    role: Option<CliRole>,

    /// Operator trigger for C8: push this firmware image over the bus
    /// instead of running the normal task set. Only meaningful on a Server
    /// node, which owns the only transmit path on an otherwise idle bus.
    #[arg(long)]
    push_firmware: Option<String>,

    /// Chunk size for `--push-firmware`, in bytes.
    #[arg(long, default_value_t = pum_core::ota::DEFAULT_CHUNK_SIZE)]
    ota_chunk_size: u16,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliRole {
    Server,
    Client,
}

impl From<CliRole> for Role {
    fn from(r: CliRole) -> Self {
        match r {
            CliRole::Server => Role::Server,
            CliRole::Client => Role::Client,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let role = match cli.role {
        Some(r) => r.into(),
        None => FixedRoleSelector(Role::Client).read_role(),
    };
    info!(%role, config = %cli.config, "booting node");

    let ctx = context::bootstrap(role, &cli.config)
        .with_context(|| format!("bootstrapping node with config {}", cli.config))?;

    if let Some(image_path) = &cli.push_firmware {
        return ctx
            .trigger_ota_update(image_path, cli.ota_chunk_size)
            .await
            .with_context(|| format!("pushing firmware image {image_path}"));
    }

    context::run(ctx).await
}
