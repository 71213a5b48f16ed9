use anyhow::anyhow;
use clap::Parser;
use tokio::runtime::Runtime;
use triage::{run, Command};
use triage_core::{telemetry, ApiClient, ClientSettings};

#[derive(Parser, Debug)]
#[command(name = "triage", version, about = "Command-line client for the triage assistant")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Overrides the configured API base URL.
    #[arg(long)]
    base_url: Option<String>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();

    let mut settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    if let Some(base_url) = cli.base_url {
        settings = settings.with_base_url(base_url);
        settings
            .validate()
            .map_err(|err| anyhow!(err.user_message()))?;
    }
    let client = ApiClient::new(settings)?;

    let runtime = Runtime::new()?;
    runtime.block_on(run(cli.command, client))
}
