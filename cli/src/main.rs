mod client;
mod cmd;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "batproxy",
    version,
    about = "HTTP reverse proxy gateway over SSH tunnels"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the batproxy service
    Run(cmd::run::RunArgs),
    /// Manage proxy rules
    Proxy {
        #[command(subcommand)]
        command: cmd::proxy::ProxyCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd::run::run(args).await,
        Command::Proxy { command } => cmd::proxy::run(command).await,
    }
}
