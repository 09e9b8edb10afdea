use std::path::Path;

use clap::{Args, Subcommand};

use batproxy_core::{CreateProxyOptions, ListProxiesOptions, Proxy};

use crate::client::Client;

#[derive(Subcommand)]
pub enum ProxyCommand {
    /// Create a proxy rule
    Create(CreateArgs),
    /// List proxy rules
    List(ListArgs),
    /// Delete a proxy rule
    Delete(DeleteArgs),
}

#[derive(Args)]
struct BaseArgs {
    /// The manager base url
    #[arg(
        short = 'l',
        long,
        default_value = "unix://batproxy.sock",
        env = "BATPROXY_LISTEN"
    )]
    base_url: String,
}

#[derive(Args)]
pub struct CreateArgs {
    #[command(flatten)]
    base: BaseArgs,

    /// Proxy id; overrides --suffix
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Suffix for the generated proxy id
    #[arg(long)]
    suffix: Option<String>,

    /// Over SSH login name
    #[arg(short = 'u', long)]
    user: String,

    /// Over SSH login host, may carry a port
    #[arg(short = 'H', long)]
    host: String,

    /// Over SSH login private key, a file path or PEM text
    #[arg(short = 'i', long)]
    private_key: Option<String>,

    /// Private key passphrase
    #[arg(long)]
    passphrase: Option<String>,

    /// Over SSH login password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// Proxy destination host
    #[arg(long)]
    node: String,

    /// Proxy destination port
    #[arg(long)]
    port: u16,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    base: BaseArgs,

    /// Proxy id
    #[arg(short = 'n', long)]
    name: Option<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    base: BaseArgs,

    /// Proxy id
    #[arg(short = 'n', long)]
    name: String,
}

pub async fn run(command: ProxyCommand) -> anyhow::Result<()> {
    match command {
        ProxyCommand::Create(args) => create(args).await,
        ProxyCommand::List(args) => list(args).await,
        ProxyCommand::Delete(args) => delete(args).await,
    }
}

async fn create(args: CreateArgs) -> anyhow::Result<()> {
    let private_key = match args.private_key {
        Some(value) => Some(read_key_material(&value).await?),
        None => None,
    };
    let proxy = Proxy {
        id: args.name.unwrap_or_default(),
        user: args.user,
        host: args.host,
        private_key,
        passphrase: args.passphrase,
        password: args.password,
        node: args.node,
        port: args.port,
        create_time: None,
        update_time: None,
    };
    proxy.validate()?;

    let client = Client::new(&args.base.base_url)?;
    let opts = CreateProxyOptions {
        suffix: args.suffix.unwrap_or_default(),
    };
    let created = client.create_proxy(&proxy, &opts).await?;
    print_proxies(&[created]);
    Ok(())
}

async fn list(args: ListArgs) -> anyhow::Result<()> {
    let client = Client::new(&args.base.base_url)?;
    let page = client
        .list_proxies(&ListProxiesOptions {
            proxy_id: args.name.unwrap_or_default(),
            page_size: 30,
            page_token: String::new(),
        })
        .await?;
    print_proxies(&page.proxies);
    Ok(())
}

async fn delete(args: DeleteArgs) -> anyhow::Result<()> {
    let client = Client::new(&args.base.base_url)?;
    client.delete_proxy(&args.name).await?;
    println!("Deleted: {}", args.name);
    Ok(())
}

/// A key flag may carry a path or the PEM text itself.
async fn read_key_material(value: &str) -> anyhow::Result<String> {
    if Path::new(value).exists() {
        Ok(tokio::fs::read_to_string(value).await?)
    } else {
        Ok(value.to_string())
    }
}

fn print_proxies(proxies: &[Proxy]) {
    println!(
        "{:<28} {:<12} {:<24} {:<20} {:<5}",
        "NAME", "USER", "HOST", "NODE", "PORT"
    );
    for p in proxies {
        println!(
            "{:<28} {:<12} {:<24} {:<20} {:<5}",
            p.id, p.user, p.host, p.node, p.port
        );
    }
}
