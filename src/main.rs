use clap::Parser;
use std::path::PathBuf;
use tftpd::{Config, TftpServer};
use tracing::info;

#[derive(Parser)]
#[command(name = "tftpd")]
#[command(about = "Concurrent TFTP-class file server over UDP")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "tftpd.toml")]
    config: PathBuf,

    /// Override the bind address from the config
    #[arg(long)]
    address: Option<String>,

    /// Override the bind port from the config
    #[arg(long)]
    port: Option<u16>,

    /// Override the directory files are served from and written to
    #[arg(long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::load_or_create(&cli.config)?;
    if let Some(address) = cli.address {
        config.server.address = address;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(root) = cli.root {
        config.server.root_directory = root.display().to_string();
    }

    info!(config = %cli.config.display(), "starting tftpd");
    let server = TftpServer::bind(&config.server).await?;
    server.run().await?;
    Ok(())
}
