use clap::Parser;
use crowd_heat_server::{ServerConfig, start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = ServerConfig::parse();
    let handle = start_server(cfg).await?;
    // Park until the server task ends.
    handle.await?;
    Ok(())
}
