use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use chat_relay::{
    cli::Cli,
    server::{RelayServer, bind_listener, reachable_addr},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let listener = bind_listener(cli.listen).await?;
    let server = RelayServer::new(listener, cli.bridge_options());
    let addr = reachable_addr(server.local_addr()?);
    info!("relay listening on http://{}", addr);
    // Scripts read the port from this line.
    println!("relay listening on http://{addr}");

    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("relay exited with error: {err:?}");
        return Err(err);
    }

    Ok(())
}
