use std::net::SocketAddr;

use clap::Parser;

use crate::bridge::{BridgeOptions, LEGACY_CLOSE_TOPIC};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Socket address to listen on. A taken port falls back to a free one.
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Publish close notices on "client.to.server" like older deployments.
    #[arg(long)]
    pub legacy_close_topic: bool,

    /// Drop messages from clients that have not registered for broadcasts.
    #[arg(long)]
    pub require_registration: bool,
}

impl Cli {
    pub fn bridge_options(&self) -> BridgeOptions {
        let mut options = BridgeOptions {
            require_registration: self.require_registration,
            ..BridgeOptions::default()
        };
        if self.legacy_close_topic {
            options.close_topic = LEGACY_CLOSE_TOPIC.to_string();
        }
        options
    }
}
