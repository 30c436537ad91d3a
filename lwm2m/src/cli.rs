//! Command-line arguments of `lwm2m-test-server`

use clap::Parser;
use lwm2m_core::Lwm2mResult;
use lwm2m_server::ServerConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "lwm2m-test-server",
    version,
    about = "LwM2M bootstrap and registration test server"
)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bootstrap server address, overrides the configuration file
    #[arg(long)]
    pub bootstrap_addr: Option<SocketAddr>,

    /// Registration server address, overrides the configuration file
    #[arg(long)]
    pub registration_addr: Option<SocketAddr>,

    /// Log filter (e.g. "info", "lwm2m_server=debug")
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Configuration file contents (or defaults) with the address overrides applied
    pub fn server_config(&self) -> Lwm2mResult<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(address) = self.bootstrap_addr {
            config.bootstrap.address = address;
        }
        if let Some(address) = self.registration_addr {
            config.registration.address = address;
        }
        Ok(config)
    }
}
