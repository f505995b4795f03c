use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, warn};

use crate::DEFAULT_PORT;

/// Shared to-do list server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "run_server")]
#[command(version, about, long_about = None)]
pub struct ServerConfig {
    /// Port to listen on, on every interface
    #[arg(short, long, env = "TODO_SYNC_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Listen on IPv4 interfaces only
    #[arg(long, conflicts_with = "ipv6_only")]
    pub ipv4_only: bool,

    /// Listen on IPv6 interfaces only
    #[arg(long)]
    pub ipv6_only: bool,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            port: DEFAULT_PORT,
            ipv4_only: false,
            ipv6_only: false,
        }
    }
}

impl ServerConfig {
    /// Wildcard addresses to bind, IPv6 first.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.port));
        let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));

        match (self.ipv4_only, self.ipv6_only) {
            (true, _) => vec![v4],
            (_, true) => vec![v6],
            _ => vec![v6, v4],
        }
    }

    /// Bind every address from `addrs`.
    ///
    /// A dual-stack IPv6 socket already covers IPv4, so "address in use" on
    /// the IPv4 bind after a successful IPv6 bind is not an error. Fails only
    /// when nothing could be bound.
    pub async fn bind(&self) -> io::Result<Vec<TcpListener>> {
        let mut listeners = Vec::new();
        let mut last_err = None;

        for addr in self.addrs() {
            match TcpListener::bind(addr).await {
                Ok(listener) => listeners.push(listener),
                Err(err) if err.kind() == io::ErrorKind::AddrInUse && !listeners.is_empty() => {
                    debug!(%addr, "covered by dual-stack listener");
                }
                Err(err) => {
                    warn!(%addr, %err, "could not bind");
                    last_err = Some(err);
                }
            }
        }

        match (listeners.is_empty(), last_err) {
            (true, Some(err)) => Err(err),
            _ => Ok(listeners),
        }
    }
}
