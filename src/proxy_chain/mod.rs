//! Proxy chaining (spec §2, §4.10, §6, §8 scenarios 1-2).
//!
//! A `ProxyChain` is an ordered list of hops. Connecting tunnels through
//! each hop in turn, handing the next hop's address (or the final target)
//! to the previous hop's tunneling protocol, ending in a single byte stream
//! indistinguishable above this layer from a direct connection.

pub mod http_connect;
pub mod socks4;
pub mod socks5;

use crate::common::error::{Error, Result};
use crate::common::net::{DnsResolve, SystemResolver};
use crate::transport::{self, Socket};
use std::time::Instant;

/// Which tunneling protocol a hop speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopProtocol {
    HttpConnect,
    Socks4,
    Socks5,
}

/// Optional credentials carried by a hop, interpreted per-protocol:
/// HTTP CONNECT and SOCKS5 use (username, password); SOCKS4 only uses the
/// username half as its `USERID` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopAuth {
    pub username: String,
    pub password: String,
}

/// A single proxy server in a chain.
#[derive(Debug, Clone)]
pub struct ProxyHop {
    pub host: String,
    pub port: u16,
    pub protocol: HopProtocol,
    /// Terminate TLS against this hop before tunneling through it (used
    /// for an HTTPS-fronted HTTP CONNECT proxy).
    pub tls: bool,
    pub auth: Option<HopAuth>,
}

impl ProxyHop {
    pub fn http_connect(host: impl Into<String>, port: u16) -> Self {
        ProxyHop {
            host: host.into(),
            port,
            protocol: HopProtocol::HttpConnect,
            tls: false,
            auth: None,
        }
    }

    pub fn socks5(host: impl Into<String>, port: u16) -> Self {
        ProxyHop {
            host: host.into(),
            port,
            protocol: HopProtocol::Socks5,
            tls: false,
            auth: None,
        }
    }

    pub fn socks4(host: impl Into<String>, port: u16) -> Self {
        ProxyHop {
            host: host.into(),
            port,
            protocol: HopProtocol::Socks4,
            tls: false,
            auth: None,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(HopAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }
}

/// Outcome of a successful chained connect: the tunneled socket, the chain
/// of hop descriptions traversed (for logging/diagnostics), and elapsed
/// wall-clock time.
pub struct ChainedConnection {
    pub socket: Box<dyn Socket>,
    pub chain: Vec<String>,
    pub total_ms: u64,
}

/// An ordered, mutable list of proxy hops a connection tunnels through.
#[derive(Default)]
pub struct ProxyChain {
    hops: Vec<ProxyHop>,
}

impl ProxyChain {
    pub fn new() -> Self {
        ProxyChain { hops: Vec::new() }
    }

    pub fn add_proxy(&mut self, hop: ProxyHop) {
        self.hops.push(hop);
    }

    pub fn remove_proxy(&mut self, index: usize) -> Option<ProxyHop> {
        if index < self.hops.len() {
            Some(self.hops.remove(index))
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.hops.clear();
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn hops(&self) -> &[ProxyHop] {
        &self.hops
    }

    /// Dials the first hop (or `target_host:target_port` directly if the
    /// chain is empty), then tunnels through each subsequent hop in order,
    /// ending at `target_host:target_port`. On any hop failure the
    /// in-progress socket is closed before the error is returned.
    pub async fn connect(&self, target_host: &str, target_port: u16) -> Result<ChainedConnection> {
        self.connect_with_resolver(target_host, target_port, &SystemResolver).await
    }

    pub async fn connect_with_resolver(
        &self,
        target_host: &str,
        target_port: u16,
        resolver: &dyn DnsResolve,
    ) -> Result<ChainedConnection> {
        let start = Instant::now();
        let mut chain_log = Vec::with_capacity(self.hops.len() + 1);

        if self.hops.is_empty() {
            let socket = transport::connect_tcp(target_host, target_port).await?;
            chain_log.push(format!("{}:{}", target_host, target_port));
            return Ok(ChainedConnection {
                socket: Box::new(socket),
                chain: chain_log,
                total_ms: start.elapsed().as_millis() as u64,
            });
        }

        let first = &self.hops[0];
        let tcp = transport::connect_tcp(&first.host, first.port).await?;
        let mut socket: Box<dyn Socket> = if first.tls {
            Box::new(transport::start_tls(tcp, &first.host).await?)
        } else {
            Box::new(tcp)
        };
        chain_log.push(format!("{}:{}", first.host, first.port));

        for (i, hop) in self.hops.iter().enumerate() {
            let (next_host, next_port) = match self.hops.get(i + 1) {
                Some(next) => (next.host.as_str(), next.port),
                None => (target_host, target_port),
            };

            if let Err(err) = tunnel_hop(&mut socket, hop, next_host, next_port, resolver).await {
                let _ = socket.close().await;
                return Err(err);
            }
            chain_log.push(format!("{}:{}", next_host, next_port));
        }

        Ok(ChainedConnection {
            socket,
            chain: chain_log,
            total_ms: start.elapsed().as_millis() as u64,
        })
    }
}

async fn tunnel_hop(
    socket: &mut Box<dyn Socket>,
    hop: &ProxyHop,
    next_host: &str,
    next_port: u16,
    resolver: &dyn DnsResolve,
) -> Result<()> {
    match hop.protocol {
        HopProtocol::HttpConnect => {
            let auth = hop.auth.as_ref().map(|a| (a.username.as_str(), a.password.as_str()));
            http_connect::connect(socket, next_host, next_port, auth).await
        }
        HopProtocol::Socks5 => {
            let auth = hop.auth.as_ref().map(|a| (a.username.as_str(), a.password.as_str()));
            socks5::connect(socket, next_host, next_port, auth).await
        }
        HopProtocol::Socks4 => {
            let user_id = hop.auth.as_ref().map(|a| a.username.as_str()).unwrap_or("");
            socks4::connect(socket, next_host, next_port, user_id, resolver).await
        }
    }
    .map_err(|e| Error::connection(format!("hop {}:{} failed: {}", hop.host, hop.port, e)))
}
