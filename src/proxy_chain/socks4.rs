//! SOCKS4 tunnel codec (spec §4.10, §6).
//!
//! SOCKS4 only carries IPv4 addresses on the wire, so a domain target is
//! resolved via `DnsResolve` before the request is built.

use crate::common::error::{Error, Result};
use crate::common::net::DnsResolve;
use crate::common::socks::{socks4_reply_to_result, SOCKS4_VERSION};
use std::net::Ipv4Addr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CMD_CONNECT: u8 = 0x01;

/// Performs a SOCKS4 CONNECT request to `host:port` over `stream`, resolving
/// `host` to IPv4 via `resolver` if it is not already a dotted-quad address.
pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
    user_id: &str,
    resolver: &dyn DnsResolve,
) -> Result<()> {
    let ip = match host.parse::<Ipv4Addr>() {
        Ok(ip) => ip,
        Err(_) => resolver.resolve_a(host).await?,
    };

    let mut request = vec![SOCKS4_VERSION, CMD_CONNECT];
    request.extend_from_slice(&port.to_be_bytes());
    request.extend_from_slice(&ip.octets());
    request.extend_from_slice(user_id.as_bytes());
    request.push(0x00);

    stream.write_all(&request).await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await?;
    if reply[0] != 0x00 {
        return Err(Error::protocol("SOCKS4: invalid reply version byte"));
    }
    socks4_reply_to_result(reply[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    struct FixedResolver(Ipv4Addr);

    #[async_trait::async_trait]
    impl DnsResolve for FixedResolver {
        async fn resolve_a(&self, _host: &str) -> Result<Ipv4Addr> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_connect_with_ipv4_literal_exact_bytes() {
        let (mut client, mut server) = duplex(4096);
        let server_task = tokio::spawn(async move {
            let mut buf = [0u8; 9];
            server.read_exact(&mut buf).await.unwrap();
            server
                .write_all(&[0x00, 0x5A, 0x00, 0x00, 0, 0, 0, 0])
                .await
                .unwrap();
            buf
        });

        let resolver = FixedResolver(Ipv4Addr::new(0, 0, 0, 0));
        let result = connect(&mut client, "93.184.216.34", 80, "", &resolver).await;
        assert!(result.is_ok());

        let sent = server_task.await.unwrap();
        assert_eq!(
            sent,
            [0x04, 0x01, 0x00, 0x50, 93, 184, 216, 34, 0x00]
        );
    }

    #[tokio::test]
    async fn test_connect_resolves_domain_via_resolver() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 9];
            server.read_exact(&mut buf).await.unwrap();
            server
                .write_all(&[0x00, 0x5A, 0x00, 0x00, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let resolver = FixedResolver(Ipv4Addr::new(10, 0, 0, 5));
        let result = connect(&mut client, "example.com", 443, "user", &resolver).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejected_maps_to_error() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut buf = [0u8; 9];
            server.read_exact(&mut buf).await.unwrap();
            server
                .write_all(&[0x00, 0x5B, 0x00, 0x00, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let resolver = FixedResolver(Ipv4Addr::new(0, 0, 0, 0));
        let err = connect(&mut client, "93.184.216.34", 80, "", &resolver)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
