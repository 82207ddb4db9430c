//! SOCKS5 tunnel codec (spec §4.10, §6, §8 scenario 2).

use crate::common::error::{Error, Result};
use crate::common::net::Address;
use crate::common::socks::*;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Performs the SOCKS5 greeting, optional username/password auth, and
/// CONNECT request/reply to `target_host:target_port` over `stream`.
pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    target_host: &str,
    target_port: u16,
    auth: Option<(&str, &str)>,
) -> Result<()> {
    let selected = negotiate_method(stream).await?;
    if selected == AUTH_USERNAME_PASSWORD {
        let creds = auth.ok_or_else(|| Error::connection("SOCKS5: proxy requires username/password but none configured"))?;
        authenticate(stream, creds).await?;
    }
    request_connect(stream, target_host, target_port).await
}

/// Sends the fixed greeting `05 02 00 02` (offering no-auth and
/// username/password unconditionally, per spec §4.10/§8 scenario 2) and
/// returns the method the server selected.
async fn negotiate_method<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S) -> Result<u8> {
    stream
        .write_all(&[SOCKS5_VERSION, 0x02, AUTH_NO_AUTH, AUTH_USERNAME_PASSWORD])
        .await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply[0] != SOCKS5_VERSION {
        return Err(Error::protocol("SOCKS5: invalid version in method reply"));
    }
    match reply[1] {
        AUTH_NO_AUTH | AUTH_USERNAME_PASSWORD => Ok(reply[1]),
        AUTH_NO_ACCEPTABLE => Err(Error::connection("SOCKS5: no acceptable methods")),
        other => Err(Error::protocol(format!("SOCKS5: unsupported auth method {}", other))),
    }
}

async fn authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    (user, pass): (&str, &str),
) -> Result<()> {
    let mut request = vec![0x01u8, user.len() as u8];
    request.extend_from_slice(user.as_bytes());
    request.push(pass.len() as u8);
    request.extend_from_slice(pass.as_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await?;
    if reply != [0x01, 0x00] {
        return Err(Error::connection("SOCKS5: authentication failed"));
    }
    Ok(())
}

async fn request_connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
) -> Result<()> {
    let address = Address::from(host.to_string());
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
    address.write_to(&mut request, port).await?;
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(Error::protocol("SOCKS5: invalid version in connect reply"));
    }
    socks5_reply_to_result(head[1])?;

    // consume bound address per ATYP (spec §4.10)
    match head[3] {
        0x01 => {
            let mut buf = [0u8; 6];
            stream.read_exact(&mut buf).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut buf = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut buf).await?;
        }
        0x04 => {
            let mut buf = [0u8; 18];
            stream.read_exact(&mut buf).await?;
        }
        other => return Err(Error::protocol(format!("SOCKS5: unknown bound address type {}", other))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_no_auth_handshake_exact_bytes() {
        let (mut client, mut server) = duplex(4096);
        let server_task = tokio::spawn(async move {
            // Greeting is always `05 02 00 02` regardless of whether the
            // caller configured credentials (spec §4.10, §8 scenario 2).
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut request_head = [0u8; 5];
            server.read_exact(&mut request_head).await.unwrap();
            let domain_len = request_head[4] as usize;
            let mut rest = vec![0u8; domain_len + 2];
            server.read_exact(&mut rest).await.unwrap();

            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 93, 184, 216, 34, 0x00, 0x50])
                .await
                .unwrap();

            (greeting, request_head, rest)
        });

        let result = connect(&mut client, "example.com", 80, None).await;
        assert!(result.is_ok());

        let (greeting, head, rest) = server_task.await.unwrap();
        assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
        assert_eq!(&head, &[0x05, 0x01, 0x00, 0x03, 11]);
        let mut expected = b"example.com".to_vec();
        expected.extend_from_slice(&80u16.to_be_bytes());
        assert_eq!(rest, expected);
    }

    #[tokio::test]
    async fn test_auth_required_and_succeeds() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            assert_eq!(greeting, [0x05, 0x02, 0x00, 0x02]);
            server.write_all(&[0x05, 0x02]).await.unwrap();

            let mut auth_head = [0u8; 2];
            server.read_exact(&mut auth_head).await.unwrap();
            let mut user = vec![0u8; auth_head[1] as usize];
            server.read_exact(&mut user).await.unwrap();
            let mut plen = [0u8; 1];
            server.read_exact(&mut plen).await.unwrap();
            let mut pass = vec![0u8; plen[0] as usize];
            server.read_exact(&mut pass).await.unwrap();
            server.write_all(&[0x01, 0x00]).await.unwrap();

            let mut head = [0u8; 4];
            server.read_exact(&mut head).await.unwrap();
            let mut rest = [0u8; 6];
            server.read_exact(&mut rest).await.unwrap();
            server
                .write_all(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await
                .unwrap();
        });

        let result = connect(&mut client, "10.0.0.1", 443, Some(("u", "p"))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_no_acceptable_methods_fails() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0xFF]).await.unwrap();
        });

        let err = connect(&mut client, "example.com", 80, None).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_host_unreachable_reply_maps_to_error() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x00]).await.unwrap();

            let mut head = [0u8; 5];
            server.read_exact(&mut head).await.unwrap();
            let mut rest = vec![0u8; head[4] as usize + 2];
            server.read_exact(&mut rest).await.unwrap();

            server.write_all(&[0x05, 0x04, 0x00, 0x01]).await.unwrap();
        });

        let err = connect(&mut client, "example.com", 80, None).await.unwrap_err();
        assert!(err.to_string().contains("host unreachable"));
    }

    #[tokio::test]
    async fn test_server_requires_auth_but_none_configured_fails() {
        let (mut client, mut server) = duplex(4096);
        tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            server.read_exact(&mut greeting).await.unwrap();
            server.write_all(&[0x05, 0x02]).await.unwrap();
        });

        let err = connect(&mut client, "example.com", 80, None).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
