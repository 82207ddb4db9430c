//! HTTP CONNECT tunnel codec (spec §4.10, §6, §8 scenario 1).

use crate::common::error::{Error, Result};
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Performs an HTTP CONNECT handshake over `stream` to `host:port`,
/// optionally with Basic auth. Exact wire form (spec §6, §8 scenario 1):
/// `CONNECT host:port HTTP/1.1\r\nHost: host:port\r\n[Proxy-Authorization: Basic b64\r\n]\r\n`.
pub async fn connect<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    host: &str,
    port: u16,
    auth: Option<(&str, &str)>,
) -> Result<()> {
    let target = format!("{}:{}", host, port);
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some((user, pass)) = auth {
        let creds = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", creds));
    }
    request.push_str("\r\n");

    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::connection(format!("failed to send CONNECT request: {}", e)))?;

    let response = read_headers(stream).await?;
    let status_line = response
        .lines()
        .next()
        .ok_or_else(|| Error::protocol("empty CONNECT response"))?;

    let (code, reason) = parse_status_line(status_line)?;
    if code != 200 {
        return Err(Error::connection(format!(
            "Proxy CONNECT failed: {} {}",
            code, reason
        )));
    }
    Ok(())
}

/// Reads from `stream` until a terminating `\r\n\r\n`, returning the
/// accumulated headers (including the status line) as a `String`.
async fn read_headers<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut buf = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(Error::protocol("connection closed before CONNECT response completed"));
        }
        buf.push(byte[0]);
        if buf.len() >= 4 && &buf[buf.len() - 4..] == b"\r\n\r\n" {
            break;
        }
        if buf.len() > 64 * 1024 {
            return Err(Error::protocol("CONNECT response too large"));
        }
    }
    String::from_utf8(buf).map_err(|e| Error::protocol(format!("invalid CONNECT response: {}", e)))
}

/// Parses `HTTP/1.1 200 Connection Established` into `(200, "Connection Established")`.
/// Only the first word of the reason phrase is kept, matching the spec's
/// exact error-string format (`"Proxy CONNECT failed: 407 Proxy"`).
fn parse_status_line(line: &str) -> Result<(u16, String)> {
    let mut parts = line.trim_end().splitn(3, ' ');
    let _version = parts.next().ok_or_else(|| Error::protocol("missing HTTP version"))?;
    let code = parts
        .next()
        .ok_or_else(|| Error::protocol("missing status code"))?
        .parse::<u16>()
        .map_err(|_| Error::protocol("invalid status code"))?;
    let reason = parts.next().unwrap_or("").split_whitespace().next().unwrap_or("").to_string();
    Ok((code, reason))
}
