//! Shared SOCKS4/SOCKS5 wire constants and reply-code-to-error mapping.
//!
//! The actual client handshake flows (greeting, auth negotiation, connect
//! request/reply) live in `proxy_chain::socks4` / `proxy_chain::socks5` —
//! this module only holds the protocol numbers and the reply taxonomy
//! they share, plus what `common::net::Address` needs for ATYP tags.

use crate::common::error::Error;

pub const SOCKS5_VERSION: u8 = 0x05;
pub const SOCKS4_VERSION: u8 = 0x04;

// SOCKS5 auth methods
pub const AUTH_NO_AUTH: u8 = 0x00;
pub const AUTH_GSSAPI: u8 = 0x01;
pub const AUTH_USERNAME_PASSWORD: u8 = 0x02;
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// SOCKS5 commands
pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;

// SOCKS5 reply codes
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
pub const REP_TTL_EXPIRED: u8 = 0x06;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Maps a SOCKS5 reply byte to a descriptive error. `Ok(())` on success.
pub fn socks5_reply_to_result(rep: u8) -> Result<(), Error> {
    match rep {
        REP_SUCCEEDED => Ok(()),
        REP_GENERAL_FAILURE => Err(Error::connection("SOCKS5: general failure")),
        REP_CONNECTION_NOT_ALLOWED => Err(Error::connection("SOCKS5: connection not allowed by ruleset")),
        REP_NETWORK_UNREACHABLE => Err(Error::connection("SOCKS5: network unreachable")),
        REP_HOST_UNREACHABLE => Err(Error::connection("SOCKS5: host unreachable")),
        REP_CONNECTION_REFUSED => Err(Error::connection("SOCKS5: connection refused")),
        REP_TTL_EXPIRED => Err(Error::connection("SOCKS5: TTL expired")),
        REP_COMMAND_NOT_SUPPORTED => Err(Error::protocol("SOCKS5: command not supported")),
        REP_ADDRESS_TYPE_NOT_SUPPORTED => Err(Error::protocol("SOCKS5: address type not supported")),
        other => Err(Error::protocol(format!("SOCKS5: unknown reply code {}", other))),
    }
}

// SOCKS4 reply codes (CD field of the 8-byte reply)
pub const SOCKS4_REP_GRANTED: u8 = 0x5A;
pub const SOCKS4_REP_REJECTED: u8 = 0x5B;
pub const SOCKS4_REP_NO_IDENTD: u8 = 0x5C;
pub const SOCKS4_REP_IDENT_MISMATCH: u8 = 0x5D;

/// Maps a SOCKS4 reply CD byte to a descriptive error. `Ok(())` on success (0x5A).
pub fn socks4_reply_to_result(cd: u8) -> Result<(), Error> {
    match cd {
        SOCKS4_REP_GRANTED => Ok(()),
        SOCKS4_REP_REJECTED => Err(Error::connection("SOCKS4: request rejected or failed")),
        SOCKS4_REP_NO_IDENTD => Err(Error::connection("SOCKS4: ident service unreachable")),
        SOCKS4_REP_IDENT_MISMATCH => Err(Error::connection("SOCKS4: ident mismatch")),
        other => Err(Error::protocol(format!("SOCKS4: unknown reply code {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_success() {
        assert!(socks5_reply_to_result(REP_SUCCEEDED).is_ok());
    }

    #[test]
    fn test_socks5_failure_kinds() {
        assert!(matches!(
            socks5_reply_to_result(REP_HOST_UNREACHABLE),
            Err(Error::Connection(_))
        ));
        assert!(matches!(
            socks5_reply_to_result(REP_ADDRESS_TYPE_NOT_SUPPORTED),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_socks4_reply_mapping() {
        assert!(socks4_reply_to_result(SOCKS4_REP_GRANTED).is_ok());
        assert!(socks4_reply_to_result(SOCKS4_REP_REJECTED).is_err());
    }
}
