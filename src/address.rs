use bytebuffer::ByteBuffer;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::Error;
use crate::Result;

// SOCKS5 address types
pub const IPV4: u8 = 0x01;
pub const DOMAIN: u8 = 0x03;
pub const IPV6: u8 = 0x04;

/// Destination or bound address in SOCKS5 terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    IPv4([u8; 4], u16),
    IPv6([u8; 16], u16),
    Domain(String, u16),
}

impl Address {
    /// Parses a `host:port` string. IPv6 hosts may be bracketed and
    /// IPv4-mapped IPv6 addresses collapse to plain IPv4.
    pub fn parse(s: &str) -> Result<Address> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(Address::from_ip(ip, port)),
            Err(_) => {
                if host.is_empty() || host.len() > u8::MAX as usize {
                    return Err(Error::InvalidAddress(s.to_string()));
                }
                Ok(Address::Domain(host.to_string(), port))
            }
        }
    }

    pub fn from_ip(ip: IpAddr, port: u16) -> Address {
        match ip {
            IpAddr::V4(v4) => Address::IPv4(v4.octets(), port),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Address::IPv4(v4.octets(), port),
                None => Address::IPv6(v6.octets(), port),
            },
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Address::IPv4(_, port) | Address::IPv6(_, port) | Address::Domain(_, port) => *port,
        }
    }

    pub fn host(&self) -> String {
        match self {
            Address::IPv4(ip, _) => Ipv4Addr::from(*ip).to_string(),
            Address::IPv6(ip, _) => Ipv6Addr::from(*ip).to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    pub fn atyp(&self) -> u8 {
        match self {
            Address::IPv4(..) => IPV4,
            Address::IPv6(..) => IPV6,
            Address::Domain(..) => DOMAIN,
        }
    }

    /// Appends `[atyp][addr][port:2 big-endian]`.
    pub fn encode(&self, buf: &mut ByteBuffer) {
        buf.write_u8(self.atyp());
        match self {
            Address::IPv4(ip, _) => buf.write_bytes(ip),
            Address::IPv6(ip, _) => buf.write_bytes(ip),
            Address::Domain(domain, _) => {
                buf.write_u8(domain.len() as u8);
                buf.write_bytes(domain.as_bytes());
            }
        }
        buf.write_u16(self.port());
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::from_ip(addr.ip(), addr.port())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::IPv6(..) => write!(f, "[{}]:{}", self.host(), self.port()),
            _ => write!(f, "{}:{}", self.host(), self.port()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(addr: &Address) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        addr.encode(&mut buf);
        buf.into_vec()
    }

    #[test]
    fn test_parse_ipv4() {
        let addr = Address::parse("127.0.0.1:8080").unwrap();
        assert_eq!(addr, Address::IPv4([127, 0, 0, 1], 8080));
        assert_eq!(encoded(&addr), vec![IPV4, 127, 0, 0, 1, 0x1f, 0x90]);
    }

    #[test]
    fn test_parse_domain_uses_host_length() {
        let addr = Address::parse("example.com:443").unwrap();
        let bytes = encoded(&addr);
        assert_eq!(bytes[0], DOMAIN);
        assert_eq!(bytes[1], 11);
        assert_eq!(&bytes[2..13], b"example.com");
        assert_eq!(&bytes[13..], &[0x01, 0xbb]);
    }

    #[test]
    fn test_parse_bracketed_ipv6() {
        let addr = Address::parse("[::1]:53").unwrap();
        let bytes = encoded(&addr);
        assert_eq!(bytes.len(), 1 + 16 + 2);
        assert_eq!(bytes[0], IPV6);
        assert_eq!(bytes[16], 1);
        assert_eq!(addr.to_string(), "[::1]:53");
    }

    #[test]
    fn test_ipv4_mapped_collapses() {
        let addr = Address::parse("[::ffff:10.0.0.2]:1080").unwrap();
        assert_eq!(addr, Address::IPv4([10, 0, 0, 2], 1080));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Address::parse("no-port").is_err());
        assert!(Address::parse("host:99999").is_err());
        assert!(Address::parse(":80").is_err());
        let long = format!("{}:80", "a".repeat(256));
        assert!(Address::parse(&long).is_err());
    }
}
