use crate::error::ProtocolError;
use crate::protocol::{AddressType, read_field, read_u8};
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::io::AsyncRead;

/// TargetAddr is the destination named in a client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    IPv4(Ipv4Addr),
    DomainName(String),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::IPv4(ip) => write!(f, "{ip}"),
            TargetAddr::DomainName(domain) => write!(f, "{domain}"),
        }
    }
}

/// read_target_addr reads DST.ADDR for the given address type
pub async fn read_target_addr<R>(
    reader: &mut R,
    addr_type: AddressType,
) -> Result<TargetAddr, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match addr_type {
        AddressType::IPv4 => {
            let mut addr = [0u8; 4];
            read_field(reader, &mut addr, "IPv4 address").await?;
            Ok(TargetAddr::IPv4(Ipv4Addr::from(addr)))
        }
        AddressType::DomainName => {
            // First octet in DomainName contains the number of
            // octets to follow
            let len = read_u8(reader, "domain length").await?;

            let mut domain = vec![0u8; len as usize];
            read_field(reader, &mut domain, "domain name").await?;

            let domain = String::from_utf8(domain).map_err(|_| ProtocolError::InvalidDomain)?;
            Ok(TargetAddr::DomainName(domain))
        }
    }
}

/// resolve_ipv4 turns a request target into an IPv4 socket address.
/// Domain names take the first IPv4 answer from the system resolver.
pub async fn resolve_ipv4(target: &TargetAddr, port: u16) -> io::Result<SocketAddrV4> {
    match target {
        TargetAddr::IPv4(ip) => Ok(SocketAddrV4::new(*ip, port)),
        TargetAddr::DomainName(domain) => tokio::net::lookup_host((domain.as_str(), port))
            .await?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address found for '{domain}'"),
                )
            }),
    }
}
