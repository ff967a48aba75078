use crate::address::resolve_ipv4;
use crate::protocol::{ProxyReply, ProxyRequest};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// Connect holds an established upstream connection for a CONNECT request
/// together with the success reply owed to the client
pub struct Connect {
    pub upstream: TcpStream,
    pub reply: ProxyReply,
}

/// Connect implementation block
impl Connect {
    /// dial resolves the request target and connects to it, both within
    /// `connect_timeout`. Any error here is answered with a failure reply.
    pub async fn dial(request: &ProxyRequest, connect_timeout: Duration) -> io::Result<Self> {
        let attempt = async {
            let target = resolve_ipv4(&request.target, request.port).await?;

            // DEBUG
            debug!("dialing {} (requested {}:{})", target, request.target, request.port);

            let upstream = TcpStream::connect(target).await?;
            Ok::<_, io::Error>((target, upstream))
        };

        let (target, upstream) = match timeout(connect_timeout, attempt).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connect to {}:{} timed out after {connect_timeout:?}",
                        request.target, request.port
                    ),
                ));
            }
        };

        let bound = bound_ipv4(upstream.local_addr()?);
        info!("connected to {} via {}", target, bound);

        Ok(Self {
            upstream,
            reply: ProxyReply::succeeded(bound),
        })
    }
}

/// bound_ipv4 reports the local end of the upstream socket in IPv4 form.
/// Upstream sockets are always dialed over IPv4; an unmapped IPv6 local
/// address is reported as 0.0.0.0.
fn bound_ipv4(local: SocketAddr) -> SocketAddrV4 {
    match local {
        SocketAddr::V4(v4) => v4,
        SocketAddr::V6(v6) => SocketAddrV4::new(
            v6.ip().to_ipv4_mapped().unwrap_or(Ipv4Addr::UNSPECIFIED),
            v6.port(),
        ),
    }
}
