use std::time::Duration;
use std::{fmt, io};
use thiserror::Error;

/// ProtocolError covers malformed, truncated or mismatched-version messages.
/// A session hitting one of these is aborted without sending a reply.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("stream closed while reading {0}")]
    ShortRead(&'static str),

    #[error("i/o error while reading {field}: {source}")]
    Io {
        field: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("unsupported SOCKS version: {0:#04x}")]
    Version(u8),

    #[error("unsupported address type: {0:#04x}")]
    AddressType(u8),

    #[error("domain name is not valid UTF-8")]
    InvalidDomain,
}

/// SessionError is the reason a single client session ended early
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("client did not finish negotiating within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("client offered no acceptable authentication method")]
    NoAcceptableMethod,

    #[error("authentication failed for user {username:?}")]
    Auth { username: String },

    #[error("unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("failed to reach {target}: {source}")]
    UpstreamDial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {message} to client: {source}")]
    ClientWrite {
        message: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Direction of travel through the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// RelayIoError records a read or write failure once the relay is running.
/// It never reaches the client since the reply has already been sent.
#[derive(Debug, Error)]
#[error("{direction} {op} failed: {source}")]
pub struct RelayIoError {
    pub direction: Direction,
    pub op: &'static str,
    #[source]
    pub source: io::Error,
}

impl RelayIoError {
    pub fn read(direction: Direction, source: io::Error) -> Self {
        Self {
            direction,
            op: "read",
            source,
        }
    }

    pub fn write(direction: Direction, source: io::Error) -> Self {
        Self {
            direction,
            op: "write",
            source,
        }
    }
}
