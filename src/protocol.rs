use crate::address::{self, TargetAddr};
use crate::error::ProtocolError;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::io::{AsyncRead, AsyncReadExt};

// RSV: Fields marked RESERVED (RSV) must be set to X'00'.
pub const RSV: u8 = 0x00;

/// Length of every reply produced by encode_proxy_reply
pub const PROXY_REPLY_LEN: usize = 10;

/// Version represents available SOCKS proxy versions.
/// Only SOCKS5 is served.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    SOCKS5 = 0x05,
}

/// AddressType represents the SOCKS5 address types accepted in a request
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    IPv4 = 0x01,
    DomainName = 0x03,
}

/// AddressType implementation block
impl AddressType {
    /// from_byte converts a byte to its related network address type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(AddressType::IPv4),
            0x03 => Some(AddressType::DomainName),
            _ => None,
        }
    }
}

/// AuthMethod represents the SOCKS5 authentication methods
/// this server can select
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    UserPass = 0x02,
    // 0x03 - 0x7f: IANA reserved
    // 0x80 - 0xFE: private methods
    NoAcceptable = 0xFF,
}

/// AuthStatus is the status byte of the username/password reply
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success = 0x00,
    Failure = 0xFF,
}

/// Command represents SOCKS5 protocol commands
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x03,
}

/// Command implementation block
impl Command {
    /// from_byte converts a byte to its related SOCKS5 protocol command
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Command::Connect),
            0x02 => Some(Command::Bind),
            0x03 => Some(Command::UdpAssociate),
            _ => None,
        }
    }
}

/// ReplyCode is the REP field of a request reply. Connection refused
/// doubles as the general failure code for every dial problem.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Succeeded = 0x00,
    ConnectionRefused = 0x05,
}

/// Greeting represents a SOCKS5 client hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    /// SOCKS version -> 0x05
    pub version: u8,

    /// Authentication methods supported by the client
    pub methods: Vec<u8>,
}

/// AuthRequest is a username/password sub-negotiation request.
/// Credentials stay as raw bytes, the protocol does not mandate an encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub version: u8,
    pub username: Vec<u8>,
    pub password: Vec<u8>,
}

impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("version", &self.version)
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .finish()
    }
}

/// ProxyRequest represents a decoded client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub version: u8,

    /// Raw command byte, commands other than CONNECT are refused by the session
    pub command: u8,

    pub address_type: AddressType,
    pub target: TargetAddr,
    pub port: u16,
}

impl ProxyRequest {
    /// is_connect reports whether this is a CONNECT request
    pub fn is_connect(&self) -> bool {
        Command::from_byte(self.command) == Some(Command::Connect)
    }
}

/// ProxyReply is the server's answer to a ProxyRequest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyReply {
    pub status: ReplyCode,
    pub address_type: AddressType,
    pub bound: SocketAddrV4,
}

impl ProxyReply {
    /// succeeded builds a success reply carrying the proxy's bound endpoint
    pub fn succeeded(bound: SocketAddrV4) -> Self {
        Self {
            status: ReplyCode::Succeeded,
            address_type: AddressType::IPv4,
            bound,
        }
    }

    /// failed builds a zero-filled failure reply that echoes the
    /// address type of the request it answers
    pub fn failed(status: ReplyCode, address_type: AddressType) -> Self {
        Self {
            status,
            address_type,
            bound: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyCode::Succeeded
    }
}

/// read_field fills `buf` from the stream or fails. A stream that ends
/// before the buffer is full is a short read.
pub(crate) async fn read_field<R>(
    reader: &mut R,
    buf: &mut [u8],
    field: &'static str,
) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtocolError::ShortRead(field)),
        Err(source) => Err(ProtocolError::Io { field, source }),
    }
}

/// read_u8 reads a single byte field
pub(crate) async fn read_u8<R>(reader: &mut R, field: &'static str) -> Result<u8, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    read_field(reader, &mut byte, field).await?;
    Ok(byte[0])
}

/// decode_greeting reads the client hello. The version is checked before
/// the method list is read.
pub async fn decode_greeting<R>(reader: &mut R) -> Result<Greeting, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // ClientHello format
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+

    let mut buf = [0u8; 2];
    read_field(reader, &mut buf, "greeting header").await?;

    let version = buf[0];
    let n_methods = buf[1];

    // Ensure version is 0x05 -> SOCKS5
    if version != Version::SOCKS5 as u8 {
        return Err(ProtocolError::Version(version));
    }

    let mut methods = vec![0u8; n_methods as usize];
    read_field(reader, &mut methods, "greeting methods").await?;

    Ok(Greeting { version, methods })
}

/// encode_method_selection builds the server's method choice
pub fn encode_method_selection(method: AuthMethod) -> [u8; 2] {
    // ServerChoice method selection reply format
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    [Version::SOCKS5 as u8, method as u8]
}

/// decode_auth_request reads a username/password sub-negotiation request,
/// one length-prefixed field at a time
pub async fn decode_auth_request<R>(reader: &mut R) -> Result<AuthRequest, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // Client Username/Password Request
    // +----+------+----------+------+----------+
    // |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    // +----+------+----------+------+----------+
    // | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    // +----+------+----------+------+----------+

    let version = read_u8(reader, "auth version").await?;

    let username_len = read_u8(reader, "username length").await?;
    let mut username = vec![0u8; username_len as usize];
    read_field(reader, &mut username, "username").await?;

    let password_len = read_u8(reader, "password length").await?;
    let mut password = vec![0u8; password_len as usize];
    read_field(reader, &mut password, "password").await?;

    Ok(AuthRequest {
        version,
        username,
        password,
    })
}

/// encode_auth_reply builds the username/password reply, echoing the
/// sub-negotiation version the client sent
pub fn encode_auth_reply(version: u8, success: bool) -> [u8; 2] {
    // Username/Password Server response
    // +----+--------+
    // |VER | STATUS |
    // +----+--------+
    // | 1  |   1    |
    // +----+--------+
    let status = if success {
        AuthStatus::Success
    } else {
        AuthStatus::Failure
    };
    [version, status as u8]
}

/// decode_proxy_request reads a client request. Domain names are returned
/// unresolved.
pub async fn decode_proxy_request<R>(reader: &mut R) -> Result<ProxyRequest, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    // SOCKS5 request format
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut header = [0u8; 4];
    read_field(reader, &mut header, "request header").await?;

    let version = header[0];
    let command = header[1];
    // header[2] is RSV and is not checked

    if version != Version::SOCKS5 as u8 {
        return Err(ProtocolError::Version(version));
    }

    let address_type =
        AddressType::from_byte(header[3]).ok_or(ProtocolError::AddressType(header[3]))?;

    let target = address::read_target_addr(reader, address_type).await?;

    let mut port_buf = [0u8; 2];
    read_field(reader, &mut port_buf, "port").await?;
    let port = u16::from_be_bytes(port_buf);

    Ok(ProxyRequest {
        version,
        command,
        address_type,
        target,
        port,
    })
}

/// encode_proxy_reply builds the 10 byte reply to a request
pub fn encode_proxy_reply(reply: &ProxyReply) -> [u8; PROXY_REPLY_LEN] {
    // SOCKS5 reply format
    // +----+-----+-------+------+----------+----------+
    // |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   |    4     |    2     |
    // +----+-----+-------+------+----------+----------+

    let mut out = [0u8; PROXY_REPLY_LEN];
    out[0] = Version::SOCKS5 as u8;
    out[1] = reply.status as u8;
    out[2] = RSV;
    out[3] = reply.address_type as u8;
    out[4..8].copy_from_slice(&reply.bound.ip().octets());
    out[8..10].copy_from_slice(&reply.bound.port().to_be_bytes());
    out
}
