use crate::auth::{self, Authenticator};
use crate::commands::Connect;
use crate::error::SessionError;
use crate::protocol::{self, AuthMethod, ProxyReply, ProxyRequest, ReplyCode};
use crate::relay::{self, DEFAULT_IDLE_TIMEOUT, RelayEngine, RelaySummary};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, info};

/// Default bound on resolving and connecting to an upstream target
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// SessionState tracks how far a client got through the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Greeting,
    MethodSelected,
    Authenticated,
    RequestReceived,
    Relaying,
    Closed,
    Aborted,
}

/// SessionSettings are the per-session timeouts
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// ConnectionSession drives one accepted client connection through
/// negotiation, authentication, the CONNECT request and the relay
pub struct ConnectionSession<S> {
    client: S,
    authenticator: Authenticator,
    settings: SessionSettings,
    state: SessionState,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(client: S, authenticator: Authenticator, settings: SessionSettings) -> Self {
        Self {
            client,
            authenticator,
            settings,
            state: SessionState::Greeting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// run handles the full client/server SOCKS5 protocol flow. The client
    /// connection is closed on every path out of here; the upstream
    /// connection never outlives the call.
    pub async fn run(mut self) -> Result<RelaySummary, SessionError> {
        let result = self.drive().await;

        relay::close(&mut self.client).await;
        self.transition(match result {
            Ok(_) => SessionState::Closed,
            Err(_) => SessionState::Aborted,
        });

        result
    }

    async fn drive(&mut self) -> Result<RelaySummary, SessionError> {
        // A client that stalls before its request is complete is dropped
        // without a reply once the idle timeout runs out
        let idle = self.settings.idle_timeout;
        let request = match timeout(idle, self.negotiate()).await {
            Ok(request) => request?,
            Err(_) => return Err(SessionError::HandshakeTimeout(idle)),
        };

        // Anything but CONNECT is dropped without a reply
        if !request.is_connect() {
            return Err(SessionError::UnsupportedCommand(request.command));
        }

        let mut connect = match Connect::dial(&request, self.settings.connect_timeout).await {
            Ok(connect) => connect,
            Err(source) => {
                let reply =
                    ProxyReply::failed(ReplyCode::ConnectionRefused, request.address_type);
                self.send(&protocol::encode_proxy_reply(&reply), "proxy reply")
                    .await?;
                return Err(SessionError::UpstreamDial {
                    target: format!("{}:{}", request.target, request.port),
                    source,
                });
            }
        };

        self.send(&protocol::encode_proxy_reply(&connect.reply), "proxy reply")
            .await?;
        self.transition(SessionState::Relaying);

        let summary = RelayEngine::new(self.settings.idle_timeout)
            .pump(&mut self.client, &mut connect.upstream)
            .await;

        info!(
            "connection closed ({:?}): {} bytes from client, {} bytes from server",
            summary.outcome, summary.client_to_upstream, summary.upstream_to_client
        );

        Ok(summary)
    }

    /// negotiate runs method selection and authentication, then reads the
    /// client's request
    async fn negotiate(&mut self) -> Result<ProxyRequest, SessionError> {
        // Method negotiation
        let greeting = protocol::decode_greeting(&mut self.client).await?;
        let method = auth::select_auth_method(&greeting.methods);
        self.send(&protocol::encode_method_selection(method), "method selection")
            .await?;
        if method == AuthMethod::NoAcceptable {
            return Err(SessionError::NoAcceptableMethod);
        }
        self.transition(SessionState::MethodSelected);

        // Username/password sub-negotiation
        let credentials = protocol::decode_auth_request(&mut self.client).await?;
        let accepted = self.authenticator.verify(&credentials);
        self.send(
            &protocol::encode_auth_reply(credentials.version, accepted),
            "auth reply",
        )
        .await?;
        if !accepted {
            return Err(SessionError::Auth {
                username: String::from_utf8_lossy(&credentials.username).into_owned(),
            });
        }
        self.transition(SessionState::Authenticated);

        // Request
        let request = protocol::decode_proxy_request(&mut self.client).await?;
        self.transition(SessionState::RequestReceived);
        Ok(request)
    }

    async fn send(&mut self, message: &[u8], what: &'static str) -> Result<(), SessionError> {
        let res = match self.client.write_all(message).await {
            Ok(()) => self.client.flush().await,
            Err(e) => Err(e),
        };
        res.map_err(|source| SessionError::ClientWrite {
            message: what,
            source,
        })
    }

    fn transition(&mut self, next: SessionState) {
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserPass;
    use crate::relay::RelayOutcome;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, DuplexStream, duplex};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    type SessionHandle = JoinHandle<Result<RelaySummary, SessionError>>;

    fn spawn_session(settings: SessionSettings) -> (DuplexStream, SessionHandle) {
        let (client, server_side) = duplex(8192);
        let authenticator = Authenticator::new(UserPass {
            username: "admin".to_string(),
            password: "123".to_string(),
        });
        let session = ConnectionSession::new(server_side, authenticator, settings);
        assert_eq!(session.state(), SessionState::Greeting);
        (client, tokio::spawn(session.run()))
    }

    async fn echo_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        addr
    }

    async fn read_n(client: &mut DuplexStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn assert_closed(client: &mut DuplexStream) {
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty(), "unexpected bytes: {rest:?}");
    }

    async fn authenticate(client: &mut DuplexStream) {
        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        assert_eq!(read_n(client, 2).await, [0x05, 0x02]);
        client.write_all(b"\x01\x05admin\x03123").await.unwrap();
        assert_eq!(read_n(client, 2).await, [0x01, 0x00]);
    }

    #[tokio::test]
    async fn connect_and_relay_end_to_end() {
        let upstream = echo_upstream().await;
        let (mut client, session) = spawn_session(SessionSettings::default());

        authenticate(&mut client).await;

        let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        request.extend_from_slice(&upstream.port().to_be_bytes());
        client.write_all(&request).await.unwrap();

        let reply = read_n(&mut client, 10).await;
        assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&reply[4..8], &[127, 0, 0, 1]);
        let bound_port = u16::from_be_bytes([reply[8], reply[9]]);
        assert_ne!(bound_port, upstream.port());

        client.write_all(b"GET / \r\n").await.unwrap();
        assert_eq!(read_n(&mut client, 8).await, b"GET / \r\n");

        drop(client);
        let summary = session.await.unwrap().unwrap();
        assert!(matches!(summary.outcome, RelayOutcome::ClientClosed));
        assert_eq!(summary.client_to_upstream, 8);
        assert_eq!(summary.upstream_to_client, 8);
    }

    #[tokio::test]
    async fn wrong_version_gets_no_reply() {
        let (mut client, session) = spawn_session(SessionSettings::default());

        client.write_all(&[0x04, 0x01, 0x02]).await.unwrap();

        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::Protocol(crate::error::ProtocolError::Version(0x04)))
        ));
    }

    #[tokio::test]
    async fn greeting_without_userpass_is_refused() {
        let (mut client, session) = spawn_session(SessionSettings::default());

        client.write_all(&[0x05, 0x02, 0x00, 0x01]).await.unwrap();

        assert_eq!(read_n(&mut client, 2).await, [0x05, 0xFF]);
        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::NoAcceptableMethod)
        ));
    }

    #[tokio::test]
    async fn wrong_password_is_refused_and_closed() {
        let (mut client, session) = spawn_session(SessionSettings::default());

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        assert_eq!(read_n(&mut client, 2).await, [0x05, 0x02]);
        client.write_all(b"\x01\x05admin\x03124").await.unwrap();

        assert_eq!(read_n(&mut client, 2).await, [0x01, 0xFF]);
        assert_closed(&mut client).await;
        match session.await.unwrap() {
            Err(SessionError::Auth { username }) => assert_eq!(username, "admin"),
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_target_gets_failure_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (mut client, session) = spawn_session(SessionSettings::default());
        authenticate(&mut client).await;

        let mut request = b"\x05\x01\x00\x03\x09127.0.0.1".to_vec();
        request.extend_from_slice(&port.to_be_bytes());
        client.write_all(&request).await.unwrap();

        assert_eq!(
            read_n(&mut client, 10).await,
            [0x05, 0x05, 0x00, 0x03, 0, 0, 0, 0, 0, 0]
        );
        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::UpstreamDial { .. })
        ));
    }

    #[tokio::test]
    async fn bind_command_is_dropped_without_reply() {
        let (mut client, session) = spawn_session(SessionSettings::default());
        authenticate(&mut client).await;

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();

        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::UnsupportedCommand(0x02))
        ));
    }

    #[tokio::test]
    async fn client_vanishing_mid_auth_is_a_short_read() {
        let (mut client, session) = spawn_session(SessionSettings::default());

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        assert_eq!(read_n(&mut client, 2).await, [0x05, 0x02]);
        client.write_all(b"\x01\x05adm").await.unwrap();
        drop(client);

        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::Protocol(crate::error::ProtocolError::ShortRead("username")))
        ));
    }

    #[tokio::test]
    async fn silent_relay_hits_idle_timeout() {
        let upstream = echo_upstream().await;
        let (mut client, session) = spawn_session(SessionSettings {
            idle_timeout: Duration::from_millis(150),
            ..SessionSettings::default()
        });
        authenticate(&mut client).await;

        let mut request = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        request.extend_from_slice(&upstream.port().to_be_bytes());
        client.write_all(&request).await.unwrap();
        assert_eq!(read_n(&mut client, 10).await[1], 0x00);

        let summary = session.await.unwrap().unwrap();
        assert!(matches!(summary.outcome, RelayOutcome::IdleTimeout));
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn domain_target_succeeds_with_ipv4_reply() {
        let upstream = echo_upstream().await;
        let (mut client, session) = spawn_session(SessionSettings::default());
        authenticate(&mut client).await;

        let mut request = b"\x05\x01\x00\x03\x09127.0.0.1".to_vec();
        request.extend_from_slice(&upstream.port().to_be_bytes());
        client.write_all(&request).await.unwrap();

        let reply = read_n(&mut client, 10).await;
        assert_eq!(&reply[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&reply[4..8], &[127, 0, 0, 1]);

        client.write_all(b"hello").await.unwrap();
        assert_eq!(read_n(&mut client, 5).await, b"hello");

        drop(client);
        let summary = session.await.unwrap().unwrap();
        assert_eq!(summary.client_to_upstream, 5);
        assert_eq!(summary.upstream_to_client, 5);
    }

    #[tokio::test]
    async fn connect_timeout_gets_failure_reply() {
        let (mut client, session) = spawn_session(SessionSettings {
            connect_timeout: Duration::from_millis(200),
            ..SessionSettings::default()
        });
        authenticate(&mut client).await;

        // 10.255.255.1 is unroutable, so the dial hangs until the timeout
        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 10, 255, 255, 1, 0x00, 0x50])
            .await
            .unwrap();

        assert_eq!(
            read_n(&mut client, 10).await,
            [0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::UpstreamDial { .. })
        ));
    }

    #[tokio::test]
    async fn silent_client_is_dropped_before_greeting() {
        let (mut client, session) = spawn_session(SessionSettings {
            idle_timeout: Duration::from_millis(150),
            ..SessionSettings::default()
        });

        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::HandshakeTimeout(_))
        ));
    }

    #[tokio::test]
    async fn stalled_request_is_dropped_after_auth() {
        let (mut client, session) = spawn_session(SessionSettings {
            idle_timeout: Duration::from_millis(150),
            ..SessionSettings::default()
        });
        authenticate(&mut client).await;

        // Half a request, then nothing
        client.write_all(&[0x05, 0x01]).await.unwrap();

        assert_closed(&mut client).await;
        assert!(matches!(
            session.await.unwrap(),
            Err(SessionError::HandshakeTimeout(_))
        ));
    }
}
