use crate::error::{Direction, RelayIoError};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

/// Bytes moved per read during the relay
pub const RELAY_CHUNK_SIZE: usize = 4096;

/// Idle period after which a silent relay is torn down
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// RelayOutcome is why a relay stopped
#[derive(Debug)]
pub enum RelayOutcome {
    ClientClosed,
    UpstreamClosed,
    IdleTimeout,
    Failed(RelayIoError),
}

/// RelaySummary is what a finished relay reports back
#[derive(Debug)]
pub struct RelaySummary {
    pub outcome: RelayOutcome,
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
}

// Which side became readable, and what the read returned
enum Readable {
    Client(io::Result<usize>),
    Upstream(io::Result<usize>),
}

/// RelayEngine pumps bytes between the client and upstream connections
#[derive(Debug, Clone, Copy)]
pub struct RelayEngine {
    idle_timeout: Duration,
}

impl RelayEngine {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    /// pump copies data both ways until a side closes, an i/o operation
    /// fails, or nothing is readable for the idle timeout. Both connections
    /// are shut down before it returns, whatever the reason.
    pub async fn pump<A, B>(&self, client: &mut A, upstream: &mut B) -> RelaySummary
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let mut client_buf = vec![0u8; RELAY_CHUNK_SIZE];
        let mut upstream_buf = vec![0u8; RELAY_CHUNK_SIZE];
        let mut client_to_upstream = 0u64;
        let mut upstream_to_client = 0u64;

        let outcome = loop {
            // One readiness wait over both connections per iteration
            let ready = timeout(self.idle_timeout, async {
                tokio::select! {
                    r = client.read(&mut client_buf) => Readable::Client(r),
                    r = upstream.read(&mut upstream_buf) => Readable::Upstream(r),
                }
            })
            .await;

            match ready {
                Err(_) => break RelayOutcome::IdleTimeout,
                Ok(Readable::Client(Ok(0))) => break RelayOutcome::ClientClosed,
                Ok(Readable::Upstream(Ok(0))) => break RelayOutcome::UpstreamClosed,
                Ok(Readable::Client(Err(e))) => {
                    let err = RelayIoError::read(Direction::ClientToUpstream, e);
                    break RelayOutcome::Failed(err);
                }
                Ok(Readable::Upstream(Err(e))) => {
                    let err = RelayIoError::read(Direction::UpstreamToClient, e);
                    break RelayOutcome::Failed(err);
                }
                Ok(Readable::Client(Ok(n))) => {
                    if let Err(e) = self.forward(upstream, &client_buf[..n]).await {
                        let err = RelayIoError::write(Direction::ClientToUpstream, e);
                        break RelayOutcome::Failed(err);
                    }
                    client_to_upstream += n as u64;
                }
                Ok(Readable::Upstream(Ok(n))) => {
                    if let Err(e) = self.forward(client, &upstream_buf[..n]).await {
                        let err = RelayIoError::write(Direction::UpstreamToClient, e);
                        break RelayOutcome::Failed(err);
                    }
                    upstream_to_client += n as u64;
                }
            }
        };

        close(client).await;
        close(upstream).await;

        // DEBUG
        debug!(
            "relay finished ({:?}): {} bytes client->upstream, {} bytes upstream->client",
            outcome, client_to_upstream, upstream_to_client
        );

        RelaySummary {
            outcome,
            client_to_upstream,
            upstream_to_client,
        }
    }

    /// forward writes a whole chunk to `dst`. A peer that cannot take the
    /// chunk within the idle timeout counts as a failed write.
    async fn forward<W>(&self, dst: &mut W, chunk: &[u8]) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        match timeout(self.idle_timeout, dst.write_all(chunk)).await {
            Ok(res) => res,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "peer stopped accepting data",
            )),
        }
    }
}

/// close shuts down the write side of a connection. Safe to call on a
/// connection that is already closed.
pub async fn close<S>(stream: &mut S)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        debug!("shutdown on closed connection: {e}");
    }
}
