use crate::{
    auth::{Authenticator, UserPass},
    config::Config,
    error::SessionError,
    session::{ConnectionSession, SessionSettings},
};
use anyhow::{Result, bail};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::Semaphore,
};
use tracing::{error, info, warn};

/// Default cap on concurrently running sessions
pub const DEFAULT_MAX_SESSIONS: usize = 10;

/// Socks5Server represents a SOCKS5 server and houses related
/// configuration data
pub struct Socks5Server {
    pub listen_addr: String,
    authenticator: Authenticator,
    settings: SessionSettings,
    max_sessions: usize,
    listener: Option<TcpListener>,
}

/// Socks5Server implementation block
impl Socks5Server {
    /// new is a constructor for the Socks5Server type
    pub fn new(listen_addr: impl Into<String>, credential: UserPass) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            authenticator: Authenticator::new(credential),
            settings: SessionSettings::default(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            listener: None,
        }
    }

    /// from_config builds a server from a validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.listen_addr(), config.credential()?)
            .with_max_sessions(config.max_sessions)
            .with_settings(config.session_settings()))
    }

    /// with_max_sessions caps how many sessions run at once; further
    /// clients wait in the accept backlog. Zero is treated as one.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.settings.idle_timeout = idle_timeout;
        self
    }

    /// bind to the listen address; fails when called twice
    pub async fn bind(&mut self) -> Result<SocketAddr> {
        if self.listener.is_some() {
            bail!("bind can only be called once");
        }

        // Instantiate tokio listener
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;

        info!("SOCKS5 proxy listening on {:?}", addr);

        self.listener = Some(listener);
        Ok(addr)
    }

    /// run serves clients until the process ends
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// run_until serves clients until `shutdown` resolves. Sessions already
    /// running are left to finish on their own.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let Some(listener) = self.listener.take() else {
            bail!("listener missing after bind");
        };

        let limiter = Arc::new(Semaphore::new(self.max_sessions));
        tokio::pin!(shutdown);

        loop {
            // Wait for a free session slot before accepting
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = Arc::clone(&limiter).acquire_owned() => permit?,
            };

            let (inbound, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        // back off so descriptor exhaustion does not spin
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                },
            };

            // Clone for this connection
            let authenticator = self.authenticator.clone();
            let settings = self.settings;

            // Spawn async task
            tokio::spawn(async move {
                let _permit = permit;

                info!("new client: {}", peer_addr);

                handle_connection(inbound, peer_addr, authenticator, settings).await;
            });
        }

        info!("shutdown requested: no longer accepting connections");
        Ok(())
    }
}

/// handle_connection runs one session and logs how it ended
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    authenticator: Authenticator,
    settings: SessionSettings,
) {
    let session = ConnectionSession::new(stream, authenticator, settings);

    match session.run().await {
        Ok(_) => info!("session with {} closed", peer_addr),
        Err(e @ SessionError::Auth { .. }) => warn!("{}: {}", peer_addr, e),
        Err(e) => warn!("session with {} aborted: {}", peer_addr, e),
    }
}
