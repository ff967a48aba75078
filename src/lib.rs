//! A lightweight SOCKS5 proxy library
//!
//! ## SOCKS5 Implementation
//!
//! - Features:
//!     - CONNECT to IPv4 and domain-name targets
//!     - Username/Password Authentication (required)
//!     - Async using tokio, one task per client session
//!     - Bounded number of concurrent sessions
//!     - Idle-timeout bounded relay
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)
//!
//! # Example
//! ```no_run
//! use gatesocks::{Socks5Server, auth::UserPass};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let creds = UserPass {
//!         username: "admin".to_string(),
//!         password: "123".to_string(),
//!     };
//!     let mut server = Socks5Server::new("127.0.0.1:1080", creds).with_max_sessions(64);
//!     server.run().await
//! }
//! ```

pub mod address;
pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;

// Re-export main types at crate root for convenience
pub use auth::{Authenticator, UserPass};
pub use config::Config;
pub use error::{ProtocolError, SessionError};
pub use protocol::{AuthMethod, Command, ReplyCode, Version};
pub use relay::{RelayEngine, RelayOutcome, RelaySummary};
pub use server::Socks5Server;
pub use session::{ConnectionSession, SessionSettings, SessionState};
