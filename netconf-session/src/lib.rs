//! # netconf-session
//!
//! ```toml
//! netconf-session = "^0.1.0"
//! ```
//!
//! Client side NETCONF ([RFC6241](https://www.rfc-editor.org/rfc/rfc6241.html))
//! sessions over any tokio byte stream: hello exchange and framing, capability
//! parsing, message-id correlation, datastore locking and a registry of named
//! sessions.
//!
//! ## Example
//!
//! ```no_run
//! use netconf_session::config::SessionConfig;
//! use netconf_session::message::{Datastore, Filter};
//! use netconf_session::session::Session;
//! use tokio::net::TcpStream;
//!
//! # async fn run() -> netconf_session::error::NetconfClientResult<()> {
//! let stream = TcpStream::connect("192.0.2.1:830").await?;
//! let session = Session::connect(stream, SessionConfig::new()).await?;
//!
//! let reply = session
//!     .get_config(Datastore::Running, Some(Filter::subtree("<interfaces/>")), None)
//!     .await?
//!     .into_reply()
//!     .await?;
//! println!("{}", reply.data().unwrap_or_default());
//!
//! let lock = session.locked(Datastore::Candidate).await?;
//! session.commit(true, None).await?;
//! lock.release().await?;
//! session.close_session().await?;
//! # Ok(())
//! # }
//! ```
//!
pub mod capability;
pub mod config;
pub mod correlator;
pub mod error;
pub mod framer;
pub mod message;
pub mod registry;
pub mod session;
pub mod transport;

pub const NETCONF_URN: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const NETCONF_BASE_10_CAP: &str = "urn:ietf:params:netconf:base:1.0";
pub const NETCONF_BASE_11_CAP: &str = "urn:ietf:params:netconf:base:1.1";

pub use config::{RaiseMode, SessionConfig};
pub use error::{NetconfClientError, NetconfClientResult};
pub use registry::Registry;
pub use session::{LockGuard, Response, RpcHandle, Session, SessionState};
