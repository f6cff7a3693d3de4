use crate::error::{NetconfClientError, NetconfClientResult};
use async_ssh2_lite::{ssh2, AsyncChannel, AsyncSession, SessionConfiguration};
use core::time::Duration;
use log::{debug, info, warn};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

pub const NETCONF_SSH_PORT: u16 = 830;

/// Where and as whom to open an SSH session.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Endpoint {
        Endpoint {
            host: host.into(),
            port: NETCONF_SSH_PORT,
            username: username.into(),
            password: None,
            key_file: None,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_port(mut self, port: u16) -> Endpoint {
        self.port = port;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Endpoint {
        self.password = Some(password.into());
        self
    }

    pub fn with_key_file(mut self, key_file: impl Into<PathBuf>) -> Endpoint {
        self.key_file = Some(key_file.into());
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

type Disconnecting = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// An SSH channel bound to the `netconf` subsystem.
///
/// Shutting down the write side closes the channel and disconnects the SSH
/// session; reads after that see end of stream.
pub struct SshTransport {
    session: AsyncSession<TcpStream>,
    channel: Option<AsyncChannel<TcpStream>>,
    disconnecting: Option<Disconnecting>,
}

impl SshTransport {
    /// Connects, authenticates with the endpoint's key file or password, and
    /// requests the `netconf` subsystem.
    pub async fn open(endpoint: &Endpoint) -> NetconfClientResult<SshTransport> {
        let address = endpoint.address();
        let stream = tokio::time::timeout(endpoint.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {} timed out", address),
                )
            })??;
        let mut configuration = SessionConfiguration::new();
        configuration.set_timeout(endpoint.connect_timeout.as_millis() as u32);
        let mut session = AsyncSession::new(stream, configuration)?;
        session.handshake().await?;

        match (&endpoint.key_file, &endpoint.password) {
            (Some(key_file), password) => {
                debug!("Authenticating {} with key {:?}", endpoint.username, key_file);
                session
                    .userauth_pubkey_file(&endpoint.username, None, key_file, password.as_deref())
                    .await?
            }
            (None, Some(password)) => {
                session
                    .userauth_password(&endpoint.username, password)
                    .await?
            }
            (None, None) => {
                let mut agent = session.agent()?;
                agent.connect().await?;
                agent.list_identities().await?;
                for identity in agent.identities().map_err(io::Error::from)? {
                    debug!("Trying public key '{}'", identity.comment());
                    match agent.userauth(&endpoint.username, &identity).await {
                        Ok(_) => break,
                        Err(err) => {
                            warn!("Public key '{}' rejected: {}", identity.comment(), err);
                        }
                    }
                }
            }
        }
        info!("SSH session to {} established", address);
        SshTransport::new_with_session(session).await
    }

    /// Opens the `netconf` subsystem on an authenticated session.
    pub async fn new_with_session(
        session: AsyncSession<TcpStream>,
    ) -> NetconfClientResult<SshTransport> {
        if !session.authenticated() {
            return Err(NetconfClientError::Handshake(
                "ssh session is not authenticated".to_string(),
            ));
        }
        let mut channel = session.channel_session().await?;
        channel.subsystem("netconf").await?;
        Ok(SshTransport {
            session,
            channel: Some(channel),
            disconnecting: None,
        })
    }
}

async fn disconnect(
    session: AsyncSession<TcpStream>,
    mut channel: AsyncChannel<TcpStream>,
) -> io::Result<()> {
    channel.send_eof().await?;
    channel.close().await?;
    session
        .disconnect(Some(ssh2::ByApplication), "Shutdown", None)
        .await?;
    debug!("SSH session disconnected");
    Ok(())
}

impl AsyncRead for SshTransport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().channel.as_mut() {
            Some(channel) => Pin::new(channel).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for SshTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().channel.as_mut() {
            Some(channel) => Pin::new(channel).poll_write(cx, buf),
            None => Poll::Ready(Err(io::ErrorKind::BrokenPipe.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().channel.as_mut() {
            Some(channel) => Pin::new(channel).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(channel) = this.channel.take() {
            this.disconnecting = Some(Box::pin(disconnect(this.session.clone(), channel)));
        }
        let Some(disconnecting) = this.disconnecting.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let result = ready!(disconnecting.as_mut().poll(cx));
        this.disconnecting = None;
        Poll::Ready(result)
    }
}
