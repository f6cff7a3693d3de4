use crate::{NETCONF_BASE_10_CAP, NETCONF_BASE_11_CAP};
use core::time::Duration;

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Confirm timeout, in seconds, of a confirmed commit that does not name one.
pub const DEFAULT_CONFIRM_TIMEOUT: u32 = 600;

/// Which `<rpc-error>` elements turn a reply into an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RaiseMode {
    /// Never; errors are left in [`RpcReply::warnings`](crate::message::RpcReply::warnings).
    None,
    /// Only errors of severity `error`.
    Errors,
    /// Any `<rpc-error>`, warnings included.
    #[default]
    All,
}

/// Per session settings.
///
/// ```
/// use netconf_session::config::SessionConfig;
/// use std::time::Duration;
///
/// let mut config = SessionConfig::new();
/// config.set_timeout(Duration::from_secs(5));
/// config.set_async_mode(true);
/// assert!(config.async_mode());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    timeout: Duration,
    async_mode: bool,
    raise_mode: RaiseMode,
    capabilities: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            timeout: DEFAULT_TIMEOUT,
            async_mode: false,
            raise_mode: RaiseMode::default(),
            capabilities: vec![
                NETCONF_BASE_10_CAP.to_string(),
                NETCONF_BASE_11_CAP.to_string(),
            ],
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a request, and the hello exchange, may wait for the server.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// In async mode operations hand back a pending handle instead of
    /// waiting for the reply.
    pub fn set_async_mode(&mut self, async_mode: bool) -> &mut Self {
        self.async_mode = async_mode;
        self
    }

    pub fn set_raise_mode(&mut self, raise_mode: RaiseMode) -> &mut Self {
        self.raise_mode = raise_mode;
        self
    }

    /// Adds a capability URI to the client `<hello>`.
    pub fn add_capability(&mut self, capability: impl Into<String>) -> &mut Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Replaces the capability URIs of the client `<hello>`.
    pub fn set_capabilities(&mut self, capabilities: Vec<String>) -> &mut Self {
        self.capabilities = capabilities;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn async_mode(&self) -> bool {
        self.async_mode
    }

    pub fn raise_mode(&self) -> RaiseMode {
        self.raise_mode
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }
}
