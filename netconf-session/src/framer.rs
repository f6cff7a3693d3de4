use crate::error::NetconfClientResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod async_framer;

pub const NETCONF_1_0_TERMINATOR: &str = "]]>]]>";

/// Framing mode shared by the read and write halves of one channel.
///
/// Both halves start in end-of-message mode and switch to chunked framing
/// together once the hello exchange has agreed on base:1.1.
#[derive(Debug, Clone, Default)]
pub struct FramingMode {
    upgraded: Arc<AtomicBool>,
}

impl FramingMode {
    pub fn upgrade(&self) {
        self.upgraded.store(true, Ordering::Relaxed);
    }

    pub fn is_chunked(&self) -> bool {
        self.upgraded.load(Ordering::Relaxed)
    }
}

/// Receiving half of a framed NETCONF channel.
#[async_trait]
pub trait FrameRead: Send {
    /// Reads one complete message. `Ok(None)` means the peer closed the
    /// channel on a message boundary.
    async fn read_frame(&mut self) -> NetconfClientResult<Option<String>>;
}

/// Sending half of a framed NETCONF channel.
#[async_trait]
pub trait FrameWrite: Send {
    async fn write_frame(&mut self, message: &str) -> NetconfClientResult<()>;
    async fn shutdown(&mut self) -> NetconfClientResult<()>;
}
