use crate::message::{Datastore, RpcError, RpcFailure};
use core::time::Duration;
use thiserror::Error;

pub type NetconfClientResult<T> = Result<T, NetconfClientError>;

#[derive(Debug, Error)]
pub enum NetconfClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
    #[cfg(feature = "ssh")]
    #[error(transparent)]
    Ssh(#[from] async_ssh2_lite::Error),
    #[error(transparent)]
    SerializingFailure(#[from] quick_xml::DeError),
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("{operation} requires the :{capability} capability")]
    CapabilityUnsupported {
        operation: &'static str,
        capability: &'static str,
    },
    #[error("no reply to message-id {message_id} within {after:?}")]
    Timeout { message_id: u64, after: Duration },
    #[error("remote procedure call failed:\n{0}")]
    Rpc(#[from] RpcFailure),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("datastore {0} is already locked by this session")]
    AlreadyLocked(Datastore),
    #[error("session is closed")]
    SessionClosed,
    #[error("unknown datastore {}, (expected {:?})", unknown, expected)]
    UnknownDatastore {
        expected: Vec<String>,
        unknown: String,
    },
    #[error(
        "malformed message chunk (expected {:?}, actual {:?})",
        expected,
        actual
    )]
    MalformedChunk { expected: char, actual: char },
}

impl NetconfClientError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        NetconfClientError::InvalidArgument(msg.into())
    }

    /// Returns true for errors after which the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        match self {
            NetconfClientError::Transport(_)
            | NetconfClientError::Handshake(_)
            | NetconfClientError::MalformedChunk { .. }
            | NetconfClientError::SessionClosed => true,
            #[cfg(feature = "ssh")]
            NetconfClientError::Ssh(_) => true,
            _ => false,
        }
    }

    /// The `<rpc-error>` elements of a failed reply, if this is one.
    pub fn rpc_errors(&self) -> Option<&[RpcError]> {
        match self {
            NetconfClientError::Rpc(failure) => Some(failure.errors()),
            _ => None,
        }
    }
}
