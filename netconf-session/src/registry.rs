//! Named sessions with one of them marked current.

use crate::config::SessionConfig;
use crate::error::{NetconfClientError, NetconfClientResult};
use crate::session::Session;
use crate::transport::Transport;
#[cfg(feature = "ssh")]
use crate::transport::ssh::{Endpoint, SshTransport};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Entries {
    sessions: HashMap<String, Session>,
    current: Option<String>,
}

/// Sessions by alias.
///
/// The most recently connected session becomes current; [`Registry::switch`]
/// changes that. The registry never holds its lock across I/O.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<Entries>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_free(&self, alias: &str) -> NetconfClientResult<()> {
        if self.entries().sessions.contains_key(alias) {
            return Err(NetconfClientError::invalid_argument(format!(
                "alias {} is already in use",
                alias
            )));
        }
        Ok(())
    }

    /// Opens a session over `stream` and registers it as current.
    pub async fn connect<S>(
        &self,
        alias: &str,
        stream: S,
        config: SessionConfig,
    ) -> NetconfClientResult<Session>
    where
        S: Transport,
    {
        self.ensure_free(alias)?;
        let session = Session::connect(stream, config).await?;
        self.add(alias, session).await
    }

    /// Opens an SSH session to `endpoint` and registers it as current.
    #[cfg(feature = "ssh")]
    pub async fn connect_ssh(
        &self,
        alias: &str,
        endpoint: &Endpoint,
        config: SessionConfig,
    ) -> NetconfClientResult<Session> {
        self.ensure_free(alias)?;
        let transport = SshTransport::open(endpoint).await?;
        let session = Session::connect(transport, config).await?;
        self.add(alias, session).await
    }

    async fn add(&self, alias: &str, session: Session) -> NetconfClientResult<Session> {
        if let Err(err) = self.register(alias, session.clone()) {
            // lost a race for the alias
            let _ = session.close_session().await;
            return Err(err);
        }
        Ok(session)
    }

    /// Registers an already connected session as current.
    pub fn register(&self, alias: &str, session: Session) -> NetconfClientResult<()> {
        let mut entries = self.entries();
        if entries.sessions.contains_key(alias) {
            return Err(NetconfClientError::invalid_argument(format!(
                "alias {} is already in use",
                alias
            )));
        }
        info!("Registered session {} as {}", session.session_id(), alias);
        entries.sessions.insert(alias.to_string(), session);
        entries.current = Some(alias.to_string());
        Ok(())
    }

    /// Makes `alias` current and returns the alias that was current before.
    pub fn switch(&self, alias: &str) -> NetconfClientResult<Option<String>> {
        let mut entries = self.entries();
        if !entries.sessions.contains_key(alias) {
            return Err(NetconfClientError::invalid_argument(format!(
                "no session named {}",
                alias
            )));
        }
        debug!("Switching current session to {}", alias);
        Ok(entries.current.replace(alias.to_string()))
    }

    pub fn current(&self) -> NetconfClientResult<Session> {
        let entries = self.entries();
        entries
            .current
            .as_ref()
            .and_then(|alias| entries.sessions.get(alias))
            .cloned()
            .ok_or_else(|| NetconfClientError::invalid_argument("no current session"))
    }

    pub fn current_alias(&self) -> Option<String> {
        self.entries().current.clone()
    }

    pub fn get(&self, alias: &str) -> Option<Session> {
        self.entries().sessions.get(alias).cloned()
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.entries().sessions.keys().cloned().collect();
        aliases.sort();
        aliases
    }

    pub fn len(&self) -> usize {
        self.entries().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().sessions.is_empty()
    }

    /// Removes `alias` and closes its session. Closing the current session
    /// leaves no session current.
    pub async fn close(&self, alias: &str) -> NetconfClientResult<()> {
        let session = {
            let mut entries = self.entries();
            let session = entries.sessions.remove(alias).ok_or_else(|| {
                NetconfClientError::invalid_argument(format!("no session named {}", alias))
            })?;
            if entries.current.as_deref() == Some(alias) {
                entries.current = None;
            }
            session
        };
        close_one(alias, session).await
    }

    /// Closes every session. All are attempted; the first error is returned.
    pub async fn close_all(&self) -> NetconfClientResult<()> {
        let sessions: Vec<(String, Session)> = {
            let mut entries = self.entries();
            entries.current = None;
            entries.sessions.drain().collect()
        };
        let mut result = Ok(());
        for (alias, session) in sessions {
            if let Err(err) = close_one(&alias, session).await {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

async fn close_one(alias: &str, session: Session) -> NetconfClientResult<()> {
    if !session.is_connected() {
        debug!("Session {} already closed", alias);
        return Ok(());
    }
    session.close_session().await.map_err(|err| {
        error!("Error closing session {}: {}", alias, err);
        err
    })
}
