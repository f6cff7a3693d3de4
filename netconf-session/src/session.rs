//! One NETCONF client session over an established byte stream.
//!
//! ```text
//! Connecting -> HelloExchanged -> Ready -> Closing -> Closed
//!                                   \__________________/
//!                                    transport failure
//! ```
//!
//! A [`Session`] is a cheap handle; clones share the same session. Requests
//! are written under a send lock, replies are routed by a receive task to the
//! caller holding the matching message-id.

use crate::capability::{Capabilities, YangModule};
use crate::config::{SessionConfig, DEFAULT_CONFIRM_TIMEOUT};
use crate::correlator::{Correlator, PendingRequest};
use crate::error::{NetconfClientError, NetconfClientResult};
use crate::framer::async_framer;
use crate::framer::{FrameRead, FrameWrite, FramingMode};
use crate::message::{
    classify, ConfigSource, Datastore, DefaultOperation, Dispatch, ErrorOption, Filter, Hello,
    Inbound, Rpc, RpcOperation, RpcReply, TestOption, WithDefaultsValue,
};
use crate::transport::Transport;
use crate::{NETCONF_BASE_10_CAP, NETCONF_BASE_11_CAP};
use core::fmt;
use core::time::Duration;
use log::{debug, error, info, warn};
use quick_xml::de::from_str;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::task::{block_in_place, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HelloExchanged,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            SessionState::Connecting => "connecting",
            SessionState::HelloExchanged => "hello-exchanged",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(state)
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the receive task.
struct Shared {
    session_id: u64,
    state: Mutex<SessionState>,
    correlator: Arc<Correlator>,
    locks: Mutex<HashSet<Datastore>>,
    notifications: Mutex<Option<mpsc::Sender<String>>>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *guard(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        let mut current = guard(&self.state);
        if *current != state && *current != SessionState::Closed {
            debug!("Session {}: {} -> {}", self.session_id, *current, state);
            *current = state;
        }
    }

    fn on_frame(&self, frame: String) {
        self.correlator.expire();
        match classify(&frame) {
            Inbound::Reply(Some(message_id)) => {
                if !self.correlator.resolve(message_id, frame) {
                    warn!(
                        "Session {}: dropping reply to unknown message-id {}",
                        self.session_id, message_id
                    );
                    self.correlator.report_anomaly();
                }
            }
            Inbound::Reply(None) => {
                warn!(
                    "Session {}: dropping reply without message-id:\n{}",
                    self.session_id, frame
                );
                self.correlator.report_anomaly();
            }
            Inbound::Notification => {
                let sink = guard(&self.notifications).clone();
                match sink {
                    Some(sink) => {
                        if let Err(err) = sink.try_send(frame) {
                            warn!("Session {}: notification dropped: {}", self.session_id, err);
                        }
                    }
                    None => debug!("Session {}: no notification sink", self.session_id),
                }
            }
            Inbound::Unknown(root) => {
                warn!(
                    "Session {}: dropping unexpected <{}> message",
                    self.session_id, root
                );
                self.correlator.report_anomaly();
            }
        }
    }

    /// Terminal transition. Every waiting request fails with
    /// [`NetconfClientError::SessionClosed`].
    fn close(&self) {
        *guard(&self.state) = SessionState::Closed;
        let failed = self.correlator.close();
        if failed > 0 {
            debug!(
                "Session {}: failed {} pending requests",
                self.session_id, failed
            );
        }
        guard(&self.locks).clear();
        guard(&self.notifications).take();
    }
}

async fn receive_loop(mut reader: Box<dyn FrameRead>, shared: Arc<Shared>) {
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => shared.on_frame(frame),
            Ok(None) => {
                info!("Session {}: closed by peer", shared.session_id);
                break;
            }
            Err(err) => {
                if shared.state() != SessionState::Closed {
                    error!("Session {}: receive failed: {}", shared.session_id, err);
                }
                break;
            }
        }
    }
    shared.close();
}

struct SessionInner {
    shared: Arc<Shared>,
    config: SessionConfig,
    client_capabilities: Capabilities,
    server_capabilities: Capabilities,
    writer: tokio::sync::Mutex<Box<dyn FrameWrite>>,
    receiver: JoinHandle<()>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.receiver.abort();
        self.shared.close();
    }
}

/// A NETCONF session in the `Ready` state, or past it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Runs the hello exchange over `stream` and starts the receive task.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect<S>(stream: S, config: SessionConfig) -> NetconfClientResult<Session>
    where
        S: Transport,
    {
        let (reader, writer) = async_framer::split(stream);
        let mode = reader.mode().clone();
        Session::establish(Box::new(reader), Box::new(writer), mode, config).await
    }

    /// Like [`Session::connect`], over already framed halves sharing `mode`.
    pub async fn establish(
        mut reader: Box<dyn FrameRead>,
        mut writer: Box<dyn FrameWrite>,
        mode: FramingMode,
        config: SessionConfig,
    ) -> NetconfClientResult<Session> {
        match handshake(reader.as_mut(), writer.as_mut(), &mode, &config).await {
            Ok((session_id, client_capabilities, server_capabilities)) => {
                let shared = Arc::new(Shared {
                    session_id,
                    state: Mutex::new(SessionState::Ready),
                    correlator: Arc::new(Correlator::new()),
                    locks: Mutex::new(HashSet::new()),
                    notifications: Mutex::new(None),
                });
                let receiver = tokio::spawn(receive_loop(reader, Arc::clone(&shared)));
                info!(
                    "Session {} ready ({} framing)",
                    session_id,
                    if mode.is_chunked() { "chunked" } else { "end-of-message" }
                );
                Ok(Session {
                    inner: Arc::new(SessionInner {
                        shared,
                        config,
                        client_capabilities,
                        server_capabilities,
                        writer: tokio::sync::Mutex::new(writer),
                        receiver,
                    }),
                })
            }
            Err(err) => {
                error!("NETCONF handshake failed: {}", err);
                let _ = writer.shutdown().await;
                Err(err)
            }
        }
    }

    pub fn session_id(&self) -> u64 {
        self.inner.shared.session_id
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn timeout(&self) -> Duration {
        self.inner.config.timeout()
    }

    pub fn is_async(&self) -> bool {
        self.inner.config.async_mode()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn client_capabilities(&self) -> &Capabilities {
        &self.inner.client_capabilities
    }

    pub fn server_capabilities(&self) -> &Capabilities {
        &self.inner.server_capabilities
    }

    pub fn yang_modules(&self) -> &[YangModule] {
        self.inner.server_capabilities.modules()
    }

    /// Whether this session holds the lock on `target`.
    pub fn holds_lock(&self, target: &Datastore) -> bool {
        guard(&self.inner.shared.locks).contains(target)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.shared.correlator.pending()
    }

    /// Inbound frames that matched no request, carried no message-id or were
    /// neither replies nor notifications.
    pub fn protocol_violations(&self) -> u64 {
        self.inner.shared.correlator.anomalies()
    }

    /// Routes `<notification>` messages to a new channel of `capacity`
    /// messages. Notifications that find the channel full are dropped.
    pub fn notifications(&self, capacity: usize) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        self.set_notification_sink(sender);
        receiver
    }

    pub fn set_notification_sink(&self, sink: mpsc::Sender<String>) {
        *guard(&self.inner.shared.notifications) = Some(sink);
    }

    fn ensure_ready(&self) -> NetconfClientResult<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            _ => Err(NetconfClientError::SessionClosed),
        }
    }

    fn check_capabilities(&self, operation: &RpcOperation) -> NetconfClientResult<()> {
        let missing = operation
            .required_capabilities()
            .difference(self.inner.server_capabilities.known());
        match missing.iter().next() {
            Some(capability) => Err(NetconfClientError::CapabilityUnsupported {
                operation: operation.name(),
                capability: capability.tag(),
            }),
            None => Ok(()),
        }
    }

    /// Writes `operation` and returns the slot its reply will land in.
    /// Nothing is written if the session is not ready or the server lacks a
    /// capability the operation needs.
    pub async fn send(&self, operation: RpcOperation) -> NetconfClientResult<PendingRequest> {
        self.ensure_ready()?;
        self.check_capabilities(&operation)?;

        let mut writer = self.inner.writer.lock().await;
        self.ensure_ready()?;
        let correlator = &self.inner.shared.correlator;
        let name = operation.name();
        let rpc = Rpc::new(correlator.next_message_id(), operation);
        let xml = rpc.to_xml()?;
        let pending = correlator.register(rpc.message_id(), name, self.timeout())?;
        if let Err(err) = writer.write_frame(&xml).await {
            error!(
                "Session {}: failed to send message-id {}: {}",
                self.session_id(),
                rpc.message_id(),
                err
            );
            drop(writer);
            self.inner.shared.close();
            return Err(err);
        }
        Ok(pending)
    }

    async fn request(
        &self,
        operation: RpcOperation,
        on_failure: OnFailure,
    ) -> NetconfClientResult<Response> {
        let handle = RpcHandle {
            pending: self.send(operation).await?,
            session: self.clone(),
            on_failure,
        };
        if self.is_async() {
            Ok(Response::Pending(handle))
        } else {
            handle.wait().await.map(Response::Reply)
        }
    }

    /// Issues `operation` as is, e.g. one built by hand with [`RpcOperation`]
    /// constructors.
    pub async fn execute(&self, operation: RpcOperation) -> NetconfClientResult<Response> {
        self.request(operation, OnFailure::Nothing).await
    }

    /// `<get>`, [RFC6241 7.7](https://www.rfc-editor.org/rfc/rfc6241.html#section-7.7).
    pub async fn get(
        &self,
        filter: Option<Filter>,
        defaults: Option<WithDefaultsValue>,
    ) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_get(filter, defaults)).await
    }

    /// `<get-config>`, [RFC6241 7.1](https://www.rfc-editor.org/rfc/rfc6241.html#section-7.1).
    /// `source` is the datastore to query.
    pub async fn get_config(
        &self,
        source: Datastore,
        filter: Option<Filter>,
        defaults: Option<WithDefaultsValue>,
    ) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_get_config(source, filter, defaults))
            .await
    }

    pub async fn edit_config(
        &self,
        target: Datastore,
        config: &str,
        default_operation: Option<DefaultOperation>,
        test_option: Option<TestOption>,
        error_option: Option<ErrorOption>,
    ) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_edit_config(
            target,
            config,
            default_operation,
            test_option,
            error_option,
        ))
        .await
    }

    /// `source` is a datastore, a URL or an inline `<config>` tree.
    pub async fn copy_config(
        &self,
        source: impl Into<ConfigSource>,
        target: Datastore,
    ) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_copy_config(source, target))
            .await
    }

    pub async fn delete_config(&self, target: Datastore) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_delete_config(target)).await
    }

    /// Locks `target`. Locking a datastore this session already holds fails
    /// with [`NetconfClientError::AlreadyLocked`] without contacting the server.
    pub async fn lock(&self, target: Datastore) -> NetconfClientResult<Response> {
        self.ensure_ready()?;
        if !guard(&self.inner.shared.locks).insert(target.clone()) {
            return Err(NetconfClientError::AlreadyLocked(target));
        }
        let result = self
            .request(
                RpcOperation::new_lock(target.clone()),
                OnFailure::ReleaseLock(target.clone()),
            )
            .await;
        if result.is_err() {
            self.forget_lock(&target);
        }
        result
    }

    pub async fn unlock(&self, target: Datastore) -> NetconfClientResult<Response> {
        self.ensure_ready()?;
        self.forget_lock(&target);
        self.execute(RpcOperation::new_unlock(target)).await
    }

    /// Locks `target` and waits for the reply, whatever the session mode.
    /// The lock is released when the guard is released or dropped.
    pub async fn locked(&self, target: Datastore) -> NetconfClientResult<LockGuard> {
        self.lock(target.clone()).await?.into_reply().await?;
        Ok(LockGuard {
            session: self.clone(),
            target,
            released: false,
        })
    }

    fn forget_lock(&self, target: &Datastore) {
        guard(&self.inner.shared.locks).remove(target);
    }

    /// Plain `<commit>`, or a confirmed one when `confirmed` is set.
    /// `timeout` is the confirm timeout in seconds and defaults to 600 for a
    /// confirmed commit; it is ignored otherwise.
    pub async fn commit(
        &self,
        confirmed: bool,
        timeout: Option<u32>,
    ) -> NetconfClientResult<Response> {
        if confirmed {
            self.confirmed_commit(timeout, None, None).await
        } else {
            self.execute(RpcOperation::new_commit(None, None, None, None))
                .await
        }
    }

    /// Confirmed `<commit>` with the `:confirmed-commit:1.1` persist options.
    pub async fn confirmed_commit(
        &self,
        timeout: Option<u32>,
        persist: Option<String>,
        persist_id: Option<String>,
    ) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_commit(
            Some(()),
            Some(timeout.unwrap_or(DEFAULT_CONFIRM_TIMEOUT)),
            persist,
            persist_id,
        ))
        .await
    }

    /// Confirms a pending persistent confirmed commit from any session.
    pub async fn confirm_persisted(&self, persist_id: &str) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_commit(
            None,
            None,
            None,
            Some(persist_id.to_string()),
        ))
        .await
    }

    pub async fn discard_changes(&self) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::DiscardChanges).await
    }

    /// `source` is a datastore, a URL or an inline `<config>` tree.
    pub async fn validate(&self, source: impl Into<ConfigSource>) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_validate(source)).await
    }

    /// Sends an arbitrary rpc, given either as an element name or as raw XML.
    pub async fn dispatch(
        &self,
        rpc: &str,
        source: Option<ConfigSource>,
        filter: Option<Filter>,
    ) -> NetconfClientResult<Response> {
        let dispatch = Dispatch::new(rpc, source, filter)?;
        self.execute(RpcOperation::Dispatch(dispatch)).await
    }

    /// Asks the server to terminate another session.
    pub async fn kill_session(&self, session_id: u64) -> NetconfClientResult<Response> {
        if session_id == self.session_id() {
            return Err(NetconfClientError::invalid_argument(
                "a session cannot kill itself, use close_session",
            ));
        }
        self.execute(RpcOperation::KillSession { session_id }).await
    }

    /// Starts a notification subscription, [RFC5277 2.1.1](https://www.rfc-editor.org/rfc/rfc5277.html#section-2.1.1).
    /// Notifications go to the sink set with [`Session::notifications`].
    pub async fn create_subscription(
        &self,
        stream: Option<&str>,
        filter: Option<Filter>,
        duration: Option<Duration>,
    ) -> NetconfClientResult<Response> {
        self.execute(RpcOperation::new_create_subscription(
            stream, filter, duration,
        ))
        .await
    }

    /// Gracefully closes the session. Always waits for the reply.
    pub async fn close_session(&self) -> NetconfClientResult<()> {
        let pending = self.send(RpcOperation::CloseSession).await?;
        self.inner.shared.set_state(SessionState::Closing);
        let message_id = pending.message_id();
        let result = match pending.wait().await {
            Ok(frame) => {
                RpcReply::decode(message_id, &frame, self.inner.config.raise_mode()).map(|_| ())
            }
            // the server may drop the transport before we read the reply
            Err(NetconfClientError::SessionClosed) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = self.inner.writer.lock().await.shutdown().await {
            debug!("Session {}: shutdown failed: {}", self.session_id(), err);
        }
        self.inner.shared.close();
        info!("Session {} closed", self.session_id());
        result
    }
}

/// What to undo locally when a request fails.
enum OnFailure {
    Nothing,
    ReleaseLock(Datastore),
}

/// A request issued in async mode.
pub struct RpcHandle {
    pending: PendingRequest,
    session: Session,
    on_failure: OnFailure,
}

impl RpcHandle {
    pub fn message_id(&self) -> u64 {
        self.pending.message_id()
    }

    pub fn operation(&self) -> &'static str {
        self.pending.operation()
    }

    /// Waits for and decodes the reply.
    pub async fn wait(self) -> NetconfClientResult<RpcReply> {
        let message_id = self.pending.message_id();
        let raise_mode = self.session.inner.config.raise_mode();
        let result = self
            .pending
            .wait()
            .await
            .and_then(|frame| RpcReply::decode(message_id, &frame, raise_mode));
        match &result {
            Ok(reply) => debug!("RPC:\n{}", reply),
            Err(_) => {
                if let OnFailure::ReleaseLock(target) = &self.on_failure {
                    self.session.forget_lock(target);
                }
            }
        }
        result
    }
}

impl fmt::Debug for RpcHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcHandle")
            .field("message_id", &self.message_id())
            .field("operation", &self.operation())
            .finish()
    }
}

/// Outcome of an operation: the decoded reply in synchronous mode, a handle
/// to wait on in async mode.
#[derive(Debug)]
pub enum Response {
    Reply(RpcReply),
    Pending(RpcHandle),
}

impl Response {
    pub async fn into_reply(self) -> NetconfClientResult<RpcReply> {
        match self {
            Response::Reply(reply) => Ok(reply),
            Response::Pending(handle) => handle.wait().await,
        }
    }

    pub fn reply(&self) -> Option<&RpcReply> {
        match self {
            Response::Reply(reply) => Some(reply),
            Response::Pending(_) => None,
        }
    }

    pub fn message_id(&self) -> u64 {
        match self {
            Response::Reply(reply) => reply.message_id(),
            Response::Pending(handle) => handle.message_id(),
        }
    }
}

/// A datastore lock held by a session, released on [`LockGuard::release`] or
/// on drop.
pub struct LockGuard {
    session: Session,
    target: Datastore,
    released: bool,
}

impl LockGuard {
    pub fn target(&self) -> &Datastore {
        &self.target
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn release(mut self) -> NetconfClientResult<RpcReply> {
        self.released = true;
        self.session
            .unlock(self.target.clone())
            .await?
            .into_reply()
            .await
    }
}

async fn unlock_quietly(session: Session, target: Datastore) {
    if !session.is_connected() {
        session.forget_lock(&target);
        return;
    }
    let result = match session.unlock(target.clone()).await {
        Ok(response) => response.into_reply().await.map(|_| ()),
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        error!("Error releasing lock on {}: {}", target, err);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let session = self.session.clone();
        let target = self.target.clone();
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                block_in_place(|| handle.block_on(unlock_quietly(session, target)));
            }
            Ok(handle) => {
                handle.spawn(unlock_quietly(session, target));
            }
            Err(_) => {
                warn!("No runtime to release lock on {}", target);
                session.forget_lock(&target);
            }
        }
    }
}

async fn handshake(
    reader: &mut dyn FrameRead,
    writer: &mut dyn FrameWrite,
    mode: &FramingMode,
    config: &SessionConfig,
) -> NetconfClientResult<(u64, Capabilities, Capabilities)> {
    let hello = Hello::with_capabilities(config.capabilities().to_vec());
    writer
        .write_frame(&hello.to_xml()?)
        .await
        .map_err(|err| NetconfClientError::Handshake(err.to_string()))?;

    let response = match tokio::time::timeout(config.timeout(), reader.read_frame()).await {
        Ok(Ok(Some(response))) => response,
        Ok(Ok(None)) => {
            return Err(NetconfClientError::Handshake(
                "channel closed before <hello>".to_string(),
            ))
        }
        Ok(Err(err)) => return Err(NetconfClientError::Handshake(err.to_string())),
        Err(_) => {
            return Err(NetconfClientError::Handshake(format!(
                "no <hello> within {:?}",
                config.timeout()
            )))
        }
    };
    debug!("Hello:\n{}", response);

    let remote: Hello = from_str(&response)
        .map_err(|err| NetconfClientError::Handshake(format!("malformed <hello>: {}", err)))?;
    let session_id = remote.session_id().ok_or_else(|| {
        NetconfClientError::Handshake("server <hello> carries no session-id".to_string())
    })?;
    debug!("Session {}: {}", session_id, SessionState::HelloExchanged);

    let client_capabilities = Capabilities::parse(hello.capabilities());
    let server_capabilities = Capabilities::parse(remote.capabilities());
    let common = |base: &str| client_capabilities.has_uri(base) && server_capabilities.has_uri(base);
    if common(NETCONF_BASE_11_CAP) {
        mode.upgrade();
    } else if !common(NETCONF_BASE_10_CAP) {
        return Err(NetconfClientError::Handshake(
            "no common base capability".to_string(),
        ));
    }
    Ok((session_id, client_capabilities, server_capabilities))
}
