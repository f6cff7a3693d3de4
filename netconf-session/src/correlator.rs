//! Matches inbound `<rpc-reply>` frames to the requests waiting for them.

use crate::error::{NetconfClientError, NetconfClientResult};
use core::time::Duration;
use log::{debug, trace};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio::time::Instant;

type Responder = oneshot::Sender<NetconfClientResult<String>>;

struct Slot {
    issued_at: Instant,
    timeout: Duration,
    responder: Responder,
}

#[derive(Default)]
struct PendingTable {
    slots: HashMap<u64, Slot>,
    closed: bool,
}

/// Pending request table of one session.
///
/// Message ids start at 1, increase by one per request and are never reused,
/// including for requests that timed out.
pub struct Correlator {
    next_message_id: AtomicU64,
    table: Mutex<PendingTable>,
    anomalies: AtomicU64,
}

impl Default for Correlator {
    fn default() -> Self {
        Correlator {
            next_message_id: AtomicU64::new(1),
            table: Mutex::new(PendingTable::default()),
            anomalies: AtomicU64::new(0),
        }
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a slot for `message_id` before the request is written.
    pub fn register(
        self: &Arc<Self>,
        message_id: u64,
        operation: &'static str,
        timeout: Duration,
    ) -> NetconfClientResult<PendingRequest> {
        let (responder, response) = oneshot::channel();
        let issued_at = Instant::now();
        let mut table = self.table();
        if table.closed {
            return Err(NetconfClientError::SessionClosed);
        }
        table.slots.insert(
            message_id,
            Slot {
                issued_at,
                timeout,
                responder,
            },
        );
        trace!("Registered message-id {} ({})", message_id, operation);
        Ok(PendingRequest {
            message_id,
            operation,
            issued_at,
            timeout,
            response,
            correlator: Arc::clone(self),
        })
    }

    /// Hands `frame` to the request waiting for `message_id`.
    /// Returns false when nobody is waiting for it.
    pub fn resolve(&self, message_id: u64, frame: String) -> bool {
        let slot = self.table().slots.remove(&message_id);
        match slot {
            Some(slot) => {
                if slot.responder.send(Ok(frame)).is_err() {
                    debug!("Reply to message-id {} arrived after its caller left", message_id);
                }
                true
            }
            None => false,
        }
    }

    /// Drops the slot for `message_id`. Returns false if it was already gone.
    pub fn forget(&self, message_id: u64) -> bool {
        self.table().slots.remove(&message_id).is_some()
    }

    /// Fails every slot older than its timeout.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(u64, Slot)> = {
            let mut table = self.table();
            let ids: Vec<u64> = table
                .slots
                .iter()
                .filter(|(_, slot)| now.duration_since(slot.issued_at) >= slot.timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| table.slots.remove(&id).map(|slot| (id, slot)))
                .collect()
        };
        let count = expired.len();
        for (message_id, slot) in expired {
            debug!("message-id {} expired", message_id);
            let _ = slot.responder.send(Err(NetconfClientError::Timeout {
                message_id,
                after: slot.timeout,
            }));
        }
        count
    }

    /// Fails every slot with [`NetconfClientError::SessionClosed`] and refuses
    /// new registrations.
    pub fn close(&self) -> usize {
        let slots: Vec<Slot> = {
            let mut table = self.table();
            table.closed = true;
            table.slots.drain().map(|(_, slot)| slot).collect()
        };
        let count = slots.len();
        for slot in slots {
            let _ = slot.responder.send(Err(NetconfClientError::SessionClosed));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.table().closed
    }

    pub fn pending(&self) -> usize {
        self.table().slots.len()
    }

    /// Counts an inbound frame that could not be routed.
    pub fn report_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }
}

/// A request on the wire whose reply has not been consumed yet.
///
/// Dropping it releases its slot; a reply arriving later is then counted
/// as unmatched.
pub struct PendingRequest {
    message_id: u64,
    operation: &'static str,
    issued_at: Instant,
    timeout: Duration,
    response: oneshot::Receiver<NetconfClientResult<String>>,
    correlator: Arc<Correlator>,
}

impl PendingRequest {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// Waits for the raw reply frame until `issued_at + timeout`.
    pub async fn wait(mut self) -> NetconfClientResult<String> {
        let deadline = self.issued_at + self.timeout;
        match tokio::time::timeout_at(deadline, &mut self.response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NetconfClientError::SessionClosed),
            Err(_) => {
                if !self.correlator.forget(self.message_id) {
                    // resolved while the timer fired
                    if let Ok(result) = self.response.try_recv() {
                        return result;
                    }
                }
                Err(NetconfClientError::Timeout {
                    message_id: self.message_id,
                    after: self.timeout,
                })
            }
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.correlator.forget(self.message_id);
    }
}
