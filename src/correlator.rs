use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::dns::packet::DnsPacket;
use crate::error::ResolveError;
use crate::pending::PendingResult;

/// Transaction ids cycle through `[0, ID_SPACE)`
pub const ID_SPACE: u16 = 60_000;

/// A query on the wire, waiting for its response
pub struct OutstandingRequest {
    pub transaction_id: u16,
    pub waiter: PendingResult<DnsPacket>,
    pub created_at: Instant,
    serial: u64,
    timeout: JoinHandle<()>,
}

/// Routes inbound responses to the query that asked for them, by transaction id.
pub struct RequestCorrelator {
    outstanding: DashMap<u16, OutstandingRequest>,
    next_id: Mutex<u16>,
    serial: AtomicU64,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            outstanding: DashMap::new(),
            next_id: Mutex::new(0),
            serial: AtomicU64::new(0),
        }
    }

    /// Next id from the monotonic-with-wraparound counter: (counter + 1) mod 60000
    pub fn next_id(&self) -> u16 {
        let mut counter = self.next_id.lock();
        *counter = (*counter + 1) % ID_SPACE;
        *counter
    }

    /// Track `waiter` under `transaction_id`; it fails with `QueryTimeout` after `timeout`.
    pub fn register(
        self: &Arc<Self>,
        transaction_id: u16,
        waiter: PendingResult<DnsPacket>,
        timeout: Duration,
    ) -> Result<(), ResolveError> {
        match self.outstanding.entry(transaction_id) {
            Entry::Occupied(_) => {
                error!("request-queue overflow: transaction id {} is still outstanding", transaction_id);
                Err(ResolveError::TransactionIdCollision(transaction_id))
            }
            Entry::Vacant(slot) => {
                let serial = self.serial.fetch_add(1, Ordering::Relaxed);
                let this = Arc::clone(self);
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    this.expire(transaction_id, serial);
                });
                slot.insert(OutstandingRequest {
                    transaction_id,
                    waiter,
                    created_at: Instant::now(),
                    serial,
                    timeout: timer,
                });
                Ok(())
            }
        }
    }

    /// Hand a decoded response to whoever is waiting on its id.
    /// Unsolicited or late responses are dropped; returns whether one matched.
    pub fn complete(&self, transaction_id: u16, response: DnsPacket) -> bool {
        match self.outstanding.remove(&transaction_id) {
            Some((_, request)) => {
                request.timeout.abort();
                debug!(
                    "Response {} matched after {:?}",
                    response,
                    request.created_at.elapsed()
                );
                request.waiter.succeed(response);
                true
            }
            None => {
                debug!("Dropping unsolicited response {}", response);
                false
            }
        }
    }

    /// Withdraw a registration that never made it onto the wire
    pub fn cancel(&self, transaction_id: u16, err: ResolveError) {
        if let Some((_, request)) = self.outstanding.remove(&transaction_id) {
            request.timeout.abort();
            request.waiter.fail(err);
        }
    }

    fn expire(&self, transaction_id: u16, serial: u64) {
        // serial guards against removing a later registration that reused the id
        if let Some((_, request)) = self
            .outstanding
            .remove_if(&transaction_id, |_, r| r.serial == serial)
        {
            debug!(
                "Query {} timed out after {:?}",
                request.transaction_id,
                request.created_at.elapsed()
            );
            request.waiter.fail(ResolveError::QueryTimeout);
        }
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
