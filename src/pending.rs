use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ResolveError;

pub type Outcome<T> = Result<T, ResolveError>;

/// Single-assignment result slot shared between a lookup and everyone waiting on it.
///
/// Clones share the same slot. The first `succeed`/`fail` wins; later attempts
/// are ignored and report `false`. Waiters that subscribe after settlement see
/// the stored outcome immediately.
pub struct PendingResult<T> {
    slot: Arc<watch::Sender<Option<Outcome<T>>>>,
}

impl<T> Clone for PendingResult<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PendingResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingResult").field(&*self.slot.borrow()).finish()
    }
}

impl<T> PendingResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_state(None)
    }

    /// Already-settled result (used for seeded cache entries)
    pub fn succeeded(value: T) -> Self {
        Self::with_state(Some(Ok(value)))
    }

    pub fn failed(err: ResolveError) -> Self {
        Self::with_state(Some(Err(err)))
    }

    fn with_state(state: Option<Outcome<T>>) -> Self {
        let (tx, _rx) = watch::channel(state);
        Self { slot: Arc::new(tx) }
    }

    pub fn succeed(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    pub fn fail(&self, err: ResolveError) -> bool {
        self.settle(Err(err))
    }

    /// Store `outcome` unless already settled. Returns whether this call won.
    pub fn settle(&self, outcome: Outcome<T>) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    pub fn peek(&self) -> Option<Outcome<T>> {
        self.slot.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Wait for settlement and return a copy of the outcome.
    pub async fn wait(&self) -> Outcome<T> {
        let mut rx = self.slot.subscribe();
        let settled = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        settled.unwrap_or(Err(ResolveError::Abandoned))
    }

    /// Run `f` with the outcome once settled; immediately if it already is.
    pub fn on_settle<F>(&self, f: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        if let Some(outcome) = self.peek() {
            f(outcome);
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            f(this.wait().await);
        });
    }

    /// Settle `sink` with whatever this result settles with.
    pub fn forward_to(&self, sink: PendingResult<T>) {
        self.on_settle(move |outcome| {
            sink.settle(outcome);
        });
    }

    /// Fail with `Timeout` unless settled within `after`.
    /// The timer task ends as soon as the result settles.
    pub fn arm_timeout(&self, after: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            if tokio::time::timeout(after, this.wait()).await.is_err() && this.fail(ResolveError::Timeout) {
                debug!("Pending result timed out after {:?}", after);
            }
        });
    }

    /// Whether both handles share one slot
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T> Default for PendingResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
