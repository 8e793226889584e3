use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::pending::PendingResult;

type Job = Box<dyn FnOnce() + Send>;

struct AdmissionState {
    waiting: usize,
    pending: VecDeque<Job>,
}

/// Bounds how many distinct-name lookups are on the wire at once.
///
/// Lookups over the limit are parked as closures and replayed FIFO,
/// one per freed slot, from a task spawned by `drain`.
pub struct AdmissionController {
    max_waiting: usize,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(max_waiting: usize) -> Self {
        Self {
            max_waiting,
            state: Mutex::new(AdmissionState {
                waiting: 0,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Take a slot if one is free. Denial leaves the state untouched.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.waiting >= self.max_waiting {
            return false;
        }
        state.waiting += 1;
        true
    }

    /// Give back a slot taken by `try_acquire`
    pub fn release(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.waiting > 0, "release without a matching acquire");
        state.waiting = state.waiting.saturating_sub(1);
    }

    /// Park `work` until a slot frees up; its result is forwarded into `sink`.
    pub fn enqueue<T, W>(&self, work: W, sink: PendingResult<T>)
    where
        T: Clone + Send + Sync + 'static,
        W: FnOnce() -> PendingResult<T> + Send + 'static,
    {
        let job: Job = Box::new(move || work().forward_to(sink));
        let mut state = self.state.lock();
        state.pending.push_back(job);
        debug!("{} pending requests now", state.pending.len());
    }

    /// Replay parked work on the next scheduler turn, never inline.
    pub fn drain(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_pending();
        });
    }

    fn run_pending(&self) {
        loop {
            let job = {
                let mut state = self.state.lock();
                if state.waiting >= self.max_waiting {
                    break;
                }
                match state.pending.pop_front() {
                    Some(job) => job,
                    None => break,
                }
            };
            // lock released: the job re-enters resolve() and may acquire or enqueue again
            job();
        }
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiting
    }

    pub fn queued(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn max_waiting(&self) -> usize {
        self.max_waiting
    }
}
