use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bounds the number of in-flight upstream fusion calls.
///
/// Non-blocking: when all slots are taken, `try_acquire` fails immediately
/// and the caller answers "busy". There is no queue. Each held slot is a
/// lease with a TTL so that a slot leaked by a crashed task frees itself
/// within one window.
#[derive(Clone)]
pub struct CapacityLimiter {
    inner: Arc<Mutex<LimiterState>>,
    max_jobs: usize,
    ttl: Duration,
}

struct LimiterState {
    next_lease: u64,
    leases: Vec<(u64, Instant)>,
}

/// RAII handle for one capacity slot. Dropping it releases the slot, which
/// makes release run exactly once on every exit path, panics included.
pub struct CapacityPermit {
    inner: Arc<Mutex<LimiterState>>,
    lease: u64,
}

impl CapacityLimiter {
    pub fn new(max_jobs: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterState {
                next_lease: 0,
                leases: Vec::new(),
            })),
            max_jobs,
            ttl,
        }
    }

    /// Try to claim a slot. Returns `None` immediately when saturated.
    pub fn try_acquire(&self) -> Option<CapacityPermit> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let ttl = self.ttl;
        state.leases.retain(|(_, taken)| now.duration_since(*taken) < ttl);

        if state.leases.len() >= self.max_jobs {
            return None;
        }

        let lease = state.next_lease;
        state.next_lease += 1;
        state.leases.push((lease, now));

        Some(CapacityPermit {
            inner: Arc::clone(&self.inner),
            lease,
        })
    }

    /// Number of currently held (unexpired) slots.
    pub fn active(&self) -> usize {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let ttl = self.ttl;
        state.leases.retain(|(_, taken)| now.duration_since(*taken) < ttl);
        state.leases.len()
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs
    }
}

impl Drop for CapacityPermit {
    fn drop(&mut self) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        state.leases.retain(|(lease, _)| *lease != self.lease);
    }
}
