//! Client handle: attaches the shared region and drives the task protocol.

use shmq::{AttachError, MAX_RETRIES, Op, Serial, SharedRegion, Status, Task};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default budget for a synchronous wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Sleep between completion polls.
const POLL_SLEEP: Duration = Duration::from_micros(100);

/// Why a submission never reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Ring full after the retry budget.
    QueueFull,
    /// The server's region is gone or marked dead.
    Disconnected,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::QueueFull => write!(f, "task ring is full"),
            SubmitError::Disconnected => write!(f, "server disconnected"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Per-process handle to the key-value service.
///
/// Task ids come from a client-local counter; each id addresses the response
/// slot `task_id % TABLE_CAPACITY`, which the client resets before every
/// submission. Keeping fewer than [`shmq::TABLE_CAPACITY`] operations
/// outstanding is this handle's side of the aliasing contract.
///
/// The handle is movable and deliberately not clonable; once dropped (or
/// once the server dies) every operation reports failure.
pub struct KvClient<K: Serial, V: Serial> {
    region: SharedRegion<K, V>,
    client_pid: u32,
    next_task_id: AtomicU32,
}

impl<K: Serial, V: Serial> KvClient<K, V> {
    /// Attaches to the server's region by its well-known name.
    pub fn attach<P: AsRef<Path>>(shm_name: P) -> Result<Self, AttachError> {
        let region = unsafe { SharedRegion::open(shm_name)? };
        Ok(Self {
            region,
            client_pid: std::process::id(),
            next_task_id: AtomicU32::new(1),
        })
    }

    fn alloc_task_id(&self) -> u32 {
        self.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Resets the response slot, then enqueues. Returns the allocated task
    /// id for the caller to await.
    fn submit(&self, op: Op<K, V>) -> Result<u32, SubmitError> {
        if !self.region.server_alive() {
            return Err(SubmitError::Disconnected);
        }

        let task_id = self.alloc_task_id();
        // Reset-before-enqueue closes the stale-completion window left by a
        // timed-out predecessor on the same slot.
        self.region.table().reset(task_id);

        let task = Task {
            op,
            client_pid: self.client_pid,
            task_id,
        };
        if self.region.ring().try_push(task, MAX_RETRIES) {
            Ok(task_id)
        } else {
            Err(SubmitError::QueueFull)
        }
    }

    /// Polls the slot until it leaves pending or the budget expires.
    fn wait(&self, task_id: u32, timeout: Duration) -> Option<Status> {
        let slot = self.region.table().slot(task_id);
        let deadline = Instant::now() + timeout;

        while !slot.is_complete() {
            if Instant::now() >= deadline {
                debug!(task_id, "wait timed out");
                return None;
            }
            thread::sleep(POLL_SLEEP);
        }
        Some(slot.status())
    }

    // === async forms: submit and return the task id ===

    pub fn get_async(&self, key: K) -> Result<u32, SubmitError> {
        self.submit(Op::Get { key })
    }

    pub fn set_async(&self, key: K, value: V) -> Result<u32, SubmitError> {
        self.submit(Op::Set { key, value })
    }

    pub fn post_async(&self, key: K, value: V) -> Result<u32, SubmitError> {
        self.submit(Op::Post { key, value })
    }

    pub fn del_async(&self, key: K) -> Result<u32, SubmitError> {
        self.submit(Op::Delete { key })
    }

    /// Completion status for a previously submitted task, if it has one.
    pub fn try_response(&self, task_id: u32) -> Option<Status> {
        let slot = self.region.table().slot(task_id);
        slot.is_complete().then(|| slot.status())
    }

    // === synchronous forms: submit, then bounded poll ===

    /// Reads `key`. Empty on a miss, a timeout, or a failed submission;
    /// the distinction is visible on the diagnostic log only.
    pub fn get(&self, key: K, timeout: Duration) -> Option<V> {
        let task_id = self.get_async(key).ok()?;
        match self.wait(task_id, timeout)? {
            Status::Success => Some(self.region.table().slot(task_id).value()),
            status => {
                debug!(task_id, ?status, "get completed without value");
                None
            }
        }
    }

    /// Inserts or overwrites `key`. True iff the server confirmed.
    pub fn set(&self, key: K, value: V, timeout: Duration) -> bool {
        self.submit_and_wait(Op::Set { key, value }, timeout)
    }

    /// Inserts `key` only if absent. False when the key already existed.
    pub fn post(&self, key: K, value: V, timeout: Duration) -> bool {
        self.submit_and_wait(Op::Post { key, value }, timeout)
    }

    /// Deletes `key`. False when it was absent.
    pub fn del(&self, key: K, timeout: Duration) -> bool {
        self.submit_and_wait(Op::Delete { key }, timeout)
    }

    fn submit_and_wait(&self, op: Op<K, V>, timeout: Duration) -> bool {
        let Ok(task_id) = self.submit(op) else {
            return false;
        };
        matches!(self.wait(task_id, timeout), Some(Status::Success))
    }

    // === diagnostics ===

    /// True while the server's mapping is alive.
    pub fn is_connected(&self) -> bool {
        self.region.server_alive()
    }

    /// Approximate number of tasks waiting in the ring.
    pub fn queue_len(&self) -> usize {
        self.region.ring().len()
    }

    pub fn queue_is_full(&self) -> bool {
        self.region.ring().is_full()
    }

    pub fn client_pid(&self) -> u32 {
        self.client_pid
    }
}
