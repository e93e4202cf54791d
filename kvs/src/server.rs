//! Worker pool: drains the task ring, executes against the striped map,
//! publishes completions into the response table.

use shmq::{Op, Serial, SharedRegion, Status};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stripemap::StripedMap;
use tracing::{debug, info, trace};

/// Retry budget for each `try_pop` attempt inside the worker loop.
const POP_RETRIES: u32 = 100;

/// Idle sleep between empty polls.
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// The server half: worker threads coupling ring, map and table.
///
/// `stop` does not drain the ring: tasks still enqueued when the pool shuts
/// down never complete, and their clients observe timeouts.
pub struct KvServer<K, V>
where
    K: Serial + Eq + Hash + Send + Sync + Debug + 'static,
    V: Serial + Send + Sync + Debug + 'static,
{
    region: Arc<SharedRegion<K, V>>,
    storage: Arc<StripedMap<K, V>>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl<K, V> KvServer<K, V>
where
    K: Serial + Eq + Hash + Send + Sync + Debug + 'static,
    V: Serial + Send + Sync + Debug + 'static,
{
    /// Server over `region` with one map stripe per hardware thread.
    pub fn new(region: Arc<SharedRegion<K, V>>) -> Self {
        Self::with_storage(region, StripedMap::new())
    }

    /// Server with an explicit stripe count.
    pub fn with_stripes(region: Arc<SharedRegion<K, V>>, stripes: usize) -> Self {
        Self::with_storage(region, StripedMap::with_stripes(stripes))
    }

    fn with_storage(region: Arc<SharedRegion<K, V>>, storage: StripedMap<K, V>) -> Self {
        Self {
            region,
            storage: Arc::new(storage),
            running: Arc::new(AtomicBool::new(false)),
            workers: Vec::new(),
        }
    }

    /// Spawns `n` worker threads. Returns `false` (and spawns nothing) if
    /// the pool is already running.
    pub fn start(&mut self, n: usize) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("worker pool already running");
            return false;
        }

        info!(workers = n, stripes = self.storage.stripe_count(), "starting worker pool");
        self.workers.reserve(n);
        for i in 0..n {
            let region = Arc::clone(&self.region);
            let storage = Arc::clone(&self.storage);
            let running = Arc::clone(&self.running);
            self.workers.push(
                thread::Builder::new()
                    .name(format!("kvs-worker-{i}"))
                    .spawn(move || worker_loop(&region, &storage, &running))
                    .expect("spawn worker thread"),
            );
        }
        true
    }

    /// Signals the workers and joins them. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("stopping worker pool");
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Entries currently in the authoritative store. Locks every stripe.
    pub fn storage_len(&self) -> usize {
        self.storage.len()
    }

    pub fn region(&self) -> &Arc<SharedRegion<K, V>> {
        &self.region
    }
}

impl<K, V> Drop for KvServer<K, V>
where
    K: Serial + Eq + Hash + Send + Sync + Debug + 'static,
    V: Serial + Send + Sync + Debug + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<K, V>(
    region: &SharedRegion<K, V>,
    storage: &StripedMap<K, V>,
    running: &AtomicBool,
) where
    K: Serial + Eq + Hash + Debug,
    V: Serial + Debug,
{
    debug!("worker started");
    let ring = region.ring();
    let table = region.table();

    while running.load(Ordering::Acquire) {
        match ring.try_pop(POP_RETRIES) {
            Some(task) => {
                trace!(
                    cmd = task.op.name(),
                    key = ?task.op.key(),
                    client_pid = task.client_pid,
                    task_id = task.task_id,
                    "dispatch"
                );
                let slot = table.slot(task.task_id);
                // Publish is the last touch: the client may reuse the task
                // record and the slot immediately after the status lands.
                match task.op {
                    Op::Get { key } => match storage.lookup(&key) {
                        Some(value) => slot.publish(Status::Success, Some(value)),
                        None => slot.publish(Status::NotFound, None),
                    },
                    Op::Set { key, value } => {
                        storage.upsert(key, value);
                        slot.publish(Status::Success, None);
                    }
                    Op::Post { key, value } => {
                        if storage.insert(key, value) {
                            slot.publish(Status::Success, None);
                        } else {
                            slot.publish(Status::Failed, None);
                        }
                    }
                    Op::Delete { key } => {
                        if storage.erase(&key) {
                            slot.publish(Status::Success, None);
                        } else {
                            slot.publish(Status::NotFound, None);
                        }
                    }
                }
            }
            None => thread::sleep(IDLE_SLEEP),
        }
    }
    debug!("worker stopped");
}
