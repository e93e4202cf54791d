//! Cross-process key-value service over the shmq fabric.
//!
//! The server process creates the shared region, runs a pool of worker
//! threads draining the task ring against a striped in-process map, and
//! hands region handles to clients over a Unix-socket rendezvous. Client
//! processes attach the region by name and drive the submit/await protocol
//! through [`KvClient`].

pub mod client;
pub mod lifecycle;
pub mod rendezvous;
pub mod server;

pub use client::{DEFAULT_TIMEOUT, KvClient, SubmitError};
pub use lifecycle::Lifecycle;
pub use server::KvServer;
