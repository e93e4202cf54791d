//! Shared-memory coordination fabric for the key-value service.
//!
//! One server process creates a fixed-layout region holding a bounded MPMC
//! task ring and a completion table; any number of client processes map the
//! same region and exchange plain-`Copy` records through it. The transport
//! that introduces clients to the region lives elsewhere; once attached,
//! all data flow is memory-resident.

pub mod region;
pub mod ring;
pub mod shm;
pub mod table;
pub mod task;

pub use region::{AttachError, SharedRegion};
pub use ring::{MAX_RETRIES, QUEUE_CAPACITY, TaskRing};
pub use table::{ResponseSlot, ResponseTable, Status, TABLE_CAPACITY};
pub use task::{Op, Serial, Task};
