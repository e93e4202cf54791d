//! Completion table: a fixed array of status/value slots keyed by task id.
//!
//! Slots are not owned by any task. A client resets its slot to pending
//! before enqueueing, the serving worker writes the value and then publishes
//! the terminal status with release ordering, and the client's acquire read
//! of the status makes the value visible. Two in-flight tasks whose ids
//! collide modulo the capacity share a slot; keeping fewer than
//! [`TABLE_CAPACITY`] tasks outstanding is the submitter's responsibility.

use crate::task::Serial;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};

pub const TABLE_CAPACITY: usize = 1024;

/// Completion state of a response slot.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending = 0,
    Success = 1,
    NotFound = 2,
    Failed = 3,
}

impl Status {
    fn from_raw(raw: u32) -> Status {
        match raw {
            1 => Status::Success,
            2 => Status::NotFound,
            3 => Status::Failed,
            _ => Status::Pending,
        }
    }
}

/// One completion cell.
#[repr(C, align(64))]
pub struct ResponseSlot<V> {
    status: AtomicU32,
    value: UnsafeCell<MaybeUninit<V>>,
}

unsafe impl<V: Send> Send for ResponseSlot<V> {}
unsafe impl<V: Send> Sync for ResponseSlot<V> {}

impl<V: Serial> ResponseSlot<V> {
    /// Publishes pending, making the slot ready for a fresh submission.
    pub fn reset(&self) {
        self.status.store(Status::Pending as u32, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.status.load(Ordering::Acquire) != Status::Pending as u32
    }

    pub fn status(&self) -> Status {
        Status::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Publishes a completion. The value write happens-before the status
    /// store, so an observer of the status also observes the value.
    pub fn publish(&self, status: Status, value: Option<V>) {
        debug_assert!(status != Status::Pending);
        if let Some(v) = value {
            unsafe { (*self.value.get()).write(v) };
        }
        self.status.store(status as u32, Ordering::Release);
    }

    /// Reads the value payload. Meaningful only after observing a
    /// value-carrying terminal status for a task addressed to this slot.
    pub fn value(&self) -> V {
        debug_assert!(self.is_complete());
        unsafe { (*self.value.get()).assume_init_read() }
    }
}

/// Fixed-size completion table addressed by `task_id % TABLE_CAPACITY`.
#[repr(C)]
pub struct ResponseTable<V> {
    slots: [ResponseSlot<V>; TABLE_CAPACITY],
}

unsafe impl<V: Send> Send for ResponseTable<V> {}
unsafe impl<V: Send> Sync for ResponseTable<V> {}

impl<V: Serial> ResponseTable<V> {
    /// In-place initialization: every slot pending, payloads untouched.
    ///
    /// # Safety
    /// `table` must point at writable memory large and aligned enough for
    /// `Self`, not yet observed by any other thread or process.
    pub unsafe fn init_at(table: *mut Self) {
        unsafe {
            for i in 0..TABLE_CAPACITY {
                (&raw mut (*table).slots[i].status)
                    .write(AtomicU32::new(Status::Pending as u32));
            }
        }
    }

    /// Heap-allocated table with every slot pending, for in-process use.
    pub fn new_boxed() -> Box<Self> {
        let mut table = Box::<Self>::new_uninit();
        unsafe {
            Self::init_at(table.as_mut_ptr());
            table.assume_init()
        }
    }

    pub fn slot(&self, task_id: u32) -> &ResponseSlot<V> {
        &self.slots[task_id as usize % TABLE_CAPACITY]
    }

    /// Resets the slot a task id maps to.
    pub fn reset(&self, task_id: u32) {
        self.slot(task_id).reset();
    }

    pub const fn capacity() -> usize {
        TABLE_CAPACITY
    }
}
