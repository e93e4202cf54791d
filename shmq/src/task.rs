//! Task records and the marker trait gating what may enter the region.

/// Marker trait for types that can be safely placed in the shared region.
///
/// # Safety
/// Types implementing this trait must be `Copy` and have a stable memory
/// layout containing no pointers into a process's private address space.
pub unsafe trait Serial: Copy {}

unsafe impl Serial for u8 {}
unsafe impl Serial for u16 {}
unsafe impl Serial for u32 {}
unsafe impl Serial for u64 {}
unsafe impl Serial for u128 {}
unsafe impl Serial for usize {}
unsafe impl Serial for i8 {}
unsafe impl Serial for i16 {}
unsafe impl Serial for i32 {}
unsafe impl Serial for i64 {}
unsafe impl Serial for i128 {}
unsafe impl Serial for isize {}
unsafe impl Serial for f32 {}
unsafe impl Serial for f64 {}
unsafe impl Serial for bool {}
unsafe impl<T: Copy, const N: usize> Serial for [T; N] {}

/// A store operation. The discriminant selects whether a value rides along.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op<K, V> {
    /// Look up `key`; the completion carries the value on a hit.
    Get { key: K },
    /// Insert or overwrite.
    Set { key: K, value: V },
    /// Insert only if absent; fails when the key is already present.
    Post { key: K, value: V },
    /// Remove `key` if present.
    Delete { key: K },
}

impl<K: Copy, V: Copy> Op<K, V> {
    #[inline]
    pub fn key(&self) -> K {
        match self {
            Op::Get { key } | Op::Delete { key } => *key,
            Op::Set { key, .. } | Op::Post { key, .. } => *key,
        }
    }

    #[inline]
    pub fn value(&self) -> Option<V> {
        match self {
            Op::Set { value, .. } | Op::Post { value, .. } => Some(*value),
            Op::Get { .. } | Op::Delete { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Op::Get { .. } => "get",
            Op::Set { .. } => "set",
            Op::Post { .. } => "post",
            Op::Delete { .. } => "delete",
        }
    }
}

/// A self-contained request record. It crosses address spaces, so the key
/// and value are inline scalars and the record carries no indirection.
///
/// `task_id` is unique only within the submitting client; together with
/// `client_pid` it identifies the request, and `task_id % TABLE_CAPACITY`
/// addresses the completion slot.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Task<K, V> {
    pub op: Op<K, V>,
    pub client_pid: u32,
    pub task_id: u32,
}

unsafe impl<K: Serial, V: Serial> Serial for Op<K, V> {}
unsafe impl<K: Serial, V: Serial> Serial for Task<K, V> {}
