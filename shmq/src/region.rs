//! The fixed-offset shared region image.
//!
//! Layout, all offsets fixed at compile time by `K` and `V`:
//!
//! ```text
//! offset 0:   RegionHeader (64 B): magic, layout version, geometry,
//!             server-alive flag, attached-client counter
//! offset 64:  TaskRing<Task<K, V>> (counters cache-line padded, slot array)
//! then:       ResponseTable<V> (64-byte aligned slot array)
//! ```
//!
//! The server constructs the region exactly once; clients map it read-write
//! and validate the header before touching anything else. All multi-byte
//! fields are native-endian; the region never leaves the host.

use crate::ring::{QUEUE_CAPACITY, TaskRing};
use crate::shm::SharedMemory;
use crate::table::{ResponseTable, TABLE_CAPACITY};
use crate::task::{Serial, Task};
use std::io;
use std::os::fd::RawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

const MAGIC: u64 = 0x4B56_5348_4D52_4731; // "KVSHMRG1"
const LAYOUT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;
const CACHE_LINE: usize = 64;

#[repr(C)]
struct RegionHeader {
    magic: u64,
    layout_version: u32,
    key_size: u32,
    value_size: u32,
    key_align: u32,
    value_align: u32,
    queue_capacity: u32,
    table_capacity: u32,
    server_alive: AtomicBool,
    _pad: [u8; 3],
    attached: AtomicU32,
    _reserved: [u8; 20],
}

const _: () = assert!(std::mem::size_of::<RegionHeader>() == HEADER_SIZE);

fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

fn ring_offset() -> usize {
    HEADER_SIZE
}

fn table_offset<K: Serial, V: Serial>() -> usize {
    align_up(
        ring_offset() + std::mem::size_of::<TaskRing<Task<K, V>>>(),
        CACHE_LINE,
    )
}

fn region_size<K: Serial, V: Serial>() -> usize {
    table_offset::<K, V>() + std::mem::size_of::<ResponseTable<V>>()
}

/// Why attaching to (or creating) a region failed.
#[derive(Debug)]
pub enum AttachError {
    /// The region exists but was built for different parameter types,
    /// capacities, or a different fabric revision.
    LayoutMismatch,
    /// The region exists but its server has already shut down.
    ServerNotAlive,
    Io(io::Error),
}

impl std::fmt::Display for AttachError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachError::LayoutMismatch => write!(f, "region layout mismatch"),
            AttachError::ServerNotAlive => write!(f, "server not alive"),
            AttachError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for AttachError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttachError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for AttachError {
    fn from(e: io::Error) -> Self {
        AttachError::Io(e)
    }
}

/// A mapped view of the shared region, typed by the key and value parameters
/// it was built for.
///
/// The server constructs one with [`SharedRegion::create`] and holds it for
/// the process lifetime; dropping it marks the server dead and unlinks the
/// name. Clients attach with [`SharedRegion::open`].
pub struct SharedRegion<K: Serial, V: Serial> {
    shm: SharedMemory,
    header: NonNull<RegionHeader>,
    ring: NonNull<TaskRing<Task<K, V>>>,
    table: NonNull<ResponseTable<V>>,
}

unsafe impl<K: Serial + Send, V: Serial + Send> Send for SharedRegion<K, V> {}
unsafe impl<K: Serial + Send, V: Serial + Send> Sync for SharedRegion<K, V> {}

impl<K: Serial, V: Serial> SharedRegion<K, V> {
    /// Creates, sizes, zeroes and in-place constructs the region.
    ///
    /// Creation is exclusive: a second server on the same name fails here.
    ///
    /// # Safety
    /// The caller must ensure no other live mapping uses this name.
    pub unsafe fn create<P: AsRef<Path>>(name: P) -> Result<Self, AttachError> {
        let shm = unsafe { SharedMemory::create(name, region_size::<K, V>())? };
        let base = shm.as_ptr();

        let header = base as *mut RegionHeader;
        let ring = unsafe { base.add(ring_offset()) } as *mut TaskRing<Task<K, V>>;
        let table = unsafe { base.add(table_offset::<K, V>()) } as *mut ResponseTable<V>;

        unsafe {
            std::ptr::write(
                header,
                RegionHeader {
                    magic: MAGIC,
                    layout_version: LAYOUT_VERSION,
                    key_size: std::mem::size_of::<K>() as u32,
                    value_size: std::mem::size_of::<V>() as u32,
                    key_align: std::mem::align_of::<K>() as u32,
                    value_align: std::mem::align_of::<V>() as u32,
                    queue_capacity: QUEUE_CAPACITY as u32,
                    table_capacity: TABLE_CAPACITY as u32,
                    server_alive: AtomicBool::new(true),
                    _pad: [0; 3],
                    attached: AtomicU32::new(0),
                    _reserved: [0; 20],
                },
            );
            TaskRing::init_at(ring);
            ResponseTable::init_at(table);
        }

        Ok(Self {
            shm,
            header: unsafe { NonNull::new_unchecked(header) },
            ring: unsafe { NonNull::new_unchecked(ring) },
            table: unsafe { NonNull::new_unchecked(table) },
        })
    }

    /// Maps an existing region and validates its header.
    ///
    /// # Safety
    /// The caller must ensure the name refers to a region created by
    /// [`SharedRegion::create`] (any process, same build parameters).
    pub unsafe fn open<P: AsRef<Path>>(name: P) -> Result<Self, AttachError> {
        let shm = unsafe { SharedMemory::open(name, region_size::<K, V>())? };
        let base = shm.as_ptr();
        let header = base as *mut RegionHeader;

        unsafe {
            if (*header).magic != MAGIC || (*header).layout_version != LAYOUT_VERSION {
                return Err(AttachError::LayoutMismatch);
            }
            if (*header).key_size != std::mem::size_of::<K>() as u32
                || (*header).value_size != std::mem::size_of::<V>() as u32
                || (*header).key_align != std::mem::align_of::<K>() as u32
                || (*header).value_align != std::mem::align_of::<V>() as u32
                || (*header).queue_capacity != QUEUE_CAPACITY as u32
                || (*header).table_capacity != TABLE_CAPACITY as u32
            {
                return Err(AttachError::LayoutMismatch);
            }
            if !(*header).server_alive.load(Ordering::Acquire) {
                return Err(AttachError::ServerNotAlive);
            }
            (*header).attached.fetch_add(1, Ordering::AcqRel);
        }

        let ring = unsafe { base.add(ring_offset()) } as *mut TaskRing<Task<K, V>>;
        let table = unsafe { base.add(table_offset::<K, V>()) } as *mut ResponseTable<V>;

        Ok(Self {
            shm,
            header: unsafe { NonNull::new_unchecked(header) },
            ring: unsafe { NonNull::new_unchecked(ring) },
            table: unsafe { NonNull::new_unchecked(table) },
        })
    }

    pub fn ring(&self) -> &TaskRing<Task<K, V>> {
        unsafe { self.ring.as_ref() }
    }

    pub fn table(&self) -> &ResponseTable<V> {
        unsafe { self.table.as_ref() }
    }

    /// False once the creating server has dropped its mapping.
    pub fn server_alive(&self) -> bool {
        unsafe { self.header.as_ref().server_alive.load(Ordering::Acquire) }
    }

    /// Number of client mappings currently attached.
    pub fn attached_clients(&self) -> u32 {
        unsafe { self.header.as_ref().attached.load(Ordering::Acquire) }
    }

    pub fn is_owner(&self) -> bool {
        self.shm.is_owner()
    }

    /// Descriptor of the backing object, handed out by the rendezvous
    /// channel as an opaque region handle.
    pub fn raw_fd(&self) -> RawFd {
        self.shm.raw_fd()
    }

    pub fn size(&self) -> usize {
        self.shm.size()
    }
}

impl<K: Serial, V: Serial> Drop for SharedRegion<K, V> {
    fn drop(&mut self) {
        unsafe {
            if self.shm.is_owner() {
                self.header
                    .as_ref()
                    .server_alive
                    .store(false, Ordering::Release);
            } else {
                self.header.as_ref().attached.fetch_sub(1, Ordering::AcqRel);
            }
        }
        // SharedMemory::drop unmaps, and unlinks when we are the owner.
    }
}
