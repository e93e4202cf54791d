//! Named shared-memory objects backed by `/dev/shm`.

use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::ffi::CString;
use std::io;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr::NonNull;

/// A mapped shared-memory object.
///
/// Exactly one participant creates the object (and owns the name: it is
/// zero-filled up front and unlinked when that mapping drops); everyone
/// else opens it. Both paths otherwise share one setup routine, driven by
/// the `owner` role.
pub struct SharedMemory {
    ptr: NonNull<u8>,
    len: usize,
    fd: OwnedFd,
    name: CString,
    owner: bool,
}

unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Creates a fresh object of `size` bytes, zero-filled.
    ///
    /// Creation is exclusive: if the name is already taken the call fails,
    /// which is how a second server on the same host is refused.
    ///
    /// # Safety
    /// The caller must ensure `size` matches the layout it will construct
    /// in the region.
    pub unsafe fn create<P: AsRef<Path>>(name: P, size: usize) -> io::Result<Self> {
        unsafe { Self::build(name.as_ref(), size, true) }
    }

    /// Maps an existing object read-write.
    ///
    /// # Safety
    /// The caller must ensure the object exists with at least `size` bytes
    /// and the layout it expects.
    pub unsafe fn open<P: AsRef<Path>>(name: P, size: usize) -> io::Result<Self> {
        unsafe { Self::build(name.as_ref(), size, false) }
    }

    unsafe fn build(name: &Path, len: usize, owner: bool) -> io::Result<Self> {
        let len_nz = NonZeroUsize::new(len)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"))?;

        // POSIX wants the object name rooted with a single slash.
        let raw = name.to_str().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "name contains invalid UTF-8")
        })?;
        let name = CString::new(format!("/{}", raw.trim_start_matches('/')))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))?;

        let (oflag, mode) = if owner {
            (
                OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                Mode::S_IRUSR | Mode::S_IWUSR,
            )
        } else {
            (OFlag::O_RDWR, Mode::empty())
        };
        let fd = shm_open(name.as_c_str(), oflag, mode).map_err(errno)?;

        // From here on the name exists (or existed already); a creator that
        // fails to finish must take it back down.
        let mapped: io::Result<NonNull<u8>> = (|| {
            if owner {
                ftruncate(&fd, len as i64).map_err(errno)?;
            }
            let ptr = unsafe {
                mmap(
                    None,
                    len_nz,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    &fd,
                    0,
                )
            }
            .map_err(errno)?;
            Ok(ptr.cast())
        })();

        let ptr = match mapped {
            Ok(ptr) => ptr,
            Err(e) => {
                if owner {
                    let _ = shm_unlink(name.as_c_str());
                }
                return Err(e);
            }
        };

        if owner {
            // ftruncate already yields zero pages; making the empty state
            // explicit keeps re-created names indistinguishable.
            unsafe { std::ptr::write_bytes(ptr.as_ptr(), 0, len) };
        }

        Ok(Self {
            ptr,
            len,
            fd,
            name,
            owner,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.len
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Descriptor of the mapped object, for handing to collaborators that
    /// identify the region by handle rather than by name.
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr.cast(), self.len);
        }
        if self.owner {
            let _ = shm_unlink(self.name.as_c_str());
        }
        // The descriptor closes with the OwnedFd.
    }
}

fn errno(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
