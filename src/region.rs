//! The flat backing region shared by both endpoints.
//!
//! Layout, in order: `head` (one atomic index), `tail` (one atomic
//! index), `chain[0..slots]` (one atomic index per slot), padding up to
//! [`MSG_ALIGN`], then `slots` payload cells of `msg_stride()` bytes
//! each. There is no version field and no magic: endpoints must be
//! built with the same slot count and message size.
//!
//! The region is deliberately dumb. It owns the bytes, hands out
//! `&AtomicU32` views of the indices and raw payload pointers, and
//! leaves every protocol decision to the endpoints.

use crate::config::{Config, MIN_SLOTS, MSG_ALIGN};
use crate::index::{Index, INDEX_END};
use crate::invariants::debug_assert_slot;
use crate::queue::QueueError;
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

#[cfg(all(unix, feature = "shm"))]
use std::ffi::CString;

#[derive(Debug)]
enum Backing {
    /// Process-private heap allocation.
    Heap(Layout),
    /// Memory-mapped POSIX shared-memory object.
    #[cfg(all(unix, feature = "shm"))]
    Posix { len: usize },
}

/// Owner of one backing region.
///
/// Endpoints reference the region through an `Arc`, so the bytes live
/// until the queue handle and both endpoints are gone.
#[derive(Debug)]
pub struct SharedRegion {
    base: NonNull<u8>,
    config: Config,
    backing: Backing,
}

// SAFETY: all cross-thread mutation of the region goes through the
// atomic index words; payload cells are only touched by the endpoint
// that owns them under the tail/chain protocol.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocates and initializes a region on the process heap.
    pub fn allocate(config: Config) -> Result<Self, QueueError> {
        let layout = Self::layout_for(&config)?;

        // SAFETY: `layout` has non-zero size (the header alone is at
        // least 16 bytes once `slots >= 3` is checked).
        let ptr = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(ptr).ok_or(QueueError::AllocationFailed)?;

        let region = Self {
            base,
            config,
            backing: Backing::Heap(layout),
        };
        region.init_indices();
        Ok(region)
    }

    /// Creates a fresh POSIX shared-memory object under `name` (which
    /// should start with `/`), sizes it, maps it and initializes the
    /// index header. Fails if the name already exists.
    #[cfg(all(unix, feature = "shm"))]
    pub fn create_named(name: &str, config: Config) -> Result<Self, QueueError> {
        Self::map_named(name, config, true)
    }

    /// Maps an existing shared-memory object without touching its
    /// contents. The object must have been created and initialized by
    /// [`SharedRegion::create_named`] with the same configuration.
    #[cfg(all(unix, feature = "shm"))]
    pub fn open_named(name: &str, config: Config) -> Result<Self, QueueError> {
        Self::map_named(name, config, false)
    }

    /// Removes a shared-memory name. Existing mappings stay valid.
    #[cfg(all(unix, feature = "shm"))]
    pub fn unlink_named(name: &str) -> Result<(), QueueError> {
        let cname = shm_name(name)?;
        // SAFETY: `cname` is a valid NUL-terminated string.
        if unsafe { libc::shm_unlink(cname.as_ptr()) } != 0 {
            return Err(shm_error("shm_unlink"));
        }
        Ok(())
    }

    #[cfg(all(unix, feature = "shm"))]
    fn map_named(name: &str, config: Config, create: bool) -> Result<Self, QueueError> {
        // Validate before creating anything OS-visible.
        let layout = Self::layout_for(&config)?;
        let len = layout.size();
        let cname = shm_name(name)?;

        let oflag = if create {
            libc::O_RDWR | libc::O_CREAT | libc::O_EXCL
        } else {
            libc::O_RDWR
        };

        // SAFETY: `cname` is a valid NUL-terminated string; the mode is
        // only consulted when creating.
        let fd = unsafe { libc::shm_open(cname.as_ptr(), oflag, 0o600 as libc::c_uint) };
        if fd < 0 {
            return Err(shm_error("shm_open"));
        }

        if create {
            // SAFETY: `fd` is a freshly opened shm object.
            if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
                let err = shm_error("ftruncate");
                // SAFETY: `fd` is open; unlinking the name we just
                // created keeps the namespace clean.
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(cname.as_ptr());
                }
                return Err(err);
            }
        } else {
            // SAFETY: `st` is a plain-data buffer for fstat to fill.
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            // SAFETY: `fd` is open and `st` points to a valid stat buffer.
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                let err = shm_error("fstat");
                // SAFETY: `fd` is open.
                unsafe { libc::close(fd) };
                return Err(err);
            }
            if (st.st_size as u64) < len as u64 {
                // SAFETY: `fd` is open.
                unsafe { libc::close(fd) };
                return Err(QueueError::RegionTooSmall {
                    need: len,
                    got: st.st_size as usize,
                });
            }
        }

        // SAFETY: `fd` is an open, correctly sized shm object; mapping
        // `len` bytes shared and read-write is exactly what both
        // endpoints need. The mapping outlives the fd.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        // SAFETY: `fd` is open; the mapping keeps the object alive.
        unsafe { libc::close(fd) };
        if ptr == libc::MAP_FAILED {
            return Err(shm_error("mmap"));
        }

        let base = NonNull::new(ptr.cast::<u8>()).ok_or(QueueError::AllocationFailed)?;
        let region = Self {
            base,
            config,
            backing: Backing::Posix { len },
        };
        if create {
            region.init_indices();
        }
        Ok(region)
    }

    fn layout_for(config: &Config) -> Result<Layout, QueueError> {
        if config.slots < MIN_SLOTS {
            return Err(QueueError::CapacityTooSmall { got: config.slots });
        }
        Layout::from_size_align(config.region_size(), MSG_ALIGN)
            .map_err(|_| QueueError::AllocationFailed)
    }

    /// Writes the index header: `head` and `tail` start at `INDEX_END`
    /// (nothing published) and the chain starts as the circular free
    /// list `chain[i] = (i + 1) % slots`.
    fn init_indices(&self) {
        let slots = self.config.slots;
        // SAFETY: the allocation covers `(2 + slots)` index words and
        // nobody else can observe the region before construction
        // returns. Raw writes initialize the memory before any
        // `&AtomicU32` is formed over it.
        unsafe {
            let indices = self.base.as_ptr().cast::<AtomicU32>();
            indices.write(AtomicU32::new(INDEX_END));
            indices.add(1).write(AtomicU32::new(INDEX_END));
            for i in 0..slots {
                indices
                    .add(2 + i as usize)
                    .write(AtomicU32::new((i + 1) % slots));
            }
        }
    }

    /// The configuration this region was built with.
    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    /// Number of payload slots.
    #[inline]
    pub fn slots(&self) -> u32 {
        self.config.slots
    }

    #[inline]
    fn index_word(&self, i: usize) -> &AtomicU32 {
        // SAFETY: callers stay within `2 + slots` words; the words were
        // initialized in `init_indices` (or by the creating process for
        // an attached mapping) and live as long as `self`.
        unsafe { &*self.base.as_ptr().cast::<AtomicU32>().add(i) }
    }

    /// The most recently published slot, `INDEX_END` before the first
    /// publish. Written only by the producer.
    #[inline]
    pub(crate) fn head(&self) -> &AtomicU32 {
        self.index_word(0)
    }

    /// The reader boundary plus the CONSUMED flag. Written by both
    /// endpoints.
    #[inline]
    pub(crate) fn tail(&self) -> &AtomicU32 {
        self.index_word(1)
    }

    /// Next-slot link for `slot`. Written only by the producer.
    #[inline]
    pub(crate) fn chain(&self, slot: Index) -> &AtomicU32 {
        debug_assert_slot!(slot, self.config.slots);
        self.index_word(2 + slot as usize)
    }

    /// Raw pointer to the payload cell of `slot`.
    #[inline]
    pub(crate) fn msg_ptr(&self, slot: Index) -> *mut u8 {
        debug_assert_slot!(slot, self.config.slots);
        // SAFETY: the offset stays inside the allocation for any
        // in-bounds slot.
        unsafe {
            self.base
                .as_ptr()
                .add(self.config.header_size() + slot as usize * self.config.msg_stride())
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap(layout) => {
                // SAFETY: `base` came from `alloc::alloc` with this layout.
                unsafe { alloc::dealloc(self.base.as_ptr(), layout) }
            }
            #[cfg(all(unix, feature = "shm"))]
            Backing::Posix { len } => {
                // SAFETY: `base` came from `mmap` with this length.
                unsafe {
                    libc::munmap(self.base.as_ptr().cast(), len);
                }
            }
        }
    }
}

#[cfg(all(unix, feature = "shm"))]
fn shm_name(name: &str) -> Result<CString, QueueError> {
    CString::new(name).map_err(|_| QueueError::Shm {
        call: "shm_open",
        errno: libc::EINVAL,
    })
}

#[cfg(all(unix, feature = "shm"))]
fn shm_error(call: &'static str) -> QueueError {
    QueueError::Shm {
        call,
        errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
    }
}
