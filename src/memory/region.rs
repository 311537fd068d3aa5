//! Mapped shared-memory regions.
//!
//! A [`MappedRegion`] is the leaf of the memory stack: it owns whatever keeps
//! the bytes mapped (an OS view, a file mapping, or a heap allocation) and
//! unmaps them exactly once when dropped. Everything above it only ever sees a
//! read-only byte view.

use std::fmt;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::{Result, TelemetryError};

/// Something that keeps a contiguous run of bytes mapped.
///
/// # Safety
///
/// Implementors must guarantee that `as_ptr()` stays valid for reads of
/// `len()` bytes, and does not move, for as long as the value is alive.
pub unsafe trait RegionBacking: Send + Sync {
    /// Start of the mapped bytes.
    fn as_ptr(&self) -> *const u8;

    /// Number of readable bytes.
    fn len(&self) -> usize;

    /// True when nothing is mapped.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owned mapping of a producer's shared-memory object.
pub struct MappedRegion {
    name: String,
    backing: Box<dyn RegionBacking>,
}

impl MappedRegion {
    /// Wraps an already-mapped backing under a display name.
    pub fn new(name: impl Into<String>, backing: impl RegionBacking + 'static) -> Self {
        let name = name.into();
        debug!(region = %name, len = backing.len(), "Mapped shared memory region");
        Self { name, backing: Box::new(backing) }
    }

    /// Maps a file read-only, for example a dump of the producer's memory.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))?;

        // SAFETY: the map is read-only; concurrent modification of the file by
        // another process is the same weak-consistency window as the live
        // mapping and is covered by the tick-count protocol.
        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .map_err(|e| TelemetryError::file_error(path.to_path_buf(), e))?;

        Ok(Self::new(path.display().to_string(), FileBacking(mmap)))
    }

    /// Display name of the mapping.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of mapped bytes.
    pub fn len(&self) -> usize {
        self.backing.len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.backing.is_empty()
    }

    /// The mapped bytes, valid while the region is owned.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the backing keeps the bytes mapped for as long as `self`.
        unsafe { self.view().as_slice() }
    }

    pub(crate) fn view(&self) -> RegionView {
        RegionView::new(self.backing.as_ptr(), self.backing.len())
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion").field("name", &self.name).field("len", &self.len()).finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        debug!(region = %self.name, "Unmapping shared memory region");
    }
}

/// Raw pointer and length of a region, copied out so leases can build slices
/// without touching the owner's lock.
///
/// A view is only dereferenced while a lifetime handle on the owning
/// [`ConnectionDataFile`](super::ConnectionDataFile) is held.
#[derive(Clone, Copy)]
pub(crate) struct RegionView {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the view is a read-only address range; validity is enforced by the
// lifetime-handle protocol, not by thread affinity.
unsafe impl Send for RegionView {}
// SAFETY: see above, the bytes are never written through a view.
unsafe impl Sync for RegionView {}

impl RegionView {
    fn new(ptr: *const u8, len: usize) -> Self {
        match NonNull::new(ptr as *mut u8) {
            Some(ptr) => Self { ptr, len },
            None => Self { ptr: NonNull::dangling(), len: 0 },
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Builds a slice over the viewed bytes.
    ///
    /// # Safety
    ///
    /// The caller must hold a lifetime handle that keeps the mapping alive for
    /// at least `'a`.
    pub(crate) unsafe fn as_slice<'a>(&self) -> &'a [u8] {
        // SAFETY: ptr is valid for len bytes while the caller's lifetime
        // handle is held; a zero length uses a dangling, aligned pointer.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

struct FileBacking(memmap2::Mmap);

// SAFETY: memmap2 keeps the mapping at a fixed address until it is dropped.
unsafe impl RegionBacking for FileBacking {
    fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Heap allocation standing in for a shared-memory object inside one process.
///
/// The allocation is 8-byte aligned so header references can be taken
/// directly, as they can over a page-aligned OS mapping. Writes through
/// [`HeapRegion::write`] race readers exactly the way the external producer's
/// writes do.
pub struct HeapRegion {
    ptr: NonNull<u64>,
    words: usize,
    len: usize,
}

// SAFETY: the allocation is owned for the lifetime of the value; writes are
// the producer-side race the tick-count protocol already tolerates.
unsafe impl Send for HeapRegion {}
// SAFETY: see above.
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocates `len` zeroed bytes.
    pub fn zeroed(len: usize) -> Self {
        let words = len.div_ceil(8).max(1);
        let storage: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        let ptr = NonNull::from(Box::leak(storage)).cast::<u64>();
        Self { ptr, words, len }
    }

    /// Number of bytes in the region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length region.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies `bytes` into the region at `offset`.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.len)
            .ok_or_else(|| TelemetryError::memory_access_error(offset, bytes.len()))?;
        trace!(offset, end, "Writing heap region");

        // SAFETY: bounds checked above; the destination lives as long as self.
        unsafe {
            let dst = (self.ptr.as_ptr() as *mut u8).add(offset);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        Ok(())
    }

    /// Fills `len` bytes at `offset` with `value`.
    pub fn fill(&self, offset: usize, len: usize, value: u8) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(TelemetryError::memory_access_error(offset, len));
        }

        // SAFETY: bounds checked above.
        unsafe {
            let dst = (self.ptr.as_ptr() as *mut u8).add(offset);
            std::ptr::write_bytes(dst, value, len);
        }
        Ok(())
    }

    /// Copies the current contents out.
    pub fn snapshot(&self) -> Vec<u8> {
        // SAFETY: len bytes are allocated and initialised.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }.to_vec()
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/words came from the leaked boxed slice in `zeroed`.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.words)));
        }
    }
}

// SAFETY: the allocation is fixed until the last Arc is dropped.
unsafe impl RegionBacking for Arc<HeapRegion> {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr() as *const u8
    }

    fn len(&self) -> usize {
        self.len
    }
}
