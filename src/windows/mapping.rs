//! Read-only view of a named file mapping.

use std::ptr::NonNull;

use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, ERROR_FILE_NOT_FOUND, HANDLE};
use windows::Win32::System::Memory::{
    FILE_MAP_READ, MEMORY_BASIC_INFORMATION, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile,
    OpenFileMappingW, UnmapViewOfFile, VirtualQuery,
};
use windows::core::PCWSTR;

use super::wide_string;
use crate::memory::RegionBacking;
use crate::{Result, TelemetryError};

/// A mapped view of the producer's shared-memory object.
///
/// Unmaps the view and closes the mapping handle on drop.
pub struct NamedMapping {
    mapping: HANDLE,
    base: NonNull<u8>,
    len: usize,
}

impl NamedMapping {
    /// Opens and maps `name`. Returns `Ok(None)` when no such object exists,
    /// which is how a producer that is not running shows up.
    pub fn open(name: &str) -> Result<Option<Self>> {
        trace!(name, "Opening named file mapping");
        let wide_name = wide_string(name);

        let mapping = match unsafe {
            OpenFileMappingW(FILE_MAP_READ.0, false, PCWSTR::from_raw(wide_name.as_ptr()))
        } {
            Ok(mapping) => mapping,
            Err(e) if e.code() == ERROR_FILE_NOT_FOUND.to_hresult() => {
                trace!(name, "Named file mapping does not exist");
                return Ok(None);
            }
            Err(e) => return Err(TelemetryError::windows_api_error("OpenFileMappingW", e)),
        };

        let view = unsafe { MapViewOfFile(mapping, FILE_MAP_READ, 0, 0, 0) };
        let Some(base) = NonNull::new(view.Value as *mut u8) else {
            let win_err = windows::core::Error::from_thread();
            unsafe {
                let _ = CloseHandle(mapping);
            }
            return Err(TelemetryError::windows_api_error("MapViewOfFile", win_err));
        };

        let mut info = MEMORY_BASIC_INFORMATION::default();
        let written = unsafe {
            VirtualQuery(
                Some(base.as_ptr() as *const _),
                &mut info,
                std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
            )
        };
        let mapped = Self { mapping, base, len: info.RegionSize };
        if written == 0 {
            let win_err = windows::core::Error::from_thread();
            return Err(TelemetryError::windows_api_error("VirtualQuery", win_err));
        }

        debug!(name, len = mapped.len, "Mapped named shared memory");
        Ok(Some(mapped))
    }
}

impl Drop for NamedMapping {
    fn drop(&mut self) {
        unsafe {
            let addr = MEMORY_MAPPED_VIEW_ADDRESS { Value: self.base.as_ptr() as *mut _ };
            let _ = UnmapViewOfFile(addr);
            let _ = CloseHandle(self.mapping);
        }
    }
}

// SAFETY: the view stays at `base` for `len` bytes until drop, and is only
// ever read.
unsafe impl RegionBacking for NamedMapping {
    fn as_ptr(&self) -> *const u8 {
        self.base.as_ptr()
    }

    fn len(&self) -> usize {
        self.len
    }
}

// SAFETY: a mapping handle and a read-only view address can be used from any
// thread.
unsafe impl Send for NamedMapping {}
unsafe impl Sync for NamedMapping {}
