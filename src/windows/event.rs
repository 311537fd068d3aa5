//! The producer's named data-ready event.

use std::time::Duration;

use tracing::trace;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::System::Threading::{
    OpenEventW, SYNCHRONIZATION_ACCESS_RIGHTS, WaitForSingleObject,
};
use windows::core::PCWSTR;

use super::wide_string;
use crate::connection::{DataReadyEvent, WaitResult};
use crate::{Result, TelemetryError};

/// `SYNCHRONIZE` access right.
const SYNCHRONIZE: SYNCHRONIZATION_ACCESS_RIGHTS = SYNCHRONIZATION_ACCESS_RIGHTS(0x0010_0000);

/// Handle to the auto-reset event signalled after each buffer write.
pub struct NamedEvent {
    event: HANDLE,
}

impl NamedEvent {
    /// Opens the named event with `SYNCHRONIZE` access.
    pub fn open(name: &str) -> Result<Self> {
        let wide_name = wide_string(name);
        let event = unsafe { OpenEventW(SYNCHRONIZE, false, PCWSTR::from_raw(wide_name.as_ptr())) }
            .map_err(|e| TelemetryError::windows_api_error("OpenEventW", e))?;
        Ok(Self { event })
    }
}

impl DataReadyEvent for NamedEvent {
    fn wait(&mut self, timeout: Duration) -> Result<WaitResult> {
        let ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        let result = unsafe { WaitForSingleObject(self.event, ms) };

        match result {
            WAIT_OBJECT_0 => Ok(WaitResult::Signaled),
            WAIT_TIMEOUT => {
                trace!(timeout_ms = ms, "Data-ready wait timed out");
                Ok(WaitResult::Timeout)
            }
            _ => {
                let win_err = windows::core::Error::from_thread();
                Err(TelemetryError::windows_api_error("WaitForSingleObject", win_err))
            }
        }
    }
}

impl Drop for NamedEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

// SAFETY: event handles are kernel objects usable from any thread.
unsafe impl Send for NamedEvent {}
