//! Error types for shared-memory telemetry access.
//!
//! All errors implement `std::error::Error` and carry enough structured
//! context to decide between fixing the calling code and retrying later.
//!
//! ## Error Categories
//!
//! - **Usage faults**: operating on a disposed object, calling an operation in
//!   the wrong connection state, or passing an invalid argument. These fail
//!   fast and are never worth retrying.
//! - **Environment faults**: the simulator is not running, the connect
//!   attempt timed out or was cancelled, or a platform call failed. The
//!   caller may retry `open`.
//! - **Layout faults**: the mapped bytes do not describe a valid header or a
//!   declared region falls outside the mapping.
//!
//! A read that races the external writer is *not* an error. Callers that need
//! strict consistency compare tick counts themselves, see
//! [`TelemetryBufferRead`](crate::TelemetryBufferRead).
//!
//! ```rust
//! use simlink::TelemetryError;
//!
//! let error = TelemetryError::connection_failed("simulator not running");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

#[cfg(windows)]
use windows_core as core;

/// Result type alias for telemetry operations.
pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

/// Main error type for telemetry operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TelemetryError {
    #[error("Failed to connect to simulator: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Cannot access a disposed object: {object}")]
    Disposed { object: &'static str },

    #[error("Invalid operation: {reason}")]
    InvalidOperation { reason: String },

    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument { argument: &'static str, reason: String },

    #[error("SDK version mismatch: expected {expected}, found {found}")]
    Version { expected: i32, found: i32 },

    #[error("Memory access out of bounds at offset {offset:#x} (length {len})")]
    Memory { offset: usize, len: usize },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Buffer operation failed: {context}")]
    Buffer { context: String, buffer_index: Option<usize> },

    #[error("File mapping error: {path}")]
    File {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{feature} is only available on {required_platform}")]
    UnsupportedPlatform { feature: String, required_platform: String },

    #[error("Windows API error: {operation}")]
    #[cfg(windows)]
    WindowsApi {
        operation: String,
        #[source]
        source: core::Error,
    },
}

impl TelemetryError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TelemetryError::Connection { .. } => true,
            TelemetryError::Timeout { .. } => true,
            TelemetryError::Cancelled => true,
            TelemetryError::Disposed { .. } => false,
            TelemetryError::InvalidOperation { .. } => false,
            TelemetryError::InvalidArgument { .. } => false,
            TelemetryError::Version { .. } => false,
            TelemetryError::Memory { .. } => false,
            TelemetryError::Parse { .. } => false,
            TelemetryError::Buffer { .. } => true,
            TelemetryError::File { .. } => false,
            TelemetryError::UnsupportedPlatform { .. } => false,
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => true,
        }
    }

    /// Returns whether this error reports a bug in the calling code rather
    /// than a problem with the environment.
    pub fn is_usage_fault(&self) -> bool {
        matches!(
            self,
            TelemetryError::Disposed { .. }
                | TelemetryError::InvalidOperation { .. }
                | TelemetryError::InvalidArgument { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TelemetryError::Connection { .. } => vec![
                "Ensure the simulator is running",
                "Check permissions for shared memory access",
                "Retry opening the connection",
            ],
            TelemetryError::Timeout { .. } => vec![
                "Increase the open timeout",
                "Verify the simulator is loaded into a session",
            ],
            TelemetryError::Cancelled => vec!["Retry the operation if it is still needed"],
            TelemetryError::Disposed { .. } => vec![
                "Do not use handles, readers or connections after disposing them",
                "Create a new connection to continue reading",
            ],
            TelemetryError::InvalidOperation { .. } => vec![
                "Check the connection state before calling this operation",
                "Open the connection before acquiring data handles",
            ],
            TelemetryError::InvalidArgument { .. } => vec![
                "Check argument values against the documented requirements",
                "Size destination buffers from the header's buffer length",
            ],
            TelemetryError::Version { .. } => vec![
                "Update the simulator to the latest version",
                "Configure the expected SDK version in ConnectionOptions",
            ],
            TelemetryError::Memory { .. } => vec![
                "Verify the mapping is large enough for the declared layout",
                "Reconnect to obtain a fresh mapping",
            ],
            TelemetryError::Parse { .. } => vec![
                "Verify the mapped data comes from a compatible producer",
                "Check the data source for corruption",
            ],
            TelemetryError::Buffer { .. } => vec![
                "Wait for the producer to publish telemetry buffers",
                "Retry the read after the next data-ready signal",
            ],
            TelemetryError::File { .. } => vec![
                "Check the file exists and is readable",
                "Check file permissions",
            ],
            TelemetryError::UnsupportedPlatform { .. } => vec![
                "Use platform-appropriate features",
                "Map a recorded memory dump with MappedRegion::open_file",
            ],
            #[cfg(windows)]
            TelemetryError::WindowsApi { .. } => vec![
                "Check Windows API permissions",
                "Verify system resources availability",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        TelemetryError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for connection errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TelemetryError::Connection { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for use-after-dispose faults.
    pub fn disposed(object: &'static str) -> Self {
        TelemetryError::Disposed { object }
    }

    /// Helper constructor for wrong-state faults.
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        TelemetryError::InvalidOperation { reason: reason.into() }
    }

    /// Helper constructor for argument faults.
    pub fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        TelemetryError::InvalidArgument { argument, reason: reason.into() }
    }

    /// Helper constructor for out-of-bounds memory access.
    pub fn memory_access_error(offset: usize, len: usize) -> Self {
        TelemetryError::Memory { offset, len }
    }

    /// Helper constructor for buffer operation errors.
    pub fn buffer_operation_error(context: impl Into<String>, buffer_index: Option<usize>) -> Self {
        TelemetryError::Buffer { context: context.into(), buffer_index }
    }

    /// Helper constructor for file mapping errors with path context.
    pub fn file_error(path: std::path::PathBuf, source: std::io::Error) -> Self {
        TelemetryError::File { path, source }
    }

    /// Helper constructor for Windows API errors.
    #[cfg(windows)]
    pub fn windows_api_error(operation: impl Into<String>, source: core::Error) -> Self {
        TelemetryError::WindowsApi { operation: operation.into(), source }
    }

    /// Helper constructor for unsupported platform errors.
    pub fn unsupported_platform(
        feature: impl Into<String>,
        required_platform: impl Into<String>,
    ) -> Self {
        TelemetryError::UnsupportedPlatform {
            feature: feature.into(),
            required_platform: required_platform.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn error_messages_carry_their_context(
            reason in ".*",
            argument_reason in ".*",
            offset in 0usize..0x10000usize,
            len in 0usize..0x10000usize,
            expected in 1i32..10i32,
            found in 1i32..10i32,
        ) {
            let connection = TelemetryError::connection_failed(reason.clone());
            prop_assert!(connection.to_string().contains(&reason));

            let argument = TelemetryError::invalid_argument("destination", argument_reason.clone());
            let message = argument.to_string();
            prop_assert!(message.contains("destination"));
            prop_assert!(message.contains(&argument_reason));

            let memory = TelemetryError::memory_access_error(offset, len);
            let hex_offset = format!("{:#x}", offset);
            prop_assert!(memory.to_string().contains(&hex_offset));

            let version = TelemetryError::Version { expected, found };
            let message = version.to_string();
            prop_assert!(message.contains(&expected.to_string()));
            prop_assert!(message.contains(&found.to_string()));
        }
    }

    #[test]
    fn usage_faults_are_not_retryable() {
        let faults = [
            TelemetryError::disposed("DataHandle"),
            TelemetryError::invalid_operation("connection is not open"),
            TelemetryError::invalid_argument("span", "too short"),
        ];

        for fault in &faults {
            assert!(fault.is_usage_fault(), "{fault} should be a usage fault");
            assert!(!fault.is_retryable(), "{fault} should not be retryable");
            assert!(!fault.recovery_suggestions().is_empty());
        }
    }

    #[test]
    fn environment_faults_are_retryable() {
        let faults = [
            TelemetryError::connection_failed("simulator not running"),
            TelemetryError::Timeout { duration: Duration::from_secs(1) },
            TelemetryError::Cancelled,
        ];

        for fault in &faults {
            assert!(fault.is_retryable(), "{fault} should be retryable");
            assert!(!fault.is_usage_fault());
        }
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::other("mapping missing");
        let error = TelemetryError::connection_failed_with_source("open failed", Box::new(io));

        let source = std::error::Error::source(&error).expect("source should be attached");
        assert_eq!(source.to_string(), "mapping missing");
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TelemetryError>();
    }
}
