//! Windows shared-memory objects.
//!
//! The producer publishes a file mapping and an auto-reset event under fixed
//! names in the session namespace. These types open both read-only; the
//! rest of the crate only sees them through
//! [`RegionBacking`](crate::memory::RegionBacking) and
//! [`DataReadyEvent`](crate::connection::DataReadyEvent).

mod event;
mod mapping;

pub use event::NamedEvent;
pub use mapping::NamedMapping;

/// Convert string to null-terminated wide string for Windows APIs
fn wide_string(s: &str) -> Vec<u16> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_strings_are_nul_terminated() {
        let wide = wide_string("Local\\IRSDKMemMapFileName");
        assert_eq!(wide.len(), 26);
        assert_eq!(wide.last(), Some(&0));
    }

    #[test]
    fn missing_mapping_is_not_an_error() {
        let mapping = NamedMapping::open("Local\\SimlinkDoesNotExist").expect("open");
        assert!(mapping.is_none());
    }

    #[test]
    #[ignore = "iracing_required"]
    fn maps_live_producer() {
        let mapping = NamedMapping::open(crate::connection::DEFAULT_MEMORY_MAP_NAME)
            .expect("open")
            .expect("simulator running");
        let len = crate::memory::RegionBacking::len(&mapping);
        assert!(len >= crate::schema::DATA_FILE_HEADER_SIZE);
    }
}
