//! Error handling and C-ABI error codes for addrcache

use std::cell::RefCell;
use std::ffi::CStr;
use thiserror::Error;

/// Errors returned by the trie and the reject cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The node pool cannot hold the nodes an insert needs.
    #[error("node pool capacity exceeded")]
    CapacityExceeded,

    #[error("node pool capacity must be non-zero")]
    ZeroCapacity,

    /// Bit length past the tree width, or a family the tree does not hold.
    #[error("invalid prefix")]
    InvalidPrefix,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    CapacityExceeded = 1,
    ZeroCapacity = 2,
    InvalidPrefix = 3,
    InvalidHandle = 4,
    Utf8Error = 5,
    InvalidConfig = 6,
    NotFound = 7,
    Unknown = 255,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self.as_cstr().to_str() {
            Ok(s) => s,
            Err(_) => "Unknown error",
        }
    }

    /// NUL-terminated message, safe to hand across the C ABI.
    pub fn as_cstr(self) -> &'static CStr {
        match self {
            ErrorCode::Success => c"Success",
            ErrorCode::CapacityExceeded => c"Capacity exceeded",
            ErrorCode::ZeroCapacity => c"Zero capacity",
            ErrorCode::InvalidPrefix => c"Invalid prefix",
            ErrorCode::InvalidHandle => c"Invalid handle",
            ErrorCode::Utf8Error => c"UTF-8 conversion error",
            ErrorCode::InvalidConfig => c"Invalid configuration",
            ErrorCode::NotFound => c"Not found",
            ErrorCode::Unknown => c"Unknown error",
        }
    }
}

impl From<&Error> for ErrorCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::CapacityExceeded => ErrorCode::CapacityExceeded,
            Error::ZeroCapacity => ErrorCode::ZeroCapacity,
            Error::InvalidPrefix => ErrorCode::InvalidPrefix,
            Error::InvalidConfig(_) => ErrorCode::InvalidConfig,
        }
    }
}

// Thread-local last error for C-ABI
thread_local! {
    static LAST_ERROR: RefCell<ErrorCode> = const { RefCell::new(ErrorCode::Success) };
}

pub fn set_last_error(code: ErrorCode) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = code);
}

pub fn get_last_error() -> ErrorCode {
    LAST_ERROR.with(|cell| *cell.borrow())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_from_errors() {
        assert_eq!(ErrorCode::from(&Error::CapacityExceeded), ErrorCode::CapacityExceeded);
        assert_eq!(
            ErrorCode::from(&Error::InvalidConfig("x".into())),
            ErrorCode::InvalidConfig
        );
        assert_eq!(ErrorCode::InvalidPrefix.as_str(), "Invalid prefix");
    }

    #[test]
    fn last_error_is_per_thread() {
        set_last_error(ErrorCode::NotFound);
        assert_eq!(get_last_error(), ErrorCode::NotFound);
        std::thread::spawn(|| assert_eq!(get_last_error(), ErrorCode::Success))
            .join()
            .unwrap();
        set_last_error(ErrorCode::Success);
    }
}
