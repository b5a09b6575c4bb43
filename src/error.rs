//! Error types for the FINS/TCP transport.

use std::io;
use thiserror::Error;

/// Result type alias for FINS transport operations.
pub type Result<T> = std::result::Result<T, FinsError>;

/// Numeric result codes reported alongside errors.
///
/// [`FinsSystem`](crate::FinsSystem) keeps the code of the last connect
/// attempt, so callers that only poll a status word can still tell a guard
/// rejection from a bad address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ErrorCode {
    /// Operation succeeded.
    #[default]
    Success = 0,
    /// The connection guard is cooling down; retry after the window elapses.
    TryLater = 1,
    /// The target address is empty or starts with a NUL byte.
    NoReadAddress = 2,
    /// A buffer read or write exceeded the written extent.
    BufferOverrun = 3,
    /// Socket level failure.
    IoError = 4,
    /// Operation attempted on a closed session.
    SessionClosed = 5,
    /// A parameter was rejected.
    InvalidParameter = 6,
    /// A frame could not be decoded.
    InvalidFrame = 7,
}

impl ErrorCode {
    /// Returns the raw numeric value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Returns whether the code denotes success.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Errors that can occur in the FINS/TCP transport.
#[derive(Debug, Error)]
pub enum FinsError {
    /// The connection guard rejected the attempt because the device is cooling down.
    #[error("Connection guard active, try later")]
    TryLater,

    /// The target address is empty or garbled.
    #[error("No read address: target address is empty or starts with NUL")]
    NoReadAddress,

    /// A buffer access exceeded the written extent.
    #[error("Buffer overrun: {requested} bytes at position {position}, {available} available")]
    BufferOverrun {
        /// Position the access started at.
        position: usize,
        /// Number of bytes requested.
        requested: usize,
        /// Number of bytes that were actually available.
        available: usize,
    },

    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation attempted on a closed session.
    #[error("Session is closed")]
    SessionClosed,

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// A frame could not be decoded from the byte stream.
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the framing error.
        reason: String,
    },
}

impl FinsError {
    /// Creates a new `BufferOverrun` error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::FinsError;
    ///
    /// let err = FinsError::buffer_overrun(4, 8, 2);
    /// assert!(err.to_string().contains("8 bytes at position 4"));
    /// ```
    pub fn buffer_overrun(position: usize, requested: usize, available: usize) -> Self {
        Self::BufferOverrun {
            position,
            requested,
            available,
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::FinsError;
    ///
    /// let err = FinsError::invalid_parameter("queue_capacity", "must be greater than 0");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidFrame` error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::FinsError;
    ///
    /// let err = FinsError::invalid_frame("length field below minimum");
    /// ```
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Returns the numeric code matching this error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_tcp::{ErrorCode, FinsError};
    ///
    /// assert_eq!(FinsError::TryLater.code(), ErrorCode::TryLater);
    /// ```
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TryLater => ErrorCode::TryLater,
            Self::NoReadAddress => ErrorCode::NoReadAddress,
            Self::BufferOverrun { .. } => ErrorCode::BufferOverrun,
            Self::Io(_) => ErrorCode::IoError,
            Self::SessionClosed => ErrorCode::SessionClosed,
            Self::InvalidParameter { .. } => ErrorCode::InvalidParameter,
            Self::InvalidFrame { .. } => ErrorCode::InvalidFrame,
        }
    }

    /// Returns whether the caller may retry the same operation unchanged later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TryLater | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_later_display() {
        assert_eq!(
            FinsError::TryLater.to_string(),
            "Connection guard active, try later"
        );
    }

    #[test]
    fn test_buffer_overrun_display() {
        let err = FinsError::buffer_overrun(10, 4, 1);
        assert_eq!(
            err.to_string(),
            "Buffer overrun: 4 bytes at position 10, 1 available"
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(FinsError::NoReadAddress.code(), ErrorCode::NoReadAddress);
        assert_eq!(FinsError::SessionClosed.code(), ErrorCode::SessionClosed);
        assert_eq!(
            FinsError::from(io::Error::from(io::ErrorKind::BrokenPipe)).code(),
            ErrorCode::IoError
        );
        assert_eq!(FinsError::invalid_frame("x").code(), ErrorCode::InvalidFrame);
        assert_eq!(ErrorCode::default(), ErrorCode::Success);
        assert_eq!(ErrorCode::TryLater.as_i32(), 1);
    }

    #[test]
    fn test_retryable() {
        assert!(FinsError::TryLater.is_retryable());
        assert!(!FinsError::NoReadAddress.is_retryable());
        assert!(!FinsError::SessionClosed.is_retryable());
    }
}
