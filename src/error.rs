use std::os::raw::c_int;

use derive_more::Display;
use thiserror::Error;

use crate::loader::LoaderError;

/// Integer statuses returned across the C surface.
#[repr(i32)]
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None = 0,
    InvalidParameter = -1,
    NotSupported = -2,
    Unknown = -3,
    OutOfMemory = -4,
    PermissionDenied = -5,
    IoError = -6,
    RuntimeError = -7,
}

impl From<ErrorCode> for c_int {
    fn from(value: ErrorCode) -> Self {
        value as c_int
    }
}

#[derive(Debug, Error)]
pub enum HalError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),
    #[error("backend returned status {0}")]
    Backend(c_int),
    #[error("unknown error")]
    Unknown,
}

impl HalError {
    #[inline]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter(reason.into())
    }

    #[inline]
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime(reason.into())
    }

    /// The C status for this error. Backend statuses pass through unchanged.
    pub fn code(&self) -> c_int {
        let code = match self {
            HalError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            HalError::NotSupported(_) => ErrorCode::NotSupported,
            HalError::OutOfMemory => ErrorCode::OutOfMemory,
            HalError::Runtime(_) | HalError::Loader(_) => ErrorCode::RuntimeError,
            HalError::Backend(code) => return *code,
            HalError::Unknown => ErrorCode::Unknown,
        };
        code.into()
    }
}

/// Converts a status returned by a backend operation. Zero is success.
#[inline]
pub fn check_status(code: c_int) -> Result<(), HalError> {
    match code {
        0 => Ok(()),
        code => Err(HalError::Backend(code)),
    }
}

/// Folds a result back into a C status.
#[inline]
pub fn into_status(result: Result<(), HalError>) -> c_int {
    match result {
        Ok(()) => ErrorCode::None.into(),
        Err(err) => err.code(),
    }
}
