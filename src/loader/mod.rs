use std::os::raw::c_int;

use derive_more::Display;
use thiserror::Error;

use crate::backend::BackendFuncs;

pub use dl::{DlLoader, LoaderConfig};

pub mod dl;

/// Capacity of a backend library name buffer, including the terminating NUL.
pub const MAX_LIB_NAME_LENGTH: usize = 256;

/// Module category a backend is registered under.
#[derive(Debug, Display, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalModule {
    #[default]
    #[display("ml")]
    Ml,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to get backend count: {0}")]
    Count(c_int),
    #[error("failed to list backend names of module {0}")]
    Names(HalModule),
    #[error("backend library {0} not found")]
    NotFound(String),
    #[error("failed to open backend library {0}: {1}")]
    Open(String, #[source] libloading::Error),
    #[error("backend library {0} exports no module data")]
    Symbol(String),
    #[error("backend library {0} failed module init with status {1}")]
    Init(String, c_int),
    #[error("backend library {0} failed module exit with status {1}")]
    Exit(String, c_int),
    #[error("backend library {0} is not loaded")]
    NotLoaded(String),
    #[error("failed to scan {0}: {1}")]
    Io(String, #[source] std::io::Error),
}

/// The dynamic-loading facility backends are obtained from.
pub trait Loader: Send + Sync {
    /// Number of backends registered for `module`.
    fn backend_count(&self, module: HalModule) -> Result<usize, LoaderError>;

    /// Library names of the first `count` backends, each fitting a buffer of `max_len` bytes.
    fn backend_names(
        &self,
        module: HalModule,
        count: usize,
        max_len: usize,
    ) -> Result<Vec<String>, LoaderError>;

    /// Acquires a filled function table from the backend library named `library`.
    fn acquire(&self, module: HalModule, library: &str) -> Result<Box<BackendFuncs>, LoaderError>;

    /// Gives a table obtained from [`Loader::acquire`] back to its library.
    fn release(
        &self,
        module: HalModule,
        funcs: Box<BackendFuncs>,
        library: &str,
    ) -> Result<(), LoaderError>;
}

/// Cuts `name` so that it fits a NUL-terminated buffer of `max_len` bytes.
pub fn truncate_name(mut name: String, max_len: usize) -> String {
    let limit = max_len.saturating_sub(1);
    if name.len() > limit {
        let mut end = limit;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}
