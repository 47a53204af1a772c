//! `hal-ml` loads interchangeable accelerator backends and dispatches calls into them.
//!
//! ## Key Components
//! 1. **Backend Contract**:
//!    - A `#[repr(C)]` function table (`BackendFuncs`) every backend library fills in.
//!    - Backend state stays opaque and is only handed back to the backend that produced it.
//!
//! 2. **Discovery**:
//!    - `BackendRegistry` enumerates backend libraries once per registry through a `Loader`.
//!    - `DlLoader` finds and opens shared libraries on disk with `libloading`.
//!
//! 3. **Handles**:
//!    - `HalMl` binds one function table and one backend state; created by name, torn down on
//!      `destroy` or drop.
//!    - Typed methods call each backend operation directly.
//!
//! 4. **Named Requests**:
//!    - `ParamSet` carries borrowed, named arguments.
//!    - `Dispatcher` routes a request name to its operation, extracting arguments first.
//!
//! The `capi` feature exports the same surface as `hal_ml_*` C functions.
//!
//! ```no_run
//! use hal_ml::{HalMl, ParamSet, ParamValue};
//!
//! # fn main() -> Result<(), hal_ml::HalError> {
//! let hal = HalMl::create("vivante")?;
//!
//! let input = [0u8; 16];
//! let mut output = [0u8; 16];
//! let mut params = ParamSet::new();
//! params.set("input", ParamValue::new(&input));
//! params.set("output", ParamValue::new_mut(&mut output));
//! hal.request("invoke", &params)?;
//!
//! hal.destroy()
//! # }
//! ```

pub mod backend;
#[cfg(feature = "capi")]
pub mod capi;
pub mod dispatch;
pub mod error;
pub mod hal;
pub mod loader;
pub mod param;
pub mod registry;

#[cfg(test)]
mod testing;

pub use backend::{BackendFuncs, BackendPrivate, HalBackendData};
pub use dispatch::Dispatcher;
pub use error::{ErrorCode, HalError};
pub use hal::HalMl;
pub use loader::{DlLoader, HalModule, Loader, LoaderConfig, LoaderError};
pub use param::{ParamSet, ParamValue};
pub use registry::{BackendDescriptor, BackendRegistry};
