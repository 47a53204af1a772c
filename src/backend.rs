//! The function-table contract a backend library satisfies.
//!
//! Every operation returns `0` on success and a negative status on failure, and takes the
//! backend's private state as its first argument.

use std::{
    ffi::CStr,
    os::raw::{c_char, c_int, c_void},
};

pub type InitFn = unsafe extern "C" fn(backend_private: *mut *mut c_void) -> c_int;
pub type DeinitFn = unsafe extern "C" fn(backend_private: *mut c_void) -> c_int;
pub type ConfigureInstanceFn =
    unsafe extern "C" fn(backend_private: *mut c_void, prop: *const c_void) -> c_int;
pub type InvokeFn = unsafe extern "C" fn(
    backend_private: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int;
pub type InvokeDynamicFn = unsafe extern "C" fn(
    backend_private: *mut c_void,
    prop: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int;
pub type GetFrameworkInfoFn =
    unsafe extern "C" fn(backend_private: *mut c_void, framework_info: *mut c_void) -> c_int;
pub type GetModelInfoFn = unsafe extern "C" fn(
    backend_private: *mut c_void,
    ops: c_int,
    in_info: *mut c_void,
    out_info: *mut c_void,
) -> c_int;
pub type EventHandlerFn =
    unsafe extern "C" fn(backend_private: *mut c_void, ops: c_int, data: *mut c_void) -> c_int;

/// Function table filled in by a backend. Empty slots are `None`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct BackendFuncs {
    pub init: Option<InitFn>,
    pub deinit: Option<DeinitFn>,
    pub configure_instance: Option<ConfigureInstanceFn>,
    pub invoke: Option<InvokeFn>,
    pub invoke_dynamic: Option<InvokeDynamicFn>,
    pub get_framework_info: Option<GetFrameworkInfoFn>,
    pub get_model_info: Option<GetModelInfoFn>,
    pub event_handler: Option<EventHandlerFn>,
}

pub type ModuleInitFn = unsafe extern "C" fn(funcs: *mut BackendFuncs) -> c_int;
pub type ModuleExitFn = unsafe extern "C" fn(funcs: *mut BackendFuncs) -> c_int;

/// Name of the module record a backend library exports.
pub const BACKEND_DATA_SYMBOL: &[u8] = b"hal_backend_ml_data\0";

/// Module record exported by a backend library under [`BACKEND_DATA_SYMBOL`].
///
/// `init` fills a zeroed [`BackendFuncs`]; `exit` is called with the same table before it is freed.
#[repr(C)]
#[derive(Debug)]
pub struct HalBackendData {
    pub name: *const c_char,
    pub vendor: *const c_char,
    pub init: Option<ModuleInitFn>,
    pub exit: Option<ModuleExitFn>,
}

impl HalBackendData {
    /// # Safety
    /// `name` must be null or a valid NUL-terminated string.
    pub unsafe fn name(&self) -> Option<&str> {
        if self.name.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(self.name) }.to_str().ok()
    }

    /// # Safety
    /// `vendor` must be null or a valid NUL-terminated string.
    pub unsafe fn vendor(&self) -> Option<&str> {
        if self.vendor.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(self.vendor) }.to_str().ok()
    }
}

/// State a backend hands out from `init`. Only ever passed back to the same backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendPrivate(*mut c_void);

impl BackendPrivate {
    #[inline]
    pub(crate) fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut *mut c_void {
        &mut self.0
    }

    #[inline]
    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}
