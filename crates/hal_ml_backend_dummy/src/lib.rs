//! A backend library with the exported module record and a working `invoke`.
//!
//! `invoke` reads a `u32` from `input` and writes it back incremented to `output`.

use std::{
    os::raw::{c_char, c_int, c_void},
    sync::atomic::{AtomicUsize, Ordering},
};

pub type InitFn = unsafe extern "C" fn(backend_private: *mut *mut c_void) -> c_int;
pub type DeinitFn = unsafe extern "C" fn(backend_private: *mut c_void) -> c_int;
pub type InvokeFn = unsafe extern "C" fn(
    backend_private: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int;
/// Slot this backend leaves empty.
pub type Unused = Option<unsafe extern "C" fn()>;

#[repr(C)]
pub struct BackendFuncs {
    pub init: Option<InitFn>,
    pub deinit: Option<DeinitFn>,
    pub configure_instance: Unused,
    pub invoke: Option<InvokeFn>,
    pub invoke_dynamic: Unused,
    pub get_framework_info: Unused,
    pub get_model_info: Unused,
    pub event_handler: Unused,
}

pub type ModuleFn = unsafe extern "C" fn(funcs: *mut BackendFuncs) -> c_int;

#[repr(C)]
pub struct HalBackendData {
    pub name: *const c_char,
    pub vendor: *const c_char,
    pub init: Option<ModuleFn>,
    pub exit: Option<ModuleFn>,
}

// SAFETY: the record only points at static strings and functions.
unsafe impl Sync for HalBackendData {}

#[allow(non_upper_case_globals)]
#[unsafe(no_mangle)]
pub static hal_backend_ml_data: HalBackendData = HalBackendData {
    name: c"dummy".as_ptr(),
    vendor: c"hal-ml".as_ptr(),
    init: Some(module_init),
    exit: Some(module_exit),
};

/// Tables filled by the module.
#[unsafe(no_mangle)]
pub static HAL_ML_DUMMY_MODULE_INITS: AtomicUsize = AtomicUsize::new(0);
/// Tables handed back to the module.
#[unsafe(no_mangle)]
pub static HAL_ML_DUMMY_MODULE_EXITS: AtomicUsize = AtomicUsize::new(0);

/// Handed out as the private state of every instance.
static INSTANCE: u8 = 0;

unsafe extern "C" fn module_init(funcs: *mut BackendFuncs) -> c_int {
    let Some(funcs) = (unsafe { funcs.as_mut() }) else {
        return -1;
    };
    funcs.init = Some(init);
    funcs.deinit = Some(deinit);
    funcs.invoke = Some(invoke);
    HAL_ML_DUMMY_MODULE_INITS.fetch_add(1, Ordering::SeqCst);
    0
}

unsafe extern "C" fn module_exit(funcs: *mut BackendFuncs) -> c_int {
    if funcs.is_null() {
        return -1;
    }
    HAL_ML_DUMMY_MODULE_EXITS.fetch_add(1, Ordering::SeqCst);
    0
}

unsafe extern "C" fn init(backend_private: *mut *mut c_void) -> c_int {
    if backend_private.is_null() {
        return -1;
    }
    unsafe { *backend_private = (&raw const INSTANCE).cast_mut().cast() };
    0
}

unsafe extern "C" fn deinit(backend_private: *mut c_void) -> c_int {
    if backend_private.cast_const() == (&raw const INSTANCE).cast() {
        0
    } else {
        -1
    }
}

unsafe extern "C" fn invoke(
    backend_private: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int {
    if backend_private.is_null() || input.is_null() || output.is_null() {
        return -1;
    }
    unsafe {
        let value = input.cast::<u32>().read_unaligned();
        output.cast::<u32>().write_unaligned(value.wrapping_add(1));
    }
    0
}
