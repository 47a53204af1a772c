//! The `hal_ml_*` C functions.
//!
//! Handles are opaque pointers. Every function returns a status from [`ErrorCode`], or the
//! status a backend operation returned.

use std::{
    ffi::CStr,
    os::raw::{c_char, c_int, c_void},
};

use crate::{
    error::{ErrorCode, HalError, into_status},
    hal::HalMl,
    param::{ParamSet, ParamValue},
    registry::BackendRegistry,
};

/// Opaque handle to a [`HalMl`].
pub type HalMlHandle = *mut c_void;
/// Opaque handle to a [`ParamSet`].
pub type HalMlParamHandle = *mut c_void;

type CParamSet = ParamSet<'static>;

#[inline]
fn invalid() -> c_int {
    ErrorCode::InvalidParameter.into()
}

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn to_str<'a>(ptr: *const c_char) -> Result<&'a str, HalError> {
    if ptr.is_null() {
        return Err(HalError::invalid("null string"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| HalError::invalid("string is not valid UTF-8"))
}

/// # Safety
/// `param` must be null or point to writable storage for a handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_param_create(param: *mut HalMlParamHandle) -> c_int {
    if param.is_null() {
        return invalid();
    }
    let set = Box::new(CParamSet::new());
    unsafe { *param = Box::into_raw(set).cast() };
    ErrorCode::None.into()
}

/// Frees the container and its keys. Values are left to the caller.
///
/// # Safety
/// `param` must be null or a handle from [`hal_ml_param_create`] not yet destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_param_destroy(param: HalMlParamHandle) -> c_int {
    if param.is_null() {
        return invalid();
    }
    drop(unsafe { Box::from_raw(param.cast::<CParamSet>()) });
    ErrorCode::None.into()
}

/// # Safety
/// `param` must be null or a live container handle; `key` must be null or a valid string;
/// `value` must stay valid until the last request using it returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_param_set(
    param: HalMlParamHandle,
    key: *const c_char,
    value: *mut c_void,
) -> c_int {
    if param.is_null() {
        return invalid();
    }
    let key = match unsafe { to_str(key) } {
        Ok(key) => key,
        Err(err) => return err.code(),
    };
    let Some(value) = (unsafe { ParamValue::from_raw(value) }) else {
        return invalid();
    };
    let set = unsafe { &mut *param.cast::<CParamSet>() };
    set.set(key, value);
    ErrorCode::None.into()
}

/// Opens the backend matching `backend_name` in `registry`.
///
/// # Safety
/// Same as [`hal_ml_create`].
unsafe fn create_in(
    registry: &BackendRegistry,
    backend_name: *const c_char,
    handle: *mut HalMlHandle,
) -> c_int {
    if handle.is_null() {
        log::error!("got invalid handle");
        return invalid();
    }
    let name = match unsafe { to_str(backend_name) } {
        Ok(name) => name,
        Err(err) => {
            log::error!("got invalid backend name");
            return err.code();
        }
    };
    match HalMl::create_with(registry, name) {
        Ok(hal) => {
            unsafe { *handle = Box::into_raw(Box::new(hal)).cast() };
            ErrorCode::None.into()
        }
        Err(err) => err.code(),
    }
}

/// # Safety
/// `backend_name` must be null or a valid string; `handle` must be null or point to writable
/// storage for a handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_create(
    backend_name: *const c_char,
    handle: *mut HalMlHandle,
) -> c_int {
    unsafe { create_in(BackendRegistry::global(), backend_name, handle) }
}

/// # Safety
/// `handle` must be null or a handle from [`hal_ml_create`] not yet destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_destroy(handle: HalMlHandle) -> c_int {
    if handle.is_null() {
        log::error!("got invalid handle");
        return invalid();
    }
    let hal = unsafe { Box::from_raw(handle.cast::<HalMl>()) };
    into_status(hal.destroy())
}

/// # Safety
/// `handle` and `param` must be null or live handles; `request_name` must be null or a valid
/// string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_request(
    handle: HalMlHandle,
    request_name: *const c_char,
    param: HalMlParamHandle,
) -> c_int {
    if handle.is_null() || param.is_null() {
        log::error!("got invalid parameter");
        return invalid();
    }
    let name = match unsafe { to_str(request_name) } {
        Ok(name) => name,
        Err(err) => return err.code(),
    };
    let hal = unsafe { &*handle.cast::<HalMl>() };
    let set = unsafe { &*param.cast::<CParamSet>() };
    into_status(hal.request(name, set))
}

/// Calls the backend's `invoke` without going through a parameter container.
///
/// # Safety
/// `handle` must be null or a live handle; `input` and `output` must be valid for the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_request_invoke(
    handle: HalMlHandle,
    input: *const c_void,
    output: *mut c_void,
) -> c_int {
    if handle.is_null() {
        log::error!("got invalid handle");
        return invalid();
    }
    let (Some(input), Some(output)) = (unsafe {
        (
            ParamValue::from_raw(input.cast_mut()),
            ParamValue::from_raw(output),
        )
    }) else {
        return invalid();
    };
    let hal = unsafe { &*handle.cast::<HalMl>() };
    into_status(hal.invoke(input, output))
}

/// Calls the backend's `invoke_dynamic` without going through a parameter container.
///
/// # Safety
/// Same as [`hal_ml_request_invoke`]; `prop` must also be valid for the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hal_ml_request_invoke_dynamic(
    handle: HalMlHandle,
    prop: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int {
    if handle.is_null() {
        log::error!("got invalid handle");
        return invalid();
    }
    let (Some(prop), Some(input), Some(output)) = (unsafe {
        (
            ParamValue::from_raw(prop),
            ParamValue::from_raw(input.cast_mut()),
            ParamValue::from_raw(output),
        )
    }) else {
        return invalid();
    };
    let hal = unsafe { &*handle.cast::<HalMl>() };
    into_status(hal.invoke_dynamic(prop, input, output))
}
