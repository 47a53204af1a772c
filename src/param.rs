use std::{
    marker::PhantomData,
    os::raw::{c_int, c_void},
    ptr::NonNull,
};

use rustc_hash::FxHashMap as HashMap;

use crate::error::HalError;

/// A borrowed, type-erased argument slot.
///
/// The container never reads through the pointer; it only hands it to the backend operation
/// it was stored for. The referent must outlive `'a`.
///
/// Slots borrowed from a reference remember the referent's size, so typed extraction never
/// reads past it. Slots wrapped from a raw pointer carry no size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamValue<'a> {
    ptr: NonNull<c_void>,
    size: Option<usize>,
    phantom: PhantomData<&'a mut c_void>,
}

impl<'a> ParamValue<'a> {
    /// Borrows `value` for a read-only argument.
    #[inline]
    pub fn new<T>(value: &'a T) -> Self {
        let ptr = NonNull::from(value).cast();
        let size = Some(size_of::<T>());
        let phantom = PhantomData;
        Self { ptr, size, phantom }
    }

    /// Borrows `value` for an argument the backend may write to.
    #[inline]
    pub fn new_mut<T>(value: &'a mut T) -> Self {
        let ptr = NonNull::from(value).cast();
        let size = Some(size_of::<T>());
        let phantom = PhantomData;
        Self { ptr, size, phantom }
    }

    /// Wraps a raw pointer. Returns `None` for null.
    ///
    /// # Safety
    /// `ptr` must stay valid for the backend call for all of `'a`. When the slot is read as an
    /// integer, `ptr` must point to a `c_int`.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut c_void) -> Option<Self> {
        let ptr = NonNull::new(ptr)?;
        let size = None;
        let phantom = PhantomData;
        Some(Self { ptr, size, phantom })
    }

    /// Size of the referent, if the slot was borrowed from a reference.
    #[inline]
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_const_ptr(&self) -> *const c_void {
        self.ptr.as_ptr().cast_const()
    }
}

/// Converts a stored slot into a typed request argument.
pub trait FromParam<'a>: Sized {
    fn from_param(value: ParamValue<'a>) -> Result<Self, HalError>;
}

impl<'a> FromParam<'a> for ParamValue<'a> {
    #[inline]
    fn from_param(value: ParamValue<'a>) -> Result<Self, HalError> {
        Ok(value)
    }
}

/// Operation selectors are passed by reference to an integer.
impl<'a> FromParam<'a> for c_int {
    fn from_param(value: ParamValue<'a>) -> Result<Self, HalError> {
        match value.size {
            Some(size) if size != size_of::<c_int>() => {
                log::error!("integer parameter borrowed from a {size}-byte value");
                Err(HalError::invalid(format!(
                    "expected a {}-byte integer, got {size} bytes",
                    size_of::<c_int>()
                )))
            }
            // SAFETY: the slot is either borrowed from a `c_int`-sized referent for `'a`, or a
            // raw pointer whose caller vouched for a `c_int` behind it.
            _ => Ok(unsafe { value.ptr.cast::<c_int>().as_ptr().read_unaligned() }),
        }
    }
}

/// Named arguments for a request.
///
/// Keys are owned; values are borrowed. Setting an existing key replaces the previous value.
#[derive(Debug, Default, Clone)]
pub struct ParamSet<'a> {
    table: HashMap<String, ParamValue<'a>>,
}

impl<'a> ParamSet<'a> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key → value`, returning the value `key` held before.
    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: ParamValue<'a>,
    ) -> Option<ParamValue<'a>> {
        let previous = self.table.insert(key.into(), value);
        if let Some(previous) = previous {
            log::debug!("parameter replaced, previous value {:p}", previous.as_ptr());
        }
        previous
    }

    /// Looks up `key`. A missing key is an invalid parameter.
    pub(crate) fn get(&self, key: &str) -> Result<ParamValue<'a>, HalError> {
        match self.table.get(key) {
            Some(&value) => Ok(value),
            None => {
                log::error!("failed to retrieve the param '{key}'");
                Err(HalError::invalid(format!("missing parameter `{key}`")))
            }
        }
    }

    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use std::os::raw::{c_int, c_void};

    use super::{FromParam, ParamSet, ParamValue};
    use crate::error::HalError;

    #[test]
    fn test_set_get() -> Result<(), HalError> {
        let values: Vec<u64> = (0..32).map(|_| fastrand::u64(..)).collect();
        let keys: Vec<String> = (0..32)
            .map(|i| format!("key-{i}-{}", fastrand::u32(..)))
            .collect();

        let mut params = ParamSet::new();
        for (key, value) in keys.iter().zip(values.iter()) {
            params.set(key.as_str(), ParamValue::new(value));
        }
        assert_eq!(params.len(), keys.len());

        for (key, value) in keys.iter().zip(values.iter()) {
            let slot = params.get(key)?;
            assert_eq!(slot.as_const_ptr(), (value as *const u64).cast::<c_void>());
        }
        Ok(())
    }

    #[test]
    fn test_last_write_wins() -> Result<(), HalError> {
        let (x, y) = (1u8, 2u8);
        let mut params = ParamSet::new();
        assert_eq!(params.set("input", ParamValue::new(&x)), None);
        assert_eq!(params.set("input", ParamValue::new(&y)), Some(ParamValue::new(&x)));

        assert_eq!(params.len(), 1);
        assert_eq!(params.get("input")?, ParamValue::new(&y));
        Ok(())
    }

    #[test]
    fn test_invalid() -> Result<(), HalError> {
        let x = 0u8;
        let mut params = ParamSet::new();
        assert!(matches!(params.get("input"), Err(HalError::InvalidParameter(_))));
        assert!(unsafe { ParamValue::from_raw(std::ptr::null_mut()) }.is_none());
        assert!(params.is_empty());

        // the empty key is an ordinary key
        params.set("", ParamValue::new(&x));
        assert_eq!(params.get("")?, ParamValue::new(&x));
        Ok(())
    }

    #[test]
    fn test_int_param() -> Result<(), HalError> {
        let ops: c_int = 5;
        let mut params = ParamSet::new();
        params.set("ops", ParamValue::new(&ops));
        assert_eq!(c_int::from_param(params.get("ops")?)?, 5);
        assert!(params.contains("ops"));
        assert_eq!(params.keys().collect::<Vec<_>>(), vec!["ops"]);

        let mut raw: c_int = 9;
        let slot = unsafe { ParamValue::from_raw((&mut raw as *mut c_int).cast()) };
        assert_eq!(slot.and_then(|slot| slot.size()), None);
        assert_eq!(slot.map(c_int::from_param).transpose()?, Some(9));
        Ok(())
    }

    #[test]
    fn test_int_param_size() {
        #[repr(C)]
        struct Packed {
            ops: u8,
            tail: [u8; 3],
        }
        let packed = Packed {
            ops: 1,
            tail: [2, 0, 0],
        };
        assert_eq!(packed.tail[0], 2);

        let narrow = ParamValue::new(&packed.ops);
        assert_eq!(narrow.size(), Some(1));
        assert!(matches!(c_int::from_param(narrow), Err(HalError::InvalidParameter(_))));

        let wide = 7u64;
        assert!(matches!(
            c_int::from_param(ParamValue::new(&wide)),
            Err(HalError::InvalidParameter(_))
        ));
    }
}
