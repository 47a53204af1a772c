//! Call-counting loader and an in-process backend for tests.

use std::{
    cell::{Cell, RefCell},
    os::raw::{c_int, c_void},
    path::PathBuf,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::{Mutex, MutexGuard};

use crate::{
    backend::{BackendFuncs, DeinitFn, InitFn},
    hal::HalMl,
    loader::{HalModule, Loader, LoaderConfig, LoaderError},
};

/// Serializes tests that load the dummy backend library, whose module counters are global.
static DUMMY_BACKEND: Mutex<()> = Mutex::new(());

/// The `hal-ml-backend-dummy` library built next to the test binary.
pub struct DummyBackend {
    pub config: LoaderConfig,
    /// File name of the library as listed by the loader.
    pub library: String,
    pub path: PathBuf,
    _guard: MutexGuard<'static, ()>,
}

impl DummyBackend {
    pub fn locate() -> std::io::Result<Self> {
        use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
        use std::io::{Error, ErrorKind};

        let _guard = DUMMY_BACKEND.lock();
        let deps = std::env::current_exe()?
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "test binary has no directory"))?;
        let prefix = format!("{DLL_PREFIX}hal_ml_backend_dummy");

        let library = std::fs::read_dir(&deps)?
            .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
            .filter(|name| name.starts_with(&prefix) && name.ends_with(DLL_SUFFIX))
            .min()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, "dummy backend library not built"))?;
        let path = deps.join(&library);
        let config = LoaderConfig::default()
            .search_paths([deps])
            .prefix(library.clone());

        Ok(Self {
            config,
            library,
            path,
            _guard,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubCall {
    ConfigureInstance {
        private: *mut c_void,
        prop: *const c_void,
    },
    Invoke {
        private: *mut c_void,
        input: *const c_void,
        output: *mut c_void,
    },
    InvokeDynamic {
        private: *mut c_void,
        prop: *mut c_void,
        input: *const c_void,
        output: *mut c_void,
    },
    GetFrameworkInfo {
        private: *mut c_void,
        framework_info: *mut c_void,
    },
    GetModelInfo {
        private: *mut c_void,
        ops: c_int,
        in_info: *mut c_void,
        out_info: *mut c_void,
    },
    EventHandler {
        private: *mut c_void,
        ops: c_int,
        data: *mut c_void,
    },
}

/// Private state of the stub backend.
#[derive(Debug, Default)]
pub struct StubBackend {
    pub calls: RefCell<Vec<StubCall>>,
    /// Status every operation returns.
    pub status: Cell<c_int>,
}

impl StubBackend {
    /// The stub state behind a handle created over a [`StubLoader`].
    pub fn of(hal: &HalMl) -> &StubBackend {
        // SAFETY: `stub_init` stores a leaked `StubBackend` as the private state.
        unsafe { &*hal.private().get().cast::<StubBackend>() }
    }

    fn record(private: *mut c_void, call: StubCall) -> c_int {
        // SAFETY: see `StubBackend::of`.
        let state = unsafe { &*private.cast::<StubBackend>() };
        state.calls.borrow_mut().push(call);
        state.status.get()
    }
}

thread_local! {
    /// Number of `deinit` calls on this thread.
    pub static DEINIT_CALLS: Cell<usize> = const { Cell::new(0) };
}

pub fn deinit_calls() -> usize {
    DEINIT_CALLS.with(Cell::get)
}

unsafe extern "C" fn stub_init(private: *mut *mut c_void) -> c_int {
    let state = Box::into_raw(Box::new(StubBackend::default()));
    unsafe { *private = state.cast() };
    0
}

unsafe extern "C" fn stub_init_fail(_private: *mut *mut c_void) -> c_int {
    -1
}

unsafe extern "C" fn stub_deinit(private: *mut c_void) -> c_int {
    DEINIT_CALLS.with(|calls| calls.set(calls.get() + 1));
    drop(unsafe { Box::from_raw(private.cast::<StubBackend>()) });
    0
}

unsafe extern "C" fn stub_deinit_fail(private: *mut c_void) -> c_int {
    unsafe { stub_deinit(private) };
    -1
}

unsafe extern "C" fn stub_configure_instance(private: *mut c_void, prop: *const c_void) -> c_int {
    StubBackend::record(private, StubCall::ConfigureInstance { private, prop })
}

unsafe extern "C" fn stub_invoke(
    private: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int {
    StubBackend::record(private, StubCall::Invoke { private, input, output })
}

unsafe extern "C" fn stub_invoke_dynamic(
    private: *mut c_void,
    prop: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
) -> c_int {
    let call = StubCall::InvokeDynamic {
        private,
        prop,
        input,
        output,
    };
    StubBackend::record(private, call)
}

unsafe extern "C" fn stub_get_framework_info(
    private: *mut c_void,
    framework_info: *mut c_void,
) -> c_int {
    let call = StubCall::GetFrameworkInfo {
        private,
        framework_info,
    };
    StubBackend::record(private, call)
}

unsafe extern "C" fn stub_get_model_info(
    private: *mut c_void,
    ops: c_int,
    in_info: *mut c_void,
    out_info: *mut c_void,
) -> c_int {
    let call = StubCall::GetModelInfo {
        private,
        ops,
        in_info,
        out_info,
    };
    StubBackend::record(private, call)
}

unsafe extern "C" fn stub_event_handler(
    private: *mut c_void,
    ops: c_int,
    data: *mut c_void,
) -> c_int {
    StubBackend::record(private, StubCall::EventHandler { private, ops, data })
}

/// A [`Loader`] over a fixed list of library names, all backed by the stub backend.
#[derive(Debug, Default)]
pub struct StubLoader {
    pub names: Vec<String>,
    pub count_calls: AtomicUsize,
    pub names_calls: AtomicUsize,
    pub acquire_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub fail_count: AtomicBool,
    pub fail_acquire: AtomicBool,
    pub fail_release: AtomicBool,
    pub fail_init: AtomicBool,
    pub fail_deinit: AtomicBool,
    pub missing_init: AtomicBool,
    /// Hands out tables with only `init` and `deinit`.
    pub sparse: AtomicBool,
}

impl StubLoader {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let names = names.into_iter().map(Into::into).collect();
        Self {
            names,
            ..Default::default()
        }
    }

    fn funcs(&self) -> BackendFuncs {
        let init = match (
            self.missing_init.load(Ordering::SeqCst),
            self.fail_init.load(Ordering::SeqCst),
        ) {
            (true, _) => None,
            (false, true) => Some(stub_init_fail as InitFn),
            (false, false) => Some(stub_init as InitFn),
        };
        let deinit = match self.fail_deinit.load(Ordering::SeqCst) {
            true => Some(stub_deinit_fail as DeinitFn),
            false => Some(stub_deinit as DeinitFn),
        };
        if self.sparse.load(Ordering::SeqCst) {
            return BackendFuncs {
                init,
                deinit,
                ..Default::default()
            };
        }
        BackendFuncs {
            init,
            deinit,
            configure_instance: Some(stub_configure_instance),
            invoke: Some(stub_invoke),
            invoke_dynamic: Some(stub_invoke_dynamic),
            get_framework_info: Some(stub_get_framework_info),
            get_model_info: Some(stub_get_model_info),
            event_handler: Some(stub_event_handler),
        }
    }
}

impl Loader for StubLoader {
    fn backend_count(&self, _module: HalModule) -> Result<usize, LoaderError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        match self.fail_count.load(Ordering::SeqCst) {
            true => Err(LoaderError::Count(-1)),
            false => Ok(self.names.len()),
        }
    }

    fn backend_names(
        &self,
        _module: HalModule,
        count: usize,
        _max_len: usize,
    ) -> Result<Vec<String>, LoaderError> {
        self.names_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.names.iter().take(count).cloned().collect())
    }

    fn acquire(&self, _module: HalModule, library: &str) -> Result<Box<BackendFuncs>, LoaderError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(LoaderError::Init(library.to_owned(), -1));
        }
        if !self.names.iter().any(|name| name == library) {
            return Err(LoaderError::NotFound(library.to_owned()));
        }
        Ok(Box::new(self.funcs()))
    }

    fn release(
        &self,
        _module: HalModule,
        funcs: Box<BackendFuncs>,
        library: &str,
    ) -> Result<(), LoaderError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        drop(funcs);
        match self.fail_release.load(Ordering::SeqCst) {
            true => Err(LoaderError::Exit(library.to_owned(), -1)),
            false => Ok(()),
        }
    }
}
