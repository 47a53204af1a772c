use std::{os::raw::c_int, sync::Arc};

use crate::{
    backend::{BackendFuncs, BackendPrivate},
    dispatch::Dispatcher,
    error::{HalError, check_status},
    loader::{HalModule, Loader},
    param::{ParamSet, ParamValue},
    registry::{BackendDescriptor, BackendRegistry},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HalId;

/// One loaded and initialized backend instance.
///
/// Created by [`HalMl::create`]; torn down by [`HalMl::destroy`] or on drop. Handles are
/// independent of each other, even when they are opened on the same backend.
pub struct HalMl {
    /// The unique identifier of the handle.
    id: uid::Id<HalId>,
    /// Function table acquired from the loader. Taken on teardown.
    funcs: Option<Box<BackendFuncs>>,
    /// State returned by the backend's `init`.
    private: BackendPrivate,
    /// The backend this handle was opened on.
    descriptor: BackendDescriptor,
    module: HalModule,
    loader: Arc<dyn Loader>,
}

impl std::fmt::Debug for HalMl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalMl")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

/// Gives a table back after a failed creation. The creation error takes precedence.
fn release_after_failure(
    loader: &dyn Loader,
    module: HalModule,
    funcs: Box<BackendFuncs>,
    library: &str,
) {
    if let Err(err) = loader.release(module, funcs, library) {
        log::warn!("failed to release backend {library}: {err}");
    }
}

impl HalMl {
    /// Opens the backend matching `name` in the process-wide registry.
    #[inline]
    pub fn create(name: &str) -> Result<Self, HalError> {
        Self::create_with(BackendRegistry::global(), name)
    }

    /// Opens the backend matching `name` in `registry`, running discovery if needed.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all, fields(name = %name)))]
    pub fn create_with(registry: &BackendRegistry, name: &str) -> Result<Self, HalError> {
        let descriptor = registry.find(name)?.clone();
        let module = registry.module();
        let loader = registry.loader().clone();
        let library = descriptor.name();

        log::info!("initializing backend {name}");

        let funcs = loader.acquire(module, library).inspect_err(|err| {
            log::error!("failed to get backend {library}: {err}");
        })?;
        let Some(init) = funcs.init else {
            log::error!("backend {library} provides no init");
            release_after_failure(loader.as_ref(), module, funcs, library);
            return Err(HalError::runtime(format!("backend {library} provides no init")));
        };

        let mut private = BackendPrivate::null();
        // SAFETY: `init` comes from the table the loader just filled for this library.
        let status = unsafe { init(private.as_mut_ptr()) };
        if status != 0 {
            log::error!("failed to initialize backend {library}: status {status}");
            release_after_failure(loader.as_ref(), module, funcs, library);
            return Err(HalError::runtime(format!(
                "backend {library} init returned {status}"
            )));
        }

        log::info!("backend initialized successfully with {library}");

        let id = uid::Id::new();
        let funcs = Some(funcs);
        Ok(Self {
            id,
            funcs,
            private,
            descriptor,
            module,
            loader,
        })
    }

    /// Deinitializes the backend and releases its table.
    ///
    /// A failing `deinit` is only logged; a failing release is reported after all local state
    /// is freed.
    pub fn destroy(mut self) -> Result<(), HalError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), HalError> {
        let Some(funcs) = self.funcs.take() else {
            return Ok(());
        };
        let library = self.descriptor.name();

        log::info!("deinitializing backend {library}");

        match funcs.deinit {
            Some(deinit) => {
                // SAFETY: `private` is the state this backend's `init` produced.
                let status = unsafe { deinit(self.private.get()) };
                if status != 0 {
                    log::warn!("failed to deinitialize backend {library}: status {status}");
                }
            }
            None => log::warn!("backend {library} provides no deinit"),
        }

        self.loader
            .release(self.module, funcs, library)
            .map_err(|err| {
                log::error!("failed to release backend {library}: {err}");
                HalError::from(err)
            })
    }

    #[inline]
    pub fn id(&self) -> uid::Id<HalId> {
        self.id
    }

    #[inline]
    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn library_name(&self) -> &str {
        self.descriptor.name()
    }

    #[inline]
    pub(crate) fn private(&self) -> BackendPrivate {
        self.private
    }

    /// Fetches an operation slot from the table.
    fn slot<F>(
        &self,
        name: &'static str,
        f: impl FnOnce(&BackendFuncs) -> Option<F>,
    ) -> Result<F, HalError> {
        let funcs = self
            .funcs
            .as_deref()
            .ok_or_else(|| HalError::runtime("backend already released"))?;
        f(funcs).ok_or_else(|| {
            log::error!("backend {} does not implement {name}", self.library_name());
            HalError::NotSupported(format!(
                "backend {} does not implement {name}",
                self.library_name()
            ))
        })
    }

    /// Issues the request named `name`, taking its arguments from `params`.
    ///
    /// Names are matched case-insensitively against `configure_instance`, `invoke`,
    /// `invoke_dynamic`, `get_framework_info`, `get_model_info` and `eventHandler`.
    #[inline]
    pub fn request(&self, name: &str, params: &ParamSet<'_>) -> Result<(), HalError> {
        Dispatcher::global().dispatch(self, name, params)
    }

    pub fn configure_instance(&self, properties: ParamValue<'_>) -> Result<(), HalError> {
        let f = self.slot("configure_instance", |funcs| funcs.configure_instance)?;
        // SAFETY: the backend receives its own state and pointers valid for this call.
        check_status(unsafe { f(self.private.get(), properties.as_const_ptr()) })
    }

    /// Runs inference on `input`, writing into `output`.
    #[inline]
    pub fn invoke(&self, input: ParamValue<'_>, output: ParamValue<'_>) -> Result<(), HalError> {
        let f = self.slot("invoke", |funcs| funcs.invoke)?;
        // SAFETY: see `configure_instance`.
        check_status(unsafe { f(self.private.get(), input.as_const_ptr(), output.as_ptr()) })
    }

    pub fn invoke_dynamic(
        &self,
        properties: ParamValue<'_>,
        input: ParamValue<'_>,
        output: ParamValue<'_>,
    ) -> Result<(), HalError> {
        let f = self.slot("invoke_dynamic", |funcs| funcs.invoke_dynamic)?;
        // SAFETY: see `configure_instance`.
        let status = unsafe {
            f(
                self.private.get(),
                properties.as_ptr(),
                input.as_const_ptr(),
                output.as_ptr(),
            )
        };
        check_status(status)
    }

    pub fn get_framework_info(&self, framework_info: ParamValue<'_>) -> Result<(), HalError> {
        let f = self.slot("get_framework_info", |funcs| funcs.get_framework_info)?;
        // SAFETY: see `configure_instance`.
        check_status(unsafe { f(self.private.get(), framework_info.as_ptr()) })
    }

    pub fn get_model_info(
        &self,
        ops: c_int,
        in_info: ParamValue<'_>,
        out_info: ParamValue<'_>,
    ) -> Result<(), HalError> {
        let f = self.slot("get_model_info", |funcs| funcs.get_model_info)?;
        // SAFETY: see `configure_instance`.
        let status = unsafe { f(self.private.get(), ops, in_info.as_ptr(), out_info.as_ptr()) };
        check_status(status)
    }

    pub fn event_handler(&self, ops: c_int, data: ParamValue<'_>) -> Result<(), HalError> {
        let f = self.slot("event_handler", |funcs| funcs.event_handler)?;
        // SAFETY: see `configure_instance`.
        check_status(unsafe { f(self.private.get(), ops, data.as_ptr()) })
    }
}

impl Drop for HalMl {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::error!("failed to tear down backend handle {}: {err}", self.id);
        }
    }
}
