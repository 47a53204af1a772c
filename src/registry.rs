use std::sync::Arc;

use itertools::Itertools;
use once_cell::sync::{Lazy, OnceCell};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::HalError,
    loader::{DlLoader, HalModule, Loader, MAX_LIB_NAME_LENGTH, truncate_name},
};

/// A backend library found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BackendDescriptor {
    name: String,
    index: usize,
}

impl BackendDescriptor {
    /// Library name of the backend.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of the backend in discovery order.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// The table of discoverable backends for one module category.
///
/// Discovery runs the first time the table is needed and, once it succeeds, never again.
pub struct BackendRegistry {
    module: HalModule,
    loader: Arc<dyn Loader>,
    descriptors: OnceCell<Vec<BackendDescriptor>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("module", &self.module)
            .field("descriptors", &self.descriptors.get())
            .finish_non_exhaustive()
    }
}

impl BackendRegistry {
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Self {
            module: HalModule::Ml,
            loader,
            descriptors: OnceCell::new(),
        }
    }

    /// The process-wide registry, backed by a [`DlLoader`] configured from the environment.
    pub fn global() -> &'static Self {
        static GLOBAL: Lazy<BackendRegistry> =
            Lazy::new(|| BackendRegistry::new(Arc::new(DlLoader::from_env())));
        &GLOBAL
    }

    #[inline]
    pub fn module(&self) -> HalModule {
        self.module
    }

    #[inline]
    pub fn loader(&self) -> &Arc<dyn Loader> {
        &self.loader
    }

    /// Runs discovery unless it already succeeded. A failed attempt is retried on the next call.
    pub fn ensure_scanned(&self) -> Result<&[BackendDescriptor], HalError> {
        self.descriptors
            .get_or_try_init(|| self.scan())
            .map(Vec::as_slice)
    }

    fn scan(&self) -> Result<Vec<BackendDescriptor>, HalError> {
        log::debug!("scanning available HAL {} backends...", self.module);

        let count = self.loader.backend_count(self.module).map_err(|err| {
            log::error!("failed to get backend count: {err}");
            HalError::runtime("failed to scan backends")
        })?;
        if count == 0 {
            return Ok(vec![]);
        }

        let names = self
            .loader
            .backend_names(self.module, count, MAX_LIB_NAME_LENGTH)
            .map_err(|err| {
                log::error!("failed to get backend names: {err}");
                HalError::runtime("failed to scan backends")
            })?;
        let descriptors = names
            .into_iter()
            .take(count)
            .map(|name| truncate_name(name, MAX_LIB_NAME_LENGTH))
            .enumerate()
            .map(|(index, name)| BackendDescriptor { name, index })
            .collect_vec();

        log::debug!(
            "HAL {} backends: [{}]",
            self.module,
            descriptors.iter().map(BackendDescriptor::name).join(", ")
        );
        Ok(descriptors)
    }

    /// Discovered backends, if discovery has already succeeded.
    #[inline]
    pub fn descriptors(&self) -> Option<&[BackendDescriptor]> {
        self.descriptors.get().map(Vec::as_slice)
    }

    /// Resolves `name` to a backend: an exact library name wins, then the first library whose
    /// name contains `name`.
    pub fn find(&self, name: &str) -> Result<&BackendDescriptor, HalError> {
        let descriptors = self.ensure_scanned()?;
        if descriptors.is_empty() {
            log::error!("there is no available backends");
            return Err(HalError::NotSupported("no backend is available".into()));
        }

        descriptors
            .iter()
            .find(|descriptor| descriptor.name == name)
            .or_else(|| descriptors.iter().find(|descriptor| descriptor.name.contains(name)))
            .ok_or_else(|| {
                log::error!("no backend matched with {name}");
                HalError::invalid(format!("no backend matched with `{name}`"))
            })
    }
}
