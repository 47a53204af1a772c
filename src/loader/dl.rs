use std::{
    collections::hash_map::Entry,
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use libloading::Library;
use parking_lot::Mutex;
use rustc_hash::FxHashMap as HashMap;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{HalModule, Loader, LoaderError, truncate_name};
use crate::backend::{BACKEND_DATA_SYMBOL, BackendFuncs, HalBackendData, ModuleExitFn, ModuleInitFn};

/// Prepends directories to the backend search path.
pub const BACKEND_PATH_ENV: &str = "HAL_ML_BACKEND_PATH";
/// Overrides the backend library file name prefix.
pub const BACKEND_PREFIX_ENV: &str = "HAL_ML_BACKEND_PREFIX";

/// Where [`DlLoader`] looks for backend libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LoaderConfig {
    /// Directories scanned in order. Earlier directories shadow later ones.
    pub search_paths: Vec<PathBuf>,
    /// File name prefix of backend libraries.
    pub prefix: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            search_paths: vec!["/hal/lib64".into(), "/hal/lib".into()],
            prefix: "libhal-backend-ml".into(),
        }
    }
}

impl LoaderConfig {
    /// Default configuration adjusted by [`BACKEND_PATH_ENV`] and [`BACKEND_PREFIX_ENV`].
    pub fn from_env() -> Self {
        let paths = std::env::var_os(BACKEND_PATH_ENV);
        let prefix = std::env::var(BACKEND_PREFIX_ENV).ok();
        Self::from_vars(paths, prefix)
    }

    fn from_vars(paths: Option<OsString>, prefix: Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(paths) = paths {
            let mut search_paths: Vec<_> = std::env::split_paths(&paths)
                .filter(|path| !path.as_os_str().is_empty())
                .collect();
            search_paths.append(&mut config.search_paths);
            config.search_paths = search_paths;
        }
        if let Some(prefix) = prefix.filter(|prefix| !prefix.is_empty()) {
            config.prefix = prefix;
        }
        config
    }

    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    pub fn search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn is_backend(&self, file_name: &str) -> bool {
        let suffix = std::env::consts::DLL_SUFFIX;
        file_name.starts_with(&self.prefix)
            && (file_name.ends_with(suffix) || file_name.contains(&format!("{suffix}.")))
    }
}

struct LoadedLibrary {
    /// Keeps the code behind the acquired tables mapped.
    _library: Library,
    init: Option<ModuleInitFn>,
    exit: Option<ModuleExitFn>,
    /// Number of tables handed out and not yet released.
    refs: usize,
}

/// Loads backends from shared libraries on disk.
pub struct DlLoader {
    config: LoaderConfig,
    libraries: Mutex<HashMap<String, LoadedLibrary>>,
}

impl std::fmt::Debug for DlLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loaded = self.libraries.lock().keys().cloned().collect_vec();
        f.debug_struct("DlLoader")
            .field("config", &self.config)
            .field("loaded", &loaded)
            .finish()
    }
}

impl DlLoader {
    pub fn new(config: LoaderConfig) -> Self {
        let libraries = Mutex::new(HashMap::default());
        Self { config, libraries }
    }

    pub fn from_env() -> Self {
        Self::new(LoaderConfig::from_env())
    }

    #[inline]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of tables acquired from `library` and not yet released. Zero once the library is
    /// closed.
    pub fn ref_count(&self, library: &str) -> usize {
        self.libraries
            .lock()
            .get(library)
            .map_or(0, |loaded| loaded.refs)
    }

    /// Backend libraries found on the search path, sorted by file name.
    fn scan(&self) -> Result<Vec<(String, PathBuf)>, LoaderError> {
        let mut found = vec![];
        for dir in &self.config.search_paths {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    log::debug!("skipping missing backend directory {}", dir.display());
                    continue;
                }
                Err(err) => return Err(LoaderError::Io(dir.display().to_string(), err)),
            };
            for entry in entries {
                let entry = entry.map_err(|err| LoaderError::Io(dir.display().to_string(), err))?;
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if self.config.is_backend(&name) {
                    found.push((name, entry.path()));
                }
            }
        }
        // stable sort keeps the first directory's copy in front of shadowed ones
        found.sort_by(|(x, _), (y, _)| x.cmp(y));
        Ok(found.into_iter().unique_by(|(name, _)| name.clone()).collect())
    }

    fn open(&self, library: &str) -> Result<LoadedLibrary, LoaderError> {
        let path = self
            .scan()?
            .into_iter()
            .find(|(name, _)| name == library)
            .map(|(_, path)| path)
            .ok_or_else(|| LoaderError::NotFound(library.to_owned()))?;
        open_library(library, &path)
    }
}

fn open_library(library: &str, path: &Path) -> Result<LoadedLibrary, LoaderError> {
    log::debug!("opening backend library {}", path.display());

    // SAFETY: backend libraries are trusted system components; their initializers run here.
    let handle = unsafe { Library::new(path) }
        .map_err(|err| LoaderError::Open(library.to_owned(), err))?;

    // SAFETY: the symbol is declared by the backend contract as a `HalBackendData`.
    let data = unsafe { handle.get::<*const HalBackendData>(BACKEND_DATA_SYMBOL) }
        .map(|symbol| *symbol)
        .map_err(|_| LoaderError::Symbol(library.to_owned()))?;
    if data.is_null() {
        return Err(LoaderError::Symbol(library.to_owned()));
    }

    // SAFETY: non-null and kept alive by `handle`.
    let data = unsafe { &*data };
    let (name, vendor) = unsafe { (data.name(), data.vendor()) };
    log::info!(
        "loaded backend module {} by {} from {library}",
        name.unwrap_or("<unnamed>"),
        vendor.unwrap_or("<unknown>")
    );

    Ok(LoadedLibrary {
        init: data.init,
        exit: data.exit,
        _library: handle,
        refs: 0,
    })
}

impl Loader for DlLoader {
    fn backend_count(&self, module: HalModule) -> Result<usize, LoaderError> {
        let count = self.scan()?.len();
        log::debug!("{count} backend libraries found for module {module}");
        Ok(count)
    }

    fn backend_names(
        &self,
        module: HalModule,
        count: usize,
        max_len: usize,
    ) -> Result<Vec<String>, LoaderError> {
        let names = self
            .scan()?
            .into_iter()
            .take(count)
            .map(|(name, _)| truncate_name(name, max_len))
            .collect_vec();
        // libraries removed since the count was taken
        if names.len() < count {
            log::error!("expected {count} backend libraries, found {}", names.len());
            return Err(LoaderError::Names(module));
        }
        Ok(names)
    }

    fn acquire(&self, module: HalModule, library: &str) -> Result<Box<BackendFuncs>, LoaderError> {
        let mut libraries = self.libraries.lock();
        let loaded = match libraries.entry(library.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.open(library)?),
        };

        let mut funcs = Box::<BackendFuncs>::default();
        let status = match loaded.init {
            // SAFETY: `funcs` is a zeroed table the module fills in place.
            Some(init) => unsafe { init(funcs.as_mut()) },
            None => 0,
        };
        if status != 0 {
            if loaded.refs == 0 {
                libraries.remove(library);
            }
            return Err(LoaderError::Init(library.to_owned(), status));
        }

        loaded.refs += 1;
        log::debug!("acquired {module} backend table from {library} ({} live)", loaded.refs);
        Ok(funcs)
    }

    fn release(
        &self,
        module: HalModule,
        mut funcs: Box<BackendFuncs>,
        library: &str,
    ) -> Result<(), LoaderError> {
        let mut libraries = self.libraries.lock();
        let Some(loaded) = libraries.get_mut(library) else {
            return Err(LoaderError::NotLoaded(library.to_owned()));
        };

        let status = match loaded.exit {
            // SAFETY: `funcs` was filled by this module's `init`.
            Some(exit) => unsafe { exit(funcs.as_mut()) },
            None => 0,
        };
        drop(funcs);

        loaded.refs = loaded.refs.saturating_sub(1);
        log::debug!("released {module} backend table to {library} ({} live)", loaded.refs);
        if loaded.refs == 0 {
            libraries.remove(library);
        }

        match status {
            0 => Ok(()),
            status => Err(LoaderError::Exit(library.to_owned(), status)),
        }
    }
}
