//! Dynamic Library Loader
//!
//! Safe wrapper around libloading for opening a telio scaffolding library
//! built separately from this crate and reading its gate accessors.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use libloading::Library;
use thiserror::Error;
use tracing::debug;

use super::buffer::RustBuffer;
use super::status::{CallStatusCode, RustCallStatus};

/// Errors raised while loading or calling into a library.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to load library '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("symbol '{name}' not found in '{path}': {source}")]
    SymbolNotFound {
        name: String,
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("invalid symbol name: {0}")]
    InvalidSymbol(String),

    #[error("library '{0}' not found in any search path")]
    NotFound(String),

    #[error("'{symbol}' failed with status {code}: {message}")]
    CallFailed {
        symbol: String,
        code: i8,
        message: String,
    },
}

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

type ContractVersionFn = extern "C" fn(*mut RustCallStatus) -> u32;
type ChecksumFn = extern "C" fn(*mut RustCallStatus) -> u16;
type BufferFreeFn = extern "C" fn(RustBuffer, *mut RustCallStatus);

const CONTRACT_VERSION_SYMBOL: &str = "ffi_telio_uniffi_contract_version";
const BUFFER_FREE_SYMBOL: &str = "ffi_telio_rustbuffer_free";

/// A dynamically loaded scaffolding library
pub struct DynamicLibrary {
    /// Path to the library
    path: PathBuf,
    /// The loaded library handle
    library: Library,
}

impl DynamicLibrary {
    /// Load a library from the given path
    pub fn load(path: impl AsRef<Path>) -> LoaderResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading runs the library's initializers. We trust the
        // path the user asked us to verify.
        let library = unsafe { Library::new(&path) }.map_err(|source| LoaderError::Load {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "scaffolding library loaded");

        Ok(Self { path, library })
    }

    /// Get the path to this library
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve a function symbol with the given signature.
    ///
    /// # Safety
    ///
    /// `F` must match the real signature of the symbol.
    unsafe fn function<F: Copy>(&self, name: &str) -> LoaderResult<F> {
        let c_name = CString::new(name).map_err(|_| LoaderError::InvalidSymbol(name.to_string()))?;
        let symbol = self
            .library
            .get::<F>(c_name.as_bytes_with_nul())
            .map_err(|source| LoaderError::SymbolNotFound {
                name: name.to_string(),
                path: self.path.clone(),
                source,
            })?;
        Ok(*symbol)
    }

    /// Check whether the library exports `name`.
    pub fn has_symbol(&self, name: &str) -> bool {
        // Safety: the pointer is never called.
        unsafe { self.function::<*const ()>(name) }.is_ok()
    }

    /// Scaffolding contract version reported by the library.
    pub fn contract_version(&self) -> LoaderResult<u32> {
        // Safety: every scaffolding library exports this accessor with
        // this signature.
        let accessor: ContractVersionFn = unsafe { self.function(CONTRACT_VERSION_SYMBOL)? };
        let mut status = RustCallStatus::new();
        let version = accessor(&mut status);
        self.check_status(CONTRACT_VERSION_SYMBOL, status)?;
        Ok(version)
    }

    /// Call the checksum accessor named `accessor`.
    pub fn checksum(&self, accessor: &str) -> LoaderResult<u16> {
        // Safety: checksum accessors all share this signature.
        let f: ChecksumFn = unsafe { self.function(accessor)? };
        let mut status = RustCallStatus::new();
        let checksum = f(&mut status);
        self.check_status(accessor, status)?;
        Ok(checksum)
    }

    /// Turn a failed status into an error, releasing its buffer through the
    /// library's own allocator.
    fn check_status(&self, symbol: &str, mut status: RustCallStatus) -> LoaderResult<()> {
        if status.code == CallStatusCode::Success as i8 {
            return Ok(());
        }
        let error_buf = status.take_error_buf();
        let message = String::from_utf8_lossy(error_buf.as_slice()).into_owned();

        // Safety: `ffi_telio_rustbuffer_free` has this signature in every
        // scaffolding library, and the buffer came from that library.
        if let Ok(free) = unsafe { self.function::<BufferFreeFn>(BUFFER_FREE_SYMBOL) } {
            let mut free_status = RustCallStatus::new();
            free(error_buf, &mut free_status);
        }

        Err(LoaderError::CallFailed {
            symbol: symbol.to_string(),
            code: status.code,
            message,
        })
    }
}

/// Library finder with search paths
pub struct LibraryLoader {
    /// Search paths for libraries
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    /// Create a new library loader
    pub fn new() -> Self {
        Self {
            search_paths: default_search_paths(),
        }
    }

    /// Add a search path ahead of the platform defaults
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        self.search_paths.insert(0, path.as_ref().to_path_buf());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Find a library by name
    pub fn find_library(&self, name: &str) -> Option<PathBuf> {
        // If it's already a path, check if it exists
        let path = Path::new(name);
        if path.exists() {
            return Some(path.to_path_buf());
        }

        let lib_name = library_filename(name);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&lib_name))
            .find(|candidate| candidate.exists())
    }

    /// Find and load a library by name
    pub fn load(&self, name: &str) -> LoaderResult<DynamicLibrary> {
        let path = self
            .find_library(name)
            .ok_or_else(|| LoaderError::NotFound(name.to_string()))?;
        DynamicLibrary::load(path)
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the default library search paths for this platform
fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("target").join("release"));
        paths.push(cwd.join("target").join("debug"));
        paths.push(cwd);
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/usr/lib"));

        if let Ok(ld_path) = std::env::var("LD_LIBRARY_PATH") {
            paths.extend(ld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/usr/local/lib"));
        paths.push(PathBuf::from("/opt/homebrew/lib"));

        if let Ok(dyld_path) = std::env::var("DYLD_LIBRARY_PATH") {
            paths.extend(dyld_path.split(':').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(path) = std::env::var("PATH") {
            paths.extend(path.split(';').filter(|p| !p.is_empty()).map(PathBuf::from));
        }
    }

    paths
}

/// Construct the platform-specific library filename
pub fn library_filename(name: &str) -> String {
    #[cfg(target_os = "linux")]
    {
        if name.starts_with("lib") && name.ends_with(".so") {
            name.to_string()
        } else {
            format!("lib{}.so", name)
        }
    }

    #[cfg(target_os = "macos")]
    {
        if name.starts_with("lib") && name.ends_with(".dylib") {
            name.to_string()
        } else {
            format!("lib{}.dylib", name)
        }
    }

    #[cfg(target_os = "windows")]
    {
        if name.ends_with(".dll") {
            name.to_string()
        } else {
            format!("{}.dll", name)
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn test_library_filename() {
        assert_eq!(library_filename("telio"), "libtelio.so");
        assert_eq!(library_filename("libtelio.so"), "libtelio.so");
    }

    #[test]
    fn test_missing_library() {
        let loader = LibraryLoader::new();
        assert!(loader.find_library("definitely_not_a_telio_library_xyz").is_none());
        assert!(matches!(
            loader.load("definitely_not_a_telio_library_xyz"),
            Err(LoaderError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_nonexistent_path() {
        let err = DynamicLibrary::load("/nonexistent/libtelio.so").err().unwrap();
        assert!(matches!(err, LoaderError::Load { .. }));
    }

    #[test]
    fn test_custom_search_path_first() {
        let mut loader = LibraryLoader::new();
        loader.add_search_path("/opt/telio/lib");
        assert_eq!(loader.search_paths()[0], PathBuf::from("/opt/telio/lib"));
    }
}
