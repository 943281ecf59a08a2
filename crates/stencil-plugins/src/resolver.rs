//! Plugin module resolution.
//!
//! Turns a declaration's package reference into the location of compiled
//! plugin code. References starting with `.` or `/` are local paths checked
//! against the working directory; anything else is an installed package name
//! looked up in the plugin directories.

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::{PluginError, PluginResult};

/// Conventional entry-point file name inside a plugin directory, without extension.
pub const ENTRY_STEM: &str = "plugin";

/// Workspace-level plugin directory, relative to the working directory.
pub const WORKSPACE_PLUGIN_DIR: &str = ".stencil/plugins";

/// Default install hint; `{name}` is replaced with the package name.
pub const DEFAULT_INSTALL_COMMAND: &str = "stencil plugins install {name}";

/// Read-only filesystem lookups used during resolution.
///
/// Abstracted so tests can observe exactly which paths were touched.
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;
    /// Whether `path` is a directory.
    fn is_dir(&self, path: &Path) -> bool;
    /// Entries of a directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
}

/// [`FileSystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl FileSystem for RealFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }
}

/// Where resolved plugin code lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleSource {
    /// A local file under (or, for absolute references, anywhere on) the filesystem.
    LocalFile(PathBuf),
    /// An installed package.
    Package {
        /// Package name as declared.
        name: String,
        /// Compiled entry point.
        path: PathBuf,
    },
    /// Linked into the host binary; nothing on disk.
    Linked,
}

/// Outcome of resolving a package reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// The reference exactly as declared.
    pub reference: String,
    /// Where the code is.
    pub source: ModuleSource,
}

impl ResolvedModule {
    /// A module compiled into the host.
    #[must_use]
    pub fn linked(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            source: ModuleSource::Linked,
        }
    }

    /// Path of the compiled entry point, if the module lives on disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ModuleSource::LocalFile(path) | ModuleSource::Package { path, .. } => Some(path),
            ModuleSource::Linked => None,
        }
    }
}

/// Locates plugin code for a package reference.
pub trait ModuleResolver: Send + Sync {
    /// Resolve `reference` relative to `working_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::SecurityPathViolation`] or
    /// [`PluginError::ModuleResolution`].
    fn resolve(&self, reference: &str, working_dir: &Path) -> PluginResult<ResolvedModule>;
}

/// Whether a reference names a local path rather than an installed package.
#[must_use]
pub fn is_local_reference(reference: &str) -> bool {
    reference.starts_with('.') || reference.starts_with('/') || Path::new(reference).is_absolute()
}

/// Collapse `.` and `..` without touching the filesystem.
///
/// `..` at the root is dropped, matching how the OS treats `/..`.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                if !out.pop() && !path.is_absolute() {
                    out.push("..");
                }
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolves `./` and `/` references against the working directory.
pub struct LocalPathResolver {
    fs: Arc<dyn FileSystem>,
}

impl LocalPathResolver {
    /// Create a resolver probing through `fs`.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Compute the normalized target and enforce the working-directory boundary.
    ///
    /// Pure path arithmetic; performs no filesystem access.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::SecurityPathViolation`] when a relative
    /// reference escapes `working_dir`.
    pub fn check_boundary(&self, reference: &str, working_dir: &Path) -> PluginResult<PathBuf> {
        let root = normalize_lexically(working_dir);
        let target = Path::new(reference);
        if target.is_absolute() {
            return Ok(normalize_lexically(target));
        }
        let resolved = normalize_lexically(&root.join(target));
        if !resolved.starts_with(&root) {
            return Err(PluginError::SecurityPathViolation {
                reference: reference.to_string(),
                resolved,
                root,
            });
        }
        Ok(resolved)
    }
}

impl ModuleResolver for LocalPathResolver {
    fn resolve(&self, reference: &str, working_dir: &Path) -> PluginResult<ResolvedModule> {
        let path = self.check_boundary(reference, working_dir)?;

        if !self.fs.exists(&path) {
            return Err(PluginError::ModuleResolution {
                reference: reference.to_string(),
                message: format!("path does not exist: {}", path.display()),
            });
        }

        let entry = if self.fs.is_dir(&path) {
            find_entry_point(self.fs.as_ref(), &path).map_err(|message| {
                PluginError::ModuleResolution {
                    reference: reference.to_string(),
                    message,
                }
            })?
        } else {
            check_library_file(&path).map_err(|message| PluginError::ModuleResolution {
                reference: reference.to_string(),
                message,
            })?;
            path
        };

        debug!(reference, path = %entry.display(), "Resolved local plugin");
        Ok(ResolvedModule {
            reference: reference.to_string(),
            source: ModuleSource::LocalFile(entry),
        })
    }
}

impl fmt::Debug for LocalPathResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalPathResolver").finish_non_exhaustive()
    }
}

/// Resolves installed package names from the plugin directories.
pub struct PackageResolver {
    fs: Arc<dyn FileSystem>,
    search_dirs: Vec<PathBuf>,
    install_command: String,
}

impl PackageResolver {
    /// Create a resolver over `search_dirs`. Relative directories are
    /// interpreted against the working directory at resolve time.
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>, search_dirs: Vec<PathBuf>) -> Self {
        Self {
            fs,
            search_dirs,
            install_command: DEFAULT_INSTALL_COMMAND.to_string(),
        }
    }

    /// Override the install hint shown when a package is missing.
    #[must_use]
    pub fn with_install_command(mut self, command: impl Into<String>) -> Self {
        self.install_command = command.into();
        self
    }

    /// Directories searched, in order.
    #[must_use]
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }
}

impl ModuleResolver for PackageResolver {
    fn resolve(&self, reference: &str, working_dir: &Path) -> PluginResult<ResolvedModule> {
        if !is_valid_package_name(reference) {
            return Err(PluginError::ModuleResolution {
                reference: reference.to_string(),
                message: "invalid package name: must match [a-zA-Z0-9_.-]+ and not start with '.'"
                    .into(),
            });
        }

        let mut searched = Vec::with_capacity(self.search_dirs.len());
        for dir in &self.search_dirs {
            let dir = if dir.is_absolute() {
                dir.clone()
            } else {
                working_dir.join(dir)
            };
            let candidate = dir.join(reference);
            searched.push(dir);
            if !self.fs.is_dir(&candidate) {
                continue;
            }
            match find_entry_point(self.fs.as_ref(), &candidate) {
                Ok(path) => {
                    debug!(reference, path = %path.display(), "Resolved installed plugin");
                    return Ok(ResolvedModule {
                        reference: reference.to_string(),
                        source: ModuleSource::Package {
                            name: reference.to_string(),
                            path,
                        },
                    });
                },
                Err(message) => {
                    return Err(PluginError::ModuleResolution {
                        reference: reference.to_string(),
                        message,
                    });
                },
            }
        }

        let searched: Vec<String> = searched.iter().map(|d| d.display().to_string()).collect();
        Err(PluginError::ModuleResolution {
            reference: reference.to_string(),
            message: format!(
                "package is not installed (searched: {}); install it with `{}`",
                if searched.is_empty() {
                    "no plugin directories".to_string()
                } else {
                    searched.join(", ")
                },
                self.install_command.replace("{name}", reference)
            ),
        })
    }
}

impl fmt::Debug for PackageResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageResolver")
            .field("search_dirs", &self.search_dirs)
            .field("install_command", &self.install_command)
            .finish_non_exhaustive()
    }
}

/// Dispatches to [`LocalPathResolver`] or [`PackageResolver`] by reference shape.
#[derive(Debug)]
pub struct DefaultResolver {
    local: LocalPathResolver,
    packages: PackageResolver,
}

impl DefaultResolver {
    /// Build from explicit resolvers.
    #[must_use]
    pub fn new(local: LocalPathResolver, packages: PackageResolver) -> Self {
        Self { local, packages }
    }

    /// Real filesystem with the given package search directories.
    #[must_use]
    pub fn with_search_dirs(search_dirs: Vec<PathBuf>) -> Self {
        Self::with_fs(Arc::new(RealFs), search_dirs)
    }

    /// Custom filesystem with the given package search directories.
    #[must_use]
    pub fn with_fs(fs: Arc<dyn FileSystem>, search_dirs: Vec<PathBuf>) -> Self {
        Self {
            local: LocalPathResolver::new(Arc::clone(&fs)),
            packages: PackageResolver::new(fs, search_dirs),
        }
    }

    /// Override the install hint used by the package resolver.
    #[must_use]
    pub fn with_install_command(mut self, command: impl Into<String>) -> Self {
        self.packages = self.packages.with_install_command(command);
        self
    }
}

impl ModuleResolver for DefaultResolver {
    fn resolve(&self, reference: &str, working_dir: &Path) -> PluginResult<ResolvedModule> {
        if is_local_reference(reference) {
            self.local.resolve(reference, working_dir)
        } else {
            self.packages.resolve(reference, working_dir)
        }
    }
}

/// The user-level plugin directory, `~/.stencil/plugins`.
#[must_use]
pub fn user_plugin_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".stencil").join("plugins"))
}

/// Default package search path: workspace then user directory.
#[must_use]
pub fn default_plugin_dirs() -> Vec<PathBuf> {
    let mut dirs = vec![PathBuf::from(WORKSPACE_PLUGIN_DIR)];
    dirs.extend(user_plugin_dir());
    dirs
}

fn is_valid_package_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn is_library(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == DLL_EXTENSION)
}

fn check_library_file(path: &Path) -> Result<(), String> {
    if path.extension().is_some_and(|ext| ext == "rs") {
        return Err(format!(
            "{} is a Rust source file; build the plugin first (`cargo build --release`) and reference the compiled library",
            path.display()
        ));
    }
    if !is_library(path) {
        return Err(format!(
            "{} is not a compiled plugin library (expected a .{DLL_EXTENSION} file)",
            path.display()
        ));
    }
    Ok(())
}

/// Locate the compiled entry point in a plugin directory.
///
/// Prefers `plugin.<ext>`, then the first `lib*.<ext>` by name, then the same
/// search in `target/release/`.
fn find_entry_point(fs: &dyn FileSystem, dir: &Path) -> Result<PathBuf, String> {
    let conventional = dir.join(ENTRY_STEM).with_extension(DLL_EXTENSION);
    if fs.exists(&conventional) {
        return Ok(conventional);
    }

    for search in [dir.to_path_buf(), dir.join("target").join("release")] {
        if !fs.is_dir(&search) {
            continue;
        }
        let mut libs: Vec<PathBuf> = fs
            .read_dir(&search)
            .map_err(|e| format!("cannot read {}: {e}", search.display()))?
            .into_iter()
            .filter(|p| {
                is_library(p)
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(DLL_PREFIX))
            })
            .collect();
        libs.sort();
        if let Some(first) = libs.into_iter().next() {
            return Ok(first);
        }
    }

    if fs.exists(&dir.join("Cargo.toml")) || fs.exists(&dir.join("src")) {
        return Err(format!(
            "{} contains plugin sources but no compiled library; build it first (`cargo build --release`)",
            dir.display()
        ));
    }
    Err(format!(
        "{} has no plugin entry point (expected {ENTRY_STEM}.{DLL_EXTENSION})",
        dir.display()
    ))
}
