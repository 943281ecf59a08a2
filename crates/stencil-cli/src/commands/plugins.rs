//! `stencil plugins`: list loaded plugins and install compiled ones.

use std::env::consts::DLL_EXTENSION;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::json;
use stencil_plugins::resolver::{ENTRY_STEM, WORKSPACE_PLUGIN_DIR, user_plugin_dir};
use stencil_plugins::{
    LocalPathResolver, ModuleResolver, Owner, PluginDeclaration, PluginId, RealFs,
};
use tracing::info;

use super::{OutputFormat, failure_json, print_json};
use crate::host::Host;
use crate::theme::Theme;

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Commands a plugin attached to the tree.
fn commands_of<'a>(host: &'a Host, id: &PluginId) -> Vec<&'a str> {
    let owner = Owner::Plugin(id.clone());
    host.tree
        .commands()
        .iter()
        .filter(|c| host.loader.commands().owner_of(&c.name) == Some(&owner))
        .map(|c| c.name.as_str())
        .collect()
}

pub(crate) fn list_plugins(
    host: &Host,
    declarations: &[PluginDeclaration],
    format: OutputFormat,
) -> Result<()> {
    let plugins = host.loader.registry().all_plugins();
    let disabled: Vec<&str> = declarations
        .iter()
        .filter(|d| !d.enabled)
        .map(|d| d.package_reference.as_str())
        .collect();

    if format == OutputFormat::Json {
        let loaded: Vec<_> = plugins
            .iter()
            .map(|(id, plugin)| {
                let meta = plugin.metadata();
                json!({
                    "id": id.as_str(),
                    "name": meta.name,
                    "version": meta.version,
                    "description": meta.description,
                    "active": host.loader.active_plugins().contains(id),
                    "commands": commands_of(host, id),
                })
            })
            .collect();
        let failed: Vec<_> = host.report.failures.iter().map(failure_json).collect();
        return print_json(&json!({ "loaded": loaded, "failed": failed, "disabled": disabled }));
    }

    if plugins.is_empty() && host.report.failures.is_empty() && disabled.is_empty() {
        println!("{}", Theme::info("No plugins declared"));
        return Ok(());
    }

    println!("{}", Theme::header("Plugins"));
    println!("  {:<20} {:<10} {:<10} COMMANDS", "ID", "VERSION", "STATE");
    println!("{}", Theme::separator());
    for (id, plugin) in plugins {
        let state = if host.loader.active_plugins().contains(id) {
            Theme::success("active")
        } else {
            Theme::warning("inactive")
        };
        println!(
            "  {:<20} {:<10} {:<10} {}",
            id,
            plugin.metadata().version,
            state,
            commands_of(host, id).join(", ")
        );
    }
    for failure in &host.report.failures {
        println!("  {}", Theme::error(&failure.to_string()));
    }
    for reference in &disabled {
        println!("  {}", Theme::dimmed(&format!("{reference} (disabled)")));
    }
    println!("\n{}", Theme::dimmed(&host.report.summary()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Install
// ---------------------------------------------------------------------------

/// Package name derived from a plugin path: the directory name, or the
/// library file stem without its `lib` prefix.
fn default_package_name(source: &Path) -> Option<String> {
    let stem = if source.is_dir() {
        source.file_name()?
    } else {
        source.file_stem()?
    };
    let stem = stem.to_str()?;
    let name = if source.is_dir() {
        stem
    } else {
        stem.strip_prefix("lib").unwrap_or(stem)
    };
    Some(name.to_string())
}

/// Directory that receives installed packages.
fn resolve_target_root(working_dir: &Path, workspace: bool) -> Result<PathBuf> {
    if workspace {
        Ok(working_dir.join(WORKSPACE_PLUGIN_DIR))
    } else {
        user_plugin_dir().context("cannot determine the home directory for the user plugin dir")
    }
}

/// Copy a compiled plugin into `<root>/<name>/plugin.<ext>` so it resolves as package `name`.
pub(crate) fn install_into(
    source: &Path,
    name: Option<&str>,
    root: &Path,
    working_dir: &Path,
) -> Result<PathBuf> {
    let source = working_dir.join(source);
    let resolver = LocalPathResolver::new(Arc::new(RealFs));
    let resolved = resolver.resolve(&source.to_string_lossy(), working_dir)?;
    let library = resolved
        .path()
        .context("resolved plugin has no library file")?;

    let name = match name {
        Some(name) => name.to_string(),
        None => default_package_name(&source).with_context(|| {
            format!("cannot derive a package name from {}; pass --name", source.display())
        })?,
    };
    if !PluginId::is_valid_id(&name) {
        bail!("invalid package name '{name}': must match [a-zA-Z0-9_-]+");
    }

    let target_dir = root.join(&name);
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("failed to create {}", target_dir.display()))?;
    let target = target_dir.join(ENTRY_STEM).with_extension(DLL_EXTENSION);
    std::fs::copy(library, &target).with_context(|| {
        format!("failed to copy {} to {}", library.display(), target.display())
    })?;

    info!(package = %name, path = %target.display(), "Installed plugin");
    Ok(target)
}

pub(crate) fn install_plugin(
    source: &Path,
    name: Option<&str>,
    workspace: bool,
    working_dir: &Path,
) -> Result<()> {
    let root = resolve_target_root(working_dir, workspace)?;
    let target = install_into(source, name, &root, working_dir)?;
    let package = target
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    println!("{}", Theme::success(&format!("Installed {package} to {}", target.display())));
    println!(
        "{}",
        Theme::dimmed(&format!("Add it to stencil.toml:\n\n[[plugins]]\npackage = \"{package}\""))
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib_file(dir: &Path, stem: &str) -> PathBuf {
        let path = dir.join(format!("lib{stem}.{DLL_EXTENSION}"));
        std::fs::write(&path, b"compiled").unwrap();
        path
    }

    #[test]
    fn package_name_from_path() {
        let tmp = tempfile::tempdir().unwrap();
        let lib = lib_file(tmp.path(), "net");
        assert_eq!(default_package_name(&lib).as_deref(), Some("net"));

        let dir = tmp.path().join("azure-network");
        std::fs::create_dir(&dir).unwrap();
        assert_eq!(default_package_name(&dir).as_deref(), Some("azure-network"));
    }

    #[test]
    fn install_copies_library_as_package_entry() {
        let work = tempfile::tempdir().unwrap();
        let build = work.path().join("target").join("release");
        std::fs::create_dir_all(&build).unwrap();
        lib_file(&build, "net");
        let root = work.path().join("installed");

        let lib = format!("target/release/libnet.{DLL_EXTENSION}");
        let target = install_into(Path::new(&lib), None, &root, work.path()).unwrap();

        assert_eq!(target, root.join("net").join(format!("plugin.{DLL_EXTENSION}")));
        assert_eq!(std::fs::read(&target).unwrap(), b"compiled");
    }

    #[test]
    fn install_from_plugin_directory_with_name() {
        let work = tempfile::tempdir().unwrap();
        let crate_dir = work.path().join("plugins").join("net");
        let build = crate_dir.join("target").join("release");
        std::fs::create_dir_all(&build).unwrap();
        lib_file(&build, "stencil_net");
        let root = work.path().join("installed");

        let target =
            install_into(Path::new("plugins/net"), Some("network"), &root, work.path()).unwrap();
        assert!(target.starts_with(root.join("network")));
    }

    #[test]
    fn install_rejects_sources_and_bad_names() {
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("plugin.rs"), b"fn main() {}").unwrap();
        let root = work.path().join("installed");

        let err = install_into(Path::new("plugin.rs"), None, &root, work.path()).unwrap_err();
        assert!(err.to_string().contains("cargo build --release"), "{err}");

        lib_file(work.path(), "net");
        let lib = format!("libnet.{DLL_EXTENSION}");
        let err = install_into(Path::new(&lib), Some("../escape"), &root, work.path()).unwrap_err();
        assert!(err.to_string().contains("invalid package name"));
        assert!(!root.exists());
    }
}
