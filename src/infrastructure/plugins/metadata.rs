//! Metadata store - reads and writes the sidecar descriptor of each module
//!
//! A directory module keeps its descriptor at `<dir>/metadata.json`; a
//! single-file module at `<parent>/<stem>-metadata.json`. Malformed or
//! missing sidecars are replaced by a synthesized descriptor so one broken
//! module never blocks discovery of the others.

use std::path::{Path, PathBuf};
use serde::Serialize;
use crate::application::errors::ModuleError;
use crate::domain::entities::ModuleDescriptor;

pub const METADATA_FILE: &str = "metadata.json";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";
const METADATA_SUFFIX: &str = "-metadata.json";
const REQUIREMENTS_SUFFIX: &str = "-requirements.txt";

/// Module name derived from its path
pub fn stem(path: &Path, is_dir: bool) -> String {
    let stem = if is_dir { path.file_name() } else { path.file_stem() };
    stem.and_then(|s| s.to_str()).unwrap_or_default().to_string()
}

pub fn sidecar_path(path: &Path, is_dir: bool) -> PathBuf {
    if is_dir {
        path.join(METADATA_FILE)
    } else {
        sibling(path, METADATA_SUFFIX)
    }
}

pub fn requirements_path(path: &Path, is_dir: bool) -> PathBuf {
    if is_dir {
        path.join(REQUIREMENTS_FILE)
    } else {
        sibling(path, REQUIREMENTS_SUFFIX)
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{}{}", stem(path, false), suffix))
}

/// Whether a file name belongs to a single-file module's sidecars
pub fn is_sidecar(file_name: &str) -> bool {
    file_name.ends_with(METADATA_SUFFIX) || file_name.ends_with(REQUIREMENTS_SUFFIX)
}

/// Strict read: missing or invalid sidecars are errors
pub fn read(path: &Path, is_dir: bool) -> Result<ModuleDescriptor, ModuleError> {
    let sidecar = sidecar_path(path, is_dir);
    let content = std::fs::read_to_string(&sidecar)?;
    let descriptor: ModuleDescriptor = serde_json::from_str(&content)
        .map_err(|e| ModuleError::Validation(format!("{}: {}", sidecar.display(), e)))?;
    descriptor
        .validate()
        .map_err(|e| ModuleError::Validation(format!("{}: {}", sidecar.display(), e)))?;
    Ok(descriptor)
}

/// Read the descriptor, synthesizing and persisting a default one when the
/// sidecar is missing or invalid. Never fails.
pub fn read_or_synthesize(path: &Path, is_dir: bool) -> ModuleDescriptor {
    match read(path, is_dir) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            match &e {
                ModuleError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!("No metadata for {}, synthesizing", path.display());
                }
                _ => tracing::warn!("Discarding metadata of {}: {}", path.display(), e),
            }
            let descriptor = synthesize(path, is_dir);
            if let Err(e) = write(path, is_dir, &descriptor) {
                tracing::warn!("Failed to persist metadata for {}: {}", path.display(), e);
            }
            descriptor
        }
    }
}

/// Default descriptor for a module without usable metadata
pub fn synthesize(path: &Path, is_dir: bool) -> ModuleDescriptor {
    let stem = stem(path, is_dir);
    let mut descriptor = ModuleDescriptor::new(stem.clone(), format!("module.{}", stem));
    descriptor.has_remote_dependencies = requirements_path(path, is_dir).is_file();
    descriptor
}

/// Serialize canonically: declared key order, 4-space indent, UTF-8
pub fn write(path: &Path, is_dir: bool, descriptor: &ModuleDescriptor) -> Result<(), ModuleError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    descriptor
        .serialize(&mut serializer)
        .map_err(|e| ModuleError::Validation(e.to_string()))?;
    buf.push(b'\n');
    std::fs::write(sidecar_path(path, is_dir), buf)?;
    Ok(())
}

/// Find a pack's module on disk: `<root>/<suffix>` directory first, then a
/// `<suffix>.*` file, then any entry whose sidecar declares the pack.
/// Returns the path and whether it is a directory.
pub fn locate(root: &Path, pack: &str) -> Option<(PathBuf, bool)> {
    let suffix = pack.split_once('.').map(|(_, rest)| rest).unwrap_or(pack);
    let candidate = root.join(suffix);
    if candidate.is_dir() {
        return Some((candidate, true));
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with('_') && !n.starts_with('.') && !is_sidecar(n))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    if let Some(file) = entries.iter().find(|p| p.is_file() && stem(p, false) == suffix) {
        return Some((file.clone(), false));
    }
    entries.into_iter().find_map(|p| {
        let is_dir = p.is_dir();
        match read(&p, is_dir) {
            Ok(descriptor) if descriptor.pack == pack => Some((p, is_dir)),
            _ => None,
        }
    })
}

/// Requirement specifiers, one per non-empty, non-comment line
pub fn read_requirements(path: &Path, is_dir: bool) -> Vec<String> {
    std::fs::read_to_string(requirements_path(path, is_dir))
        .map(|content| {
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
