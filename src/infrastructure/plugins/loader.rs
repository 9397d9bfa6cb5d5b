//! Module loader - unpacks hub archives and removes installed modules
//!
//! Everything here is blocking filesystem work; async callers run it on the
//! blocking pool.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use crate::application::errors::ModuleError;
use super::metadata;

/// Entries of an unpacked archive that are never the module itself
const ARCHIVE_NOISE: [&str; 4] = [
    "README.md",
    "LICENSE",
    metadata::METADATA_FILE,
    metadata::REQUIREMENTS_FILE,
];

/// Write the archive into `cache_dir` and unpack it there
pub fn extract_archive(cache_dir: &Path, name: &str, data: &[u8]) -> Result<(), ModuleError> {
    std::fs::create_dir_all(cache_dir)?;

    let archive_path = cache_dir.join(format!("{}.zip", normalize_name(name)));
    std::fs::write(&archive_path, data)?;

    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| ModuleError::Archive(format!("Failed to read archive for {}: {}", name, e)))?;
    archive
        .extract(cache_dir)
        .map_err(|e| ModuleError::Archive(format!("Failed to unpack archive for {}: {}", name, e)))?;

    std::fs::remove_file(&archive_path)?;
    tracing::debug!("Unpacked {} entries for {} into {}", archive.len(), name, cache_dir.display());
    Ok(())
}

/// Locate the module inside an unpacked archive: the first directory,
/// otherwise the first plain file
pub fn find_module(cache_dir: &Path) -> Result<(PathBuf, bool), ModuleError> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(cache_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| {
                    !n.starts_with('_')
                        && !n.starts_with('.')
                        && !ARCHIVE_NOISE.contains(&n)
                        && !metadata::is_sidecar(n)
                })
                .unwrap_or(false)
        })
        .collect();
    entries.sort();

    if let Some(dir) = entries.iter().find(|p| p.is_dir()) {
        return Ok((dir.clone(), true));
    }
    entries
        .into_iter()
        .find(|p| p.is_file())
        .map(|p| (p, false))
        .ok_or_else(|| ModuleError::Archive(format!("No module found in {}", cache_dir.display())))
}

/// Installed directory name: separators become `_`, anything outside
/// `[A-Za-z0-9_.]` too, and surrounding underscores are dropped
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' { c } else { '_' })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Delete a module file or directory, plus a single-file module's sidecars
pub fn remove_module(path: &Path, is_dir: bool) -> Result<(), ModuleError> {
    if is_dir {
        tracing::info!("Removing directory {}", path.display());
        std::fs::remove_dir_all(path)?;
        return Ok(());
    }

    tracing::info!("Removing file {}", path.display());
    std::fs::remove_file(path)?;
    for sidecar in [metadata::sidecar_path(path, false), metadata::requirements_path(path, false)] {
        if sidecar.is_file() {
            std::fs::remove_file(&sidecar)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn archive(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("help-desk"), "help_desk");
        assert_eq!(normalize_name("_weather_"), "weather");
        assert_eq!(normalize_name("a b/c"), "a_b_c");
        assert_eq!(normalize_name("echo.py"), "echo.py");
    }

    #[test]
    fn test_extract_and_find_directory() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("weather");
        let data = archive(&[
            ("README.md", "docs"),
            ("weather-main/__init__.py", ""),
            ("weather-main/metadata.json", r#"{"pack": "module.weather"}"#),
        ]);

        extract_archive(&cache, "weather", &data).unwrap();
        assert!(!cache.join("weather.zip").exists());

        let (path, is_dir) = find_module(&cache).unwrap();
        assert!(is_dir);
        assert_eq!(path, cache.join("weather-main"));
    }

    #[test]
    fn test_find_single_file_module() {
        let tmp = TempDir::new().unwrap();
        let data = archive(&[("LICENSE", "MIT"), ("echo.py", ""), ("echo-metadata.json", "{}")]);
        extract_archive(tmp.path(), "echo", &data).unwrap();

        let (path, is_dir) = find_module(tmp.path()).unwrap();
        assert!(!is_dir);
        assert_eq!(path, tmp.path().join("echo.py"));
    }

    #[test]
    fn test_requirements_file_is_not_the_module() {
        let tmp = TempDir::new().unwrap();
        let data = archive(&[("requirements.txt", "httpx\n"), ("zeta.py", "")]);
        extract_archive(tmp.path(), "zeta", &data).unwrap();

        let (path, is_dir) = find_module(tmp.path()).unwrap();
        assert!(!is_dir);
        assert_eq!(path, tmp.path().join("zeta.py"));

        let lone = TempDir::new().unwrap();
        extract_archive(lone.path(), "reqs", &archive(&[("requirements.txt", "httpx\n")])).unwrap();
        assert!(matches!(find_module(lone.path()), Err(ModuleError::Archive(_))));
    }

    #[test]
    fn test_garbage_archive_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let result = extract_archive(tmp.path(), "broken", b"definitely not a zip");
        assert!(matches!(result, Err(ModuleError::Archive(_))));
    }

    #[test]
    fn test_empty_archive_has_no_module() {
        let tmp = TempDir::new().unwrap();
        extract_archive(tmp.path(), "empty", &archive(&[("README.md", "")])).unwrap();
        assert!(matches!(find_module(tmp.path()), Err(ModuleError::Archive(_))));
    }

    #[test]
    fn test_remove_single_file_with_sidecars() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("echo.py");
        std::fs::write(&file, "").unwrap();
        std::fs::write(tmp.path().join("echo-metadata.json"), "{}").unwrap();

        remove_module(&file, false).unwrap();
        assert!(!file.exists());
        assert!(!tmp.path().join("echo-metadata.json").exists());
    }
}
