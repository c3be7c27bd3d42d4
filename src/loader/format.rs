use ahash::AHashMap;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const PACKAGE_MANIFEST: &str = "package.json";

/// The two top-level module semantics the host runtime supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleFormat {
    Module,
    Script,
}

impl ModuleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleFormat::Module => "module",
            ModuleFormat::Script => "script",
        }
    }

    /// Maps a manifest `type` value: `"module"` means module semantics,
    /// anything else (`"commonjs"` included) means script semantics.
    pub fn from_manifest_type(value: &str) -> ModuleFormat {
        if value == "module" {
            ModuleFormat::Module
        } else {
            ModuleFormat::Script
        }
    }
}

impl std::str::FromStr for ModuleFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "module" => Ok(ModuleFormat::Module),
            "script" => Ok(ModuleFormat::Script),
            other => Err(anyhow!("Unknown format \"{other}\", expected module or script")),
        }
    }
}

/// What a directory's manifest said, if anything.
enum ManifestVerdict {
    Format(ModuleFormat),
    /// Manifest absent, unparseable, or missing the `type` field.
    KeepSearching,
}

/// Resolves the module format of files by walking ancestor directories for
/// the nearest package manifest declaring a `type` field.
///
/// Lookups are memoized per directory for the lifetime of this resolver, so
/// resolving every file in a flat directory of N files costs one manifest
/// probe per ancestor rather than O(N * depth). The cache is write-once per
/// key and safe for concurrent readers; a racing recompute writes the same
/// value, so no stronger discipline is needed.
pub struct FormatResolver {
    cache: RwLock<AHashMap<PathBuf, ModuleFormat>>,
    manifest_probes: AtomicUsize,
}

impl Default for FormatResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatResolver {
    pub fn new() -> FormatResolver {
        FormatResolver {
            cache: RwLock::new(AHashMap::new()),
            manifest_probes: AtomicUsize::new(0),
        }
    }

    /// Resolves the format governing `path`.
    ///
    /// A path with a file extension is resolved from its parent directory;
    /// a directory path is resolved from itself. With no manifest anywhere
    /// up to the filesystem root the answer is script.
    pub fn resolve(&self, path: &Path) -> ModuleFormat {
        let dir = if path.extension().is_some() {
            match path.parent() {
                Some(parent) => parent.to_path_buf(),
                None => return ModuleFormat::Script,
            }
        } else {
            path.to_path_buf()
        };
        self.resolve_dir(&dir)
    }

    fn resolve_dir(&self, dir: &Path) -> ModuleFormat {
        if let Some(cached) = self.cached(dir) {
            return cached;
        }

        let format = match self.probe_manifest(dir) {
            ManifestVerdict::Format(format) => format,
            ManifestVerdict::KeepSearching => match dir.parent() {
                Some(parent) => self.resolve_dir(parent),
                None => ModuleFormat::Script,
            },
        };

        self.remember(dir, format);
        format
    }

    fn probe_manifest(&self, dir: &Path) -> ManifestVerdict {
        self.manifest_probes.fetch_add(1, Ordering::Relaxed);
        let manifest_path = dir.join(PACKAGE_MANIFEST);

        let contents = match fs::read_to_string(&manifest_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ManifestVerdict::KeepSearching;
            }
            Err(e) => {
                // Unexpected read errors do not abort the upward search.
                log::warn!(
                    "Could not read {}: {e}",
                    manifest_path.to_string_lossy()
                );
                return ManifestVerdict::KeepSearching;
            }
        };

        let manifest: serde_json::Value = match serde_json::from_str(&contents) {
            Ok(manifest) => manifest,
            Err(e) => {
                // A malformed manifest is treated as not found.
                log::warn!(
                    "Ignoring malformed {}: {e}",
                    manifest_path.to_string_lossy()
                );
                return ManifestVerdict::KeepSearching;
            }
        };

        match manifest.get("type") {
            Some(serde_json::Value::String(value)) if value.is_empty() => {
                ManifestVerdict::Format(ModuleFormat::Script)
            }
            Some(serde_json::Value::String(value)) => {
                ManifestVerdict::Format(ModuleFormat::from_manifest_type(value))
            }
            _ => ManifestVerdict::KeepSearching,
        }
    }

    fn cached(&self, dir: &Path) -> Option<ModuleFormat> {
        match self.cache.read() {
            Ok(cache) => cache.get(dir).copied(),
            Err(poisoned) => {
                log::warn!("format cache read lock poisoned; recovering");
                poisoned.into_inner().get(dir).copied()
            }
        }
    }

    fn remember(&self, dir: &Path, format: ModuleFormat) {
        match self.cache.write() {
            Ok(mut cache) => {
                cache.insert(dir.to_path_buf(), format);
            }
            Err(poisoned) => {
                log::warn!("format cache write lock poisoned; recovering");
                poisoned.into_inner().insert(dir.to_path_buf(), format);
            }
        }
    }

    /// Number of manifest read attempts performed so far. Memoization makes
    /// this observable: repeated lookups in a resolved subtree add nothing.
    pub fn manifest_probes(&self) -> usize {
        self.manifest_probes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_to_script_without_any_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FormatResolver::new();
        assert_eq!(resolver.resolve(dir.path()), ModuleFormat::Script);
    }

    #[test]
    fn module_manifest_governs_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_MANIFEST), r#"{"type": "module"}"#).unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let resolver = FormatResolver::new();
        assert_eq!(resolver.resolve(&nested.join("x.ts")), ModuleFormat::Module);
        assert_eq!(resolver.resolve(dir.path()), ModuleFormat::Module);
    }

    #[test]
    fn closer_manifest_overrides_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_MANIFEST), r#"{"type": "module"}"#).unwrap();
        let nested = dir.path().join("legacy");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(PACKAGE_MANIFEST), r#"{"type": "commonjs"}"#).unwrap();

        let resolver = FormatResolver::new();
        assert_eq!(resolver.resolve(&nested.join("x.ts")), ModuleFormat::Script);
        assert_eq!(resolver.resolve(&dir.path().join("y.ts")), ModuleFormat::Module);
    }

    #[test]
    fn malformed_manifest_continues_upward() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_MANIFEST), r#"{"type": "module"}"#).unwrap();
        let nested = dir.path().join("broken");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(PACKAGE_MANIFEST), "{ not json").unwrap();

        let resolver = FormatResolver::new();
        assert_eq!(resolver.resolve(&nested.join("x.ts")), ModuleFormat::Module);
    }

    #[test]
    fn empty_type_field_falls_back_to_script() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_MANIFEST), r#"{"type": ""}"#).unwrap();

        let resolver = FormatResolver::new();
        assert_eq!(resolver.resolve(dir.path()), ModuleFormat::Script);
    }

    #[test]
    fn manifest_without_type_field_continues_upward() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PACKAGE_MANIFEST), r#"{"type": "module"}"#).unwrap();
        let nested = dir.path().join("pkg");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join(PACKAGE_MANIFEST), r#"{"name": "pkg"}"#).unwrap();

        let resolver = FormatResolver::new();
        assert_eq!(resolver.resolve(&nested.join("x.ts")), ModuleFormat::Module);
    }

    #[test]
    fn memoizes_manifest_probes_per_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FormatResolver::new();

        resolver.resolve(&dir.path().join("file0.ts"));
        let probes_after_first = resolver.manifest_probes();
        assert!(probes_after_first > 0);

        for i in 1..100 {
            resolver.resolve(&dir.path().join(format!("file{i}.ts")));
        }
        // Every later lookup in the same directory hits the cache.
        assert_eq!(resolver.manifest_probes(), probes_after_first);
    }
}
