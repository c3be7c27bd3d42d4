use crate::loader::format::ModuleFormat;
use anyhow::{Result, anyhow};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Classification of a recognized source file, derived from its extension.
///
/// This replaces extension-keyed handler registration: callers map a path or
/// specifier to a `SourceKind` once and match on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// `.ts`: emitted extension depends on the ambient format.
    Primary,
    /// `.mts`: always emitted as `.mjs`, regardless of ambient format.
    ModuleVariant,
    /// `.cts`: always emitted as `.cjs`, regardless of ambient format.
    ScriptVariant,
}

impl SourceKind {
    pub fn of_specifier(specifier: &str) -> Option<SourceKind> {
        // Order matters: `.mts`/`.cts` also end in `ts`.
        if specifier.ends_with(".mts") {
            Some(SourceKind::ModuleVariant)
        } else if specifier.ends_with(".cts") {
            Some(SourceKind::ScriptVariant)
        } else if specifier.ends_with(".ts") {
            Some(SourceKind::Primary)
        } else {
            None
        }
    }

    pub fn of_path(path: &Path) -> Option<SourceKind> {
        SourceKind::of_specifier(&path.to_string_lossy())
    }

    pub fn source_extension(&self) -> &'static str {
        match self {
            SourceKind::Primary => "ts",
            SourceKind::ModuleVariant => "mts",
            SourceKind::ScriptVariant => "cts",
        }
    }

    /// The artifact extension for this source kind under the given format.
    /// A pure function of (source kind, format).
    pub fn emitted_extension(&self, format: ModuleFormat) -> &'static str {
        match (self, format) {
            (SourceKind::Primary, ModuleFormat::Script) => "js",
            (SourceKind::Primary, ModuleFormat::Module) => "mjs",
            (SourceKind::ModuleVariant, _) => "mjs",
            (SourceKind::ScriptVariant, _) => "cjs",
        }
    }
}

pub fn is_source_file(path: &Path) -> bool {
    SourceKind::of_path(path).is_some() && !is_declaration_file(path)
}

/// Declaration files (`.d.ts`, `.d.mts`, `.d.cts`) carry no executable code.
pub fn is_declaration_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".d.ts") || name.ends_with(".d.mts") || name.ends_with(".d.cts")
}

/// Recursively lists source files under `dir`, skipping node_modules and
/// declaration files.
pub fn source_files_list(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    let entries = fs::read_dir(dir)
        .map_err(|e| anyhow!("Could not read directory {}: {e}", dir.to_string_lossy()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() != "node_modules" {
                files.extend(source_files_list(&path)?);
            }
        } else if is_source_file(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Does the specifier look like a relative or absolute path reference?
pub fn is_relative_specifier(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

pub fn file_url(path: &Path) -> String {
    let path = path.to_string_lossy().replace('\\', "/");
    if path.starts_with('/') {
        format!("file://{path}")
    } else {
        format!("file:///{path}")
    }
}

pub fn url_to_path(url: &str) -> Result<PathBuf> {
    let stripped = url
        .strip_prefix("file://")
        .ok_or_else(|| anyhow!("Not a file URL: {url}"))?;
    Ok(PathBuf::from(stripped))
}

/// Resolves `specifier` against a parent file URL, the way a module host
/// resolves relative references: relative to the parent's directory, with
/// `.` and `..` segments folded away.
pub fn join_url(parent_url: &str, specifier: &str) -> Result<String> {
    if specifier.starts_with('/') {
        return Ok(format!("file://{specifier}"));
    }
    let parent_path = url_to_path(parent_url)?;
    let parent_dir = if parent_path.extension().is_some() {
        parent_path.parent().unwrap_or(Path::new("/")).to_path_buf()
    } else {
        parent_path
    };
    Ok(file_url(&normalize_path(&parent_dir.join(specifier))))
}

/// Lexically folds `.` and `..` components. No filesystem access.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// The relative module reference that reaches `target` from a file living
/// in `from_dir`. Both paths must be absolute and lexically normalized.
pub fn relative_specifier(from_dir: &Path, target: &Path) -> String {
    let from: Vec<Component> = from_dir.components().collect();
    let to: Vec<Component> = target.components().collect();
    let shared = from.iter().zip(&to).take_while(|(a, b)| *a == *b).count();

    let mut parts: Vec<String> = from[shared..].iter().map(|_| "..".to_string()).collect();
    parts.extend(
        to[shared..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}

/// Maps a source file to its artifact path under `out_dir`, mirroring the
/// layout relative to `src_root` and swapping in the emitted extension.
pub fn emitted_path(
    source: &Path,
    src_root: &Path,
    out_dir: &Path,
    format: ModuleFormat,
) -> Result<PathBuf> {
    let kind = SourceKind::of_path(source)
        .ok_or_else(|| anyhow!("Not a source file: {}", source.to_string_lossy()))?;
    let relative = source.strip_prefix(src_root).unwrap_or_else(|_| {
        // A file outside the source root (e.g. an alias target) is flattened.
        Path::new(source.file_name().expect("source file has a name"))
    });
    let mut out = out_dir.join(relative);
    out.set_extension(kind.emitted_extension(format));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_source_extensions() {
        assert_eq!(SourceKind::of_specifier("./a.ts"), Some(SourceKind::Primary));
        assert_eq!(SourceKind::of_specifier("./a.mts"), Some(SourceKind::ModuleVariant));
        assert_eq!(SourceKind::of_specifier("./a.cts"), Some(SourceKind::ScriptVariant));
        assert_eq!(SourceKind::of_specifier("./a.js"), None);
        assert_eq!(SourceKind::of_specifier("lodash"), None);
    }

    #[test]
    fn emitted_extension_is_pure_in_kind_and_format() {
        assert_eq!(SourceKind::Primary.emitted_extension(ModuleFormat::Script), "js");
        assert_eq!(SourceKind::Primary.emitted_extension(ModuleFormat::Module), "mjs");
        assert_eq!(SourceKind::ModuleVariant.emitted_extension(ModuleFormat::Script), "mjs");
        assert_eq!(SourceKind::ModuleVariant.emitted_extension(ModuleFormat::Module), "mjs");
        assert_eq!(SourceKind::ScriptVariant.emitted_extension(ModuleFormat::Script), "cjs");
        assert_eq!(SourceKind::ScriptVariant.emitted_extension(ModuleFormat::Module), "cjs");
    }

    #[test]
    fn declaration_files_are_not_source_files() {
        assert!(!is_source_file(Path::new("src/types.d.ts")));
        assert!(is_source_file(Path::new("src/types.ts")));
    }

    #[test]
    fn joins_relative_specifier_against_parent_url() {
        let joined = join_url("file:///project/src/main.ts", "./util/x.ts").unwrap();
        assert_eq!(joined, "file:///project/src/util/x.ts");

        let joined = join_url("file:///project/src/main.ts", "../other.ts").unwrap();
        assert_eq!(joined, "file:///project/other.ts");
    }

    #[test]
    fn relative_specifier_reaches_siblings_and_ancestors() {
        assert_eq!(
            relative_specifier(Path::new("/stage/src"), Path::new("/stage/src/dep.js")),
            "./dep.js"
        );
        assert_eq!(
            relative_specifier(Path::new("/stage/src"), Path::new("/stage/lib/helper.mjs")),
            "../lib/helper.mjs"
        );
        assert_eq!(
            relative_specifier(Path::new("/stage/a/b"), Path::new("/stage/a/b/c/d.js")),
            "./c/d.js"
        );
    }

    #[test]
    fn emitted_path_mirrors_layout() {
        let out = emitted_path(
            Path::new("/proj/src/deep/a.ts"),
            Path::new("/proj/src"),
            Path::new("/proj/dist"),
            ModuleFormat::Script,
        )
        .unwrap();
        assert_eq!(out, PathBuf::from("/proj/dist/deep/a.js"));

        let out = emitted_path(
            Path::new("/proj/src/b.mts"),
            Path::new("/proj/src"),
            Path::new("/proj/dist"),
            ModuleFormat::Script,
        )
        .unwrap();
        assert_eq!(out, PathBuf::from("/proj/dist/b.mjs"));
    }
}
