//! The async resolve/load hook pair of the module-load interceptor.
//!
//! Both hooks follow the host protocol: a handled specifier/URL is returned
//! with `short_circuit` set so the host performs no default handling of its
//! own; anything else is delegated to `next`.

use crate::helpers::{self, SourceKind};
use crate::loader::Loader;
use crate::loader::format::ModuleFormat;
use crate::transform::{TranspileOptions, TransformEngine};
use anyhow::Result;

#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    pub parent_url: Option<String>,
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub url: String,
    pub short_circuit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LoadContext {
    pub format: Option<ModuleFormat>,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub format: ModuleFormat,
    pub short_circuit: bool,
    /// `None` for script-format files: their compilation is delegated to
    /// the synchronous legacy path, avoiding a double transpilation.
    pub source: Option<String>,
}

impl<E: TransformEngine> Loader<E> {
    /// Resolve hook. Specifiers with a recognized source extension are
    /// handled here: the alias table is consulted first (first existing
    /// candidate wins), then the raw specifier is resolved against the
    /// parent module's URL, or the base URL when there is no parent.
    pub async fn resolve(
        &self,
        specifier: &str,
        context: &ResolveContext,
        next: impl FnOnce(&str) -> Result<Resolution>,
    ) -> Result<Resolution> {
        if SourceKind::of_specifier(specifier).is_some() {
            if let Some(path) = self.aliases.resolve(specifier) {
                log::debug!("Alias resolved {specifier} -> {}", path.to_string_lossy());
                return Ok(Resolution {
                    url: helpers::file_url(&path),
                    short_circuit: true,
                });
            }

            let parent_url = context.parent_url.as_deref().unwrap_or(&self.base_url);
            return Ok(Resolution {
                url: helpers::join_url(parent_url, specifier)?,
                short_circuit: true,
            });
        }

        next(specifier)
    }

    /// Load hook. URLs with a recognized source extension are handled here;
    /// the format is forced by variant extensions and otherwise asked of
    /// the package-format resolver. Script-format files short-circuit with
    /// no source; module-format files are read and transpiled with module
    /// overrides.
    pub async fn load(
        &self,
        url: &str,
        _context: &LoadContext,
        next: impl FnOnce(&str) -> Result<LoadOutcome>,
    ) -> Result<LoadOutcome> {
        let Some(kind) = SourceKind::of_specifier(url) else {
            return next(url);
        };

        let format = match kind {
            SourceKind::ModuleVariant => ModuleFormat::Module,
            SourceKind::ScriptVariant => ModuleFormat::Script,
            SourceKind::Primary => self.formats.resolve(&helpers::url_to_path(url)?),
        };

        if format == ModuleFormat::Script {
            return Ok(LoadOutcome {
                format,
                short_circuit: true,
                source: None,
            });
        }

        let path = helpers::url_to_path(url)?;
        let options = TranspileOptions::for_format(&self.config, ModuleFormat::Module);
        let result = self.engine.transpile_file(&path, &options)?;

        Ok(LoadOutcome {
            format: result.format,
            short_circuit: true,
            source: Some(result.code),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::transform::test_engine::{EchoEngine, FailingEngine};
    use anyhow::anyhow;
    use futures::executor::block_on;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    fn loader_in(dir: &Path) -> Loader<EchoEngine> {
        let config = CompilerConfig {
            base_url: dir.to_path_buf(),
            ..CompilerConfig::default()
        };
        Loader::new(config, EchoEngine::default())
    }

    fn no_next_resolve(specifier: &str) -> Result<Resolution> {
        Err(anyhow!("unexpected delegation for {specifier}"))
    }

    fn no_next_load(url: &str) -> Result<LoadOutcome> {
        Err(anyhow!("unexpected delegation for {url}"))
    }

    #[test]
    fn resolve_short_circuits_source_specifiers_against_parent() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path());

        let context = ResolveContext {
            parent_url: Some("file:///proj/src/main.ts".to_string()),
            conditions: vec![],
        };
        let resolution =
            block_on(loader.resolve("./dep.ts", &context, no_next_resolve)).unwrap();
        assert!(resolution.short_circuit);
        assert_eq!(resolution.url, "file:///proj/src/dep.ts");
    }

    #[test]
    fn resolve_falls_back_to_base_url_without_parent() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path());

        let resolution =
            block_on(loader.resolve("./main.ts", &ResolveContext::default(), no_next_resolve))
                .unwrap();
        assert!(resolution.short_circuit);
        assert_eq!(resolution.url, helpers::file_url(&dir.path().join("main.ts")));
    }

    #[test]
    fn resolve_delegates_non_matching_specifiers() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path());

        let resolution = block_on(loader.resolve(
            "typescript",
            &ResolveContext::default(),
            |specifier| {
                Ok(Resolution {
                    url: format!("node:{specifier}"),
                    short_circuit: false,
                })
            },
        ))
        .unwrap();
        assert!(!resolution.short_circuit);
        assert_eq!(resolution.url, "node:typescript");
    }

    #[test]
    fn resolve_prefers_existing_alias_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let vendor = dir.path().join("vendor").join("lib");
        fs::create_dir_all(&vendor).unwrap();
        fs::write(vendor.join("foo.ts"), "export {};").unwrap();

        let mut paths = HashMap::new();
        paths.insert(
            "@lib/*".to_string(),
            vec!["./src/lib/*".to_string(), "./vendor/lib/*".to_string()],
        );
        let config = CompilerConfig {
            base_url: dir.path().to_path_buf(),
            paths,
            ..CompilerConfig::default()
        };
        let loader = Loader::new(config, EchoEngine::default());

        let resolution =
            block_on(loader.resolve("@lib/foo.ts", &ResolveContext::default(), no_next_resolve))
                .unwrap();
        assert!(resolution.short_circuit);
        assert_eq!(resolution.url, helpers::file_url(&vendor.join("foo.ts")));
    }

    #[test]
    fn load_forces_format_for_variant_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mts"), "export const x = 1;").unwrap();
        let loader = loader_in(dir.path());

        let url = helpers::file_url(&dir.path().join("a.mts"));
        let outcome = block_on(loader.load(&url, &LoadContext::default(), no_next_load)).unwrap();
        assert_eq!(outcome.format, ModuleFormat::Module);
        assert!(outcome.short_circuit);
        assert!(outcome.source.is_some());

        let url = helpers::file_url(&dir.path().join("b.cts"));
        let outcome = block_on(loader.load(&url, &LoadContext::default(), no_next_load)).unwrap();
        assert_eq!(outcome.format, ModuleFormat::Script);
        // Script files are compiled by the legacy path, not here.
        assert!(outcome.source.is_none());
    }

    #[test]
    fn load_asks_the_format_resolver_for_primary_sources() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"type": "module"}"#).unwrap();
        fs::write(dir.path().join("main.ts"), "export const x = 1;").unwrap();
        let loader = loader_in(dir.path());

        let url = helpers::file_url(&dir.path().join("main.ts"));
        let outcome = block_on(loader.load(&url, &LoadContext::default(), no_next_load)).unwrap();
        assert_eq!(outcome.format, ModuleFormat::Module);
        let source = outcome.source.unwrap();
        assert!(source.starts_with("/* nodenext */"), "{source}");
    }

    #[test]
    fn load_delegates_non_matching_urls() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path());

        let outcome = block_on(loader.load(
            "file:///proj/data.json",
            &LoadContext::default(),
            |_| {
                Ok(LoadOutcome {
                    format: ModuleFormat::Script,
                    short_circuit: false,
                    source: None,
                })
            },
        ))
        .unwrap();
        assert!(!outcome.short_circuit);
    }

    #[test]
    fn load_propagates_transpile_failures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"type": "module"}"#).unwrap();
        fs::write(dir.path().join("broken.ts"), "const = ;").unwrap();
        let config = CompilerConfig {
            base_url: dir.path().to_path_buf(),
            ..CompilerConfig::default()
        };
        let loader = Loader::new(config, FailingEngine);

        let url = helpers::file_url(&dir.path().join("broken.ts"));
        assert!(block_on(loader.load(&url, &LoadContext::default(), no_next_load)).is_err());
    }

    #[test]
    fn concurrent_loads_share_one_format_walk() {
        let dir = tempfile::tempdir().unwrap();
        let mut urls = vec![];
        for i in 0..100 {
            let file = dir.path().join(format!("file{i}.ts"));
            fs::write(&file, "export const x = 1;").unwrap();
            urls.push(helpers::file_url(&file));
        }
        let loader = loader_in(dir.path());

        // Prime the cache with one load, then the other 99 concurrently.
        block_on(loader.load(&urls[0], &LoadContext::default(), no_next_load)).unwrap();
        let probes_after_first = loader.formats.manifest_probes();

        let context = LoadContext::default();
        block_on(futures::future::try_join_all(
            urls[1..]
                .iter()
                .map(|url| loader.load(url, &context, no_next_load)),
        ))
        .unwrap();

        assert_eq!(loader.formats.manifest_probes(), probes_after_first);
    }
}
