pub mod aliases;
pub mod format;
pub mod hooks;
pub mod rewrite;

use crate::config::{CompilerConfig, LegacyFormatPolicy};
use crate::helpers::{self, SourceKind};
use crate::transform::{TranspileOptions, TransformEngine};
use aliases::AliasTable;
use anyhow::{Result, anyhow};
use format::{FormatResolver, ModuleFormat};
use std::path::PathBuf;

/// The module-load interceptor: owns the compiled alias table and the
/// memoized format cache, and serves both loader generations: the legacy
/// synchronous extension handler and the async resolve/load hook pair.
///
/// One instance per process/session; all state is write-once / read-many,
/// so independent resolutions may run concurrently against it.
pub struct Loader<E: TransformEngine> {
    pub(crate) config: CompilerConfig,
    pub(crate) engine: E,
    pub(crate) aliases: AliasTable,
    pub(crate) formats: FormatResolver,
    /// Fallback parent for resolutions with no parent module.
    pub(crate) base_url: String,
}

impl<E: TransformEngine> Loader<E> {
    pub fn new(config: CompilerConfig, engine: E) -> Loader<E> {
        let aliases = AliasTable::build(&config.paths, &config.base_url);
        let base_url = helpers::file_url(&config.base_url.join("index.ts"));
        Loader {
            config,
            engine,
            aliases,
            formats: FormatResolver::new(),
            base_url,
        }
    }

    /// Legacy synchronous load: transpiles `record`'s file and compiles the
    /// result into the record.
    ///
    /// `.ts` files follow the configured legacy policy (the observed default
    /// pins them to script output regardless of the manifest). require()
    /// calls that target module-flavored sources are rewritten to dynamic
    /// imports, which survive under script semantics where the synchronous
    /// primitive cannot load them.
    pub fn legacy_load(&self, record: &mut ModuleRecord) -> Result<()> {
        let kind = SourceKind::of_path(&record.filename).ok_or_else(|| {
            anyhow!(
                "No handler for extension of {}",
                record.filename.to_string_lossy()
            )
        })?;

        let format = match kind {
            SourceKind::ScriptVariant => ModuleFormat::Script,
            SourceKind::ModuleVariant => ModuleFormat::Script,
            SourceKind::Primary => match self.config.legacy_format {
                LegacyFormatPolicy::ForceScript => ModuleFormat::Script,
                LegacyFormatPolicy::RespectManifest => self.formats.resolve(&record.filename),
            },
        };

        let options = TranspileOptions::for_format(&self.config, format);
        let result = self.engine.transpile_file(&record.filename, &options)?;
        record.compile(rewrite::respect_dynamic_import(&result.code));
        Ok(())
    }
}

/// The host's per-module compilation target in the legacy loader protocol.
/// The handler's contract is the side effect of calling [`compile`].
///
/// [`compile`]: ModuleRecord::compile
#[derive(Debug)]
pub struct ModuleRecord {
    pub filename: PathBuf,
    compiled: Option<String>,
}

impl ModuleRecord {
    pub fn new(filename: impl Into<PathBuf>) -> ModuleRecord {
        ModuleRecord {
            filename: filename.into(),
            compiled: None,
        }
    }

    pub fn compile(&mut self, source: String) {
        self.compiled = Some(source);
    }

    pub fn compiled_source(&self) -> Option<&str> {
        self.compiled.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_engine::{EchoEngine, FailingEngine};
    use std::fs;
    use std::path::Path;

    fn loader_in(dir: &Path) -> Loader<EchoEngine> {
        let config = CompilerConfig {
            base_url: dir.to_path_buf(),
            ..CompilerConfig::default()
        };
        Loader::new(config, EchoEngine::default())
    }

    #[test]
    fn legacy_load_pins_primary_sources_to_script_by_default() {
        let dir = tempfile::tempdir().unwrap();
        // Manifest says module, the default legacy policy ignores it.
        fs::write(dir.path().join("package.json"), r#"{"type": "module"}"#).unwrap();
        let file = dir.path().join("main.ts");
        fs::write(&file, "const x: number = 1;").unwrap();

        let loader = loader_in(dir.path());
        let mut record = ModuleRecord::new(&file);
        loader.legacy_load(&mut record).unwrap();

        let compiled = record.compiled_source().unwrap();
        assert!(compiled.starts_with("/* commonjs */"), "{compiled}");
    }

    #[test]
    fn legacy_load_can_respect_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"type": "module"}"#).unwrap();
        let file = dir.path().join("main.ts");
        fs::write(&file, "const x: number = 1;").unwrap();

        let config = CompilerConfig {
            base_url: dir.path().to_path_buf(),
            legacy_format: LegacyFormatPolicy::RespectManifest,
            ..CompilerConfig::default()
        };
        let loader = Loader::new(config, EchoEngine::default());
        let mut record = ModuleRecord::new(&file);
        loader.legacy_load(&mut record).unwrap();

        let compiled = record.compiled_source().unwrap();
        assert!(compiled.starts_with("/* nodenext */"), "{compiled}");
    }

    #[test]
    fn legacy_load_rewrites_require_of_module_variant() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main.cts");
        fs::write(&file, r#"const m = require("./dep.mts");"#).unwrap();

        let loader = loader_in(dir.path());
        let mut record = ModuleRecord::new(&file);
        loader.legacy_load(&mut record).unwrap();

        let compiled = record.compiled_source().unwrap();
        assert!(compiled.contains(r#"import("./dep.mts")"#), "{compiled}");
    }

    #[test]
    fn legacy_load_propagates_transpile_failures() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.ts");
        fs::write(&file, "const = ;").unwrap();

        let config = CompilerConfig {
            base_url: dir.path().to_path_buf(),
            ..CompilerConfig::default()
        };
        let loader = Loader::new(config, FailingEngine);
        let mut record = ModuleRecord::new(&file);

        assert!(loader.legacy_load(&mut record).is_err());
        assert!(record.compiled_source().is_none());
    }

    #[test]
    fn unrecognized_extension_has_no_handler() {
        let dir = tempfile::tempdir().unwrap();
        let loader = loader_in(dir.path());
        let mut record = ModuleRecord::new(dir.path().join("data.json"));
        assert!(loader.legacy_load(&mut record).is_err());
    }
}
