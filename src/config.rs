use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable carrying the serialized configuration into the
/// spawned child runtime.
pub const CONFIG_ENV_VAR: &str = "XTSC_OPTIONS";

/// Which format the legacy (synchronous) loader pins `.ts` files to.
///
/// The two observed loader generations disagree here: the synchronous loader
/// always produced script output while the hook pair consulted the nearest
/// manifest. Both behaviors are kept, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LegacyFormatPolicy {
    /// Always transpile to script output in the legacy loader.
    #[default]
    ForceScript,
    /// Consult the nearest package manifest, like the hook pair does.
    RespectManifest,
}

/// Commands for the external engines this front-end orchestrates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineCommands {
    pub checker: String,
    pub transform: String,
    pub bundler: String,
    pub runtime: String,
}

impl Default for EngineCommands {
    fn default() -> Self {
        Self {
            checker: "tsc".to_string(),
            transform: "swc".to_string(),
            bundler: "esbuild".to_string(),
            runtime: "node".to_string(),
        }
    }
}

/// Compiler configuration, immutable for the lifetime of a run.
///
/// Loaded once at process start from the config manifest (or defaults), and
/// inherited by the spawned child via [`CONFIG_ENV_VAR`]. Every field the
/// transpiler or loader needs must round-trip through that serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Target language level passed to the transform engine.
    pub target: String,
    pub strict: bool,
    /// Alias key -> replacement path templates, relative to `base_url`.
    pub paths: HashMap<String, Vec<String>>,
    pub out_dir: Option<PathBuf>,
    pub source_map: bool,
    pub minify: bool,
    /// Base directory alias templates are resolved against.
    pub base_url: PathBuf,
    pub legacy_format: LegacyFormatPolicy,
    pub engines: EngineCommands,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            target: "esnext".to_string(),
            strict: true,
            paths: HashMap::new(),
            out_dir: None,
            source_map: false,
            minify: false,
            base_url: PathBuf::from("."),
            legacy_format: LegacyFormatPolicy::default(),
            engines: EngineCommands::default(),
        }
    }
}

/// On-disk manifest shape: the compiler fields live under `compilerOptions`,
/// tool-specific settings under `xtsc`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigManifest {
    compiler_options: ManifestCompilerOptions,
    xtsc: ManifestToolOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ManifestCompilerOptions {
    target: Option<String>,
    strict: Option<bool>,
    paths: Option<HashMap<String, Vec<String>>>,
    out_dir: Option<PathBuf>,
    source_map: Option<bool>,
    base_url: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ManifestToolOptions {
    minify: Option<bool>,
    legacy_format: Option<LegacyFormatPolicy>,
    engines: Option<EngineCommands>,
}

impl CompilerConfig {
    /// Loads the configuration from a manifest file.
    ///
    /// A missing file yields the defaults with `base_url` anchored at the
    /// manifest's directory; an unparseable file is a fatal configuration
    /// error and is never retried.
    pub fn load(manifest_path: &Path) -> Result<CompilerConfig> {
        let manifest_dir = manifest_path.parent().unwrap_or(Path::new(".")).to_path_buf();

        let contents = match fs::read_to_string(manifest_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "No config manifest at {}, using defaults",
                    manifest_path.to_string_lossy()
                );
                return Ok(CompilerConfig {
                    base_url: manifest_dir,
                    ..CompilerConfig::default()
                });
            }
            Err(e) => {
                return Err(anyhow!(
                    "Could not read config manifest {}: {e}",
                    manifest_path.to_string_lossy()
                ));
            }
        };

        let manifest: ConfigManifest = serde_json::from_str(&contents).map_err(|e| {
            anyhow!(
                "Could not parse config manifest {}: {e}",
                manifest_path.to_string_lossy()
            )
        })?;

        let defaults = CompilerConfig::default();
        let base_url = match manifest.compiler_options.base_url {
            Some(base_url) => manifest_dir.join(base_url),
            None => manifest_dir,
        };

        Ok(CompilerConfig {
            target: manifest.compiler_options.target.unwrap_or(defaults.target),
            strict: manifest.compiler_options.strict.unwrap_or(defaults.strict),
            paths: manifest.compiler_options.paths.unwrap_or_default(),
            out_dir: manifest.compiler_options.out_dir,
            source_map: manifest.compiler_options.source_map.unwrap_or(false),
            minify: manifest.xtsc.minify.unwrap_or(false),
            base_url,
            legacy_format: manifest.xtsc.legacy_format.unwrap_or_default(),
            engines: manifest.xtsc.engines.unwrap_or_default(),
        })
    }

    /// Serializes the configuration for the child process environment.
    pub fn to_env_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow!("Could not serialize configuration: {e}"))
    }

    /// Reads the configuration a parent process put in the environment.
    pub fn from_env() -> Result<CompilerConfig> {
        let serialized = env::var(CONFIG_ENV_VAR)
            .map_err(|_| anyhow!("{CONFIG_ENV_VAR} is not set; was this process spawned directly?"))?;
        serde_json::from_str(&serialized)
            .map_err(|e| anyhow!("Could not deserialize {CONFIG_ENV_VAR}: {e}"))
    }
}
