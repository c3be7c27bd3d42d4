use crate::config::CompilerConfig;
use crate::loader::format::ModuleFormat;
use anyhow::{Result, anyhow};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

/// Options for one transpilation, with the module kind pinned to the
/// resolved format of the file being loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOptions {
    pub format: ModuleFormat,
    pub target: String,
    pub source_maps: bool,
    pub minify: bool,
}

impl TranspileOptions {
    pub fn for_format(config: &CompilerConfig, format: ModuleFormat) -> TranspileOptions {
        TranspileOptions {
            format,
            target: config.target.clone(),
            source_maps: config.source_map,
            minify: config.minify,
        }
    }

    /// The module kind the external engine understands.
    pub fn module_kind(&self) -> &'static str {
        match self.format {
            ModuleFormat::Script => "commonjs",
            ModuleFormat::Module => "nodenext",
        }
    }
}

/// Output of one transpilation. Transient: the caller either hands the code
/// to the module host or writes it out as a build artifact. Source maps,
/// when requested, travel inline in the code.
#[derive(Debug, Clone)]
pub struct TranspileResult {
    pub code: String,
    pub format: ModuleFormat,
}

/// Seam to the external source-to-source transform engine.
///
/// The engine never type-checks; that is a separate, advisory concern. A
/// failed transform must surface as an error, never as silently empty
/// output, so a failing import raises at the call site.
pub trait TransformEngine: Send + Sync {
    fn transpile_source(&self, source: &str, options: &TranspileOptions) -> Result<TranspileResult>;

    fn transpile_file(&self, path: &Path, options: &TranspileOptions) -> Result<TranspileResult> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Could not read {}: {e}", path.to_string_lossy()))?;
        self.transpile_source(&source, options)
    }
}

/// Production engine: shells out to the configured transform command,
/// feeding source on stdin and reading transpiled code from stdout.
pub struct CommandEngine {
    command: String,
}

impl CommandEngine {
    pub fn new(config: &CompilerConfig) -> CommandEngine {
        CommandEngine {
            command: config.engines.transform.clone(),
        }
    }

    fn engine_args(&self, options: &TranspileOptions) -> Vec<String> {
        let mut args = vec![
            "--module".to_string(),
            options.module_kind().to_string(),
            "--target".to_string(),
            options.target.clone(),
        ];
        if options.minify {
            args.push("--minify".to_string());
        }
        if options.source_maps {
            args.push("--source-maps".to_string());
            args.push("inline".to_string());
        }
        args
    }
}

impl TransformEngine for CommandEngine {
    fn transpile_source(&self, source: &str, options: &TranspileOptions) -> Result<TranspileResult> {
        let mut child = Command::new(&self.command)
            .args(self.engine_args(options))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Could not start transform engine \"{}\": {e}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(source.as_bytes())?;
        }
        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Transform engine failed: {stderr}"));
        }

        Ok(TranspileResult {
            code: String::from_utf8_lossy(&output.stdout).to_string(),
            format: options.format,
        })
    }

    fn transpile_file(&self, path: &Path, options: &TranspileOptions) -> Result<TranspileResult> {
        let output = Command::new(&self.command)
            .args(self.engine_args(options))
            .arg(path)
            .output()
            .map_err(|e| anyhow!("Could not start transform engine \"{}\": {e}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Transform engine failed on {}: {stderr}",
                path.to_string_lossy()
            ));
        }

        Ok(TranspileResult {
            code: String::from_utf8_lossy(&output.stdout).to_string(),
            format: options.format,
        })
    }
}
