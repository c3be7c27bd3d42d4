use crate::config::CompilerConfig;
use anyhow::{Result, anyhow};
use std::path::Path;
use std::process::Command;

/// Delegates bundling to the external bundler: node platform, dependencies
/// kept external, minify/source-map flags taken from the configuration
/// rather than sniffed from argv.
pub fn bundle(entry: &Path, out: &Path, config: &CompilerConfig) -> Result<()> {
    if !entry.is_file() {
        return Err(anyhow!(
            "Entry point {} does not exist or is not a file",
            entry.to_string_lossy()
        ));
    }

    let mut command = Command::new(&config.engines.bundler);
    command
        .arg(entry)
        .arg("--bundle")
        .arg("--platform=node")
        .arg("--packages=external")
        .arg(format!("--outfile={}", out.to_string_lossy()));
    if config.minify {
        command.arg("--minify");
    }
    if config.source_map {
        command.arg("--sourcemap");
    }

    log::debug!("Running bundler: {:?}", command);
    let status = command
        .status()
        .map_err(|e| anyhow!("Could not start bundler \"{}\": {e}", config.engines.bundler))?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("Bundling failed"))
    }
}
