use crate::config::CompilerConfig;
use anyhow::{Result, anyhow};
use console::style;
use std::path::Path;
use std::process::Command;

/// Runs the external type checker in no-emit mode, inheriting stdio so its
/// formatted diagnostics pass straight through to the user.
///
/// Returns whether the program type-checked cleanly. The caller decides
/// whether diagnostics are blocking (check/build flows) or advisory.
pub fn type_check(config: &CompilerConfig, tsconfig: Option<&Path>) -> Result<bool> {
    let mut command = Command::new(&config.engines.checker);
    command.arg("--noEmit");
    if let Some(tsconfig) = tsconfig {
        command.arg("-p").arg(tsconfig);
    }

    log::debug!("Running type checker: {:?}", command);
    let status = command
        .status()
        .map_err(|e| anyhow!("Could not start type checker \"{}\": {e}", config.engines.checker))?;

    Ok(status.success())
}

/// The `check` command: diagnostics are blocking here.
pub fn check(config: &CompilerConfig, tsconfig: Option<&Path>, show_progress: bool) -> Result<()> {
    if type_check(config, tsconfig)? {
        if show_progress {
            println!("{}", style("No type errors found").green());
        }
        Ok(())
    } else {
        Err(anyhow!("Type check reported errors"))
    }
}
