use crate::config::{CompilerConfig, CONFIG_ENV_VAR};
use anyhow::{Result, anyhow};
use std::env;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};

/// Handle to the spawned child runtime of one run session.
///
/// There is exactly one live child per session: a replacement may only be
/// spawned after [`kill_and_wait`] has observed the previous child's death,
/// otherwise two children could race for the same resources (e.g. a
/// listening port).
///
/// [`kill_and_wait`]: ChildHandle::kill_and_wait
pub struct ChildHandle {
    child: Child,
}

impl ChildHandle {
    /// Spawns our own binary in child mode with the serialized configuration
    /// in the environment and stdio inherited from the parent.
    pub fn spawn(file: &Path, file_args: &[String], config: &CompilerConfig) -> Result<ChildHandle> {
        let exe = env::current_exe()
            .map_err(|e| anyhow!("Could not determine the current executable: {e}"))?;

        let child = Command::new(exe)
            .arg("child")
            .arg(file)
            .args(file_args)
            .env(CONFIG_ENV_VAR, config.to_env_json()?)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| anyhow!("Could not spawn child process: {e}"))?;

        log::debug!("Spawned child process {}", child.id());
        Ok(ChildHandle { child })
    }

    #[cfg(test)]
    pub fn from_child(child: Child) -> ChildHandle {
        ChildHandle { child }
    }

    /// Non-blocking check whether the child has exited.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Terminates the child and waits until its death is observed. The kill
    /// signal alone is asynchronous; returning before `wait` would let a
    /// replacement race the dying process.
    pub fn kill_and_wait(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited; wait below reaps it either way.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => log::warn!("Could not kill child process {}: {e}", self.child.id()),
        }
        let status = self.child.wait()?;
        log::debug!("Child process exited with {status}");
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}
