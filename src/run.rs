use crate::cmd::ChildHandle;
use crate::config::CompilerConfig;
use crate::helpers;
use crate::loader::format::ModuleFormat;
use crate::loader::hooks::{LoadContext, ResolveContext, Resolution};
use crate::loader::rewrite;
use crate::loader::{Loader, ModuleRecord};
use crate::transform::{CommandEngine, TransformEngine};
use ahash::{AHashMap, AHashSet};
use anyhow::{Result, anyhow};
use console::style;
use futures::executor::block_on;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Parent side of `run`: spawns the child runtime with the configuration in
/// its environment, forwards interrupts to the child, and reports the exit
/// code.
pub fn run(
    file: &Path,
    file_args: &[String],
    show_progress: bool,
    config: &CompilerConfig,
) -> Result<i32> {
    if !file.is_file() {
        return Err(anyhow!(
            "File {} does not exist or is not a file",
            file.to_string_lossy()
        ));
    }

    let mut child = ChildHandle::spawn(file, file_args, config)?;
    if show_progress {
        println!("{} Initializing program...", style("▶").cyan());
    }

    let interrupted = Arc::new(Mutex::new(false));
    let interrupted_clone = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
        let mut interrupted = match interrupted_clone.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *interrupted = true;
    })
    .unwrap_or_else(|e| log::warn!("Could not install signal handler: {e}"));

    let status = supervise(&mut child, &interrupted)?;
    if show_progress {
        println!("{} Closing the program...", style("■").cyan());
    }

    match status {
        Some(status) => Ok(status.code().unwrap_or(1)),
        // Interrupted: the child was killed on our way out.
        None => Ok(130),
    }
}

/// Polls the child until it exits or the interrupt flag is raised. An
/// interrupt kills the child and confirms its death before returning, so
/// the parent never exits with the child still alive. Returns `None` when
/// interrupted.
fn supervise(child: &mut ChildHandle, interrupted: &Mutex<bool>) -> Result<Option<ExitStatus>> {
    loop {
        if *interrupted.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) {
            log::debug!("Interrupt received, stopping child {}", child.id());
            child.kill_and_wait()?;
            return Ok(None);
        }
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Child side: reads the inherited configuration, materializes the module
/// graph through the load interceptor, and execs the host runtime on the
/// emitted entry artifact.
pub fn child_main(entry: &Path, args: &[String]) -> Result<i32> {
    let config = CompilerConfig::from_env()?;
    let engine = CommandEngine::new(&config);
    let loader = Loader::new(config.clone(), engine);

    let stage_dir = tempfile::tempdir()?;
    let emitted_entry = block_on(materialize_graph(&loader, entry, stage_dir.path()))?;

    let status = Command::new(&config.engines.runtime)
        .arg(&emitted_entry)
        .args(args)
        .status()
        .map_err(|e| anyhow!("Could not start runtime \"{}\": {e}", config.engines.runtime))?;

    Ok(status.code().unwrap_or(1))
}

/// One module loaded through the hooks, before its artifact is written.
struct LoadedModule {
    path: PathBuf,
    format: ModuleFormat,
    code: String,
    /// Source-extension specifiers and the files they resolved to.
    deps: Vec<(String, PathBuf)>,
}

/// Drives resolve/load over the module graph rooted at `entry`. Each URL is
/// loaded exactly once; artifacts mirror their source locations under
/// `stage_dir`, and every source-extension reference is rewritten to the
/// relative location of the artifact it resolved to, so parent-relative
/// imports and alias targets outside the entry's directory stay reachable.
/// Returns the emitted entry path.
async fn materialize_graph<E: TransformEngine>(
    loader: &Loader<E>,
    entry: &Path,
    stage_dir: &Path,
) -> Result<PathBuf> {
    let entry = entry
        .canonicalize()
        .map_err(|e| anyhow!("File {} not found: {e}", entry.to_string_lossy()))?;
    let entry_url = helpers::file_url(&entry);

    let mut pending = vec![entry_url.clone()];
    let mut seen: AHashSet<String> = AHashSet::new();
    seen.insert(entry_url.clone());
    let mut modules: Vec<(String, LoadedModule)> = vec![];

    while let Some(url) = pending.pop() {
        let mut module = load_one(loader, &url).await?;

        // Discover further source references before they are rewritten away
        // in the written artifact.
        for specifier in rewrite::source_specifiers(&module.code) {
            let context = ResolveContext {
                parent_url: Some(url.clone()),
                conditions: vec![],
            };
            let resolution = loader
                .resolve(&specifier, &context, |s| {
                    Err(anyhow!("Could not resolve {s}"))
                })
                .await?;
            module.deps.push((specifier, helpers::url_to_path(&resolution.url)?));
            if seen.insert(resolution.url.clone()) {
                pending.push(resolution.url);
            }
        }

        modules.push((url, module));
    }

    // Artifact naming needs every module's resolved format, so writing
    // happens only after the whole graph is loaded.
    let mut formats: AHashMap<PathBuf, ModuleFormat> = AHashMap::new();
    for (_, module) in &modules {
        formats.insert(module.path.clone(), module.format);
    }

    let mut emitted_entry = None;
    for (url, module) in modules {
        let emitted = staged_path(&module.path, stage_dir, module.format)?;
        let emitted_dir = emitted.parent().unwrap_or(Path::new("/")).to_path_buf();

        let mut code = module.code;
        for (specifier, dep_path) in &module.deps {
            let dep_format = formats
                .get(dep_path)
                .copied()
                .ok_or_else(|| anyhow!("Unloaded dependency {}", dep_path.to_string_lossy()))?;
            let dep_emitted = staged_path(dep_path, stage_dir, dep_format)?;
            let reference = helpers::relative_specifier(&emitted_dir, &dep_emitted);
            code = rewrite::replace_specifier(&code, specifier, &reference);
        }

        fs::create_dir_all(&emitted_dir)?;
        fs::write(&emitted, code)?;
        log::debug!("Materialized {url} -> {}", emitted.to_string_lossy());

        if url == entry_url {
            emitted_entry = Some(emitted);
        }
    }

    emitted_entry.ok_or_else(|| anyhow!("Entry module was never materialized"))
}

/// Mirrors an absolute source path under the stage directory with the
/// emitted extension, so relative references between artifacts keep the
/// same shape they had between sources.
fn staged_path(source: &Path, stage_dir: &Path, format: ModuleFormat) -> Result<PathBuf> {
    helpers::emitted_path(source, Path::new("/"), stage_dir, format)
}

/// Loads one module URL through the hooks. Returns the pre-rewrite code
/// for dependency scanning.
async fn load_one<E: TransformEngine>(loader: &Loader<E>, url: &str) -> Result<LoadedModule> {
    let outcome = loader
        .load(url, &LoadContext::default(), |u| {
            Err(anyhow!("No loader for {u}"))
        })
        .await?;

    let path = helpers::url_to_path(url)?;
    let format = outcome.format;
    let code = match outcome.source {
        Some(code) => code,
        None => {
            // Script format: the hook defers compilation to the legacy path.
            debug_assert_eq!(format, ModuleFormat::Script);
            let mut record = ModuleRecord::new(&path);
            loader.legacy_load(&mut record)?;
            record
                .compiled_source()
                .ok_or_else(|| anyhow!("Legacy loader produced no output for {url}"))?
                .to_string()
        }
    };

    Ok(LoadedModule {
        path,
        format,
        code,
        deps: vec![],
    })
}

/// Resolves the entry specifier the way the child will, mainly so the
/// parent can fail fast with a user-facing message.
pub fn resolve_entry(specifier: &str, cwd: &Path) -> Result<Resolution> {
    let path = if Path::new(specifier).is_absolute() {
        PathBuf::from(specifier)
    } else {
        cwd.join(specifier)
    };
    if !path.is_file() {
        return Err(anyhow!("File {} doesn't exist!", path.to_string_lossy()));
    }
    Ok(Resolution {
        url: helpers::file_url(&path),
        short_circuit: true,
    })
}
