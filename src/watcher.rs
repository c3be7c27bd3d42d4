use crate::cmd::ChildHandle;
use crate::config::CompilerConfig;
use crate::helpers;
use crate::loader::format::PACKAGE_MANIFEST;
use crate::queue::FifoQueue;
use anyhow::Result;
use console::style;
use futures_timer::Delay;
use notify::{Config, Error, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// A change is relevant when it touches a source file or a manifest the
/// loader consults. Build output and node_modules are ignored.
fn is_relevant_change(path: &Path) -> bool {
    if path
        .components()
        .any(|c| c.as_os_str() == "node_modules")
    {
        return false;
    }
    if helpers::is_source_file(path) {
        return true;
    }
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name == PACKAGE_MANIFEST || name == "tsconfig.json"
}

/// Watch mode: runs `file` under the loader and restarts it whenever a
/// relevant file changes. Events are debounced per batch; the old child is
/// killed and its death observed before the replacement spawns.
pub fn start(
    file: &Path,
    file_args: Vec<String>,
    show_progress: bool,
    config: &CompilerConfig,
) -> Result<()> {
    let queue: Arc<FifoQueue<Result<Event, Error>>> = Arc::new(FifoQueue::new());
    let producer = Arc::clone(&queue);

    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, Error>| producer.push(result),
        Config::default(),
    )?;
    let watch_root = file.parent().unwrap_or(Path::new(".")).to_path_buf();
    watcher.watch(&watch_root, RecursiveMode::Recursive)?;

    futures::executor::block_on(async_watch(
        &queue,
        file,
        &file_args,
        show_progress,
        config,
    ))
}

async fn async_watch(
    queue: &FifoQueue<Result<Event, Error>>,
    file: &Path,
    file_args: &[String],
    show_progress: bool,
    config: &CompilerConfig,
) -> Result<()> {
    let ctrlc_pressed = Arc::new(Mutex::new(false));
    let ctrlc_pressed_clone = Arc::clone(&ctrlc_pressed);
    ctrlc::set_handler(move || {
        let mut pressed = match ctrlc_pressed_clone.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pressed = true;
    })
    .unwrap_or_else(|e| log::warn!("Could not install signal handler: {e}"));

    if show_progress {
        println!("{} Starting watcher...", style("👀").cyan());
    }
    let mut child = Some(ChildHandle::spawn(file, file_args, config)?);

    loop {
        if *ctrlc_pressed.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) {
            if show_progress {
                println!("\nExiting...");
            }
            if let Some(mut child) = child.take() {
                child.kill_and_wait()?;
            }
            break Ok(());
        }

        if !queue.is_empty() {
            // Wait for the event batch to settle.
            Delay::new(Duration::from_millis(50)).await;
        }
        let mut changed: Vec<PathBuf> = vec![];
        while !queue.is_empty() {
            match queue.pop() {
                Some(Ok(event)) => {
                    changed.extend(event.paths.into_iter().filter(|p| is_relevant_change(p)));
                }
                Some(Err(e)) => log::warn!("Watcher error: {e}"),
                None => break,
            }
        }

        if !changed.is_empty() {
            log::debug!("Restarting after changes: {changed:?}");
            if show_progress {
                println!("{} Restarting program...", style("↻").cyan());
            }
            // The old child must be confirmed dead before the new one
            // starts, or the two would race for the same resources.
            if let Some(mut old) = child.take() {
                old.kill_and_wait()?;
            }
            child = Some(ChildHandle::spawn(file, file_args, config)?);
        }

        Delay::new(Duration::from_millis(80)).await;
    }
}
