pub mod build;
pub mod bundle;
pub mod check;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod helpers;
pub mod loader;
pub mod queue;
pub mod run;
pub mod transform;
pub mod watcher;
