use anyhow::Result;
use clap::{Parser, error::ErrorKind};
use log::LevelFilter;
use std::{env, io::Write, path::Path, path::PathBuf};

use xtsc::transform::CommandEngine;
use xtsc::{build, bundle, check, cli, config, loader, run, watcher};

fn main() -> Result<()> {
    let raw_args: Vec<String> = env::args().collect();
    let cli = parse_cli(raw_args).unwrap_or_else(|err| err.exit());

    let log_level_filter = cli.verbose.log_level_filter();

    env_logger::Builder::new()
        .format(|buf, record| writeln!(buf, "{}:\n{}", record.level(), record.args()))
        .filter_level(log_level_filter)
        .target(env_logger::fmt::Target::Stdout)
        .init();

    // The 'normal run' mode shows the 'pretty' formatted progress. But if we
    // turn off the log level, we should never show that.
    let show_progress = log_level_filter == LevelFilter::Info;

    match cli.command {
        cli::Command::Run {
            file,
            no_check,
            tsconfig,
            args,
        } => {
            let config = load_config(tsconfig.tsconfig.as_deref());
            let cwd = env::current_dir()?;
            let entry = match run::resolve_entry(&file, &cwd) {
                Ok(resolution) => xtsc::helpers::url_to_path(&resolution.url)?,
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
            };

            if !no_check && !check::type_check(&config, tsconfig_path(tsconfig.tsconfig.as_deref()).as_deref())? {
                std::process::exit(1);
            }

            match run::run(&entry, &args, show_progress, &config) {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
            }
        }
        cli::Command::Build {
            src,
            out,
            format,
            tsconfig,
        } => {
            let config = load_config(tsconfig.tsconfig.as_deref());
            let out_dir = out
                .map(PathBuf::from)
                .or_else(|| config.out_dir.clone())
                .unwrap_or_else(|| PathBuf::from("./dist"));
            let format_override = format
                .as_deref()
                .map(|f| f.parse::<loader::format::ModuleFormat>())
                .transpose()?;
            let engine = CommandEngine::new(&config);

            match build::build(
                Path::new(&src),
                &out_dir,
                format_override,
                show_progress,
                &config,
                &engine,
            ) {
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
                Ok(()) => std::process::exit(0),
            }
        }
        cli::Command::Watch { file, tsconfig, args } => {
            let config = load_config(tsconfig.tsconfig.as_deref());
            let cwd = env::current_dir()?;
            let entry = match run::resolve_entry(&file, &cwd) {
                Ok(resolution) => xtsc::helpers::url_to_path(&resolution.url)?,
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
            };

            watcher::start(&entry, args, show_progress, &config)
        }
        cli::Command::Check { tsconfig } => {
            let config = load_config(tsconfig.tsconfig.as_deref());
            match check::check(
                &config,
                tsconfig_path(tsconfig.tsconfig.as_deref()).as_deref(),
                show_progress,
            ) {
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
                Ok(()) => std::process::exit(0),
            }
        }
        cli::Command::Bundle { entry, out, tsconfig } => {
            let config = load_config(tsconfig.tsconfig.as_deref());
            match bundle::bundle(Path::new(&entry), Path::new(&out), &config) {
                Err(e) => {
                    println!("{e}");
                    std::process::exit(1);
                }
                Ok(()) => std::process::exit(0),
            }
        }
        cli::Command::Child { file, args } => match run::child_main(Path::new(&file), &args) {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
    }
}

fn tsconfig_path(explicit: Option<&str>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = PathBuf::from("tsconfig.json");
            if default.is_file() { Some(default) } else { None }
        }
    }
}

/// Configuration errors are fatal: report and exit non-zero, never retry.
fn load_config(explicit: Option<&str>) -> config::CompilerConfig {
    let manifest = PathBuf::from(explicit.unwrap_or("tsconfig.json"));
    match config::CompilerConfig::load(&manifest) {
        Ok(config) => config,
        Err(e) => {
            println!("{e}");
            std::process::exit(1);
        }
    }
}

fn parse_cli(raw_args: Vec<String>) -> Result<cli::Cli, clap::Error> {
    match cli::Cli::try_parse_from(&raw_args) {
        Ok(cli) => Ok(cli),
        Err(err) => {
            if should_default_to_run(&err, &raw_args) {
                let mut fallback_args = raw_args.clone();
                let insert_at = index_after_global_flags(&fallback_args);
                fallback_args.insert(insert_at, "run".into());

                match cli::Cli::try_parse_from(&fallback_args) {
                    Ok(cli) => Ok(cli),
                    Err(fallback_err) => Err(fallback_err),
                }
            } else {
                Err(err)
            }
        }
    }
}

/// `xtsc ./main.ts` is shorthand for `xtsc run ./main.ts`.
fn should_default_to_run(err: &clap::Error, args: &[String]) -> bool {
    match err.kind() {
        ErrorKind::UnknownArgument | ErrorKind::InvalidSubcommand => args
            .iter()
            .skip(1)
            .find(|arg| !is_global_flag(arg))
            .map(|arg| xtsc::helpers::SourceKind::of_specifier(arg).is_some())
            .unwrap_or(false),
        _ => false,
    }
}

fn index_after_global_flags(args: &[String]) -> usize {
    let mut idx = 1;
    while let Some(arg) = args.get(idx) {
        if is_global_flag(arg) {
            idx += 1;
        } else {
            break;
        }
    }
    idx.min(args.len())
}

fn is_global_flag(arg: &str) -> bool {
    matches!(
        arg,
        "-v" | "-vv"
            | "-vvv"
            | "-vvvv"
            | "-q"
            | "-qq"
            | "-qqq"
            | "-qqqq"
            | "--verbose"
            | "--quiet"
            | "-h"
            | "--help"
            | "-V"
            | "--version"
    )
}
