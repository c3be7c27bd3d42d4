use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// A TypeScript front-end: type checks, transpiles on load, and runs source
/// files without a separate build step.
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    /// Verbosity:
    /// -v -> Debug
    /// -vv -> Trace
    /// -q -> Warn
    /// -qq -> Error
    /// -qqq -> Off
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct TsconfigArg {
    /// Path to the config manifest (defaults to ./tsconfig.json)
    #[arg(long)]
    pub tsconfig: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Type check, then execute a source file directly
    Run {
        /// The file to execute
        file: String,

        /// Skip the type check; diagnostics become advisory only
        #[arg(long)]
        no_check: bool,

        #[command(flatten)]
        tsconfig: TsconfigArg,

        /// Arguments passed through to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Transpile a source tree into emitted artifacts
    Build {
        /// Source directory
        #[arg(default_value = "./src")]
        src: String,

        /// Output directory (overrides the manifest's outDir)
        #[arg(short, long)]
        out: Option<String>,

        /// Force the output format instead of consulting package manifests
        #[arg(long, value_parser = ["module", "script"])]
        format: Option<String>,

        #[command(flatten)]
        tsconfig: TsconfigArg,
    },

    /// Execute a source file and restart it on changes
    Watch {
        /// The file to execute
        file: String,

        #[command(flatten)]
        tsconfig: TsconfigArg,

        /// Arguments passed through to the program
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Type check without emitting
    Check {
        #[command(flatten)]
        tsconfig: TsconfigArg,
    },

    /// Bundle an entry point with the external bundler
    Bundle {
        /// Entry point file
        entry: String,

        /// Output bundle file
        #[arg(short, long)]
        out: String,

        #[command(flatten)]
        tsconfig: TsconfigArg,
    },

    /// Internal: the spawned runtime side of `run`/`watch`
    #[command(hide = true)]
    Child {
        file: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}
