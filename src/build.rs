use crate::config::CompilerConfig;
use crate::helpers::{self, SourceKind};
use crate::loader::aliases::AliasTable;
use crate::loader::format::{FormatResolver, ModuleFormat};
use crate::loader::rewrite;
use crate::transform::{TranspileOptions, TransformEngine};
use anyhow::{Result, anyhow};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Batch build: transpiles every source file under `src` into `out`,
/// mirroring the directory layout with emitted extensions and rewritten
/// specifiers.
///
/// Per-file transpile failures are logged and skipped so one broken file
/// does not abort the whole batch; the build only fails as a whole when
/// nothing could be emitted.
pub fn build<E: TransformEngine>(
    src: &Path,
    out: &Path,
    format_override: Option<ModuleFormat>,
    show_progress: bool,
    config: &CompilerConfig,
    engine: &E,
) -> Result<()> {
    if !src.is_dir() {
        return Err(anyhow!(
            "Source path {} does not exist or is not a directory",
            src.to_string_lossy()
        ));
    }

    let timing = Instant::now();
    let files = helpers::source_files_list(src)?;
    if files.is_empty() {
        log::warn!("No source files found under {}", src.to_string_lossy());
        return Ok(());
    }

    // The whole tree shares one ambient format; the resolver memoizes the
    // manifest walk so this is a single probe chain.
    let formats = FormatResolver::new();
    let tree_format = format_override.unwrap_or_else(|| formats.resolve(src));
    let aliases = AliasTable::build(&config.paths, &config.base_url);
    let alias_keys = aliases.keys();

    let pb = if show_progress {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("{spinner} Building... {pos}/{len} {wide_bar}")
                .expect("valid progress template"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let failures: Vec<String> = files
        .par_iter()
        .filter_map(|file| {
            let result = build_file(file, src, out, tree_format, &alias_keys, config, engine);
            pb.inc(1);
            match result {
                Ok(()) => None,
                Err(e) => {
                    log::error!("{}: {e}", file.to_string_lossy());
                    Some(file.to_string_lossy().to_string())
                }
            }
        })
        .collect();

    pb.finish_and_clear();

    let emitted = files.len() - failures.len();
    if show_progress {
        println!(
            "{} Built {} file{} in {:.2}s",
            style("✓").green(),
            emitted,
            if emitted == 1 { "" } else { "s" },
            timing.elapsed().as_secs_f64()
        );
        if !failures.is_empty() {
            println!(
                "{} {} file{} failed to build",
                style("✗").red(),
                failures.len(),
                if failures.len() == 1 { "" } else { "s" }
            );
        }
    }

    if emitted == 0 {
        Err(anyhow!("All {} files failed to build", failures.len()))
    } else {
        Ok(())
    }
}

fn build_file<E: TransformEngine>(
    file: &Path,
    src: &Path,
    out: &Path,
    tree_format: ModuleFormat,
    alias_keys: &[String],
    config: &CompilerConfig,
    engine: &E,
) -> Result<()> {
    let kind = SourceKind::of_path(file)
        .ok_or_else(|| anyhow!("Not a source file: {}", file.to_string_lossy()))?;

    // Variant extensions pin their own format; only `.ts` follows the tree.
    let format = match kind {
        SourceKind::ModuleVariant => ModuleFormat::Module,
        SourceKind::ScriptVariant => ModuleFormat::Script,
        SourceKind::Primary => tree_format,
    };

    let options = TranspileOptions::for_format(config, format);
    let result = engine.transpile_file(file, &options)?;
    let code = rewrite::rewrite_extensions(&result.code, format, alias_keys);

    let out_path = helpers::emitted_path(file, src, out, format)?;
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&out_path, code)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::test_engine::EchoEngine;
    use std::fs;

    fn config_in(dir: &Path) -> CompilerConfig {
        CompilerConfig {
            base_url: dir.to_path_buf(),
            ..CompilerConfig::default()
        }
    }

    #[test]
    fn builds_a_tree_with_mirrored_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let out = dir.path().join("dist");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("main.ts"), r#"import x from "./nested/dep.ts";"#).unwrap();
        fs::write(src.join("nested/dep.ts"), "export const x = 1;").unwrap();
        fs::write(src.join("legacy.cts"), "module.exports = {};").unwrap();

        let engine = EchoEngine::default();
        build(&src, &out, None, false, &config_in(dir.path()), &engine).unwrap();

        // No manifest: tree format is script, so .ts emits .js.
        let main = fs::read_to_string(out.join("main.js")).unwrap();
        assert!(main.contains(r#""./nested/dep.js""#), "{main}");
        assert!(out.join("nested/dep.js").is_file());
        assert!(out.join("legacy.cjs").is_file());
    }

    #[test]
    fn module_format_emits_module_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("main.ts"), r#"import x from "./dep.ts";"#).unwrap();
        fs::write(src.join("dep.ts"), "export const x = 1;").unwrap();
        let out = dir.path().join("dist");

        let engine = EchoEngine::default();
        build(
            &src,
            &out,
            Some(ModuleFormat::Module),
            false,
            &config_in(dir.path()),
            &engine,
        )
        .unwrap();

        let main = fs::read_to_string(out.join("main.mjs")).unwrap();
        assert!(main.contains(r#""./dep.mjs""#), "{main}");
    }

    #[test]
    fn skips_declaration_files_and_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("node_modules/pkg")).unwrap();
        fs::write(src.join("main.ts"), "export {};").unwrap();
        fs::write(src.join("types.d.ts"), "declare const x: number;").unwrap();
        fs::write(src.join("node_modules/pkg/index.ts"), "export {};").unwrap();
        let out = dir.path().join("dist");

        let engine = EchoEngine::default();
        build(&src, &out, None, false, &config_in(dir.path()), &engine).unwrap();

        assert!(out.join("main.js").is_file());
        assert!(!out.join("types.d.js").exists());
        assert!(!out.join("node_modules").exists());
    }

    #[test]
    fn missing_source_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EchoEngine::default();
        let err = build(
            &dir.path().join("nope"),
            &dir.path().join("dist"),
            None,
            false,
            &config_in(dir.path()),
            &engine,
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
