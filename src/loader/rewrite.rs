use crate::helpers::{self, SourceKind};
use crate::loader::format::ModuleFormat;
use regex::{Captures, Regex};
use std::sync::LazyLock;

// The four specifier-bearing constructs: static import/export `from`
// clauses, bare side-effect imports, dynamic import calls, and synchronous
// require calls. Group 1 captures the specifier; specifiers never contain
// quote characters, so a plain quote class on both sides is enough.
static FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"from\s*['"]([^'"]+)['"]"#).expect("valid regex"));
static IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s*['"]([^'"]+)['"]"#).expect("valid regex"));
static DYNAMIC_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex"));
static REQUIRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).expect("valid regex"));

// require() of a module-flavored source must stay a dynamic import even in
// script output; the synchronous load primitive cannot host it.
static REQUIRE_OF_MODULE_VARIANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"require(\s*\(\s*['"]\.{1,2}/[^'"]*\.mts['"]\s*\))"#).expect("valid regex")
});

/// Rewrites source-extension specifiers to the extensions of the emitted
/// artifacts, so written-out build output stays loadable.
///
/// `.mts` and `.cts` references map to their fixed counterparts; `.ts`
/// references map according to `format`, and only when the specifier is
/// relative/absolute or matches one of `alias_keys` (an alias is known to
/// resolve to a real file whose extension still needs fixing).
///
/// The transform is idempotent: emitted extensions are not source
/// extensions, so a second pass finds nothing to change.
pub fn rewrite_extensions(source: &str, format: ModuleFormat, alias_keys: &[String]) -> String {
    let mut out = rewrite_with(&FROM_RE, source, format, alias_keys);
    out = rewrite_with(&IMPORT_RE, &out, format, alias_keys);
    out = rewrite_with(&DYNAMIC_IMPORT_RE, &out, format, alias_keys);
    rewrite_with(&REQUIRE_RE, &out, format, alias_keys)
}

fn rewrite_with(re: &Regex, text: &str, format: ModuleFormat, alias_keys: &[String]) -> String {
    re.replace_all(text, |caps: &Captures| {
        let whole = &caps[0];
        let specifier = &caps[1];
        match rewritten_specifier(specifier, format, alias_keys) {
            Some(rewritten) => whole.replacen(specifier, &rewritten, 1),
            None => whole.to_string(),
        }
    })
    .into_owned()
}

fn rewritten_specifier(
    specifier: &str,
    format: ModuleFormat,
    alias_keys: &[String],
) -> Option<String> {
    let kind = SourceKind::of_specifier(specifier)?;
    if kind == SourceKind::Primary
        && !helpers::is_relative_specifier(specifier)
        && !alias_keys.iter().any(|key| specifier.starts_with(key.as_str()))
    {
        return None;
    }
    let source_ext = kind.source_extension();
    let stem = &specifier[..specifier.len() - source_ext.len()];
    Some(format!("{stem}{}", kind.emitted_extension(format)))
}

/// Rewrites `require("./x.mts")` calls into `import(...)` so module-flavored
/// sources remain dynamic imports under script output.
pub fn respect_dynamic_import(code: &str) -> String {
    REQUIRE_OF_MODULE_VARIANT_RE
        .replace_all(code, "import$1")
        .into_owned()
}

/// Replaces every quoted occurrence of one specifier with another.
///
/// Used by the module graph driver once a specifier's exact artifact
/// location is known, replacing the format-guessing extension rewrite.
pub fn replace_specifier(code: &str, from: &str, to: &str) -> String {
    code.replace(&format!("\"{from}\""), &format!("\"{to}\""))
        .replace(&format!("'{from}'"), &format!("'{to}'"))
}

/// Collects the specifiers of all source-extension references in `code`,
/// in order of appearance. Used by the module graph driver to discover
/// dependencies before the rewriter runs.
pub fn source_specifiers(code: &str) -> Vec<String> {
    let mut specifiers = vec![];
    for re in [&*FROM_RE, &*IMPORT_RE, &*DYNAMIC_IMPORT_RE, &*REQUIRE_RE] {
        for caps in re.captures_iter(code) {
            let specifier = &caps[1];
            if SourceKind::of_specifier(specifier).is_some()
                && !specifiers.iter().any(|s| s == specifier)
            {
                specifiers.push(specifier.to_string());
            }
        }
    }
    specifiers
}
