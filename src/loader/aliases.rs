use crate::helpers;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Eq)]
enum AliasTarget {
    /// A plain key mapping to exactly one concrete path.
    Single(PathBuf),
    /// A wildcard key mapping to an ordered list of path templates; the
    /// matched remainder is appended to each and the first existing wins.
    Candidates(Vec<PathBuf>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AliasEntry {
    key: String,
    target: AliasTarget,
}

/// Compiled alias table, built once per run from the configured path map.
///
/// Keys are matched as specifier prefixes. When several keys match the same
/// specifier the longest one governs; declaration order only decides the
/// trial order of candidates within a single wildcard key.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    /// Sorted longest key first so prefix matching is deterministic.
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn build(paths: &HashMap<String, Vec<String>>, base_dir: &Path) -> AliasTable {
        let mut entries: Vec<AliasEntry> = paths
            .iter()
            .filter_map(|(key, templates)| {
                if templates.is_empty() {
                    log::warn!("Alias \"{key}\" has no replacement paths; ignoring");
                    return None;
                }
                let target = if key.ends_with(WILDCARD) {
                    let candidates = templates
                        .iter()
                        .map(|template| {
                            let stripped = template.trim_end_matches(WILDCARD);
                            helpers::normalize_path(&base_dir.join(stripped))
                        })
                        .collect();
                    AliasTarget::Candidates(candidates)
                } else {
                    AliasTarget::Single(helpers::normalize_path(&base_dir.join(&templates[0])))
                };
                Some(AliasEntry {
                    key: key.trim_end_matches(WILDCARD).to_string(),
                    target,
                })
            })
            .collect();

        entries.sort_by(|a, b| b.key.len().cmp(&a.key.len()).then(a.key.cmp(&b.key)));
        AliasTable { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The stripped alias keys, longest first.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key.clone()).collect()
    }

    /// Does any alias key prefix-match this specifier?
    pub fn matches(&self, specifier: &str) -> bool {
        self.entries.iter().any(|e| specifier.starts_with(&e.key))
    }

    /// Resolves a specifier through the table to an existing file, if any.
    ///
    /// Existence on disk breaks ties among the candidates of one key;
    /// a matching key whose candidates all miss yields no resolution and the
    /// caller falls back to standard resolution.
    pub fn resolve(&self, specifier: &str) -> Option<PathBuf> {
        for entry in &self.entries {
            let Some(remainder) = specifier.strip_prefix(&entry.key) else {
                continue;
            };
            let remainder = remainder.trim_start_matches('/');
            match &entry.target {
                AliasTarget::Single(path) => {
                    let resolved = if remainder.is_empty() {
                        path.clone()
                    } else {
                        path.join(remainder)
                    };
                    if resolved.is_file() {
                        return Some(resolved);
                    }
                }
                AliasTarget::Candidates(candidates) => {
                    for candidate in candidates {
                        let resolved = if remainder.is_empty() {
                            candidate.clone()
                        } else {
                            candidate.join(remainder)
                        };
                        if resolved.is_file() {
                            return Some(resolved);
                        }
                    }
                }
            }
        }
        None
    }
}
