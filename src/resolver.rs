//! Locating what a backend wrote.
//!
//! Backends disagree about where their results land (`final_results/`,
//! `restored_imgs/`, the output directory itself, ...). Each adapter declares
//! an ordered list of [`CandidatePattern`]s, most specific first, and
//! [`locate`] walks them until one matches.
//!
//! Selection is deterministic: directory listings are sorted by file name
//! before matching, and among several matches the first whose name starts
//! with the input's base name wins.

use std::fmt;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};

use crate::envelope::OutputArtifact;

/// How a file name is matched inside a pattern's directory.
///
/// Input stems may contain glob metacharacters (`face[1]`), so the
/// stem-bearing variants match literally; only [`NamePattern::Glob`] is a
/// real wildcard.
#[derive(Debug, Clone)]
pub enum NamePattern {
    /// `face1.png`
    Exact(String),
    /// `face1.*`: the stem followed by any extension.
    Stem(String),
    /// `face1*.png`, or `face1*` when no extension is given.
    Prefix {
        prefix: String,
        extension: Option<String>,
    },
    /// A general wildcard such as `*.png`.
    Glob { source: String, matcher: GlobMatcher },
}

impl NamePattern {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(exact) => name == exact,
            NamePattern::Stem(stem) => name
                .strip_prefix(stem.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
            NamePattern::Prefix { prefix, extension } => {
                let Some(rest) = name.strip_prefix(prefix.as_str()) else {
                    return false;
                };
                match extension {
                    Some(ext) => rest.ends_with(&format!(".{ext}")),
                    None => true,
                }
            }
            NamePattern::Glob { matcher, .. } => matcher.is_match(name),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamePattern::Exact(exact) => f.write_str(exact),
            NamePattern::Stem(stem) => write!(f, "{stem}.*"),
            NamePattern::Prefix {
                prefix,
                extension: Some(ext),
            } => write!(f, "{prefix}*.{ext}"),
            NamePattern::Prefix {
                prefix,
                extension: None,
            } => write!(f, "{prefix}*"),
            NamePattern::Glob { source, .. } => f.write_str(source),
        }
    }
}

/// A directory plus a file-name pattern inside it.
#[derive(Debug, Clone)]
pub struct CandidatePattern {
    pub dir: PathBuf,
    pub name: NamePattern,
}

impl CandidatePattern {
    pub fn exact(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: NamePattern::Exact(name.into()),
        }
    }

    pub fn stem(dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: NamePattern::Stem(stem.into()),
        }
    }

    pub fn prefix(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        extension: Option<&str>,
    ) -> Self {
        Self {
            dir: dir.into(),
            name: NamePattern::Prefix {
                prefix: prefix.into(),
                extension: extension.map(str::to_string),
            },
        }
    }

    pub fn glob(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, globset::Error> {
        let matcher = Glob::new(pattern)?.compile_matcher();
        Ok(Self {
            dir: dir.into(),
            name: NamePattern::Glob {
                source: pattern.to_string(),
                matcher,
            },
        })
    }
}

impl fmt::Display for CandidatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir.join(self.name.to_string()).display())
    }
}

/// No pattern matched. Carries what was tried, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no output matched any of {} candidate patterns", attempted.len())]
pub struct NotFound {
    pub attempted: Vec<String>,
}

/// Find the main result and its companions.
///
/// Only the first pattern with at least one match is consulted; later
/// patterns never contribute even if they would match more files.
pub fn locate(
    patterns: &[CandidatePattern],
    input_base_name: &str,
    cropped_faces_dir: Option<&Path>,
) -> Result<OutputArtifact, NotFound> {
    let main_result = patterns.iter().find_map(|pattern| {
        let matches: Vec<PathBuf> = list_files(&pattern.dir)
            .into_iter()
            .filter(|(name, _)| pattern.name.matches(name))
            .map(|(_, path)| path)
            .collect();
        pick(matches, input_base_name)
    });

    let Some(main_result) = main_result else {
        return Err(NotFound {
            attempted: patterns.iter().map(ToString::to_string).collect(),
        });
    };

    let related_files = main_result
        .parent()
        .map(|dir| files_with_prefix(dir, input_base_name))
        .unwrap_or_default();

    let cropped_faces = cropped_faces_dir
        .filter(|dir| dir.is_dir())
        .map(|dir| files_with_prefix(dir, input_base_name));

    Ok(OutputArtifact {
        main_result: absolute(main_result),
        related_files,
        cropped_faces,
    })
}

/// Tie-break among matches of one pattern. `matches` is sorted by name.
fn pick(matches: Vec<PathBuf>, input_base_name: &str) -> Option<PathBuf> {
    let preferred = matches.iter().position(|path| {
        path.file_name()
            .map(|n| n.to_string_lossy().starts_with(input_base_name))
            .unwrap_or(false)
    });
    let index = preferred.unwrap_or(0);
    matches.into_iter().nth(index)
}

fn files_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    list_files(dir)
        .into_iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .map(|(_, path)| absolute(path))
        .collect()
}

/// Regular files directly inside `dir`, sorted by name. Missing dir → empty.
fn list_files(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    files.sort_by(|a, b| a.0.cmp(&b.0));
    files
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}
