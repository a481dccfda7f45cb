//! The BUILD-language `glob(include, exclude, hidden)` builtin (spec.md §4.1):
//! walks the source tree under the current package, matching `include`
//! patterns against `exclude`, and never recurses into a subdirectory that
//! is itself a package (identified by the presence of a BUILD file).
//!
//! Adapted from the teacher's shell glob expander: pattern-to-regex there,
//! `glob::Pattern` matching here, since the file-finding semantics Please
//! needs (package-boundary aware, no shell metacharacters, no extglob) are
//! much narrower than POSIX shell globbing.

use thiserror::Error;

use crate::fs::FileSystem;

#[derive(Debug, Error)]
pub enum GlobError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error(transparent)]
    Fs(#[from] crate::fs::FsError),
}

pub struct GlobSpec {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub hidden: bool,
}

/// Walk `package_dir` (a path relative to the repo root, no trailing slash)
/// collecting paths that match any `include` pattern and no `exclude`
/// pattern, relative to `package_dir`. Directories containing one of
/// `build_file_names` are subpackages and are never descended into.
pub async fn glob_package(
    fs: &dyn FileSystem,
    package_dir: &str,
    spec: &GlobSpec,
    build_file_names: &[String],
) -> Result<Vec<String>, GlobError> {
    let includes = compile(&spec.include)?;
    let excludes = compile(&spec.exclude)?;

    let mut matches = Vec::new();
    let mut pending = vec![String::new()];
    while let Some(relative) = pending.pop() {
        let dir_path = if relative.is_empty() {
            package_dir.to_string()
        } else {
            format!("{package_dir}/{relative}")
        };

        let entries = fs.readdir_with_file_types(&dir_path).await?;
        for entry in entries {
            if !spec.hidden && entry.name.starts_with('.') {
                continue;
            }
            let child_relative = if relative.is_empty() {
                entry.name.clone()
            } else {
                format!("{relative}/{}", entry.name)
            };

            if entry.is_directory {
                let child_dir = format!("{package_dir}/{child_relative}");
                if is_subpackage(fs, &child_dir, build_file_names).await {
                    continue;
                }
                pending.push(child_relative);
                continue;
            }

            if matches_any(&includes, &child_relative) && !matches_any(&excludes, &child_relative)
            {
                matches.push(child_relative);
            }
        }
    }
    matches.sort();
    Ok(matches)
}

fn compile(patterns: &[String]) -> Result<Vec<glob::Pattern>, GlobError> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p).map_err(|e| GlobError::InvalidPattern {
                pattern: p.clone(),
                source: e,
            })
        })
        .collect()
}

async fn is_subpackage(fs: &dyn FileSystem, dir: &str, build_file_names: &[String]) -> bool {
    for name in build_file_names {
        if fs.exists(&format!("{dir}/{name}")).await {
            return true;
        }
    }
    false
}

fn matches_any(patterns: &[glob::Pattern], path: &str) -> bool {
    patterns.iter().any(|p| p.matches(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    #[tokio::test]
    async fn include_pattern_matches_recursive_star_star() {
        let fs = InMemoryFs::with_files(&[
            ("/pkg/a.go", ""),
            ("/pkg/sub/b.go", ""),
            ("/pkg/c.txt", ""),
        ]);
        let spec = GlobSpec {
            include: vec!["**/*.go".to_string()],
            exclude: vec![],
            hidden: false,
        };
        let mut matches = glob_package(&fs, "/pkg", &spec, &["BUILD".to_string()])
            .await
            .unwrap();
        matches.sort();
        assert_eq!(matches, vec!["a.go".to_string(), "sub/b.go".to_string()]);
    }

    #[tokio::test]
    async fn stops_at_subpackage_boundary() {
        let fs = InMemoryFs::with_files(&[
            ("/pkg/a.go", ""),
            ("/pkg/sub/BUILD", ""),
            ("/pkg/sub/b.go", ""),
        ]);
        let spec = GlobSpec {
            include: vec!["**/*.go".to_string()],
            exclude: vec![],
            hidden: false,
        };
        let matches = glob_package(&fs, "/pkg", &spec, &["BUILD".to_string()])
            .await
            .unwrap();
        assert_eq!(matches, vec!["a.go".to_string()]);
    }

    #[tokio::test]
    async fn exclude_overrides_include() {
        let fs = InMemoryFs::with_files(&[("/pkg/a.go", ""), ("/pkg/a_test.go", "")]);
        let spec = GlobSpec {
            include: vec!["*.go".to_string()],
            exclude: vec!["*_test.go".to_string()],
            hidden: false,
        };
        let matches = glob_package(&fs, "/pkg", &spec, &["BUILD".to_string()])
            .await
            .unwrap();
        assert_eq!(matches, vec!["a.go".to_string()]);
    }

    #[tokio::test]
    async fn hidden_files_skipped_by_default() {
        let fs = InMemoryFs::with_files(&[("/pkg/.hidden.go", ""), ("/pkg/a.go", "")]);
        let spec = GlobSpec {
            include: vec!["*.go".to_string()],
            exclude: vec![],
            hidden: false,
        };
        let matches = glob_package(&fs, "/pkg", &spec, &["BUILD".to_string()])
            .await
            .unwrap();
        assert_eq!(matches, vec!["a.go".to_string()]);
    }
}
