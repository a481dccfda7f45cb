//! BUILD-file discovery and whole-repo parsing (spec.md §4.1/§5: "finds
//! every BUILD file under the requested closure, parses each exactly
//! once").
//!
//! Parsing is single-threaded by construction — `lang::evaluate_package`
//! takes its graph and callback registry as `Rc<RefCell<..>>` handles
//! because its builtin closures must re-borrow them across calls, the same
//! restriction the teacher's tree-walking bash interpreter places on its
//! own scope chain. `discover_and_parse` walks the repo, evaluates every
//! BUILD file against one shared `Rc<RefCell<BuildGraph>>`, resolves every
//! target's `declared_deps` labels into graph edges, and then unwraps the
//! `Rc`/`RefCell` pair into the plain `BuildGraph` the multi-threaded build
//! phase (`state::BuildState`) owns behind an `Arc<RwLock<..>>` instead.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::fs::{FileSystem, RealFs};
use crate::graph::{BuildGraph, GraphError};
use crate::label::{Label, LabelKind};
use crate::lang::callback::CallbackRegistry;
use crate::lang::{self, LangError};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: LangError,
    },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("{label} declares a dependency on unknown target {dep}")]
    UnknownDependency { label: Label, dep: Label },
}

/// Recursively lists every BUILD file under `repo_root`, skipping the
/// output directory and dot-directories (`.git`, `.plzconfig` overlays
/// live next to `BUILD`, not inside a directory plz would descend into).
fn find_build_files(repo_root: &Path, build_file_names: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![repo_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') || name == "plz-out" {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if build_file_names.iter().any(|n| n == name.as_ref()) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Parses every BUILD file under `repo_root`, declaring each file's targets
/// into one shared graph, then resolves every declared dependency label
/// into a `TargetId` edge. Returns the fully-parsed, fully-resolved graph.
///
/// Builds its own `RealFs` rooted at `repo_root` rather than taking one as
/// a parameter: everything this function touches (`Rc`, `RefCell`) is
/// `!Send` by design, so a caller driving this from an async context must
/// run the whole call inside `tokio::task::spawn_blocking` (matching the
/// "parse" task class of spec.md §4.3) and can only hand it `Send` inputs
/// like `repo_root` across that boundary, not an already-constructed `Rc`.
pub fn discover_and_parse(
    repo_root: &Path,
    build_file_names: &[String],
    preload_subincludes: &[String],
    preload_build_defs: &[String],
    buildconfig: &HashMap<String, String>,
) -> Result<BuildGraph, DiscoveryError> {
    let fs: Rc<dyn FileSystem> = Rc::new(RealFs::new(repo_root));
    let graph = Rc::new(RefCell::new(BuildGraph::new()));
    let callbacks = Rc::new(RefCell::new(CallbackRegistry::new()));

    for build_file in find_build_files(repo_root, build_file_names)? {
        let source = std::fs::read_to_string(&build_file).map_err(|source| DiscoveryError::Io {
            path: build_file.clone(),
            source,
        })?;
        let package_dir = build_file
            .parent()
            .unwrap_or(repo_root)
            .strip_prefix(repo_root)
            .unwrap_or(Path::new(""))
            .to_string_lossy()
            .replace('\\', "/");
        let filename = build_file.to_string_lossy().to_string();

        let package_id = graph.borrow_mut().get_or_create_package(None, &package_dir, &filename);

        lang::evaluate_package(
            &source,
            Rc::clone(&fs),
            Rc::clone(&graph),
            Rc::clone(&callbacks),
            package_id,
            package_dir,
            build_file_names.to_vec(),
            preload_subincludes,
            preload_build_defs,
            buildconfig,
        )
        .map_err(|source| DiscoveryError::Parse {
            path: build_file,
            source,
        })?;
    }

    resolve_dependencies(&graph)?;

    drop(callbacks);
    let graph = Rc::try_unwrap(graph)
        .unwrap_or_else(|_| panic!("dangling Rc<RefCell<BuildGraph>> clone outstanding after parsing"))
        .into_inner();
    Ok(graph)
}

/// Turns every target's parse-time `declared_deps` (absolute `Label`s) into
/// `resolved_deps`/dependency edges, so build-time consumers
/// (`state::BuildState::rule_hash`, the scheduler driver's pending-dep
/// counters) never need to look anything up by label again.
fn resolve_dependencies(graph: &Rc<RefCell<BuildGraph>>) -> Result<(), DiscoveryError> {
    let ids: Vec<_> = graph.borrow().all_target_ids().collect();
    for id in ids {
        let declared = graph.borrow().target(id).declared_deps.clone();
        let mut resolved = Vec::with_capacity(declared.len());
        for dep_label in &declared {
            let dep_id = match dep_label.kind {
                LabelKind::Single => {
                    graph.borrow().target_id(dep_label).ok_or_else(|| DiscoveryError::UnknownDependency {
                        label: graph.borrow().target(id).label.clone(),
                        dep: dep_label.clone(),
                    })?
                }
                LabelKind::AllInPackage | LabelKind::Recursive => {
                    // Expanded at parse time by any builtin that accepts
                    // `//pkg:all`/`//pkg/...` in a `deps` list; by the time
                    // dependencies are resolved here every entry is a
                    // single concrete label.
                    return Err(DiscoveryError::UnknownDependency {
                        label: graph.borrow().target(id).label.clone(),
                        dep: dep_label.clone(),
                    });
                }
            };
            resolved.push(dep_id);
        }
        let graph_ref = graph.borrow();
        graph_ref.target(id).set_resolved_deps(resolved.clone());
        drop(graph_ref);
        let mut graph_mut = graph.borrow_mut();
        for dep_id in resolved {
            graph_mut.add_dependency_edge(id, dep_id);
        }
    }
    // A cycle anywhere in the requested repo is reported eagerly, not only
    // when it happens to fall inside a later build's requested closure.
    graph.borrow().toposort()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_and_links_two_packages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(
            dir.path().join("a/BUILD"),
            "genrule(name = \"a\", srcs = [], outs = [\"a.out\"], cmd = \"true\")\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b/BUILD"),
            "genrule(name = \"b\", srcs = [], outs = [\"b.out\"], cmd = \"true\", deps = [\"//a:a\"])\n",
        )
        .unwrap();

        let graph = discover_and_parse(dir.path(), &["BUILD".to_string()], &[], &[], &HashMap::new()).unwrap();

        let a = graph.target_id(&Label::new("a", "a")).unwrap();
        let b = graph.target_id(&Label::new("b", "b")).unwrap();
        assert_eq!(graph.target(b).resolved_deps(), vec![a]);
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("BUILD"),
            "genrule(name = \"b\", srcs = [], outs = [\"o\"], cmd = \"true\", deps = [\"//nope:nope\"])\n",
        )
        .unwrap();
        let result = discover_and_parse(dir.path(), &["BUILD".to_string()], &[], &[], &HashMap::new());
        assert!(matches!(result, Err(DiscoveryError::UnknownDependency { .. })));
    }
}
