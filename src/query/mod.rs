//! Read-only graph traversal API (spec.md §4.7): `alltargets`, `deps`,
//! `reversedeps`, `input`, `output`, `print`, `somepath`, `whatinputs`,
//! `whatoutputs`, `changes`, `completions`, `rules description`. Every
//! query here takes `&BuildGraph` and never calls `transition`/
//! `declare_target` — queries run after a full parse of the requested
//! closure and never trigger a build, per the spec.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use crate::graph::{BuildGraph, TargetId};
use crate::label::Label;

pub fn alltargets(graph: &BuildGraph) -> Vec<Label> {
    let mut labels: Vec<Label> = graph.all_target_ids().map(|id| graph.target(id).label.clone()).collect();
    labels.sort();
    labels
}

/// Direct dependencies of `target`, as resolved at parse time.
pub fn deps(graph: &BuildGraph, target: TargetId) -> Vec<Label> {
    graph
        .target(target)
        .resolved_deps()
        .into_iter()
        .map(|id| graph.target(id).label.clone())
        .collect()
}

/// Targets that directly depend on `target`.
pub fn reversedeps(graph: &BuildGraph, target: TargetId) -> Vec<Label> {
    graph
        .all_target_ids()
        .filter(|&id| graph.target(id).resolved_deps().contains(&target))
        .map(|id| graph.target(id).label.clone())
        .collect()
}

/// Every source file this target declares (its `srcs`, not transitive
/// dependency outputs).
pub fn input(graph: &BuildGraph, target: TargetId) -> Vec<String> {
    graph.target(target).srcs.clone()
}

/// Every declared output path of this target.
pub fn output(graph: &BuildGraph, target: TargetId) -> Vec<String> {
    graph.target(target).declared_outputs.clone()
}

/// A human-readable description of one target (the `plz query print`
/// shape): label, command, srcs, outs, deps.
pub fn print(graph: &BuildGraph, target: TargetId) -> String {
    let t = graph.target(target);
    format!(
        "{}:\n  srcs = {:?}\n  outs = {:?}\n  deps = {:?}\n  cmd = {:?}",
        t.label,
        t.srcs,
        t.declared_outputs,
        t.declared_deps.iter().map(|l| l.to_string()).collect::<Vec<_>>(),
        t.command,
    )
}

/// BFS shortest dependency path from `from` to `to`, inclusive of both
/// endpoints. `None` if `to` isn't reachable from `from` via `deps`.
pub fn somepath(graph: &BuildGraph, from: TargetId, to: TargetId) -> Option<Vec<Label>> {
    if from == to {
        return Some(vec![graph.target(from).label.clone()]);
    }
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut parent: std::collections::HashMap<TargetId, TargetId> = std::collections::HashMap::new();
    visited.insert(from);
    queue.push_back(from);
    while let Some(current) = queue.pop_front() {
        for dep in graph.target(current).resolved_deps() {
            if visited.insert(dep) {
                parent.insert(dep, current);
                if dep == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&p) = parent.get(&cursor) {
                        path.push(p);
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path.into_iter().map(|id| graph.target(id).label.clone()).collect());
                }
                queue.push_back(dep);
            }
        }
    }
    None
}

/// Targets whose `srcs` include `file` (path relative to the target's
/// package).
pub fn whatinputs(graph: &BuildGraph, file: &str) -> Vec<Label> {
    graph
        .all_target_ids()
        .filter(|&id| graph.target(id).srcs.iter().any(|s| s == file))
        .map(|id| graph.target(id).label.clone())
        .collect()
}

/// Targets that declare `file` as one of their outputs.
pub fn whatoutputs(graph: &BuildGraph, file: &str) -> Vec<Label> {
    graph
        .all_target_ids()
        .filter(|&id| graph.target(id).declared_outputs.iter().any(|o| o == file))
        .map(|id| graph.target(id).label.clone())
        .collect()
}

/// Targets transitively affected by a set of changed source paths:
/// anything that declares one of `changed_files` as a `src`, plus
/// everything in their reverse-dependency closure.
pub fn changes(graph: &BuildGraph, changed_files: &[impl AsRef<Path>]) -> Vec<Label> {
    let changed: HashSet<String> = changed_files.iter().map(|p| p.as_ref().to_string_lossy().to_string()).collect();
    let mut affected: HashSet<TargetId> = graph
        .all_target_ids()
        .filter(|&id| graph.target(id).srcs.iter().any(|s| changed.contains(s)))
        .collect();

    let mut queue: VecDeque<TargetId> = affected.iter().copied().collect();
    while let Some(current) = queue.pop_front() {
        for id in graph.all_target_ids() {
            if graph.target(id).resolved_deps().contains(&current) && affected.insert(id) {
                queue.push_back(id);
            }
        }
    }

    let mut labels: Vec<Label> = affected.into_iter().map(|id| graph.target(id).label.clone()).collect();
    labels.sort();
    labels
}

/// Label-prefix completions, for shell tab-completion: every target label
/// whose string form starts with `prefix`.
pub fn completions(graph: &BuildGraph, prefix: &str) -> Vec<Label> {
    let mut matches: Vec<Label> = graph
        .all_target_ids()
        .map(|id| graph.target(id).label.clone())
        .filter(|label| label.to_string().starts_with(prefix))
        .collect();
    matches.sort();
    matches
}

/// A one-line rule description, `kind-ish` summary used by `plz query
/// rules`: whether it's a test, a binary, sandboxed, etc.
pub fn rules_description(graph: &BuildGraph, target: TargetId) -> String {
    let t = graph.target(target);
    let mut tags = Vec::new();
    if t.is_test() {
        tags.push("test");
    }
    if t.binary {
        tags.push("binary");
    }
    if t.sandbox {
        tags.push("sandboxed");
    }
    if tags.is_empty() {
        tags.push("genrule");
    }
    format!("{} [{}]", t.label, tags.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BuildTarget, PackageId};

    fn build_chain() -> (BuildGraph, TargetId, TargetId, TargetId) {
        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let a = graph
            .declare_target(pkg, Label::new("foo", "a"), |l, p| {
                let mut t = BuildTarget::new(l.clone(), p);
                t.srcs = vec!["a.txt".to_string()];
                t.declared_outputs = vec!["a.out".to_string()];
                t
            })
            .unwrap();
        let b = graph
            .declare_target(pkg, Label::new("foo", "b"), |l, p| BuildTarget::new(l.clone(), p))
            .unwrap();
        let c = graph
            .declare_target(pkg, Label::new("foo", "c"), |l, p| BuildTarget::new(l.clone(), p))
            .unwrap();
        graph.target(b).set_resolved_deps(vec![a]);
        graph.add_dependency_edge(b, a);
        graph.target(c).set_resolved_deps(vec![b]);
        graph.add_dependency_edge(c, b);
        (graph, a, b, c)
    }

    #[test]
    fn deps_and_reversedeps_are_symmetric() {
        let (graph, a, b, _c) = build_chain();
        assert_eq!(deps(&graph, b), vec![Label::new("foo", "a")]);
        assert_eq!(reversedeps(&graph, a), vec![Label::new("foo", "b")]);
    }

    #[test]
    fn somepath_finds_shortest_chain() {
        let (graph, a, _b, c) = build_chain();
        let path = somepath(&graph, c, a).unwrap();
        assert_eq!(path.first(), Some(&Label::new("foo", "c")));
        assert_eq!(path.last(), Some(&Label::new("foo", "a")));
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn whatinputs_finds_declaring_target() {
        let (graph, a, _b, _c) = build_chain();
        let found = whatinputs(&graph, "a.txt");
        assert_eq!(found, vec![graph.target(a).label.clone()]);
    }

    #[test]
    fn changes_propagates_through_reverse_deps() {
        let (graph, _a, _b, c) = build_chain();
        let affected = changes(&graph, &["a.txt"]);
        assert!(affected.contains(&graph.target(c).label.clone()));
    }

    #[test]
    fn completions_filters_by_prefix() {
        let (graph, _a, _b, _c) = build_chain();
        let found = completions(&graph, "//foo:a");
        assert_eq!(found, vec![Label::new("foo", "a")]);
    }
}
