//! The build graph: an arena of packages and targets (spec.md §3/§4.2).
//!
//! Cyclic dependency structure is inherently awkward to express with owned
//! Rust references, so — like the teacher's AST nodes index into a flat
//! `Vec` rather than holding `Rc`/`Box` children — `BuildGraph` owns
//! `Vec<Package>`/`Vec<BuildTarget>` and all cross-references are
//! `PackageId`/`TargetId` newtype indices. A side `petgraph::DiGraph` over
//! those same ids tracks dependency edges purely for cycle detection and
//! topological ordering, the same split `antlir2_depgraph::toposort` uses
//! between its arena (a sqlite table, there) and its `DiGraph<i64, ()>`.

pub mod package;
pub mod state;
pub mod target;

use std::collections::HashMap;

use fxhash::FxHashMap;
use petgraph::graph::DiGraph;
use petgraph::visit::{Dfs, IntoNeighbors, Reversed};
use thiserror::Error;

use crate::label::Label;

pub use package::{Package, PackageId, PackageState};
pub use state::TargetState;
pub use target::{BuildTarget, CallbackId, DeclaredHash, HashSpec, TargetId, TestSpec};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate target //{package}:{name}")]
    DuplicateTarget { package: String, name: String },
    #[error("no such package {0:?}")]
    UnknownPackage(String),
    #[error("no such target {0}")]
    UnknownTarget(Label),
    #[error("illegal state transition {from:?} -> {to:?} for {label}")]
    IllegalTransition {
        label: Label,
        from: TargetState,
        to: TargetState,
    },
    #[error("dependency cycle: {}", render_cycle(.0))]
    Cycle(Vec<Label>),
}

fn render_cycle(labels: &[Label]) -> String {
    let mut s = labels
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(" -> ");
    if let Some(first) = labels.first() {
        s.push_str(" -> ");
        s.push_str(&first.to_string());
    }
    s
}

#[derive(Default)]
pub struct BuildGraph {
    packages: Vec<Package>,
    package_by_dir: HashMap<(Option<String>, String), PackageId>,
    targets: Vec<BuildTarget>,
    target_by_label: FxHashMap<Label, TargetId>,
    /// Dependency edges, `dependent -> dependency`, used only for cycle
    /// detection and toposort; never consulted for normal traversal, which
    /// goes through `BuildTarget::resolved_deps`.
    edges: DiGraph<TargetId, ()>,
    node_index: FxHashMap<TargetId, petgraph::graph::NodeIndex>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create_package(
        &mut self,
        subrepo: Option<String>,
        dir: &str,
        filename: &str,
    ) -> PackageId {
        let key = (subrepo.clone(), dir.to_string());
        if let Some(id) = self.package_by_dir.get(&key) {
            return *id;
        }
        let id = PackageId(self.packages.len() as u32);
        self.packages.push(Package::new(subrepo, dir, filename));
        self.package_by_dir.insert(key, id);
        id
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub fn package_mut(&mut self, id: PackageId) -> &mut Package {
        &mut self.packages[id.0 as usize]
    }

    pub fn declare_target(
        &mut self,
        package_id: PackageId,
        label: Label,
        mut build: impl FnMut(&Label, PackageId) -> BuildTarget,
    ) -> Result<TargetId, GraphError> {
        let name = label.name.clone();
        if self.target_by_label.contains_key(&label) {
            return Err(GraphError::DuplicateTarget {
                package: label.package.clone(),
                name,
            });
        }
        let id = TargetId(self.targets.len() as u32);
        let target = build(&label, package_id);
        self.targets.push(target);
        let node = self.edges.add_node(id);
        self.node_index.insert(id, node);
        self.target_by_label.insert(label, id);
        self.package_mut(package_id)
            .declare_target(&name, id)
            .map_err(|name| GraphError::DuplicateTarget {
                package: self.package(package_id).dir.clone(),
                name,
            })?;
        Ok(id)
    }

    pub fn target(&self, id: TargetId) -> &BuildTarget {
        &self.targets[id.0 as usize]
    }

    pub fn target_id(&self, label: &Label) -> Option<TargetId> {
        self.target_by_label.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn all_target_ids(&self) -> impl Iterator<Item = TargetId> {
        (0..self.targets.len() as u32).map(TargetId)
    }

    /// Record a dependency edge `dependent -> dependency` for cycle
    /// detection. Call once per resolved dependency, after
    /// `BuildTarget::set_resolved_deps`.
    pub fn add_dependency_edge(&mut self, dependent: TargetId, dependency: TargetId) {
        let from = self.node_index[&dependent];
        let to = self.node_index[&dependency];
        self.edges.update_edge(from, to, ());
    }

    /// Topologically sort the targets reachable from `roots`. On success,
    /// returns dependencies before dependents. On a cycle, returns the
    /// looping path as labels, rotated so its lowest label sorts first for
    /// deterministic error messages (grounded in
    /// `antlir2_depgraph::toposort`'s cycle-reporting DFS).
    ///
    /// Walks the cycle via *reverse* dependency edges (dependent-of, not
    /// depends-on): for `A` depends on `B` depends on `C` depends on `A`,
    /// `edges` stores `A -> B -> C -> A`, but the reported path walks who
    /// depends on whom in reverse — `A -> C -> B -> A` — since that's the
    /// direction a cycle actually gets discovered in (the target that
    /// couldn't be scheduled because its own dependent never finished).
    pub fn toposort(&self) -> Result<Vec<TargetId>, GraphError> {
        match petgraph::algo::toposort(&self.edges, None) {
            Ok(sorted) => Ok(sorted.into_iter().rev().map(|nx| self.edges[nx]).collect()),
            Err(cycle_start) => {
                let start = cycle_start.node_id();
                let reversed = Reversed(&self.edges);
                let mut path = vec![start];
                let mut dfs = Dfs::new(reversed, start);
                while let Some(nx) = dfs.next(reversed) {
                    path.push(nx);
                    if reversed.neighbors(nx).any(|n| n == start) {
                        if let Some(min_idx) = path
                            .iter()
                            .enumerate()
                            .min_by_key(|(_, nx)| &self.target(self.edges[**nx]).label)
                            .map(|(idx, _)| idx)
                        {
                            path.rotate_left(min_idx);
                        }
                        let labels = path
                            .into_iter()
                            .map(|nx| self.target(self.edges[nx]).label.clone())
                            .collect();
                        return Err(GraphError::Cycle(labels));
                    }
                }
                unreachable!("DFS from a cycle member always completes the cycle")
            }
        }
    }

    pub fn transition(&self, id: TargetId, next: TargetState) -> Result<(), GraphError> {
        let target = self.target(id);
        target.transition(next).map_err(|(from, to)| GraphError::IllegalTransition {
            label: target.label.clone(),
            from,
            to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(graph: &mut BuildGraph, pkg: PackageId, name: &str) -> TargetId {
        let label = Label::new(graph.package(pkg).dir.clone(), name);
        graph
            .declare_target(pkg, label.clone(), |l, p| BuildTarget::new(l.clone(), p))
            .unwrap()
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        add(&mut graph, pkg, "bar");
        let label = Label::new("foo", "bar");
        let err = graph.declare_target(pkg, label, |l, p| BuildTarget::new(l.clone(), p));
        assert!(err.is_err());
    }

    #[test]
    fn toposort_orders_dependencies_before_dependents() {
        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let a = add(&mut graph, pkg, "a");
        let b = add(&mut graph, pkg, "b");
        // b depends on a
        graph.add_dependency_edge(b, a);
        let sorted = graph.toposort().unwrap();
        let pos_a = sorted.iter().position(|&id| id == a).unwrap();
        let pos_b = sorted.iter().position(|&id| id == b).unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn cycle_is_detected_and_reported() {
        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let a = add(&mut graph, pkg, "a");
        let b = add(&mut graph, pkg, "b");
        graph.add_dependency_edge(a, b);
        graph.add_dependency_edge(b, a);
        match graph.toposort() {
            Err(GraphError::Cycle(path)) => assert!(path.len() >= 2),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn three_node_cycle_reports_reverse_dependency_order() {
        // a depends on b, b depends on c, c depends on a.
        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let a = add(&mut graph, pkg, "a");
        let b = add(&mut graph, pkg, "b");
        let c = add(&mut graph, pkg, "c");
        graph.add_dependency_edge(a, b);
        graph.add_dependency_edge(b, c);
        graph.add_dependency_edge(c, a);
        match graph.toposort() {
            Err(GraphError::Cycle(path)) => {
                assert_eq!(
                    path,
                    vec![Label::new("foo", "a"), Label::new("foo", "c"), Label::new("foo", "b")]
                );
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn illegal_transition_surfaces_graph_error() {
        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let a = add(&mut graph, pkg, "a");
        assert!(graph.transition(a, TargetState::Building).is_err());
    }
}
