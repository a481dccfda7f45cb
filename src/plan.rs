//! Drives `state::BuildState` over a requested closure of targets
//! (spec.md §4.2): computes the transitive dependency closure of the
//! labels a `plz build`/`plz test` invocation named, marks it `Active`,
//! and submits each target's build task the moment its dependencies finish
//! — the same closure-then-drain shape cargo's `unit_dependency` module
//! uses to walk a `UnitGraph` before handing ready units to the job queue,
//! adapted here to drive off `state::BuildEvent`s instead of polling.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Error;
use crate::graph::{BuildGraph, TargetId, TargetState};
use crate::label::Label;
use crate::state::{BuildEvent, BuildState};

/// Outcome of driving one requested closure to completion.
#[derive(Debug, Default)]
pub struct PlanResult {
    pub built: Vec<Label>,
    pub tested: Vec<Label>,
    pub failed: Vec<(Label, String)>,
}

impl PlanResult {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Transitive closure of `roots` over `resolved_deps`, plus a reverse map
/// from each target to the closure members that directly depend on it.
fn closure_and_reverse_deps(graph: &BuildGraph, roots: &[TargetId]) -> (HashSet<TargetId>, HashMap<TargetId, Vec<TargetId>>) {
    let mut closure = HashSet::new();
    let mut stack: Vec<TargetId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        if !closure.insert(id) {
            continue;
        }
        stack.extend(graph.target(id).resolved_deps());
    }

    let mut reverse: HashMap<TargetId, Vec<TargetId>> = HashMap::new();
    for &id in &closure {
        for dep in graph.target(id).resolved_deps() {
            reverse.entry(dep).or_default().push(id);
        }
    }
    (closure, reverse)
}

/// Runs every target reachable from `roots` to a successful or failed
/// terminal state: builds the whole closure, and when `run_tests` is set,
/// also submits a test task for every closure member that declares one.
/// Returns once every target in the closure has reached a terminal state
/// (or would have, had its dependencies not already failed).
pub async fn run_build_closure(
    state: &BuildState,
    events_rx: &mut UnboundedReceiver<BuildEvent>,
    roots: &[TargetId],
    run_tests: bool,
) -> Result<PlanResult, Error> {
    let graph_handle = state.graph();

    let (closure, reverse_deps, label_to_id, wants_test) = {
        let graph = graph_handle.read().await;
        let (closure, reverse_deps) = closure_and_reverse_deps(&graph, roots);
        let mut label_to_id = HashMap::with_capacity(closure.len());
        let mut wants_test = HashSet::new();
        for &id in &closure {
            let target = graph.target(id);
            label_to_id.insert(target.label.clone(), id);
            if run_tests && target.is_test() {
                wants_test.insert(id);
            }
        }
        (closure, reverse_deps, label_to_id, wants_test)
    };

    activate_and_submit_ready(state, &graph_handle, &closure).await?;

    let mut result = PlanResult::default();
    let mut finished: HashSet<TargetId> = HashSet::new();

    while finished.len() < closure.len() {
        let Some(event) = events_rx.recv().await else {
            break;
        };
        match event {
            BuildEvent::Built { label, .. } => {
                let Some(&id) = label_to_id.get(&label) else { continue };
                if !closure.contains(&id) {
                    continue;
                }
                result.built.push(label.clone());
                if wants_test.contains(&id) {
                    state.submit_test(id).await;
                } else {
                    finished.insert(id);
                    propagate_ready(state, &graph_handle, &reverse_deps, &closure, id).await?;
                }
            }
            BuildEvent::BuildFailed { label, reason } => {
                let Some(&id) = label_to_id.get(&label) else { continue };
                if !closure.contains(&id) {
                    continue;
                }
                result.failed.push((label, reason));
                fail_closure_from(&graph_handle, &reverse_deps, &closure, id, &mut finished).await;
            }
            BuildEvent::Tested { label, .. } => {
                let Some(&id) = label_to_id.get(&label) else { continue };
                if !closure.contains(&id) {
                    continue;
                }
                result.tested.push(label.clone());
                finished.insert(id);
                propagate_ready(state, &graph_handle, &reverse_deps, &closure, id).await?;
            }
            BuildEvent::TestFailed { label, reason } => {
                let Some(&id) = label_to_id.get(&label) else { continue };
                if !closure.contains(&id) {
                    continue;
                }
                result.failed.push((label, reason));
                fail_closure_from(&graph_handle, &reverse_deps, &closure, id, &mut finished).await;
            }
            BuildEvent::Building(_) => {}
        }
    }

    Ok(result)
}

/// Marks every closure member `Active` and initializes its pending-
/// dependency counter (spec.md §4.2's O(1)-enqueue invariant: counted only
/// over dependencies that are themselves part of this closure), then
/// submits a build task for every target whose count is already zero.
async fn activate_and_submit_ready(
    state: &BuildState,
    graph_handle: &std::sync::Arc<tokio::sync::RwLock<BuildGraph>>,
    closure: &HashSet<TargetId>,
) -> Result<(), Error> {
    let mut ready = Vec::new();
    {
        let graph = graph_handle.read().await;
        for &id in closure {
            let target = graph.target(id);
            if target.state() == TargetState::Inactive {
                graph.transition(id, TargetState::Active)?;
            }
            let dep_count = target.resolved_deps().iter().filter(|d| closure.contains(d)).count() as u32;
            target.init_pending_deps(dep_count);
            if dep_count == 0 {
                graph.transition(id, TargetState::Pending)?;
                ready.push(id);
            }
        }
    }
    for id in ready {
        state.submit_build(id).await;
    }
    Ok(())
}

/// Called once `id` reaches a successful terminal point (built, or tested
/// when a test was requested): decrements every dependent's pending-
/// dependency counter and submits a build task for any that just reached
/// zero.
async fn propagate_ready(
    state: &BuildState,
    graph_handle: &std::sync::Arc<tokio::sync::RwLock<BuildGraph>>,
    reverse_deps: &HashMap<TargetId, Vec<TargetId>>,
    closure: &HashSet<TargetId>,
    id: TargetId,
) -> Result<(), Error> {
    let Some(dependents) = reverse_deps.get(&id) else {
        return Ok(());
    };
    let mut ready = Vec::new();
    {
        let graph = graph_handle.read().await;
        for &dependent in dependents {
            if !closure.contains(&dependent) {
                continue;
            }
            if graph.target(dependent).dep_built() {
                graph.transition(dependent, TargetState::Pending)?;
                ready.push(dependent);
            }
        }
    }
    for id in ready {
        state.submit_build(id).await;
    }
    Ok(())
}

/// A build/test failure never unblocks its dependents' pending-dependency
/// counters, so without this they'd wait forever. Walks the reverse-
/// dependency closure from the failed target, marks every still-
/// non-terminal member `Stopped` (spec.md §4.2: "abandoned due to upstream
/// failure"), and counts them finished so the driving loop can terminate.
async fn fail_closure_from(
    graph_handle: &std::sync::Arc<tokio::sync::RwLock<BuildGraph>>,
    reverse_deps: &HashMap<TargetId, Vec<TargetId>>,
    closure: &HashSet<TargetId>,
    failed: TargetId,
    finished: &mut HashSet<TargetId>,
) {
    finished.insert(failed);
    let mut stack = reverse_deps.get(&failed).cloned().unwrap_or_default();
    let graph = graph_handle.read().await;
    while let Some(id) = stack.pop() {
        if !closure.contains(&id) || !finished.insert(id) {
            continue;
        }
        let target = graph.target(id);
        if !target.state().is_terminal() {
            let _ = graph.transition(id, TargetState::Stopped);
        }
        if let Some(next) = reverse_deps.get(&id) {
            stack.extend(next.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::Cache;
    use crate::fs::{FileSystem, RealFs};
    use crate::graph::{BuildGraph as Graph, BuildTarget, PackageId};

    fn two_target_chain() -> (BuildState, UnboundedReceiver<BuildEvent>, TargetId, TargetId, tempfile::TempDir) {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("a.txt"), b"a").unwrap();

        let mut graph = Graph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let a = graph
            .declare_target(pkg, Label::new("foo", "a"), |l, p| {
                let mut t = BuildTarget::new(l.clone(), p);
                t.srcs = vec!["a.txt".to_string()];
                t.declared_outputs = vec!["a.out".to_string()];
                t.command = "cp a.txt a.out".to_string();
                t
            })
            .unwrap();
        let b = graph
            .declare_target(pkg, Label::new("foo", "b"), |l, p| {
                let mut t = BuildTarget::new(l.clone(), p);
                t.declared_outputs = vec!["b.out".to_string()];
                t.command = "touch b.out".to_string();
                t.declared_deps = vec![Label::new("foo", "a")];
                t
            })
            .unwrap();
        graph.target(b).set_resolved_deps(vec![a]);
        graph.add_dependency_edge(b, a);

        let fs: Arc<dyn FileSystem> = Arc::new(RealFs::new(repo.path()));
        let (state, rx) = BuildState::new(graph, fs, Cache::empty(), "linux_amd64", repo.path(), true, None);
        (state, rx, a, b, repo)
    }

    #[tokio::test]
    async fn closure_builds_dependency_before_dependent() {
        let (state, mut rx, a, b, _repo) = two_target_chain();
        let scheduler = state.scheduler().clone();
        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(2).await })
        };

        let result = run_build_closure(&state, &mut rx, &[b], false).await.unwrap();
        scheduler.stop_and_drain();
        runner.await.unwrap();

        assert!(result.ok(), "unexpected failures: {:?}", result.failed);
        assert_eq!(result.built.len(), 2);

        let graph = state.graph();
        let graph = graph.read().await;
        assert_eq!(graph.target(a).state(), TargetState::Built);
        assert_eq!(graph.target(b).state(), TargetState::Built);
    }
}
