//! `BuildTarget` (spec.md §3): the unit the scheduler, cache and executor
//! all operate on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use indexmap::IndexMap;

use crate::hash::Fingerprint;
use crate::label::Label;

use super::package::PackageId;
use super::state::TargetState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u32);

/// Opaque handle to a pre/post-build callback registered by the BUILD-
/// language interpreter. `graph::Target` stores only this handle, never the
/// closure itself, so the graph has no dependency on `lang` (spec.md §9:
/// "pre/post-build callbacks ... never referenced by value from
/// `graph::Target`").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u32);

#[derive(Debug, Clone, Default)]
pub struct TestSpec {
    pub command: Option<String>,
    pub sandbox: bool,
    pub flaky: bool,
    pub flakes: u32,
    pub num_runs: u32,
    pub timeout_secs: Option<u64>,
    pub no_test_output: bool,
}

impl TestSpec {
    pub fn flakes_or_default(&self) -> u32 {
        if self.flaky {
            if self.flakes == 0 {
                3
            } else {
                self.flakes
            }
        } else {
            1
        }
    }

    pub fn num_runs_or_default(&self) -> u32 {
        if self.num_runs == 0 {
            1
        } else {
            self.num_runs
        }
    }
}

/// A declared `hashes` attribute value, e.g. `linux_amd64: <hex>` or a bare
/// hex digest applying to every architecture.
#[derive(Debug, Clone)]
pub struct DeclaredHash {
    pub arch_prefix: Option<String>,
    pub hex: String,
}

#[derive(Debug, Clone, Default)]
pub struct HashSpec {
    pub declared: Vec<DeclaredHash>,
    pub warn_only: bool,
}

impl HashSpec {
    /// Whether `actual` (hex-encoded) satisfies the declared hashes for
    /// `arch`, per spec.md §4.4's arch-prefix scoping.
    pub fn matches(&self, arch: &str, actual: &str) -> bool {
        if self.declared.is_empty() {
            return true;
        }
        self.declared.iter().any(|d| {
            d.hex == actual
                && d.arch_prefix
                    .as_deref()
                    .map(|prefix| prefix == arch)
                    .unwrap_or(true)
        })
    }
}

#[derive(Debug, Default)]
struct MutableState {
    state: TargetState,
    resolved_deps: Vec<TargetId>,
    output_hash: Option<Fingerprint>,
    output_files: Vec<(String, u32)>,
}

pub struct BuildTarget {
    pub label: Label,
    pub package: PackageId,
    pub srcs: Vec<String>,
    pub data: Vec<String>,
    pub tools: Vec<String>,
    pub declared_outputs: Vec<String>,
    pub declared_deps: Vec<Label>,
    pub command: String,
    pub test: Option<TestSpec>,
    pub debug_command: Option<String>,
    pub sandbox: bool,
    pub binary: bool,
    pub labels: Vec<String>,
    pub hash_spec: HashSpec,
    pub entry_points: IndexMap<String, String>,
    pub pre_build_callback: Option<CallbackId>,
    pub post_build_callback: Option<CallbackId>,
    /// Set when this target was declared by a post-build callback rather
    /// than at parse time, so the unbuilt-targets detector tolerates it
    /// (spec.md §4.1).
    pub added_post_build: bool,
    pending_deps: AtomicU32,
    mutable: RwLock<MutableState>,
}

impl BuildTarget {
    pub fn new(label: Label, package: PackageId) -> Self {
        Self {
            label,
            package,
            srcs: Vec::new(),
            data: Vec::new(),
            tools: Vec::new(),
            declared_outputs: Vec::new(),
            declared_deps: Vec::new(),
            command: String::new(),
            test: None,
            debug_command: None,
            sandbox: false,
            binary: false,
            labels: Vec::new(),
            hash_spec: HashSpec::default(),
            entry_points: IndexMap::new(),
            pre_build_callback: None,
            post_build_callback: None,
            added_post_build: false,
            pending_deps: AtomicU32::new(0),
            mutable: RwLock::new(MutableState::default()),
        }
    }

    pub fn is_test(&self) -> bool {
        self.test.is_some()
    }

    pub fn is_hidden_child(&self) -> bool {
        self.label.is_hidden_child()
    }

    pub fn state(&self) -> TargetState {
        self.mutable.read().expect("target lock poisoned").state
    }

    /// Move the target to `next`, returning an error carrying both states
    /// if the transition is illegal per spec.md §4.2.
    pub fn transition(&self, next: TargetState) -> Result<(), (TargetState, TargetState)> {
        let mut guard = self.mutable.write().expect("target lock poisoned");
        if !guard.state.can_transition_to(next) {
            return Err((guard.state, next));
        }
        guard.state = next;
        Ok(())
    }

    pub fn resolved_deps(&self) -> Vec<TargetId> {
        self.mutable.read().expect("target lock poisoned").resolved_deps.clone()
    }

    pub fn set_resolved_deps(&self, deps: Vec<TargetId>) {
        self.mutable.write().expect("target lock poisoned").resolved_deps = deps;
    }

    pub fn output_hash(&self) -> Option<Fingerprint> {
        self.mutable.read().expect("target lock poisoned").output_hash
    }

    pub fn set_output(&self, hash: Fingerprint, files: Vec<(String, u32)>) {
        let mut guard = self.mutable.write().expect("target lock poisoned");
        guard.output_hash = Some(hash);
        guard.output_files = files;
    }

    pub fn output_files(&self) -> Vec<(String, u32)> {
        self.mutable.read().expect("target lock poisoned").output_files.clone()
    }

    /// Initialize the pending-dependency counter once dependencies are
    /// resolved, per spec.md §4.2's O(1)-enqueue invariant.
    pub fn init_pending_deps(&self, count: u32) {
        self.pending_deps.store(count, Ordering::SeqCst);
    }

    /// Decrement on a dependency's `Built` transition; returns true if this
    /// was the last pending dependency (the target should move to Pending).
    pub fn dep_built(&self) -> bool {
        self.pending_deps.fetch_sub(1, Ordering::SeqCst) == 1
    }

    pub fn pending_dep_count(&self) -> u32 {
        self.pending_deps.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> BuildTarget {
        BuildTarget::new(Label::new("pkg", "name"), PackageId(0))
    }

    #[test]
    fn new_target_starts_inactive() {
        assert_eq!(target().state(), TargetState::Inactive);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let t = target();
        assert!(t.transition(TargetState::Pending).is_err());
    }

    #[test]
    fn legal_transition_chain_succeeds() {
        let t = target();
        t.transition(TargetState::Active).unwrap();
        t.transition(TargetState::Pending).unwrap();
        t.transition(TargetState::Building).unwrap();
        t.transition(TargetState::Built).unwrap();
        t.transition(TargetState::Tested).unwrap();
        assert_eq!(t.state(), TargetState::Tested);
    }

    #[test]
    fn pending_dep_counter_reaches_zero_once() {
        let t = target();
        t.init_pending_deps(2);
        assert!(!t.dep_built());
        assert!(t.dep_built());
    }

    #[test]
    fn hash_spec_empty_always_matches() {
        assert!(HashSpec::default().matches("linux_amd64", "deadbeef"));
    }

    #[test]
    fn hash_spec_arch_scoped_mismatch_rejected() {
        let spec = HashSpec {
            declared: vec![DeclaredHash {
                arch_prefix: Some("linux_amd64".to_string()),
                hex: "deadbeef".to_string(),
            }],
            warn_only: false,
        };
        assert!(spec.matches("linux_amd64", "deadbeef"));
        assert!(!spec.matches("darwin_arm64", "deadbeef"));
    }
}
