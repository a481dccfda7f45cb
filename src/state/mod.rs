//! `BuildState` (spec.md §3): the object one `plz` invocation constructs
//! once and shares across every parse/build/test task — owning the
//! `BuildGraph`, the `Scheduler`, the `Cache`, the build-dedup table, the
//! coverage accumulator and the results channel, the way the teacher's
//! `Bash` struct owns its `FileSystem`/interpreter/`sandbox` collaborators
//! and hands out cheap, cloneable handles to them rather than passing each
//! one around individually.

pub mod repo_lock;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use crate::cache::{Artifact, Cache};
use crate::error::Error;
use crate::exec::{EnvBuilder, ExecSpec, Executor, StagedDir};
use crate::fs::FileSystem;
use crate::graph::{BuildGraph, BuildTarget, TargetId, TargetState};
use crate::hash::{hash_file_content, Fingerprint, Hasher};
use crate::label::Label;
use crate::scheduler::{BuildDedup, Claim, Scheduler};
use crate::test_orchestrator::{self, AttemptResult, CoverageAccumulator, TestResults};

/// Emitted on the channel returned by [`BuildState::new`] as targets move
/// through the pipeline — the "results channel" of spec.md §3, so the CLI
/// layer learns about progress and failures without the core ever calling
/// `println!` itself.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    Building(Label),
    Built {
        label: Label,
        fingerprint: Fingerprint,
        reused: bool,
    },
    BuildFailed {
        label: Label,
        reason: String,
    },
    Tested {
        label: Label,
        passed: usize,
        failed: usize,
        skipped: usize,
        flaky: bool,
    },
    TestFailed {
        label: Label,
        reason: String,
    },
}

/// A snapshot of the fields a build/test task needs, taken under a single
/// read lock so the rest of the pipeline never re-touches `BuildGraph`
/// while doing file I/O or running a subprocess.
#[derive(Clone)]
struct TargetSnapshot {
    label: Label,
    srcs: Vec<String>,
    data: Vec<String>,
    tools: Vec<String>,
    declared_outputs: Vec<String>,
    command: String,
    sandbox: bool,
    binary: bool,
    labels: Vec<String>,
    hash_spec: crate::graph::HashSpec,
    dep_ids: Vec<TargetId>,
    test: Option<crate::graph::TestSpec>,
}

impl TargetSnapshot {
    fn take(graph: &BuildGraph, id: TargetId) -> Self {
        let t: &BuildTarget = graph.target(id);
        Self {
            label: t.label.clone(),
            srcs: t.srcs.clone(),
            data: t.data.clone(),
            tools: t.tools.clone(),
            declared_outputs: t.declared_outputs.clone(),
            command: t.command.clone(),
            sandbox: t.sandbox,
            binary: t.binary,
            labels: t.labels.clone(),
            hash_spec: t.hash_spec.clone(),
            dep_ids: t.resolved_deps(),
            test: t.test.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BuildState {
    graph: Arc<RwLock<BuildGraph>>,
    fs: Arc<dyn FileSystem>,
    cache: Arc<Cache>,
    dedup: Arc<BuildDedup>,
    scheduler: Scheduler,
    coverage: Arc<std::sync::Mutex<CoverageAccumulator>>,
    events_tx: mpsc::UnboundedSender<BuildEvent>,
    arch: String,
    repo_root: PathBuf,
    out_root: PathBuf,
    /// `.plzconfig`'s `[Build] Timeout` (spec.md §6), applied to every
    /// build command that doesn't carry its own (the language has no
    /// per-`genrule` build timeout attribute, unlike `test`'s `timeout`).
    default_timeout: Option<Duration>,
}

impl BuildState {
    pub fn new(
        graph: BuildGraph,
        fs: Arc<dyn FileSystem>,
        cache: Cache,
        arch: impl Into<String>,
        repo_root: impl Into<PathBuf>,
        keep_going: bool,
        default_timeout_secs: Option<u64>,
    ) -> (Self, mpsc::UnboundedReceiver<BuildEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let repo_root = repo_root.into();
        let out_root = repo_root.join("plz-out");
        let state = Self {
            graph: Arc::new(RwLock::new(graph)),
            fs,
            cache: Arc::new(cache),
            dedup: Arc::new(BuildDedup::new()),
            scheduler: Scheduler::new(keep_going),
            coverage: Arc::new(std::sync::Mutex::new(CoverageAccumulator::new())),
            events_tx,
            arch: arch.into(),
            repo_root,
            out_root,
            default_timeout: default_timeout_secs.map(Duration::from_secs),
        };
        (state, events_rx)
    }

    pub fn graph(&self) -> Arc<RwLock<BuildGraph>> {
        Arc::clone(&self.graph)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn coverage_report(&self) -> Vec<(String, f64)> {
        self.coverage.lock().expect("coverage lock poisoned").by_file()
    }

    /// The combined junit path spec.md §6 names: `plz-out/log/test_results.xml`.
    pub fn combined_test_results_path(&self) -> PathBuf {
        self.out_root.join("log").join("test_results.xml")
    }

    /// Submits a build task for `id`. Callers enqueue a target only once
    /// `BuildTarget::dep_built` reports its pending-dependency count has
    /// reached zero (spec.md §4.2) and after transitioning it to `Active`
    /// then `Pending`.
    pub async fn submit_build(&self, id: TargetId) -> bool {
        let state = self.clone();
        self.scheduler.submit_build(async move { state.run_build(id).await }).await
    }

    /// Submits a test task for `id`. Only meaningful once the target has
    /// reached `Built`/`Reused`/`Cached` (spec.md §4.6: tests run after a
    /// target is built).
    pub async fn submit_test(&self, id: TargetId) -> bool {
        let state = self.clone();
        self.scheduler.submit_test(async move { state.run_test(id).await }).await
    }

    async fn run_build(&self, id: TargetId) {
        if let Err(err) = self.build_one(id).await {
            let label = self.graph.read().await.target(id).label.clone();
            let _ = self.graph.read().await.transition(id, TargetState::BuildFailed);
            let _ = self.events_tx.send(BuildEvent::BuildFailed {
                label,
                reason: err.to_string(),
            });
            self.scheduler.report_failure();
        }
    }

    async fn build_one(&self, id: TargetId) -> Result<(), Error> {
        let snapshot = {
            let graph = self.graph.read().await;
            TargetSnapshot::take(&graph, id)
        };

        {
            let graph = self.graph.read().await;
            graph.transition(id, TargetState::Building)?;
        }
        let _ = self.events_tx.send(BuildEvent::Building(snapshot.label.clone()));

        let fingerprint = self.rule_hash(&snapshot).await?;

        match self.dedup.claim(fingerprint).await {
            Claim::Leader => {
                let result = self.build_as_leader(id, &snapshot, fingerprint).await;
                self.dedup.release(fingerprint).await;
                result
            }
            Claim::Follower(notify) => {
                notify.notified().await;
                self.finish_as_follower(id, &snapshot, fingerprint).await
            }
        }
    }

    /// The first caller to claim `fingerprint`: checks the cache, and
    /// falls back to actually executing the target's command.
    async fn build_as_leader(&self, id: TargetId, snapshot: &TargetSnapshot, fingerprint: Fingerprint) -> Result<(), Error> {
        if let Some(artifact) = self.cache.retrieve(&fingerprint).await? {
            return self.adopt_cached_output(id, snapshot, fingerprint, &artifact).await;
        }
        self.execute_and_store(id, snapshot, fingerprint).await
    }

    /// A caller that found `fingerprint` already claimed by another task:
    /// once woken, the leader has either stored a fresh cache entry or
    /// failed outright.
    async fn finish_as_follower(&self, id: TargetId, snapshot: &TargetSnapshot, fingerprint: Fingerprint) -> Result<(), Error> {
        match self.cache.retrieve(&fingerprint).await? {
            Some(artifact) => self.adopt_cached_output(id, snapshot, fingerprint, &artifact).await,
            None => Err(Error::Build {
                label: snapshot.label.clone(),
                reason: "the task building this fingerprint failed".to_string(),
            }),
        }
    }

    /// Unpacks a cache hit onto disk and runs it through the declared-hash
    /// verification spec.md §4.4 requires, transitioning `Built -> Reused
    /// -> Cached`.
    async fn adopt_cached_output(
        &self,
        id: TargetId,
        snapshot: &TargetSnapshot,
        fingerprint: Fingerprint,
        artifact: &Artifact,
    ) -> Result<(), Error> {
        let files = unpack_artifact(artifact).map_err(|reason| Error::Build {
            label: snapshot.label.clone(),
            reason,
        })?;
        let sizes: Vec<(String, u32)> = files.iter().map(|(p, b)| (p.clone(), b.len() as u32)).collect();
        for (rel, bytes) in &files {
            let dest = self.output_path(snapshot, rel);
            write_output_file(&dest, bytes).map_err(Error::Io)?;
        }

        {
            let graph = self.graph.read().await;
            let target = graph.target(id);
            target.set_output(fingerprint, sizes);
            graph.transition(id, TargetState::Built)?;
            graph.transition(id, TargetState::Reused)?;
        }

        self.verify_hash(snapshot, &fingerprint)?;

        {
            let graph = self.graph.read().await;
            graph.transition(id, TargetState::Cached)?;
        }
        let _ = self.events_tx.send(BuildEvent::Built {
            label: snapshot.label.clone(),
            fingerprint,
            reused: true,
        });
        Ok(())
    }

    /// Actually stages the target's inputs, runs its command under `exec`,
    /// hashes and verifies the outputs, writes them to `plz-out`, and
    /// stores the result in the cache for any waiting followers.
    async fn execute_and_store(&self, id: TargetId, snapshot: &TargetSnapshot, fingerprint: Fingerprint) -> Result<(), Error> {
        let staged_root = self.staging_root(&snapshot.label);
        let data_files = self.stage_list(snapshot);
        StagedDir::stage_at(&staged_root, &data_files).map_err(Error::Exec)?;

        let env = EnvBuilder::new()
            .with_host_allow_list(&staged_root.to_string_lossy())
            .with_arch_os(&self.arch, std::env::consts::OS)
            .build();

        let spec = ExecSpec {
            command: snapshot.command.clone(),
            working_dir: staged_root.clone(),
            env,
            timeout: self.default_timeout,
            sandboxed: snapshot.sandbox,
            data_files: Vec::new(),
        };
        let outcome = Executor::run(&spec).await.map_err(Error::Exec)?;
        if outcome.exit_code != Some(0) {
            return Err(Error::Build {
                label: snapshot.label.clone(),
                reason: format!(
                    "command exited with {:?}: {}",
                    outcome.exit_code,
                    String::from_utf8_lossy(&outcome.output)
                ),
            });
        }

        let mut files = Vec::with_capacity(snapshot.declared_outputs.len());
        for out in &snapshot.declared_outputs {
            let path = staged_root.join(out);
            let bytes = tokio::fs::read(&path).await.map_err(Error::Io)?;
            files.push((out.clone(), bytes));
        }

        let output_hash = hash_outputs(&files);
        let hex = output_hash.to_hex();
        if !snapshot.hash_spec.matches(&self.arch, &hex) {
            if snapshot.hash_spec.warn_only {
                tracing::warn!(label = %snapshot.label, actual = %hex, "declared hash mismatch (warn-only)");
            } else {
                return Err(Error::HashMismatch {
                    label: snapshot.label.clone(),
                    expected: snapshot.hash_spec.declared.iter().map(|d| d.hex.clone()).collect(),
                    actual: hex,
                });
            }
        }

        let sizes: Vec<(String, u32)> = files.iter().map(|(p, b)| (p.clone(), b.len() as u32)).collect();
        for (rel, bytes) in &files {
            let dest = self.output_path(snapshot, rel);
            write_output_file(&dest, bytes).map_err(Error::Io)?;
        }

        self.cache
            .store(&fingerprint, &Artifact { bytes: pack_artifact(&files) })
            .await?;

        {
            let graph = self.graph.read().await;
            let target = graph.target(id);
            target.set_output(fingerprint, sizes);
            graph.transition(id, TargetState::Built)?;
        }
        let _ = self.events_tx.send(BuildEvent::Built {
            label: snapshot.label.clone(),
            fingerprint,
            reused: false,
        });
        Ok(())
    }

    fn verify_hash(&self, snapshot: &TargetSnapshot, fingerprint: &Fingerprint) -> Result<(), Error> {
        let hex = fingerprint.to_hex();
        if snapshot.hash_spec.matches(&self.arch, &hex) {
            return Ok(());
        }
        if snapshot.hash_spec.warn_only {
            tracing::warn!(label = %snapshot.label, actual = %hex, "declared hash mismatch (warn-only)");
            return Ok(());
        }
        Err(Error::HashMismatch {
            label: snapshot.label.clone(),
            expected: snapshot.hash_spec.declared.iter().map(|d| d.hex.clone()).collect(),
            actual: hex,
        })
    }

    /// `RuleHash` (spec.md §4.4): the target's canonicalised attributes,
    /// the recursive output hashes of resolved dependencies (in
    /// declaration order), and the contents of its local source files.
    async fn rule_hash(&self, snapshot: &TargetSnapshot) -> Result<Fingerprint, Error> {
        let mut hasher = Hasher::new();
        hasher.put_str(&snapshot.command);
        hasher.put_bool(snapshot.sandbox);
        hasher.put_str(&self.arch);
        hasher.put_strs(snapshot.tools.iter().map(String::as_str));
        hasher.put_strs(snapshot.declared_outputs.iter().map(String::as_str));
        hasher.put_strs(snapshot.labels.iter().map(String::as_str));

        {
            let graph = self.graph.read().await;
            for dep in &snapshot.dep_ids {
                let dep_target = graph.target(*dep);
                let dep_hash = dep_target.output_hash().ok_or_else(|| Error::Build {
                    label: snapshot.label.clone(),
                    reason: format!("dependency {} has no output hash yet", dep_target.label),
                })?;
                hasher.put_fingerprint(&dep_hash);
            }
        }

        for src in snapshot.srcs.iter().chain(snapshot.data.iter()) {
            let bytes = self.fs.read_file_bytes(src).await.map_err(|e| Error::Build {
                label: snapshot.label.clone(),
                reason: format!("reading {src}: {e}"),
            })?;
            hash_file_content(&mut hasher, src, &bytes);
        }

        Ok(hasher.finalize())
    }

    fn staging_root(&self, label: &Label) -> PathBuf {
        let safe_pkg = label.package.replace('/', "_");
        self.out_root.join("tmp").join(format!("{safe_pkg}.{}._build", label.name))
    }

    fn stage_list(&self, snapshot: &TargetSnapshot) -> Vec<(String, PathBuf)> {
        snapshot
            .srcs
            .iter()
            .chain(snapshot.data.iter())
            .chain(snapshot.tools.iter())
            .map(|rel| (rel.clone(), self.repo_root.join(rel)))
            .collect()
    }

    /// Where a declared output ends up under `plz-out`, per spec.md §6:
    /// `plz-out/bin/<pkg>/<name>` for binaries, `plz-out/gen/<pkg>/...`
    /// otherwise.
    fn output_path(&self, snapshot: &TargetSnapshot, rel: &str) -> PathBuf {
        let kind = if snapshot.binary { "bin" } else { "gen" };
        self.out_root.join(kind).join(&snapshot.label.package).join(rel)
    }

    // ---- test orchestration -------------------------------------------

    async fn run_test(&self, id: TargetId) {
        let snapshot = {
            let graph = self.graph.read().await;
            TargetSnapshot::take(&graph, id)
        };
        let Some(test_spec) = snapshot.test.clone() else {
            return;
        };

        let state = self.clone();
        let snap = snapshot.clone();
        let results = test_orchestrator::run_with_flake_retries(test_spec.flakes_or_default(), test_spec.no_test_output, move |attempt| {
            let state = state.clone();
            let snap_clone = snap.clone();
            async move { state.run_test_attempt(&snap_clone, attempt).await }
        })
        .await;

        let (passed, failed, skipped) = results.summary();
        if results.passed {
            let _ = self.graph.read().await.transition(id, TargetState::Tested);
            let _ = self.events_tx.send(BuildEvent::Tested {
                label: snapshot.label.clone(),
                passed,
                failed,
                skipped,
                flaky: results.is_flaky_pass(),
            });
            self.merge_coverage(&results);
        } else {
            let _ = self.graph.read().await.transition(id, TargetState::TestFailed);
            let _ = self.events_tx.send(BuildEvent::TestFailed {
                label: snapshot.label.clone(),
                reason: format!("{failed} case(s) failed after {} attempt(s)", results.attempts),
            });
            self.scheduler.report_failure();
        }
    }

    async fn run_test_attempt(&self, snapshot: &TargetSnapshot, attempt: u32) -> AttemptResult {
        match self.execute_test_once(snapshot, attempt).await {
            Ok((exit_code, output, results_bytes)) => {
                let cases = if results_bytes.is_empty() {
                    test_orchestrator::golang::parse(&String::from_utf8_lossy(&output))
                } else {
                    match test_orchestrator::junit::parse(&String::from_utf8_lossy(&results_bytes)) {
                        Ok(cases) => cases,
                        Err(err) => {
                            tracing::warn!(%err, label = %snapshot.label, "junit results unparseable, falling back to output text");
                            test_orchestrator::golang::parse(&String::from_utf8_lossy(&output))
                        }
                    }
                };
                AttemptResult { exit_code, cases }
            }
            Err(err) => {
                tracing::warn!(%err, label = %snapshot.label, attempt, "test attempt failed to execute");
                AttemptResult::exit_code_only(None)
            }
        }
    }

    async fn execute_test_once(&self, snapshot: &TargetSnapshot, attempt: u32) -> Result<(Option<i32>, Vec<u8>, Vec<u8>), Error> {
        let staged_root = self.staging_root(&snapshot.label).join(format!("attempt_{attempt}"));
        let data_files = self.stage_list(snapshot);
        StagedDir::stage_at(&staged_root, &data_files).map_err(Error::Exec)?;

        let results_file = staged_root.join("test_results.xml");
        let test_spec = snapshot.test.clone().expect("run_test_attempt only called for test targets");

        let env = EnvBuilder::new()
            .with_host_allow_list(&staged_root.to_string_lossy())
            .with_arch_os(&self.arch, std::env::consts::OS)
            .with_test_vars(
                &results_file.to_string_lossy(),
                &[snapshot.label.to_string()],
                &snapshot.srcs,
                &snapshot.declared_outputs,
                &staged_root.to_string_lossy(),
                &snapshot.label.package,
                &snapshot.label.name,
            )
            .build();

        let spec = ExecSpec {
            command: test_spec.command.clone().unwrap_or_else(|| snapshot.command.clone()),
            working_dir: staged_root.clone(),
            env,
            timeout: test_spec.timeout_secs.map(std::time::Duration::from_secs),
            sandboxed: test_spec.sandbox,
            data_files: Vec::new(),
        };
        let outcome = Executor::run(&spec).await.map_err(Error::Exec)?;
        let results_bytes = tokio::fs::read(&results_file).await.unwrap_or_default();
        Ok((outcome.exit_code, outcome.output, results_bytes))
    }

    fn merge_coverage(&self, _results: &TestResults) {
        // Line-coverage data is instrumentation-specific (e.g. `go tool
        // cover`'s own text format) and out of scope for the built-in
        // junit/golang parsers; `merge_coverage` is the hook a coverage
        // instrumentation integration would call into before this point.
    }
}

fn write_output_file(dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes)
}

fn hash_outputs(files: &[(String, Vec<u8>)]) -> Fingerprint {
    let mut sorted: Vec<&(String, Vec<u8>)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = Hasher::new();
    for (path, bytes) in sorted {
        hash_file_content(&mut hasher, path, bytes);
    }
    hasher.finalize()
}

/// Packs a target's output files into a single tar archive, the same
/// deterministic-ustar convention `cache::scripted` uses for its tier's
/// own wire format (spec.md §9's resolved Open Question), so every cache
/// tier stores artifacts the same way regardless of how many files a
/// target produced.
fn pack_artifact(files: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, bytes) in files {
        let mut header = tar::Header::new_ustar();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        builder.append_data(&mut header, path, bytes.as_slice()).expect("in-memory tar append");
    }
    builder.into_inner().expect("in-memory tar finish")
}

fn unpack_artifact(artifact: &Artifact) -> Result<Vec<(String, Vec<u8>)>, String> {
    let mut archive = tar::Archive::new(artifact.bytes.as_slice());
    let mut files = Vec::new();
    let entries = archive.entries().map_err(|e| e.to_string())?;
    for entry in entries {
        let mut entry = entry.map_err(|e| e.to_string())?;
        let path = entry.path().map_err(|e| e.to_string())?.to_string_lossy().to_string();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut bytes).map_err(|e| e.to_string())?;
        files.push((path, bytes));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::RealFs;
    use crate::graph::{BuildTarget as Target, PackageId};

    fn single_target_state(cmd: &str, outs: &[&str]) -> (BuildState, TargetId, tempfile::TempDir) {
        let repo = tempfile::tempdir().unwrap();
        let src_path = repo.path().join("f.txt");
        std::fs::write(&src_path, b"the quick brown fox").unwrap();

        let mut graph = BuildGraph::new();
        let pkg = graph.get_or_create_package(None, "foo", "foo/BUILD");
        let label = Label::new("foo", "wc");
        let id = graph
            .declare_target(pkg, label.clone(), |l, p| {
                let mut t = Target::new(l.clone(), p);
                t.srcs = vec!["f.txt".to_string()];
                t.declared_outputs = outs.iter().map(|s| s.to_string()).collect();
                t.command = cmd.to_string();
                t
            })
            .unwrap();
        graph.target(id).transition(TargetState::Active).unwrap();
        graph.target(id).transition(TargetState::Pending).unwrap();

        let fs: Arc<dyn FileSystem> = Arc::new(RealFs::new(repo.path()));
        let (state, _rx) = BuildState::new(graph, fs, Cache::empty(), "linux_amd64", repo.path(), true, None);
        (state, id, repo)
    }

    #[tokio::test]
    async fn genrule_produces_declared_output_under_plz_out_gen() {
        let (state, id, _repo) = single_target_state("wc -c < f.txt > f.wc", &["f.wc"]);

        state.submit_build(id).await;
        state.scheduler.stop_and_drain();
        state.scheduler.run(1).await;

        let graph = state.graph.read().await;
        assert_eq!(graph.target(id).state(), TargetState::Built);
        let out_path = state.out_root.join("gen").join("foo").join("f.wc");
        assert!(out_path.exists(), "expected output at {out_path:?}");
    }
}
