use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use plz_core::cache::directory::DirectoryCache;
use plz_core::cache::http::HttpCache;
use plz_core::cache::scripted::ScriptedCache;
use plz_core::cache::{Cache, CacheTier};
use plz_core::config::PlzConfig;
use plz_core::discovery;
use plz_core::fs::{FileSystem, RealFs};
use plz_core::graph::{BuildGraph, TargetId};
use plz_core::label::Label;
use plz_core::plan;
use plz_core::scheduler;
use plz_core::state::repo_lock::RepoLock;
use plz_core::state::BuildState;
use plz_core::query;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "plz")]
#[command(about = "A polyglot hermetic build system")]
#[command(version)]
struct Cli {
    /// Root of the repository (defaults to the current directory)
    #[arg(long = "repo_root", global = true)]
    repo_root: Option<PathBuf>,

    /// Named config profile to overlay on top of .plzconfig
    #[arg(long = "profile", global = true)]
    profile: Option<String>,

    /// Keep going on failure instead of stopping submission of new tasks
    #[arg(long = "keep_going", global = true)]
    keep_going: bool,

    /// Proceed even if another `plz` invocation already holds the repo lock
    #[arg(long = "unsafe_ignore_lock", global = true)]
    unsafe_ignore_lock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved .plzconfig as JSON
    Config,
    /// Build one or more targets (every target if none are given)
    Build {
        #[arg(value_name = "LABEL")]
        labels: Vec<String>,
    },
    /// Build and run the tests for one or more targets (every test if none are given)
    Test {
        #[arg(value_name = "LABEL")]
        labels: Vec<String>,
    },
    /// Inspect the build graph without building anything
    Query {
        #[command(subcommand)]
        query: QueryCommand,
    },
}

/// The exit-code-relevant shape of a CLI failure (spec.md §6: "0 success;
/// 1 generic failure; 7 dependency cycle"). Every other error kind flattens
/// to a message and exit 1; a dependency cycle is kept distinguishable all
/// the way out to `main` so it can exit 7 instead.
enum CliError {
    Cycle(String),
    Other(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Cycle(message) | CliError::Other(message) => write!(f, "{message}"),
        }
    }
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        CliError::Other(message)
    }
}

#[derive(Subcommand)]
enum QueryCommand {
    /// Every declared target
    Alltargets,
    /// Direct dependencies of a target
    Deps { label: String },
    /// Targets that directly depend on a target
    Reversedeps { label: String },
    /// A target's declared source files
    Input { label: String },
    /// A target's declared output files
    Output { label: String },
    /// A human-readable description of a target
    Print { label: String },
    /// The shortest dependency path between two targets
    Somepath { from: String, to: String },
    /// Targets whose `srcs` include a given file
    Whatinputs { file: String },
    /// Targets that declare a given file as an output
    Whatoutputs { file: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let repo_root = cli
        .repo_root
        .unwrap_or_else(|| std::env::current_dir().expect("current directory"));

    let exit_code = match run(repo_root, cli.profile, cli.keep_going, cli.unsafe_ignore_lock, cli.command).await {
        Ok(code) => code,
        Err(CliError::Cycle(message)) => {
            eprintln!("plz: {message}");
            7
        }
        Err(CliError::Other(message)) => {
            eprintln!("plz: {message}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(
    repo_root: PathBuf,
    profile: Option<String>,
    keep_going: bool,
    unsafe_ignore_lock: bool,
    command: Command,
) -> Result<i32, CliError> {
    let config_path = repo_root.join(".plzconfig");
    let config = PlzConfig::load(&config_path, profile.as_deref()).map_err(|e| e.to_string())?;

    match command {
        Command::Config => {
            println!("{config:#?}");
            Ok(0)
        }
        Command::Query { query } => run_query(&repo_root, &config, query).await,
        Command::Build { labels } => run_build_or_test(&repo_root, &config, keep_going, unsafe_ignore_lock, labels, false).await,
        Command::Test { labels } => run_build_or_test(&repo_root, &config, keep_going, unsafe_ignore_lock, labels, true).await,
    }
}

async fn run_query(repo_root: &Path, config: &PlzConfig, query: QueryCommand) -> Result<i32, CliError> {
    let graph = parse_graph(repo_root, config).await?;

    match query {
        QueryCommand::Alltargets => {
            for label in query::alltargets(&graph) {
                println!("{label}");
            }
        }
        QueryCommand::Deps { label } => {
            let id = resolve(&graph, &label)?;
            for label in query::deps(&graph, id) {
                println!("{label}");
            }
        }
        QueryCommand::Reversedeps { label } => {
            let id = resolve(&graph, &label)?;
            for label in query::reversedeps(&graph, id) {
                println!("{label}");
            }
        }
        QueryCommand::Input { label } => {
            let id = resolve(&graph, &label)?;
            for file in query::input(&graph, id) {
                println!("{file}");
            }
        }
        QueryCommand::Output { label } => {
            let id = resolve(&graph, &label)?;
            for file in query::output(&graph, id) {
                println!("{file}");
            }
        }
        QueryCommand::Print { label } => {
            let id = resolve(&graph, &label)?;
            println!("{}", query::print(&graph, id));
        }
        QueryCommand::Somepath { from, to } => {
            let from = resolve(&graph, &from)?;
            let to = resolve(&graph, &to)?;
            match query::somepath(&graph, from, to) {
                Some(path) => {
                    for label in path {
                        println!("{label}");
                    }
                }
                None => println!("no path found"),
            }
        }
        QueryCommand::Whatinputs { file } => {
            for label in query::whatinputs(&graph, &file) {
                println!("{label}");
            }
        }
        QueryCommand::Whatoutputs { file } => {
            for label in query::whatoutputs(&graph, &file) {
                println!("{label}");
            }
        }
    }
    Ok(0)
}

async fn run_build_or_test(
    repo_root: &Path,
    config: &PlzConfig,
    keep_going: bool,
    unsafe_ignore_lock: bool,
    labels: Vec<String>,
    run_tests: bool,
) -> Result<i32, CliError> {
    let out_root = repo_root.join("plz-out");
    let _lock = RepoLock::acquire(&out_root, unsafe_ignore_lock).map_err(|e| e.to_string())?;

    let graph = parse_graph(repo_root, config).await?;

    let roots: Vec<TargetId> = if labels.is_empty() {
        graph.all_target_ids().collect()
    } else {
        labels.iter().map(|l| resolve(&graph, l)).collect::<Result<Vec<_>, _>>()?
    };

    let fs: Arc<dyn FileSystem> = Arc::new(RealFs::new(repo_root));
    let cache = build_cache(repo_root, config);
    let arch = host_arch();
    let (state, mut events_rx) = BuildState::new(graph, fs, cache, arch, repo_root, keep_going, config.build.timeout_secs);

    let worker_count = config.please.num_threads.unwrap_or_else(scheduler::default_worker_count);
    let scheduler_handle = state.scheduler().clone();
    let runner = tokio::spawn(async move { scheduler_handle.run(worker_count).await });

    let result = plan::run_build_closure(&state, &mut events_rx, &roots, run_tests)
        .await
        .map_err(|e| e.to_string())?;
    state.scheduler().stop_and_drain();
    runner.await.map_err(|e| e.to_string())?;

    for (label, reason) in &result.failed {
        eprintln!("plz: {label} failed: {reason}");
    }
    println!(
        "{} built, {} tested, {} failed",
        result.built.len(),
        result.tested.len(),
        result.failed.len()
    );
    Ok(if result.ok() { 0 } else { 1 })
}

/// Discovery/parse is a synchronous, single-threaded pass over
/// `Rc<RefCell<BuildGraph>>` (`lang::evaluate_package`'s builtins must
/// re-borrow it across calls), so it always runs on a blocking-pool thread
/// rather than an async worker — matching spec.md §4.3's "parse" task
/// class and the same restriction `lang::builtins::builtin_glob` documents
/// for bridging back into async `FileSystem` I/O via `block_on`.
async fn parse_graph(repo_root: &Path, config: &PlzConfig) -> Result<BuildGraph, CliError> {
    let repo_root = repo_root.to_path_buf();
    let build_file_names = config.parse.build_file_name.clone();
    let preload_subincludes = config.parse.preload_subincludes.clone();
    let preload_build_defs = config.parse.preload_build_defs.clone();
    let buildconfig = config.buildconfig.clone();
    let result = tokio::task::spawn_blocking(move || {
        discovery::discover_and_parse(
            &repo_root,
            &build_file_names,
            &preload_subincludes,
            &preload_build_defs,
            &buildconfig,
        )
    })
    .await
    .map_err(|e| CliError::Other(e.to_string()))?;

    result.map_err(|e| match e {
        discovery::DiscoveryError::Graph(plz_core::graph::GraphError::Cycle(_)) => CliError::Cycle(e.to_string()),
        other => CliError::Other(other.to_string()),
    })
}

fn resolve(graph: &BuildGraph, label: &str) -> Result<TargetId, CliError> {
    let label = Label::parse(label).map_err(|e| e.to_string())?;
    graph
        .target_id(&label)
        .ok_or_else(|| CliError::Other(format!("no such target {label}")))
}

/// Assembles the tiered cache spec.md §4.4 describes: a local directory
/// tier is always present (so a rebuild with no network configured still
/// dedupes against a previous run), followed by an HTTP tier and/or a
/// scripted tier if `.plzconfig`'s `[Cache]` section names one.
fn build_cache(repo_root: &Path, config: &PlzConfig) -> Cache {
    let mut tiers: Vec<Box<dyn CacheTier>> = vec![Box::new(DirectoryCache::new(repo_root.join("plz-out/cache")))];
    if let Some(url) = &config.cache.http_url {
        let timeout = config.cache.timeout_secs.map(std::time::Duration::from_secs);
        tiers.push(Box::new(HttpCache::new(url.clone(), timeout, config.cache.read_only)));
    }
    if config.cache.retrieve_command.is_some() || config.cache.store_command.is_some() {
        tiers.push(Box::new(ScriptedCache::new(
            config.cache.retrieve_command.clone(),
            config.cache.store_command.clone(),
        )));
    }
    Cache::new(tiers)
}

/// The `<os>_<arch>` convention spec.md §4.4 names for arch-prefixed
/// `hashes` declarations (e.g. `linux_amd64`), derived from
/// `std::env::consts` rather than hardcoded, so a cross-compiled build of
/// this binary still reports its own host correctly.
fn host_arch() -> String {
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    format!("{os}_{arch}")
}
