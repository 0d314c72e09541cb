mod display;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use strata_core::differ::{create_destroy_plan, create_plan};
use strata_core::executor::{Executor, ExecutorConfig, RetryPolicy, RunContext, RunSummary};
use strata_core::graph::DependencyGraph;
use strata_core::parser::{self, ParsedFile};
use strata_core::plan::Plan;
use strata_core::provider::{self, ProviderRegistry};
use strata_core::schema::validate_resources;
use strata_core::store::StateStore;
use strata_provider_sandbox::{SandboxConfig, SandboxProvider};
use strata_state::{SnapshotStore, StateBackend, create_backend, default_backend};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Reconcile declared infrastructure with the real world", long_about = None)]
struct Cli {
    /// Increase log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration
    Validate {
        /// Path to a .sta file or a directory of them
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Show execution plan without applying changes
    Plan {
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Read every recorded object back from its provider first
        #[arg(long)]
        refresh: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply changes to reach the desired state
    Apply {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        run: RunArgs,

        /// Read every recorded object back from its provider first
        #[arg(long)]
        refresh: bool,
    },
    /// Destroy every resource recorded in state
    Destroy {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Show resources and their dependencies in apply order
    Graph {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Inspect recorded state
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Remove a state lock left behind by an interrupted run
    ForceUnlock {
        /// Lock id, as reported by the failed run
        lock_id: String,

        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// List recorded resources
    List {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Show one recorded resource
    Show {
        /// Logical name of the resource
        name: String,

        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Maximum number of provider operations in flight
    #[arg(long, default_value_t = 10)]
    parallelism: usize,

    /// Provider calls per operation before a transient error is final
    #[arg(long, default_value_t = RetryPolicy::STANDARD.max_attempts)]
    max_attempts: u32,

    /// Skip confirmation prompt
    #[arg(long)]
    auto_approve: bool,
}

impl RunArgs {
    fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            parallelism: self.parallelism.max(1),
            retry: RetryPolicy::STANDARD.with_max_attempts(self.max_attempts.max(1)),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Validate { path } => run_validate(&path).await,
        Commands::Plan {
            path,
            refresh,
            json,
        } => run_plan(&path, refresh, json).await,
        Commands::Apply { path, run, refresh } => run_apply(&path, &run, refresh).await,
        Commands::Destroy { path, run } => run_destroy(&path, &run).await,
        Commands::Graph { path } => run_graph(&path).await,
        Commands::State { command } => run_state_command(command).await,
        Commands::ForceUnlock { lock_id, path } => run_force_unlock(&path, &lock_id).await,
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}

/// `.sta` files of a directory, sorted by name
fn find_sta_files_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sta") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse one .sta file, or merge every .sta file of a directory
fn load_configuration(path: &Path) -> Result<ParsedFile> {
    let files = if path.is_dir() {
        let files = find_sta_files_in_dir(path)?;
        if files.is_empty() {
            bail!("No .sta files found in {}", path.display());
        }
        files
    } else {
        vec![path.to_path_buf()]
    };

    let mut merged = ParsedFile::default();
    for file in files {
        let content = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let parsed =
            parser::parse(&content).with_context(|| format!("Failed to parse {}", file.display()))?;
        merged
            .merge(parsed)
            .with_context(|| format!("Failed to merge {}", file.display()))?;
    }
    log::debug!("Loaded {} resource(s) from {}", merged.resources.len(), path.display());
    Ok(merged)
}

async fn build_registry(parsed: &ParsedFile) -> Result<ProviderRegistry> {
    if let Some(unknown) = parsed.providers.iter().find(|p| p.name != "sandbox") {
        bail!("Unknown provider '{}'", unknown.name);
    }
    let config = match parsed.provider("sandbox") {
        Some(block) => SandboxConfig::from_provider_config(block)?,
        None => SandboxConfig::default(),
    };
    let sandbox = SandboxProvider::open(config).await?;
    Ok(ProviderRegistry::new().with_provider(sandbox))
}

async fn open_backend(parsed: &ParsedFile) -> Result<Box<dyn StateBackend>> {
    let backend = match &parsed.backend {
        Some(config) => create_backend(config).await?,
        None => default_backend().await?,
    };
    Ok(backend)
}

/// A validated configuration with its providers and state
struct Workspace {
    graph: DependencyGraph,
    registry: Arc<ProviderRegistry>,
    store: Arc<SnapshotStore>,
}

impl Workspace {
    async fn load(path: &Path) -> Result<Self> {
        let parsed = load_configuration(path)?;
        let registry = build_registry(&parsed).await?;

        if let Err(errors) = validate_resources(&parsed.resources, &registry) {
            for error in &errors {
                eprintln!("  {} {}", "✗".red(), error);
            }
            bail!("{} validation error(s)", errors.len());
        }

        let store = SnapshotStore::open(open_backend(&parsed).await?).await?;
        let graph = DependencyGraph::build(parsed.resources)?;
        Ok(Self {
            graph,
            registry: Arc::new(registry),
            store: Arc::new(store),
        })
    }

    /// Refresh records from the providers, if asked, and plan against them
    async fn plan(&self, refresh: bool) -> Result<Plan> {
        if refresh {
            self.refresh().await?;
        }
        let records = self.store.load().await?;
        Ok(create_plan(&self.graph, &records, self.registry.as_ref())?)
    }

    async fn refresh(&self) -> Result<()> {
        let mut records = self.store.load().await?;
        let report = provider::refresh(&self.registry, &mut records).await?;
        if report.updated.is_empty() && report.vanished.is_empty() {
            return Ok(());
        }
        for name in &report.vanished {
            println!("  {} {} no longer exists", "!".yellow(), name);
        }
        for name in &report.updated {
            println!("  {} {} changed outside of strata", "!".yellow(), name);
        }
        self.store.replace_records(records).await?;
        Ok(())
    }

    /// Release the state lock; a failure to release never hides the run's own error
    async fn release<T>(&self, result: Result<T>) -> Result<T> {
        match (self.store.unlock().await, result) {
            (Ok(()), result) => result,
            (Err(e), Ok(_)) => {
                Err(anyhow::Error::new(e).context("Failed to release the state lock"))
            }
            (Err(e), Err(run_error)) => {
                log::error!("Failed to release the state lock: {}", e);
                Err(run_error)
            }
        }
    }

    async fn lock(&self, operation: &str) -> Result<()> {
        if let Err(e) = self.store.lock(operation).await {
            return Err(match e.holder() {
                Some(holder) if !holder.is_own() => anyhow!(
                    "{}\n  If that run is gone, remove the lock with `strata force-unlock {}`",
                    e,
                    holder.id
                ),
                _ => e.into(),
            });
        }
        Ok(())
    }

    /// Execute `plan`, stopping dispatch on Ctrl-C
    async fn execute(&self, plan: Plan, config: ExecutorConfig) -> Result<RunSummary> {
        let cancel = CancellationToken::new();
        let store: Arc<dyn StateStore> = self.store.clone();
        let ctx = RunContext::new(self.registry.clone(), store).with_cancel(cancel.clone());

        let (sender, mut events) = mpsc::unbounded_channel();
        let progress = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                display::print_event(&event);
            }
        });
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "{}",
                    "Interrupt received; waiting for in-flight operations...".yellow()
                );
                cancel.cancel();
            }
        });

        let executor = Executor::new(ctx, config).with_events(sender);
        let summary = executor.execute(plan).await;
        interrupt.abort();
        drop(executor);
        let _ = progress.await;
        Ok(summary?)
    }
}

fn confirm(question: &str) -> Result<bool> {
    println!("{}", question.yellow().bold());
    println!("  {}", "Only 'yes' will be accepted to approve.".yellow());
    print!("\n  Enter a value: ");
    std::io::Write::flush(&mut std::io::stdout())?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    println!();
    Ok(input.trim() == "yes")
}

async fn run_validate(path: &Path) -> Result<()> {
    println!("{}", "Validating...".cyan());
    let workspace = Workspace::load(path).await?;

    println!(
        "{}",
        format!("✓ {} resources validated successfully.", workspace.graph.len())
            .green()
            .bold()
    );
    for node in workspace.graph.nodes() {
        println!("  • {}", node.spec.id);
    }
    Ok(())
}

async fn run_plan(path: &Path, refresh: bool, json: bool) -> Result<()> {
    let workspace = Workspace::load(path).await?;
    let plan = if refresh {
        // Refreshing rewrites state, so it needs the lock
        workspace.lock("plan").await?;
        let plan = workspace.plan(true).await;
        workspace.release(plan).await?
    } else {
        workspace.plan(false).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        display::print_plan(&plan);
    }
    Ok(())
}

async fn run_apply(path: &Path, args: &RunArgs, refresh: bool) -> Result<()> {
    let workspace = Workspace::load(path).await?;
    workspace.lock("apply").await?;
    let result = apply_locked(&workspace, args, refresh).await;
    finish("Apply", workspace.release(result).await?)
}

async fn apply_locked(
    workspace: &Workspace,
    args: &RunArgs,
    refresh: bool,
) -> Result<Option<RunSummary>> {
    let plan = workspace.plan(refresh).await?;
    display::print_plan(&plan);
    if !plan.has_changes() {
        return Ok(None);
    }
    println!();
    if !args.auto_approve && !confirm("Do you want to perform these actions?")? {
        println!("{}", "Apply cancelled.".yellow());
        return Ok(None);
    }

    println!("{}", "Applying changes...".cyan().bold());
    Ok(Some(workspace.execute(plan, args.executor_config()).await?))
}

async fn run_destroy(path: &Path, args: &RunArgs) -> Result<()> {
    let workspace = Workspace::load(path).await?;
    workspace.lock("destroy").await?;
    let result = destroy_locked(&workspace, args).await;
    finish("Destroy", workspace.release(result).await?)
}

async fn destroy_locked(workspace: &Workspace, args: &RunArgs) -> Result<Option<RunSummary>> {
    let records = workspace.store.load().await?;
    if records.is_empty() {
        println!("{}", "No resources in state. Nothing to destroy.".yellow());
        return Ok(None);
    }

    let plan = create_destroy_plan(&records)?;
    display::print_plan(&plan);
    println!();
    if !args.auto_approve
        && !confirm("Do you really want to destroy all resources? This cannot be undone.")?
    {
        println!("{}", "Destroy cancelled.".yellow());
        return Ok(None);
    }

    println!("{}", "Destroying resources...".red().bold());
    Ok(Some(workspace.execute(plan, args.executor_config()).await?))
}

/// Report a run and turn anything short of success into an error
fn finish(verb: &str, summary: Option<RunSummary>) -> Result<()> {
    let Some(summary) = summary else {
        return Ok(());
    };
    display::print_summary(verb, &summary);
    if summary.is_success() {
        Ok(())
    } else {
        Err(anyhow!("{} did not complete ({:?})", verb, summary.outcome))
    }
}

async fn run_graph(path: &Path) -> Result<()> {
    let parsed = load_configuration(path)?;
    let graph = DependencyGraph::build(parsed.resources)?;
    display::print_graph(&graph);
    Ok(())
}

async fn run_state_command(command: StateCommands) -> Result<()> {
    match command {
        StateCommands::List { path } => {
            let store = open_store(&path).await?;
            display::print_state_list(&store.snapshot().await);
        }
        StateCommands::Show { name, path } => {
            let store = open_store(&path).await?;
            let state = store.snapshot().await;
            let record = state
                .resources
                .get(&name)
                .ok_or_else(|| anyhow!("No resource named '{}' in state", name))?;
            println!("{}", serde_json::to_string_pretty(record)?);
        }
    }
    Ok(())
}

async fn open_store(path: &Path) -> Result<SnapshotStore> {
    let parsed = load_configuration(path)?;
    Ok(SnapshotStore::open(open_backend(&parsed).await?).await?)
}

async fn run_force_unlock(path: &Path, lock_id: &str) -> Result<()> {
    let parsed = load_configuration(path)?;
    let backend = open_backend(&parsed).await?;
    backend.force_unlock(lock_id).await?;
    println!("{}", format!("Lock {} removed.", lock_id).green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const VPC: &str = r#"
        let vpc = sandbox.vpc {
          cidr_block = "10.0.0.0/16"
        }
    "#;

    const SUBNET: &str = r#"
        let subnet = sandbox.subnet {
          vpc_id     = vpc.id
          cidr_block = "10.0.1.0/24"
        }
    "#;

    fn backend_block(path: &Path) -> String {
        format!("backend local {{\n  path = \"{}\"\n}}\n", path.display())
    }

    #[test]
    fn directory_files_are_merged_in_name_order() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b_subnet.sta"), SUBNET).unwrap();
        let network = backend_block(Path::new("state.json")) + VPC;
        fs::write(dir.path().join("a_network.sta"), network).unwrap();
        fs::write(dir.path().join("notes.txt"), "not configuration").unwrap();

        let parsed = load_configuration(dir.path()).unwrap();
        let names: Vec<&str> = parsed.resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["vpc", "subnet"]);
        assert_eq!(parsed.backend.unwrap().backend_type, "local");
    }

    #[test]
    fn single_file_is_loaded_directly() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("main.sta");
        fs::write(&file, VPC).unwrap();

        let parsed = load_configuration(&file).unwrap();
        assert_eq!(parsed.resources.len(), 1);
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_configuration(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No .sta files"));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("broken.sta"), "let = {").unwrap();
        let err = load_configuration(dir.path()).unwrap_err();
        assert!(err.to_string().contains("broken.sta"));
    }

    #[tokio::test]
    async fn unknown_provider_blocks_are_rejected() {
        let parsed = parser::parse("provider aws {\n region = \"us-east-1\"\n}").unwrap();
        let err = build_registry(&parsed).await.unwrap_err();
        assert!(err.to_string().contains("Unknown provider 'aws'"));
    }

    #[tokio::test]
    async fn workspace_plans_and_applies_against_the_sandbox() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("state.json");
        let config = backend_block(&state) + VPC + SUBNET;
        fs::write(dir.path().join("main.sta"), config).unwrap();

        let workspace = Workspace::load(dir.path()).await.unwrap();
        let plan = workspace.plan(false).await.unwrap();
        assert_eq!(plan.summary().create, 2);

        let summary = workspace
            .execute(plan, ExecutorConfig::default())
            .await
            .unwrap();
        assert!(summary.is_success());
        assert!(state.exists());

        let replan = workspace.plan(false).await.unwrap();
        assert!(!replan.has_changes());
    }

    #[tokio::test]
    async fn release_keeps_the_run_error_when_unlock_also_fails() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("state.json");
        fs::write(dir.path().join("main.sta"), backend_block(&state) + VPC).unwrap();
        let workspace = Workspace::load(dir.path()).await.unwrap();
        let lock_file = state.with_extension("lock");

        workspace.lock("apply").await.unwrap();
        fs::remove_file(&lock_file).unwrap();
        let err = workspace
            .release::<()>(Err(anyhow!("provider exploded")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "provider exploded");

        workspace.lock("apply").await.unwrap();
        fs::remove_file(&lock_file).unwrap();
        let err = workspace.release(Ok(())).await.unwrap_err();
        assert!(err.to_string().contains("Failed to release the state lock"));

        workspace.lock("apply").await.unwrap();
        assert_eq!(workspace.release(Ok(7)).await.unwrap(), 7);
        assert!(!lock_file.exists());
    }

    #[test]
    fn run_args_never_configure_zero_workers_or_attempts() {
        let args = RunArgs {
            parallelism: 0,
            max_attempts: 0,
            auto_approve: true,
        };
        let config = args.executor_config();
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.retry.max_attempts, 1);
    }
}
