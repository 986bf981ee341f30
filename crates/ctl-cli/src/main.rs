//! ctltree - run control trees from the command line.
//!
//! - `ctltree run <TREE>` - load a tree file and drive it
//! - `ctltree validate <TREE>` - check a tree file without starting anything
//! - `ctltree show <TREE>` - print a tree file's structure

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use ctl_bt::{Status, TickPolicy};
use ctl_core::InMemoryPvStore;
use ctl_kernel::{
    validate, ActionDescriptor, KernelConfig, NodeDescriptor, TickMode, TreeDescriptor, TreeId,
    TreeManager,
};

#[derive(Parser)]
#[command(name = "ctltree")]
#[command(about = "Behavior-tree runner for hardware control", version)]
struct Cli {
    /// Project root directory
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a tree and drive it
    Run {
        /// Tree file (YAML or JSON)
        tree: PathBuf,

        /// Tick mode, overriding the project config
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Number of ticks in count mode
        #[arg(long)]
        count: Option<u64>,

        /// Delay between ticks in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,

        /// Print the final report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a tree file without starting any worker
    Validate {
        tree: PathBuf,
    },

    /// Print the structure of a tree file
    Show {
        tree: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Continuous,
    Interactive,
    Count,
}

impl From<ModeArg> for TickMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Continuous => TickMode::Continuous,
            ModeArg::Interactive => TickMode::Interactive,
            ModeArg::Count => TickMode::Count,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_target(false)
        .init();

    let project_root = match cli.project {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Run {
            tree,
            mode,
            count,
            period_ms,
            json,
        } => {
            let mut config = KernelConfig::load_from_project(&project_root)?;
            config.resolve_paths(&project_root);
            if let Some(mode) = mode {
                config.tick.mode = mode.into();
            }
            if let Some(count) = count {
                config.tick.count = count;
            }
            if let Some(period_ms) = period_ms {
                config.tick.period_ms = period_ms;
            }
            run_tree(&config, &tree, json).await
        }
        Commands::Validate { tree } => validate_tree(&tree),
        Commands::Show { tree } => show_tree(&tree),
    }
}

/// `RUST_LOG` when set, otherwise `debug` with `--verbose` and `info` without.
fn log_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

async fn run_tree(config: &KernelConfig, tree: &Path, json: bool) -> Result<()> {
    config.validate()?;

    let store = InMemoryPvStore::with_values(config.process_variables.clone());
    let mut manager = TreeManager::from_config(config, Arc::new(store));
    let id = manager.load_tree_file(tree)?;

    let policy = config.tick.policy();
    manager.start_tree(id, policy)?;
    tracing::info!(tree = %tree.display(), ?policy, "Running tree (Ctrl-C to stop)");

    let status = if policy == TickPolicy::Interactive {
        drive_interactive(&mut manager, id).await?
    } else {
        drive_until_done(&mut manager, id).await?
    };

    let report = manager.report(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("Final status: {status}");
        print!("{}", report.render());
    }
    manager.unload_tree(id)?;
    Ok(())
}

/// Wait for Ctrl-C, or for a count policy to run out.
async fn drive_until_done(manager: &mut TreeManager, id: TreeId) -> Result<Status> {
    let mut poll = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(manager.stop_tree(id)?);
            }
            _ = poll.tick() => {
                let finished = manager
                    .list()
                    .iter()
                    .any(|summary| summary.id == id && !summary.driven);
                if finished {
                    return Ok(manager.wait_tree(id)?);
                }
            }
        }
    }
}

/// Each Enter releases one tick. `q` or end of input stops, as does Ctrl-C (the process then
/// exits once the pending stdin read returns).
async fn drive_interactive(manager: &mut TreeManager, id: TreeId) -> Result<Status> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Press Enter to tick, q to quit.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim() == "q" => break,
                    None => break,
                    Some(_) => {
                        let before = tick_count(manager, id);
                        manager.step_tree(id)?;
                        wait_for_tick(manager, id, before).await;
                        print!("{}", manager.report(id)?.render());
                    }
                }
            }
        }
    }
    Ok(manager.stop_tree(id)?)
}

fn tick_count(manager: &TreeManager, id: TreeId) -> u64 {
    manager
        .list()
        .iter()
        .find(|summary| summary.id == id)
        .map_or(0, |summary| summary.ticks)
}

async fn wait_for_tick(manager: &TreeManager, id: TreeId, before: u64) {
    for _ in 0..100 {
        if tick_count(manager, id) > before {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn validate_tree(tree: &Path) -> Result<()> {
    let descriptor = TreeDescriptor::load(tree)?;
    match validate(&descriptor) {
        Ok(()) => {
            println!("{}: ok ({})", tree.display(), descriptor.name);
            Ok(())
        }
        Err(e) => anyhow::bail!("{}: {e}", tree.display()),
    }
}

fn show_tree(tree: &Path) -> Result<()> {
    let descriptor = TreeDescriptor::load(tree)?;
    println!("{}", descriptor.name);
    if !descriptor.description.is_empty() {
        println!("  {}", descriptor.description);
    }
    print_node(&descriptor.root, 1);
    Ok(())
}

fn print_node(node: &NodeDescriptor, depth: usize) {
    let indent = "  ".repeat(depth);
    match node {
        NodeDescriptor::Condition(item) => println!(
            "{indent}{} (condition: {} {} {})",
            item.name,
            item.pv,
            item.operator.symbol(),
            item.value
        ),
        NodeDescriptor::Acknowledge(item) => println!(
            "{indent}{} (acknowledge: {})",
            item.name,
            item.permitted.join(", ")
        ),
        NodeDescriptor::SetPv(item) => {
            print_action(&ActionDescriptor::SetPv(item.clone()), &indent)
        }
        NodeDescriptor::IncrementPv(item) => {
            print_action(&ActionDescriptor::IncrementPv(item.clone()), &indent)
        }
        NodeDescriptor::Sequence(item) | NodeDescriptor::Selector(item) => {
            let memory = if item.memory { ", memory" } else { "" };
            println!("{indent}{} ({}{memory})", item.name, node.kind());
            item.children.iter().for_each(|c| print_node(c, depth + 1));
        }
        NodeDescriptor::Parallel(item) => {
            println!("{indent}{} (parallel: {:?})", item.name, item.policy);
            item.children.iter().for_each(|c| print_node(c, depth + 1));
        }
        NodeDescriptor::CheckAndDo(item) => {
            println!("{indent}{} (check_and_do)", item.name);
            print_node(&NodeDescriptor::Condition(item.check.clone()), depth + 1);
            print_action(&item.action, &"  ".repeat(depth + 1));
        }
    }
}

fn print_action(action: &ActionDescriptor, indent: &str) {
    match action {
        ActionDescriptor::SetPv(item) => {
            println!("{indent}{} (set_pv: {} = {})", item.name, item.pv, item.value)
        }
        ActionDescriptor::IncrementPv(item) => {
            println!("{indent}{} (increment_pv: {} += {})", item.name, item.pv, item.increment)
        }
    }
}
