//! Single-pass backlog orchestrator.
//!
//! Keeps `.orchestrator/state.json` in sync with the backlog directory and
//! executes at most one story per `run`, refusing edits to protected paths
//! unless an operator override grants them.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::debug;

use orchestrator::core::state_update::mark_story;
use orchestrator::core::types::StoryStatus;
use orchestrator::exit_codes;
use orchestrator::io::config::{OrchestratorConfig, load_config};
use orchestrator::io::health::FsImportProbe;
use orchestrator::io::init::{InitOptions, init_workspace};
use orchestrator::io::manifest;
use orchestrator::io::paths::OrchestratorPaths;
use orchestrator::io::preflight;
use orchestrator::io::state_store::{FsStateStore, StateRepository};
use orchestrator::io::verification::ShellVerifier;
use orchestrator::logging;
use orchestrator::pass::{PassContext, PassMode, run_pass};
use orchestrator::report::{self, ReportFormat};
use orchestrator::select::plan_next;
use orchestrator::state::{WorkspaceState, new_resume_token, now_timestamp};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Single-pass backlog orchestrator with protected-path enforcement"
)]
struct Cli {
    /// Workspace root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Raise log verbosity on stderr (repeatable). `RUST_LOG` overrides it.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.orchestrator/`, default config, backlog dir and initial state.
    Init {
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one orchestration pass.
    Run {
        #[arg(long, value_enum, default_value_t = ModeArg::Run)]
        mode: ModeArg,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Print the id of the next story without editing anything.
    Select {
        /// Print the full plan as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run workspace diagnostics and print them as JSON.
    Preflight,
    /// Print the persisted state, creating or repairing it if needed.
    State {
        /// Discard the current document and rebuild it.
        #[arg(long)]
        rebuild: bool,
    },
    /// Print the artifact manifest as JSON.
    Manifest,
    /// Return a tracked story to `ready`.
    Unblock {
        story_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Run,
    DryRun,
}

impl From<ModeArg> for PassMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Run => PassMode::Run,
            ModeArg::DryRun => PassMode::DryRun,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Json,
    Text,
}

impl From<FormatArg> for ReportFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => ReportFormat::Json,
            FormatArg::Text => ReportFormat::Text,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => {
            debug!(code, outcome = exit_codes::label(code), "exiting");
            if code != exit_codes::OK {
                std::process::exit(code);
            }
        }
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = OrchestratorPaths::new(&cli.root);
    match cli.command {
        Command::Init { force } => cmd_init(&paths, force),
        Command::Run { mode, format } => cmd_run(&paths, mode.into(), format.into()),
        Command::Select { json } => cmd_select(&paths, json),
        Command::Preflight => cmd_preflight(&paths),
        Command::State { rebuild } => cmd_state(&paths, rebuild),
        Command::Manifest => cmd_manifest(&paths),
        Command::Unblock { story_id } => cmd_unblock(&paths, &story_id),
    }
}

fn load(paths: &OrchestratorPaths) -> Result<OrchestratorConfig> {
    if !paths.root.is_dir() {
        bail!("workspace root {} is not a directory", paths.root.display());
    }
    load_config(&paths.config_path)
}

fn cmd_init(paths: &OrchestratorPaths, force: bool) -> Result<i32> {
    let paths = init_workspace(&paths.root, &InitOptions { force })?;
    println!("initialized {}", paths.orchestrator_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(paths: &OrchestratorPaths, mode: PassMode, format: ReportFormat) -> Result<i32> {
    let config = load(paths)?;
    let store = FsStateStore::new(paths.clone(), config.clone());
    let probe = FsImportProbe::new(&config);
    let ctx = PassContext {
        paths,
        config: &config,
        store: &store,
        verifier: &ShellVerifier,
        probe: &probe,
    };
    let pass = run_pass(&ctx, mode)?;
    print!("{}", report::render(&pass, format)?);
    Ok(pass.exit_code())
}

fn cmd_select(paths: &OrchestratorPaths, json: bool) -> Result<i32> {
    let config = load(paths)?;
    let store = FsStateStore::new(paths.clone(), config.clone());
    let state = store.peek().unwrap_or_else(|| {
        WorkspaceState::skeleton(Default::default(), Vec::new(), String::new(), now_timestamp())
    });
    let plan = plan_next(paths, &config, &state, &FsImportProbe::new(&config));
    if json {
        print_json(&plan)?;
    } else if let Some(selected) = &plan.selected {
        println!("{}", selected.story_id);
    }
    Ok(plan.exit_code())
}

fn cmd_preflight(paths: &OrchestratorPaths) -> Result<i32> {
    let config = load(paths)?;
    let report = preflight::run(&paths.root, &config, &FsImportProbe::new(&config));
    print_json(&report)?;
    Ok(if report.all_ok() {
        exit_codes::OK
    } else {
        exit_codes::BLOCKED
    })
}

fn cmd_state(paths: &OrchestratorPaths, rebuild: bool) -> Result<i32> {
    let config = load(paths)?;
    let store = FsStateStore::new(paths.clone(), config);
    let state = if rebuild {
        store.rebuild()?
    } else {
        store.load()?.state
    };
    print_json(&state)?;
    Ok(exit_codes::OK)
}

fn cmd_manifest(paths: &OrchestratorPaths) -> Result<i32> {
    load(paths)?;
    let entries = manifest::build(&paths.root)?;
    print_json(&entries)?;
    Ok(exit_codes::OK)
}

fn cmd_unblock(paths: &OrchestratorPaths, story_id: &str) -> Result<i32> {
    let config = load(paths)?;
    let store = FsStateStore::new(paths.clone(), config);
    let mut state = store.load()?.state;
    let Some(record) = state.record(story_id) else {
        bail!("story {story_id} is not tracked in {}", paths.state_path.display());
    };
    let previous = record.status;
    mark_story(&mut state, story_id, StoryStatus::Ready, None, false, &now_timestamp());
    state.resume_token = new_resume_token();
    store
        .save(&mut state)
        .with_context(|| format!("save state after unblocking {story_id}"))?;
    println!("{story_id}: {previous} -> {}", StoryStatus::Ready);
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init() {
        let cli = Cli::parse_from(["orchestrator", "init"]);
        assert!(matches!(cli.command, Command::Init { force: false }));
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn parse_init_force_with_root() {
        let cli = Cli::parse_from(["orchestrator", "init", "--force", "--root", "/tmp/ws"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.root, PathBuf::from("/tmp/ws"));
    }

    #[test]
    fn parse_run_defaults_to_text_run() {
        let cli = Cli::parse_from(["orchestrator", "run"]);
        assert!(matches!(
            cli.command,
            Command::Run {
                mode: ModeArg::Run,
                format: FormatArg::Text
            }
        ));
    }

    #[test]
    fn parse_run_dry_run_json() {
        let cli = Cli::parse_from(["orchestrator", "run", "--mode", "dry-run", "--format", "json"]);
        let Command::Run { mode, format } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(PassMode::from(mode), PassMode::DryRun);
        assert_eq!(ReportFormat::from(format), ReportFormat::Json);
    }

    #[test]
    fn verbose_flag_counts_after_subcommand() {
        let cli = Cli::parse_from(["orchestrator", "select", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(Cli::parse_from(["orchestrator", "select"]).verbose, 0);
    }

    #[test]
    fn parse_unblock_requires_story_id() {
        assert!(Cli::try_parse_from(["orchestrator", "unblock"]).is_err());
        let cli = Cli::parse_from(["orchestrator", "unblock", "S1"]);
        assert!(matches!(cli.command, Command::Unblock { story_id } if story_id == "S1"));
    }
}
