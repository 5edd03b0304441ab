mod cli_defaults;
mod commands;
mod dispatch;
mod feedback;
mod prefs;
mod runtime_context;
mod tool;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cli_defaults::normalize_cli_args;
use kulla_config::{CliRunOverrides, FeedbackSetting};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tool::Tool;
use tracing::debug;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FeedbackArg {
    Off,
    Concise,
    Normal,
    Verbose,
}

impl FeedbackArg {
    fn as_setting(self) -> FeedbackSetting {
        match self {
            FeedbackArg::Off => FeedbackSetting::Off,
            FeedbackArg::Concise => FeedbackSetting::Concise,
            FeedbackArg::Normal => FeedbackSetting::Normal,
            FeedbackArg::Verbose => FeedbackSetting::Verbose,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kulla", version, about = "Incremental snippet evaluation tool")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Options for the interactive session started without a subcommand.
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    feedback: Option<FeedbackArg>,
    /// Script evaluated instead of the stored start-up definitions.
    #[arg(long, conflicts_with = "no_startup")]
    startup: Option<PathBuf>,
    #[arg(long)]
    no_startup: bool,
    /// Directories searched for classes (`:`-separated or repeated).
    #[arg(long = "class-path", visible_alias = "cp", value_delimiter = ':')]
    class_path: Vec<PathBuf>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    verbose: bool,
}

impl SessionArgs {
    fn overrides(&self) -> CliRunOverrides {
        CliRunOverrides {
            feedback: self.feedback.map(FeedbackArg::as_setting),
            startup: self.startup.clone(),
            no_startup: self.no_startup.then_some(true),
            class_path: self.class_path.clone(),
            prompt: self.prompt.clone(),
            verbose: self.verbose.then_some(true),
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a file of snippets and commands, then exit.
    Run {
        file: Option<PathBuf>,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Evaluate inline snippets.
    Eval {
        code: String,
        #[command(flatten)]
        session: SessionArgs,
    },
    /// Start an interactive session.
    Repl {
        #[command(flatten)]
        session: SessionArgs,
    },
}

fn start_tool(session: SessionArgs) -> Result<Tool> {
    let overrides = session.overrides();
    let resolved = runtime_context::resolve_config(session.config, &overrides)?;
    runtime_context::init_tracing(resolved.verbose);
    debug!(
        feedback = resolved.feedback.name(),
        class_path = resolved.class_path.len(),
        "configuration resolved"
    );
    Tool::new(&resolved)
}

fn run_command(path: PathBuf, session: SessionArgs) -> Result<()> {
    let file =
        File::open(&path).with_context(|| format!("failed reading {}", path.display()))?;
    let mut tool = start_tool(session)?;
    tool.run_script(&mut BufReader::new(file))
}

fn eval_command(code: String, session: SessionArgs) -> Result<()> {
    let mut tool = start_tool(session)?;
    tool.run_script(&mut code.as_bytes())
}

fn repl_command(session: SessionArgs) -> Result<()> {
    let mut tool = start_tool(session)?;
    tool.interact(&mut io::stdin().lock())
}

fn main() -> Result<()> {
    let cli = Cli::parse_from(normalize_cli_args(std::env::args_os()));
    dispatch::execute(cli)
}
