use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::criteria::CriteriaStore;
use crate::editor::TaskForm;
use crate::task::{Deploy, Project, Status, parse_calendar_date};

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskbin",
    version,
    about = "Shared task list kept in a single remote JSON document",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "taskbinrc")]
    pub taskbinrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Fetch the collection and show one filtered page.
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        page: Option<NonZeroUsize>,
        #[arg(long = "page-size")]
        page_size: Option<NonZeroUsize>,
    },
    /// Print the shareable address for a filter.
    Link {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Create a task.
    Add {
        #[command(flatten)]
        form: FormArgs,
    },
    /// Change fields of an existing task.
    Edit {
        key: String,
        #[command(flatten)]
        form: FormArgs,
    },
    /// Delete a task after confirmation.
    Delete {
        key: String,
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Enable writes with the access token.
    Unlock { token: String },
    /// Forget the stored access token.
    Lock,
    /// Show whether this session may write.
    Access,
}

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Query string to start from, e.g. `status=pending&project=OM`.
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long = "status", action = ArgAction::Append)]
    pub statuses: Vec<String>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub deploy: Option<String>,
    /// Deadline day, `YYYY-MM-DD`.
    #[arg(long)]
    pub date: Option<String>,
}

impl FilterArgs {
    /// Applies each supplied flag through its own setter.
    pub fn apply(&self, criteria: &mut CriteriaStore) -> anyhow::Result<()> {
        if let Some(search) = self.search.as_ref() {
            criteria.set_search_text(search.as_str());
        }
        if !self.statuses.is_empty() {
            criteria.set_statuses(
                self.statuses
                    .iter()
                    .flat_map(|s| s.split(','))
                    .filter(|s| !s.is_empty())
                    .map(Status::from),
            );
        }
        if let Some(project) = self.project.as_deref() {
            criteria.set_project(Some(project).filter(|p| !p.is_empty()).map(Project::from));
        }
        if let Some(deploy) = self.deploy.as_deref() {
            criteria.set_deploy(Some(deploy).filter(|d| !d.is_empty()).map(Deploy::from));
        }
        if let Some(date) = self.date.as_deref() {
            let day = parse_calendar_date(date)
                .ok_or_else(|| anyhow!("invalid --date {date:?}; expected YYYY-MM-DD"))?;
            criteria.set_deadline(Some(day));
        }
        Ok(())
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct FormArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub deploy: Option<String>,
    /// `YYYY-MM-DD`.
    #[arg(long)]
    pub deadline: Option<String>,
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub note: Option<String>,
}

impl From<FormArgs> for TaskForm {
    fn from(args: FormArgs) -> Self {
        TaskForm {
            name: args.name,
            description: args.description,
            project: args.project,
            deploy: args.deploy,
            deadline: args.deadline,
            status: args.status,
            note: args.note,
        }
    }
}

/// Filter used when `RUST_LOG` is unset. Quiet wins over verbose.
fn default_level(verbose: u8, quiet: u8) -> &'static str {
    match (quiet, verbose) {
        (q, _) if q >= 2 => "off",
        (1, _) => "error",
        (_, v) if v >= 3 => "trace",
        (_, 2) => "debug",
        (_, 1) => "info",
        _ => "warn",
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level(verbose, quiet)))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}
