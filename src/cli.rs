use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, CommandFactory, Parser, Subcommand};

use crate::core::Settings;

/// proctrack - record whether named processes are running, not running, or dormant
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// SQLite database holding tracked processes and statuses
    #[arg(long, env = "PROCTRACK_DB", global = true)]
    pub database: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Process name to add to the tracking table (repeatable)
    #[arg(long = "add-process", value_name = "NAME")]
    pub add_process: Vec<String>,

    /// List stored statuses and exit
    #[arg(long, conflicts_with = "add_process")]
    pub list: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start tracking one or more process names
    Add {
        #[arg(required = true, value_name = "NAME")]
        names: Vec<String>,
    },
    /// Print every stored status record
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the tracked process names
    Processes,
    /// Check tracked processes on a fixed interval until interrupted
    Run(RunArgs),
}

#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// User to record statuses for (defaults to the current user)
    #[arg(short, long, env = "PROCTRACK_USER")]
    pub user: Option<String>,

    /// Seconds between checks
    #[arg(short, long, env = "PROCTRACK_INTERVAL", value_name = "SECS")]
    pub interval: Option<u64>,

    /// Seconds without a sighting before a stopped process is dormant
    #[arg(long, env = "PROCTRACK_DORMANT_TIMEOUT", value_name = "SECS")]
    pub dormant_timeout: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,

    /// Persist the interval and timeout as the new defaults
    #[arg(long)]
    pub save: bool,
}

impl RunArgs {
    /// Overlay command line values on persisted settings
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(interval) = self.interval {
            settings.check_interval_secs = interval;
        }
        if let Some(timeout) = self.dormant_timeout {
            settings.dormant_timeout_secs = timeout;
        }
    }
}

impl CommandArgs {
    /// Parse the process arguments, exiting with a usage error on conflicts
    pub fn parse_checked() -> Self {
        let args = Self::parse();
        if let Err(e) = args.check_conflicts() {
            e.exit();
        }
        args
    }

    /// Like `try_parse_from`, also rejecting legacy flags mixed with a subcommand
    #[cfg(test)]
    pub fn try_parse_checked<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let args = Self::try_parse_from(itr)?;
        args.check_conflicts()?;
        Ok(args)
    }

    fn check_conflicts(&self) -> Result<(), clap::Error> {
        let legacy = if !self.add_process.is_empty() {
            "--add-process"
        } else if self.list {
            "--list"
        } else {
            return Ok(());
        };
        if self.command.is_some() {
            return Err(Self::command().error(
                ErrorKind::ArgumentConflict,
                format!("{} cannot be combined with a subcommand", legacy),
            ));
        }
        Ok(())
    }

    /// Resolve the flag-style invocations into a subcommand; no command means run
    pub fn into_command(self) -> Command {
        if !self.add_process.is_empty() {
            return Command::Add {
                names: self.add_process,
            };
        }
        if self.list {
            return Command::List { json: false };
        }
        self.command.unwrap_or_else(|| Command::Run(RunArgs::default()))
    }
}
