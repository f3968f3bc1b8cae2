//! CLI surface for confgit.
//!
//! Exit codes: 0 success (including "no changes"), 1 runtime failure, 2
//! usage error (clap's default).

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::Result;
use crate::config;
use crate::run::{self, RunOptions};
use crate::upgrade;

#[derive(Parser, Debug)]
#[command(
    name = "confgit",
    version,
    about = "Snapshot host configuration directories into a Git repository",
    infer_subcommands = true,
    infer_long_args = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Alternate configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Machine-readable JSON output.
    #[arg(
        long,
        global = true,
        default_value_t = false,
        default_missing_value = "true",
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub json: bool,

    /// Errors only.
    #[arg(
        short = 'q',
        long,
        global = true,
        default_value_t = false,
        default_missing_value = "true",
        num_args = 0..=1,
        value_parser = BoolishValueParser::new()
    )]
    pub quiet: bool,

    /// Debug output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snapshot the configured sources and commit the result.
    Run(RunArgs),

    /// Write a commented default configuration file.
    Init(InitArgs),

    /// Upgrade confgit to the latest release.
    Upgrade(UpgradeArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Align and mirror, but never commit or push.
    #[arg(long)]
    pub dry_run: bool,

    /// Print a post-run summary.
    #[arg(long)]
    pub report: bool,

    /// Keep the commit local even if the config enables pushing.
    #[arg(long)]
    pub no_push: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Destination path (default: the user configuration path).
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    /// Only report whether a newer release exists.
    #[arg(long)]
    pub check: bool,
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli) -> Result<()> {
    let Cli {
        config: config_path,
        json,
        command,
        ..
    } = cli;

    match command {
        Commands::Run(args) => {
            let config = config::load(config_path.as_deref())?;
            let report = run::run(
                &config,
                RunOptions {
                    dry_run: args.dry_run,
                    no_push: args.no_push,
                },
            )?;
            if json {
                println!("{}", report.render_json());
            } else if args.report {
                print!("{}", report.render_text());
            }
            Ok(())
        }
        Commands::Init(args) => {
            let path = args.path.unwrap_or_else(config::user_config_path);
            config::write_default_config(&path)?;
            if json {
                println!("{}", serde_json::json!({ "config": path }));
            } else {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
        Commands::Upgrade(args) => {
            let outcome = upgrade::run_upgrade(args.check)?;
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "updated": outcome.updated,
                        "from": outcome.from_version,
                        "to": outcome.to_version,
                        "install_path": outcome.install_path,
                    })
                );
            } else if outcome.updated {
                println!(
                    "upgraded {} -> {} at {}",
                    outcome.from_version,
                    outcome.to_version,
                    outcome.install_path.display()
                );
            } else if args.check && outcome.to_version != outcome.from_version {
                println!(
                    "release {} available (running {})",
                    outcome.to_version, outcome.from_version
                );
            } else {
                println!("already up to date ({})", outcome.from_version);
            }
            Ok(())
        }
    }
}
