//! Command-line argument definitions for the switchboard binary.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use switchboard::TemplatePick;

/// How engine events are printed
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Console transcript: `> command` lines, raw device output
    #[default]
    Text,
    /// One JSON event envelope per line
    Json,
}

/// Dispatch catalog commands to network device consoles
#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about, disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration file (otherwise $SWITCHBOARD_CONFIG or the default locations)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Browse the template catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
    /// Print the literal commands a template expands to
    Resolve {
        /// Template id, e.g. system-settings/configure-hostname
        template: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Connect to a device, run a batch and disconnect
    Run(RunArgs),
    /// Interactive console for one device
    Console(ConsoleArgs),
    /// List configured device profiles
    Devices,
    /// List serial ports on this machine
    Ports,
}

#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// List categories and template ids
    List {
        /// Only this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Show one template's commands and parameters
    Show { template: String },
}

/// `name=value` template parameters
#[derive(Args, Debug, Default)]
pub struct ParamArgs {
    /// Parameter value, repeatable
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

impl ParamArgs {
    /// Pick for `template` carrying every parameter
    pub fn pick(&self, template: &str) -> TemplatePick {
        self.params
            .iter()
            .fold(TemplatePick::new(template), |pick, (name, value)| {
                pick.with_param(name.as_str(), value)
            })
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Device profile id from the configuration
    #[arg(short, long)]
    pub device: String,

    /// Saved command set (TOML or JSON)
    #[arg(long, value_name = "FILE")]
    pub set: Option<PathBuf>,

    /// Template to run after the command set, repeatable
    #[arg(long = "pick", value_name = "TEMPLATE")]
    pub picks: Vec<String>,

    /// Parameters for every --pick
    #[command(flatten)]
    pub params: ParamArgs,

    /// Send commands on a timer instead of confirming each one
    #[arg(long)]
    pub auto: bool,

    /// Pause between auto-advanced commands
    #[arg(long, value_name = "MS")]
    pub delay_ms: Option<u64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Talk to an in-memory echo device instead of real hardware
    #[arg(long)]
    pub dry_run: bool,
}

impl RunArgs {
    /// Picks from --pick, in order
    pub fn template_picks(&self) -> Vec<TemplatePick> {
        self.picks
            .iter()
            .map(|template| self.params.pick(template))
            .collect()
    }
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    /// Device profile id from the configuration
    #[arg(short, long)]
    pub device: String,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Talk to an in-memory echo device instead of real hardware
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}
