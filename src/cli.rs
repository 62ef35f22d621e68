use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct CliOpts {
  #[clap(
    short,
    long,
    parse(from_occurrences),
    help = "Use verbose output (-vv very verbose output)"
  )]
  pub verbose: u64,

  #[clap(subcommand)]
  pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Start the observer stack against a dataset.
  Run(RunOpts),
}

#[derive(Debug, Args)]
pub struct RunOpts {
  #[clap(
    long,
    parse(from_os_str),
    help = "JSON-lines observation dataset to replay"
  )]
  pub dataset: PathBuf,

  #[clap(long, help = "seconds to run before clean shutdown")]
  pub duration: u64,

  #[clap(long, default_value = "1.0", help = "replay speed multiplier")]
  pub speed: f64,

  #[clap(
    long,
    parse(from_os_str),
    default_value = "data",
    help = "directory for chains, snapshots and logs"
  )]
  pub data_dir: PathBuf,

  #[clap(long, parse(from_os_str), help = "path to the ROA table JSON")]
  pub roa: PathBuf,

  #[clap(
    long,
    parse(from_os_str),
    help = "path to the AS relationship table JSON"
  )]
  pub relationships: Option<PathBuf>,

  #[clap(
    long,
    parse(from_os_str),
    help = "validator public key registry JSON; omit to run with \
            ephemeral keys"
  )]
  pub key_registry: Option<PathBuf>,

  #[clap(
    long,
    parse(from_os_str),
    help = "directory holding as<N>.key secret key files (required with \
            --key-registry)"
  )]
  pub keys_dir: Option<PathBuf>,

  #[clap(long, parse(from_os_str), help = "stake registry JSON")]
  pub stakes: Option<PathBuf>,

  #[clap(
    long = "validator",
    help = "validator AS number, repeatable; used when no key registry \
            is given",
    default_values = &["1", "3", "5", "7", "9", "11", "13", "15", "17"]
  )]
  pub validators: Vec<u32>,
}
