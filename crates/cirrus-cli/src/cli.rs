use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cirrus",
    about = "Cirrus -- durable storage for personal clouds",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args)]
pub struct StorageArgs {
    /// TOML file with `fs_url` and `domain`
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage URL, `file:///abs/root` or `mem://` (not persisted); overrides
    /// the config file. Defaults to `./.cirrus-data`
    #[arg(long, global = true)]
    pub storage: Option<String>,

    /// Tenant domain, overrides the config file
    #[arg(long, global = true)]
    pub domain: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install a bundle directory as <slug>/<version>
    Install(InstallArgs),
    /// Print a file of an installed bundle
    Cat(CatArgs),
    /// Print the content hash and size of local files
    Hash(HashArgs),
    /// Show the resolved storage configuration
    Config,
}

#[derive(Args)]
pub struct InstallArgs {
    pub slug: String,
    pub version: String,
    pub dir: PathBuf,
}

#[derive(Args)]
pub struct CatArgs {
    pub slug: String,
    pub version: String,
    pub name: String,
}

#[derive(Args)]
pub struct HashArgs {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}
