use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "clientauth")]
#[command(about = "Reconcile client authentication credentials against a management API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Management API base URL (overrides config and CLIENTAUTH_URL env var)
    #[arg(short, long, global = true, env = "CLIENTAUTH_URL")]
    pub server: Option<String>,

    /// Management API bearer token
    #[arg(long, global = true, env = "CLIENTAUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Config profile name
    #[arg(short, long, global = true, env = "CLIENTAUTH_PROFILE", default_value = "default")]
    pub profile: String,

    /// Reconciler settings file (TOML)
    #[arg(short, long, global = true, env = "CLIENTAUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show what apply would change, without changing anything
    Plan(DesiredArgs),
    /// Converge clients onto the desired credential configuration
    Apply(ApplyArgs),
    /// Show the current credential configuration of a client
    Show(ClientArgs),
    /// Reset a client to its default method and delete all credentials
    Teardown(TeardownArgs),
    /// Store a management API token for the profile
    Login(LoginArgs),
    /// Remove the stored token
    Logout,
    /// Manage CLI configuration
    Config(ConfigArgs),
}

#[derive(clap::Args)]
pub struct DesiredArgs {
    /// Desired-state file (TOML or JSON, `-` for JSON on stdin)
    pub file: PathBuf,
}

#[derive(clap::Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub desired: DesiredArgs,
    /// Delete credentials detached by a method switch
    #[arg(long)]
    pub prune: bool,
    /// Abort the run after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

#[derive(clap::Args)]
pub struct ClientArgs {
    /// Client identifier
    pub client_id: String,
}

#[derive(clap::Args)]
pub struct TeardownArgs {
    /// Client identifier
    pub client_id: String,
    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(clap::Args)]
pub struct LoginArgs {
    /// Management API token (prompted on stdin if omitted)
    #[arg(long)]
    pub token: Option<String>,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current config
    Show,
    /// Set config value
    Set(ConfigSetArgs),
}

#[derive(clap::Args)]
pub struct ConfigSetArgs {
    /// Key to set (server, format, prune)
    pub key: String,
    /// Value
    pub value: String,
}
