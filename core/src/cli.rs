use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the inbox tool.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

/// Options that override the configuration file and environment.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Signed-in user id.
    #[arg(long, global = true)]
    pub user_id: Option<String>,
    /// Page size for conversation and message loads.
    #[arg(long, global = true)]
    pub page_size: Option<u32>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply line-delimited realtime frames and print the resulting snapshot.
    Replay {
        /// File with one JSON envelope per line; stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Conversation to treat as open.
        #[arg(long)]
        active: Option<String>,
    },
    /// Print a display URL for a media asset.
    MediaUrl {
        url: String,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
    },
    /// Print the resolved configuration.
    Config,
}
