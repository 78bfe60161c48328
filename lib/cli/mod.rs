use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(about = "Tracks the historical validity of RPKI VRPs over time")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database tables
    Init,

    /// Reconcile one feed dump into the interval store
    Update {
        #[clap(short, long)]
        /// Ingest the dump with this timestamp (YYYYmmddTHHMMSS) instead of the newest
        timestamp: Option<String>,
    },

    /// Serve the query API
    Serve,
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
