//! CLI struct definitions for the `synthesis` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "synthesis",
    version = env!("CARGO_PKG_VERSION"),
    about = "Audit logic atomics against their published specifications and anchor the certified score on the ledger.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Config file (defaults to `.synthesis/config.toml` in the nearest project).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = "text")]
    pub format: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Execute an atomic on an input file, certify the result and anchor its score.
    Run {
        /// Atomic id as registered on the ledger.
        id: String,
        /// Input payload: a JSON file, or any text file (passed as a string).
        input: PathBuf,
        /// Register the id with this specification pointer if the ledger does not know it.
        #[clap(long)]
        bootstrap: Option<String>,
    },
    /// Show integrity and status for every atomic in the manifest (or known to the ledger).
    List {
        /// Genesis manifest (defaults to `pipeline.manifest`).
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Show one registry record, its classification and the account's fee position.
    Inspect {
        id: String,
    },
    /// Peer-audit specifications and issue strikes from the resulting scores.
    Sweep {
        /// Ids to sweep (defaults to every manifest entry).
        ids: Vec<String>,
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Publish each manifest specification and register ids the ledger does not know yet.
    Seed {
        #[clap(long)]
        manifest: Option<PathBuf>,
    },
    /// Credit the controlling account on the local ledger.
    Fund {
        amount: u64,
    },
    /// Print the most recent audit trail entries.
    Trail {
        #[clap(long, default_value_t = 20)]
        last: usize,
    },
    /// Print the version.
    Version,
}
