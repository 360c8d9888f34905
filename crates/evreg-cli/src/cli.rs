use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "evreg",
    about = "Event registry: content-addressed documents anchored on a ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file. Defaults to ./evreg.toml when present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate, store, and anchor an event document
    Ingest(IngestArgs),
    /// Change the status of an anchored document
    Status(StatusArgs),
    /// Return a rejected or inactive document to active
    Reactivate(CidArg),
    /// Show the derived status, content, and history of a CID
    Query(QueryArgs),
    /// Print the stored bytes of a CID
    Cat(CidArg),
    /// List indexed records
    List(ListArgs),
    /// Repair the local index from the ledger
    Reconcile(ReconcileArgs),
    /// Pin already stored content with the pinning service
    Pin(CidArg),
    /// Generate a new signer key
    Keygen,
    /// Show or check the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct IngestArgs {
    /// JSON file to ingest; `-` or omitted reads stdin.
    pub file: Option<PathBuf>,
    /// Expiry as RFC 3339 or unix seconds. Omit for no expiry.
    #[arg(long)]
    pub valid_to: Option<String>,
}

#[derive(Args)]
pub struct StatusArgs {
    pub cid: String,
    /// One of: active, rejected, inactive.
    pub status: String,
}

#[derive(Args)]
pub struct CidArg {
    pub cid: String,
}

#[derive(Args)]
pub struct QueryArgs {
    pub cid: String,
    /// Leave the payload out of the output.
    #[arg(long)]
    pub no_payload: bool,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct ReconcileArgs {
    pub cids: Vec<String>,
    /// Reconcile every indexed record.
    #[arg(long, conflicts_with = "cids")]
    pub all: bool,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Only validate; print nothing on success.
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_work_after_the_subcommand() {
        let cli = Cli::try_parse_from(["evreg", "query", "Qm123", "--format", "json", "-vv"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Query(QueryArgs { ref cid, .. }) if cid == "Qm123"));
    }

    #[test]
    fn reconcile_all_conflicts_with_cids() {
        assert!(Cli::try_parse_from(["evreg", "reconcile", "--all", "Qm123"]).is_err());
        assert!(Cli::try_parse_from(["evreg", "reconcile", "--all"]).is_ok());
    }
}
