use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use conduit_types::{Outcome, RecordId, Subject};
use conduit_util::Retention;

#[derive(Debug, Parser)]
#[command(name = "conduit", version, about = "Configuration-driven API integration gateway")]
pub struct Cli {
    /// Gateway configuration file (JSON or YAML). Defaults to `CONDUIT_CONFIG_PATH`
    /// or `<config_dir>/conduit/gateway.json`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Map, sign and send one call, then print the result.
    Dispatch(DispatchArgs),
    /// Re-execute an archived dispatch record.
    Replay {
        record_id: RecordId,
    },
    /// Inspect the audit log.
    #[command(subcommand)]
    Logs(LogsCommand),
    /// Remove audit records older than a retention window.
    Purge {
        /// Retention window such as `30d`, `12h`, `45m`, `90s` or `2w`.
        #[arg(long)]
        older_than: Retention,
    },
    /// Load, validate and compile the provider catalog.
    Validate {
        /// Catalog file or directory; overrides the configured location.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Serve `METHOD /{provider}/{endpoint}` as a dispatch proxy.
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Manage credentials in the OS keychain.
    #[command(subcommand)]
    Secret(SecretCommand),
}

#[derive(Debug, Subcommand)]
pub enum SecretCommand {
    /// Store a secret; the value is read from stdin.
    Set { name: String },
}

#[derive(Debug, Args)]
pub struct DispatchArgs {
    pub provider: String,
    pub endpoint: String,
    /// Model as inline JSON.
    #[arg(long, conflicts_with = "data_file")]
    pub data: Option<String>,
    /// Model read from a JSON file.
    #[arg(long)]
    pub data_file: Option<PathBuf>,
    /// Business entity as `TYPE:ID`.
    #[arg(long)]
    pub subject: Option<Subject>,
}

#[derive(Debug, Subcommand)]
pub enum LogsCommand {
    /// Stream records matching the filters.
    List(ListArgs),
    /// Print one record as JSON.
    Show { record_id: RecordId },
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(long)]
    pub provider: Option<String>,
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long)]
    pub outcome: Option<Outcome>,
    #[arg(long)]
    pub subject: Option<Subject>,
    /// Inclusive lower bound (RFC 3339).
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    /// Exclusive upper bound (RFC 3339).
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long, value_enum, default_value_t = ListFormat::Table)]
    pub format: ListFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    /// Tab-separated rows with a header line.
    Table,
    /// One JSON record per line.
    Jsonl,
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
    fn parses_dispatch_with_subject() {
        let cli = Cli::try_parse_from([
            "conduit",
            "dispatch",
            "stripe",
            "charge",
            "--data",
            r#"{"amount": 2.5}"#,
            "--subject",
            "order:ord_1",
        ])
        .unwrap();
        let Command::Dispatch(args) = cli.command else {
            panic!("expected dispatch");
        };
        assert_eq!(args.provider, "stripe");
        assert_eq!(args.subject, Some(Subject::new("order", "ord_1")));
        assert!(args.data_file.is_none());
    }

    #[test]
    fn rejects_both_data_sources() {
        let parsed = Cli::try_parse_from([
            "conduit",
            "dispatch",
            "stripe",
            "charge",
            "--data",
            "{}",
            "--data-file",
            "model.json",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_log_filters() {
        let cli = Cli::try_parse_from([
            "conduit",
            "logs",
            "list",
            "--provider",
            "stripe",
            "--outcome",
            "fail",
            "--since",
            "2024-05-01T00:00:00Z",
            "--limit",
            "10",
            "--format",
            "jsonl",
        ])
        .unwrap();
        let Command::Logs(LogsCommand::List(args)) = cli.command else {
            panic!("expected logs list");
        };
        assert_eq!(args.outcome, Some(Outcome::Fail));
        assert_eq!(args.limit, Some(10));
        assert_eq!(args.offset, 0);
        assert_eq!(args.format, ListFormat::Jsonl);
        assert!(args.since.is_some());
    }

    #[test]
    fn parses_secret_set() {
        let cli = Cli::try_parse_from(["conduit", "secret", "set", "payments_token"]).unwrap();
        let Command::Secret(SecretCommand::Set { name }) = cli.command else {
            panic!("expected secret set");
        };
        assert_eq!(name, "payments_token");
        assert!(Cli::try_parse_from(["conduit", "secret", "set"]).is_err());
    }

    #[test]
    fn parses_retention_window() {
        let cli = Cli::try_parse_from(["conduit", "purge", "--older-than", "30d"]).unwrap();
        let Command::Purge { older_than } = cli.command else {
            panic!("expected purge");
        };
        assert_eq!(older_than.as_delta(), chrono::TimeDelta::days(30));
        assert!(Cli::try_parse_from(["conduit", "purge", "--older-than", "soon"]).is_err());
    }
}
