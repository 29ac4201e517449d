mod cli;
mod gateway;
mod serve;

use std::io::Write;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use conduit_audit::{AuditStore, RecordFilter, tabular_header, tabular_row};
use conduit_engine::DispatchRequest;
use conduit_types::DispatchResult;
use conduit_util::KeychainSecretStore;
use futures_util::StreamExt;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, DispatchArgs, ListArgs, ListFormat, LogsCommand, SecretCommand};
use crate::gateway::{Gateway, compile_catalog, load_config, open_audit};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Dispatch(args) => {
            let gateway = Gateway::open(config).await?;
            let request = dispatch_request(args)?;
            let result = gateway.pipeline.dispatch(request).await?;
            print_result(&result)
        }
        Command::Replay { record_id } => {
            let gateway = Gateway::open(config).await?;
            let result = gateway
                .replay_engine()
                .replay(record_id)
                .await
                .with_context(|| format!("replay {record_id}"))?;
            print_result(&result)
        }
        Command::Logs(LogsCommand::List(args)) => {
            let audit = open_audit(&config).await?;
            list_records(audit.as_ref(), args).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs(LogsCommand::Show { record_id }) => {
            let audit = open_audit(&config).await?;
            let record = audit.find(record_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Purge { older_than } => {
            let audit = open_audit(&config).await?;
            let removed = audit.purge_older_than(older_than.as_delta()).await?;
            println!("purged {removed} record(s) older than {older_than}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { catalog } => {
            let (path, catalog) = compile_catalog(&config, catalog)?;
            println!("{}: {} provider(s)", path.display(), catalog.len());
            for provider in catalog.providers() {
                let state = if provider.active { "active" } else { "inactive" };
                println!(
                    "  {}\t{}\t{} endpoint(s)\t{}",
                    provider.slug,
                    provider.environment_name,
                    provider.endpoints().count(),
                    state
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve { bind } => {
            let address = serve::resolve_bind_address(bind, &config.bind_address)?;
            let gateway = Gateway::open(config).await?;
            serve::serve(gateway.pipeline, address).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Secret(SecretCommand::Set { name }) => {
            let value = read_secret_value(std::io::stdin().lock())?;
            KeychainSecretStore::default().set(&name, &value)?;
            println!("stored secret {name}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn dispatch_request(args: DispatchArgs) -> Result<DispatchRequest> {
    let raw = match (args.data, args.data_file) {
        (Some(data), _) => data,
        (None, Some(path)) => std::fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?,
        (None, None) => "{}".to_string(),
    };
    let model: Value = serde_json::from_str(&raw).context("model is not valid JSON")?;
    let mut request = DispatchRequest::new(args.provider, args.endpoint, model);
    if let Some(subject) = args.subject {
        request = request.with_subject(subject);
    }
    Ok(request)
}

/// First line of `input`, without the trailing newline.
fn read_secret_value(mut input: impl std::io::BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).context("read secret from stdin")?;
    let value = line.trim_end_matches(['\r', '\n']);
    anyhow::ensure!(!value.is_empty(), "secret value is empty");
    Ok(value.to_string())
}

/// Prints the result; a failed call exits with status 1.
fn print_result(result: &DispatchResult) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(if result.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn list_records(audit: &dyn AuditStore, args: ListArgs) -> Result<()> {
    let mut filter = RecordFilter::new()
        .between(args.since, args.until)
        .page(args.offset, args.limit);
    if let Some(provider) = args.provider {
        filter = filter.provider(provider);
    }
    if let Some(endpoint) = args.endpoint {
        filter = filter.endpoint(endpoint);
    }
    if let Some(outcome) = args.outcome {
        filter = filter.outcome(outcome);
    }
    if let Some(subject) = args.subject {
        filter = filter.subject(subject);
    }

    let mut out = std::io::stdout().lock();
    if args.format == ListFormat::Table {
        writeln!(out, "{}", tabular_header())?;
    }
    let mut records = audit.list(filter);
    while let Some(record) = records.next().await {
        let record = record?;
        match args.format {
            ListFormat::Table => writeln!(out, "{}", tabular_row(&record))?,
            ListFormat::Jsonl => writeln!(out, "{}", serde_json::to_string(&record)?)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::Subject;
    use serde_json::json;

    fn args(data: Option<&str>, data_file: Option<std::path::PathBuf>) -> DispatchArgs {
        DispatchArgs {
            provider: "stripe".into(),
            endpoint: "charge".into(),
            data: data.map(str::to_string),
            data_file,
            subject: Some(Subject::new("order", "ord_1")),
        }
    }

    #[test]
    fn model_defaults_to_empty_object() {
        let request = dispatch_request(args(None, None)).unwrap();
        assert_eq!(request.model, json!({}));
        assert_eq!(request.subject, Some(Subject::new("order", "ord_1")));
    }

    #[test]
    fn model_is_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"amount": 12.5}"#).unwrap();
        let request = dispatch_request(args(None, Some(path))).unwrap();
        assert_eq!(request.model, json!({"amount": 12.5}));
    }

    #[test]
    fn secret_value_is_first_line_of_input() {
        let value = read_secret_value("sk_live_123\nignored\n".as_bytes()).unwrap();
        assert_eq!(value, "sk_live_123");
        assert!(read_secret_value("\n".as_bytes()).is_err());
    }

    #[test]
    fn rejects_malformed_model() {
        assert!(dispatch_request(args(Some("{amount"), None)).is_err());
    }
}
