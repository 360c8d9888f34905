use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use colored::Colorize;
use evreg_crypto::SigningKey;
use evreg_engine::{
    DerivedView, Ingestion, Integrity, Pinned, ReconcileOutcome, RegistryConfig, RegistryEngine,
    RegistryError, Warning,
};
use evreg_types::{time, Cid, DerivedStatus, Record};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cli::*;

const DEFAULT_CONFIG: &str = "evreg.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let config = load_config(cli.config.as_deref())?;
    debug!(data_dir = %config.data_dir.display(), "configuration loaded");
    match cli.command {
        Command::Keygen => cmd_keygen(format),
        Command::Config(args) => cmd_config(&config, args, format),
        command => {
            let engine = RegistryEngine::open(&config).await.map_err(registry)?;
            let result = run_engine_command(&engine, command, format).await;
            engine.close().map_err(registry)?;
            result
        }
    }
}

async fn run_engine_command(
    engine: &RegistryEngine,
    command: Command,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Command::Ingest(args) => cmd_ingest(engine, args, format).await,
        Command::Status(args) => {
            let record = engine
                .change_status(&parse_cid(&args.cid)?, &args.status)
                .await
                .map_err(registry)?;
            print_record_change(engine, &record, format)
        }
        Command::Reactivate(args) => {
            let record = engine
                .reactivate(&parse_cid(&args.cid)?)
                .await
                .map_err(registry)?;
            print_record_change(engine, &record, format)
        }
        Command::Query(args) => cmd_query(engine, args, format).await,
        Command::Cat(args) => {
            let bytes = engine
                .resolve_content(&parse_cid(&args.cid)?)
                .await
                .map_err(registry)?;
            println!("{}", String::from_utf8_lossy(&bytes));
            Ok(())
        }
        Command::List(args) => cmd_list(engine, args, format),
        Command::Reconcile(args) => cmd_reconcile(engine, args, format).await,
        Command::Pin(args) => {
            let pinned = engine
                .pin_existing(&parse_cid(&args.cid)?)
                .await
                .map_err(registry)?;
            print_pinned(&pinned, format)
        }
        Command::Keygen | Command::Config(_) => {
            bail!("this command runs without a registry engine")
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RegistryConfig> {
    match path {
        Some(path) => RegistryConfig::load(path)
            .map_err(registry)
            .with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            RegistryConfig::load(DEFAULT_CONFIG).map_err(registry)
        }
        None => Ok(RegistryConfig::default()),
    }
}

/// Keeps the error kind visible in the top-level report.
fn registry(err: RegistryError) -> anyhow::Error {
    let kind = err.kind();
    anyhow::Error::new(err).context(kind.as_str())
}

fn parse_cid(input: &str) -> anyhow::Result<Cid> {
    Cid::parse(input).with_context(|| format!("invalid CID {input:?}"))
}

fn parse_valid_to(input: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(secs) = input.parse::<u64>() {
        return time::from_unix_seconds(secs)
            .with_context(|| format!("valid-to {secs} must be after the unix epoch"));
    }
    let parsed = DateTime::parse_from_rfc3339(input)
        .with_context(|| format!("valid-to {input:?} is neither RFC 3339 nor unix seconds"))?;
    Ok(parsed.with_timezone(&Utc))
}

fn read_payload(file: Option<&Path>) -> anyhow::Result<Value> {
    let text = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };
    serde_json::from_str(&text).context("payload is not valid JSON")
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_warnings(warnings: &[Warning]) {
    for warning in warnings {
        eprintln!("{} {warning}", "warning:".yellow().bold());
    }
}

fn colored_status(status: DerivedStatus) -> colored::ColoredString {
    let s = status.as_str();
    match status {
        DerivedStatus::Active => s.green().bold(),
        DerivedStatus::Rejected => s.red().bold(),
        DerivedStatus::Inactive | DerivedStatus::Expired => s.yellow().bold(),
        DerivedStatus::NotFound => s.dimmed(),
    }
}

// ---- ingest ----

async fn cmd_ingest(
    engine: &RegistryEngine,
    args: IngestArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let payload = read_payload(args.file.as_deref())?;
    let valid_to = args.valid_to.as_deref().map(parse_valid_to).transpose()?;
    let ingestion = engine.ingest(payload, valid_to).await.map_err(registry)?;
    print_ingestion(engine, &ingestion, format)
}

fn print_ingestion(
    engine: &RegistryEngine,
    ingestion: &Ingestion,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(ingestion);
    }
    let record = &ingestion.record;
    print_warnings(&ingestion.warnings);
    println!("{} Anchored {}", "✓".green().bold(), record.cid.to_string().cyan());
    println!("  Content hash: {}", record.content_hash);
    println!("  Size: {} bytes{}", record.content.size, if record.content.pinned { " (pinned)" } else { "" });
    if let Some(valid_to) = record.valid_to {
        println!("  Valid to: {}", valid_to.to_rfc3339());
    }
    if let Some(receipt) = &record.ledger_receipt {
        println!("  Tx: {} (block {})", receipt.tx_hash.to_string().yellow(), receipt.block_number);
        if let Some(url) = engine.explorer_url(&receipt.tx_hash) {
            println!("  Explorer: {}", url.blue());
        }
    }
    if let Some(url) = &record.content.gateway_url {
        println!("  Gateway: {}", url.blue());
    }
    Ok(())
}

fn print_record_change(
    engine: &RegistryEngine,
    record: &Record,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(record);
    }
    println!(
        "{} {} is now {}",
        "✓".green().bold(),
        record.cid.to_string().cyan(),
        record.status.as_str().bold()
    );
    if let Some(receipt) = record.latest_change().and_then(|c| c.receipt.as_ref()) {
        println!("  Tx: {} (block {})", receipt.tx_hash.to_string().yellow(), receipt.block_number);
        if let Some(url) = engine.explorer_url(&receipt.tx_hash) {
            println!("  Explorer: {}", url.blue());
        }
    }
    Ok(())
}

// ---- query ----

async fn cmd_query(
    engine: &RegistryEngine,
    args: QueryArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut view = engine
        .query(&parse_cid(&args.cid)?)
        .await
        .map_err(registry)?;
    if args.no_payload {
        view.payload = None;
    }
    if format == OutputFormat::Json {
        return print_json(&view);
    }
    print_view(&view)
}

fn print_view(view: &DerivedView) -> anyhow::Result<()> {
    println!("{} {}", view.cid.to_string().cyan().bold(), colored_status(view.status));
    if let Some(ledger) = &view.ledger {
        println!("  Ledger status: {}", ledger.status);
        match ledger.valid_to {
            Some(t) => println!("  Valid to: {}", t.to_rfc3339()),
            None => println!("  Valid to: {}", "never expires".dimmed()),
        }
        if let Some(t) = ledger.registered_at {
            println!("  Registered: {}", t.to_rfc3339());
        }
    }
    if let Some(size) = view.size {
        println!("  Size: {size} bytes");
    }
    match &view.integrity {
        Integrity::Verified => println!("  Integrity: {}", "verified".green()),
        Integrity::Mismatch { expected, actual } => println!(
            "  Integrity: {} (indexed {expected}, resolved {actual})",
            "MISMATCH".red().bold()
        ),
        Integrity::Unchecked => println!("  Integrity: {}", "unchecked".dimmed()),
    }
    if !view.index_in_sync {
        println!("  Index: {} (run `evreg reconcile {}`)", "out of sync".yellow(), view.cid);
    }
    if let Some(url) = &view.gateway_url {
        println!("  Gateway: {}", url.blue());
    }
    if let Some(url) = &view.explorer_url {
        println!("  Anchor tx: {}", url.blue());
    }
    if !view.history.is_empty() {
        println!("  History:");
        for entry in &view.history {
            let tx = entry
                .change
                .receipt
                .as_ref()
                .map(|r| r.tx_hash.short_hex())
                .unwrap_or_else(|| "reconciled".to_string());
            println!(
                "    {}  {:<8}  {}",
                entry.change.at.to_rfc3339().dimmed(),
                entry.change.status.as_str(),
                tx.yellow()
            );
        }
    }
    if let Some(payload) = &view.payload {
        println!("{}", serde_json::to_string_pretty(payload)?);
    }
    Ok(())
}

// ---- list / reconcile / pin ----

fn cmd_list(engine: &RegistryEngine, args: ListArgs, format: OutputFormat) -> anyhow::Result<()> {
    let mut records = engine.list().map_err(registry)?;
    if let Some(limit) = args.limit {
        records.truncate(limit);
    }
    if format == OutputFormat::Json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No records.");
    }
    for record in &records {
        println!(
            "{}  {:<8}  {}",
            record.cid.to_string().cyan(),
            record.status.as_str(),
            record.created_at.to_rfc3339().dimmed()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct Reconciled {
    cid: Cid,
    #[serde(flatten)]
    outcome: ReconcileOutcome,
}

async fn cmd_reconcile(
    engine: &RegistryEngine,
    args: ReconcileArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let cids: Vec<Cid> = if args.all {
        engine
            .list()
            .map_err(registry)?
            .into_iter()
            .map(|r| r.cid)
            .collect()
    } else if args.cids.is_empty() {
        bail!("name at least one CID or pass --all");
    } else {
        args.cids.iter().map(|c| parse_cid(c)).collect::<anyhow::Result<_>>()?
    };

    let mut results = Vec::with_capacity(cids.len());
    for cid in cids {
        let outcome = engine.reconcile(&cid).await.map_err(registry)?;
        results.push(Reconciled { cid, outcome });
    }
    if format == OutputFormat::Json {
        return print_json(&results);
    }
    for Reconciled { cid, outcome } in &results {
        let cid = cid.to_string().cyan();
        match outcome {
            ReconcileOutcome::InSync => println!("{} {cid} in sync", "✓".green()),
            ReconcileOutcome::Repaired { from, to } => {
                println!("{} {cid} repaired: {from} -> {}", "✓".yellow(), to.as_str().bold())
            }
            ReconcileOutcome::Created { record } => {
                println!("{} {cid} rebuilt as {}", "✓".yellow(), record.status.as_str().bold())
            }
            ReconcileOutcome::NotOnLedger { indexed } => println!(
                "{} {cid} not on ledger{}",
                "✗".red(),
                if *indexed { " (index holds a stale record)" } else { "" }
            ),
        }
    }
    Ok(())
}

fn print_pinned(pinned: &Pinned, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(pinned);
    }
    print_warnings(&pinned.warnings);
    println!(
        "{} Pinned {} ({} bytes)",
        "✓".green().bold(),
        pinned.pinned_cid.to_string().cyan(),
        pinned.size
    );
    Ok(())
}

// ---- keygen / config ----

fn cmd_keygen(format: OutputFormat) -> anyhow::Result<()> {
    let key = SigningKey::generate();
    let address = key.address();
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "signer_key": key.to_hex(),
            "address": address.to_string(),
        }));
    }
    println!("{} Generated signer key", "✓".green().bold());
    println!("  Address: {}", address.to_string().cyan());
    println!("  Secret:  {}", key.to_hex());
    println!("{}", "Store the secret as [ledger] signer_key; it is not saved anywhere.".dimmed());
    Ok(())
}

fn cmd_config(config: &RegistryConfig, args: ConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    config.validate().map_err(registry)?;
    if args.check {
        return Ok(());
    }
    let redacted = config.redacted();
    match format {
        OutputFormat::Json => print_json(&redacted),
        OutputFormat::Text => {
            print!("{}", redacted.to_toml_string().map_err(registry)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn valid_to_accepts_rfc3339_and_unix_seconds() {
        let expected = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_valid_to("2030-01-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_valid_to("2030-01-01T02:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_valid_to(&expected.timestamp().to_string()).unwrap(), expected);
    }

    #[test]
    fn valid_to_rejects_garbage_and_zero() {
        assert!(parse_valid_to("next tuesday").is_err());
        assert!(parse_valid_to("0").is_err());
    }

    #[test]
    fn registry_errors_carry_their_kind() {
        let err = registry(RegistryError::NotConfigured("no contract".into()));
        assert_eq!(err.to_string(), "NotConfigured");
        assert!(format!("{err:#}").contains("no contract"));
    }

    #[tokio::test]
    async fn engine_dispatch_refuses_engine_free_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RegistryConfig {
            data_dir: dir.path().to_path_buf(),
            ..RegistryConfig::default()
        };
        config.ledger.backend = evreg_engine::LedgerBackend::Memory;
        let engine = RegistryEngine::open(&config).await.unwrap();

        let err = run_engine_command(&engine, Command::Keygen, OutputFormat::Text)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("without a registry engine"));
        let config_cmd = Command::Config(ConfigArgs { check: true });
        assert!(run_engine_command(&engine, config_cmd, OutputFormat::Json)
            .await
            .is_err());
        engine.close().unwrap();
    }

    #[test]
    fn payload_file_must_be_json() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("event.json");
        std::fs::write(&good, r#"{"type":"ObjectEvent","eventTime":"t"}"#).unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();

        assert_eq!(read_payload(Some(&good)).unwrap()["type"], "ObjectEvent");
        assert!(read_payload(Some(&bad)).is_err());
    }
}
