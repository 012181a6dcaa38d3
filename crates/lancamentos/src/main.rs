use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::Table;
use lancamentos_core::{
    config::EtlConfig,
    db,
    error::EtlError,
    ingestion::{self, Batch},
    pipeline::{Pipeline, RunError, RunReport},
    warehouse::{PostgresWarehouse, Warehouse, WarehouseCounts},
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PREVIEW_ROWS: usize = 10;

#[derive(Parser, Debug)]
#[command(author, version, about = "Monthly transactions loader for the finance warehouse", long_about = None)]
struct Cli {
    /// Optional TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run database migrations
    Migrate,
    /// Validate a CSV file and load it into the warehouse
    Load(LoadArgs),
    /// Resolve dimensions and facts from the current staging table
    Etl(OutputArgs),
    /// Show row counts for staging, dimensions and facts
    Stats(OutputArgs),
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Monthly CSV export
    file: PathBuf,
    /// Validate and preview the file without touching the database
    #[arg(long)]
    dry_run: bool,
    /// Skip running migrations before loading
    #[arg(long)]
    skip_migrations: bool,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let config = EtlConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::Migrate => {
            let pool = db::connect(&config.database).await?;
            db::run_migrations(&pool).await?;
            info!("Database migrations applied");
            Ok(())
        }
        Command::Load(args) => handle_load(&config, args).await,
        Command::Etl(output) => handle_etl(&config, output).await,
        Command::Stats(output) => handle_stats(&config, output).await,
    }
}

async fn handle_load(config: &EtlConfig, args: LoadArgs) -> Result<()> {
    let contents = std::fs::read(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let source = source_name(&args.file);

    if args.dry_run {
        return match ingestion::read_batch(&source, &contents) {
            Ok(batch) => {
                print_preview(&batch, args.output.json)?;
                Ok(())
            }
            Err(err) => {
                print_rejection(&err);
                Err(err).context("file rejected")
            }
        };
    }

    let pool = db::connect(&config.database).await?;
    if args.skip_migrations {
        warn!("Skipping migrations before loading");
    } else {
        db::run_migrations(&pool).await?;
    }

    let warehouse = PostgresWarehouse::new(pool);
    let result = Pipeline::new(&warehouse, config)
        .run_file(&source, &contents)
        .await;
    finish_run(result, args.output.json)
}

async fn handle_etl(config: &EtlConfig, output: OutputArgs) -> Result<()> {
    let pool = db::connect(&config.database).await?;
    let warehouse = PostgresWarehouse::new(pool);
    let result = Pipeline::new(&warehouse, config).rerun_from_staging().await;
    finish_run(result, output.json)
}

async fn handle_stats(config: &EtlConfig, output: OutputArgs) -> Result<()> {
    let pool = db::connect(&config.database).await?;
    let warehouse = PostgresWarehouse::new(pool);
    let counts = warehouse
        .counts()
        .await
        .context("failed to read warehouse row counts")?;

    if output.json {
        print_json(&counts)
    } else {
        println!("{}", counts_table(&counts));
        Ok(())
    }
}

fn finish_run(result: Result<RunReport, RunError>, json: bool) -> Result<()> {
    match result {
        Ok(report) => {
            if json {
                print_json(&report)
            } else {
                println!("{}", report_table(&report));
                Ok(())
            }
        }
        Err(err) => {
            print_rejection(&err.source);
            if json {
                print_json(&err.report)?;
            } else {
                println!("{}", report_table(&err.report));
            }
            Err(err.into())
        }
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_rejection(err: &EtlError) {
    match err {
        EtlError::Validation(report) => {
            eprintln!(
                "{} of {} rows are missing required values. Fix the file and load it again.",
                report.issues.len(),
                report.total_rows
            );
            let mut table = Table::new();
            table.set_header(vec!["Row", "Missing fields"]);
            for issue in &report.issues {
                let fields: Vec<&str> = issue.missing.iter().map(|field| field.header()).collect();
                table.add_row(vec![issue.row.to_string(), fields.join(", ")]);
            }
            eprintln!("{table}");
        }
        EtlError::ReferentialIntegrity { unresolved } => {
            eprintln!("{} staged rows could not be joined to their dimensions:", unresolved.len());
            let mut table = Table::new();
            table.set_header(vec!["Row", "Dimension", "Natural key", "Hash"]);
            for fact in unresolved {
                table.add_row(vec![
                    fact.row.to_string(),
                    fact.dimension.to_string(),
                    fact.natural_key.clone(),
                    fact.content_hash.clone(),
                ]);
            }
            eprintln!("{table}");
        }
        other => eprintln!("{other}"),
    }
}

fn print_preview(batch: &Batch, json: bool) -> Result<()> {
    if json {
        return print_json(&batch.records.iter().take(PREVIEW_ROWS).collect::<Vec<_>>());
    }

    println!("{} rows validated in {}", batch.len(), batch.source);
    let mut table = Table::new();
    table.set_header(vec![
        "Row",
        "Description",
        "Type",
        "Group",
        "Category",
        "Classification",
        "Date",
        "Value",
        "Hash",
    ]);
    for record in batch.records.iter().take(PREVIEW_ROWS) {
        let fields = &record.fields;
        table.add_row(vec![
            record.row.to_string(),
            fields.description.clone(),
            fields.transaction_type.clone(),
            fields.group.clone(),
            fields.category.clone(),
            fields.classification.clone(),
            fields.period.clone(),
            fields.amount.to_string(),
            record.content_hash().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn report_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Run", "Value"]);
    table.add_row(vec!["batch id".to_string(), report.batch_id.to_string()]);
    table.add_row(vec!["source".to_string(), report.source.clone()]);
    table.add_row(vec!["state".to_string(), report.state.to_string()]);
    table.add_row(vec!["rows received".to_string(), report.rows_received.to_string()]);
    if let Some(staged) = report.rows_staged {
        table.add_row(vec!["rows staged".to_string(), staged.to_string()]);
    }
    if let Some(dimensions) = report.dimensions {
        for (label, inserted) in [
            ("new types", dimensions.types),
            ("new groups", dimensions.groups),
            ("new categories", dimensions.categories),
            ("new classifications", dimensions.classifications),
            ("new periods", dimensions.periods),
        ] {
            table.add_row(vec![label.to_string(), inserted.to_string()]);
        }
    }
    if let Some(facts) = report.facts {
        table.add_row(vec!["facts inserted".to_string(), facts.inserted.to_string()]);
        table.add_row(vec!["facts already loaded".to_string(), facts.skipped.to_string()]);
    }
    table
}

fn counts_table(counts: &WarehouseCounts) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Table", "Rows"]);
    for (name, rows) in [
        ("staging_lancamentos", counts.staging),
        ("dim_tipo", counts.types),
        ("dim_grupo", counts.groups),
        ("dim_categoria", counts.categories),
        ("dim_classificacao", counts.classifications),
        ("dim_tempo", counts.periods),
        ("fato_lancamento", counts.facts),
    ] {
        table.add_row(vec![name.to_string(), rows.to_string()]);
    }
    table
}
