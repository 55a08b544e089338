use anyhow::Context;
use clap::{Parser, Subcommand};
use meterbill::report::{Letterhead, PdfRenderer, StatementConfig};
use meterbill::stat::{LedgerLocation, LedgerStore, STATEMENT_HISTORY};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Offline access to the meter reading ledger.
#[derive(Parser)]
#[command(name = "meterbill", version)]
struct Cli {
    /// Ledger TSV file.
    #[arg(long, env = "LOCAL_TSV")]
    ledger: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the newest rows and the ledger totals.
    Show {
        #[arg(long, default_value_t = STATEMENT_HISTORY)]
        last: usize,
    },
    /// Verify every stored row against its predecessor.
    Check,
    /// Write the statement for the newest row.
    Render {
        #[arg(long)]
        out: PathBuf,
        #[arg(long, env = "PDF_NAME", default_value = "")]
        name: String,
        #[arg(long, env = "PDF_STREET", default_value = "")]
        street: String,
        #[arg(long, env = "PDF_CITY", default_value = "")]
        city: String,
        #[arg(long, env = "PDF_TITLE", default_value = "Autostrom")]
        title: String,
        #[arg(long, env = "PDF_CURRENCY", default_value = "EUR")]
        currency: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("ENV").ok().as_deref() != Some("prod") {
        dotenvy::dotenv().ok();
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = LedgerStore::new(Some(LedgerLocation::Local(cli.ledger.clone())))?;
    let ledger = store
        .load()
        .await
        .with_context(|| format!("reading {}", cli.ledger.display()))?;

    match cli.command {
        Command::Show { last } => {
            println!("== {} ({} rows) ==\n", cli.ledger.display(), ledger.len());
            println!(
                "{:<10} | {:>12} | {:>10} | {:>9} | {:>10}",
                "date", "reading", "price", "used", "amount"
            );
            for row in ledger.recent(last) {
                println!(
                    "{:<10} | {:>12} | {:>10.6} | {:>9} | {:>10.2}",
                    row.date_label(),
                    row.meter_reading.normalize(),
                    row.unit_price,
                    row.consumption.normalize(),
                    row.amount_due,
                );
            }
            let totals = ledger.totals()?;
            println!(
                "\n== total consumption = {}, total billed = {:.2} ==",
                totals.consumption.normalize(),
                totals.amount_due
            );
        }
        Command::Check => {
            ledger.check_integrity()?;
            println!("{} rows OK", ledger.len());
        }
        Command::Render {
            out,
            name,
            street,
            city,
            title,
            currency,
        } => {
            let renderer = PdfRenderer::new(StatementConfig {
                letterhead: Letterhead { name, street, city },
                title,
                currency,
                ..StatementConfig::default()
            });
            let pdf = renderer.render(&ledger.rows, true)?;
            tokio::fs::write(&out, pdf)
                .await
                .with_context(|| format!("writing {}", out.display()))?;
            println!("statement written to {}", out.display());
        }
    }
    Ok(())
}
