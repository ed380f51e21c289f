use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod db;
mod expiry;
mod models;
mod notify;
mod report;

#[derive(Parser)]
#[command(name = "credential-expiry-watch")]
#[command(about = "Instructor credential expiry tracker for a DTO training organization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import instructor documents from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Scan credentials and print expiry alerts
    Scan {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate a markdown credential-status report
    Report {
        #[arg(long)]
        email: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Email expiry notices to instructors, at most once per day each
    Dispatch {
        /// Recipient of the full digest; omit to skip the digest
        #[arg(long)]
        admin_email: Option<String>,
        /// Directory where rendered messages are written for the relay
        #[arg(long, default_value = "outbox")]
        outbox: PathBuf,
    },
    /// Show recent notification log entries
    History {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Imported {inserted} documents from {}.", csv.display());
        }
        Commands::Scan { email, limit } => {
            let today = Local::now().date_naive();
            let instructors = db::fetch_instructors(&pool, email.as_deref()).await?;
            let alerts = expiry::scan(&instructors, today);
            let summary = expiry::summarize(&alerts);

            if alerts.is_empty() {
                println!("No credentials inside the 90-day horizon.");
                return Ok(());
            }

            println!(
                "{} alert(s): {} expired, {} critical, {} warning, {} info",
                summary.total, summary.expired, summary.critical, summary.warning, summary.info
            );
            for alert in alerts.iter().take(limit) {
                println!(
                    "- [{}] {} ({}) {} valid until {} ({} days)",
                    alert.level.label(),
                    alert.instructor_name,
                    alert.instructor_email,
                    alert.document_name,
                    alert.expiry_date,
                    alert.days_remaining
                );
            }
        }
        Commands::Report { email, out } => {
            let today = Local::now().date_naive();
            let instructors = db::fetch_instructors(&pool, email.as_deref()).await?;
            let alerts = expiry::scan(&instructors, today);
            let output = report::build_report(email.as_deref(), today, &alerts);
            std::fs::write(&out, output)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Dispatch {
            admin_email,
            outbox,
        } => {
            let today = Local::now().date_naive();
            let instructors = db::fetch_instructors(&pool, None).await?;
            let ledger = db::PgLedger::new(pool.clone());
            let transport = notify::OutboxTransport::new(outbox);

            let dispatch_report = notify::dispatch(
                &instructors,
                &ledger,
                &transport,
                admin_email.as_deref(),
                today,
            )
            .await;

            println!("{}", serde_json::to_string_pretty(&dispatch_report)?);
        }
        Commands::History { limit } => {
            let entries = db::fetch_history(&pool, limit).await?;
            if entries.is_empty() {
                println!("No notifications logged yet.");
                return Ok(());
            }
            for entry in entries {
                let status = if entry.email_sent { "sent" } else { "failed" };
                println!(
                    "{} [{}] {} <{}> {} ({} days) {}{}",
                    entry.sent_at.format("%Y-%m-%d %H:%M"),
                    entry.alert_level.label(),
                    entry.recipient_name,
                    entry.recipient_email,
                    entry.document_name,
                    entry.days_remaining,
                    status,
                    entry
                        .error_message
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}
