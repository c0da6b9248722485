mod config;
mod error;
mod lifecycle;
mod mailer;
mod models;
mod money;
mod numbering;
mod recurring;
mod reminders;
mod render;
mod scheduler;
mod store;
#[cfg(test)]
mod testutil;

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::lifecycle::{InvoiceService, SendOptions};
use crate::mailer::{Mailer, SmtpMailer};
use crate::recurring::RecurringGenerator;
use crate::reminders::ReminderScheduler;
use crate::render::InvoiceRenderer;
use crate::scheduler::DailyJobs;
use crate::store::{InvoiceStore, MemoryStore, PgStore};

#[derive(Parser)]
#[command(name = "billing-engine", about = "Invoice lifecycle and recurring-billing engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daily scheduler until interrupted.
    Run,
    /// Run the overdue-reminder job once and exit.
    Remind {
        /// Pretend today is this date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run the recurring-invoice generator once and exit.
    Generate {
        /// Pretend today is this date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Email an invoice to its customer.
    Send {
        id: i32,
        /// Override the recipient (defaults to the customer's billing email).
        #[arg(long)]
        to: Vec<String>,
    },
    /// Mark an invoice as paid.
    MarkPaid {
        id: i32,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        note: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = config::init()?;

    let store: Arc<dyn InvoiceStore> = match &config.database_url {
        Some(url) => Arc::new(PgStore::connect(url).await?),
        None => {
            warn!("DATABASE_URL not set, running on the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // The mailer is built per subcommand: jobs like `generate` never
    // send mail and must not depend on SMTP configuration.
    match cli.command {
        Command::Run => {
            let jobs = daily_jobs(&config, store, smtp_mailer(&config)?);
            info!("daily scheduler started");
            scheduler::run_daily(&jobs).await?;
        }
        Command::Remind { date } => {
            let reminders = ReminderScheduler::new(
                store,
                smtp_mailer(&config)?,
                config.reminder_thresholds.clone(),
            );
            let now = match date {
                Some(date) => Utc
                    .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid")),
                None => Utc::now(),
            };
            let report = reminders.run(now).await?;
            println!(
                "flagged {} overdue, sent {} reminders ({} skipped, {} failed)",
                report.flagged, report.reminded, report.skipped, report.failed
            );
        }
        Command::Generate { date } => {
            let generator = RecurringGenerator::new(store, config.invoice_prefix.clone());
            let today = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = generator.run(today).await?;
            println!(
                "generated {} invoices ({} skipped, {} failed)",
                report.generated, report.skipped, report.failed
            );
        }
        Command::Send { id, to } => {
            let service = invoice_service(&config, store, smtp_mailer(&config)?)?;
            let invoice = service
                .send(
                    id,
                    SendOptions {
                        recipients: to,
                        ..Default::default()
                    },
                )
                .await?;
            println!("invoice {} sent ({})", invoice.number, invoice.status);
        }
        Command::MarkPaid { id, date, note } => {
            let service = invoice_service(&config, store, smtp_mailer(&config)?)?;
            let invoice = service.mark_paid(id, date, note).await?;
            println!(
                "invoice {} marked paid on {}",
                invoice.number,
                invoice.paid_date.expect("paid invoice has a paid date")
            );
        }
    }

    Ok(())
}

fn smtp_mailer(config: &config::Config) -> Result<Arc<dyn Mailer>> {
    Ok(Arc::new(SmtpMailer::from_config(config)?))
}

fn daily_jobs(
    config: &config::Config,
    store: Arc<dyn InvoiceStore>,
    mailer: Arc<dyn Mailer>,
) -> DailyJobs {
    DailyJobs {
        reminders: ReminderScheduler::new(
            store.clone(),
            mailer,
            config.reminder_thresholds.clone(),
        ),
        recurring: RecurringGenerator::new(store, config.invoice_prefix.clone()),
    }
}

fn invoice_service(
    config: &config::Config,
    store: Arc<dyn InvoiceStore>,
    mailer: Arc<dyn Mailer>,
) -> Result<InvoiceService> {
    let renderer = InvoiceRenderer::new(&config.output_dir)?;
    Ok(InvoiceService::new(
        store,
        mailer,
        renderer,
        config.invoice_prefix.clone(),
        config.default_currency.clone(),
        config.due_days,
    ))
}
