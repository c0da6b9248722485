//! Overdue detection and staggered reminder escalation.
//!
//! A daily pass over every SENT/OVERDUE invoice past its due date:
//! flags it OVERDUE, then walks an ascending days-overdue schedule
//! (`reminders_sent` indexes the next threshold) sending at most one
//! reminder per crossed threshold, rate-limited to one per 24 hours.
//! A failed send never advances the counter, so the same threshold is
//! retried on the next run.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::mailer::{Mailer, OutgoingEmail};
use crate::models::{Customer, Invoice, InvoiceStatus};
use crate::store::InvoiceStore;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Invoices newly flagged OVERDUE this run.
    pub flagged: usize,
    pub reminded: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Reminded,
    Skipped,
}

pub struct ReminderScheduler {
    store: Arc<dyn InvoiceStore>,
    mailer: Arc<dyn Mailer>,
    /// Ascending days-overdue schedule, e.g. `[3, 15, 30]`.
    thresholds: Vec<i64>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        mailer: Arc<dyn Mailer>,
        thresholds: Vec<i64>,
    ) -> Self {
        debug_assert!(thresholds.windows(2).all(|w| w[0] < w[1]));
        Self {
            store,
            mailer,
            thresholds,
        }
    }

    /// Process every overdue invoice as of `now`. A failure on one
    /// invoice is logged and does not abort the rest of the run.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let overdue = self.store.due_before(now.date_naive()).await?;
        let mut report = RunReport::default();

        for invoice in overdue {
            let mut invoice = invoice;

            // The OVERDUE flag is an automatic transition and is
            // persisted regardless of whether a reminder goes out.
            if invoice.status != InvoiceStatus::Overdue {
                invoice.status = InvoiceStatus::Overdue;
                if let Err(e) = self.store.update_invoice(&invoice).await {
                    error!(invoice = %invoice.number, error = %e, "failed to flag overdue");
                    report.failed += 1;
                    continue;
                }
                report.flagged += 1;
            }

            match self.remind(&mut invoice, now).await {
                Ok(Outcome::Reminded) => report.reminded += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        invoice = %invoice.number,
                        customer = invoice.customer_id,
                        error = %e,
                        "reminder failed, will retry next run"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            flagged = report.flagged,
            reminded = report.reminded,
            skipped = report.skipped,
            failed = report.failed,
            "reminder run finished"
        );
        Ok(report)
    }

    async fn remind(&self, invoice: &mut Invoice, now: DateTime<Utc>) -> Result<Outcome> {
        let days_overdue = (now.date_naive() - invoice.due_date).num_days();

        // Escalation stops once the schedule is exhausted.
        let Some(&threshold) = self.thresholds.get(invoice.reminders_sent as usize) else {
            return Ok(Outcome::Skipped);
        };

        if days_overdue < threshold {
            return Ok(Outcome::Skipped);
        }

        // At most one reminder per day even if the job reruns.
        if let Some(last) = invoice.last_reminder_at {
            if now - last < Duration::hours(24) {
                return Ok(Outcome::Skipped);
            }
        }

        let customer = self.store.get_customer(invoice.customer_id).await?;
        let Some(recipient) = customer.email.clone() else {
            // Not a send, so the counter must not advance.
            warn!(
                invoice = %invoice.number,
                customer = customer.id,
                "customer has no email on file, skipping reminder"
            );
            return Ok(Outcome::Skipped);
        };

        let email = reminder_email(invoice, &customer, &recipient, days_overdue);
        if !self.mailer.send(&email).await? {
            return Err(Error::Email(format!(
                "reminder for invoice {} reported failure",
                invoice.number
            )));
        }

        self.store
            .insert_notification(
                invoice.created_by,
                invoice.id,
                &format!(
                    "Invoice {} is {} days overdue (reminder {} of {})",
                    invoice.number,
                    days_overdue,
                    invoice.reminders_sent + 1,
                    self.thresholds.len()
                ),
            )
            .await?;

        invoice.reminders_sent += 1;
        invoice.last_reminder_at = Some(now);
        self.store.update_invoice(invoice).await?;

        info!(
            invoice = %invoice.number,
            reminders_sent = invoice.reminders_sent,
            days_overdue,
            "reminder sent"
        );
        Ok(Outcome::Reminded)
    }
}

fn reminder_email(
    invoice: &Invoice,
    customer: &Customer,
    recipient: &str,
    days_overdue: i64,
) -> OutgoingEmail {
    OutgoingEmail {
        to: vec![recipient.to_string()],
        cc: Vec::new(),
        subject: format!(
            "Payment reminder: invoice {} is {} days overdue",
            invoice.number, days_overdue
        ),
        text_body: format!(
            "Dear {},\n\nInvoice {} issued on {} was due on {} and is now {} days \
             overdue.\nOutstanding amount: {} {}.\n\nPlease arrange payment at your \
             earliest convenience.",
            customer.name,
            invoice.number,
            invoice.issue_date.format("%Y-%m-%d"),
            invoice.due_date.format("%Y-%m-%d"),
            days_overdue,
            invoice.total,
            invoice.currency,
        ),
        html_body: None,
        attachment: None,
    }
}
