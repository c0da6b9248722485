//! Daily recurring-invoice materialization.
//!
//! Every invoice flagged as recurring acts as a template. On the day
//! of month it names, the generator creates one new draft invoice for
//! the current billing month, once. Idempotency comes from a
//! month-window existence check rather than run bookkeeping, so
//! re-running the job on the same day is always safe.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::{Invoice, InvoiceStatus};
use crate::money::compute_totals;
use crate::numbering::next_number;
use crate::store::InvoiceStore;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Generated,
    Skipped,
}

pub struct RecurringGenerator {
    store: Arc<dyn InvoiceStore>,
    number_prefix: String,
}

impl RecurringGenerator {
    pub fn new(store: Arc<dyn InvoiceStore>, number_prefix: impl Into<String>) -> Self {
        Self {
            store,
            number_prefix: number_prefix.into(),
        }
    }

    /// Process every recurring template for `today`. A failure on one
    /// template is logged and does not abort the rest of the run.
    pub async fn run(&self, today: NaiveDate) -> Result<RunReport> {
        let templates = self.store.recurring_templates().await?;
        let mut report = RunReport::default();

        for template in &templates {
            match self.process(template, today).await {
                Ok(Outcome::Generated) => report.generated += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(
                        template = %template.number,
                        customer = template.customer_id,
                        error = %e,
                        "recurring generation failed, continuing"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            generated = report.generated,
            skipped = report.skipped,
            failed = report.failed,
            "recurring run finished"
        );
        Ok(report)
    }

    async fn process(&self, template: &Invoice, today: NaiveDate) -> Result<Outcome> {
        let Some(day) = template.recurring_day else {
            warn!(template = %template.number, "recurring template without a day, skipping");
            return Ok(Outcome::Skipped);
        };

        if today.day() != day {
            return Ok(Outcome::Skipped);
        }

        let (month_start, next_month_start) = month_window(today);
        if self
            .store
            .exists_in_window(template.customer_id, day, month_start, next_month_start)
            .await?
        {
            return Ok(Outcome::Skipped);
        }

        // A template pointing at a deleted customer fails here and is
        // surfaced through the run report instead of producing an
        // orphaned invoice.
        self.store.get_customer(template.customer_id).await?;

        let issue_date = NaiveDate::from_ymd_opt(today.year(), today.month(), day)
            .ok_or_else(|| Error::precondition(format!("invalid issue date for day {day}")))?;

        // The gap between the template's issue and due dates is the
        // customer's payment terms; carry it to the new cycle.
        let terms = template.payment_terms_days();
        let due_date = issue_date
            .checked_add_days(Days::new(terms.max(0) as u64))
            .ok_or_else(|| Error::precondition("due date out of range"))?;

        // Items are copied verbatim but totals are recomputed so any
        // drift in the stored template cannot propagate.
        let totals = compute_totals(&template.items, template.tax_rate);

        let existing = self.store.numbers_with_prefix(&self.number_prefix).await?;
        let number = next_number(
            &self.number_prefix,
            issue_date.year(),
            existing.iter().map(String::as_str),
        );

        let invoice = Invoice {
            id: 0,
            customer_id: template.customer_id,
            created_by: template.created_by,
            number,
            items: template.items.clone(),
            currency: template.currency.clone(),
            tax_rate: template.tax_rate,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            issue_date,
            due_date,
            status: InvoiceStatus::Draft,
            is_recurring: true,
            recurring_day: Some(day),
            reminders_sent: 0,
            last_reminder_at: None,
            paid_date: None,
            notes: template.notes.clone(),
        };

        let stored = self.store.insert_invoice(&invoice).await?;
        info!(
            invoice = %stored.number,
            template = %template.number,
            customer = template.customer_id,
            "recurring invoice generated"
        );
        Ok(Outcome::Generated)
    }
}

/// `[first day of this month, first day of next month)`.
fn month_window(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date.with_day(1).expect("day 1 exists in every month");
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
    .expect("first of month is always valid");
    (start, next)
}
