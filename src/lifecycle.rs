//! Interactive invoice operations and the status state machine.
//!
//! Legal transitions:
//!
//! ```text
//! DRAFT -> SENT -> OVERDUE -> PAID
//!   SENT/OVERDUE -> PAID        (mark-paid)
//!   any non-PAID -> CANCELLED   (cancel)
//!   PAID -> PAID                (idempotent no-op)
//! ```
//!
//! DRAFT -> SENT happens only after the mailer confirms delivery; a
//! failed send never changes status. PAID invoices are immutable: no
//! item or tax edits, no deletion, no cancellation.

use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{Error, Result};
use crate::mailer::{EmailAttachment, Mailer, OutgoingEmail};
use crate::models::{Invoice, InvoiceStatus, LineItem};
use crate::money::compute_totals;
use crate::numbering::next_number;
use crate::render::InvoiceRenderer;
use crate::store::InvoiceStore;

const MAX_RECURRING_DAY: u32 = 28;

/// Request to create an invoice. Omitted fields take engine defaults.
#[derive(Debug, Clone, Default)]
pub struct NewInvoice {
    pub customer_id: i32,
    pub created_by: i32,
    pub number: Option<String>,
    pub items: Vec<LineItem>,
    pub currency: Option<String>,
    pub tax_rate: Option<Decimal>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub is_recurring: bool,
    pub recurring_day: Option<u32>,
}

/// Partial update. `None` leaves a field untouched. Status is never
/// mutated here; it only moves through the explicit operations.
#[derive(Debug, Clone, Default)]
pub struct InvoiceUpdate {
    pub items: Option<Vec<LineItem>>,
    pub tax_rate: Option<Decimal>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub currency: Option<String>,
    pub recurring_day: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Defaults to the customer's billing email when empty.
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

pub struct InvoiceService {
    store: Arc<dyn InvoiceStore>,
    mailer: Arc<dyn Mailer>,
    renderer: InvoiceRenderer,
    number_prefix: String,
    default_currency: String,
    due_days: i64,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn InvoiceStore>,
        mailer: Arc<dyn Mailer>,
        renderer: InvoiceRenderer,
        number_prefix: impl Into<String>,
        default_currency: impl Into<String>,
        due_days: i64,
    ) -> Self {
        Self {
            store,
            mailer,
            renderer,
            number_prefix: number_prefix.into(),
            default_currency: default_currency.into(),
            due_days,
        }
    }

    pub async fn create(&self, new: NewInvoice) -> Result<Invoice> {
        validate_items(&new.items)?;
        let tax_rate = new.tax_rate.unwrap_or(Decimal::ZERO);
        validate_tax_rate(tax_rate)?;

        let issue_date = new.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        let due_date = match new.due_date {
            Some(date) => date,
            None => issue_date
                .checked_add_days(Days::new(self.due_days as u64))
                .ok_or_else(|| Error::precondition("due date out of range"))?,
        };

        // A recurring invoice regenerates on a fixed day of month;
        // derive it from the issue date when not supplied, capped at 28
        // so every month qualifies.
        let recurring_day = match (new.is_recurring, new.recurring_day) {
            (false, _) => None,
            (true, Some(day)) => Some(day.clamp(1, MAX_RECURRING_DAY)),
            (true, None) => Some(issue_date.day().min(MAX_RECURRING_DAY)),
        };

        let number = match new.number {
            Some(number) => number,
            None => {
                let existing = self.store.numbers_with_prefix(&self.number_prefix).await?;
                next_number(
                    &self.number_prefix,
                    issue_date.year(),
                    existing.iter().map(String::as_str),
                )
            }
        };

        let totals = compute_totals(&new.items, tax_rate);
        let invoice = Invoice {
            id: 0,
            customer_id: new.customer_id,
            created_by: new.created_by,
            number,
            items: new.items,
            currency: new.currency.unwrap_or_else(|| self.default_currency.clone()),
            tax_rate,
            subtotal: totals.subtotal,
            tax_amount: totals.tax_amount,
            total: totals.total,
            issue_date,
            due_date,
            status: InvoiceStatus::Draft,
            is_recurring: new.is_recurring,
            recurring_day,
            reminders_sent: 0,
            last_reminder_at: None,
            paid_date: None,
            notes: new.notes,
        };

        let stored = self.store.insert_invoice(&invoice).await?;
        info!(invoice = %stored.number, customer = stored.customer_id, "invoice created");
        Ok(stored)
    }

    pub async fn update(&self, id: i32, update: InvoiceUpdate) -> Result<Invoice> {
        let mut invoice = self.store.get_invoice(id).await?;

        if invoice.status == InvoiceStatus::Paid
            && (update.items.is_some() || update.tax_rate.is_some())
        {
            return Err(Error::InvalidTransition {
                status: invoice.status,
                action: "edit items of a paid invoice",
            });
        }

        let mut recalculate = false;
        if let Some(items) = update.items {
            validate_items(&items)?;
            invoice.items = items;
            recalculate = true;
        }
        if let Some(tax_rate) = update.tax_rate {
            validate_tax_rate(tax_rate)?;
            invoice.tax_rate = tax_rate;
            recalculate = true;
        }
        if let Some(issue_date) = update.issue_date {
            invoice.issue_date = issue_date;
        }
        if let Some(due_date) = update.due_date {
            invoice.due_date = due_date;
        }
        if let Some(notes) = update.notes {
            invoice.notes = Some(notes);
        }
        if let Some(currency) = update.currency {
            invoice.currency = currency;
        }
        if let Some(day) = update.recurring_day {
            invoice.recurring_day = Some(day.clamp(1, MAX_RECURRING_DAY));
        }

        if recalculate {
            let totals = compute_totals(&invoice.items, invoice.tax_rate);
            invoice.subtotal = totals.subtotal;
            invoice.tax_amount = totals.tax_amount;
            invoice.total = totals.total;
        }

        self.store.update_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Delete an invoice. Paid invoices are permanent records and
    /// cannot be removed.
    pub async fn delete(&self, id: i32) -> Result<()> {
        let invoice = self.store.get_invoice(id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Err(Error::InvalidTransition {
                status: invoice.status,
                action: "delete a paid invoice",
            });
        }
        self.store.delete_invoice(id).await
    }

    /// Mark an invoice paid. Idempotent: marking a paid invoice paid
    /// again returns it unchanged without re-firing side effects.
    pub async fn mark_paid(
        &self,
        id: i32,
        paid_date: Option<NaiveDate>,
        note: Option<String>,
    ) -> Result<Invoice> {
        let mut invoice = self.store.get_invoice(id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Ok(invoice);
        }

        invoice.status = InvoiceStatus::Paid;
        invoice.paid_date = Some(paid_date.unwrap_or_else(|| Utc::now().date_naive()));
        invoice.reminders_sent = 0;
        invoice.last_reminder_at = None;

        if let Some(note) = note {
            let stamped = format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M"), note);
            invoice.notes = Some(match invoice.notes.take() {
                Some(existing) => format!("{existing}\n{stamped}"),
                None => stamped,
            });
        }

        self.store.update_invoice(&invoice).await?;
        info!(invoice = %invoice.number, "invoice marked paid");
        Ok(invoice)
    }

    pub async fn cancel(&self, id: i32) -> Result<Invoice> {
        let mut invoice = self.store.get_invoice(id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Err(Error::InvalidTransition {
                status: invoice.status,
                action: "cancel a paid invoice",
            });
        }

        invoice.status = InvoiceStatus::Cancelled;
        invoice.paid_date = None;
        self.store.update_invoice(&invoice).await?;
        Ok(invoice)
    }

    /// Email the invoice to the customer. The DRAFT -> SENT transition
    /// is atomic with delivery: status changes only after the mailer
    /// confirms success, so a failed send leaves the invoice untouched.
    /// Re-sending from SENT or OVERDUE delivers again without a status
    /// change.
    pub async fn send(&self, id: i32, opts: SendOptions) -> Result<Invoice> {
        let mut invoice = self.store.get_invoice(id).await?;

        if matches!(
            invoice.status,
            InvoiceStatus::Paid | InvoiceStatus::Cancelled
        ) {
            return Err(Error::InvalidTransition {
                status: invoice.status,
                action: "send",
            });
        }

        let customer = self.store.get_customer(invoice.customer_id).await?;

        let recipients = if opts.recipients.is_empty() {
            match &customer.email {
                Some(email) => vec![email.clone()],
                None => {
                    return Err(Error::precondition(format!(
                        "no recipient email resolvable for invoice {}",
                        invoice.number
                    )));
                }
            }
        } else {
            opts.recipients
        };

        let subject = opts
            .subject
            .unwrap_or_else(|| format!("Invoice {} from your account", invoice.number));
        let text_body = opts.message.unwrap_or_else(|| default_message(&invoice));
        let html_body = self.renderer.render_html(&invoice, &customer);
        let attachment = self.renderer.render_pdf(&invoice, &customer)?;

        let email = OutgoingEmail {
            to: recipients,
            cc: opts.cc,
            subject,
            text_body,
            html_body: Some(html_body),
            attachment: Some(EmailAttachment {
                filename: format!("invoice_{}.pdf", invoice.number.replace('/', "-")),
                content: attachment,
            }),
        };

        let delivered = self.mailer.send(&email).await?;
        if !delivered {
            return Err(Error::Email(format!(
                "delivery of invoice {} reported failure",
                invoice.number
            )));
        }

        if invoice.status == InvoiceStatus::Draft {
            invoice.status = InvoiceStatus::Sent;
            self.store.update_invoice(&invoice).await?;
        }
        info!(invoice = %invoice.number, "invoice sent");
        Ok(invoice)
    }
}

fn default_message(invoice: &Invoice) -> String {
    format!(
        "Dear customer,\n\nPlease find attached invoice {}.\n\n\
         Issue date: {}\n\
         Due date: {}\n\
         Total amount: {} {}\n\n\
         Thank you for your business.",
        invoice.number,
        invoice.issue_date.format("%Y-%m-%d"),
        invoice.due_date.format("%Y-%m-%d"),
        invoice.total,
        invoice.currency,
    )
}

fn validate_items(items: &[LineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(Error::precondition("an invoice requires at least one item"));
    }
    for item in items {
        if item.quantity < Decimal::ZERO {
            return Err(Error::precondition(format!(
                "negative quantity on item {:?}",
                item.description
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(Error::precondition(format!(
                "negative unit price on item {:?}",
                item.description
            )));
        }
    }
    Ok(())
}

fn validate_tax_rate(tax_rate: Decimal) -> Result<()> {
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE_HUNDRED {
        return Err(Error::precondition(format!(
            "tax rate {tax_rate} outside 0-100"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::testing::RecordingMailer;
    use crate::store::MemoryStore;
    use crate::testutil::{customer, customer_without_email, item, paid_invoice, sent_invoice};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn service_with(
        store: Arc<MemoryStore>,
        mailer: Arc<RecordingMailer>,
    ) -> InvoiceService {
        let dir = std::env::temp_dir().join("billing_engine_lifecycle_test");
        InvoiceService::new(
            store,
            mailer,
            InvoiceRenderer::new(dir).unwrap(),
            "INV",
            "USD",
            30,
        )
    }

    fn new_invoice(customer_id: i32) -> NewInvoice {
        NewInvoice {
            customer_id,
            created_by: 7,
            items: vec![item("2", "500"), item("1", "1000")],
            tax_rate: Some(dec("10")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_computes_totals_and_defaults() {
        let store = Arc::new(MemoryStore::new());
        store.put_customer(customer(1));
        let service = service_with(store.clone(), Arc::new(RecordingMailer::new()));

        let invoice = service.create(new_invoice(1)).await.unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert_eq!(invoice.subtotal, dec("2000.00"));
        assert_eq!(invoice.tax_amount, dec("200.00"));
        assert_eq!(invoice.total, dec("2200.00"));
        assert_eq!(invoice.payment_terms_days(), 30);
        assert!(invoice.number.starts_with("INV/"));
        assert!(invoice.number.ends_with("/00001"));
    }

    #[tokio::test]
    async fn create_rejects_empty_items_and_bad_values() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let mut no_items = new_invoice(1);
        no_items.items.clear();
        assert!(matches!(
            service.create(no_items).await,
            Err(Error::Precondition(_))
        ));

        let mut negative = new_invoice(1);
        negative.items = vec![item("-1", "100")];
        assert!(matches!(
            service.create(negative).await,
            Err(Error::Precondition(_))
        ));

        let mut bad_tax = new_invoice(1);
        bad_tax.tax_rate = Some(dec("101"));
        assert!(matches!(
            service.create(bad_tax).await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn create_clamps_recurring_day() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let mut recurring = new_invoice(1);
        recurring.is_recurring = true;
        recurring.recurring_day = Some(31);
        let invoice = service.create(recurring).await.unwrap();
        assert_eq!(invoice.recurring_day, Some(28));

        let mut derived = new_invoice(1);
        derived.is_recurring = true;
        derived.issue_date = NaiveDate::from_ymd_opt(2026, 1, 31);
        let invoice = service.create(derived).await.unwrap();
        assert_eq!(invoice.recurring_day, Some(28));
    }

    #[tokio::test]
    async fn explicit_duplicate_number_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let mut first = new_invoice(1);
        first.number = Some("INV/2026/00042".to_string());
        service.create(first.clone()).await.unwrap();

        assert!(matches!(
            service.create(first).await,
            Err(Error::DuplicateNumber(n)) if n == "INV/2026/00042"
        ));
    }

    #[tokio::test]
    async fn sequential_numbers_within_a_year() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let mut numbers = Vec::new();
        for _ in 0..3 {
            numbers.push(service.create(new_invoice(1)).await.unwrap().number);
        }
        let year = Utc::now().year();
        assert_eq!(
            numbers,
            vec![
                format!("INV/{year}/00001"),
                format!("INV/{year}/00002"),
                format!("INV/{year}/00003"),
            ]
        );
    }

    #[tokio::test]
    async fn update_recalculates_totals() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let invoice = service.create(new_invoice(1)).await.unwrap();
        let updated = service
            .update(
                invoice.id,
                InvoiceUpdate {
                    items: Some(vec![item("1", "100")]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.subtotal, dec("100.00"));
        assert_eq!(updated.tax_amount, dec("10.00"));
        assert_eq!(updated.total, dec("110.00"));
    }

    #[tokio::test]
    async fn paid_invoice_rejects_item_edits_delete_and_cancel() {
        let store = Arc::new(MemoryStore::new());
        let paid = store
            .insert_invoice(&paid_invoice(1, "INV/2026/00001"))
            .await
            .unwrap();
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let edit = service
            .update(
                paid.id,
                InvoiceUpdate {
                    items: Some(vec![item("1", "1")]),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(edit, Err(Error::InvalidTransition { .. })));

        assert!(matches!(
            service.delete(paid.id).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            service.cancel(paid.id).await,
            Err(Error::InvalidTransition { .. })
        ));

        // Non-financial edits on a paid invoice stay allowed.
        let notes = service
            .update(
                paid.id,
                InvoiceUpdate {
                    notes: Some("archived".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(notes.status, InvoiceStatus::Paid);
    }

    #[tokio::test]
    async fn mark_paid_resets_reminder_bookkeeping() {
        let store = Arc::new(MemoryStore::new());
        let mut overdue = sent_invoice(1, "INV/2026/00001");
        overdue.status = InvoiceStatus::Overdue;
        overdue.reminders_sent = 2;
        overdue.last_reminder_at = Some(Utc::now());
        let overdue = store.insert_invoice(&overdue).await.unwrap();
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let paid = service
            .mark_paid(overdue.id, None, Some("wire received".to_string()))
            .await
            .unwrap();

        assert_eq!(paid.status, InvoiceStatus::Paid);
        assert_eq!(paid.reminders_sent, 0);
        assert_eq!(paid.last_reminder_at, None);
        assert!(paid.paid_date.is_some());
        assert!(paid.notes.unwrap().contains("wire received"));
    }

    #[tokio::test]
    async fn mark_paid_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let paid = store
            .insert_invoice(&paid_invoice(1, "INV/2026/00001"))
            .await
            .unwrap();
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let first_paid_date = paid.paid_date;
        let again = service
            .mark_paid(paid.id, NaiveDate::from_ymd_opt(2030, 1, 1), None)
            .await
            .unwrap();

        // No side effects re-fire: the original paid date survives.
        assert_eq!(again.status, InvoiceStatus::Paid);
        assert_eq!(again.paid_date, first_paid_date);
    }

    #[tokio::test]
    async fn cancel_clears_paid_date() {
        let store = Arc::new(MemoryStore::new());
        let sent = store
            .insert_invoice(&sent_invoice(1, "INV/2026/00001"))
            .await
            .unwrap();
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        let cancelled = service.cancel(sent.id).await.unwrap();
        assert_eq!(cancelled.status, InvoiceStatus::Cancelled);
        assert_eq!(cancelled.paid_date, None);
    }

    #[tokio::test]
    async fn send_transitions_draft_to_sent_on_success() {
        let store = Arc::new(MemoryStore::new());
        store.put_customer(customer(1));
        let mailer = Arc::new(RecordingMailer::new());
        let service = service_with(store.clone(), mailer.clone());

        let invoice = service.create(new_invoice(1)).await.unwrap();
        let sent = service.send(invoice.id, SendOptions::default()).await.unwrap();

        assert_eq!(sent.status, InvoiceStatus::Sent);
        assert_eq!(mailer.sent_count(), 1);
        let email = &mailer.sent.lock().unwrap()[0];
        assert_eq!(email.to, vec![customer(1).email.unwrap()]);
        assert!(email.attachment.is_some());
    }

    #[tokio::test]
    async fn failed_send_leaves_status_untouched() {
        let store = Arc::new(MemoryStore::new());
        store.put_customer(customer(1));
        let service = service_with(store.clone(), Arc::new(RecordingMailer::failing()));

        let invoice = service.create(new_invoice(1)).await.unwrap();
        assert!(service.send(invoice.id, SendOptions::default()).await.is_err());

        let reloaded = store.get_invoice(invoice.id).await.unwrap();
        assert_eq!(reloaded.status, InvoiceStatus::Draft);
    }

    #[tokio::test]
    async fn send_without_resolvable_recipient_fails() {
        let store = Arc::new(MemoryStore::new());
        store.put_customer(customer_without_email(1));
        let mailer = Arc::new(RecordingMailer::new());
        let service = service_with(store, mailer.clone());

        let invoice = service.create(new_invoice(1)).await.unwrap();
        assert!(matches!(
            service.send(invoice.id, SendOptions::default()).await,
            Err(Error::Precondition(_))
        ));
        assert_eq!(mailer.sent_count(), 0);
    }

    #[tokio::test]
    async fn resend_from_sent_keeps_status() {
        let store = Arc::new(MemoryStore::new());
        store.put_customer(customer(1));
        let sent = store
            .insert_invoice(&sent_invoice(1, "INV/2026/00001"))
            .await
            .unwrap();
        let mailer = Arc::new(RecordingMailer::new());
        let service = service_with(store, mailer.clone());

        let resent = service.send(sent.id, SendOptions::default()).await.unwrap();
        assert_eq!(resent.status, InvoiceStatus::Sent);
        assert_eq!(mailer.sent_count(), 1);
    }

    #[tokio::test]
    async fn send_rejected_for_paid_and_cancelled() {
        let store = Arc::new(MemoryStore::new());
        store.put_customer(customer(1));
        let paid = store
            .insert_invoice(&paid_invoice(1, "INV/2026/00001"))
            .await
            .unwrap();
        let mut cancelled = sent_invoice(1, "INV/2026/00002");
        cancelled.status = InvoiceStatus::Cancelled;
        let cancelled = store.insert_invoice(&cancelled).await.unwrap();
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        assert!(matches!(
            service.send(paid.id, SendOptions::default()).await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            service.send(cancelled.id, SendOptions::default()).await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn missing_invoice_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let service = service_with(store, Arc::new(RecordingMailer::new()));

        assert!(matches!(
            service.mark_paid(999, None, None).await,
            Err(Error::InvoiceNotFound(999))
        ));
    }
}
