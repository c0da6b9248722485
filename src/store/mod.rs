//! Persistence collaborator for the invoicing engine.
//!
//! The engine only ever talks to [`InvoiceStore`]; the Postgres
//! implementation backs production and the in-memory one backs tests
//! and database-less runs.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{Customer, Invoice, InvoiceStatus, Notification};

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn get_invoice(&self, id: i32) -> Result<Invoice>;

    /// Insert a new invoice (id ignored) and return the stored row with
    /// its assigned id. A duplicate invoice number must surface as
    /// [`Error::DuplicateNumber`](crate::error::Error::DuplicateNumber);
    /// the uniqueness constraint here is the final arbiter for
    /// concurrent allocations.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<Invoice>;

    async fn update_invoice(&self, invoice: &Invoice) -> Result<()>;

    async fn delete_invoice(&self, id: i32) -> Result<()>;

    async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>>;

    /// Every stored invoice number starting with `prefix`, for the
    /// year-scoped allocation scan.
    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// All invoices flagged as recurring templates.
    async fn recurring_templates(&self) -> Result<Vec<Invoice>>;

    /// Whether an invoice already exists for this customer and
    /// recurring day with an issue date in `[from, to)`. Used by the
    /// recurring generator's month-window dedup.
    async fn exists_in_window(
        &self,
        customer_id: i32,
        recurring_day: u32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool>;

    /// Invoices with status SENT or OVERDUE whose due date is strictly
    /// before `date`.
    async fn due_before(&self, date: NaiveDate) -> Result<Vec<Invoice>>;

    async fn get_customer(&self, id: i32) -> Result<Customer>;

    async fn insert_notification(
        &self,
        user_id: i32,
        invoice_id: i32,
        message: &str,
    ) -> Result<Notification>;
}
