use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::error::{Error, Result};
use crate::models::{Customer, Invoice, InvoiceStatus, LineItem, Notification};
use crate::store::InvoiceStore;

/// Postgres-backed store. Invoices and their line items live in
/// separate tables and are written together in one transaction; the
/// unique index on `invoices.number` backs the duplicate-number
/// conflict the engine relies on. See `schema.sql` at the crate root.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::Store(e.into()))?;

        Ok(Self { pool })
    }

    async fn load_items(&self, invoice_id: i32) -> Result<Vec<LineItem>> {
        let rows = sqlx::query(
            "SELECT description, quantity, unit_price \
             FROM invoice_items WHERE invoice_id = $1 ORDER BY id ASC",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Store(e.into()))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(LineItem {
                description: row.try_get("description").map_err(store_err)?,
                quantity: row.try_get("quantity").map_err(store_err)?,
                unit_price: row.try_get("unit_price").map_err(store_err)?,
            });
        }
        Ok(items)
    }

    async fn hydrate(&self, rows: Vec<PgRow>) -> Result<Vec<Invoice>> {
        let mut invoices = Vec::with_capacity(rows.len());
        for row in rows {
            let mut invoice = invoice_from_row(&row)?;
            invoice.items = self.load_items(invoice.id).await?;
            invoices.push(invoice);
        }
        Ok(invoices)
    }
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.into())
}

fn invoice_from_row(row: &PgRow) -> Result<Invoice> {
    let status_text: String = row.try_get("status").map_err(store_err)?;
    let status: InvoiceStatus = status_text
        .parse()
        .map_err(|e: String| Error::Store(anyhow::anyhow!(e)))?;
    let recurring_day: Option<i32> = row.try_get("recurring_day").map_err(store_err)?;
    let reminders_sent: i32 = row.try_get("reminders_sent").map_err(store_err)?;

    Ok(Invoice {
        id: row.try_get("id").map_err(store_err)?,
        customer_id: row.try_get("customer_id").map_err(store_err)?,
        created_by: row.try_get("created_by").map_err(store_err)?,
        number: row.try_get("number").map_err(store_err)?,
        items: Vec::new(),
        currency: row.try_get("currency").map_err(store_err)?,
        tax_rate: row.try_get::<Decimal, _>("tax_rate").map_err(store_err)?,
        subtotal: row.try_get::<Decimal, _>("subtotal").map_err(store_err)?,
        tax_amount: row.try_get::<Decimal, _>("tax_amount").map_err(store_err)?,
        total: row.try_get::<Decimal, _>("total").map_err(store_err)?,
        issue_date: row.try_get::<NaiveDate, _>("issue_date").map_err(store_err)?,
        due_date: row.try_get::<NaiveDate, _>("due_date").map_err(store_err)?,
        status,
        is_recurring: row.try_get("is_recurring").map_err(store_err)?,
        recurring_day: recurring_day.map(|d| d as u32),
        reminders_sent: reminders_sent as u32,
        last_reminder_at: row
            .try_get::<Option<DateTime<Utc>>, _>("last_reminder_at")
            .map_err(store_err)?,
        paid_date: row
            .try_get::<Option<NaiveDate>, _>("paid_date")
            .map_err(store_err)?,
        notes: row.try_get("notes").map_err(store_err)?,
    })
}

/// Map an insert failure, translating the unique-violation raised by
/// the number index into the engine's conflict error.
fn map_insert_err(e: sqlx::Error, number: &str) -> Error {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return Error::DuplicateNumber(number.to_string());
        }
    }
    Error::Store(e.into())
}

const INVOICE_COLUMNS: &str = "id, customer_id, created_by, number, currency, tax_rate, \
     subtotal, tax_amount, total, issue_date, due_date, status, is_recurring, \
     recurring_day, reminders_sent, last_reminder_at, paid_date, notes";

#[async_trait]
impl InvoiceStore for PgStore {
    async fn get_invoice(&self, id: i32) -> Result<Invoice> {
        let row = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?
        .ok_or(Error::InvoiceNotFound(id))?;

        let mut invoice = invoice_from_row(&row)?;
        invoice.items = self.load_items(invoice.id).await?;
        Ok(invoice)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<Invoice> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let id: i32 = sqlx::query_scalar(
            "INSERT INTO invoices \
             (customer_id, created_by, number, currency, tax_rate, subtotal, tax_amount, \
              total, issue_date, due_date, status, is_recurring, recurring_day, \
              reminders_sent, last_reminder_at, paid_date, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING id",
        )
        .bind(invoice.customer_id)
        .bind(invoice.created_by)
        .bind(&invoice.number)
        .bind(&invoice.currency)
        .bind(invoice.tax_rate)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.total)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.status.to_string())
        .bind(invoice.is_recurring)
        .bind(invoice.recurring_day.map(|d| d as i32))
        .bind(invoice.reminders_sent as i32)
        .bind(invoice.last_reminder_at)
        .bind(invoice.paid_date)
        .bind(&invoice.notes)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_insert_err(e, &invoice.number))?;

        for item in &invoice.items {
            sqlx::query(
                "INSERT INTO invoice_items (invoice_id, description, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;

        let mut stored = invoice.clone();
        stored.id = id;
        Ok(stored)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let updated = sqlx::query(
            "UPDATE invoices SET currency = $1, tax_rate = $2, subtotal = $3, \
             tax_amount = $4, total = $5, issue_date = $6, due_date = $7, status = $8, \
             is_recurring = $9, recurring_day = $10, reminders_sent = $11, \
             last_reminder_at = $12, paid_date = $13, notes = $14 \
             WHERE id = $15",
        )
        .bind(&invoice.currency)
        .bind(invoice.tax_rate)
        .bind(invoice.subtotal)
        .bind(invoice.tax_amount)
        .bind(invoice.total)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.status.to_string())
        .bind(invoice.is_recurring)
        .bind(invoice.recurring_day.map(|d| d as i32))
        .bind(invoice.reminders_sent as i32)
        .bind(invoice.last_reminder_at)
        .bind(invoice.paid_date)
        .bind(&invoice.notes)
        .bind(invoice.id)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        if updated.rows_affected() == 0 {
            return Err(Error::InvoiceNotFound(invoice.id));
        }

        // Line items are replaced wholesale, as a single unit with the
        // invoice row itself.
        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(invoice.id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        for item in &invoice.items {
            sqlx::query(
                "INSERT INTO invoice_items (invoice_id, description, quantity, unit_price) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(invoice.id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn delete_invoice(&self, id: i32) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query("DELETE FROM invoice_items WHERE invoice_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        let deleted = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        if deleted.rows_affected() == 0 {
            return Err(Error::InvoiceNotFound(id));
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>> {
        let rows = match status {
            Some(status) => sqlx::query(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices WHERE status = $1 ORDER BY id ASC"
            ))
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?,
            None => sqlx::query(&format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices ORDER BY id ASC"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?,
        };

        self.hydrate(rows).await
    }

    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let numbers = sqlx::query_scalar(
            "SELECT number FROM invoices WHERE number LIKE $1",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(numbers)
    }

    async fn recurring_templates(&self) -> Result<Vec<Invoice>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE is_recurring ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        self.hydrate(rows).await
    }

    async fn exists_in_window(
        &self,
        customer_id: i32,
        recurring_day: u32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS ( \
               SELECT 1 FROM invoices \
               WHERE customer_id = $1 AND recurring_day = $2 \
                 AND issue_date >= $3 AND issue_date < $4)",
        )
        .bind(customer_id)
        .bind(recurring_day as i32)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(exists)
    }

    async fn due_before(&self, date: NaiveDate) -> Result<Vec<Invoice>> {
        let rows = sqlx::query(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices \
             WHERE status IN ('SENT', 'OVERDUE') AND due_date < $1 ORDER BY id ASC"
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        self.hydrate(rows).await
    }

    async fn get_customer(&self, id: i32) -> Result<Customer> {
        let row = sqlx::query("SELECT id, name, email, address FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?
            .ok_or(Error::CustomerNotFound(id))?;

        Ok(Customer {
            id: row.try_get("id").map_err(store_err)?,
            name: row.try_get("name").map_err(store_err)?,
            email: row.try_get("email").map_err(store_err)?,
            address: row.try_get("address").map_err(store_err)?,
        })
    }

    async fn insert_notification(
        &self,
        user_id: i32,
        invoice_id: i32,
        message: &str,
    ) -> Result<Notification> {
        let created_at = Utc::now();
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO notifications (user_id, invoice_id, message, created_at) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(user_id)
        .bind(invoice_id)
        .bind(message)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(Notification {
            id,
            user_id,
            invoice_id,
            message: message.to_string(),
            created_at,
        })
    }
}
