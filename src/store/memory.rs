use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::models::{Customer, Invoice, InvoiceStatus, Notification};
use crate::store::InvoiceStore;

/// In-process store backed by mutex-guarded maps. Reference
/// implementation for tests and for running the engine without a
/// configured database; it enforces the same invoice-number uniqueness
/// the Postgres schema does.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    invoices: HashMap<i32, Invoice>,
    customers: HashMap<i32, Customer>,
    notifications: Vec<Notification>,
    next_invoice_id: i32,
    next_notification_id: i32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a customer record (test and bootstrap helper).
    pub fn put_customer(&self, customer: Customer) {
        let mut inner = self.inner.lock().unwrap();
        inner.customers.insert(customer.id, customer);
    }

    /// Snapshot of all notifications written so far.
    pub fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().unwrap().notifications.clone()
    }
}

#[async_trait]
impl InvoiceStore for MemoryStore {
    async fn get_invoice(&self, id: i32) -> Result<Invoice> {
        let inner = self.inner.lock().unwrap();
        inner
            .invoices
            .get(&id)
            .cloned()
            .ok_or(Error::InvoiceNotFound(id))
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<Invoice> {
        let mut inner = self.inner.lock().unwrap();
        if inner.invoices.values().any(|i| i.number == invoice.number) {
            return Err(Error::DuplicateNumber(invoice.number.clone()));
        }
        inner.next_invoice_id += 1;
        let mut stored = invoice.clone();
        stored.id = inner.next_invoice_id;
        inner.invoices.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.invoices.contains_key(&invoice.id) {
            return Err(Error::InvoiceNotFound(invoice.id));
        }
        inner.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn delete_invoice(&self, id: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .invoices
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::InvoiceNotFound(id))
    }

    async fn list_invoices(&self, status: Option<InvoiceStatus>) -> Result<Vec<Invoice>> {
        let inner = self.inner.lock().unwrap();
        let mut invoices: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.id);
        Ok(invoices)
    }

    async fn numbers_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .invoices
            .values()
            .filter(|i| i.number.starts_with(prefix))
            .map(|i| i.number.clone())
            .collect())
    }

    async fn recurring_templates(&self) -> Result<Vec<Invoice>> {
        let inner = self.inner.lock().unwrap();
        let mut templates: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| i.is_recurring)
            .cloned()
            .collect();
        templates.sort_by_key(|i| i.id);
        Ok(templates)
    }

    async fn exists_in_window(
        &self,
        customer_id: i32,
        recurring_day: u32,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.invoices.values().any(|i| {
            i.customer_id == customer_id
                && i.recurring_day == Some(recurring_day)
                && i.issue_date >= from
                && i.issue_date < to
        }))
    }

    async fn due_before(&self, date: NaiveDate) -> Result<Vec<Invoice>> {
        let inner = self.inner.lock().unwrap();
        let mut due: Vec<Invoice> = inner
            .invoices
            .values()
            .filter(|i| {
                matches!(i.status, InvoiceStatus::Sent | InvoiceStatus::Overdue)
                    && i.due_date < date
            })
            .cloned()
            .collect();
        due.sort_by_key(|i| i.id);
        Ok(due)
    }

    async fn get_customer(&self, id: i32) -> Result<Customer> {
        let inner = self.inner.lock().unwrap();
        inner
            .customers
            .get(&id)
            .cloned()
            .ok_or(Error::CustomerNotFound(id))
    }

    async fn insert_notification(
        &self,
        user_id: i32,
        invoice_id: i32,
        message: &str,
    ) -> Result<Notification> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_notification_id += 1;
        let notification = Notification {
            id: inner.next_notification_id,
            user_id,
            invoice_id,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        inner.notifications.push(notification.clone());
        Ok(notification)
    }
}
