//! Shared fixtures for the in-file test modules.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::models::{Customer, Invoice, InvoiceStatus, LineItem};
use crate::money::compute_totals;

pub fn item(quantity: &str, unit_price: &str) -> LineItem {
    LineItem {
        description: "consulting".to_string(),
        quantity: quantity.parse().unwrap(),
        unit_price: unit_price.parse().unwrap(),
    }
}

pub fn customer(id: i32) -> Customer {
    Customer {
        id,
        name: format!("Customer {id}"),
        email: Some(format!("billing{id}@example.test")),
        address: Some("1 Main St".to_string()),
    }
}

pub fn customer_without_email(id: i32) -> Customer {
    Customer {
        id,
        name: format!("Customer {id}"),
        email: None,
        address: None,
    }
}

/// Draft invoice with two items (2 x 500 + 1 x 1000) at 10% tax.
pub fn draft_invoice(customer_id: i32, number: &str) -> Invoice {
    let items = vec![item("2", "500"), item("1", "1000")];
    let tax_rate: Decimal = "10".parse().unwrap();
    let totals = compute_totals(&items, tax_rate);
    let issue_date = Utc::now().date_naive();

    Invoice {
        id: 0,
        customer_id,
        created_by: 7,
        number: number.to_string(),
        items,
        currency: "USD".to_string(),
        tax_rate,
        subtotal: totals.subtotal,
        tax_amount: totals.tax_amount,
        total: totals.total,
        issue_date,
        due_date: issue_date + chrono::Days::new(30),
        status: InvoiceStatus::Draft,
        is_recurring: false,
        recurring_day: None,
        reminders_sent: 0,
        last_reminder_at: None,
        paid_date: None,
        notes: None,
    }
}

pub fn sent_invoice(customer_id: i32, number: &str) -> Invoice {
    let mut invoice = draft_invoice(customer_id, number);
    invoice.status = InvoiceStatus::Sent;
    invoice
}

pub fn paid_invoice(customer_id: i32, number: &str) -> Invoice {
    let mut invoice = draft_invoice(customer_id, number);
    invoice.status = InvoiceStatus::Paid;
    invoice.paid_date = NaiveDate::from_ymd_opt(2026, 1, 15);
    invoice
}

/// Recurring template issued on `issue_date`, regenerating on `day`.
pub fn recurring_template(customer_id: i32, number: &str, issue_date: NaiveDate, day: u32) -> Invoice {
    let mut invoice = sent_invoice(customer_id, number);
    invoice.is_recurring = true;
    invoice.recurring_day = Some(day);
    invoice.issue_date = issue_date;
    invoice.due_date = issue_date + chrono::Days::new(14);
    invoice
}
