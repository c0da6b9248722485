use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle status. Stored as uppercase text in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Overdue,
    Paid,
    Cancelled,
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceStatus::Draft => write!(f, "DRAFT"),
            InvoiceStatus::Sent => write!(f, "SENT"),
            InvoiceStatus::Overdue => write!(f, "OVERDUE"),
            InvoiceStatus::Paid => write!(f, "PAID"),
            InvoiceStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(InvoiceStatus::Draft),
            "SENT" => Ok(InvoiceStatus::Sent),
            "OVERDUE" => Ok(InvoiceStatus::Overdue),
            "PAID" => Ok(InvoiceStatus::Paid),
            "CANCELLED" => Ok(InvoiceStatus::Cancelled),
            other => Err(format!("unknown invoice status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// 0 until the store has assigned an id.
    pub id: i32,
    pub customer_id: i32,
    pub created_by: i32,
    /// `PREFIX/YYYY/NNNNN`, sequential per year.
    pub number: String,
    pub items: Vec<LineItem>,
    pub currency: String,
    /// Percent, 0-100.
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub is_recurring: bool,
    /// Day of month a recurring invoice regenerates on, 1-28.
    pub recurring_day: Option<u32>,
    pub reminders_sent: u32,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub paid_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl Invoice {
    /// Whole days between issue and due date, the customer's payment terms.
    pub fn payment_terms_days(&self) -> i64 {
        (self.due_date - self.issue_date).num_days()
    }
}
