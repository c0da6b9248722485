use crate::models::InvoiceStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the invoicing engine. Interactive operations
/// propagate these to the API layer; the daily jobs log and swallow
/// them per invoice so one failure cannot halt a batch.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invoice {0} not found")]
    InvoiceNotFound(i32),

    #[error("customer {0} not found")]
    CustomerNotFound(i32),

    #[error("duplicate invoice number {0}")]
    DuplicateNumber(String),

    #[error("invalid transition: invoice is {status}, cannot {action}")]
    InvalidTransition {
        status: InvoiceStatus,
        action: &'static str,
    },

    #[error("{0}")]
    Precondition(String),

    #[error("email delivery failed: {0}")]
    Email(String),

    #[error("rendering failed: {0}")]
    Render(String),

    #[error("store error: {0}")]
    Store(anyhow::Error),
}

impl Error {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }
}
