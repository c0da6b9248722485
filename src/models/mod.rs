mod customer;
mod invoice;
mod notification;

pub use customer::Customer;
pub use invoice::{Invoice, InvoiceStatus, LineItem};
pub use notification::Notification;
