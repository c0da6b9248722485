use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lightweight operational record shown to the invoice's creator,
/// written by the reminder job after a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub invoice_id: i32,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
