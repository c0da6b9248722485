use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i32,
    pub name: String,
    /// Billing address for reminder emails. Customers imported from
    /// other channels may not have one on file.
    pub email: Option<String>,
    pub address: Option<String>,
}
