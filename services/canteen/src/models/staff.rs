//! Staff accounts: administrators and kiosk validators

use serde::{Deserialize, Serialize};

/// Role carried in a staff session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    /// Dashboard, reports and kiosk
    Admin,
    /// Kiosk only
    Validator,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Validator => "validator",
        }
    }
}

/// A staff login record, from either the admins or the validators table
#[derive(Debug, Clone)]
pub struct StaffAccount {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: StaffRole,
    pub active: bool,
}
