//! Member model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::UserId;

/// Member entity, provisioned outside this service
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: UserId,
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,
    pub pin_set_at: Option<DateTime<Utc>>,
}

impl User {
    /// A member without a PIN exists but cannot log in to self-service
    pub fn can_authenticate(&self) -> bool {
        self.pin_hash.is_some()
    }
}
