//! Attendance model

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{MealId, UserId};

/// Source tag written by the kiosk
pub const KIOSK_SOURCE: &str = "kiosk";

/// Attendance entity: the member was physically validated at the meal
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attendance {
    pub id: i64,
    pub user_id: UserId,
    pub meal_id: MealId,
    pub date: NaiveDate,
    pub validated_at: DateTime<Utc>,
    pub source: String,
}

/// New attendance creation payload
#[derive(Debug, Clone)]
pub struct NewAttendance {
    pub user_id: UserId,
    pub meal_id: MealId,
    pub date: NaiveDate,
    pub validated_at: DateTime<Utc>,
    pub source: String,
}

/// Result of an attendance insert against the uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
}
