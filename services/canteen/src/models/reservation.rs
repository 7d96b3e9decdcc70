//! Reservation (opt-out) model
//!
//! A reservation row means the member will NOT eat that meal on that day.
//! No row is the default, attending state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{MealId, Slot, UserId};

/// Reservation entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub user_id: UserId,
    pub meal_id: MealId,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn slot(&self) -> Slot {
        Slot::new(self.date, self.meal_id)
    }
}

/// Opt-out rows to create and remove for one member in a single commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationBatch {
    pub inserts: Vec<Slot>,
    pub deletes: Vec<Slot>,
}

impl ReservationBatch {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}

/// A planned batch plus the requested changes refused by the lock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TogglePlan {
    pub batch: ReservationBatch,
    pub skipped_locked: usize,
}
