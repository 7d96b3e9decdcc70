//! Meal model

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::MealId;

/// A meal served every day at a fixed wall-clock time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Meal {
    pub id: MealId,
    pub name: String,
    pub scheduled_time: NaiveTime,
}
