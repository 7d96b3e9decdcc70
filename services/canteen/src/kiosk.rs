//! Kiosk attendance validation
//!
//! One scan, one member, one meal, today. The outcome is three-valued:
//! `accept`, `reject` (the member is not entitled right now) or `error`
//! (the service failed to record a valid attendance).

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    error::CoreError,
    models::{InsertOutcome, KIOSK_SOURCE, Meal, MealId, NewAttendance, UserId},
    policy::WindowPolicy,
    repositories::{AttendanceRepository, MealRepository, ReservationRepository, UserRepository},
    validation::parse_user_id,
};

/// Kiosk result colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Accept,
    Reject,
    Error,
}

/// Why the kiosk answered the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    NoActiveMeal,
    InvalidIdentifier,
    Canceled,
    OutsideWindow,
    RecordFailed,
    Recorded,
}

impl ValidationReason {
    pub fn status(&self) -> ValidationStatus {
        match self {
            ValidationReason::Recorded => ValidationStatus::Accept,
            ValidationReason::RecordFailed => ValidationStatus::Error,
            _ => ValidationStatus::Reject,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ValidationReason::NoActiveMeal => "no active meal",
            ValidationReason::InvalidIdentifier => "invalid identifier",
            ValidationReason::Canceled => "canceled",
            ValidationReason::OutsideWindow => "outside window",
            ValidationReason::RecordFailed => "failed to record",
            ValidationReason::Recorded => "attendance recorded",
        }
    }
}

/// Result of one kiosk validation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub reason: ValidationReason,
    pub message: String,
    pub day: NaiveDate,
    pub meal: Option<Meal>,
    pub user_id: Option<UserId>,
    /// The attendance row existed before this scan
    pub already_recorded: bool,
    /// Underlying failure for `error` outcomes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ValidationOutcome {
    fn new(reason: ValidationReason, day: NaiveDate) -> Self {
        Self {
            status: reason.status(),
            reason,
            message: reason.message().to_string(),
            day,
            meal: None,
            user_id: None,
            already_recorded: false,
            detail: None,
        }
    }

    fn with_meal(mut self, meal: &Meal) -> Self {
        self.meal = Some(meal.clone());
        self
    }

    fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Read-only opt-out status for a member at today's meal
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub user_id: UserId,
    pub meal: Meal,
    pub day: NaiveDate,
    pub attending: bool,
}

/// Kiosk validator
#[derive(Clone)]
pub struct KioskValidator {
    users: Arc<dyn UserRepository>,
    meals: Arc<dyn MealRepository>,
    reservations: Arc<dyn ReservationRepository>,
    attendance: Arc<dyn AttendanceRepository>,
    policy: WindowPolicy,
}

impl KioskValidator {
    pub fn new(
        users: Arc<dyn UserRepository>,
        meals: Arc<dyn MealRepository>,
        reservations: Arc<dyn ReservationRepository>,
        attendance: Arc<dyn AttendanceRepository>,
        policy: WindowPolicy,
    ) -> Self {
        Self {
            users,
            meals,
            reservations,
            attendance,
            policy,
        }
    }

    /// The meal whose validation window is open at `now`, if any
    pub async fn current_meal(&self, now: DateTime<Utc>) -> Result<Option<Meal>, CoreError> {
        let meals = self.meals.list_meals().await?;
        Ok(self.policy.active_meal(&meals, now).cloned())
    }

    /// Validate a scan and record attendance for today's meal.
    ///
    /// `meal_id` forces a meal instead of the active one; it is still held
    /// to its validation window.
    pub async fn validate(
        &self,
        raw_user_id: &str,
        meal_id: Option<MealId>,
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome, CoreError> {
        let day = self.policy.today(now);

        let meal = match meal_id {
            Some(id) => self.meals.get_meal(id).await?,
            None => self.current_meal(now).await?,
        };
        let Some(meal) = meal else {
            info!("Kiosk reject: no active meal at {}", now);
            return Ok(ValidationOutcome::new(ValidationReason::NoActiveMeal, day));
        };

        let user_id = match parse_user_id(raw_user_id) {
            Ok(id) => id,
            Err(_) => {
                info!("Kiosk reject: unparsable member number {:?}", raw_user_id);
                return Ok(
                    ValidationOutcome::new(ValidationReason::InvalidIdentifier, day)
                        .with_meal(&meal),
                );
            }
        };
        if self.users.get_user(user_id).await?.is_none() {
            info!("Kiosk reject: unknown member {}", user_id);
            return Ok(ValidationOutcome::new(ValidationReason::InvalidIdentifier, day)
                .with_meal(&meal)
                .with_user(user_id));
        }

        if self.reservations.find(user_id, meal.id, day).await?.is_some() {
            info!(
                "Kiosk reject: member {} canceled {} on {}",
                user_id, meal.name, day
            );
            return Ok(ValidationOutcome::new(ValidationReason::Canceled, day)
                .with_meal(&meal)
                .with_user(user_id));
        }

        if !self.policy.in_window(meal.scheduled_time, day, now) {
            info!(
                "Kiosk reject: {} is outside its validation window at {}",
                meal.name, now
            );
            return Ok(ValidationOutcome::new(ValidationReason::OutsideWindow, day)
                .with_meal(&meal)
                .with_user(user_id));
        }

        let mut outcome = ValidationOutcome::new(ValidationReason::Recorded, day)
            .with_meal(&meal)
            .with_user(user_id);

        if self.attendance.find(user_id, meal.id, day).await?.is_some() {
            outcome.already_recorded = true;
            return Ok(outcome);
        }

        let new = NewAttendance {
            user_id,
            meal_id: meal.id,
            date: day,
            validated_at: now,
            source: KIOSK_SOURCE.to_string(),
        };
        match self.attendance.insert(&new).await {
            Ok(InsertOutcome::Inserted) => {
                info!("Recorded attendance: member {} at {} on {}", user_id, meal.name, day);
            }
            Ok(InsertOutcome::AlreadyPresent) => {
                // A concurrent scan won the race
                outcome.already_recorded = true;
            }
            Err(e) => {
                let err = CoreError::RecordFailed(e);
                error!("Kiosk error for member {} at {}: {}", user_id, meal.name, err);
                let mut failed = ValidationOutcome::new(ValidationReason::RecordFailed, day)
                    .with_meal(&meal)
                    .with_user(user_id);
                failed.detail = Some(err.to_string());
                return Ok(failed);
            }
        }

        Ok(outcome)
    }

    /// Whether the member is expected at `meal_id` today, without recording anything
    pub async fn check(
        &self,
        user_id: UserId,
        meal_id: MealId,
        now: DateTime<Utc>,
    ) -> Result<CheckOutcome, CoreError> {
        let meal = self
            .meals
            .get_meal(meal_id)
            .await?
            .ok_or_else(|| CoreError::meal_not_found(meal_id))?;
        if self.users.get_user(user_id).await?.is_none() {
            return Err(CoreError::user_not_found(user_id));
        }

        let day = self.policy.today(now);
        let canceled = self.reservations.find(user_id, meal_id, day).await?.is_some();

        Ok(CheckOutcome {
            user_id,
            meal,
            day,
            attending: !canceled,
        })
    }
}
