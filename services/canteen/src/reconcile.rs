//! Reservation reconciliation
//!
//! Members opt out of meals; the absence of a reservation row means they
//! attend. This module computes a member's grid of canceled and locked slots
//! and turns a desired set of attended slots into the minimal batch of
//! inserts and deletes, never touching a locked slot.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    error::CoreError,
    models::{DateRange, Meal, MealId, ReservationBatch, Slot, TogglePlan, UserId},
    policy::WindowPolicy,
    repositories::{MealRepository, ReservationRepository, UserRepository},
};

/// A member's opt-out grid over a range of days
#[derive(Debug, Clone, Serialize)]
pub struct ReservationMatrix {
    pub user_id: UserId,
    pub range: DateRange,
    pub meals: Vec<Meal>,
    /// Slots the member opted out of
    pub canceled: BTreeSet<Slot>,
    /// Slots too close (or past) to change
    pub locked: BTreeSet<Slot>,
}

impl ReservationMatrix {
    pub fn is_canceled(&self, slot: &Slot) -> bool {
        self.canceled.contains(slot)
    }

    pub fn is_locked(&self, slot: &Slot) -> bool {
        self.locked.contains(slot)
    }

    /// No opt-out row means the member is expected
    pub fn is_expected(&self, slot: &Slot) -> bool {
        !self.is_canceled(slot)
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.range.days().collect()
    }
}

/// What a toggle request changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToggleSummary {
    /// New opt-outs
    pub inserted: usize,
    /// Opt-outs removed (member opted back in)
    pub deleted: usize,
    /// Requested changes refused because the slot is locked
    pub skipped_locked: usize,
}

/// Every (day, meal) slot of `range` whose meal is inside the lock horizon at `now`
pub fn locked_slots(
    policy: &WindowPolicy,
    range: &DateRange,
    meals: &[Meal],
    now: DateTime<Utc>,
) -> BTreeSet<Slot> {
    range
        .days()
        .flat_map(|day| {
            meals
                .iter()
                .filter(move |meal| policy.is_locked(day, meal.scheduled_time, now))
                .map(move |meal| Slot::new(day, meal.id))
        })
        .collect()
}

/// Diff the desired attended slots against the current opt-outs.
///
/// Locked slots are skipped whatever was requested. Only slots in
/// `range × meals` are considered.
pub fn plan_toggles(
    range: &DateRange,
    meals: &[Meal],
    canceled: &BTreeSet<Slot>,
    locked: &BTreeSet<Slot>,
    desired_attend: &BTreeSet<Slot>,
) -> TogglePlan {
    let mut batch = ReservationBatch::default();
    let mut skipped_locked = 0;

    for day in range.days() {
        for meal in meals {
            let slot = Slot::new(day, meal.id);
            let wants_attend = desired_attend.contains(&slot);
            let is_canceled = canceled.contains(&slot);

            if locked.contains(&slot) {
                if wants_attend == is_canceled {
                    skipped_locked += 1;
                }
                continue;
            }

            if wants_attend && is_canceled {
                batch.deletes.push(slot);
            } else if !wants_attend && !is_canceled {
                batch.inserts.push(slot);
            }
        }
    }

    TogglePlan {
        batch,
        skipped_locked,
    }
}

/// Reconciliation engine
#[derive(Clone)]
pub struct ReconciliationEngine {
    users: Arc<dyn UserRepository>,
    meals: Arc<dyn MealRepository>,
    reservations: Arc<dyn ReservationRepository>,
    policy: WindowPolicy,
}

impl ReconciliationEngine {
    pub fn new(
        users: Arc<dyn UserRepository>,
        meals: Arc<dyn MealRepository>,
        reservations: Arc<dyn ReservationRepository>,
        policy: WindowPolicy,
    ) -> Self {
        Self {
            users,
            meals,
            reservations,
            policy,
        }
    }

    async fn ensure_user(&self, user_id: UserId) -> Result<(), CoreError> {
        match self.users.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(CoreError::user_not_found(user_id)),
        }
    }

    async fn canceled_slots(
        &self,
        user_id: UserId,
        range: &DateRange,
    ) -> Result<BTreeSet<Slot>, CoreError> {
        let rows = self.reservations.find_by_user(user_id, range).await?;
        Ok(rows
            .iter()
            .map(|r| r.slot())
            .filter(|slot| range.contains(slot.date))
            .collect())
    }

    /// The member's canceled and locked slots over `range`
    pub async fn get_matrix(
        &self,
        user_id: UserId,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> Result<ReservationMatrix, CoreError> {
        self.ensure_user(user_id).await?;

        let meals = self.meals.list_meals().await?;
        let canceled = self.canceled_slots(user_id, &range).await?;
        let locked = locked_slots(&self.policy, &range, &meals, now);

        Ok(ReservationMatrix {
            user_id,
            range,
            meals,
            canceled,
            locked,
        })
    }

    /// Make the member attend exactly `desired_attend` within `range`,
    /// except for locked slots, in one atomic commit. The opt-outs are read
    /// inside that commit, so concurrent requests for one member serialise.
    pub async fn apply_toggles(
        &self,
        user_id: UserId,
        range: DateRange,
        desired_attend: &BTreeSet<Slot>,
        now: DateTime<Utc>,
    ) -> Result<ToggleSummary, CoreError> {
        self.ensure_user(user_id).await?;

        let meals = self.meals.list_meals().await?;
        let locked = locked_slots(&self.policy, &range, &meals, now);

        let out_of_scope = desired_attend
            .iter()
            .filter(|slot| {
                !range.contains(slot.date) || !meals.iter().any(|m| m.id == slot.meal_id)
            })
            .count();
        if out_of_scope > 0 {
            debug!(
                "Ignoring {} requested slots outside {}..{} for user {}",
                out_of_scope, range.start, range.end, user_id
            );
        }

        let planner = |canceled: &BTreeSet<Slot>| {
            plan_toggles(&range, &meals, canceled, &locked, desired_attend)
        };
        let plan = self
            .reservations
            .reconcile(user_id, &range, &planner)
            .await
            .map_err(CoreError::ApplyFailed)?;

        let summary = ToggleSummary {
            inserted: plan.batch.inserts.len(),
            deleted: plan.batch.deletes.len(),
            skipped_locked: plan.skipped_locked,
        };
        if plan.batch.is_empty() {
            debug!("Nothing to change for user {}", user_id);
            return Ok(summary);
        }

        info!(
            "Updated reservations for user {}: {} opt-outs added, {} removed, {} locked skipped",
            user_id, summary.inserted, summary.deleted, summary.skipped_locked
        );
        Ok(summary)
    }

    /// Administrative removal of one opt-out. Not subject to the lock.
    pub async fn remove_reservation(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> Result<bool, CoreError> {
        self.ensure_user(user_id).await?;
        if self.meals.get_meal(meal_id).await?.is_none() {
            return Err(CoreError::meal_not_found(meal_id));
        }

        let removed = self.reservations.delete(user_id, meal_id, date).await?;
        if removed {
            info!(
                "Removed opt-out of user {} for meal {} on {}",
                user_id, meal_id, date
            );
        }
        Ok(removed)
    }
}
