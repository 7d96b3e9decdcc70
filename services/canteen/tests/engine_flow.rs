//! End-to-end engine behaviour over the in-memory store

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use canteen::{
    CoreError, Stores,
    config::PolicyConfig,
    kiosk::{KioskValidator, ValidationReason, ValidationStatus},
    models::{DateRange, MealId, Reservation, Slot, TogglePlan, UserId},
    policy::WindowPolicy,
    reconcile::ReconciliationEngine,
    repositories::{MemoryStore, ReservationRepository, TogglePlanner},
    stats::StatisticsEngine,
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Europe::Bucharest;
use common::error::DatabaseResult;
use tokio::sync::Barrier;

const BREAKFAST: i16 = 1;
const LUNCH: i16 = 2;
const DINNER: i16 = 3;

fn date(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, m, d).unwrap()
}

/// Local organisation time as UTC
fn at(m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Bucharest
        .with_ymd_and_hms(2024, m, d, h, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

struct Harness {
    store: Arc<MemoryStore>,
    reconciler: ReconciliationEngine,
    kiosk: KioskValidator,
    stats: StatisticsEngine,
}

async fn harness(users: impl IntoIterator<Item = i16>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store.add_users(users).await;
    store
        .add_meal(BREAKFAST, "Breakfast", NaiveTime::from_hms_opt(8, 0, 0).unwrap())
        .await;
    store
        .add_meal(LUNCH, "Lunch", NaiveTime::from_hms_opt(12, 0, 0).unwrap())
        .await;
    store
        .add_meal(DINNER, "Dinner", NaiveTime::from_hms_opt(19, 0, 0).unwrap())
        .await;

    // Bucharest, 60 min before / 140 min after, 25h lock
    let policy = WindowPolicy::new(&PolicyConfig::default());
    let stores = Stores::memory(store.clone());

    Harness {
        reconciler: ReconciliationEngine::new(
            stores.users.clone(),
            stores.meals.clone(),
            stores.reservations.clone(),
            policy,
        ),
        kiosk: KioskValidator::new(
            stores.users.clone(),
            stores.meals.clone(),
            stores.reservations.clone(),
            stores.attendance.clone(),
            policy,
        ),
        stats: StatisticsEngine::new(
            stores.users,
            stores.meals,
            stores.reservations,
            stores.attendance,
            Weekday::Sat,
        ),
        store,
    }
}

fn all_slots(range: &DateRange) -> BTreeSet<Slot> {
    range
        .days()
        .flat_map(|day| [BREAKFAST, LUNCH, DINNER].map(|meal| Slot::new(day, meal)))
        .collect()
}

#[tokio::test]
async fn test_members_are_expected_without_reservations() {
    let h = harness(1..=10).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::new(date(5, 6), date(5, 9)).unwrap();

    let matrix = h.reconciler.get_matrix(1, range, now).await.unwrap();
    assert!(matrix.canceled.is_empty());
    assert!(all_slots(&range).iter().all(|slot| matrix.is_expected(slot)));

    let report = h.stats.daily_stats(date(5, 6)).await.unwrap();
    assert!(report.meals.iter().all(|m| m.expected == 10 && m.canceled == 0));

    let check = h.kiosk.check(1, LUNCH, now).await.unwrap();
    assert!(check.attending);
}

#[tokio::test]
async fn test_lock_horizon_is_strict() {
    let h = harness(1..=2).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::new(date(5, 6), date(5, 8)).unwrap();

    let matrix = h.reconciler.get_matrix(1, range, now).await.unwrap();
    // Breakfast tomorrow is 21h away, lunch tomorrow exactly 25h
    assert!(matrix.is_locked(&Slot::new(date(5, 6), DINNER)));
    assert!(matrix.is_locked(&Slot::new(date(5, 7), BREAKFAST)));
    assert!(!matrix.is_locked(&Slot::new(date(5, 7), LUNCH)));
    assert!(!matrix.is_locked(&Slot::new(date(5, 8), BREAKFAST)));
}

#[tokio::test]
async fn test_locked_slots_are_never_modified() {
    let h = harness(1..=2).await;
    h.store.seed_reservation(1, LUNCH, date(5, 6)).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::new(date(5, 6), date(5, 9)).unwrap();

    // Ask to opt back in to the locked lunch and out of the locked breakfast
    let mut desired = all_slots(&range);
    desired.remove(&Slot::new(date(5, 6), BREAKFAST));

    let summary = h
        .reconciler
        .apply_toggles(1, range, &desired, now)
        .await
        .unwrap();

    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.skipped_locked, 2);
    assert_eq!(h.store.reservation_keys().await, vec![(1, LUNCH, date(5, 6))]);
}

#[tokio::test]
async fn test_toggle_round_trip_leaves_no_residue() {
    let h = harness(1..=2).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::new(date(5, 6), date(5, 12)).unwrap();
    let everything = all_slots(&range);

    let mut opt_out = everything.clone();
    opt_out.remove(&Slot::new(date(5, 9), DINNER));
    let summary = h
        .reconciler
        .apply_toggles(2, range, &opt_out, now)
        .await
        .unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(h.store.reservation_keys().await, vec![(2, DINNER, date(5, 9))]);

    let summary = h
        .reconciler
        .apply_toggles(2, range, &everything, now)
        .await
        .unwrap();
    assert_eq!(summary.deleted, 1);
    assert!(h.store.reservation_keys().await.is_empty());

    // Repeating the request changes nothing
    let summary = h
        .reconciler
        .apply_toggles(2, range, &everything, now)
        .await
        .unwrap();
    assert_eq!(summary, Default::default());
}

#[tokio::test]
async fn test_slots_outside_range_are_ignored() {
    let h = harness(1..=2).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::new(date(5, 10), date(5, 10)).unwrap();

    let mut desired = all_slots(&range);
    desired.insert(Slot::new(date(5, 20), LUNCH));
    desired.insert(Slot::new(date(5, 10), 99));

    let summary = h
        .reconciler
        .apply_toggles(1, range, &desired, now)
        .await
        .unwrap();
    assert_eq!(summary, Default::default());
    assert!(h.store.reservation_keys().await.is_empty());
}

#[tokio::test]
async fn test_failed_batch_is_not_partially_applied() {
    let h = harness(1..=2).await;
    h.store.seed_reservation(1, LUNCH, date(5, 10)).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::new(date(5, 10), date(5, 11)).unwrap();

    // One delete (lunch on the 10th) and one insert (dinner on the 11th)
    let mut desired = all_slots(&range);
    desired.remove(&Slot::new(date(5, 11), DINNER));

    h.store.set_fail_writes(true);
    let result = h.reconciler.apply_toggles(1, range, &desired, now).await;

    assert!(matches!(result, Err(CoreError::ApplyFailed(_))));
    assert_eq!(h.store.reservation_keys().await, vec![(1, LUNCH, date(5, 10))]);
}

/// Holds every reconcile until two callers have arrived
struct GatedReservations {
    inner: Arc<MemoryStore>,
    gate: Barrier,
}

#[async_trait]
impl ReservationRepository for GatedReservations {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Reservation>> {
        ReservationRepository::find(&*self.inner, user_id, meal_id, date).await
    }

    async fn find_by_user(
        &self,
        user_id: UserId,
        range: &DateRange,
    ) -> DatabaseResult<Vec<Reservation>> {
        ReservationRepository::find_by_user(&*self.inner, user_id, range).await
    }

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Reservation>> {
        ReservationRepository::find_by_date(&*self.inner, date).await
    }

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Reservation>> {
        ReservationRepository::find_in_range(&*self.inner, range).await
    }

    async fn insert(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Reservation> {
        ReservationRepository::insert(&*self.inner, user_id, meal_id, date).await
    }

    async fn delete(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<bool> {
        ReservationRepository::delete(&*self.inner, user_id, meal_id, date).await
    }

    async fn reconcile(
        &self,
        user_id: UserId,
        range: &DateRange,
        planner: &TogglePlanner<'_>,
    ) -> DatabaseResult<TogglePlan> {
        self.gate.wait().await;
        ReservationRepository::reconcile(&*self.inner, user_id, range, planner).await
    }
}

#[tokio::test]
async fn test_concurrent_toggles_match_a_serial_order() {
    let h = harness(1..=2).await;
    h.store.seed_reservation(1, DINNER, date(5, 10)).await;
    let now = at(5, 6, 11, 0);
    let range = DateRange::single(date(5, 10));

    let stores = Stores::memory(h.store.clone());
    let reconciler = ReconciliationEngine::new(
        stores.users,
        stores.meals,
        Arc::new(GatedReservations {
            inner: h.store.clone(),
            gate: Barrier::new(2),
        }),
        WindowPolicy::new(&PolicyConfig::default()),
    );

    // One request cancels every meal, the other attends every meal
    let attend_all = all_slots(&range);
    let attend_none = BTreeSet::new();
    let (cancel, attend) = tokio::join!(
        reconciler.apply_toggles(1, range, &attend_none, now),
        reconciler.apply_toggles(1, range, &attend_all, now),
    );
    cancel.unwrap();
    attend.unwrap();

    let keys = h.store.reservation_keys().await;
    let every_meal_canceled: Vec<(UserId, MealId, NaiveDate)> = vec![
        (1, BREAKFAST, date(5, 10)),
        (1, LUNCH, date(5, 10)),
        (1, DINNER, date(5, 10)),
    ];
    assert!(
        keys.is_empty() || keys == every_meal_canceled,
        "interleaved outcome {:?}",
        keys
    );
}

#[tokio::test]
async fn test_matrix_for_unknown_member() {
    let h = harness(1..=2).await;
    let range = DateRange::single(date(5, 6));
    let result = h.reconciler.get_matrix(42, range, at(5, 6, 11, 0)).await;
    assert!(matches!(result, Err(CoreError::NotFound { entity: "User", id: 42 })));
}

#[tokio::test]
async fn test_validation_is_idempotent() {
    let h = harness(1..=5).await;
    let now = at(5, 6, 12, 30);

    let first = h.kiosk.validate("3", None, now).await.unwrap();
    assert_eq!(first.status, ValidationStatus::Accept);
    assert_eq!(first.reason, ValidationReason::Recorded);
    assert_eq!(first.meal.as_ref().map(|m| m.id), Some(LUNCH));
    assert!(!first.already_recorded);

    let second = h.kiosk.validate(" 3 ", None, now).await.unwrap();
    assert_eq!(second.status, ValidationStatus::Accept);
    assert!(second.already_recorded);

    let rows = h.store.attendance_rows().await;
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].user_id, rows[0].meal_id, rows[0].date), (3, LUNCH, date(5, 6)));
    assert_eq!(rows[0].validated_at, now);
}

#[tokio::test]
async fn test_canceled_member_accepted_after_admin_removal() {
    let h = harness(1..=5).await;
    h.store.seed_reservation(4, LUNCH, date(5, 6)).await;
    let now = at(5, 6, 12, 10);

    let outcome = h.kiosk.validate("4", None, now).await.unwrap();
    assert_eq!(outcome.status, ValidationStatus::Reject);
    assert_eq!(outcome.reason, ValidationReason::Canceled);
    assert!(!h.kiosk.check(4, LUNCH, now).await.unwrap().attending);

    let removed = h
        .reconciler
        .remove_reservation(4, LUNCH, date(5, 6))
        .await
        .unwrap();
    assert!(removed);

    let outcome = h.kiosk.validate("4", None, now).await.unwrap();
    assert_eq!(outcome.status, ValidationStatus::Accept);
    assert_eq!(h.store.attendance_rows().await.len(), 1);
}

#[tokio::test]
async fn test_validation_rejections() {
    let h = harness(1..=5).await;

    // Between the lunch and dinner windows
    let idle = at(5, 6, 16, 0);
    let outcome = h.kiosk.validate("1", None, idle).await.unwrap();
    assert_eq!(outcome.reason, ValidationReason::NoActiveMeal);
    assert!(outcome.meal.is_none());

    let lunch = at(5, 6, 12, 30);
    let outcome = h.kiosk.validate("1", Some(DINNER), lunch).await.unwrap();
    assert_eq!(outcome.reason, ValidationReason::OutsideWindow);

    let outcome = h.kiosk.validate("1", Some(77), lunch).await.unwrap();
    assert_eq!(outcome.reason, ValidationReason::NoActiveMeal);

    for raw in ["", "abc", "0", "-1", "99999"] {
        let outcome = h.kiosk.validate(raw, None, lunch).await.unwrap();
        assert_eq!(outcome.reason, ValidationReason::InvalidIdentifier, "{:?}", raw);
        assert_eq!(outcome.status, ValidationStatus::Reject);
    }

    let outcome = h.kiosk.validate("99", None, lunch).await.unwrap();
    assert_eq!(outcome.reason, ValidationReason::InvalidIdentifier);
    assert_eq!(outcome.user_id, Some(99));

    assert!(h.store.attendance_rows().await.is_empty());
}

#[tokio::test]
async fn test_window_bounds_are_inclusive() {
    let h = harness(1..=5).await;

    let opens = h.kiosk.validate("1", None, at(5, 6, 11, 0)).await.unwrap();
    assert_eq!(opens.status, ValidationStatus::Accept);

    let closes = h.kiosk.validate("2", None, at(5, 6, 14, 20)).await.unwrap();
    assert_eq!(closes.status, ValidationStatus::Accept);

    let late = h
        .kiosk
        .validate("3", Some(LUNCH), at(5, 6, 14, 21))
        .await
        .unwrap();
    assert_eq!(late.reason, ValidationReason::OutsideWindow);
}

#[tokio::test]
async fn test_record_failure_is_an_error_not_a_reject() {
    let h = harness(1..=5).await;
    h.store.set_fail_writes(true);

    let outcome = h.kiosk.validate("2", None, at(5, 6, 12, 30)).await.unwrap();
    assert_eq!(outcome.status, ValidationStatus::Error);
    assert_eq!(outcome.reason, ValidationReason::RecordFailed);
    assert!(outcome.detail.is_some());
    assert!(h.store.attendance_rows().await.is_empty());
}

#[tokio::test]
async fn test_store_read_failure_propagates() {
    let h = harness(1..=5).await;
    h.store.set_fail_reads(true);

    let result = h.kiosk.validate("2", None, at(5, 6, 12, 30)).await;
    assert!(matches!(result, Err(CoreError::Database(_))));
}

#[tokio::test]
async fn test_daily_absence_arithmetic() {
    let h = harness(1..=100).await;
    let day = date(5, 6);
    for user in 1..=5 {
        h.store.seed_reservation(user, LUNCH, day).await;
    }
    for user in 6..=95 {
        h.store.seed_attendance(user, LUNCH, day).await;
    }
    h.store.seed_reservation(50, DINNER, day).await;

    let report = h.stats.daily_stats(day).await.unwrap();
    assert_eq!(report.total_users, 100);

    let lunch = report.meals.iter().find(|m| m.meal.id == LUNCH).unwrap();
    assert_eq!(lunch.total_users, 100);
    assert_eq!(lunch.canceled, 5);
    assert_eq!(lunch.expected, 95);
    assert_eq!(lunch.present, 90);
    assert_eq!(lunch.absences, 5);
    assert_eq!(lunch.absence_rate, 5.3);

    let breakfast = report.meals.iter().find(|m| m.meal.id == BREAKFAST).unwrap();
    assert_eq!(breakfast.absences, 100);
    assert_eq!(breakfast.absence_rate, 100.0);

    let order: Vec<(i16, i16)> = report
        .cancellations
        .iter()
        .map(|c| (c.meal_id, c.user_id))
        .collect();
    assert_eq!(
        order,
        vec![(LUNCH, 1), (LUNCH, 2), (LUNCH, 3), (LUNCH, 4), (LUNCH, 5), (DINNER, 50)]
    );
    assert_eq!(report.cancellations[5].meal_name, "Dinner");
}

#[tokio::test]
async fn test_absences_never_negative() {
    let h = harness(1..=2).await;
    let day = date(5, 6);
    h.store.seed_reservation(1, LUNCH, day).await;
    h.store.seed_reservation(2, LUNCH, day).await;
    h.store.seed_attendance(1, LUNCH, day).await;

    let report = h.stats.daily_stats(day).await.unwrap();
    let lunch = report.meals.iter().find(|m| m.meal.id == LUNCH).unwrap();
    assert_eq!(lunch.expected, 0);
    assert_eq!(lunch.absences, 0);
    assert_eq!(lunch.absence_rate, 0.0);
}

#[tokio::test]
async fn test_absent_users_sorted() {
    let h = harness([5, 3, 1, 4, 2]).await;
    let day = date(5, 6);
    h.store.seed_reservation(2, LUNCH, day).await;
    h.store.seed_attendance(4, LUNCH, day).await;
    h.store.seed_attendance(5, DINNER, day).await;

    let list = h.stats.absent_users(day, LUNCH).await.unwrap();
    assert_eq!(list.absent_users, vec![1, 3, 5]);
    assert_eq!(list.meal.name, "Lunch");

    let missing = h.stats.absent_users(day, 9).await;
    assert!(matches!(missing, Err(CoreError::NotFound { entity: "Meal", id: 9 })));
}

#[tokio::test]
async fn test_weekly_report_excludes_stale_presence() {
    let h = harness(1..=3).await;
    // Member 1 was scanned at lunch, then the opt-out was recorded
    h.store.seed_attendance(1, LUNCH, date(5, 6)).await;
    h.store.seed_reservation(1, LUNCH, date(5, 6)).await;
    h.store.seed_attendance(2, LUNCH, date(5, 7)).await;
    // Outside the week
    h.store.seed_attendance(3, LUNCH, date(5, 11)).await;

    let report = h.stats.weekly_stats(date(5, 8)).await.unwrap();
    assert_eq!(report.week_start, date(5, 4));
    assert_eq!(report.week_end, date(5, 10));

    let lunch = report.per_meal.iter().find(|m| m.meal.id == LUNCH).unwrap();
    assert_eq!(lunch.expected, 20);
    assert_eq!(lunch.present, 1);
    assert_eq!(lunch.absent, 19);
    assert_eq!(lunch.absence_rate, 95.0);

    let dinner = report.per_meal.iter().find(|m| m.meal.id == DINNER).unwrap();
    assert_eq!(dinner.expected, 21);
    assert_eq!(dinner.absent, 21);

    let top: Vec<(i16, u32)> = report
        .top_absentees
        .iter()
        .map(|a| (a.user_id, a.absences))
        .collect();
    assert_eq!(top, vec![(3, 21), (1, 20), (2, 20)]);
}

#[tokio::test]
async fn test_weekly_top_absentees_capped() {
    let h = harness(1..=60).await;
    let report = h.stats.weekly_stats(date(5, 8)).await.unwrap();

    assert_eq!(report.top_absentees.len(), 50);
    assert_eq!(report.top_absentees[0].user_id, 1);
    assert_eq!(report.top_absentees[49].user_id, 50);
    assert!(report.top_absentees.iter().all(|a| a.absences == 21));
}
