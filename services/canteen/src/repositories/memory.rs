//! In-memory implementation of every store port
//!
//! Backs the test-suite and local demos. A single lock guards all tables, so
//! a batch is applied entirely or not at all, and the keyed maps give the
//! same per-(user, meal, day) uniqueness the PostgreSQL constraints do.
//! Writes (and optionally reads) can be switched to fail to exercise error
//! paths.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use common::error::{DatabaseError, DatabaseResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::{
    AttendanceRepository, MealRepository, ReservationRepository, StaffRepository, TogglePlanner,
    UserRepository,
};
use crate::models::{
    Attendance, DateRange, InsertOutcome, KIOSK_SOURCE, Meal, MealId, NewAttendance, Reservation,
    Slot, StaffAccount, StaffRole, TogglePlan, User, UserId,
};

type SlotKey = (UserId, MealId, NaiveDate);

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    meals: BTreeMap<MealId, Meal>,
    reservations: BTreeMap<SlotKey, Reservation>,
    attendance: BTreeMap<SlotKey, Attendance>,
    admins: HashMap<String, StaffAccount>,
    validators: HashMap<String, StaffAccount>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_reservation(
        &mut self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> Reservation {
        if let Some(existing) = self.reservations.get(&(user_id, meal_id, date)) {
            return existing.clone();
        }
        let reservation = Reservation {
            id: self.next_id(),
            user_id,
            meal_id,
            date,
            created_at: Utc::now(),
        };
        self.reservations
            .insert((user_id, meal_id, date), reservation.clone());
        reservation
    }

    fn insert_attendance(&mut self, new: &NewAttendance) -> InsertOutcome {
        let key = (new.user_id, new.meal_id, new.date);
        if self.attendance.contains_key(&key) {
            return InsertOutcome::AlreadyPresent;
        }
        let attendance = Attendance {
            id: self.next_id(),
            user_id: new.user_id,
            meal_id: new.meal_id,
            date: new.date,
            validated_at: new.validated_at,
            source: new.source.clone(),
        };
        self.attendance.insert(key, attendance);
        InsertOutcome::Inserted
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `DatabaseError::Unavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail with `DatabaseError::Unavailable`
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_write(&self) -> DatabaseResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> DatabaseResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    pub async fn add_user(&self, id: UserId, pin_hash: Option<String>) {
        let pin_set_at = pin_hash.as_ref().map(|_| Utc::now());
        self.tables.lock().await.users.insert(
            id,
            User {
                id,
                pin_hash,
                pin_set_at,
            },
        );
    }

    pub async fn add_users(&self, ids: impl IntoIterator<Item = UserId>) {
        for id in ids {
            self.add_user(id, None).await;
        }
    }

    pub async fn add_meal(&self, id: MealId, name: &str, scheduled_time: NaiveTime) {
        self.tables.lock().await.meals.insert(
            id,
            Meal {
                id,
                name: name.to_string(),
                scheduled_time,
            },
        );
    }

    pub async fn add_admin(&self, username: &str, password_hash: &str) {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.admins.insert(
            username.to_string(),
            StaffAccount {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                role: StaffRole::Admin,
                active: true,
            },
        );
    }

    pub async fn add_validator(&self, username: &str, password_hash: &str, active: bool) {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        tables.validators.insert(
            username.to_string(),
            StaffAccount {
                id,
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                role: StaffRole::Validator,
                active,
            },
        );
    }

    /// Insert an opt-out directly, ignoring the failure switches
    pub async fn seed_reservation(&self, user_id: UserId, meal_id: MealId, date: NaiveDate) {
        self.tables
            .lock()
            .await
            .insert_reservation(user_id, meal_id, date);
    }

    /// Insert a kiosk attendance row directly, ignoring the failure switches
    pub async fn seed_attendance(&self, user_id: UserId, meal_id: MealId, date: NaiveDate) {
        self.tables.lock().await.insert_attendance(&NewAttendance {
            user_id,
            meal_id,
            date,
            validated_at: Utc::now(),
            source: KIOSK_SOURCE.to_string(),
        });
    }

    /// Every opt-out currently stored, ordered by (user, meal, day)
    pub async fn reservation_keys(&self) -> Vec<(UserId, MealId, NaiveDate)> {
        self.tables.lock().await.reservations.keys().copied().collect()
    }

    /// Every attendance row currently stored, ordered by (user, meal, day)
    pub async fn attendance_rows(&self) -> Vec<Attendance> {
        self.tables.lock().await.attendance.values().cloned().collect()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn get_user(&self, id: UserId) -> DatabaseResult<Option<User>> {
        self.check_read()?;
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn list_user_ids(&self) -> DatabaseResult<BTreeSet<UserId>> {
        self.check_read()?;
        Ok(self.tables.lock().await.users.keys().copied().collect())
    }
}

#[async_trait]
impl MealRepository for MemoryStore {
    async fn list_meals(&self) -> DatabaseResult<Vec<Meal>> {
        self.check_read()?;
        Ok(self.tables.lock().await.meals.values().cloned().collect())
    }

    async fn get_meal(&self, id: MealId) -> DatabaseResult<Option<Meal>> {
        self.check_read()?;
        Ok(self.tables.lock().await.meals.get(&id).cloned())
    }
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Reservation>> {
        self.check_read()?;
        Ok(self
            .tables
            .lock()
            .await
            .reservations
            .get(&(user_id, meal_id, date))
            .cloned())
    }

    async fn find_by_user(
        &self,
        user_id: UserId,
        range: &DateRange,
    ) -> DatabaseResult<Vec<Reservation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| r.user_id == user_id && range.contains(r.date))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.date, r.meal_id));
        Ok(rows)
    }

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Reservation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| r.date == date)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.meal_id, r.user_id));
        Ok(rows)
    }

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Reservation>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| range.contains(r.date))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.date, r.meal_id, r.user_id));
        Ok(rows)
    }

    async fn insert(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Reservation> {
        self.check_write()?;
        Ok(self
            .tables
            .lock()
            .await
            .insert_reservation(user_id, meal_id, date))
    }

    async fn delete(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<bool> {
        self.check_write()?;
        Ok(self
            .tables
            .lock()
            .await
            .reservations
            .remove(&(user_id, meal_id, date))
            .is_some())
    }

    async fn reconcile(
        &self,
        user_id: UserId,
        range: &DateRange,
        planner: &TogglePlanner<'_>,
    ) -> DatabaseResult<TogglePlan> {
        self.check_read()?;
        // Held from the read through the write
        let mut tables = self.tables.lock().await;

        let canceled: BTreeSet<Slot> = tables
            .reservations
            .values()
            .filter(|r| r.user_id == user_id && range.contains(r.date))
            .map(|r| r.slot())
            .collect();

        let plan = planner(&canceled);
        if plan.batch.is_empty() {
            return Ok(plan);
        }

        self.check_write()?;
        for slot in &plan.batch.deletes {
            tables.reservations.remove(&(user_id, slot.meal_id, slot.date));
        }
        for slot in &plan.batch.inserts {
            tables.insert_reservation(user_id, slot.meal_id, slot.date);
        }
        Ok(plan)
    }
}

#[async_trait]
impl AttendanceRepository for MemoryStore {
    async fn find(
        &self,
        user_id: UserId,
        meal_id: MealId,
        date: NaiveDate,
    ) -> DatabaseResult<Option<Attendance>> {
        self.check_read()?;
        Ok(self
            .tables
            .lock()
            .await
            .attendance
            .get(&(user_id, meal_id, date))
            .cloned())
    }

    async fn find_by_date(&self, date: NaiveDate) -> DatabaseResult<Vec<Attendance>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Attendance> = tables
            .attendance
            .values()
            .filter(|a| a.date == date)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.meal_id, a.user_id));
        Ok(rows)
    }

    async fn find_in_range(&self, range: &DateRange) -> DatabaseResult<Vec<Attendance>> {
        self.check_read()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Attendance> = tables
            .attendance
            .values()
            .filter(|a| range.contains(a.date))
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.date, a.meal_id, a.user_id));
        Ok(rows)
    }

    async fn insert(&self, attendance: &NewAttendance) -> DatabaseResult<InsertOutcome> {
        self.check_write()?;
        Ok(self.tables.lock().await.insert_attendance(attendance))
    }
}

#[async_trait]
impl StaffRepository for MemoryStore {
    async fn find_admin(&self, username: &str) -> DatabaseResult<Option<StaffAccount>> {
        self.check_read()?;
        Ok(self.tables.lock().await.admins.get(username).cloned())
    }

    async fn find_validator(&self, username: &str) -> DatabaseResult<Option<StaffAccount>> {
        self.check_read()?;
        Ok(self.tables.lock().await.validators.get(username).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReservationBatch;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    #[tokio::test]
    async fn test_reservation_insert_is_unique_per_slot() {
        let store = MemoryStore::new();
        let first = ReservationRepository::insert(&store, 1, 2, date(6)).await.unwrap();
        let second = ReservationRepository::insert(&store, 1, 2, date(6)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.reservation_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_trace() {
        let store = MemoryStore::new();
        store.seed_reservation(1, 1, date(6)).await;
        store.set_fail_writes(true);

        let planner = |canceled: &BTreeSet<Slot>| {
            assert_eq!(canceled, &BTreeSet::from([Slot::new(date(6), 1)]));
            TogglePlan {
                batch: ReservationBatch {
                    inserts: vec![Slot::new(date(7), 1)],
                    deletes: vec![Slot::new(date(6), 1)],
                },
                skipped_locked: 0,
            }
        };
        let range = DateRange::new(date(6), date(7)).unwrap();
        let result = store.reconcile(1, &range, &planner).await;

        assert!(matches!(result, Err(DatabaseError::Unavailable(_))));
        assert_eq!(store.reservation_keys().await, vec![(1, 1, date(6))]);
    }

    #[tokio::test]
    async fn test_reconcile_plans_against_range_only() {
        let store = MemoryStore::new();
        store.seed_reservation(1, 1, date(5)).await;
        store.seed_reservation(1, 1, date(6)).await;
        store.seed_reservation(2, 1, date(6)).await;

        let range = DateRange::single(date(6));
        let planner = |canceled: &BTreeSet<Slot>| TogglePlan {
            batch: ReservationBatch {
                inserts: Vec::new(),
                deletes: canceled.iter().copied().collect(),
            },
            skipped_locked: 0,
        };
        let plan = store.reconcile(1, &range, &planner).await.unwrap();

        assert_eq!(plan.batch.deletes, vec![Slot::new(date(6), 1)]);
        assert_eq!(
            store.reservation_keys().await,
            vec![(1, 1, date(5)), (2, 1, date(6))]
        );
    }

    #[tokio::test]
    async fn test_attendance_insert_reports_existing_row() {
        let store = MemoryStore::new();
        let new = NewAttendance {
            user_id: 3,
            meal_id: 1,
            date: date(6),
            validated_at: Utc::now(),
            source: KIOSK_SOURCE.to_string(),
        };

        let first = AttendanceRepository::insert(&store, &new).await.unwrap();
        let second = AttendanceRepository::insert(&store, &new).await.unwrap();

        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::AlreadyPresent);
        assert_eq!(store.attendance_rows().await.len(), 1);
    }
}
