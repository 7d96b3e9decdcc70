//! Application state shared across handlers

use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    config::Settings,
    kiosk::KioskValidator,
    policy::WindowPolicy,
    rate_limiter::RateLimiter,
    reconcile::ReconciliationEngine,
    repositories::{
        AttendanceRepository, MealRepository, MemoryStore, PgAttendanceRepository,
        PgMealRepository, PgReservationRepository, PgStaffRepository, PgUserRepository,
        ReservationRepository, StaffRepository, UserRepository,
    },
    session::SessionService,
    stats::StatisticsEngine,
};

/// The stores the engines run against
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub meals: Arc<dyn MealRepository>,
    pub reservations: Arc<dyn ReservationRepository>,
    pub attendance: Arc<dyn AttendanceRepository>,
    pub staff: Arc<dyn StaffRepository>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            users: Arc::new(PgUserRepository::new(pool.clone())),
            meals: Arc::new(PgMealRepository::new(pool.clone())),
            reservations: Arc::new(PgReservationRepository::new(pool.clone())),
            attendance: Arc::new(PgAttendanceRepository::new(pool.clone())),
            staff: Arc::new(PgStaffRepository::new(pool)),
        }
    }

    /// Every store backed by the same in-memory tables
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            meals: store.clone(),
            reservations: store.clone(),
            attendance: store.clone(),
            staff: store,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub policy: WindowPolicy,
    pub users: Arc<dyn UserRepository>,
    pub staff: Arc<dyn StaffRepository>,
    pub sessions: SessionService,
    pub rate_limiter: RateLimiter,
    pub reconciler: ReconciliationEngine,
    pub kiosk: KioskValidator,
    pub stats: StatisticsEngine,
}

impl AppState {
    pub fn new(settings: Settings, stores: Stores) -> Self {
        let policy = WindowPolicy::new(&settings.policy);
        let sessions = SessionService::new(&settings.session);
        let rate_limiter = RateLimiter::new(settings.rate_limit.clone());

        let reconciler = ReconciliationEngine::new(
            stores.users.clone(),
            stores.meals.clone(),
            stores.reservations.clone(),
            policy,
        );
        let kiosk = KioskValidator::new(
            stores.users.clone(),
            stores.meals.clone(),
            stores.reservations.clone(),
            stores.attendance.clone(),
            policy,
        );
        let stats = StatisticsEngine::new(
            stores.users.clone(),
            stores.meals.clone(),
            stores.reservations.clone(),
            stores.attendance.clone(),
            settings.policy.week_start,
        );

        Self {
            settings: Arc::new(settings),
            policy,
            users: stores.users,
            staff: stores.staff,
            sessions,
            rate_limiter,
            reconciler,
            kiosk,
            stats,
        }
    }
}
