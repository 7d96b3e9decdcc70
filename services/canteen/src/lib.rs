//! Canteen attendance service
//!
//! Members opt out of upcoming meals, a kiosk validates physical attendance
//! around each meal, and administrators read daily and weekly absence
//! statistics. The engines work against the store traits in
//! [`repositories`], backed by PostgreSQL in production and by
//! [`repositories::MemoryStore`] in tests.

pub mod config;
pub mod credentials;
pub mod error;
pub mod kiosk;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod rate_limiter;
pub mod reconcile;
pub mod repositories;
pub mod routes;
pub mod session;
pub mod state;
pub mod stats;
pub mod validation;

pub use config::Settings;
pub use error::{ApiError, CoreError};
pub use state::{AppState, Stores};
