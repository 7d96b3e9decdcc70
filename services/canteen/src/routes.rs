//! HTTP routes

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{error, info, warn};

use crate::{
    credentials::{verify_pin, verify_staff},
    error::{ApiError, ApiResult, CoreError},
    kiosk::ValidationStatus,
    middleware::{MemberSession, SESSION_TOKEN_HEADER, admin_auth, member_auth, staff_auth},
    models::{DateRange, Meal, MealId, Slot, StaffAccount, UserId},
    reconcile::{ReservationMatrix, ToggleSummary},
    state::AppState,
    validation::{parse_user_id, validate_pin, validate_username},
};

/// Create the router for the canteen service
pub fn create_router(state: AppState) -> Router {
    let member_routes = Router::new()
        .route("/reservations", get(get_reservations).put(put_reservations))
        .route_layer(middleware::from_fn_with_state(state.clone(), member_auth));

    let kiosk_routes = Router::new()
        .route("/kiosk/current", get(kiosk_current))
        .route("/kiosk/validate", post(kiosk_validate))
        .route_layer(middleware::from_fn_with_state(state.clone(), staff_auth));

    let admin_routes = Router::new()
        .route("/admin/daily", get(admin_daily))
        .route("/admin/absences", get(admin_absences))
        .route("/admin/weekly", get(admin_weekly))
        .route("/admin/reservations", delete(admin_remove_reservation))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/pin", post(login_pin))
        .route("/auth/staff", post(login_staff))
        .route("/check", get(check_attendance))
        .merge(member_routes)
        .merge(kiosk_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "canteen"
    }))
}

#[derive(Debug, Deserialize)]
pub struct PinLoginRequest {
    /// Member number as typed
    pub user_id: String,
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct MemberLoginResponse {
    pub token: String,
    pub user_id: UserId,
    pub expires_in: u64,
}

/// Member login with member number and PIN
pub async fn login_pin(
    State(state): State<AppState>,
    Json(payload): Json<PinLoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let user_id = parse_user_id(&payload.user_id)?;
    validate_pin(&payload.pin)?;

    let key = format!("pin:{}", user_id);
    if !state.rate_limiter.is_allowed(&key).await {
        return Err(ApiError::TooManyRequests);
    }

    let verified = match state.users.get_user(user_id).await.map_err(CoreError::from)? {
        Some(user) => verify_pin(&user, &payload.pin).map_err(|e| {
            error!("Failed to verify PIN for user {}: {}", user_id, e);
            ApiError::InternalServerError
        })?,
        None => false,
    };

    if !verified {
        state.rate_limiter.record_failure(&key).await;
        warn!("Failed PIN login for user {}", user_id);
        return Err(ApiError::Unauthorized);
    }
    state.rate_limiter.reset(&key).await;

    let token = state.sessions.issue_member(user_id).map_err(|e| {
        error!("Failed to issue session for user {}: {}", user_id, e);
        ApiError::InternalServerError
    })?;
    info!("User {} logged in", user_id);

    Ok((
        [(SESSION_TOKEN_HEADER, token.clone())],
        Json(MemberLoginResponse {
            token,
            user_id,
            expires_in: state.sessions.member_ttl(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct StaffLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct StaffLoginResponse {
    pub token: String,
    pub username: String,
    pub role: &'static str,
    pub expires_in: u64,
}

async fn authenticate_staff(
    state: &AppState,
    username: &str,
    password: &str,
) -> ApiResult<Option<StaffAccount>> {
    let candidates = [
        state.staff.find_admin(username).await,
        state.staff.find_validator(username).await,
    ];

    for candidate in candidates {
        let Some(account) = candidate.map_err(CoreError::from)? else {
            continue;
        };
        let verified = verify_staff(&account, password).map_err(|e| {
            error!("Failed to verify password for {}: {}", username, e);
            ApiError::InternalServerError
        })?;
        if verified {
            return Ok(Some(account));
        }
    }

    Ok(None)
}

/// Staff login; admins are checked before validators
pub async fn login_staff(
    State(state): State<AppState>,
    Json(payload): Json<StaffLoginRequest>,
) -> ApiResult<Json<StaffLoginResponse>> {
    let username = payload.username.trim();
    validate_username(username)?;

    let key = format!("staff:{}", username);
    if !state.rate_limiter.is_allowed(&key).await {
        return Err(ApiError::TooManyRequests);
    }

    let Some(account) = authenticate_staff(&state, username, &payload.password).await? else {
        state.rate_limiter.record_failure(&key).await;
        warn!("Failed staff login for {}", username);
        return Err(ApiError::Unauthorized);
    };
    state.rate_limiter.reset(&key).await;

    let token = state.sessions.issue_staff(&account).map_err(|e| {
        error!("Failed to issue session for {}: {}", username, e);
        ApiError::InternalServerError
    })?;
    info!("{} {} logged in", account.role.as_str(), account.username);

    Ok(Json(StaffLoginResponse {
        token,
        username: account.username,
        role: account.role.as_str(),
        expires_in: state.sessions.staff_ttl(),
    }))
}

/// Member range, defaulting to the full booking horizon from today
fn member_range(
    state: &AppState,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> ApiResult<DateRange> {
    // Members may only see and edit today through the booking horizon
    let bookable = DateRange::starting_at(
        state.policy.today(now),
        state.settings.policy.horizon_days,
    );
    let range = DateRange::new(
        start.unwrap_or(bookable.start),
        end.unwrap_or(bookable.end),
    )?;
    if !bookable.contains(range.start) || !bookable.contains(range.end) {
        return Err(ApiError::BadRequest(format!(
            "Range must lie within {} .. {}",
            bookable.start, bookable.end
        )));
    }
    Ok(range)
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct MatrixCell {
    pub meal_id: MealId,
    pub canceled: bool,
    pub locked: bool,
}

#[derive(Debug, Serialize)]
pub struct MatrixDay {
    pub date: NaiveDate,
    pub meals: Vec<MatrixCell>,
}

#[derive(Debug, Serialize)]
pub struct MatrixResponse {
    pub user_id: UserId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub meals: Vec<Meal>,
    pub days: Vec<MatrixDay>,
}

impl From<ReservationMatrix> for MatrixResponse {
    fn from(matrix: ReservationMatrix) -> Self {
        let days = matrix
            .days()
            .into_iter()
            .map(|date| MatrixDay {
                date,
                meals: matrix
                    .meals
                    .iter()
                    .map(|meal| {
                        let slot = Slot::new(date, meal.id);
                        MatrixCell {
                            meal_id: meal.id,
                            canceled: matrix.is_canceled(&slot),
                            locked: matrix.is_locked(&slot),
                        }
                    })
                    .collect(),
            })
            .collect();

        MatrixResponse {
            user_id: matrix.user_id,
            start: matrix.range.start,
            end: matrix.range.end,
            meals: matrix.meals,
            days,
        }
    }
}

/// The member's opt-out grid
pub async fn get_reservations(
    State(state): State<AppState>,
    Extension(member): Extension<MemberSession>,
    Query(query): Query<RangeQuery>,
) -> ApiResult<Json<MatrixResponse>> {
    let now = Utc::now();
    let range = member_range(&state, query.start, query.end, now)?;
    let matrix = state
        .reconciler
        .get_matrix(member.user_id, range, now)
        .await?;
    Ok(Json(matrix.into()))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    /// Slots the member wants to attend; every other slot in range is an opt-out
    #[serde(default)]
    pub attend: Vec<Slot>,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub summary: ToggleSummary,
    pub matrix: MatrixResponse,
}

/// Replace the member's attendance choices over a range
pub async fn put_reservations(
    State(state): State<AppState>,
    Extension(member): Extension<MemberSession>,
    Json(payload): Json<ToggleRequest>,
) -> ApiResult<Json<ToggleResponse>> {
    let now = Utc::now();
    let range = member_range(&state, payload.start, payload.end, now)?;
    let desired: BTreeSet<Slot> = payload.attend.into_iter().collect();

    let summary = state
        .reconciler
        .apply_toggles(member.user_id, range, &desired, now)
        .await?;
    let matrix = state
        .reconciler
        .get_matrix(member.user_id, range, now)
        .await?;

    Ok(Json(ToggleResponse {
        summary,
        matrix: matrix.into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub user_id: String,
    pub meal_id: Option<MealId>,
}

/// Whether a member is attending a meal today; records nothing
pub async fn check_attendance(
    State(state): State<AppState>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let user_id = parse_user_id(&query.user_id)?;
    let meal_id = match query.meal_id {
        Some(id) => id,
        None => match state.kiosk.current_meal(now).await? {
            Some(meal) => meal.id,
            None => return Err(ApiError::BadRequest("No active meal".to_string())),
        },
    };

    let outcome = state.kiosk.check(user_id, meal_id, now).await?;
    Ok(Json(outcome))
}

/// The meal currently open for validation
pub async fn kiosk_current(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let now = Utc::now();
    let meal = state.kiosk.current_meal(now).await?;
    Ok(Json(json!({
        "day": state.policy.today(now),
        "meal": meal,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    /// Member number as scanned or typed
    pub user_id: String,
    pub meal_id: Option<MealId>,
}

/// Validate a member at the kiosk
pub async fn kiosk_validate(
    State(state): State<AppState>,
    Json(payload): Json<ValidateRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .kiosk
        .validate(&payload.user_id, payload.meal_id, Utc::now())
        .await?;

    let status = match outcome.status {
        ValidationStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
        ValidationStatus::Accept | ValidationStatus::Reject => StatusCode::OK,
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: Option<NaiveDate>,
}

/// Daily dashboard
pub async fn admin_daily(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> ApiResult<impl IntoResponse> {
    let day = query.date.unwrap_or_else(|| state.policy.today(Utc::now()));
    let report = state.stats.daily_stats(day).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct AbsenceQuery {
    pub date: Option<NaiveDate>,
    pub meal_id: MealId,
}

/// Members who were expected at a meal but never validated
pub async fn admin_absences(
    State(state): State<AppState>,
    Query(query): Query<AbsenceQuery>,
) -> ApiResult<impl IntoResponse> {
    let day = query.date.unwrap_or_else(|| state.policy.today(Utc::now()));
    let list = state.stats.absent_users(day, query.meal_id).await?;
    Ok(Json(list))
}

/// Weekly report for the week containing `date`
pub async fn admin_weekly(
    State(state): State<AppState>,
    Query(query): Query<DayQuery>,
) -> ApiResult<impl IntoResponse> {
    let anchor = query.date.unwrap_or_else(|| state.policy.today(Utc::now()));
    let report = state.stats.weekly_stats(anchor).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct RemoveReservationRequest {
    pub user_id: UserId,
    pub meal_id: MealId,
    pub date: NaiveDate,
}

/// Remove one member opt-out
pub async fn admin_remove_reservation(
    State(state): State<AppState>,
    Json(payload): Json<RemoveReservationRequest>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .reconciler
        .remove_reservation(payload.user_id, payload.meal_id, payload.date)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}
