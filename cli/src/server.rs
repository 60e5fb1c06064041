use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{Local, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use runzen_core::auth::{self, TokenIssuer};
use runzen_core::models::{
    Circle, GoalsUpdate, JoinOutcome, NewRun, NewStepEntry, NewWeightEntry, RunFilter, RunUpdate,
    Scope, TRACKING_EPOCH_YEAR, User, normalize_invite_code, parse_timestamp, validate_category,
    validate_circle_name, validate_duration, validate_email, validate_goals, validate_handle,
    validate_password, validate_run_type, validate_step_count, validate_weight, validate_week_id,
};
use runzen_core::records::PrCheck;
use runzen_core::service::{CircleAccess, RunView, TrackerService};

const BODY_LIMIT: usize = 1024 * 1024; // 1 MiB
const REVIEW_YEARS: RangeInclusive<i32> = TRACKING_EPOCH_YEAR..=9999;

#[derive(Clone)]
struct AppState {
    tracker: Arc<Mutex<TrackerService>>,
    tokens: Arc<TokenIssuer>,
    password_cost: u32,
}

impl AppState {
    fn new(tracker: TrackerService, tokens: TokenIssuer) -> Self {
        let password_cost = tracker.password_cost();
        Self {
            tracker: Arc::new(Mutex::new(tracker)),
            tokens: Arc::new(tokens),
            password_cost,
        }
    }

    fn tracker(&self) -> MutexGuard<'_, TrackerService> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wall-clock time in the server's local zone, whole seconds.
fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct SignupRequest {
    email: String,
    password: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    access_token: String,
    token_type: &'static str,
    user: User,
}

#[derive(Deserialize)]
struct HandleRequest {
    handle: String,
}

#[derive(Deserialize)]
struct CreateRunRequest {
    run_type: String,
    duration_seconds: i64,
    notes: Option<String>,
    category: Option<String>,
    completed_at: Option<String>,
}

#[derive(Deserialize)]
struct UpdateRunRequest {
    run_type: Option<String>,
    duration_seconds: Option<i64>,
    notes: Option<String>,
    category: Option<String>,
}

#[derive(Deserialize)]
struct RunListQuery {
    #[serde(default)]
    skip: i64,
    #[serde(default = "default_limit")]
    limit: i64,
    run_type: Option<String>,
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Serialize)]
struct RunCreated {
    #[serde(flatten)]
    run: RunView,
    is_personal_best: bool,
    pr_type: Option<String>,
    personal_best: Option<PrCheck>,
}

#[derive(Deserialize)]
struct PlanRequest {
    week_id: String,
    planned_runs: Vec<String>,
}

#[derive(Deserialize)]
struct MonthQuery {
    year: Option<i32>,
    month: Option<u32>,
}

#[derive(Deserialize)]
struct CreateWeightRequest {
    weight_lbs: f64,
    recorded_at: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct CreateStepsRequest {
    step_count: i64,
    recorded_date: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct CreateCircleRequest {
    name: String,
}

#[derive(Deserialize)]
struct JoinCircleRequest {
    #[serde(default)]
    invite_code: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => {
                let mut response =
                    (StatusCode::UNAUTHORIZED, Json(ErrorResponse { error: msg })).into_response();
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return response;
            }
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err}"))
}

fn timestamp_or_now(input: Option<&str>) -> Result<NaiveDateTime, ApiError> {
    input.map_or_else(|| Ok(now()), |s| parse_timestamp(s).map_err(|e| bad_request(&e)))
}

// --- Identity ---

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The account behind the request's bearer token, if any. Missing, invalid
/// and expired tokens all resolve to an anonymous caller.
struct Caller(Option<User>);

impl Caller {
    fn scope(&self) -> Scope {
        self.0.as_ref().map_or(Scope::Anonymous, |u| Scope::User(u.id))
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let Some(claims) = bearer_token(parts).and_then(|t| state.tokens.verify(t)) else {
            return Ok(Self(None));
        };
        let user = state
            .tracker()
            .user_by_email(&claims.sub)
            .context("failed to resolve caller")?;
        Ok(Self(user.filter(|u| u.is_active)))
    }
}

/// A caller that must be signed in.
struct AuthUser(User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        match Caller::from_request_parts(parts, state).await? {
            Caller(Some(user)) => Ok(Self(user)),
            Caller(None) => Err(ApiError::Unauthorized(
                "Could not validate credentials".to_string(),
            )),
        }
    }
}

// --- Middleware ---

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Auth & profile handlers ---

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "message": "Welcome to the runzen API",
        "version": env!("CARGO_PKG_VERSION"),
        "health": "OK",
    }))
}

fn auth_response(state: &AppState, user: User) -> Result<AuthResponse, ApiError> {
    let access_token = state.tokens.issue(&user.email, Utc::now())?;
    Ok(AuthResponse {
        access_token,
        token_type: "bearer",
        user,
    })
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let email = validate_email(&req.email).map_err(|e| bad_request(&e))?;
    validate_password(&req.password).map_err(|e| bad_request(&e))?;
    if state.tracker().user_by_email(&email)?.is_some() {
        return Err(ApiError::BadRequest("Email already registered".to_string()));
    }

    let cost = state.password_cost;
    let password = req.password;
    let hash = tokio::task::spawn_blocking(move || auth::hash_password(&password, cost))
        .await
        .context("password hashing task failed")??;

    let user = state
        .tracker()
        .register_hashed(&email, &hash, req.name.as_deref(), now())?
        .ok_or_else(|| ApiError::BadRequest("Email already registered".to_string()))?;
    Ok((StatusCode::CREATED, Json(auth_response(&state, user)?)))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());
    let user = state
        .tracker()
        .user_by_email(&req.email)?
        .filter(|u| u.is_active)
        .ok_or_else(invalid)?;

    let password = req.password;
    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hash))
        .await
        .context("password verification task failed")?;
    if !matches {
        return Err(invalid());
    }
    Ok(Json(auth_response(&state, user)?))
}

async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

async fn get_goals(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let goals = state.tracker().goals(user.id)?;
    Ok(Json(serde_json::to_value(goals).context("serialize goals")?))
}

async fn set_goals(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(update): Json<GoalsUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_goals(&update).map_err(|e| bad_request(&e))?;
    let goals = state.tracker().set_goals(user.id, &update, now())?;
    Ok(Json(json!({ "message": "Goals saved", "goals": goals })))
}

async fn complete_onboarding(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.tracker().complete_onboarding(user.id)?;
    Ok(Json(json!({ "message": "Onboarding complete", "onboarding_complete": true })))
}

async fn set_handle(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<HandleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = validate_handle(&req.handle).map_err(|e| bad_request(&e))?;
    if !state.tracker().set_handle(user.id, &handle)? {
        return Err(ApiError::BadRequest("This handle is already taken".to_string()));
    }
    Ok(Json(json!({ "message": "Handle set", "handle": handle })))
}

async fn check_handle(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = handle.trim().to_lowercase();
    let available = state.tracker().handle_available(&handle)?;
    Ok(Json(json!({ "handle": handle, "available": available })))
}

// --- Run handlers ---

async fn create_run(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateRunRequest>,
) -> Result<(StatusCode, Json<RunCreated>), ApiError> {
    let run_type = validate_run_type(&req.run_type).map_err(|e| bad_request(&e))?;
    validate_duration(req.duration_seconds).map_err(|e| bad_request(&e))?;
    let category = req
        .category
        .as_deref()
        .map(validate_category)
        .transpose()
        .map_err(|e| bad_request(&e))?
        .unwrap_or_default();
    let completed_at = timestamp_or_now(req.completed_at.as_deref())?;

    let logged = state.tracker().log_run(
        caller.scope(),
        &NewRun {
            run_type,
            duration_seconds: req.duration_seconds,
            notes: req.notes,
            category,
            completed_at,
        },
    )?;

    let is_personal_best = logged.personal_best.is_some();
    let created = RunCreated {
        run: RunView::from(&logged.run),
        is_personal_best,
        pr_type: is_personal_best.then(|| PrCheck::pr_type(&logged.run.run_type)),
        personal_best: logged.personal_best,
    };
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_runs(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<RunListQuery>,
) -> Result<Json<Vec<RunView>>, ApiError> {
    let run_type = params
        .run_type
        .as_deref()
        .map(validate_run_type)
        .transpose()
        .map_err(|e| bad_request(&e))?;
    let filter = RunFilter {
        skip: params.skip,
        limit: params.limit,
        run_type: run_type.map(|t| t.label().to_string()),
    };
    let runs = state.tracker().list_runs(caller.scope(), &filter)?;
    Ok(Json(runs.iter().map(RunView::from).collect()))
}

async fn get_run(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<RunView>, ApiError> {
    let run = state
        .tracker()
        .get_run(caller.scope(), id)?
        .ok_or_else(|| ApiError::NotFound("Run not found".to_string()))?;
    Ok(Json(RunView::from(&run)))
}

async fn update_run(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRunRequest>,
) -> Result<Json<RunView>, ApiError> {
    let run_type = req
        .run_type
        .as_deref()
        .map(validate_run_type)
        .transpose()
        .map_err(|e| bad_request(&e))?;
    if let Some(d) = req.duration_seconds {
        validate_duration(d).map_err(|e| bad_request(&e))?;
    }
    let category = req
        .category
        .as_deref()
        .map(validate_category)
        .transpose()
        .map_err(|e| bad_request(&e))?;

    let update = RunUpdate {
        run_type,
        duration_seconds: req.duration_seconds,
        notes: req.notes,
        category,
    };
    let run = state
        .tracker()
        .update_run(caller.scope(), id, &update)?
        .ok_or_else(|| ApiError::NotFound("Run not found".to_string()))?;
    Ok(Json(RunView::from(&run)))
}

async fn delete_run(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tracker().delete_run(caller.scope(), id)? {
        Ok(Json(json!({ "message": "Run deleted successfully" })))
    } else {
        Err(ApiError::NotFound("Run not found".to_string()))
    }
}

// --- Weekly plan handlers ---

async fn save_plan(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<PlanRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_week_id(&req.week_id).map_err(|e| bad_request(&e))?;
    let planned = req
        .planned_runs
        .iter()
        .map(|label| validate_run_type(label).map(|t| t.label().to_string()))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| bad_request(&e))?;
    let plan = state
        .tracker()
        .save_plan(caller.scope(), &req.week_id, &planned, now())?;
    Ok(Json(serde_json::to_value(plan).context("serialize plan")?))
}

async fn current_plan(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    let week_id = TrackerService::current_week_id(now());
    let plan = state
        .tracker()
        .plan(caller.scope(), &week_id)?
        .ok_or_else(|| ApiError::NotFound("No plan for this week".to_string()))?;
    Ok(Json(serde_json::to_value(plan).context("serialize plan")?))
}

async fn get_plan(
    State(state): State<AppState>,
    caller: Caller,
    Path(week_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_week_id(&week_id).map_err(|e| bad_request(&e))?;
    let plan = state
        .tracker()
        .plan(caller.scope(), &week_id)?
        .ok_or_else(|| ApiError::NotFound("Plan not found".to_string()))?;
    Ok(Json(serde_json::to_value(plan).context("serialize plan")?))
}

// --- Stats handlers ---

fn to_json<T: Serialize>(value: &T) -> Result<Json<serde_json::Value>, ApiError> {
    Ok(Json(serde_json::to_value(value).context("failed to serialize response")?))
}

async fn stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().stats_summary(caller.scope(), now())?)
}

async fn motivation(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message = state
        .tracker()
        .motivation(caller.scope(), &mut rand::rng())?;
    to_json(&message)
}

async fn streak(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().streak_progress(caller.scope(), now())?)
}

async fn personal_records(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().personal_records(caller.scope())?)
}

async fn goals_progress(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().goals_progress(caller.scope(), now())?)
}

async fn achievements(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().achievements(caller.scope(), now())?)
}

async fn month_review(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<MonthQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let month = match (params.year, params.month) {
        (None, None) => None,
        (Some(year), Some(_)) if !REVIEW_YEARS.contains(&year) => {
            return Err(ApiError::BadRequest(format!(
                "year must be between {} and {}",
                REVIEW_YEARS.start(),
                REVIEW_YEARS.end()
            )));
        }
        (Some(year), Some(month)) if (1..=12).contains(&month) => Some((year, month)),
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "month must be between 1 and 12".to_string(),
            ));
        }
        _ => {
            return Err(ApiError::BadRequest(
                "year and month must be given together".to_string(),
            ));
        }
    };
    match state.tracker().month_review(caller.scope(), month, now())? {
        Some(review) => to_json(&review),
        None => Ok(Json(json!({ "available": false }))),
    }
}

// --- Weight handlers ---

async fn create_weight(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateWeightRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    validate_weight(req.weight_lbs).map_err(|e| bad_request(&e))?;
    let recorded_at = timestamp_or_now(req.recorded_at.as_deref())?;
    let entry = state.tracker().log_weight(
        caller.scope(),
        &NewWeightEntry {
            weight_lbs: req.weight_lbs,
            recorded_at,
            notes: req.notes,
        },
    )?;
    Ok((StatusCode::CREATED, to_json(&entry)?))
}

async fn list_weights(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().list_weights(caller.scope(), params.limit)?)
}

async fn delete_weight(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tracker().delete_weight(caller.scope(), id)? {
        Ok(Json(json!({ "message": "Weight entry deleted" })))
    } else {
        Err(ApiError::NotFound("Weight entry not found".to_string()))
    }
}

async fn weight_progress(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().weight_progress(caller.scope(), now())?)
}

async fn weight_chart(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().weight_chart(caller.scope())?)
}

// --- Step handlers ---

async fn create_steps(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<CreateStepsRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    validate_step_count(req.step_count).map_err(|e| bad_request(&e))?;
    // Step entries are per calendar day.
    let recorded_date = timestamp_or_now(req.recorded_date.as_deref())?
        .date()
        .and_time(chrono::NaiveTime::MIN);
    let entry = state.tracker().log_steps(
        caller.scope(),
        &NewStepEntry {
            step_count: req.step_count,
            recorded_date,
            notes: req.notes,
        },
    )?;
    Ok((StatusCode::CREATED, to_json(&entry)?))
}

async fn list_steps(
    State(state): State<AppState>,
    caller: Caller,
    Query(params): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().list_steps(caller.scope(), params.limit)?)
}

async fn delete_steps(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tracker().delete_steps(caller.scope(), id)? {
        Ok(Json(json!({ "message": "Step entry deleted" })))
    } else {
        Err(ApiError::NotFound("Step entry not found".to_string()))
    }
}

async fn steps_summary(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().steps_summary(caller.scope(), now())?)
}

// --- Circle handlers ---

fn created_circle_json(circle: &Circle) -> serde_json::Value {
    json!({
        "id": circle.id,
        "name": circle.name,
        "invite_code": circle.invite_code,
        "created_by": circle.created_by,
        "member_count": 1,
    })
}

async fn create_circle(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateCircleRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let name = validate_circle_name(&req.name).map_err(|e| bad_request(&e))?;
    let circle = state.tracker().create_circle(user.id, &name, now())?;
    Ok((StatusCode::CREATED, Json(created_circle_json(&circle))))
}

async fn my_circles(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    to_json(&state.tracker().my_circles(user.id)?)
}

async fn join_circle(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<JoinCircleRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let code = normalize_invite_code(&req.invite_code).map_err(|e| bad_request(&e))?;
    match state.tracker().join_circle(user.id, &code, now())? {
        JoinOutcome::Joined(circle) => Ok(Json(json!({
            "message": format!("Welcome to {}!", circle.name),
            "circle_id": circle.id,
            "circle_name": circle.name,
        }))),
        JoinOutcome::NotFound => Err(ApiError::NotFound(
            "Circle not found. Check your invite code.".to_string(),
        )),
        JoinOutcome::AlreadyMember => Err(ApiError::BadRequest(
            "You're already a member of this circle".to_string(),
        )),
        JoinOutcome::Full => Err(ApiError::BadRequest(
            "This circle is full (max 10 members)".to_string(),
        )),
    }
}

async fn circle_detail(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match state.tracker().circle_detail(user.id, id, now())? {
        CircleAccess::Granted(detail) => to_json(&detail),
        CircleAccess::NotFound => Err(ApiError::NotFound("Circle not found".to_string())),
        CircleAccess::NotMember => Err(ApiError::Forbidden(
            "You're not a member of this circle".to_string(),
        )),
    }
}

async fn leave_circle(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tracker().leave_circle(user.id, id)? {
        Ok(Json(json!({ "message": "You've left the circle" })))
    } else {
        Err(ApiError::NotFound(
            "You're not a member of this circle".to_string(),
        ))
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/user/me", get(me))
        .route("/user/goals", get(get_goals).post(set_goals))
        .route("/user/complete-onboarding", post(complete_onboarding))
        .route("/user/handle", post(set_handle))
        .route("/user/handle/{handle}", get(check_handle))
        .route("/runs", post(create_run).get(list_runs))
        .route("/runs/{id}", get(get_run).put(update_run).delete(delete_run))
        .route("/plans", post(save_plan))
        .route("/plans/current", get(current_plan))
        .route("/plans/{week_id}", get(get_plan))
        .route("/stats", get(stats))
        .route("/motivation", get(motivation))
        .route("/streak", get(streak))
        .route("/personal-records", get(personal_records))
        .route("/goals", get(goals_progress))
        .route("/achievements", get(achievements))
        .route("/month-review", get(month_review))
        .route("/weights", post(create_weight).get(list_weights))
        .route("/weights/{id}", delete(delete_weight))
        .route("/weight-progress", get(weight_progress))
        .route("/weight-chart", get(weight_chart))
        .route("/steps", post(create_steps).get(list_steps))
        .route("/steps/summary", get(steps_summary))
        .route("/steps/{id}", delete(delete_steps))
        .route("/circles", post(create_circle).get(my_circles))
        .route("/circles/join", post(join_circle))
        .route("/circles/{id}", get(circle_detail))
        .route("/circles/{id}/leave", delete(leave_circle))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    tracker: TrackerService,
    tokens: TokenIssuer,
    port: u16,
    bind: &str,
) -> anyhow::Result<()> {
    let app = build_router(AppState::new(tracker, tokens));

    if bind != "127.0.0.1" && bind != "localhost" {
        tracing::warn!(
            %bind,
            "listening beyond localhost; anonymous run data is readable over the network"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let tracker = TrackerService::open_in_memory()
            .unwrap()
            .with_password_cost(4);
        build_router(AppState::new(tracker, TokenIssuer::new(b"test-secret")))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    async fn signup_token(app: &Router, email: &str, name: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "email": email, "password": "secret1", "name": name })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["access_token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn root_reports_health() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["health"], "OK");
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app();
        let response = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[tokio::test]
    async fn signup_login_and_me() {
        let app = test_app();
        let token = signup_token(&app, "Ada@Example.com", "Ada").await;

        let (status, me) = send(&app, "GET", "/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "ada@example.com");
        assert_eq!(me["name"], "Ada");
        assert!(me.get("password_hash").is_none());

        let (status, body) = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");

        let (status, body) = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ada@example.com", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid email or password");
    }

    #[tokio::test]
    async fn signup_rejects_duplicates_and_short_passwords() {
        let app = test_app();
        signup_token(&app, "ada@example.com", "Ada").await;

        let (status, body) = send(
            &app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "email": "ada@example.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Email already registered");

        let (status, body) = send(
            &app,
            "POST",
            "/auth/signup",
            None,
            Some(json!({ "email": "bob@example.com", "password": "abc" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Password must be at least 6 characters");
    }

    #[tokio::test]
    async fn protected_route_requires_token() {
        let app = test_app();
        let response = app
            .oneshot(
                axum::http::Request::get("/user/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn invalid_token_falls_back_to_anonymous() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/runs", Some("garbage.token.value"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn create_run_reports_pace_and_first_pr() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/runs",
            None,
            Some(json!({
                "run_type": "5k",
                "duration_seconds": 1500,
                "completed_at": "2026-02-01T07:00:00",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["distance_km"], 5.0);
        assert_eq!(body["pace_per_km"], "5:00");
        assert_eq!(body["formatted_duration"], "25:00");
        assert_eq!(body["category"], "outdoor");
        assert_eq!(body["is_personal_best"], true);
        assert_eq!(body["pr_type"], "fastest_5k");
        assert_eq!(body["personal_best"]["is_first"], true);
    }

    #[tokio::test]
    async fn create_run_rejects_unknown_type_and_bad_date() {
        let app = test_app();
        let (status, _) = send(
            &app,
            "POST",
            "/runs",
            None,
            Some(json!({ "run_type": "20k", "duration_seconds": 6000 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/runs",
            None,
            Some(json!({
                "run_type": "5k",
                "duration_seconds": 1500,
                "completed_at": "yesterday-ish",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/runs",
            None,
            Some(json!({ "run_type": "5k", "duration_seconds": -1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn runs_are_isolated_per_caller() {
        let app = test_app();
        let token = signup_token(&app, "ada@example.com", "Ada").await;
        let (_, created) = send(
            &app,
            "POST",
            "/runs",
            Some(&token),
            Some(json!({ "run_type": "10k", "duration_seconds": 3000 })),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let (_, anon) = send(&app, "GET", "/runs", None, None).await;
        assert_eq!(anon, json!([]));
        let (status, _) = send(&app, "GET", &format!("/runs/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &format!("/runs/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, mine) = send(&app, "GET", "/runs", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_and_delete_run() {
        let app = test_app();
        let (_, created) = send(
            &app,
            "POST",
            "/runs",
            None,
            Some(json!({ "run_type": "5k", "duration_seconds": 1500 })),
        )
        .await;
        let id = created["id"].as_i64().unwrap();

        let (status, updated) = send(
            &app,
            "PUT",
            &format!("/runs/{id}"),
            None,
            Some(json!({ "run_type": "10k", "category": "treadmill" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["distance_km"], 10.0);
        assert_eq!(updated["category"], "treadmill");
        assert_eq!(updated["pace_per_km"], "2:30");

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/runs/{id}"),
            None,
            Some(json!({ "run_type": "20k" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid run type '20k'"));
        let (_, unchanged) = send(&app, "GET", &format!("/runs/{id}"), None, None).await;
        assert_eq!(unchanged["run_type"], "10k");

        let (status, body) = send(&app, "DELETE", &format!("/runs/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Run deleted successfully");
        let (status, _) = send(&app, "GET", &format!("/runs/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_for_new_caller_are_zero() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/stats", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_runs"], 0);
        assert_eq!(body["total_km"], 0.0);
        assert_eq!(body["current_streak"], 0);
        assert_eq!(body["longest_streak"], 0);
        assert_eq!(body["average_pace"], "0:00");
    }

    #[tokio::test]
    async fn personal_records_list_every_distance() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/personal-records", None, None).await;
        assert_eq!(status, StatusCode::OK);
        for label in ["3k", "5k", "10k", "15k", "18k", "21k"] {
            assert!(body[label].is_null());
        }
    }

    #[tokio::test]
    async fn plans_upsert_and_fetch() {
        let app = test_app();
        let (status, plan) = send(
            &app,
            "POST",
            "/plans",
            None,
            Some(json!({ "week_id": "2026-W10", "planned_runs": ["5k", "10K"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(plan["planned_runs"], json!(["5k", "10k"]));

        let (status, fetched) = send(&app, "GET", "/plans/2026-W10", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], plan["id"]);

        let (status, _) = send(&app, "GET", "/plans/2026-W11", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", "/plans/week-ten", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(
            &app,
            "POST",
            "/plans",
            None,
            Some(json!({ "week_id": "2026-W10", "planned_runs": ["marathon"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn month_review_explicit_and_invalid() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/month-review?year=2026&month=3", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["available"], true);
        assert_eq!(body["month"], 3);

        for uri in [
            "/month-review?year=2026&month=13",
            "/month-review?year=2026&month=0",
            "/month-review?year=2026",
        ] {
            let (status, _) = send(&app, "GET", uri, None, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn month_review_rejects_out_of_range_years() {
        let app = test_app();
        for uri in [
            "/month-review?year=-2147483648&month=1",
            "/month-review?year=2147483647&month=12",
            "/month-review?year=2025&month=12",
            "/month-review?year=10000&month=1",
        ] {
            let (status, body) = send(&app, "GET", uri, None, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "year must be between 2026 and 9999");
        }

        let (status, body) =
            send(&app, "GET", "/month-review?year=9999&month=12", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["runs"]["count"], 0);
    }

    #[tokio::test]
    async fn weights_validate_and_delete() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/weights",
            None,
            Some(json!({ "weight_lbs": -5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Weight must be a positive number");

        let (status, entry) = send(
            &app,
            "POST",
            "/weights",
            None,
            Some(json!({ "weight_lbs": 190.5, "recorded_at": "2026-02-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = entry["id"].as_i64().unwrap();

        let (_, chart) = send(&app, "GET", "/weight-chart", None, None).await;
        assert_eq!(chart[0]["label"], "Feb 01");

        let (status, _) = send(&app, "DELETE", &format!("/weights/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &format!("/weights/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn steps_validate_and_summarize() {
        let app = test_app();
        let (status, body) =
            send(&app, "POST", "/steps", None, Some(json!({ "step_count": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Step count must be a positive number");

        let (status, entry) = send(
            &app,
            "POST",
            "/steps",
            None,
            Some(json!({ "step_count": 21000, "recorded_date": "2026-02-03T18:45:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(entry["recorded_date"], "2026-02-03T00:00:00");

        let (status, summary) = send(&app, "GET", "/steps/summary", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["all_time"]["days_20k"], 1);
    }

    #[tokio::test]
    async fn circle_flow() {
        let app = test_app();
        let ada = signup_token(&app, "ada@example.com", "Ada").await;
        let bob = signup_token(&app, "bob@example.com", "Bob").await;
        let eve = signup_token(&app, "eve@example.com", "Eve").await;

        let (status, circle) = send(
            &app,
            "POST",
            "/circles",
            Some(&ada),
            Some(json!({ "name": "Dawn Patrol" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(circle["member_count"], 1);
        let id = circle["id"].as_i64().unwrap();
        let code = circle["invite_code"].as_str().unwrap().to_lowercase();

        let (status, joined) = send(
            &app,
            "POST",
            "/circles/join",
            Some(&bob),
            Some(json!({ "invite_code": format!("  {code} ") })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(joined["circle_id"], id);

        let (status, body) = send(
            &app,
            "POST",
            "/circles/join",
            Some(&bob),
            Some(json!({ "invite_code": code })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "You're already a member of this circle");

        let (status, _) = send(
            &app,
            "POST",
            "/circles/join",
            Some(&bob),
            Some(json!({ "invite_code": "NOPE2345" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, detail) =
            send(&app, "GET", &format!("/circles/{id}"), Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(detail["member_count"], 2);
        assert_eq!(detail["members"][0]["rank"], 1);

        let (status, _) = send(&app, "GET", &format!("/circles/{id}"), Some(&eve), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, "GET", "/circles/999", Some(&eve), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, mine) = send(&app, "GET", "/circles", Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine[0]["is_creator"], false);

        let leave = format!("/circles/{id}/leave");
        let (status, _) = send(&app, "DELETE", &leave, Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &leave, Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/circles", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn joining_a_full_circle_is_rejected() {
        let app = test_app();
        let owner = signup_token(&app, "owner@example.com", "Owner").await;
        let (_, circle) = send(
            &app,
            "POST",
            "/circles",
            Some(&owner),
            Some(json!({ "name": "Ten Strong" })),
        )
        .await;
        let id = circle["id"].as_i64().unwrap();
        let code = circle["invite_code"].as_str().unwrap().to_string();

        for n in 1..10 {
            let token = signup_token(&app, &format!("runner{n}@example.com"), "Runner").await;
            let (status, _) = send(
                &app,
                "POST",
                "/circles/join",
                Some(&token),
                Some(json!({ "invite_code": code })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let late = signup_token(&app, "late@example.com", "Late").await;
        let (status, body) = send(
            &app,
            "POST",
            "/circles/join",
            Some(&late),
            Some(json!({ "invite_code": code })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "This circle is full (max 10 members)");

        let (_, detail) = send(&app, "GET", &format!("/circles/{id}"), Some(&owner), None).await;
        assert_eq!(detail["member_count"], 10);
    }

    #[tokio::test]
    async fn handle_claim_and_lookup() {
        let app = test_app();
        let ada = signup_token(&app, "ada@example.com", "Ada").await;
        let bob = signup_token(&app, "bob@example.com", "Bob").await;

        let claim = |handle: &str| json!({ "handle": handle });
        let (status, _) =
            send(&app, "POST", "/user/handle", Some(&ada), Some(claim("Speedy_1"))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/user/handle/speedy_1", None, None).await;
        assert_eq!(body["available"], false);

        let (status, body) =
            send(&app, "POST", "/user/handle", Some(&bob), Some(claim("speedy_1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "This handle is already taken");

        let (status, _) =
            send(&app, "POST", "/user/handle", Some(&bob), Some(claim("no spaces"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn goals_round_trip_and_validation() {
        let app = test_app();
        let ada = signup_token(&app, "ada@example.com", "Ada").await;

        let (status, goals) = send(&app, "GET", "/user/goals", Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(goals["yearly_km_goal"], 1000.0);

        let (status, saved) = send(
            &app,
            "POST",
            "/user/goals",
            Some(&ada),
            Some(json!({ "monthly_km_goal": 80.0, "goal_weight_lbs": 170.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["goals"]["monthly_km_goal"], 80.0);
        assert_eq!(saved["goals"]["yearly_km_goal"], 1000.0);

        let (status, _) = send(
            &app,
            "POST",
            "/user/goals",
            Some(&ada),
            Some(json!({ "yearly_km_goal": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            send(&app, "POST", "/user/complete-onboarding", Some(&ada), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["onboarding_complete"], true);
        let (_, me) = send(&app, "GET", "/user/me", Some(&ada), None).await;
        assert_eq!(me["onboarding_complete"], true);
    }
}
