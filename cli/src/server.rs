use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, anyhow, bail};
use axum::{
    Form, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use weighin_core::db::Database;
use weighin_core::models::{
    Goals, NewObservation, Observation, UpdateObservation, UserProfile, parse_date,
    parse_optional_metric, sort_newest_first, validate_goals, validate_user_name,
};
use weighin_core::stats::HistoryView;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

const PAGE_TEMPLATE: &str = include_str!("static/index.html");
const PAGE_DATA_PLACEHOLDER: &str = "__PAGE_DATA__";

// The dashboard pulls Chart.js and fonts from CDNs and runs inline scripts.
const PAGE_CSP: &str = "default-src 'none'; \
    script-src 'unsafe-inline' https://cdn.jsdelivr.net; \
    style-src 'unsafe-inline' https://fonts.googleapis.com; \
    font-src https://fonts.gstatic.com; \
    img-src data:; \
    connect-src 'self'; \
    form-action 'self'; \
    frame-ancestors 'none'";

#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Database>>,
}

impl AppState {
    fn db(&self) -> MutexGuard<'_, Database> {
        self.db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

// --- Request / Response types ---

#[derive(Deserialize)]
struct PageQuery {
    user1: Option<String>,
    user2: Option<String>,
    flash: Option<String>,
    kind: Option<String>,
}

/// Fields posted by the log-entry and edit-entry forms. Everything arrives as
/// text so bad input becomes a flash message rather than a rejected request.
#[derive(Deserialize)]
struct EntryForm {
    user: Option<String>,
    user2: Option<String>,
    date: Option<String>,
    weight: Option<String>,
    body_fat: Option<String>,
    waist: Option<String>,
}

#[derive(Deserialize)]
struct ReturnForm {
    user: Option<String>,
    user2: Option<String>,
}

#[derive(Deserialize)]
struct GoalsForm {
    user: Option<String>,
    user2: Option<String>,
    start_weight: Option<String>,
    goal_weight: Option<String>,
}

#[derive(Deserialize)]
struct AddUserForm {
    new_user_name: Option<String>,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
}

#[derive(Deserialize)]
struct ObservationRequest {
    date: String,
    weight: f64,
    body_fat: Option<f64>,
    waist: Option<f64>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    user1: Option<String>,
    user2: Option<String>,
}

#[derive(Serialize)]
struct DeleteUserResponse {
    deleted: String,
    observations_removed: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum FlashKind {
    Success,
    Error,
}

impl FlashKind {
    fn from_query(kind: Option<&str>) -> Self {
        match kind {
            Some("success") => Self::Success,
            _ => Self::Error,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

#[derive(Serialize)]
struct Flash {
    kind: FlashKind,
    message: String,
}

/// Everything the dashboard script needs, embedded into the page as JSON.
#[derive(Serialize)]
struct PageData {
    users: Vec<UserProfile>,
    primary_user: String,
    comparison_user: Option<String>,
    /// Newest first.
    entries: Vec<Observation>,
    view: HistoryView,
    today: String,
    flash: Option<Flash>,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                error!("internal server error: {err:#}");
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

#[allow(clippy::needless_pass_by_value)]
fn bad_request(err: anyhow::Error) -> ApiError {
    ApiError::BadRequest(err.to_string())
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
    // The dashboard page sets its own policy
    headers
        .entry(header::CONTENT_SECURITY_POLICY)
        .or_insert(HeaderValue::from_static("default-src 'none'"));
    response
}

// --- Dashboard page ---

fn render_page(data: &PageData) -> anyhow::Result<String> {
    let json = serde_json::to_string(data)?
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026");
    Ok(PAGE_TEMPLATE.replace(PAGE_DATA_PLACEHOLDER, &json))
}

async fn index(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Response, ApiError> {
    let kind = FlashKind::from_query(query.kind.as_deref());
    let mut flash = query
        .flash
        .filter(|m| !m.is_empty())
        .map(|message| Flash { kind, message });

    let db = state.db();
    let users = db.list_users().context("failed to list users")?;
    let first = users
        .first()
        .map(|u| u.name.clone())
        .context("no user profiles exist")?;
    let exists = |name: &str| users.iter().any(|u| u.name == name);

    let primary_user = match query.user1.filter(|n| !n.is_empty()) {
        Some(name) if exists(name.as_str()) => name,
        Some(name) => {
            flash.get_or_insert(Flash {
                kind: FlashKind::Error,
                message: format!("User '{name}' not found."),
            });
            first
        }
        None => first,
    };
    let comparison_user = query
        .user2
        .filter(|n| !n.is_empty() && *n != primary_user && exists(n.as_str()));

    let view = db
        .build_history_view(&primary_user, comparison_user.as_deref())
        .context("failed to build history view")?;
    let mut entries = db
        .list_observations(&primary_user)
        .context("failed to list observations")?;
    drop(db);
    sort_newest_first(&mut entries);

    let page = render_page(&PageData {
        users,
        primary_user,
        comparison_user,
        entries,
        view,
        today: Local::now().date_naive().format("%Y-%m-%d").to_string(),
        flash,
    })?;

    Ok(([(header::CONTENT_SECURITY_POLICY, PAGE_CSP)], Html(page)).into_response())
}

// --- Form actions (redirect back to the dashboard with a flash message) ---

fn dashboard_url(user1: Option<&str>, user2: Option<&str>, kind: FlashKind, message: &str) -> String {
    let mut params = Vec::new();
    if let Some(u) = user1.filter(|u| !u.is_empty()) {
        params.push(format!("user1={}", percent_encode_component(u)));
    }
    if let Some(u) = user2.filter(|u| !u.is_empty()) {
        params.push(format!("user2={}", percent_encode_component(u)));
    }
    params.push(format!("flash={}", percent_encode_component(message)));
    params.push(format!("kind={}", kind.as_str()));
    format!("/?{}", params.join("&"))
}

fn back_to_dashboard(
    user1: Option<&str>,
    user2: Option<&str>,
    outcome: anyhow::Result<String>,
) -> Redirect {
    let url = match outcome {
        Ok(message) => dashboard_url(user1, user2, FlashKind::Success, &message),
        Err(err) => {
            warn!("form action rejected: {err:#}");
            dashboard_url(user1, user2, FlashKind::Error, &err.to_string())
        }
    };
    Redirect::to(&url)
}

impl EntryForm {
    fn values(&self) -> anyhow::Result<UpdateObservation> {
        let weight: f64 = self
            .weight
            .as_deref()
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid input. Please enter valid numbers."))?;
        let date = self.date.as_deref().unwrap_or_default();
        if weight <= 0.0 || date.trim().is_empty() {
            bail!("Weight must be a positive number and a date is required.");
        }
        let values = UpdateObservation {
            date: parse_date(date)?,
            weight,
            body_fat: parse_optional_metric(self.body_fat.as_deref(), "body fat")?,
            waist: parse_optional_metric(self.waist.as_deref(), "waist size")?,
        };
        values.validate()?;
        Ok(values)
    }
}

async fn submit_entry(State(state): State<AppState>, Form(form): Form<EntryForm>) -> Redirect {
    let user = form.user.clone().unwrap_or_default();
    let outcome = form.values().and_then(|v| {
        let entry = state.db().add_observation(&NewObservation {
            user: user.clone(),
            date: v.date,
            weight: v.weight,
            body_fat: v.body_fat,
            waist: v.waist,
        })?;
        info!(id = entry.id, user = %entry.user, "entry added");
        Ok("Entry added successfully!".to_string())
    });
    back_to_dashboard(Some(&user), form.user2.as_deref(), outcome)
}

async fn submit_entry_update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<EntryForm>,
) -> Redirect {
    let outcome = form.values().and_then(|v| {
        let db = state.db();
        if db.get_observation(id)?.is_none() {
            bail!("Could not find entry to update.");
        }
        db.update_observation(id, &v)?;
        info!(id, "entry updated");
        Ok("Entry updated successfully!".to_string())
    });
    back_to_dashboard(form.user.as_deref(), form.user2.as_deref(), outcome)
}

async fn submit_entry_delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Form(form): Form<ReturnForm>,
) -> Redirect {
    let outcome = state.db().delete_observation(id).and_then(|deleted| {
        if !deleted {
            bail!("Could not find the entry to delete.");
        }
        info!(id, "entry deleted");
        Ok("Entry deleted successfully!".to_string())
    });
    back_to_dashboard(form.user.as_deref(), form.user2.as_deref(), outcome)
}

fn apply_goals(state: &AppState, form: &GoalsForm) -> anyhow::Result<String> {
    let user = form.user.as_deref().unwrap_or_default();
    if user.is_empty() {
        bail!("No user selected.");
    }
    let goals = Goals {
        start_weight: parse_optional_metric(form.start_weight.as_deref(), "start weight")
            .context("Invalid input for weights.")?,
        goal_weight: parse_optional_metric(form.goal_weight.as_deref(), "goal weight")
            .context("Invalid input for weights.")?,
    };
    state.db().set_goals(user, &goals)?;
    info!(user, "goals updated");
    Ok(format!("Goals for {user} updated successfully!"))
}

async fn submit_goals(State(state): State<AppState>, Form(form): Form<GoalsForm>) -> Redirect {
    let outcome = apply_goals(&state, &form);
    back_to_dashboard(form.user.as_deref(), form.user2.as_deref(), outcome)
}

async fn submit_add_user(
    State(state): State<AppState>,
    Form(form): Form<AddUserForm>,
) -> Redirect {
    let name = form.new_user_name.unwrap_or_default();
    match state.db().add_user(&name) {
        Ok(user) => back_to_dashboard(
            Some(&user.name),
            None,
            Ok(format!("User '{}' added successfully!", user.name)),
        ),
        Err(err) => back_to_dashboard(None, None, Err(err)),
    }
}

async fn submit_delete_user(
    State(state): State<AppState>,
    Form(form): Form<ReturnForm>,
) -> Redirect {
    let user = form.user.unwrap_or_default();
    match state.db().delete_user(&user) {
        Ok(_) => back_to_dashboard(
            None,
            None,
            Ok(format!("User '{user}' and all data have been deleted.")),
        ),
        Err(err) => back_to_dashboard(Some(&user), None, Err(err)),
    }
}

// --- JSON API: users ---

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let users = state.db().list_users().context("failed to list users")?;
    Ok(Json(users))
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserProfile>), ApiError> {
    let name = validate_user_name(&req.name).map_err(bad_request)?;
    let db = state.db();
    if db.get_user(&name).context("database error")?.is_some() {
        return Err(ApiError::Conflict(format!("User '{name}' already exists")));
    }
    let user = db.add_user(&name).context("failed to add user")?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteUserResponse>, ApiError> {
    let db = state.db();
    if db.get_user(&name).context("database error")?.is_none() {
        return Err(ApiError::NotFound(format!("User '{name}' not found")));
    }
    if db.list_users().context("database error")?.len() <= 1 {
        return Err(ApiError::Conflict("Cannot delete the last user".to_string()));
    }
    let removed = db.delete_user(&name).context("failed to delete user")?;
    Ok(Json(DeleteUserResponse {
        deleted: name,
        observations_removed: removed,
    }))
}

async fn get_goals(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Goals>, ApiError> {
    let user = state
        .db()
        .get_user(&name)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("User '{name}' not found")))?;
    Ok(Json(user.goals()))
}

async fn set_goals(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(goals): Json<Goals>,
) -> Result<Json<UserProfile>, ApiError> {
    validate_goals(&goals).map_err(bad_request)?;
    let db = state.db();
    if db.get_user(&name).context("database error")?.is_none() {
        return Err(ApiError::NotFound(format!("User '{name}' not found")));
    }
    let user = db.set_goals(&name, &goals).context("failed to set goals")?;
    Ok(Json(user))
}

// --- JSON API: observations ---

impl ObservationRequest {
    fn into_update(self) -> Result<UpdateObservation, ApiError> {
        let update = UpdateObservation {
            date: parse_date(&self.date).map_err(bad_request)?,
            weight: self.weight,
            body_fat: self.body_fat,
            waist: self.waist,
        };
        update.validate().map_err(bad_request)?;
        Ok(update)
    }
}

async fn list_user_observations(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Observation>>, ApiError> {
    let db = state.db();
    if db.get_user(&name).context("database error")?.is_none() {
        return Err(ApiError::NotFound(format!("User '{name}' not found")));
    }
    let entries = db
        .list_observations(&name)
        .context("failed to list observations")?;
    Ok(Json(entries))
}

async fn create_observation(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ObservationRequest>,
) -> Result<(StatusCode, Json<Observation>), ApiError> {
    let values = req.into_update()?;
    let db = state.db();
    if db.get_user(&name).context("database error")?.is_none() {
        return Err(ApiError::NotFound(format!("User '{name}' not found")));
    }
    let entry = db
        .add_observation(&NewObservation {
            user: name,
            date: values.date,
            weight: values.weight,
            body_fat: values.body_fat,
            waist: values.waist,
        })
        .context("failed to add observation")?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Observation>, ApiError> {
    let entry = state
        .db()
        .get_observation(id)
        .context("database error")?
        .ok_or_else(|| ApiError::NotFound(format!("Observation {id} not found")))?;
    Ok(Json(entry))
}

async fn update_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ObservationRequest>,
) -> Result<Json<Observation>, ApiError> {
    let values = req.into_update()?;
    let db = state.db();
    if db.get_observation(id).context("database error")?.is_none() {
        return Err(ApiError::NotFound(format!("Observation {id} not found")));
    }
    let entry = db
        .update_observation(id, &values)
        .context("failed to update observation")?;
    Ok(Json(entry))
}

async fn delete_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .db()
        .delete_observation(id)
        .context("failed to delete observation")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Observation {id} not found")))
    }
}

async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryView>, ApiError> {
    let db = state.db();
    let primary = match query.user1.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => db
            .list_users()
            .context("failed to list users")?
            .into_iter()
            .next()
            .map(|u| u.name)
            .context("no user profiles exist")?,
    };
    let comparison = query.user2.filter(|n| !n.is_empty());

    for name in std::iter::once(&primary).chain(comparison.as_ref()) {
        if db.get_user(name).context("database error")?.is_none() {
            return Err(ApiError::NotFound(format!("User '{name}' not found")));
        }
    }

    let view = db
        .build_history_view(&primary, comparison.as_deref())
        .context("failed to build history view")?;
    Ok(Json(view))
}

// --- Helpers ---

/// Minimal percent-encoding for a URL query parameter value.
///
/// Everything outside the RFC 3986 unreserved set is escaped, so user names
/// and flash messages survive the redirect intact.
fn percent_encode_component(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push('%');
                encoded.push(char::from(HEX_CHARS[(byte >> 4) as usize]));
                encoded.push(char::from(HEX_CHARS[(byte & 0x0F) as usize]));
            }
        }
    }
    encoded
}

const HEX_CHARS: [u8; 16] = *b"0123456789ABCDEF";

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/entries", post(submit_entry))
        .route("/entries/{id}", post(submit_entry_update))
        .route("/entries/{id}/delete", post(submit_entry_delete))
        .route("/goals", post(submit_goals))
        .route("/users", post(submit_add_user))
        .route("/users/delete", post(submit_delete_user))
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{name}", delete(delete_user))
        .route("/api/users/{name}/goals", get(get_goals).put(set_goals))
        .route(
            "/api/users/{name}/observations",
            get(list_user_observations).post(create_observation),
        )
        .route(
            "/api/observations/{id}",
            get(get_observation)
                .put(update_observation)
                .delete(delete_observation),
        )
        .route("/api/history", get(get_history))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(db: Database, port: u16, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        db: Arc::new(Mutex::new(db)),
    };

    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        warn!(
            "listening on {bind} with no authentication; any device on your network can read and change your data"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("listening on http://{bind}:{port}");
    eprintln!("Open your web browser and go to: http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
