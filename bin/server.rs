// Personal Finance Planner - Web Server
// REST API with Axum: records, CPF, projection, chat and pending actions

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use clap::Parser;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use finplan::actions::{self, PendingAction};
use finplan::assistant::balance_sheet_summary;
use finplan::db::ping;
use finplan::entities::{Asset, Expense, Income, Liability, PropertyScenario};
use finplan::{
    compute_net_worth, delete_record, demo, get_events_for_entity, get_record, insert_record,
    list_records, load_profile, load_snapshot, logging, open_database, patch_record,
    record_history, save_profile, Assistant, ChatReply, ChatRequest, CpfContribution, CpfInput,
    Event, FinanceError, HistoryEntry, Profile, Projection, Record, ScenarioEvaluation, Settings,
    AnnualCpfSummary, VERSION,
};

const ACTOR: &str = "api";

#[derive(Parser)]
#[command(name = "finplan-server", version, about = "HTTP API for the finance planner")]
struct Args {
    /// TOML settings file (defaults to ./finplan.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configured one
    #[arg(long)]
    bind: Option<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    assistant: Arc<Assistant>,
    settings: Arc<Settings>,
}

impl AppState {
    /// Run `f` with the connection locked. Never held across an await.
    fn with_db<T>(&self, f: impl FnOnce(&Connection) -> finplan::Result<T>) -> Result<T, ApiError> {
        let conn = self
            .db
            .lock()
            .map_err(|_| FinanceError::InvalidState("database lock poisoned".to_string()))?;
        Ok(f(&conn)?)
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    /// Per-field messages for validation failures
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<finplan::FieldError>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            fields: Vec::new(),
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

/// Domain errors rendered as the error envelope
struct ApiError(FinanceError);

impl From<FinanceError> for ApiError {
    fn from(err: FinanceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FinanceError::Validation(_) => StatusCode::BAD_REQUEST,
            FinanceError::NotFound { .. } => StatusCode::NOT_FOUND,
            FinanceError::Conflict(_) | FinanceError::InvalidState(_) => StatusCode::CONFLICT,
            FinanceError::Llm(_) => StatusCode::BAD_GATEWAY,
            FinanceError::Database(_) | FinanceError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }

        let fields = match self.0 {
            FinanceError::Validation(ref fields) => fields.clone(),
            _ => Vec::new(),
        };
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
            fields,
        };
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Record Handlers (generic over the record kind)
// ============================================================================

/// GET /api/{kind} - List records of one kind
async fn list_handler<T: Record + Sync>(State(state): State<AppState>) -> ApiResult<Vec<T>> {
    ok(state.with_db(|conn| list_records::<T>(conn))?)
}

/// POST /api/{kind} - Create a record
async fn create_handler<T: Record + Sync>(
    State(state): State<AppState>,
    Json(record): Json<T>,
) -> Result<(StatusCode, Json<ApiResponse<T>>), ApiError> {
    state.with_db(|conn| insert_record(conn, &record, ACTOR))?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(record))))
}

/// GET /api/{kind}/:id
async fn get_handler<T: Record + Sync>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<T> {
    ok(state.with_db(|conn| get_record::<T>(conn, &id))?)
}

/// PUT /api/{kind}/:id - Partial update; send `version` to guard against stale edits
async fn update_handler<T: Record + Sync>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<T> {
    ok(state.with_db(|conn| patch_record::<T>(conn, &id, &patch, ACTOR))?)
}

/// DELETE /api/{kind}/:id
async fn delete_handler<T: Record + Sync>(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<String> {
    state.with_db(|conn| delete_record::<T>(conn, &id, ACTOR))?;
    ok(id)
}

fn record_routes<T: Record + Sync>(collection: &str) -> Router<AppState> {
    Router::new()
        .route(
            &format!("/{}", collection),
            get(list_handler::<T>).post(create_handler::<T>),
        )
        .route(
            &format!("/{}/:id", collection),
            get(get_handler::<T>)
                .put(update_handler::<T>)
                .delete(delete_handler::<T>),
        )
}

/// GET /api/scenarios/:id/evaluate - Affordability against current income and debts
async fn evaluate_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ScenarioEvaluation> {
    let evaluation = state.with_db(|conn| {
        let scenario: PropertyScenario = get_record(conn, &id)?;
        let snapshot = load_snapshot(conn)?;
        Ok(scenario.evaluate(snapshot.monthly_income(), snapshot.monthly_debt_payments()))
    })?;
    ok(evaluation)
}

// ============================================================================
// Profile, Summary & Audit
// ============================================================================

/// GET /api/profile
async fn get_profile(State(state): State<AppState>) -> ApiResult<Profile> {
    ok(state.with_db(load_profile)?)
}

/// PUT /api/profile - Replace the profile
async fn put_profile(
    State(state): State<AppState>,
    Json(mut profile): Json<Profile>,
) -> ApiResult<Profile> {
    state.with_db(|conn| save_profile(conn, &mut profile, ACTOR))?;
    ok(profile)
}

#[derive(Serialize)]
struct SummaryResponse {
    total_assets: f64,
    cpf_total: f64,
    total_liabilities: f64,
    net_worth: f64,
    monthly_income: f64,
    monthly_expenses: f64,
    monthly_debt_payments: f64,
    monthly_surplus: f64,
    text: String,
}

/// GET /api/summary - Balance sheet totals
async fn get_summary(State(state): State<AppState>) -> ApiResult<SummaryResponse> {
    let snapshot = state.with_db(load_snapshot)?;
    let monthly_income = snapshot.monthly_income();
    let monthly_expenses = snapshot.monthly_expenses();
    let monthly_debt_payments = snapshot.monthly_debt_payments();

    ok(SummaryResponse {
        total_assets: snapshot.total_assets(),
        cpf_total: snapshot.profile.cpf.total(),
        total_liabilities: snapshot.total_liabilities(),
        net_worth: snapshot.net_worth(),
        monthly_income,
        monthly_expenses,
        monthly_debt_payments,
        monthly_surplus: monthly_income - monthly_expenses - monthly_debt_payments,
        text: balance_sheet_summary(&snapshot),
    })
}

/// GET /api/events/:kind/:id - Audit trail, newest first
async fn get_events(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Vec<Event>> {
    let kind = urlencoding::decode(&kind)
        .unwrap_or_else(|_| kind.clone().into())
        .into_owned();
    ok(state.with_db(|conn| get_events_for_entity(conn, &kind, &id))?)
}

/// GET /api/history/:kind/:id - Superseded versions, oldest first
async fn get_history(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> ApiResult<Vec<HistoryEntry>> {
    ok(state.with_db(|conn| record_history(conn, &kind, &id))?)
}

// ============================================================================
// Calculators
// ============================================================================

/// POST /api/cpf/calculate - One month of contributions
async fn calculate_cpf(
    State(state): State<AppState>,
    Json(input): Json<CpfInput>,
) -> ApiResult<CpfContribution> {
    ok(state.assistant.cpf().calculate(&input)?)
}

#[derive(Deserialize)]
struct AnnualCpfQuery {
    salary: f64,
    #[serde(default)]
    bonus: f64,
    age: u32,
}

/// GET /api/cpf/annual?salary=&bonus=&age=
async fn annual_cpf(
    State(state): State<AppState>,
    Query(query): Query<AnnualCpfQuery>,
) -> ApiResult<AnnualCpfSummary> {
    ok(state
        .assistant
        .cpf()
        .annual_summary(query.salary, query.bonus, query.age)?)
}

/// POST /api/projection - Body fields override the configured assumptions
async fn project(
    State(state): State<AppState>,
    body: Option<Json<serde_json::Value>>,
) -> ApiResult<Projection> {
    let overrides = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);
    let assumptions = state.settings.assumptions.with_overrides(&overrides)?;
    let snapshot = state.with_db(load_snapshot)?;
    ok(compute_net_worth(&snapshot, &assumptions, state.assistant.cpf())?)
}

// ============================================================================
// Chat & Pending Actions
// ============================================================================

/// POST /api/chat
async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> ApiResult<ChatReply> {
    ok(state.assistant.handle(&state.db, request).await?)
}

/// GET /api/actions - Pending actions, after sweeping expired ones
async fn list_actions(State(state): State<AppState>) -> ApiResult<Vec<PendingAction>> {
    let ttl = state.settings.actions.ttl();
    ok(state.with_db(|conn| {
        actions::expire_stale(conn, Utc::now(), ttl)?;
        actions::list_pending(conn)
    })?)
}

/// GET /api/actions/:id
async fn get_action(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<PendingAction> {
    ok(state.with_db(|conn| actions::get_action(conn, &id))?)
}

/// POST /api/actions/:id/confirm
async fn confirm_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PendingAction> {
    let ttl = state.settings.actions.ttl();
    ok(state.with_db(|conn| actions::confirm(conn, &id, Utc::now(), ttl))?)
}

/// POST /api/actions/:id/reject
async fn reject_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PendingAction> {
    ok(state.with_db(|conn| actions::reject(conn, &id, Utc::now()))?)
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
    llm_configured: bool,
    model: Option<String>,
    version: &'static str,
}

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.with_db(ping).is_ok();
    let health = HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        llm_configured: state.assistant.has_provider(),
        model: state.assistant.model().map(str::to_string),
        version: VERSION,
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ApiResponse::ok(health)))
}

// ============================================================================
// Main Server
// ============================================================================

fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(record_routes::<Asset>("assets"))
        .merge(record_routes::<Liability>("liabilities"))
        .merge(record_routes::<Income>("incomes"))
        .merge(record_routes::<Expense>("expenses"))
        .merge(record_routes::<PropertyScenario>("scenarios"))
        .route("/scenarios/:id/evaluate", get(evaluate_scenario))
        .route("/profile", get(get_profile).put(put_profile))
        .route("/summary", get(get_summary))
        .route("/events/:kind/:id", get(get_events))
        .route("/history/:kind/:id", get(get_history))
        .route("/cpf/calculate", post(calculate_cpf))
        .route("/cpf/annual", get(annual_cpf))
        .route("/projection", post(project))
        .route("/chat", post(chat))
        .route("/actions", get(list_actions))
        .route("/actions/:id", get(get_action))
        .route("/actions/:id/confirm", post(confirm_action))
        .route("/actions/:id/reject", post(reject_action))
        .with_state(state)
}

fn app(state: AppState) -> Router {
    Router::new().nest("/api", api_routes(state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for ctrl-c: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        settings.bind = bind;
    }

    println!("🌐 finplan - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&settings.database_path)?;
    println!("✓ Database opened: {:?}", settings.database_path);
    if settings.dev_data && demo::seed_demo_data(&conn)? {
        println!("✓ Demo household seeded");
    }

    let assistant = settings.build_assistant()?;
    match assistant.model() {
        Some(model) => println!("✓ LLM provider: {}", model),
        None => println!("ℹ️  No LLM API key configured, chat runs offline"),
    }

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        assistant: Arc::new(assistant),
        settings: Arc::new(settings.clone()),
    };

    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", settings.bind))?;

    println!("\n🚀 Server running on http://{}", settings.bind);
    println!("   API: http://{}/api/health", settings.bind);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use finplan::setup_database;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let settings = Settings::default();
        AppState {
            db: Arc::new(Mutex::new(conn)),
            assistant: Arc::new(settings.build_assistant().unwrap()),
            settings: Arc::new(settings),
        }
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(json) => request.body(Body::from(json.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state();
        let (status, body) = call(&state, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["database"], true);
        assert_eq!(body["data"]["llm_configured"], false);
    }

    #[tokio::test]
    async fn test_asset_crud_roundtrip() {
        let state = test_state();
        let (status, body) = call(
            &state,
            "POST",
            "/api/assets",
            Some(serde_json::json!({ "name": "Savings", "category": "cash", "value": 12000.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &state,
            "PUT",
            &format!("/api/assets/{}", id),
            Some(serde_json::json!({ "value": 15000.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["value"], 15000.0);
        assert_eq!(body["data"]["version"], 2);

        let (status, _) = call(&state, "DELETE", &format!("/api/assets/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&state, "GET", &format!("/api/assets/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_validation_maps_to_bad_request() {
        let state = test_state();
        let (status, body) = call(
            &state,
            "POST",
            "/api/assets",
            Some(serde_json::json!({ "name": "", "category": "cash", "value": -5.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["fields"].as_array().unwrap().len() >= 2);
    }

    #[tokio::test]
    async fn test_chat_proposes_then_confirm_applies() {
        let state = test_state();
        let (status, body) = call(
            &state,
            "POST",
            "/api/chat",
            Some(serde_json::json!({ "message": "I have $5,000 in my emergency fund" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let action_id = body["data"]["pending_action"]["id"].as_str().unwrap().to_string();

        let (_, body) = call(&state, "GET", "/api/actions", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = call(&state, "POST", &format!("/api/actions/{}/confirm", action_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "confirmed");

        let (status, _) = call(&state, "POST", &format!("/api/actions/{}/confirm", action_id), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = call(&state, "GET", "/api/assets", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cpf_annual_and_projection_overrides() {
        let state = test_state();
        let (status, body) = call(&state, "GET", "/api/cpf/annual?salary=6000&age=30", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["employee"], 14400.0);

        let (status, body) = call(&state, "POST", "/api/projection", Some(serde_json::json!({ "years": 3 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["points"].as_array().unwrap().len(), 4);

        let (status, _) = call(&state, "POST", "/api/projection", Some(serde_json::json!({ "years": 500 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
