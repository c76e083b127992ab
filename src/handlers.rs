use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::Config;
use crate::conversion::{ConversionCoordinator, ConversionInput};
use crate::decision::{ClientDraft, ConversionDecision, OpportunityDraft};
use crate::duplicates::{DuplicateDetectionEngine, DuplicateSearch};
use crate::errors::{AppError, ConversionError, ResultExt};
use crate::models::{collections, Actor, ConversionResult, DuplicateCandidate, Lead};
use crate::store::{get_typed, DocumentStore};
use crate::wizard::{ConversionWizard, WizardSnapshot};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ACTOR_HEADER: &str = "x-actor-id";

/// How long a one-shot conversion keeps its lead marked as in flight.
const IN_FLIGHT_TTL: Duration = Duration::from_secs(300);

pub type WizardSession = Arc<Mutex<ConversionWizard>>;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Backing document store.
    pub store: Arc<dyn DocumentStore>,
    /// Application configuration.
    pub config: Config,
    pub engine: Arc<DuplicateDetectionEngine>,
    pub coordinator: Arc<ConversionCoordinator>,
    /// Open wizards by session id. Expire after `WIZARD_SESSION_TTL_SECS` idle.
    pub wizard_sessions: Cache<Uuid, WizardSession>,
    /// Lead-level guard rejecting a second conversion while one is running.
    /// Value: unix timestamp the conversion started at.
    pub processing_leads_cache: Cache<Uuid, i64>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        let engine = Arc::new(DuplicateDetectionEngine::new(store.clone()));
        let coordinator = Arc::new(ConversionCoordinator::from_config(store.clone(), &config));

        let wizard_sessions = Cache::builder()
            .time_to_idle(config.wizard_session_ttl())
            .max_capacity(10_000)
            .build();

        let processing_leads_cache = Cache::builder()
            .time_to_live(IN_FLIGHT_TTL)
            .max_capacity(10_000)
            .build();

        Self {
            store,
            config,
            engine,
            coordinator,
            wizard_sessions,
            processing_leads_cache,
        }
    }
}

/// The caller's tenant and user, taken from `X-Tenant-Id` and `X-Actor-Id`.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Result<Uuid, AppError> {
            let raw = parts
                .headers
                .get(name)
                .ok_or_else(|| AppError::Unauthorized(format!("missing {} header", name)))?;
            raw.to_str()
                .ok()
                .and_then(|v| Uuid::parse_str(v.trim()).ok())
                .ok_or_else(|| AppError::Unauthorized(format!("{} header is not a UUID", name)))
        };

        Ok(Actor {
            tenant_id: header(TENANT_HEADER)?,
            actor_id: header(ACTOR_HEADER)?,
        })
    }
}

/// Every route except `/health`, which main keeps outside rate limiting.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/duplicates/search", post(search_duplicates))
        .route("/api/v1/leads/:id/duplicates", get(lead_duplicates))
        .route("/api/v1/leads/:id/convert", post(convert_lead))
        .route("/api/v1/leads/:id/wizard", post(open_wizard))
        .route("/api/v1/wizards/:id", get(get_wizard).delete(close_wizard))
        .route("/api/v1/wizards/:id/duplicates", post(rerun_duplicates))
        .route("/api/v1/wizards/:id/decision", post(choose_decision))
        .route("/api/v1/wizards/:id/client", post(submit_client))
        .route("/api/v1/wizards/:id/opportunity", post(submit_opportunity))
        .route("/api/v1/wizards/:id/next", post(next_step))
        .route("/api/v1/wizards/:id/previous", post(previous_step))
        .route("/api/v1/wizards/:id/execute", post(execute_wizard))
}

/// Full application router without transport layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-conversion-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn load_lead(state: &AppState, lead_id: Uuid, actor: Actor) -> Result<Lead, AppError> {
    let lead: Option<Lead> = get_typed(state.store.as_ref(), collections::LEADS, lead_id)
        .await
        .with_context(|| format!("loading lead {}", lead_id))?;

    lead.filter(|l| l.tenant_id == actor.tenant_id)
        .ok_or_else(|| AppError::NotFound(format!("Lead {} not found", lead_id)))
}

async fn load_session(
    state: &AppState,
    session_id: Uuid,
    actor: Actor,
) -> Result<WizardSession, AppError> {
    let session = state
        .wizard_sessions
        .get(&session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Wizard {} not found or expired", session_id)))?;

    if session.lock().await.tenant_id() != actor.tenant_id {
        return Err(AppError::NotFound(format!(
            "Wizard {} not found or expired",
            session_id
        )));
    }
    Ok(session)
}

// ============ Duplicate search ============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DuplicateSearchRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub entity_name: Option<String>,
}

/// POST /api/v1/duplicates/search
pub async fn search_duplicates(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(body): Json<DuplicateSearchRequest>,
) -> Result<Json<Vec<DuplicateCandidate>>, AppError> {
    if body.email.is_none() && body.phone.is_none() {
        return Err(AppError::BadRequest(
            "At least one of email or phone is required".to_string(),
        ));
    }

    let search = DuplicateSearch {
        tenant_id: actor.tenant_id,
        email: body.email,
        phone: body.phone,
        full_name: body.full_name,
        entity_name: body.entity_name,
    };
    let candidates = state.engine.find_duplicates(&search).await?;
    Ok(Json(candidates))
}

/// GET /api/v1/leads/:id/duplicates
pub async fn lead_duplicates(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(lead_id): Path<Uuid>,
) -> Result<Json<Vec<DuplicateCandidate>>, AppError> {
    let lead = load_lead(&state, lead_id, actor).await?;
    let candidates = state
        .engine
        .find_duplicates(&DuplicateSearch::from_lead(&lead))
        .await?;
    Ok(Json(candidates))
}

// ============ One-shot conversion ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertLeadRequest {
    pub decision: ConversionDecision,
    #[serde(default)]
    pub client_draft: Option<ClientDraft>,
    pub opportunity_draft: OpportunityDraft,
}

/// POST /api/v1/leads/:id/convert
pub async fn convert_lead(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(lead_id): Path<Uuid>,
    Json(body): Json<ConvertLeadRequest>,
) -> Result<Json<ConversionResult>, AppError> {
    tracing::info!("POST /leads/{}/convert by {}", lead_id, actor.actor_id);

    let started_at = chrono::Utc::now().timestamp();
    let entry = state
        .processing_leads_cache
        .entry(lead_id)
        .or_insert_with(async move { started_at })
        .await;
    if !entry.is_fresh() {
        let seconds_ago = started_at - entry.into_value();
        tracing::warn!(
            "⏭ Conversion of lead {} already in flight ({} seconds ago)",
            lead_id,
            seconds_ago
        );
        return Err(AppError::Conflict(format!(
            "Lead {} is already being converted",
            lead_id
        )));
    }

    let input = ConversionInput {
        lead_id,
        decision: body.decision,
        client_draft: body.client_draft,
        opportunity_draft: body.opportunity_draft,
    };

    // Owned by a task so the in-flight marker is released even if the client
    // disconnects mid-conversion.
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        let result = task_state.coordinator.convert_lead(input, actor).await;
        task_state.processing_leads_cache.invalidate(&lead_id).await;
        result
    });
    let result = handle
        .await
        .map_err(|e| AppError::InternalError(format!("conversion task failed: {}", e)))?;

    Ok(Json(result?))
}

// ============ Wizard sessions ============

/// POST /api/v1/leads/:id/wizard
///
/// Opens a wizard for the lead and runs the duplicate check straight away.
pub async fn open_wizard(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(lead_id): Path<Uuid>,
) -> Result<(StatusCode, Json<WizardSnapshot>), AppError> {
    let lead = load_lead(&state, lead_id, actor).await?;
    if lead.is_converted() {
        return Err(ConversionError::AlreadyConverted { lead_id }.into());
    }

    let mut wizard = ConversionWizard::new(lead, &state.config.default_currency);
    wizard.run_duplicate_check(&state.engine).await?;
    let snapshot = wizard.snapshot();

    state
        .wizard_sessions
        .insert(snapshot.id, Arc::new(Mutex::new(wizard)))
        .await;
    tracing::info!("Opened wizard {} for lead {}", snapshot.id, lead_id);

    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/wizards/:id
pub async fn get_wizard(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let snapshot = session.lock().await.snapshot();
    Ok(Json(snapshot))
}

/// POST /api/v1/wizards/:id/duplicates
pub async fn rerun_duplicates(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let mut wizard = session.lock().await;
    wizard.run_duplicate_check(&state.engine).await?;
    Ok(Json(wizard.snapshot()))
}

/// POST /api/v1/wizards/:id/decision
pub async fn choose_decision(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(decision): Json<ConversionDecision>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let mut wizard = session.lock().await;
    wizard.choose(decision)?;
    Ok(Json(wizard.snapshot()))
}

/// POST /api/v1/wizards/:id/client
pub async fn submit_client(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(draft): Json<ClientDraft>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let mut wizard = session.lock().await;
    wizard.submit_client_draft(draft)?;
    Ok(Json(wizard.snapshot()))
}

/// POST /api/v1/wizards/:id/opportunity
pub async fn submit_opportunity(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
    Json(draft): Json<OpportunityDraft>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let mut wizard = session.lock().await;
    wizard.submit_opportunity_draft(draft)?;
    Ok(Json(wizard.snapshot()))
}

/// POST /api/v1/wizards/:id/next
pub async fn next_step(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let mut wizard = session.lock().await;
    wizard.next()?;
    Ok(Json(wizard.snapshot()))
}

/// POST /api/v1/wizards/:id/previous
pub async fn previous_step(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    let mut wizard = session.lock().await;
    wizard.previous()?;
    Ok(Json(wizard.snapshot()))
}

/// POST /api/v1/wizards/:id/execute
///
/// The busy flag is set before the session lock is released, so a second
/// execute on the same wizard gets 409 while the first is committing. The
/// conversion and its bookkeeping run in a spawned task that owns the session,
/// so a dropped request still records the outcome and clears the flag.
pub async fn execute_wizard(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
) -> Result<Json<WizardSnapshot>, AppError> {
    let session = load_session(&state, session_id, actor).await?;

    let input = session.lock().await.begin_execute()?;
    tracing::info!(
        "Wizard {} executing conversion of lead {}",
        session_id,
        input.lead_id
    );

    let coordinator = state.coordinator.clone();
    let handle = tokio::spawn(async move {
        let result = coordinator.convert_lead(input, actor).await;
        let mut wizard = session.lock().await;
        wizard.complete_execute(result);
        wizard.snapshot()
    });
    let snapshot = handle
        .await
        .map_err(|e| AppError::InternalError(format!("wizard {} execution failed: {}", session_id, e)))?;

    Ok(Json(snapshot))
}

/// DELETE /api/v1/wizards/:id
///
/// Resets and discards the wizard. Refused while a conversion is running.
pub async fn close_wizard(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let session = load_session(&state, session_id, actor).await?;
    session.lock().await.reset()?;
    state.wizard_sessions.invalidate(&session_id).await;
    tracing::info!("Closed wizard {}", session_id);
    Ok(StatusCode::NO_CONTENT)
}
