// SPDX-License-Identifier: MIT OR Apache-2.0
//! sp-daemon
//!
//! The HTTP serving surface: an axum router over the registry, scheduler,
//! orchestrator, and discovery services, plus the middleware stack
//! (request ids, logging, API-key authentication).

#![deny(unsafe_code)]

/// Wire envelope and request payloads.
pub mod api;
/// Middleware stack.
pub mod middleware;

use axum::{
    Json, Router,
    extract::{Path as AxPath, Query, State},
    routing::{get, post},
};
use semver::Version;
use serde_json::{Value, json};
use sp_config::ServerConfig;
use sp_core::{ExecutionId, ExecutionState, WorkflowSpec};
use sp_discovery::{DiscoveryQuery, DiscoveryService};
use sp_error::{ErrorCode, SkillError};
use sp_registry::SkillRegistry;
use sp_sandbox::SandboxHost;
use sp_scheduler::{Scheduler, SchedulerConfig};
use sp_store::{BlobStore, MetadataStore, SearchIndex};
use sp_workflow::{Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use std::time::Instant;

pub use api::{ApiFailure, DetailQuery, InvokeRequest, success};

/// Shared state behind every handler.
pub struct AppState {
    /// Skill registry.
    pub registry: SkillRegistry,
    /// Invocation scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Workflow orchestrator.
    pub orchestrator: Orchestrator,
    /// Discovery service.
    pub discovery: DiscoveryService,
    /// Metadata store handle, pinged by `/health`.
    pub metadata: Arc<dyn MetadataStore>,
    /// Blob store handle, pinged by `/health`.
    pub blobs: Arc<dyn BlobStore>,
    /// Whether a search index is configured.
    pub search_enabled: bool,
    /// Whether requests must carry a valid API key.
    pub auth_required: bool,
    /// Header the API key arrives in.
    pub auth_header: String,
    /// Accepted API keys.
    pub api_keys: Vec<String>,
    /// Route prefix, e.g. `/api/v1`.
    pub prefix: String,
    /// Worker-pool size, reported by `/health`.
    pub max_concurrent: usize,
    /// API-wide request limiter, when `RATE_LIMIT_PER_MINUTE` is set.
    pub rate_limiter: Option<middleware::RateLimiter>,
    /// Origins the CORS layer admits; empty leaves CORS off.
    pub cors_allowed_origins: Vec<String>,
    /// Process start time, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Wire the full service graph over the given collaborators.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        index: Option<Arc<dyn SearchIndex>>,
        sandbox: Arc<dyn SandboxHost>,
        config: &ServerConfig,
    ) -> Arc<Self> {
        let registry = SkillRegistry::new(
            Arc::clone(&metadata),
            Arc::clone(&blobs),
            index.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(
            registry.clone(),
            sandbox,
            SchedulerConfig {
                max_concurrent: config.limits.max_concurrent,
                queue_capacity: config.limits.queue_capacity,
                max_output_bytes: config.limits.max_output_bytes,
                max_memory_bytes: None,
            },
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&scheduler),
            OrchestratorConfig {
                max_parallel_nodes: config.limits.max_concurrent,
            },
        );
        let discovery = DiscoveryService::new(Arc::clone(&metadata), index.clone());

        Arc::new(Self {
            registry,
            scheduler,
            orchestrator,
            discovery,
            metadata,
            blobs,
            search_enabled: index.is_some(),
            auth_required: config.auth.required,
            auth_header: config.auth_header().to_string(),
            api_keys: config.auth.api_keys.clone(),
            prefix: config.api.prefix.clone(),
            max_concurrent: config.limits.max_concurrent,
            rate_limiter: config
                .limits
                .rate_limit_per_minute
                .map(middleware::RateLimiter::per_minute),
            cors_allowed_origins: config.api.cors_allowed_origins.clone(),
            started_at: Instant::now(),
        })
    }
}

/// Build the axum router with all routes and middleware.
///
/// `/health` stays outside authentication and rate limiting so probes keep
/// working when the API is saturated or a caller lost its key.
pub fn build_app(state: Arc<AppState>) -> Router {
    let mut protected = Router::new()
        .route("/skill/register", post(register_skill))
        .route("/skill/invoke", post(invoke_skill))
        .route("/skill/status/{execution_id}", get(execution_status))
        .route("/skill/discovery", get(discover_skills))
        .route("/skill/orchestrate", post(orchestrate_workflow))
        .route("/skill/{skill_id}", get(skill_detail).delete(delete_skill))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::auth_middleware,
        ));

    if let Some(limiter) = &state.rate_limiter {
        protected = protected.route_layer(axum::middleware::from_fn_with_state(
            limiter.clone(),
            middleware::RateLimiter::middleware,
        ));
    }

    let api = Router::new().route("/health", get(health)).merge(protected);

    let mut routed = if state.prefix.is_empty() || state.prefix == "/" {
        api
    } else {
        Router::new().nest(&state.prefix, api)
    };

    if !state.cors_allowed_origins.is_empty() {
        routed = routed.layer(middleware::cors_layer(
            &state.cors_allowed_origins,
            &state.auth_header,
        ));
    }

    routed
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let metadata_ok = state.metadata.list_skills().await.is_ok();
    let blobs_ok = state.blobs.get("healthcheck").await.is_ok();

    success(json!({
        "service": "skillport",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "workers": {
            "running": state.scheduler.running(),
            "queued": state.scheduler.queued(),
            "max_concurrent": state.max_concurrent,
        },
        "backends": {
            "metadata_store": metadata_ok,
            "blob_store": blobs_ok,
            "search_index": state.search_enabled,
        },
    }))
}

async fn register_skill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<sp_core::RegisterRequest>,
) -> Result<Json<Value>, ApiFailure> {
    let manifest = state.registry.register(request).await?;
    Ok(success(json!({
        "skill_id": manifest.skill_id,
        "skill_name": manifest.skill_name,
        "version": manifest.version,
        "language": manifest.language,
        "code_digest": manifest.code_digest,
        "created_at": manifest.created_at,
    })))
}

async fn invoke_skill(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<Value>, ApiFailure> {
    if request.run_async {
        let execution_id = state
            .scheduler
            .invoke_async(&request.skill_id, request.inputs, request.timeout)
            .await?;
        return Ok(success(json!({
            "execution_id": execution_id,
            "status_url": format!("{}/skill/status/{}", state.prefix, execution_id),
            "note": "execution state is process-local; poll this instance",
        })));
    }

    let record = state
        .scheduler
        .invoke_sync(&request.skill_id, request.inputs, request.timeout)
        .await?;

    match record.state {
        ExecutionState::Completed => Ok(success(json!({
            "execution_id": record.execution_id,
            "skill_id": record.skill_id,
            "skill_version": record.skill_version,
            "result": record.result,
            "execution_time": record.elapsed_seconds,
        }))),
        state => {
            let error = record.error.unwrap_or_else(|| {
                SkillError::new(ErrorCode::InvocationInternal, "missing error payload")
            });
            Err(ApiFailure(
                error
                    .with_detail("execution_id", record.execution_id.as_str())
                    .with_detail("state", state.to_string()),
            ))
        }
    }
}

async fn execution_status(
    State(state): State<Arc<AppState>>,
    AxPath(execution_id): AxPath<String>,
) -> Result<Json<Value>, ApiFailure> {
    let record = match ExecutionId::parse(&execution_id) {
        Some(id) => state.scheduler.status(&id).await,
        None => None,
    };
    let record = record.ok_or_else(|| {
        SkillError::new(
            ErrorCode::SkillNotFound,
            format!("execution '{execution_id}' not found"),
        )
        .with_detail("execution_id", execution_id)
    })?;

    let execution = serde_json::to_value(&record).map_err(SkillError::invocation_internal)?;
    Ok(success(json!({ "execution": execution })))
}

async fn discover_skills(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let page = state.discovery.search(&query).await?;
    let body = serde_json::to_value(&page).map_err(SkillError::registry_internal)?;
    Ok(success(body))
}

async fn skill_detail(
    State(state): State<Arc<AppState>>,
    AxPath(skill_id): AxPath<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let version = match &query.version {
        Some(raw) => Some(Version::parse(raw).map_err(|e| {
            SkillError::new(
                ErrorCode::ValidationFailed,
                format!("version '{raw}' is not a semantic version: {e}"),
            )
        })?),
        None => None,
    };

    let manifest = state.registry.get(&skill_id, version.as_ref()).await?;
    let body = serde_json::to_value(&manifest).map_err(SkillError::registry_internal)?;
    Ok(success(body))
}

async fn delete_skill(
    State(state): State<Arc<AppState>>,
    AxPath(skill_id): AxPath<String>,
) -> Result<Json<Value>, ApiFailure> {
    state.registry.delete(&skill_id).await?;
    Ok(success(json!({
        "skill_id": skill_id,
        "message": "skill deleted",
    })))
}

async fn orchestrate_workflow(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<WorkflowSpec>,
) -> Result<Json<Value>, ApiFailure> {
    let report = state.orchestrator.run(spec).await?;

    if report.is_complete() {
        return Ok(success(json!({
            "execution_id": report.execution_id,
            "workflow_id": report.workflow_id,
            "results": report.results,
            "node_executions": report.node_executions,
            "elapsed_seconds": report.elapsed_seconds,
        })));
    }

    let failure = report.failure.unwrap_or_else(|| sp_workflow::NodeFailure {
        node_id: String::new(),
        error: SkillError::new(ErrorCode::OrchestrationInternal, "missing failure payload"),
    });
    Err(ApiFailure(
        failure
            .error
            .with_detail("failed_node", failure.node_id)
            .with_detail("execution_id", report.execution_id.as_str())
            .with_detail(
                "partial_results",
                serde_json::to_value(&report.results).unwrap_or(Value::Null),
            )
            .with_detail("cancelled", json!(report.cancelled))
            .with_detail("skipped", json!(report.skipped)),
    ))
}
