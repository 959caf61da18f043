use super::{AppError, AppResult, AppState, JsonResponse};
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use engram_core::{
    AuditFilter, Edge, EngramError, EventKind, ExternalEvent, GraphEvent, InteractionEvent, Node,
    ProbeOutcome, ProbeRequest, QuerySpec, SnapshotExport, SnapshotFormat, Subgraph,
    UserCorrection,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        .route("/interactions", post(report_interaction))
        .route("/query", post(query))
        .route("/query/nl", post(query_nl))
        .route("/context", post(get_context))
        .route("/context/block", post(context_block))
        .route("/probes", post(get_probes))
        .route("/probes/:id/feedback", post(probe_feedback))
        .route("/starters", get(get_starters))
        .route("/corrections", post(correction))
        .route("/provenance/:edge_id", get(provenance))
        .route("/graph/export", get(graph_export))
        .route("/events", post(external_event))
        .route("/audit", get(audit))
        .route("/subscribe", get(subscribe))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Serializable view of a subgraph.
#[derive(Serialize)]
struct SubgraphView {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    truncated: bool,
    soft_error: bool,
}

impl From<Subgraph> for SubgraphView {
    fn from(subgraph: Subgraph) -> Self {
        let mut nodes: Vec<Node> = subgraph.nodes.into_values().collect();
        nodes.sort_by_key(|n| n.created_at);
        Self {
            nodes,
            edges: subgraph.edges,
            truncated: subgraph.truncated,
            soft_error: subgraph.soft_error,
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut report = serde_json::to_value(state.service.health()).unwrap_or_default();
    if let Some(map) = report.as_object_mut() {
        map.insert(
            "version".to_string(),
            env!("CARGO_PKG_VERSION").to_string().into(),
        );
        map.insert(
            "uptime_seconds".to_string(),
            state.start_time.elapsed().as_secs().into(),
        );
    }
    Json(JsonResponse::ok(report))
}

#[derive(Serialize)]
struct StatsView {
    node_count: u64,
    edge_count: u64,
    active_edge_count: u64,
    retracted_edge_count: u64,
    archived_edge_count: u64,
    episode_count: u64,
}

async fn stats(State(state): State<AppState>) -> AppResult<Json<JsonResponse<StatsView>>> {
    let stats = state.service.stats()?;
    Ok(Json(JsonResponse::ok(StatsView {
        node_count: stats.node_count,
        edge_count: stats.edge_count,
        active_edge_count: stats.active_edge_count,
        retracted_edge_count: stats.retracted_edge_count,
        archived_edge_count: stats.archived_edge_count,
        episode_count: stats.episode_count,
    })))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.encode()
}

async fn report_interaction(
    State(state): State<AppState>,
    Json(event): Json<InteractionEvent>,
) -> AppResult<Json<JsonResponse<engram_core::Ack>>> {
    let ack = state.service.report_interaction(event)?;
    if ack.duplicate {
        state.metrics.interactions_duplicate.inc();
    } else {
        state.metrics.interactions_reported.inc();
    }
    Ok(Json(JsonResponse::ok(ack)))
}

async fn query(
    State(state): State<AppState>,
    Json(spec): Json<QuerySpec>,
) -> Json<JsonResponse<SubgraphView>> {
    state.metrics.queries_served.inc();
    Json(JsonResponse::ok(state.service.query(&spec).into()))
}

#[derive(Deserialize)]
struct NlQueryBody {
    text: String,
}

async fn query_nl(
    State(state): State<AppState>,
    Json(body): Json<NlQueryBody>,
) -> Json<JsonResponse<SubgraphView>> {
    state.metrics.queries_served.inc();
    Json(JsonResponse::ok(
        state.service.query_nl(&body.text).await.into(),
    ))
}

#[derive(Deserialize)]
struct ContextBody {
    message: String,
}

#[derive(Serialize)]
struct ContextView {
    extraction_summary: Vec<String>,
    subgraph: SubgraphView,
    plan: QuerySpec,
}

async fn get_context(
    State(state): State<AppState>,
    Json(body): Json<ContextBody>,
) -> AppResult<Json<JsonResponse<ContextView>>> {
    let reply = state.service.get_context(&body.message)?;
    Ok(Json(JsonResponse::ok(ContextView {
        extraction_summary: reply.extraction_summary,
        subgraph: reply.subgraph.into(),
        plan: reply.plan,
    })))
}

#[derive(Deserialize)]
struct ContextBlockBody {
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default = "default_token_budget")]
    token_budget: usize,
}

fn default_token_budget() -> usize {
    1024
}

async fn context_block(
    State(state): State<AppState>,
    Json(body): Json<ContextBlockBody>,
) -> Json<JsonResponse<engram_core::ContextBlock>> {
    Json(JsonResponse::ok(state.service.assemble_context(
        &body.entities,
        &body.topics,
        body.token_budget,
    )))
}

#[derive(Deserialize)]
struct ProbeBody {
    #[serde(default)]
    active_topics: Vec<String>,
    #[serde(default)]
    entities_in_scope: Vec<String>,
    #[serde(default)]
    channel: String,
    session_id: String,
    turn: u32,
}

async fn get_probes(
    State(state): State<AppState>,
    Json(body): Json<ProbeBody>,
) -> AppResult<Json<JsonResponse<Option<engram_core::DeliveredItem>>>> {
    let delivered = state.service.get_probes(&ProbeRequest {
        active_topics: body.active_topics,
        entities_in_scope: body.entities_in_scope,
        channel: body.channel,
        session_id: body.session_id,
        turn: body.turn,
        now: Utc::now(),
    })?;
    if delivered.is_some() {
        state.metrics.probes_delivered.inc();
    }
    Ok(Json(JsonResponse::ok(delivered)))
}

#[derive(Deserialize)]
struct ProbeFeedbackBody {
    outcome: ProbeOutcome,
}

async fn probe_feedback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ProbeFeedbackBody>,
) -> AppResult<Json<JsonResponse<()>>> {
    state.service.probe_feedback(id, body.outcome)?;
    Ok(Json(JsonResponse::ok(())))
}

#[derive(Deserialize)]
struct StartersQuery {
    #[serde(default = "default_max_starters")]
    max: usize,
}

fn default_max_starters() -> usize {
    3
}

async fn get_starters(
    State(state): State<AppState>,
    Query(query): Query<StartersQuery>,
) -> AppResult<Json<JsonResponse<Vec<engram_core::OutboundItem>>>> {
    let starters = state.service.get_starters(query.max)?;
    state
        .metrics
        .starters_delivered
        .inc_by(starters.len() as u64);
    Ok(Json(JsonResponse::ok(starters)))
}

async fn correction(
    State(state): State<AppState>,
    Json(body): Json<UserCorrection>,
) -> AppResult<Json<JsonResponse<()>>> {
    state.service.user_correction(&body)?;
    state.metrics.corrections_applied.inc();
    Ok(Json(JsonResponse::ok(())))
}

async fn provenance(
    State(state): State<AppState>,
    Path(edge_id): Path<Uuid>,
) -> AppResult<Json<JsonResponse<engram_core::ProvenanceChain>>> {
    Ok(Json(JsonResponse::ok(
        state.service.get_provenance(edge_id)?,
    )))
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "full".to_string()
}

async fn graph_export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> AppResult<axum::response::Response> {
    let format = match query.format.as_str() {
        "graphml" => SnapshotFormat::Graphml,
        "full" | "json" => SnapshotFormat::Full,
        other => {
            return Err(AppError(EngramError::Validation(format!(
                "unknown export format '{}'",
                other
            ))))
        }
    };
    match state.service.graph_snapshot(format)? {
        SnapshotExport::Full(snapshot) => {
            Ok(Json(JsonResponse::ok(*snapshot)).into_response())
        }
        SnapshotExport::Graphml(xml) => Ok((
            [(axum::http::header::CONTENT_TYPE, "application/xml")],
            xml,
        )
            .into_response()),
    }
}

async fn external_event(
    State(state): State<AppState>,
    Json(event): Json<ExternalEvent>,
) -> AppResult<Json<JsonResponse<bool>>> {
    state.metrics.external_events.inc();
    let queued = state.service.external_event(&event).await?;
    Ok(Json(JsonResponse::ok(queued)))
}

#[derive(Deserialize)]
struct AuditQuery {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default = "default_audit_limit")]
    limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

async fn audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<JsonResponse<Vec<engram_core::AuditEntry>>>> {
    let kind = query
        .kind
        .as_deref()
        .map(|k| {
            serde_json::from_value(serde_json::Value::String(k.to_string()))
                .map_err(|_| EngramError::Validation(format!("unknown audit kind '{}'", k)))
        })
        .transpose()?;

    let entries = state.service.audit_query(AuditFilter {
        kind,
        limit: Some(query.limit),
        ..Default::default()
    })?;
    Ok(Json(JsonResponse::ok(entries)))
}

#[derive(Deserialize)]
struct SubscribeQuery {
    /// Comma-separated event kinds; all when omitted.
    #[serde(default)]
    kinds: Option<String>,
}

#[derive(Serialize)]
struct EventView {
    kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    node: Option<Node>,
    #[serde(skip_serializing_if = "Option::is_none")]
    edge: Option<Edge>,
}

impl From<GraphEvent> for EventView {
    fn from(event: GraphEvent) -> Self {
        let kind = event.kind();
        match event {
            GraphEvent::NodeAdded(node) | GraphEvent::NodeUpdated(node) => Self {
                kind,
                node: Some(node),
                edge: None,
            },
            GraphEvent::EdgeAdded(edge)
            | GraphEvent::EdgeUpdated(edge)
            | GraphEvent::EdgeArchived(edge)
            | GraphEvent::EdgeRetracted(edge) => Self {
                kind,
                node: None,
                edge: Some(edge),
            },
        }
    }
}

/// SSE push stream of graph events. Each connection is its own bus
/// subscriber; dropping the connection unsubscribes it.
async fn subscribe(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let kinds = query.kinds.as_deref().map(|raw| {
        raw.split(',')
            .filter_map(EventKind::parse)
            .collect::<Vec<_>>()
    });

    let subscriber = format!("sse-{}", Uuid::now_v7());
    let mut rx = state.service.subscribe(subscriber.clone(), kinds);

    // Dropped with the stream on disconnect, detaching the bus
    // subscriber and its dispatcher task.
    struct Unsubscribe {
        service: std::sync::Arc<engram_core::Engram>,
        name: String,
    }
    impl Drop for Unsubscribe {
        fn drop(&mut self) {
            self.service.unsubscribe(&self.name);
        }
    }
    let guard = Unsubscribe {
        service: state.service.clone(),
        name: subscriber,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let view = EventView::from(event);
            match Event::default().json_data(&view) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(_) => continue,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
