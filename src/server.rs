use std::collections::BTreeMap;
use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::assignment::conflicts::detect_conflicts;
use crate::assignment::gate::{AssignmentGate, DroppedAssignment, GateError, GateOutcome};
use crate::assignment::labels::{label_conflicts, LabeledConflict};
use crate::assignment::{
    name_org_units, AssignmentSubmission, ConflictDecision, ConflictKey, SelectionRequest,
};
use crate::backends::Backends;
use crate::budget::{budget_totals, merge_budgets_by_year, BudgetTotals, BudgetYear};
use crate::catalog::{
    Catalog, CategoryId, InterventionId, InterventionPlan, OrgUnit, OrgUnitId, ScenarioId,
};
use crate::config::Config;

#[derive(Clone)]
struct ApiState {
    config: Config,
    backends: Backends,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    ok: bool,
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    conflicts: Vec<LabeledConflict>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    conflicts: Vec<LabeledConflict>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            conflicts: Vec::new(),
        }
    }

    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: error.to_string(),
            conflicts: Vec::new(),
        }
    }

    fn unresolved(conflicts: Vec<LabeledConflict>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: format!("{} conflict(s) need a decision", conflicts.len()),
            conflicts,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        match error {
            GateError::Sink(err) => Self::internal(format!("{err:#}")),
            GateError::UnknownConflict { .. } => Self::bad_request(error.to_string()),
            other => Self {
                status: StatusCode::CONFLICT,
                message: other.to_string(),
                conflicts: Vec::new(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiErrorBody {
            ok: false,
            error: self.message,
            conflicts: self.conflicts,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Clone, Deserialize)]
struct SelectionBody {
    scenario_id: Option<ScenarioId>,
    org_units: Vec<OrgUnit>,
    #[serde(default)]
    selected_interventions_by_category: BTreeMap<CategoryId, InterventionId>,
}

#[derive(Debug, Clone, Deserialize)]
struct DecisionInput {
    org_unit: OrgUnitId,
    category: CategoryId,
    decision: ConflictDecision,
}

#[derive(Debug, Clone, Deserialize)]
struct AssignmentBody {
    scenario_id: Option<ScenarioId>,
    org_units: Vec<OrgUnit>,
    #[serde(default)]
    selected_interventions_by_category: BTreeMap<CategoryId, InterventionId>,
    #[serde(default)]
    decisions: Vec<DecisionInput>,
    /// Applied to every conflict without an explicit decision.
    default_decision: Option<ConflictDecision>,
}

impl AssignmentBody {
    fn split(self) -> (SelectionBody, Vec<DecisionInput>, Option<ConflictDecision>) {
        let selection = SelectionBody {
            scenario_id: self.scenario_id,
            org_units: self.org_units,
            selected_interventions_by_category: self.selected_interventions_by_category,
        };
        (selection, self.decisions, self.default_decision)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BudgetBody {
    Wrapped { budgets: Vec<BudgetYear> },
    Bare(Vec<BudgetYear>),
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    source: String,
}

#[derive(Debug, Serialize)]
struct PlansResponse {
    scenario_id: ScenarioId,
    plans: Vec<InterventionPlan>,
}

#[derive(Debug, Serialize)]
struct ConflictsResponse {
    scenario_id: ScenarioId,
    conflicts: Vec<LabeledConflict>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum AssignmentResponse {
    Committed {
        submission: AssignmentSubmission,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dropped: Vec<DroppedAssignment>,
    },
    NothingToCommit {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        dropped: Vec<DroppedAssignment>,
    },
}

#[derive(Debug, Serialize)]
struct BudgetResponse {
    budgets: Vec<BudgetYear>,
    totals: BudgetTotals,
}

pub async fn run_server(config: Config, backends: Backends, bind: SocketAddr) -> Result<()> {
    let app = router(ApiState { config, backends });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("REST API listening on http://{bind}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/catalog", get(catalog))
        .route("/v1/scenarios/:id/plans", get(plans))
        .route("/v1/conflicts", post(conflicts))
        .route("/v1/assignments", post(assignments))
        .route("/v1/budgets/merge", post(merge_budgets))
        .route("/v1/config", get(show_config))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> Json<ApiResponse<HealthResponse>> {
    ok(HealthResponse {
        status: "ok",
        source: state.backends.source().name().to_string(),
    })
}

async fn show_config(State(state): State<ApiState>) -> Json<ApiResponse<Config>> {
    ok(state.config)
}

async fn catalog(State(state): State<ApiState>) -> ApiResult<Catalog> {
    Ok(ok(fetch_catalog(&state).await?))
}

async fn plans(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<PlansResponse> {
    let scenario_id = ScenarioId(id);
    let plans = fetch_plans(&state, scenario_id).await?;
    Ok(ok(PlansResponse { scenario_id, plans }))
}

async fn conflicts(
    State(state): State<ApiState>,
    Json(request): Json<SelectionBody>,
) -> ApiResult<ConflictsResponse> {
    let (scenario_id, selection, existing) = prepare_selection(&state, request).await?;
    let catalog = fetch_catalog(&state).await?;
    let found = detect_conflicts(
        &selection.org_units,
        &selection.selected_interventions_by_category,
        &existing,
    );
    Ok(ok(ConflictsResponse {
        scenario_id,
        conflicts: label_conflicts(
            &found,
            &selection.selected_interventions_by_category,
            &catalog,
        ),
    }))
}

async fn assignments(
    State(state): State<ApiState>,
    Json(request): Json<AssignmentBody>,
) -> ApiResult<AssignmentResponse> {
    let (body, decisions, default_decision) = request.split();
    let (scenario_id, selection, existing) = prepare_selection(&state, body).await?;
    let catalog = fetch_catalog(&state).await?;
    state
        .backends
        .mirror(&catalog, &selection.org_units)
        .await
        .map_err(ApiError::internal)?;

    let selected = selection.selected_interventions_by_category.clone();
    let sink = state.backends.sink();
    let mut gate = AssignmentGate::new();
    let outcome = match gate.request(scenario_id, selection, &existing, sink).await? {
        GateOutcome::AwaitingResolution(_) => {
            for input in &decisions {
                gate.resolve(input.org_unit, input.category, input.decision)?;
            }
            if let Some(decision) = default_decision {
                gate.resolve_remaining(decision)?;
            }
            let unresolved = gate.unresolved();
            if !unresolved.is_empty() {
                let pending: Vec<_> = gate
                    .conflicts()
                    .iter()
                    .filter(|c| unresolved.contains(&c.key()))
                    .cloned()
                    .collect();
                warn!(
                    "scenario {scenario_id}: rejecting assignment with unresolved {}",
                    join_keys(&unresolved)
                );
                return Err(ApiError::unresolved(label_conflicts(
                    &pending, &selected, &catalog,
                )));
            }
            gate.commit(sink).await?
        }
        outcome => outcome,
    };

    Ok(ok(match outcome {
        GateOutcome::Committed {
            submission,
            dropped,
        } => AssignmentResponse::Committed {
            submission,
            dropped,
        },
        outcome => AssignmentResponse::NothingToCommit {
            dropped: outcome.dropped().to_vec(),
        },
    }))
}

async fn merge_budgets(Json(request): Json<BudgetBody>) -> ApiResult<BudgetResponse> {
    let budgets = match request {
        BudgetBody::Wrapped { budgets } | BudgetBody::Bare(budgets) => budgets,
    };
    Ok(ok(BudgetResponse {
        totals: budget_totals(&budgets),
        budgets: merge_budgets_by_year(&budgets),
    }))
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { ok: true, data })
}

async fn fetch_catalog(state: &ApiState) -> std::result::Result<Catalog, ApiError> {
    state
        .backends
        .source()
        .fetch_catalog()
        .await
        .map_err(ApiError::internal)
}

async fn fetch_plans(
    state: &ApiState,
    scenario_id: ScenarioId,
) -> std::result::Result<Vec<InterventionPlan>, ApiError> {
    state
        .backends
        .source()
        .fetch_plans(scenario_id)
        .await
        .map_err(ApiError::internal)
}

async fn prepare_selection(
    state: &ApiState,
    request: SelectionBody,
) -> std::result::Result<(ScenarioId, SelectionRequest, Vec<InterventionPlan>), ApiError> {
    let scenario_id = request
        .scenario_id
        .unwrap_or(ScenarioId(state.config.planning.default_scenario));
    let mut selection = validate_selection(SelectionRequest::new(
        request.org_units,
        request.selected_interventions_by_category,
    ))?;
    let existing = fetch_plans(state, scenario_id).await?;
    name_org_units(&mut selection.org_units, &existing);
    Ok((scenario_id, selection, existing))
}

fn validate_selection(
    selection: SelectionRequest,
) -> std::result::Result<SelectionRequest, ApiError> {
    if selection.org_units.is_empty() {
        return Err(ApiError::bad_request("org_units cannot be empty"));
    }
    if selection.selected_interventions_by_category.is_empty() {
        return Err(ApiError::bad_request(
            "selected_interventions_by_category cannot be empty",
        ));
    }
    Ok(selection)
}

fn join_keys(keys: &[ConflictKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::Json;
    use serde_json::json;

    use super::{
        assignments, conflicts, validate_selection, ApiError, ApiState, AssignmentBody,
        AssignmentResponse, BudgetBody, SelectionBody,
    };
    use crate::assignment::gate::{GateError, GatePhase};
    use crate::assignment::{AssignmentSubmission, ConflictDecision};
    use crate::backends::Backends;
    use crate::catalog::{
        Catalog, CategoryId, Intervention, InterventionCategory, InterventionId, OrgUnit,
        OrgUnitId, ScenarioId,
    };
    use crate::config::Config;
    use crate::snapshot::AssignmentStore;

    /// District 1 already holds "ITN routine" (101, category 10) in scenario 1.
    fn seeded_state() -> (ApiState, Arc<AssignmentStore>) {
        let store = Arc::new(AssignmentStore::open_in_memory().expect("open store"));
        store
            .sync_catalog(&Catalog::new(vec![
                InterventionCategory {
                    id: CategoryId(10),
                    name: "Vector control".to_string(),
                    interventions: vec![
                        Intervention::new(100, "ITN campaign", 10),
                        Intervention::new(101, "ITN routine", 10),
                    ],
                },
                InterventionCategory {
                    id: CategoryId(20),
                    name: "Chemoprevention".to_string(),
                    interventions: vec![Intervention::new(200, "SMC", 20)],
                },
            ]))
            .expect("sync catalog");
        store
            .upsert_org_units(&[OrgUnit::new(1, "District A"), OrgUnit::new(2, "District B")])
            .expect("org units");
        store
            .insert_submission(&AssignmentSubmission {
                scenario_id: ScenarioId(1),
                org_unit_ids: vec![OrgUnitId(1)],
                intervention_ids: vec![InterventionId(101)],
            })
            .expect("existing assignment");

        let state = ApiState {
            config: Config::default(),
            backends: Backends::new(store.clone(), store.clone()),
        };
        (state, store)
    }

    fn assignment_body(value: serde_json::Value) -> Json<AssignmentBody> {
        Json(serde_json::from_value(value).expect("valid body"))
    }

    #[tokio::test]
    async fn conflicts_route_labels_each_district_once() {
        let (state, _store) = seeded_state();
        let body: SelectionBody = serde_json::from_value(json!({
            "org_units": [{"id": 1}, {"id": 2}, {"id": 1}],
            "selected_interventions_by_category": {"10": 100}
        }))
        .expect("valid body");

        let Json(response) = conflicts(State(state), Json(body))
            .await
            .expect("conflicts");

        let found = response.data.conflicts;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].org_unit.id, OrgUnitId(1));
        assert_eq!(found[0].org_unit.name, "District A");
        assert_eq!(found[0].category_name, "Vector control");
        assert_eq!(found[0].selected_label(), "ITN campaign");
        assert_eq!(found[0].assigned_label(), "ITN routine");
    }

    #[tokio::test]
    async fn assignment_without_decisions_is_rejected_with_conflicts() {
        let (state, store) = seeded_state();

        let err = assignments(
            State(state),
            assignment_body(json!({
                "org_units": [{"id": 1}, {"id": 2}],
                "selected_interventions_by_category": {"10": 100}
            })),
        )
        .await
        .expect_err("unresolved conflict");

        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.conflicts.len(), 1);
        assert_eq!(store.count_assignments(ScenarioId(1)).expect("count"), 1);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json body");
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["conflicts"][0]["org_unit"]["id"], json!(1));
        assert_eq!(value["conflicts"][0]["category_name"], json!("Vector control"));
    }

    #[tokio::test]
    async fn replace_decision_commits_and_supersedes() {
        let (state, store) = seeded_state();

        let Json(response) = assignments(
            State(state),
            assignment_body(json!({
                "org_units": [{"id": 1}, {"id": 2}],
                "selected_interventions_by_category": {"10": 100},
                "decisions": [{"org_unit": 1, "category": 10, "decision": "replace_existing"}]
            })),
        )
        .await
        .expect("commit");

        let AssignmentResponse::Committed {
            submission,
            dropped,
        } = response.data
        else {
            panic!("expected commit");
        };
        assert_eq!(submission.org_unit_ids, vec![OrgUnitId(1), OrgUnitId(2)]);
        assert!(dropped.is_empty());

        let plans = store.load_plans(ScenarioId(1)).expect("plans");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].intervention.id, InterventionId(100));
        assert_eq!(plans[0].org_units.len(), 2);
    }

    #[tokio::test]
    async fn default_keep_reports_dropped_interventions() {
        let (state, store) = seeded_state();

        let Json(response) = assignments(
            State(state),
            assignment_body(json!({
                "org_units": [{"id": 1}, {"id": 2}],
                "selected_interventions_by_category": {"10": 100, "20": 200},
                "default_decision": "keep_existing"
            })),
        )
        .await
        .expect("commit");

        let AssignmentResponse::Committed {
            submission,
            dropped,
        } = response.data
        else {
            panic!("expected commit");
        };
        assert_eq!(submission.org_unit_ids, vec![OrgUnitId(2)]);
        let missed: Vec<_> = dropped
            .iter()
            .map(|d| (d.org_unit.id, d.intervention_id, d.kept_existing))
            .collect();
        assert_eq!(
            missed,
            vec![
                (OrgUnitId(1), InterventionId(100), true),
                (OrgUnitId(1), InterventionId(200), false),
            ]
        );
        assert_eq!(store.count_assignments(ScenarioId(1)).expect("count"), 3);
    }

    #[tokio::test]
    async fn decision_for_unknown_conflict_is_a_bad_request() {
        let (state, store) = seeded_state();

        let err = assignments(
            State(state),
            assignment_body(json!({
                "org_units": [{"id": 1}, {"id": 2}],
                "selected_interventions_by_category": {"10": 100},
                "decisions": [{"org_unit": 2, "category": 10, "decision": "keep_existing"}]
            })),
        )
        .await
        .expect_err("unknown conflict");

        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(store.count_assignments(ScenarioId(1)).expect("count"), 1);
    }

    #[test]
    fn parses_assignment_body_with_decisions() {
        let body: AssignmentBody = serde_json::from_value(json!({
            "scenario_id": 3,
            "org_units": [{"id": 1}, {"id": 2, "name": "District B"}],
            "selected_interventions_by_category": {"10": 100},
            "decisions": [{"org_unit": 1, "category": 10, "decision": "keep_existing"}],
            "default_decision": "replace_existing"
        }))
        .expect("valid body");

        let (selection, decisions, default_decision) = body.split();
        assert_eq!(selection.org_units.len(), 2);
        assert_eq!(selection.org_units[0].name, "");
        assert_eq!(
            selection.selected_interventions_by_category.get(&CategoryId(10)),
            Some(&InterventionId(100))
        );
        assert_eq!(decisions[0].org_unit, OrgUnitId(1));
        assert_eq!(decisions[0].category, CategoryId(10));
        assert_eq!(decisions[0].decision, ConflictDecision::KeepExisting);
        assert_eq!(default_decision, Some(ConflictDecision::ReplaceExisting));
    }

    #[test]
    fn accepts_bare_and_wrapped_budget_lists() {
        let year = json!({"year": 2025, "interventions": []});
        assert!(matches!(
            serde_json::from_value::<BudgetBody>(json!([year.clone()])),
            Ok(BudgetBody::Bare(_))
        ));
        assert!(matches!(
            serde_json::from_value::<BudgetBody>(json!({"budgets": [year]})),
            Ok(BudgetBody::Wrapped { .. })
        ));
    }

    #[test]
    fn rejects_empty_selection() {
        let selection = serde_json::from_value(json!({
            "org_units": [],
            "selected_interventions_by_category": {"10": 100}
        }))
        .expect("valid json");
        let err = validate_selection(selection).expect_err("empty org units");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn maps_gate_errors_to_status_codes() {
        let busy: ApiError = GateError::Busy(GatePhase::Checking).into();
        assert_eq!(busy.status, StatusCode::CONFLICT);
        let sink: ApiError = GateError::Sink(anyhow::anyhow!("down")).into();
        assert_eq!(sink.status, StatusCode::INTERNAL_SERVER_ERROR);
        let unknown: ApiError = GateError::UnknownConflict {
            org_unit: OrgUnitId(1),
            category: CategoryId(10),
        }
        .into();
        assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
    }
}
